//! Control and data sessions against a scripted camera on loopback

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;
use talk_protocol::protocol::{opcode, read_frame, write_frame, FixedField};
use talk_protocol::{
    CameraInfo, ControlSession, DataSession, Frame, Magic, Message, ProtocolError, SessionConfig,
};

/// How the fake camera answers each control request
#[derive(Clone)]
struct Script {
    login_result: i16,
    verify_result: i16,
    talk_result: i16,
    /// Frames pushed before the talk start response
    noise: Vec<Frame>,
    data_connection_id: u32,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            login_result: 0,
            verify_result: 0,
            talk_result: 0,
            noise: Vec::new(),
            data_connection_id: 77,
        }
    }
}

/// Serve one control connection and return every frame the client sent
fn spawn_camera(script: Script) -> (SocketAddr, thread::JoinHandle<Vec<Frame>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind mock camera");
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept");
        let mut received = Vec::new();

        while let Ok(frame) = read_frame(&mut stream) {
            let reply = match frame.opcode {
                opcode::LOGIN_REQUEST => vec![Message::LoginResponse {
                    result: script.login_result,
                    camera: (script.login_result == 0).then(|| CameraInfo {
                        camera_id: FixedField::new("MOCKCAM"),
                        firmware_version: [9, 8, 7, 6],
                    }),
                }
                .to_frame()],
                opcode::VERIFY_REQUEST => vec![Message::VerifyResponse {
                    result: script.verify_result,
                }
                .to_frame()],
                opcode::TALK_START_REQUEST => {
                    let mut frames = script.noise.clone();
                    frames.push(
                        Message::TalkStartResponse {
                            result: script.talk_result,
                            data_connection_id: script.data_connection_id,
                        }
                        .to_frame(),
                    );
                    frames
                }
                _ => Vec::new(),
            };
            received.push(frame);

            for frame in reply {
                write_frame(&mut stream, &frame).expect("Failed to reply");
            }
        }

        received
    });

    (addr, handle)
}

fn opcodes(frames: &[Frame]) -> Vec<u16> {
    frames.iter().map(|f| f.opcode).collect()
}

#[test]
fn test_successful_login() {
    env_logger::try_init().ok();

    let (addr, camera) = spawn_camera(Script::default());
    let mut session = ControlSession::connect(addr, SessionConfig::default()).unwrap();

    let grant = session.login("admin", "secret").unwrap();
    assert_eq!(grant.data_connection_id, 77);
    assert_eq!(session.data_connection_id(), Some(77));
    assert_eq!(
        session.camera().map(|c| c.camera_id.to_string_lossy()),
        Some("MOCKCAM".to_string())
    );

    drop(session);
    let received = camera.join().unwrap();
    assert_eq!(
        opcodes(&received),
        vec![
            opcode::LOGIN_REQUEST,
            opcode::VERIFY_REQUEST,
            opcode::TALK_START_REQUEST
        ]
    );
    assert!(received.iter().all(|f| f.channel() == Some(Magic::Control)));
    assert!(received[0].payload.is_empty());
    assert_eq!(&received[1].payload[..5], b"admin");
    assert_eq!(&received[1].payload[13..19], b"secret");
    assert_eq!(received[2].payload, vec![1]);
}

#[test]
fn test_second_login_is_rejected() {
    env_logger::try_init().ok();

    let (addr, _camera) = spawn_camera(Script::default());
    let mut session = ControlSession::connect(addr, SessionConfig::default()).unwrap();
    session.login("admin", "").unwrap();

    assert!(matches!(
        session.login("admin", ""),
        Err(ProtocolError::InvalidState(_))
    ));
}

#[test]
fn test_login_after_failed_handshake_is_rejected() {
    env_logger::try_init().ok();

    let (addr, camera) = spawn_camera(Script {
        login_result: 2,
        ..Script::default()
    });
    let mut session = ControlSession::connect(addr, SessionConfig::default()).unwrap();

    assert!(matches!(
        session.login("admin", ""),
        Err(ProtocolError::TooManyConnections)
    ));
    assert!(matches!(
        session.login("admin", ""),
        Err(ProtocolError::InvalidState(_))
    ));
    assert_eq!(session.data_connection_id(), None);

    drop(session);
    assert_eq!(opcodes(&camera.join().unwrap()), vec![opcode::LOGIN_REQUEST]);
}

#[test]
fn test_busy_camera_stops_after_login() {
    env_logger::try_init().ok();

    let (addr, camera) = spawn_camera(Script {
        login_result: 2,
        ..Script::default()
    });
    let mut session = ControlSession::connect(addr, SessionConfig::default()).unwrap();

    let err = session.login("admin", "").unwrap_err();
    assert!(matches!(err, ProtocolError::TooManyConnections));
    assert_eq!(session.data_connection_id(), None);

    drop(session);
    assert_eq!(opcodes(&camera.join().unwrap()), vec![opcode::LOGIN_REQUEST]);
}

#[test]
fn test_bad_credentials_stop_before_talk_start() {
    env_logger::try_init().ok();

    for (code, user_error) in [(1, true), (5, false)] {
        let (addr, camera) = spawn_camera(Script {
            verify_result: code,
            ..Script::default()
        });
        let mut session = ControlSession::connect(addr, SessionConfig::default()).unwrap();

        let err = session.login("admin", "wrong").unwrap_err();
        if user_error {
            assert!(matches!(err, ProtocolError::InvalidUser));
        } else {
            assert!(matches!(err, ProtocolError::InvalidPassword));
        }

        drop(session);
        assert_eq!(
            opcodes(&camera.join().unwrap()),
            vec![opcode::LOGIN_REQUEST, opcode::VERIFY_REQUEST]
        );
    }
}

#[test]
fn test_busy_talk_start() {
    env_logger::try_init().ok();

    let (addr, _camera) = spawn_camera(Script {
        talk_result: 2,
        ..Script::default()
    });
    let mut session = ControlSession::connect(addr, SessionConfig::default()).unwrap();

    let err = session.login("admin", "").unwrap_err();
    assert!(matches!(err, ProtocolError::TooManyConnections));
    assert_eq!(session.data_connection_id(), None);
}

#[test]
fn test_noise_before_talk_start_response_is_skipped() {
    env_logger::try_init().ok();

    let (addr, _camera) = spawn_camera(Script {
        noise: vec![
            Frame::new(Magic::Control, 29, vec![0; 12]),
            Frame::new(Magic::Data, opcode::AUDIO_DATA, vec![]),
        ],
        data_connection_id: 1234,
        ..Script::default()
    });
    let mut session = ControlSession::connect(addr, SessionConfig::default()).unwrap();

    let grant = session.login("admin", "").unwrap();
    assert_eq!(grant.data_connection_id, 1234);
}

#[test]
fn test_response_split_across_writes() {
    env_logger::try_init().ok();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let camera = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_frame(&mut stream).unwrap();

        let reply = Message::LoginResponse {
            result: 2,
            camera: None,
        }
        .to_frame()
        .encode();
        for chunk in reply.chunks(5) {
            stream.write_all(chunk).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(5));
        }
    });

    let mut session = ControlSession::connect(addr, SessionConfig::default()).unwrap();
    assert!(matches!(
        session.login("admin", ""),
        Err(ProtocolError::TooManyConnections)
    ));
    camera.join().unwrap();
}

#[test]
fn test_read_timeout_on_silent_camera() {
    env_logger::try_init().ok();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let camera = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(500));
        drop(stream);
    });

    let config = SessionConfig {
        read_timeout: Some(Duration::from_millis(100)),
        ..SessionConfig::default()
    };
    let mut session = ControlSession::connect(addr, config).unwrap();
    assert!(matches!(session.login("admin", ""), Err(ProtocolError::Io(_))));
    camera.join().unwrap();
}

#[test]
fn test_data_session_binds_on_open() {
    env_logger::try_init().ok();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let camera = thread::spawn(move || {
        let (mut stream, _): (TcpStream, _) = listener.accept().unwrap();
        read_frame(&mut stream).unwrap()
    });

    let session = DataSession::open(addr, 0xabcd, &SessionConfig::default()).unwrap();
    assert_eq!(session.data_connection_id(), 0xabcd);

    let binding = camera.join().unwrap();
    assert_eq!(binding.magic, *b"MO_V");
    assert_eq!(binding.opcode, opcode::DATA_LOGIN);
    assert_eq!(
        Message::from_frame(&binding).unwrap(),
        Message::DataLogin {
            data_connection_id: 0xabcd
        }
    );
}

#[test]
fn test_data_socket_gets_configured_timeouts() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let camera = thread::spawn(move || {
        let (mut stream, _): (TcpStream, _) = listener.accept().unwrap();
        read_frame(&mut stream).unwrap()
    });

    let config = SessionConfig {
        read_timeout: Some(Duration::from_secs(3)),
        ..SessionConfig::default()
    };
    let stream = DataSession::open(addr, 1, &config).unwrap().into_inner();
    assert_eq!(stream.read_timeout().unwrap(), Some(Duration::from_secs(3)));
    assert!(stream.nodelay().unwrap());

    camera.join().unwrap();
}
