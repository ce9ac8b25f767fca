//! Control channel handshake: login → verify → talk start.
//!
//! [`Handshake`] is a pure state machine. It never touches a socket: the
//! caller feeds it received frames and sends whatever it asks for. This keeps
//! the protocol rules testable without a camera.

use crate::protocol::{
    opcode, CameraInfo, FixedField, Frame, Magic, Message, Password, ProtocolError,
    CREDENTIAL_LEN,
};
use log::{debug, info, warn};

pub const RESULT_OK: i16 = 0;
pub const RESULT_USER_ERROR: i16 = 1;
pub const RESULT_BUSY: i16 = 2;
pub const RESULT_PASSWORD_ERROR: i16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HandshakeState {
    Init,
    AwaitingLoginAck,
    AwaitingVerifyAck,
    AwaitingTalkAck,
    Established { data_connection_id: u32 },
    Failed,
}

/// What the caller should do after feeding a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Send this request and wait for the next frame
    Send(Message),
    /// The frame was not for us; keep reading
    Discard,
    /// Talk session negotiated
    Established { data_connection_id: u32 },
}

#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
    user: FixedField<CREDENTIAL_LEN>,
    password: Password,
    buffer_secs: u8,
    camera: Option<CameraInfo>,
}

impl Handshake {
    /// `buffer_secs` is the camera's playback buffer and is raised to at least 1
    pub fn new(user: impl AsRef<[u8]>, password: impl AsRef<[u8]>, buffer_secs: u8) -> Self {
        if user.as_ref().len() > CREDENTIAL_LEN {
            warn!("⚠️ User name longer than {} bytes will be truncated", CREDENTIAL_LEN);
        }
        if password.as_ref().len() > CREDENTIAL_LEN {
            warn!("⚠️ Password longer than {} bytes will be truncated", CREDENTIAL_LEN);
        }

        Handshake {
            state: HandshakeState::Init,
            user: FixedField::new(user),
            password: Password::new(password),
            buffer_secs: buffer_secs.max(1),
            camera: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Camera details from the login response, once received
    pub fn camera(&self) -> Option<&CameraInfo> {
        self.camera.as_ref()
    }

    /// Leave `Init` and return the login request to send
    pub fn start(&mut self) -> Result<Message, ProtocolError> {
        if self.state != HandshakeState::Init {
            return Err(ProtocolError::InvalidState(format!(
                "cannot start handshake in state {}",
                self.state
            )));
        }
        self.state = HandshakeState::AwaitingLoginAck;
        Ok(Message::LoginRequest)
    }

    /// Advance on one received frame. Any error leaves the handshake `Failed`.
    pub fn on_frame(&mut self, frame: &Frame) -> Result<Transition, ProtocolError> {
        if matches!(
            self.state,
            HandshakeState::Init | HandshakeState::Established { .. } | HandshakeState::Failed
        ) {
            return Err(ProtocolError::InvalidState(format!(
                "no frame expected in state {}",
                self.state
            )));
        }

        match self.advance(frame) {
            Ok((next, transition)) => {
                debug!("🤝 Handshake {} -> {}", self.state, next);
                self.state = next;
                Ok(transition)
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    fn advance(&mut self, frame: &Frame) -> Result<(HandshakeState, Transition), ProtocolError> {
        match self.state {
            HandshakeState::AwaitingLoginAck => match expect_control(frame)? {
                Message::LoginResponse {
                    result: RESULT_OK,
                    camera,
                } => {
                    if let Some(camera) = &camera {
                        info!(
                            "📷 Camera {} (firmware {})",
                            camera.camera_id.to_string_lossy(),
                            camera.firmware_string()
                        );
                    }
                    self.camera = camera;
                    let verify = Message::VerifyRequest {
                        user: self.user,
                        password: self.password,
                    };
                    Ok((HandshakeState::AwaitingVerifyAck, Transition::Send(verify)))
                }
                Message::LoginResponse {
                    result: RESULT_BUSY,
                    ..
                } => Err(ProtocolError::TooManyConnections),
                Message::LoginResponse { result, .. } => Err(ProtocolError::UnexpectedResult {
                    stage: "login",
                    code: result,
                }),
                _ => Err(ProtocolError::unexpected(frame)),
            },
            HandshakeState::AwaitingVerifyAck => match expect_control(frame)? {
                Message::VerifyResponse { result: RESULT_OK } => {
                    let talk = Message::TalkStartRequest {
                        buffer_secs: self.buffer_secs,
                    };
                    Ok((HandshakeState::AwaitingTalkAck, Transition::Send(talk)))
                }
                Message::VerifyResponse {
                    result: RESULT_USER_ERROR,
                } => Err(ProtocolError::InvalidUser),
                Message::VerifyResponse {
                    result: RESULT_PASSWORD_ERROR,
                } => Err(ProtocolError::InvalidPassword),
                Message::VerifyResponse { result } => Err(ProtocolError::UnexpectedResult {
                    stage: "verify",
                    code: result,
                }),
                _ => Err(ProtocolError::unexpected(frame)),
            },
            HandshakeState::AwaitingTalkAck => {
                if frame.channel() != Some(Magic::Control)
                    || frame.opcode != opcode::TALK_START_RESPONSE
                {
                    warn!(
                        "⚠️ Discarding frame {} opcode {} while awaiting talk start response",
                        String::from_utf8_lossy(&frame.magic),
                        frame.opcode
                    );
                    return Ok((HandshakeState::AwaitingTalkAck, Transition::Discard));
                }

                match Message::from_frame(frame)? {
                    Message::TalkStartResponse {
                        result: RESULT_OK,
                        data_connection_id,
                    } => Ok((
                        HandshakeState::Established { data_connection_id },
                        Transition::Established { data_connection_id },
                    )),
                    Message::TalkStartResponse {
                        result: RESULT_BUSY,
                        ..
                    } => Err(ProtocolError::TooManyConnections),
                    Message::TalkStartResponse { result, .. } => {
                        Err(ProtocolError::UnexpectedResult {
                            stage: "talk start",
                            code: result,
                        })
                    }
                    _ => Err(ProtocolError::unexpected(frame)),
                }
            }
            HandshakeState::Init
            | HandshakeState::Established { .. }
            | HandshakeState::Failed => Err(ProtocolError::InvalidState(format!(
                "no frame expected in state {}",
                self.state
            ))),
        }
    }
}

/// Login and verify responses must arrive in order on the control channel
fn expect_control(frame: &Frame) -> Result<Message, ProtocolError> {
    if frame.channel() != Some(Magic::Control) {
        return Err(ProtocolError::unexpected(frame));
    }
    Message::from_frame(frame)
}
