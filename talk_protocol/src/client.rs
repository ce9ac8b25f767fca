use crate::handshake::{Handshake, Transition};
use crate::protocol::{CameraInfo, Connection, Message, ProtocolError};
use log::{debug, error, info};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Socket and negotiation settings shared by both channels
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Read timeout set on both sockets. `None` blocks forever.
    ///
    /// Only the control channel is ever read from.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// Camera playback buffer requested in the talk start request
    pub buffer_secs: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
            buffer_secs: 1,
        }
    }
}

fn connect_stream(addr: SocketAddr, config: &SessionConfig) -> Result<TcpStream, ProtocolError> {
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    stream.set_read_timeout(config.read_timeout)?;
    stream.set_write_timeout(config.write_timeout)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct TalkGrant {
    pub data_connection_id: u32,
    pub camera: Option<CameraInfo>,
}

/// Control channel to a camera
pub struct ControlSession {
    connection: Connection,
    remote_addr: SocketAddr,
    config: SessionConfig,
    data_connection_id: Option<u32>,
    camera: Option<CameraInfo>,
    failed: bool,
}

impl ControlSession {
    /// Connect the control channel
    pub fn connect(addr: impl ToSocketAddrs, config: SessionConfig) -> Result<Self, ProtocolError> {
        let remote_addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            ProtocolError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "camera address did not resolve",
            ))
        })?;

        info!("📡 Connecting to camera control channel at {}", remote_addr);
        let stream = connect_stream(remote_addr, &config)?;
        let connection = Connection::new(stream)?;
        info!("✅ Connected to camera");

        Ok(ControlSession {
            connection,
            remote_addr,
            config,
            data_connection_id: None,
            camera: None,
            failed: false,
        })
    }

    /// Run login → verify → talk start and return the data connection id.
    ///
    /// Blocks on each response. Any failure is terminal for this session.
    pub fn login(
        &mut self,
        user: impl AsRef<[u8]>,
        password: impl AsRef<[u8]>,
    ) -> Result<TalkGrant, ProtocolError> {
        if let Some(id) = self.data_connection_id {
            return Err(ProtocolError::InvalidState(format!(
                "talk session {} already established",
                id
            )));
        }
        if self.failed {
            return Err(ProtocolError::InvalidState(
                "handshake already failed on this connection".to_string(),
            ));
        }

        let mut handshake = Handshake::new(user, password, self.config.buffer_secs);
        let data_connection_id = match self.run_handshake(&mut handshake) {
            Ok(id) => id,
            Err(e) => {
                self.failed = true;
                error!("❌ Handshake failed in state {}: {}", handshake.state(), e);
                return Err(e);
            }
        };

        self.data_connection_id = Some(data_connection_id);
        self.camera = handshake.camera().cloned();
        info!(
            "✅ Talk session established (data connection id {})",
            data_connection_id
        );

        Ok(TalkGrant {
            data_connection_id,
            camera: self.camera.clone(),
        })
    }

    fn run_handshake(&mut self, handshake: &mut Handshake) -> Result<u32, ProtocolError> {
        let login = handshake.start()?;
        self.send(&login)?;

        loop {
            let frame = self.connection.read_frame()?;
            match handshake.on_frame(&frame)? {
                Transition::Send(message) => self.send(&message)?,
                Transition::Discard => continue,
                Transition::Established { data_connection_id } => return Ok(data_connection_id),
            }
        }
    }

    fn send(&mut self, message: &Message) -> Result<(), ProtocolError> {
        debug!("📤 Sending {:?}", message);
        self.connection.write_message(message)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Set once, after a successful talk start exchange
    pub fn data_connection_id(&self) -> Option<u32> {
        self.data_connection_id
    }

    pub fn camera(&self) -> Option<&CameraInfo> {
        self.camera.as_ref()
    }
}

/// Data channel bound to a negotiated data connection id.
///
/// Generic over the writer so audio framing can be exercised without a socket.
pub struct DataSession<W: Write = TcpStream> {
    writer: W,
    data_connection_id: u32,
    frames_sent: u64,
}

impl DataSession<TcpStream> {
    /// Open a second connection to the camera and bind it.
    ///
    /// The camera never acknowledges the binding; a wrong id just gets the
    /// connection dropped, which surfaces on the next send.
    pub fn open(
        remote_addr: SocketAddr,
        data_connection_id: u32,
        config: &SessionConfig,
    ) -> Result<Self, ProtocolError> {
        info!(
            "📡 Opening data channel to {} (data connection id {})",
            remote_addr, data_connection_id
        );
        let stream = connect_stream(remote_addr, config)?;
        Self::bind(stream, data_connection_id)
    }
}

impl<W: Write> DataSession<W> {
    /// Send the binding frame over `writer` without waiting for a reply
    pub fn bind(writer: W, data_connection_id: u32) -> Result<Self, ProtocolError> {
        let mut session = DataSession {
            writer,
            data_connection_id,
            frames_sent: 0,
        };
        session.send_message(&Message::DataLogin { data_connection_id })?;
        Ok(session)
    }

    /// Write already framed bytes
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        self.frames_sent += 1;
        Ok(())
    }

    pub fn send_message(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let frame = message.to_frame();
        debug!(
            "📤 Data frame opcode {} ({} payload bytes)",
            frame.opcode,
            frame.payload.len()
        );
        self.send(&frame.encode())
    }

    pub fn data_connection_id(&self) -> u32 {
        self.data_connection_id
    }

    /// Frames written so far, including the binding frame
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{opcode, Frame, Magic};

    #[test]
    fn test_bind_sends_data_login_frame() {
        let session = DataSession::bind(Vec::new(), 0x0102_0304).unwrap();
        assert_eq!(session.frames_sent(), 1);

        let bytes = session.into_inner();
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.channel(), Some(Magic::Data));
        assert_eq!(frame.opcode, opcode::DATA_LOGIN);
        assert_eq!(frame.payload, vec![4, 3, 2, 1]);
        assert_eq!(bytes.len(), frame.wire_len());
    }

    struct ResetWriter;

    impl Write for ResetWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::ConnectionReset))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_peer_reset_is_connection_closed() {
        let err = DataSession::bind(ResetWriter, 1).err().unwrap();
        assert!(matches!(err, ProtocolError::ConnectionClosed(_)));
    }
}
