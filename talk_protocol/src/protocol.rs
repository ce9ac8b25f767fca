use log::debug;
use std::fmt;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use thiserror::Error;

/// Size of the fixed frame header: magic(4) opcode(2) reserved(1) reserved(8) len(4) len(4)
pub const HEADER_LEN: usize = 23;

/// Width of the user name and password fields in a verify request
pub const CREDENTIAL_LEN: usize = 13;

/// Largest payload [`read_frame`] will allocate for. Nothing a camera sends comes close.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(io::Error),

    #[error("Connection closed: {0}")]
    ConnectionClosed(io::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unexpected frame (magic {magic}, opcode {opcode})")]
    UnexpectedOpcode { magic: String, opcode: u16 },

    #[error("Too many open connections on the camera")]
    TooManyConnections,

    #[error("Camera rejected the user name")]
    InvalidUser,

    #[error("Camera rejected the password")]
    InvalidPassword,

    #[error("Unexpected result code {code} in {stage} response")]
    UnexpectedResult { stage: &'static str, code: i16 },

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl ProtocolError {
    pub(crate) fn unexpected(frame: &Frame) -> Self {
        ProtocolError::UnexpectedOpcode {
            magic: String::from_utf8_lossy(&frame.magic).into_owned(),
            opcode: frame.opcode,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ProtocolError::ConnectionClosed(err),
            _ => ProtocolError::Io(err),
        }
    }
}

/// Channel a frame belongs to, identified by its 4-byte magic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// `MO_O`: authentication and talk negotiation
    Control,
    /// `MO_V`: data channel binding and audio
    Data,
}

impl Magic {
    pub const fn bytes(self) -> [u8; 4] {
        match self {
            Magic::Control => *b"MO_O",
            Magic::Data => *b"MO_V",
        }
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        match &bytes {
            b"MO_O" => Some(Magic::Control),
            b"MO_V" => Some(Magic::Data),
            _ => None,
        }
    }
}

/// Opcodes. The same number can mean different things on each channel.
pub mod opcode {
    pub const LOGIN_REQUEST: u16 = 0;
    pub const LOGIN_RESPONSE: u16 = 1;
    pub const VERIFY_REQUEST: u16 = 2;
    pub const VERIFY_RESPONSE: u16 = 3;
    pub const TALK_START_REQUEST: u16 = 11;
    pub const TALK_START_RESPONSE: u16 = 12;

    pub const DATA_LOGIN: u16 = 0;
    pub const AUDIO_DATA: u16 = 3;
}

/// One protocol message: fixed header plus opcode-specific payload.
///
/// The magic is kept as raw bytes so that frames for the wrong channel can
/// still be decoded, reported and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub magic: [u8; 4],
    pub opcode: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(magic: Magic, opcode: u16, payload: Vec<u8>) -> Self {
        Frame {
            magic: magic.bytes(),
            opcode,
            payload,
        }
    }

    /// The channel this frame claims to belong to, if the magic is known
    pub fn channel(&self) -> Option<Magic> {
        Magic::from_bytes(self.magic)
    }

    /// Number of bytes this frame occupies on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize to `[magic][opcode][0][0 x 8][len][len][payload]`.
    ///
    /// The length fields are 32 bits wide; payloads must stay below 4 GiB.
    pub fn encode(&self) -> Vec<u8> {
        let len = (self.payload.len() as u32).to_le_bytes();

        let mut bytes = Vec::with_capacity(self.wire_len());
        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.opcode.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&len);
        bytes.extend_from_slice(&len);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse one frame from the start of `bytes`.
    ///
    /// Consumes exactly [`Frame::wire_len`] bytes; anything after that is left
    /// for the caller. Fails if the buffer holds less than the header or less
    /// payload than the header declares.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header: &[u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|h| <&[u8; HEADER_LEN]>::try_from(h).ok())
            .ok_or_else(|| {
                ProtocolError::MalformedFrame(format!(
                    "need {} header bytes, got {}",
                    HEADER_LEN,
                    bytes.len()
                ))
            })?;
        let header = FrameHeader::parse(header)?;

        let end = HEADER_LEN + header.payload_len as usize;
        let payload = bytes.get(HEADER_LEN..end).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!(
                "header declares {} payload bytes, only {} available",
                header.payload_len,
                bytes.len() - HEADER_LEN
            ))
        })?;

        Ok(Frame {
            magic: header.magic,
            opcode: header.opcode,
            payload: payload.to_vec(),
        })
    }
}

struct FrameHeader {
    magic: [u8; 4],
    opcode: u16,
    payload_len: u32,
}

impl FrameHeader {
    fn parse(h: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        // h[6] and h[7..15] are reserved and ignored
        let magic = [h[0], h[1], h[2], h[3]];
        let opcode = u16::from_le_bytes([h[4], h[5]]);
        let len_a = u32::from_le_bytes([h[15], h[16], h[17], h[18]]);
        let len_b = u32::from_le_bytes([h[19], h[20], h[21], h[22]]);

        if len_a != len_b {
            return Err(ProtocolError::MalformedFrame(format!(
                "length fields disagree ({} != {})",
                len_a, len_b
            )));
        }
        Ok(FrameHeader {
            magic,
            opcode,
            payload_len: len_a,
        })
    }
}

/// Read one complete frame, accumulating across as many reads as it takes
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let parsed = FrameHeader::parse(&header)?;
    if parsed.payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "payload length {} exceeds {}",
            parsed.payload_len, MAX_PAYLOAD_LEN
        )));
    }

    let mut payload = vec![0u8; parsed.payload_len as usize];
    if !payload.is_empty() {
        reader.read_exact(&mut payload)?;
    }

    debug!(
        "📥 Frame {} opcode {}: {}{}",
        String::from_utf8_lossy(&parsed.magic),
        parsed.opcode,
        hex(&header),
        hex(&payload)
    );

    Ok(Frame {
        magic: parsed.magic,
        opcode: parsed.opcode,
        payload,
    })
}

/// Write one frame and flush it
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<(), ProtocolError> {
    writer.write_all(&frame.encode())?;
    writer.flush()?;
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Fixed-width byte field: zero padded or truncated to `N` bytes on construction
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedField<const N: usize>([u8; N]);

impl<const N: usize> FixedField<N> {
    pub fn new(value: impl AsRef<[u8]>) -> Self {
        let value = value.as_ref();
        let len = value.len().min(N);
        let mut bytes = [0u8; N];
        bytes[..len].copy_from_slice(&value[..len]);
        FixedField(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// Printable form with trailing zero padding removed
    pub fn to_string_lossy(&self) -> String {
        let end = self.0.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl<const N: usize> fmt::Debug for FixedField<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

/// Password field. Never printed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Password(FixedField<CREDENTIAL_LEN>);

impl Password {
    pub fn new(value: impl AsRef<[u8]>) -> Self {
        Password(FixedField::new(value))
    }

    pub fn expose(&self) -> &FixedField<CREDENTIAL_LEN> {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Camera identity reported in a successful login response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub camera_id: FixedField<13>,
    pub firmware_version: [u8; 4],
}

impl CameraInfo {
    pub fn firmware_string(&self) -> String {
        let v = self.firmware_version;
        format!("{}.{}.{}.{}", v[0], v[1], v[2], v[3])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AudioFormat {
    Adpcm = 0,
}

impl TryFrom<u8> for AudioFormat {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AudioFormat::Adpcm),
            _ => Err(ProtocolError::MalformedFrame(format!(
                "unknown audio format {}",
                value
            ))),
        }
    }
}

/// Payload of an audio frame on the data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    pub timestamp_ms: u32,
    pub serial: u32,
    pub capture_secs: u32,
    pub format: AudioFormat,
    pub data: Vec<u8>,
}

/// Every payload the protocol knows, keyed by (magic, opcode)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // Control channel, client → camera
    LoginRequest,
    VerifyRequest {
        user: FixedField<CREDENTIAL_LEN>,
        password: Password,
    },
    TalkStartRequest {
        buffer_secs: u8,
    },

    // Control channel, camera → client
    LoginResponse {
        result: i16,
        camera: Option<CameraInfo>,
    },
    VerifyResponse {
        result: i16,
    },
    TalkStartResponse {
        result: i16,
        data_connection_id: u32,
    },

    // Data channel, client → camera
    DataLogin {
        data_connection_id: u32,
    },
    AudioData(AudioData),
}

impl Message {
    pub fn magic(&self) -> Magic {
        match self {
            Message::DataLogin { .. } | Message::AudioData(_) => Magic::Data,
            _ => Magic::Control,
        }
    }

    pub fn opcode(&self) -> u16 {
        match self {
            Message::LoginRequest => opcode::LOGIN_REQUEST,
            Message::LoginResponse { .. } => opcode::LOGIN_RESPONSE,
            Message::VerifyRequest { .. } => opcode::VERIFY_REQUEST,
            Message::VerifyResponse { .. } => opcode::VERIFY_RESPONSE,
            Message::TalkStartRequest { .. } => opcode::TALK_START_REQUEST,
            Message::TalkStartResponse { .. } => opcode::TALK_START_RESPONSE,
            Message::DataLogin { .. } => opcode::DATA_LOGIN,
            Message::AudioData(_) => opcode::AUDIO_DATA,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let mut payload = Vec::new();

        match self {
            Message::LoginRequest => {
                // No payload for login
            }
            Message::LoginResponse { result, camera } => {
                payload.extend_from_slice(&result.to_le_bytes());
                if let Some(camera) = camera {
                    payload.extend_from_slice(camera.camera_id.as_bytes());
                    payload.extend_from_slice(&[0u8; 8]);
                    payload.extend_from_slice(&camera.firmware_version);
                }
            }
            Message::VerifyRequest { user, password } => {
                payload.extend_from_slice(user.as_bytes());
                payload.extend_from_slice(password.expose().as_bytes());
            }
            Message::VerifyResponse { result } => {
                payload.extend_from_slice(&result.to_le_bytes());
                if *result == 0 {
                    payload.push(0);
                }
            }
            Message::TalkStartRequest { buffer_secs } => {
                payload.push(*buffer_secs);
            }
            Message::TalkStartResponse {
                result,
                data_connection_id,
            } => {
                payload.extend_from_slice(&result.to_le_bytes());
                if *result == 0 {
                    payload.extend_from_slice(&data_connection_id.to_le_bytes());
                }
            }
            Message::DataLogin { data_connection_id } => {
                payload.extend_from_slice(&data_connection_id.to_le_bytes());
            }
            Message::AudioData(audio) => {
                payload.extend_from_slice(&audio.timestamp_ms.to_le_bytes());
                payload.extend_from_slice(&audio.serial.to_le_bytes());
                payload.extend_from_slice(&audio.capture_secs.to_le_bytes());
                payload.push(audio.format as u8);
                // Bounded by the 32-bit frame length like every payload
                payload.extend_from_slice(&(audio.data.len() as u32).to_le_bytes());
                payload.extend_from_slice(&audio.data);
            }
        }

        Frame::new(self.magic(), self.opcode(), payload)
    }

    /// Decode the typed payload of a frame.
    ///
    /// Fails with `UnexpectedOpcode` when (magic, opcode) names no known
    /// variant, and with `MalformedFrame` when the payload is too short.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut reader = frame.payload.as_slice();

        match (frame.channel(), frame.opcode) {
            (Some(Magic::Control), opcode::LOGIN_REQUEST) => Ok(Message::LoginRequest),
            (Some(Magic::Control), opcode::LOGIN_RESPONSE) => {
                let result = read_i16(&mut reader)?;
                let camera = if result == 0 {
                    let camera_id = FixedField::new(read_array::<13>(&mut reader)?);
                    read_array::<8>(&mut reader)?;
                    let firmware_version = read_array::<4>(&mut reader)?;
                    Some(CameraInfo {
                        camera_id,
                        firmware_version,
                    })
                } else {
                    None
                };
                Ok(Message::LoginResponse { result, camera })
            }
            (Some(Magic::Control), opcode::VERIFY_REQUEST) => {
                let user = FixedField::new(read_array::<CREDENTIAL_LEN>(&mut reader)?);
                let password = Password::new(read_array::<CREDENTIAL_LEN>(&mut reader)?);
                Ok(Message::VerifyRequest { user, password })
            }
            (Some(Magic::Control), opcode::VERIFY_RESPONSE) => {
                // A trailing reserved byte follows on success; some firmwares omit it
                let result = read_i16(&mut reader)?;
                Ok(Message::VerifyResponse { result })
            }
            (Some(Magic::Control), opcode::TALK_START_REQUEST) => {
                let [buffer_secs] = read_array::<1>(&mut reader)?;
                Ok(Message::TalkStartRequest { buffer_secs })
            }
            (Some(Magic::Control), opcode::TALK_START_RESPONSE) => {
                let result = read_i16(&mut reader)?;
                let data_connection_id = if result == 0 {
                    read_u32(&mut reader)?
                } else {
                    0
                };
                Ok(Message::TalkStartResponse {
                    result,
                    data_connection_id,
                })
            }
            (Some(Magic::Data), opcode::DATA_LOGIN) => {
                let data_connection_id = read_u32(&mut reader)?;
                Ok(Message::DataLogin { data_connection_id })
            }
            (Some(Magic::Data), opcode::AUDIO_DATA) => {
                let timestamp_ms = read_u32(&mut reader)?;
                let serial = read_u32(&mut reader)?;
                let capture_secs = read_u32(&mut reader)?;
                let [format] = read_array::<1>(&mut reader)?;
                let format = AudioFormat::try_from(format)?;
                let len = read_u32(&mut reader)? as usize;
                if reader.len() != len {
                    return Err(ProtocolError::MalformedFrame(format!(
                        "audio data length {} but {} bytes follow",
                        len,
                        reader.len()
                    )));
                }
                Ok(Message::AudioData(AudioData {
                    timestamp_ms,
                    serial,
                    capture_secs,
                    format,
                    data: reader.to_vec(),
                }))
            }
            _ => Err(ProtocolError::unexpected(frame)),
        }
    }
}

// Helper functions for reading fixed-width payload fields

fn read_array<const N: usize>(reader: &mut &[u8]) -> Result<[u8; N], ProtocolError> {
    if reader.len() < N {
        return Err(ProtocolError::MalformedFrame(format!(
            "payload truncated: need {} more bytes, have {}",
            N,
            reader.len()
        )));
    }
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&reader[..N]);
    *reader = &reader[N..];
    Ok(bytes)
}

fn read_i16(reader: &mut &[u8]) -> Result<i16, ProtocolError> {
    read_array::<2>(reader).map(i16::from_le_bytes)
}

fn read_u32(reader: &mut &[u8]) -> Result<u32, ProtocolError> {
    read_array::<4>(reader).map(u32::from_le_bytes)
}

/// Buffered frame reader/writer over one TCP stream
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Result<Self, ProtocolError> {
        let reader_stream = stream.try_clone()?;
        let reader = BufReader::new(reader_stream);
        let writer = BufWriter::new(stream);

        Ok(Connection { reader, writer })
    }

    pub fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        read_frame(&mut self.reader)
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), ProtocolError> {
        write_frame(&mut self.writer, &message.to_frame())
    }
}
