//! # Talk Protocol
//!
//! Client side of the `MO_O`/`MO_V` binary protocol spoken by HiSilicon 3510
//! family network cameras for two-way audio.
//!
//! This crate provides:
//! - Frame codec and typed payloads (`protocol`)
//! - The login/verify/talk-start handshake as a pure state machine (`handshake`)
//! - Control and data channel sessions over TCP (`client`)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use talk_protocol::{ControlSession, DataSession, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::default();
//! let mut control = ControlSession::connect("192.168.1.20:80", config.clone())?;
//! let grant = control.login("admin", "")?;
//!
//! let mut data = DataSession::open(control.remote_addr(), grant.data_connection_id, &config)?;
//! // audio frames go out through data.send_message(...)
//! # let _ = &mut data;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod handshake;
pub mod protocol;

// Re-export commonly used types
pub use client::{ControlSession, DataSession, SessionConfig, TalkGrant};
pub use handshake::{Handshake, HandshakeState, Transition};
pub use protocol::{
    AudioData, AudioFormat, CameraInfo, Frame, Magic, Message, ProtocolError, HEADER_LEN,
};
