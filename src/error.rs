use crate::config::ConfigError;
use talk_protocol::ProtocolError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TalkError>;

#[derive(Error, Debug)]
pub enum TalkError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Streaming thread panicked")]
    StreamPanicked,
}
