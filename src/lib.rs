pub mod adpcm;
pub mod audio_source;
pub mod config;
pub mod error;
pub mod streamer;

pub use error::{Result, TalkError};
