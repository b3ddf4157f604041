//! Error types for loading, validation and playback control.
//!
//! Load errors are `Clone` because one failed fetch/decode is handed to every
//! caller waiting on the same cache key.

use thiserror::Error;

/// Part bytes could not be fetched.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("fetch failed for {locator}: {reason}")]
pub struct FetchError {
    pub locator: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}

/// Part bytes were fetched but are not decodable audio.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unsupported or malformed audio: {0}")]
    Format(String),

    #[error("no audio track in stream")]
    NoTrack,

    #[error("decoded stream is empty")]
    Empty,
}

/// Part cache failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("decode failed for {locator}: {source}")]
    Decode {
        locator: String,
        #[source]
        source: DecodeError,
    },

    #[error("load aborted for {locator}")]
    Aborted { locator: String },
}

/// Track descriptor violates an invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("track id is empty")]
    EmptyId,

    #[error("invalid track duration: {0}")]
    InvalidDuration(f64),

    #[error("invalid loop bounds {start}..{end} for duration {duration}")]
    InvalidLoop { start: f64, end: f64, duration: f64 },

    #[error("invalid part {index}: {reason}")]
    InvalidPart { index: usize, reason: String },

    #[error("invalid track JSON: {0}")]
    Parse(String),
}

/// Engine configuration rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("tick interval must be within 1..=10000 ms, got {0}")]
    TickInterval(u64),

    #[error("invalid config JSON: {0}")]
    Parse(String),
}

/// Hardware output could not be opened.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device")]
    NoDevice,

    #[error("output device error: {0}")]
    Device(String),
}

/// Playback controller errors.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no track loaded")]
    NoTrack,

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_message_names_locator() {
        let err = LoadError::from(FetchError::new("parts/a.ogg", "404"));
        assert_eq!(err.to_string(), "fetch failed for parts/a.ogg: 404");
    }

    #[test]
    fn decode_error_message_names_locator() {
        let err = LoadError::Decode {
            locator: "b.ogg".into(),
            source: DecodeError::NoTrack,
        };
        assert_eq!(err.to_string(), "decode failed for b.ogg: no audio track in stream");
    }
}
