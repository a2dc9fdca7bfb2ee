//! Error types for the sequencing engine

use thiserror::Error;

use crate::sequencer::playback::PlaybackPhase;

/// Result type alias for pianoseq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pianoseq.
///
/// None of these are fatal: callers recover locally and the playback
/// cursor keeps advancing regardless of what the sound backend does.
#[derive(Debug, Error)]
pub enum Error {
    /// Coordinate outside the current grid bounds
    #[error("cell ({beat}, {pitch}) is outside the {num_beats}x{num_pitches} grid")]
    OutOfRange {
        beat: usize,
        pitch: usize,
        num_beats: usize,
        num_pitches: usize,
    },

    /// Sound backend missing or failed to open
    #[error("sound device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transport call not valid from the current phase
    #[error("cannot {action} while {phase:?}")]
    InvalidState {
        action: &'static str,
        phase: PlaybackPhase,
    },

    /// Malformed line in a notes file
    #[error("notes file line {line}: {message}")]
    NotesFormat { line: usize, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}
