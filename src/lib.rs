/// pianoseq - a piano-roll note sequencer engine
///
/// This library provides the core pieces of a grid sequencer:
/// - An 88-key beat x pitch grid with edit and view surfaces
/// - A threaded playback engine with suspend/resume
/// - A tempo source that can follow an external metronome loop
/// - Scale filtering and random pattern generation
/// - MIDI and audio outputs

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod persistence;
pub mod sequencer;
pub mod tempo;

// Re-export commonly used types
pub use audio::{AudioOutput, AudioSink};
pub use config::Config;
pub use error::{Error, Result};
pub use midi::MidiOutputDevice;
pub use sequencer::generator::generate;
pub use sequencer::playback::{NoteSink, NullSink, PlaybackEngine, PlaybackEvent, PlaybackPhase};
pub use sequencer::scale::{is_on_scale, note_name, ScaleKind};
pub use sequencer::session::Session;
pub use sequencer::{EditPort, Grid, GridView, SharedGrid};
pub use tempo::{ClickSink, Metronome, TempoMode, TempoSource};
