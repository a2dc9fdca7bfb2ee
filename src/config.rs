//! Configuration loaded from `config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sequencer::scale::ScaleKind;
use crate::sequencer::MAX_BEATS;
use crate::tempo::{TempoMode, MAX_BPM, MIN_BPM};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bpm: u32,
    pub velocity: u8,
    pub num_beats: usize,
    pub scale: ScaleKind,
    pub notes_file: PathBuf,
    pub use_sound: bool,
    pub midi_port: Option<usize>,
    pub tempo_mode: TempoMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bpm: 400,
            velocity: 100,
            num_beats: MAX_BEATS,
            scale: ScaleKind::None,
            notes_file: PathBuf::from("notes.txt"),
            use_sound: true,
            midi_port: None,
            tempo_mode: TempoMode::FreeRunning,
        }
    }
}

impl Config {
    /// `<config dir>/pianoseq/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pianoseq").join("config.toml"))
    }

    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!(target: "config", "{} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Clamps values into their usable ranges.
    pub fn validate(mut self) -> Result<Self> {
        self.num_beats = self.num_beats.min(MAX_BEATS);
        self.bpm = self.bpm.clamp(MIN_BPM, MAX_BPM);
        self.velocity = self.velocity.min(127);
        if self.notes_file.as_os_str().is_empty() {
            return Err(Error::Config("notes_file must not be empty".to_string()));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bpm, 400);
        assert_eq!(config.num_beats, 128);
        assert_eq!(config.notes_file, PathBuf::from("notes.txt"));
        assert!(config.use_sound);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml("bpm = 120\nscale = \"pentatonic\"\ntempo_mode = \"externally-cued\"\n").unwrap();
        assert_eq!(config.bpm, 120);
        assert_eq!(config.scale, ScaleKind::Pentatonic);
        assert_eq!(config.tempo_mode, TempoMode::ExternallyCued);
        assert_eq!(config.velocity, 100);
    }

    #[test]
    fn test_values_are_clamped() {
        let config = Config::from_toml("bpm = 0\nnum_beats = 4000\nvelocity = 200\n").unwrap();
        assert_eq!(config.bpm, MIN_BPM);
        assert_eq!(config.num_beats, MAX_BEATS);
        assert_eq!(config.velocity, 127);
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            Config::from_toml("bpm = \"fast\""),
            Err(Error::TomlParse(_))
        ));
        assert!(matches!(
            Config::from_toml("notes_file = \"\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config {
            midi_port: Some(2),
            scale: ScaleKind::Major,
            ..Config::default()
        };
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
