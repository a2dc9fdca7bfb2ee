/// Scale filtering and pitch naming for the piano range.
use serde::{Deserialize, Serialize};

use super::{note_number, PITCH_CLASS_OF_LOWEST_PITCH};

pub const MAJOR_PITCH_CLASSES: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
pub const PENTATONIC_PITCH_CLASSES: [u8; 5] = [0, 2, 4, 7, 9];

const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleKind {
    #[default]
    None,
    Major,
    Pentatonic,
}

impl ScaleKind {
    pub const ALL: [ScaleKind; 3] = [ScaleKind::None, ScaleKind::Major, ScaleKind::Pentatonic];

    pub fn name(&self) -> &'static str {
        match self {
            ScaleKind::None => "None",
            ScaleKind::Major => "Major",
            ScaleKind::Pentatonic => "Major Pentatonic",
        }
    }

    /// Pitch classes (C == 0) belonging to the scale; empty for `None`.
    pub fn pitch_classes(&self) -> &'static [u8] {
        match self {
            ScaleKind::None => &[],
            ScaleKind::Major => &MAJOR_PITCH_CLASSES,
            ScaleKind::Pentatonic => &PENTATONIC_PITCH_CLASSES,
        }
    }
}

/// Whether the pitch offset's note falls on the scale. `None` places no
/// constraint and accepts every pitch.
pub fn is_on_scale(pitch: usize, kind: ScaleKind) -> bool {
    if kind == ScaleKind::None {
        return true;
    }
    let class = (note_number(pitch) % 12) as u8;
    kind.pitch_classes().contains(&class)
}

/// Pitch class of a pitch offset, C == 0.
pub fn pitch_class(pitch: usize) -> usize {
    (pitch + PITCH_CLASS_OF_LOWEST_PITCH) % 12
}

/// Scientific pitch name for a note number, e.g. 60 -> "C4".
pub fn note_name(note: u8) -> String {
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", PITCH_CLASS_NAMES[(note % 12) as usize], octave)
}
