/// Core sequencer logic - the beat x pitch grid and the surfaces that read
/// and edit it. Playback, scales and generation live in the submodules.
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

pub mod generator;
pub mod playback;
pub mod scale;
pub mod session;

/// Number of keys on the piano range covered by the grid.
pub const NUM_PITCHES: usize = 88;
/// Upper bound for the beat dimension.
pub const MAX_BEATS: usize = 128;
/// MIDI note number of pitch offset 0 (A0).
pub const LOWEST_NOTE_NUMBER: u8 = 21;
/// Pitch class of pitch offset 0 (9 == A).
pub const PITCH_CLASS_OF_LOWEST_PITCH: usize = 9;

/// Sounding note number for a pitch offset.
pub fn note_number(pitch: usize) -> u8 {
    (pitch + LOWEST_NOTE_NUMBER as usize).min(127) as u8
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    // cells[beat][pitch]
    cells: Vec<Vec<bool>>,
    num_beats: usize,
    num_pitches: usize,
}

impl Grid {
    pub fn new(num_beats: usize) -> Self {
        let num_beats = num_beats.min(MAX_BEATS);
        Self {
            cells: vec![vec![false; NUM_PITCHES]; num_beats],
            num_beats,
            num_pitches: NUM_PITCHES,
        }
    }

    pub fn num_beats(&self) -> usize {
        self.num_beats
    }

    pub fn num_pitches(&self) -> usize {
        self.num_pitches
    }

    /// Out-of-range coordinates read as inactive.
    pub fn is_active(&self, beat: usize, pitch: usize) -> bool {
        self.cells
            .get(beat)
            .and_then(|column| column.get(pitch))
            .copied()
            .unwrap_or(false)
    }

    pub fn check_bounds(&self, beat: usize, pitch: usize) -> Result<()> {
        if beat < self.num_beats && pitch < self.num_pitches {
            Ok(())
        } else {
            Err(Error::OutOfRange {
                beat,
                pitch,
                num_beats: self.num_beats,
                num_pitches: self.num_pitches,
            })
        }
    }

    /// Sets a cell and returns its previous value.
    pub fn set_cell(&mut self, beat: usize, pitch: usize, active: bool) -> Result<bool> {
        self.check_bounds(beat, pitch)?;
        Ok(std::mem::replace(&mut self.cells[beat][pitch], active))
    }

    pub fn toggle(&mut self, beat: usize, pitch: usize) -> Result<bool> {
        let current = self.is_active(beat, pitch);
        self.set_cell(beat, pitch, !current)?;
        Ok(!current)
    }

    /// Clamps to `[0, MAX_BEATS]`. Retained beats keep their content, new
    /// beats start empty.
    pub fn resize(&mut self, num_beats: usize) {
        let num_beats = num_beats.min(MAX_BEATS);
        self.cells.resize_with(num_beats, || vec![false; NUM_PITCHES]);
        self.num_beats = num_beats;
    }

    pub fn clear(&mut self) {
        for column in &mut self.cells {
            column.fill(false);
        }
    }

    /// Pitch offsets active at `beat`, lowest first.
    pub fn active_pitches(&self, beat: usize) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .get(beat)
            .into_iter()
            .flat_map(|column| column.iter().enumerate())
            .filter_map(|(pitch, &active)| active.then_some(pitch))
    }

    /// Every active `(beat, pitch)`, beat-major.
    pub fn active_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.num_beats).flat_map(move |beat| self.active_pitches(beat).map(move |p| (beat, p)))
    }

    pub fn active_count(&self) -> usize {
        self.cells.iter().flatten().filter(|&&active| active).count()
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new(MAX_BEATS)
    }
}

/// Read-only view handed to a rendering collaborator.
pub trait GridView {
    fn is_active(&self, beat: usize, pitch: usize) -> bool;
    fn num_beats(&self) -> usize;
    fn num_pitches(&self) -> usize;
    fn current_beat(&self) -> usize;
}

/// The mutation surface handed to an editing collaborator.
pub trait EditPort {
    fn set_cell(&self, beat: usize, pitch: usize, active: bool) -> Result<bool>;
    fn clear(&self);
    fn resize(&self, num_beats: usize);
}

/// Grid shared between the edit context and the playback thread.
///
/// Edits take the write lock for one cell at a time; the tick loop holds
/// the read lock for the whole of one tick.
#[derive(Debug, Clone, Default)]
pub struct SharedGrid(Arc<RwLock<Grid>>);

impl SharedGrid {
    pub fn new(grid: Grid) -> Self {
        Self(Arc::new(RwLock::new(grid)))
    }

    // A panic while holding the lock cannot leave a Grid half-written in a
    // way that matters here, so poisoning is ignored.
    pub fn read(&self) -> RwLockReadGuard<'_, Grid> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Grid> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self, beat: usize, pitch: usize) -> bool {
        self.read().is_active(beat, pitch)
    }

    pub fn num_beats(&self) -> usize {
        self.read().num_beats()
    }

    pub fn snapshot(&self) -> Grid {
        self.read().clone()
    }
}

impl EditPort for SharedGrid {
    fn set_cell(&self, beat: usize, pitch: usize, active: bool) -> Result<bool> {
        self.write().set_cell(beat, pitch, active)
    }

    fn clear(&self) {
        self.write().clear();
    }

    fn resize(&self, num_beats: usize) {
        self.write().resize(num_beats);
    }
}
