/// Session - one grid, one playback engine, one metronome, and the editing
/// rules (scale constraint, generate) layered over them.
use std::path::Path;

use rand::Rng;

use super::generator::generate;
use super::playback::{NoteSink, PlaybackEngine, PlaybackEvent, PlaybackPhase};
use super::scale::{is_on_scale, ScaleKind};
use super::{note_number, EditPort, Grid, GridView, SharedGrid};
use crate::config::Config;
use crate::error::Result;
use crate::persistence;
use crate::tempo::{ClickSink, Metronome, TempoMode, TempoSource, MAX_BPM, MIN_BPM};

pub struct Session {
    grid: SharedGrid,
    engine: PlaybackEngine,
    tempo: TempoSource,
    metronome: Metronome,
    scale: ScaleKind,
}

impl Session {
    pub fn new(
        num_beats: usize,
        tempo: TempoSource,
        sink: Box<dyn NoteSink>,
        click: Box<dyn ClickSink>,
    ) -> Self {
        let grid = SharedGrid::new(Grid::new(num_beats));
        let engine = PlaybackEngine::new(grid.clone(), tempo.clone(), sink);

        let metronome = Metronome::new(click);
        metronome.set_bpm(tempo.bpm());
        let cue = tempo.clone();
        metronome.on_loop(move || cue.on_loop_signal());

        Self {
            grid,
            engine,
            tempo,
            metronome,
            scale: ScaleKind::None,
        }
    }

    pub fn from_config(config: &Config, sink: Box<dyn NoteSink>, click: Box<dyn ClickSink>) -> Self {
        let tempo = TempoSource::from_bpm(config.bpm);
        tempo.set_mode(config.tempo_mode);

        let mut session = Self::new(config.num_beats, tempo, sink, click);
        session.engine.set_velocity(config.velocity);
        session.scale = config.scale;
        session
    }

    pub fn grid(&self) -> &SharedGrid {
        &self.grid
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn tempo(&self) -> &TempoSource {
        &self.tempo
    }

    pub fn scale(&self) -> ScaleKind {
        self.scale
    }

    pub fn set_scale(&mut self, scale: ScaleKind) {
        self.scale = scale;
    }

    /// Activates a cell unless the active scale rules the pitch out.
    /// Returns whether the cell is active afterwards.
    pub fn draw(&self, beat: usize, pitch: usize) -> Result<bool> {
        if !is_on_scale(pitch, self.scale) {
            let grid = self.grid.read();
            grid.check_bounds(beat, pitch)?;
            return Ok(grid.is_active(beat, pitch));
        }
        self.grid.set_cell(beat, pitch, true)?;
        Ok(true)
    }

    /// Returns the previous value of the cell.
    pub fn erase(&self, beat: usize, pitch: usize) -> Result<bool> {
        self.grid.set_cell(beat, pitch, false)
    }

    /// Replaces the grid with a random pattern on the active scale. Does
    /// nothing without a scale.
    pub fn generate(&self) -> usize {
        self.generate_with(&mut rand::rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        if self.scale == ScaleKind::None {
            return 0;
        }
        let mut grid = self.grid.write();
        grid.clear();
        generate(&mut grid, self.scale, rng)
    }

    /// Starts from stopped, resumes from suspended, no-op while running.
    pub fn play(&mut self) -> Result<()> {
        match self.engine.phase() {
            PlaybackPhase::Stopped => self.engine.start(),
            PlaybackPhase::Suspended => self.engine.resume(),
            PlaybackPhase::Running => Ok(()),
        }
    }

    pub fn pause(&self) -> Result<()> {
        self.engine.suspend()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.engine.stop()
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.engine.phase()
    }

    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        self.engine.poll_events()
    }

    pub fn set_bpm(&self, bpm: u32) {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.tempo.set_bpm(bpm);
        self.metronome.set_bpm(bpm);
    }

    /// Tempo expressed as milliseconds per beat; zero is ignored.
    pub fn set_interval_ms(&self, interval_ms: u64) {
        self.tempo.set_interval_ms(interval_ms);
        self.metronome.set_bpm(self.tempo.bpm());
    }

    pub fn set_tempo_mode(&self, mode: TempoMode) {
        self.tempo.set_mode(mode);
    }

    pub fn start_metronome(&mut self) {
        let bpm = self.metronome.bpm();
        self.metronome.start(bpm);
    }

    pub fn stop_metronome(&mut self) {
        self.metronome.stop();
    }

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    /// Sounds a single pitch outside of playback, e.g. on mouse rollover.
    pub fn preview_note(&self, pitch: usize) -> Result<()> {
        let velocity = self.engine.velocity();
        self.engine.with_sink(|sink| sink.note_on(note_number(pitch), velocity))
    }

    pub fn release_preview(&self, pitch: usize) -> Result<()> {
        self.engine.with_sink(|sink| sink.note_off(note_number(pitch)))
    }

    pub fn save_notes(&self, path: impl AsRef<Path>) -> Result<usize> {
        persistence::save_notes(&self.grid.read(), path)
    }

    pub fn load_notes(&self, path: impl AsRef<Path>) -> Result<usize> {
        persistence::load_notes(&mut self.grid.write(), path)
    }
}

impl GridView for Session {
    fn is_active(&self, beat: usize, pitch: usize) -> bool {
        self.grid.is_active(beat, pitch)
    }

    fn num_beats(&self) -> usize {
        self.grid.num_beats()
    }

    fn num_pitches(&self) -> usize {
        self.grid.read().num_pitches()
    }

    fn current_beat(&self) -> usize {
        self.engine.current_beat()
    }
}

impl EditPort for Session {
    fn set_cell(&self, beat: usize, pitch: usize, active: bool) -> Result<bool> {
        self.grid.set_cell(beat, pitch, active)
    }

    fn clear(&self) {
        self.grid.clear();
    }

    fn resize(&self, num_beats: usize) {
        self.grid.resize(num_beats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::sequencer::playback::NullSink;
    use crate::sequencer::NUM_PITCHES;
    use crate::tempo::metronome::NoClick;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn session(num_beats: usize) -> Session {
        Session::new(
            num_beats,
            TempoSource::from_interval_ms(5_000),
            Box::new(NullSink),
            Box::new(NoClick),
        )
    }

    #[test]
    fn test_draw_without_scale() {
        let s = session(8);
        assert!(s.draw(0, 4).unwrap());
        assert!(s.is_active(0, 4));
    }

    #[test]
    fn test_draw_respects_scale() {
        let mut s = session(8);
        s.set_scale(ScaleKind::Major);
        // offset 4 is C#
        assert!(!s.draw(0, 4).unwrap());
        assert!(!s.is_active(0, 4));
        // offset 3 is C
        assert!(s.draw(0, 3).unwrap());

        s.set_scale(ScaleKind::Pentatonic);
        // offset 8 is F
        assert!(!s.draw(1, 8).unwrap());
    }

    #[test]
    fn test_draw_out_of_range() {
        let s = session(8);
        assert!(s.draw(8, 0).is_err());
        assert!(s.draw(0, NUM_PITCHES).is_err());
    }

    #[test]
    fn test_draw_off_scale_out_of_range() {
        let mut s = session(8);
        s.set_scale(ScaleKind::Major);
        assert!(matches!(
            s.draw(8, 4),
            Err(Error::OutOfRange { beat: 8, pitch: 4, .. })
        ));
        assert!(s.draw(0, NUM_PITCHES + 1).is_err());
        assert!(!s.draw(7, 4).unwrap());
    }

    #[test]
    fn test_erase() {
        let s = session(8);
        s.draw(2, 40).unwrap();
        assert!(s.erase(2, 40).unwrap());
        assert!(!s.erase(2, 40).unwrap());
    }

    #[test]
    fn test_generate_clears_first() {
        let mut s = session(32);
        s.set_scale(ScaleKind::Pentatonic);
        s.set_cell(0, 0, true).unwrap();
        s.set_cell(0, 1, true).unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let placed = s.generate_with(&mut rng);
        let grid = s.grid().snapshot();
        assert_eq!(grid.active_count(), placed);
        assert!(!grid.is_active(0, 1));
    }

    #[test]
    fn test_generate_needs_scale() {
        let s = session(8);
        s.set_cell(0, 0, true).unwrap();
        assert_eq!(s.generate(), 0);
        assert!(s.is_active(0, 0));
    }

    #[test]
    fn test_play_pause_stop() {
        let mut s = session(8);
        assert_eq!(s.phase(), PlaybackPhase::Stopped);
        s.play().unwrap();
        s.play().unwrap();
        assert_eq!(s.phase(), PlaybackPhase::Running);
        s.pause().unwrap();
        assert_eq!(s.phase(), PlaybackPhase::Suspended);
        s.play().unwrap();
        assert_eq!(s.phase(), PlaybackPhase::Running);
        s.stop().unwrap();
        assert_eq!(s.phase(), PlaybackPhase::Stopped);
        assert!(s.pause().is_err());
    }

    #[test]
    fn test_grid_view_reports_cursor() {
        let mut s = session(8);
        assert_eq!(s.num_pitches(), NUM_PITCHES);
        s.play().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while s.current_beat() != 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(s.current_beat(), 1);
        s.stop().unwrap();
    }

    #[test]
    fn test_tempo_changes_reach_metronome() {
        let s = session(8);
        s.set_interval_ms(250);
        assert_eq!(s.tempo().bpm(), 240);
        assert_eq!(s.metronome().bpm(), 240);
        s.set_interval_ms(0);
        assert_eq!(s.tempo().interval_ms(), 250);
        s.set_bpm(120);
        assert_eq!(s.metronome().bpm(), 120);
    }

    #[test]
    fn test_metronome_keeps_requested_bpm() {
        let s = session(8);
        s.set_bpm(999);
        assert_eq!(s.metronome().bpm(), 999);
        s.set_bpm(170);
        assert_eq!(s.metronome().bpm(), 170);
        s.set_bpm(5_000);
        assert_eq!(s.metronome().bpm(), MAX_BPM);
        s.set_bpm(0);
        assert_eq!(s.metronome().bpm(), MIN_BPM);
    }

    #[derive(Clone, Default)]
    struct CountingClick {
        clicks: Arc<AtomicUsize>,
    }

    impl ClickSink for CountingClick {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn click(&mut self) -> Result<()> {
            self.clicks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_metronome_loop_cues_tempo() {
        let click = CountingClick::default();
        let mut s = Session::new(
            16,
            TempoSource::from_interval_ms(5_000),
            Box::new(NullSink),
            Box::new(click.clone()),
        );
        s.set_tempo_mode(TempoMode::ExternallyCued);
        s.set_bpm(1000);
        assert!(s.tempo().last_loop_signal().is_none());

        s.start_metronome();
        assert!(s.metronome().is_active());
        assert!(wait_for(|| s.metronome().loop_count() >= 2));
        assert!(s.tempo().last_loop_signal().is_some());
        assert!(click.clicks.load(Ordering::SeqCst) >= 2);

        // cued playback still advances once the loop has been heard
        s.play().unwrap();
        assert!(wait_for(|| s.current_beat() >= 3));
        s.stop().unwrap();
        s.stop_metronome();
    }

    #[test]
    fn test_metronome_without_device_stays_off() {
        let mut s = session(8);
        s.start_metronome();
        assert!(!s.metronome().is_active());
        s.stop_metronome();
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            num_beats: 16,
            velocity: 80,
            scale: ScaleKind::Major,
            bpm: 120,
            ..Config::default()
        };
        let s = Session::from_config(&config, Box::new(NullSink), Box::new(NoClick));
        assert_eq!(s.num_beats(), 16);
        assert_eq!(s.scale(), ScaleKind::Major);
        assert_eq!(s.engine().velocity(), 80);
        assert_eq!(s.tempo().interval_ms(), 500);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");

        let s = session(16);
        s.set_cell(0, 40, true).unwrap();
        s.set_cell(15, 87, true).unwrap();
        s.set_cell(7, 0, true).unwrap();
        let before = s.grid().snapshot();
        assert_eq!(s.save_notes(&path).unwrap(), 3);

        let loaded = session(16);
        loaded.set_cell(3, 3, true).unwrap();
        assert_eq!(loaded.load_notes(&path).unwrap(), 3);
        assert_eq!(loaded.grid().snapshot(), before);
    }
}
