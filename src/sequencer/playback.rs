/// Playback engine - owns the beat cursor and the tick thread, and turns
/// grid contents into note events.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::{note_number, Grid, SharedGrid};
use crate::error::{Error, Result};
use crate::tempo::TempoSource;

/// Events dropped past this many unpolled entries.
const EVENT_QUEUE_CAPACITY: usize = 4096;

/// Sound backend the engine plays through. Called synchronously from the
/// tick thread; errors are logged and otherwise ignored.
pub trait NoteSink: Send {
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<()>;
    fn note_off(&mut self, note: u8) -> Result<()>;
}

/// Sound disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NoteSink for NullSink {
    fn note_on(&mut self, _note: u8, _velocity: u8) -> Result<()> {
        Ok(())
    }

    fn note_off(&mut self, _note: u8) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    BeatAdvanced(usize),
    NoteOn(u8, u8), // note, velocity
    NoteOff(u8),    // note
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Stopped,
    Running,
    Suspended,
}

/// Cursor plus the notes turned on by the last tick.
#[derive(Debug, Default, Clone)]
pub struct PlaybackState {
    current_beat: usize,
    sounding: Vec<u8>,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_beat(&self) -> usize {
        self.current_beat
    }

    pub fn sounding(&self) -> &[u8] {
        &self.sounding
    }

    /// One tick: note-off for the beat being left, advance the cursor,
    /// note-on for the beat being entered. All note-offs precede all
    /// note-ons.
    ///
    /// Notes still sounding from the previous tick are released even if
    /// their cells were erased or truncated in the meantime. A cursor past
    /// the end of a shrunken grid wraps to 0. With no beats at all nothing
    /// happens and `false` is returned.
    pub fn tick(&mut self, grid: &Grid, sink: &mut dyn NoteSink, velocity: u8) -> bool {
        let num_beats = grid.num_beats();
        if num_beats == 0 {
            return false;
        }

        let mut releases: Vec<u8> = grid.active_pitches(self.current_beat).map(note_number).collect();
        for note in self.sounding.drain(..) {
            if !releases.contains(&note) {
                releases.push(note);
            }
        }
        for note in releases {
            if let Err(e) = sink.note_off(note) {
                log::debug!(target: "playback", "note off {} failed: {}", note, e);
            }
        }

        self.current_beat = if self.current_beat + 1 >= num_beats {
            0
        } else {
            self.current_beat + 1
        };

        for note in grid.active_pitches(self.current_beat).map(note_number) {
            if let Err(e) = sink.note_on(note, velocity) {
                log::debug!(target: "playback", "note on {} failed: {}", note, e);
            }
            self.sounding.push(note);
        }
        true
    }

    /// Note-off for everything the last tick turned on.
    pub fn release_all(&mut self, sink: &mut dyn NoteSink) {
        for note in self.sounding.drain(..) {
            if let Err(e) = sink.note_off(note) {
                log::debug!(target: "playback", "note off {} failed: {}", note, e);
            }
        }
    }
}

/// Forwards to the backend and mirrors every call onto the event queue.
struct Publisher<'a> {
    sink: &'a mut dyn NoteSink,
    events: &'a SyncSender<PlaybackEvent>,
}

impl Publisher<'_> {
    fn publish(&self, event: PlaybackEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            log::trace!(target: "playback", "event queue full, dropping {:?}", event);
        }
    }
}

impl NoteSink for Publisher<'_> {
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<()> {
        self.publish(PlaybackEvent::NoteOn(note, velocity));
        self.sink.note_on(note, velocity)
    }

    fn note_off(&mut self, note: u8) -> Result<()> {
        self.publish(PlaybackEvent::NoteOff(note));
        self.sink.note_off(note)
    }
}

struct EngineState {
    phase: PlaybackPhase,
    playback: PlaybackState,
}

struct Shared {
    state: Mutex<EngineState>,
    wake: Condvar,
    current_beat: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type SharedSink = Arc<Mutex<Box<dyn NoteSink>>>;

/// Runs the tick loop on a dedicated thread.
///
/// Transport calls may come from any thread. `stop` waits for the tick
/// thread to exit before returning.
pub struct PlaybackEngine {
    shared: Arc<Shared>,
    grid: SharedGrid,
    tempo: TempoSource,
    sink: SharedSink,
    velocity: u8,
    sender: SyncSender<PlaybackEvent>,
    receiver: Receiver<PlaybackEvent>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn new(grid: SharedGrid, tempo: TempoSource, sink: Box<dyn NoteSink>) -> Self {
        let (sender, receiver) = sync_channel(EVENT_QUEUE_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState {
                    phase: PlaybackPhase::Stopped,
                    playback: PlaybackState::new(),
                }),
                wake: Condvar::new(),
                current_beat: AtomicUsize::new(0),
            }),
            grid,
            tempo,
            sink: Arc::new(Mutex::new(sink)),
            velocity: 100,
            sender,
            receiver,
            worker: None,
        }
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.set_velocity(velocity);
        self
    }

    /// Read when playback starts.
    pub fn set_velocity(&mut self, velocity: u8) {
        self.velocity = velocity.min(127);
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.shared.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == PlaybackPhase::Running
    }

    /// Last published cursor position. Lock-free, may lag a tick in flight.
    pub fn current_beat(&self) -> usize {
        self.shared.current_beat.load(Ordering::Acquire)
    }

    pub fn tempo(&self) -> &TempoSource {
        &self.tempo
    }

    /// Swaps the backend; takes effect from the next tick.
    pub fn replace_sink(&self, sink: Box<dyn NoteSink>) -> Box<dyn NoteSink> {
        let mut current = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, sink)
    }

    /// Runs `f` against the backend outside of the tick loop.
    pub fn with_sink<T>(&self, f: impl FnOnce(&mut dyn NoteSink) -> T) -> T {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **sink)
    }

    pub fn start(&mut self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if state.phase != PlaybackPhase::Stopped {
                return Err(Error::InvalidState {
                    action: "start",
                    phase: state.phase,
                });
            }
            state.phase = PlaybackPhase::Running;
            state.playback = PlaybackState::new();
            self.shared.current_beat.store(0, Ordering::Release);
        }

        let shared = Arc::clone(&self.shared);
        let grid = self.grid.clone();
        let tempo = self.tempo.clone();
        let sink = Arc::clone(&self.sink);
        let events = self.sender.clone();
        let velocity = self.velocity;

        self.worker = Some(thread::spawn(move || {
            run_tick_loop(&shared, &grid, &tempo, &sink, &events, velocity);
        }));
        log::info!(target: "playback", "playback started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if state.phase == PlaybackPhase::Stopped {
                return Err(Error::InvalidState {
                    action: "stop",
                    phase: state.phase,
                });
            }
            state.phase = PlaybackPhase::Stopped;
        }
        self.shared.wake.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!(target: "playback", "tick thread panicked");
            }
        }
        log::info!(target: "playback", "playback stopped");
        Ok(())
    }

    /// Observed by the tick loop at its next sleep point; a tick in
    /// progress is never interrupted.
    pub fn suspend(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.phase != PlaybackPhase::Running {
            return Err(Error::InvalidState {
                action: "suspend",
                phase: state.phase,
            });
        }
        state.phase = PlaybackPhase::Suspended;
        log::debug!(target: "playback", "playback suspended at beat {}", state.playback.current_beat);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.phase != PlaybackPhase::Suspended {
            return Err(Error::InvalidState {
                action: "resume",
                phase: state.phase,
            });
        }
        state.phase = PlaybackPhase::Running;
        drop(state);
        self.shared.wake.notify_all();
        log::debug!(target: "playback", "playback resumed");
        Ok(())
    }

    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if self.phase() != PlaybackPhase::Stopped {
            let _ = self.stop();
        }
    }
}

fn run_tick_loop(
    shared: &Shared,
    grid: &SharedGrid,
    tempo: &TempoSource,
    sink: &SharedSink,
    events: &SyncSender<PlaybackEvent>,
    velocity: u8,
) {
    let mut state = shared.lock();
    loop {
        while state.phase == PlaybackPhase::Suspended {
            state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        let mut backend = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let mut publisher = Publisher {
            sink: &mut **backend,
            events,
        };

        if state.phase == PlaybackPhase::Stopped {
            state.playback.release_all(&mut publisher);
            break;
        }

        let advanced = {
            let grid = grid.read();
            state.playback.tick(&grid, &mut publisher, velocity)
        };
        drop(backend);

        if advanced {
            let beat = state.playback.current_beat;
            shared.current_beat.store(beat, Ordering::Release);
            let _ = events.try_send(PlaybackEvent::BeatAdvanced(beat));
        }

        // the interval is read once here, so a tempo change lands on the
        // next sleep rather than this one
        let deadline = Instant::now() + tempo.next_interval();
        while state.phase != PlaybackPhase::Stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = shared
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
