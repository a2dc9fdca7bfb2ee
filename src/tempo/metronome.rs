/// Metronome - loops a one-beat click sequence on its own thread and
/// resynchronizes itself every time the sequence reaches its end.
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::interval_ms_for_bpm;
use crate::error::Result;

/// Length of the click sequence in beats. The click sits at position 0.
pub const SEQUENCE_LENGTH_BEATS: u32 = 1;

/// Percussion voice the click is played on.
pub const CLICK_CHANNEL: u8 = 9;
pub const CLICK_NOTE: u8 = 37;
pub const CLICK_VELOCITY: u8 = 100;

/// Device the metronome clicks through.
pub trait ClickSink: Send {
    /// Fails with `DeviceUnavailable` when there is nothing to click on.
    fn open(&mut self) -> Result<()>;
    fn click(&mut self) -> Result<()>;
}

type LoopListener = Arc<dyn Fn() + Send + Sync>;

/// Messages from the handle to the click loop.
enum Control {
    Stop,
    /// The sequence was rewound from outside; click and start a fresh wait.
    Restart,
}

struct MetronomeInner {
    bpm: AtomicU32,
    active: AtomicBool,
    position: AtomicU32,
    loops: AtomicU64,
    listeners: Mutex<Vec<LoopListener>>,
}

impl MetronomeInner {
    fn interval(&self) -> Duration {
        Duration::from_millis(interval_ms_for_bpm(self.bpm.load(Ordering::Acquire)))
    }

    fn add_listener(&self, listener: LoopListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn on_loop_signal(&self) -> Duration {
        self.position.store(0, Ordering::Release);
        self.loops.fetch_add(1, Ordering::AcqRel);
        // listeners run unlocked so they may register further listeners
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener();
        }
        self.interval()
    }
}

pub struct Metronome {
    inner: Arc<MetronomeInner>,
    device: Arc<Mutex<Box<dyn ClickSink>>>,
    control: Option<Sender<Control>>,
    worker: Option<JoinHandle<()>>,
}

impl Metronome {
    pub fn new(device: Box<dyn ClickSink>) -> Self {
        Self {
            inner: Arc::new(MetronomeInner {
                bpm: AtomicU32::new(super::bpm_for_interval_ms(super::DEFAULT_INTERVAL_MS)),
                active: AtomicBool::new(false),
                position: AtomicU32::new(0),
                loops: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
            }),
            device: Arc::new(Mutex::new(device)),
            control: None,
            worker: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn bpm(&self) -> u32 {
        self.inner.bpm.load(Ordering::Acquire)
    }

    /// Stored only; the running sequence picks it up at its next loop.
    pub fn set_bpm(&self, bpm: u32) {
        self.inner.bpm.store(bpm, Ordering::Release);
    }

    /// Number of times the sequence has looped since creation.
    pub fn loop_count(&self) -> u64 {
        self.inner.loops.load(Ordering::Acquire)
    }

    /// Registers a callback run on the metronome thread at every loop.
    /// Listeners must only touch their own state.
    pub fn on_loop<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.add_listener(Arc::new(listener));
    }

    /// Updates the bpm, then starts the click loop unless it is already
    /// running. An unavailable device is logged and leaves the metronome
    /// inactive.
    pub fn start(&mut self, bpm: u32) {
        self.set_bpm(bpm);
        if self.is_active() {
            return;
        }

        let opened = self
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open();
        if let Err(e) = opened {
            log::error!(target: "metronome", "cannot start metronome: {}", e);
            return;
        }

        self.inner.active.store(true, Ordering::Release);
        self.inner.position.store(0, Ordering::Release);

        let (control_tx, control_rx) = channel();
        let inner = Arc::clone(&self.inner);
        let device = Arc::clone(&self.device);

        self.worker = Some(thread::spawn(move || {
            let mut interval = inner.interval();
            loop {
                if inner.position.load(Ordering::Acquire) == 0 {
                    let result = device.lock().unwrap_or_else(PoisonError::into_inner).click();
                    if let Err(e) = result {
                        log::debug!(target: "metronome", "click failed: {}", e);
                    }
                }

                match control_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let position = inner.position.fetch_add(1, Ordering::AcqRel) + 1;
                        if position >= SEQUENCE_LENGTH_BEATS {
                            interval = inner.on_loop_signal();
                        }
                    }
                    Ok(Control::Restart) => interval = inner.interval(),
                    Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }));
        self.control = Some(control_tx);
        log::info!(target: "metronome", "metronome started at {} bpm", bpm);
    }

    /// End-of-sequence handling for an external clock: rewinds to position
    /// 0, notifies loop listeners, and restarts the click loop at the
    /// current bpm. The wait cut short does not count as a loop. No-op
    /// while inactive.
    pub fn on_loop_signal(&self) {
        if !self.is_active() {
            return;
        }
        self.inner.on_loop_signal();
        if let Some(control) = &self.control {
            let _ = control.send(Control::Restart);
        }
    }

    /// Stops the click loop and waits for its thread to exit.
    pub fn stop(&mut self) {
        self.inner.active.store(false, Ordering::Release);
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Stop);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!(target: "metronome", "metronome thread panicked");
            }
            log::info!(target: "metronome", "metronome stopped");
        }
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Click sink with no device behind it; never opens.
#[derive(Debug, Default)]
pub struct NoClick;

impl ClickSink for NoClick {
    fn open(&mut self) -> Result<()> {
        Err(crate::error::Error::DeviceUnavailable(
            "no click device configured".to_string(),
        ))
    }

    fn click(&mut self) -> Result<()> {
        Ok(())
    }
}
