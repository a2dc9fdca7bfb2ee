/// Tempo source - converts bpm into the sleep between playback ticks and
/// optionally aligns ticks to an external loop signal.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub mod metronome;

pub use metronome::{ClickSink, Metronome};

pub const MIN_BPM: u32 = 1;
pub const MAX_BPM: u32 = 1000;
/// 150 ms between beats.
pub const DEFAULT_INTERVAL_MS: u64 = 150;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TempoMode {
    /// Fixed interval between ticks.
    #[default]
    FreeRunning,
    /// Ticks land on beat boundaries measured from the last loop signal.
    ExternallyCued,
}

/// `60000 / bpm`, with bpm clamped to `[MIN_BPM, MAX_BPM]`.
pub fn interval_ms_for_bpm(bpm: u32) -> u64 {
    60_000 / bpm.clamp(MIN_BPM, MAX_BPM) as u64
}

pub fn bpm_for_interval_ms(interval_ms: u64) -> u32 {
    if interval_ms == 0 {
        return MAX_BPM;
    }
    ((60_000.0 / interval_ms as f64).round() as u32).clamp(MIN_BPM, MAX_BPM)
}

#[derive(Debug)]
struct TempoInner {
    interval_ms: AtomicU64,
    mode: Mutex<TempoMode>,
    last_loop: Mutex<Option<Instant>>,
}

/// Cheap to clone; all clones share the same tempo.
///
/// Changes are only picked up when the playback loop asks for its next
/// interval, so a sleep that has already begun is never shortened.
#[derive(Debug, Clone)]
pub struct TempoSource {
    inner: Arc<TempoInner>,
}

impl TempoSource {
    pub fn from_bpm(bpm: u32) -> Self {
        Self::from_interval_ms(interval_ms_for_bpm(bpm))
    }

    pub fn from_interval_ms(interval_ms: u64) -> Self {
        Self {
            inner: Arc::new(TempoInner {
                interval_ms: AtomicU64::new(interval_ms.max(1)),
                mode: Mutex::new(TempoMode::FreeRunning),
                last_loop: Mutex::new(None),
            }),
        }
    }

    pub fn bpm(&self) -> u32 {
        bpm_for_interval_ms(self.interval_ms())
    }

    pub fn set_bpm(&self, bpm: u32) {
        let interval_ms = interval_ms_for_bpm(bpm);
        self.inner.interval_ms.store(interval_ms, Ordering::Release);
        log::debug!(target: "tempo", "bpm set to {} ({} ms/beat)", bpm, interval_ms);
    }

    pub fn interval_ms(&self) -> u64 {
        self.inner.interval_ms.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms())
    }

    /// Zero is ignored.
    pub fn set_interval_ms(&self, interval_ms: u64) {
        if interval_ms > 0 {
            self.inner.interval_ms.store(interval_ms, Ordering::Release);
        }
    }

    pub fn mode(&self) -> TempoMode {
        *self.inner.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: TempoMode) {
        *self.inner.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Called by an external clock when its loop wraps. Only touches tempo
    /// state, so it is safe from any thread.
    pub fn on_loop_signal(&self) {
        *self.inner.last_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub fn last_loop_signal(&self) -> Option<Instant> {
        *self.inner.last_loop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How long the playback loop should sleep before its next tick.
    pub fn next_interval(&self) -> Duration {
        self.next_interval_at(Instant::now())
    }

    fn next_interval_at(&self, now: Instant) -> Duration {
        let interval = self.interval();
        if self.mode() == TempoMode::FreeRunning {
            return interval;
        }
        let Some(epoch) = self.last_loop_signal() else {
            return interval;
        };

        let interval_nanos = interval.as_nanos();
        let phase = now.saturating_duration_since(epoch).as_nanos() % interval_nanos;
        let mut remaining = interval_nanos - phase;
        // a boundary this close was already served by the tick just made
        if remaining < interval_nanos / 2 {
            remaining += interval_nanos;
        }
        Duration::from_nanos(remaining.min(u64::MAX as u128) as u64)
    }
}

impl Default for TempoSource {
    fn default() -> Self {
        Self::from_interval_ms(DEFAULT_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpm_interval_conversion() {
        assert_eq!(interval_ms_for_bpm(120), 500);
        assert_eq!(interval_ms_for_bpm(400), 150);
        assert_eq!(interval_ms_for_bpm(0), 60_000);
        assert_eq!(bpm_for_interval_ms(150), 400);
        assert_eq!(bpm_for_interval_ms(0), MAX_BPM);
    }

    #[test]
    fn test_default_tempo() {
        let tempo = TempoSource::default();
        assert_eq!(tempo.interval_ms(), 150);
        assert_eq!(tempo.bpm(), 400);
        assert_eq!(tempo.mode(), TempoMode::FreeRunning);
    }

    #[test]
    fn test_set_bpm_is_shared_between_clones() {
        let tempo = TempoSource::from_bpm(120);
        let other = tempo.clone();
        other.set_bpm(60);
        assert_eq!(tempo.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_interval_ignored() {
        let tempo = TempoSource::from_interval_ms(200);
        tempo.set_interval_ms(0);
        assert_eq!(tempo.interval_ms(), 200);
        tempo.set_interval_ms(250);
        assert_eq!(tempo.bpm(), 240);
    }

    #[test]
    fn test_free_running_ignores_loop_signal() {
        let tempo = TempoSource::from_interval_ms(100);
        tempo.on_loop_signal();
        assert_eq!(tempo.next_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_cued_without_signal_uses_plain_interval() {
        let tempo = TempoSource::from_interval_ms(100);
        tempo.set_mode(TempoMode::ExternallyCued);
        assert_eq!(tempo.next_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_cued_aligns_to_loop_boundary() {
        let tempo = TempoSource::from_interval_ms(100);
        tempo.set_mode(TempoMode::ExternallyCued);
        tempo.on_loop_signal();
        let epoch = tempo.last_loop_signal().unwrap();

        // 30 ms into a beat: 70 ms to the next boundary
        let next = tempo.next_interval_at(epoch + Duration::from_millis(230));
        assert_eq!(next, Duration::from_millis(70));

        // 80 ms into a beat: the close boundary is skipped
        let next = tempo.next_interval_at(epoch + Duration::from_millis(180));
        assert_eq!(next, Duration::from_millis(120));
    }
}
