//! Musical time. A single tick counter advanced at 24 PPQN by whichever
//! clock source is active, plus the BPM it implies.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{BEATS_PER_BAR, DEFAULT_BPM, MAX_BPM, MIN_BPM, PPQN};

/// Weight of each new external-clock BPM estimate folded into the running
/// value. External clocks jitter tick to tick, so follow them gently.
const EXTERNAL_BPM_SMOOTHING: f64 = 0.25;

/// Metronome cue for one beat. Strong on beat 1 of the bar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetronomeCue {
    Strong,
    Weak,
}

pub struct Tempo {
    ticks: AtomicU64,
    bpm: Mutex<f64>,
    metronome: AtomicBool,
    last_clock: Mutex<Option<Instant>>,
}

impl Tempo {
    pub fn new(bpm: f64) -> Tempo {
        Tempo {
            ticks: AtomicU64::new(0),
            bpm: Mutex::new(bpm.clamp(MIN_BPM, MAX_BPM)),
            metronome: AtomicBool::new(false),
            last_clock: Mutex::new(None),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Current musical position in beats.
    pub fn position(&self) -> f64 {
        self.ticks() as f64 / PPQN as f64
    }

    pub fn bar_size(&self) -> f64 {
        BEATS_PER_BAR
    }

    pub fn bpm(&self) -> f64 {
        *self.bpm.lock().unwrap()
    }

    pub fn set_bpm(&self, bpm: f64) {
        *self.bpm.lock().unwrap() = bpm.clamp(MIN_BPM, MAX_BPM);
    }

    pub fn metronome_enabled(&self) -> bool {
        self.metronome.load(Ordering::Relaxed)
    }

    pub fn set_metronome_enabled(&self, enabled: bool) {
        self.metronome.store(enabled, Ordering::Relaxed);
    }

    pub fn beat_duration(&self) -> Duration {
        self.beats_to_duration(1.0)
    }

    pub fn tick_duration(&self) -> Duration {
        self.beats_to_duration(1.0 / PPQN as f64)
    }

    /// Wall-clock time covered by `beats` at the current BPM.
    pub fn beats_to_duration(&self, beats: f64) -> Duration {
        Duration::from_secs_f64(beats.max(0.0) * 60.0 / self.bpm())
    }

    /// MIDI song position pointer: jump the tick counter.
    pub fn set_song_position(&self, pos: u16) {
        self.ticks.store(pos as u64 * PPQN as u64, Ordering::Relaxed);
    }

    /// Advance one tick from the internal clock.
    pub fn internal_tick(&self) -> Option<MetronomeCue> {
        self.advance()
    }

    /// Advance one tick from an external MIDI clock, folding the implied BPM
    /// into the running estimate.
    pub fn external_tick(&self, now: Instant) -> Option<MetronomeCue> {
        let mut last_clock = self.last_clock.lock().unwrap();
        if let Some(last) = *last_clock {
            let dt = now.duration_since(last).as_secs_f64();
            if dt > 0.0 {
                let estimate = 60.0 / (PPQN as f64 * dt);
                let mut bpm = self.bpm.lock().unwrap();
                *bpm = (*bpm + (estimate - *bpm) * EXTERNAL_BPM_SMOOTHING).clamp(MIN_BPM, MAX_BPM);
            }
        }
        *last_clock = Some(now);
        self.advance()
    }

    fn advance(&self) -> Option<MetronomeCue> {
        let ticks = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.metronome_enabled() || ticks % PPQN as u64 != 0 {
            return None;
        }
        let beat = ticks / PPQN as u64;
        if beat % BEATS_PER_BAR as u64 == 0 {
            Some(MetronomeCue::Strong)
        } else {
            Some(MetronomeCue::Weak)
        }
    }
}

impl Default for Tempo {
    fn default() -> Tempo {
        Tempo::new(DEFAULT_BPM)
    }
}
