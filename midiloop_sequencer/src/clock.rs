//! Clock source selection. One logical clock drives the tempo: the internal
//! timer by default, or the first external MIDI clock heard within the last
//! second.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::info;

use crate::router::InputRouter;

/// External clock silence after which the internal clock takes back over.
pub const EXTERNAL_CLOCK_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClockSource {
    Internal,
    External { port: String },
}

/// Decides which clock's ticks are allowed to advance the tempo.
pub struct ClockSelector {
    active: ClockSource,
    last_external_tick: Option<Instant>,
}

impl ClockSelector {
    pub fn new() -> ClockSelector {
        ClockSelector {
            active: ClockSource::Internal,
            last_external_tick: None,
        }
    }

    pub fn active(&self) -> &ClockSource {
        &self.active
    }

    /// An external clock tick arrived on `port`. Returns true if this tick
    /// should drive the tempo.
    pub fn on_external_tick(&mut self, port: &str, now: Instant) -> bool {
        match &self.active {
            ClockSource::Internal => {
                info!("[clock] external clock on {port} takes over");
                self.active = ClockSource::External { port: port.into() };
                self.last_external_tick = Some(now);
                true
            }
            ClockSource::External { port: active } if active == port => {
                self.last_external_tick = Some(now);
                true
            }
            ClockSource::External { port: active } => {
                // another source only wins once the active one goes silent
                if self.external_silent(now) {
                    info!("[clock] external clock moved from {active} to {port}");
                    self.active = ClockSource::External { port: port.into() };
                    self.last_external_tick = Some(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// The internal clock thread asks before each of its ticks. Returns true
    /// if internal ticks should drive the tempo, reverting to internal when
    /// the external source has gone silent.
    pub fn poll_internal(&mut self, now: Instant) -> bool {
        match &self.active {
            ClockSource::Internal => true,
            ClockSource::External { port } => {
                if self.external_silent(now) {
                    info!("[clock] external clock on {port} lost, back to internal");
                    self.active = ClockSource::Internal;
                    self.last_external_tick = None;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn external_silent(&self, now: Instant) -> bool {
        match self.last_external_tick {
            Some(last) => now.duration_since(last) > EXTERNAL_CLOCK_TIMEOUT,
            None => true,
        }
    }
}

impl Default for ClockSelector {
    fn default() -> ClockSelector {
        ClockSelector::new()
    }
}

/// Run the internal 24 PPQN timer. Sleeps one tick at the current BPM, then
/// offers the tick to the router; the selector drops it while an external
/// clock is live.
pub fn spawn_internal_clock(router: Arc<InputRouter>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("clock".into())
        .spawn(move || loop {
            thread::sleep(router.tempo().tick_duration());
            router.internal_tick();
        })
        .expect("spawning clock thread should succeed")
}
