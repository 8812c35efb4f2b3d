//! Bar-aligned transport transitions. One worker thread owns a priority
//! queue of jobs keyed by target musical position and sleeps until the
//! tempo reaches the earliest one. Jobs carry no cancellation: firing checks
//! the track's scheduled flag, so a flag cleared in the meantime turns the
//! fire into a no-op.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::debug;

use crate::router::OutputRouter;
use crate::tempo::Tempo;
use crate::track::TrackBank;
use crate::BEATS_PER_BAR;

/// Upper bound on one sleep slice, so BPM changes and external-clock drift
/// are picked up promptly.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportCommand {
    Start,
    Stop,
}

/// First bar boundary at or after `position`.
pub fn next_bar(position: f64) -> f64 {
    (position / BEATS_PER_BAR).ceil() * BEATS_PER_BAR
}

#[derive(Debug)]
struct Job {
    target: f64,
    track: usize,
    command: TransportCommand,
}

// BinaryHeap is a max-heap; order jobs so the earliest target pops first.
impl Ord for Job {
    fn cmp(&self, other: &Job) -> Ordering {
        other.target.total_cmp(&self.target)
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Job) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Job) -> bool {
        self.target == other.target
    }
}

impl Eq for Job {}

struct Shared {
    queue: Mutex<BinaryHeap<Job>>,
    wakeup: Condvar,
}

pub struct Scheduler {
    tempo: Arc<Tempo>,
    tracks: Arc<TrackBank>,
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create the scheduler and spawn its worker thread.
    pub fn start(
        tempo: Arc<Tempo>,
        tracks: Arc<TrackBank>,
        output: Arc<OutputRouter>,
    ) -> Scheduler {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
        });
        let scheduler = Scheduler {
            tempo: tempo.clone(),
            tracks: tracks.clone(),
            shared: shared.clone(),
        };
        thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || worker(tempo, tracks, output, shared))
            .expect("spawning scheduler thread should succeed");
        scheduler
    }

    /// Defer a start to the next bar boundary.
    pub fn schedule_start(&self, track_index: usize) {
        let Some(track) = self.tracks.get(track_index) else {
            return;
        };
        track.lock().unwrap().schedule_start();
        self.push(track_index, TransportCommand::Start);
    }

    /// Defer a stop to the next bar boundary.
    pub fn schedule_stop(&self, track_index: usize) {
        let Some(track) = self.tracks.get(track_index) else {
            return;
        };
        track.lock().unwrap().schedule_stop();
        self.push(track_index, TransportCommand::Stop);
    }

    /// Arm recording; if the track is idle, also schedule its start.
    pub fn schedule_record(&self, track_index: usize) {
        let Some(track) = self.tracks.get(track_index) else {
            return;
        };
        let need_start = {
            let mut track = track.lock().unwrap();
            track.arm_recording();
            let need = !track.is_running() && !track.is_start_scheduled();
            if need {
                track.schedule_start();
            }
            need
        };
        if need_start {
            self.push(track_index, TransportCommand::Start);
        }
    }

    fn push(&self, track: usize, command: TransportCommand) {
        let target = next_bar(self.tempo.position());
        debug!("[scheduler] track {track} {command:?} at position {target}");
        self.shared
            .queue
            .lock()
            .unwrap()
            .push(Job { target, track, command });
        self.shared.wakeup.notify_one();
    }
}

fn worker(
    tempo: Arc<Tempo>,
    tracks: Arc<TrackBank>,
    output: Arc<OutputRouter>,
    shared: Arc<Shared>,
) {
    let mut queue = shared.queue.lock().unwrap();
    loop {
        let remaining = queue.peek().map(|job| job.target - tempo.position());
        match remaining {
            Some(remaining) if remaining <= 1e-9 => {
                let job = queue.pop().expect("peeked job should still be queued");
                drop(queue);
                fire(&tempo, &tracks, &output, &job);
                queue = shared.queue.lock().unwrap();
            }
            Some(remaining) => {
                // re-check after at most one slice: BPM may change and an
                // external clock may stall
                let sleep = tempo.beats_to_duration(remaining).min(MAX_SLEEP_SLICE);
                queue = shared.wakeup.wait_timeout(queue, sleep).unwrap().0;
            }
            None => {
                queue = shared.wakeup.wait(queue).unwrap();
            }
        }
    }
}

fn fire(tempo: &Tempo, tracks: &TrackBank, output: &OutputRouter, job: &Job) {
    let Some(track) = tracks.get(job.track) else {
        return;
    };
    match job.command {
        TransportCommand::Start => {
            track.lock().unwrap().fire_scheduled_start(job.target);
        }
        TransportCommand::Stop => {
            let messages = track
                .lock()
                .unwrap()
                .fire_scheduled_stop(tempo.position());
            output.send_all(&messages);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_bar_rounds_up_to_bar_boundary() {
        assert_eq!(4.0, next_bar(1.3));
        assert_eq!(8.0, next_bar(4.1));
        assert_eq!(0.0, next_bar(0.0));
    }

    #[test]
    fn next_bar_keeps_exact_boundaries() {
        assert_eq!(4.0, next_bar(4.0));
    }

    #[test]
    fn next_bar_is_within_one_bar() {
        for p in [0.0, 0.1, 1.3, 3.999, 4.0, 7.2, 11.9] {
            let target = next_bar(p);
            assert!(target % BEATS_PER_BAR == 0.0);
            assert!(p <= target && target < p + BEATS_PER_BAR);
        }
    }

    #[test]
    fn jobs_pop_earliest_first() {
        let mut heap = BinaryHeap::new();
        heap.push(Job { target: 8.0, track: 0, command: TransportCommand::Start });
        heap.push(Job { target: 4.0, track: 1, command: TransportCommand::Stop });
        heap.push(Job { target: 12.0, track: 2, command: TransportCommand::Start });
        assert_eq!(4.0, heap.pop().unwrap().target);
        assert_eq!(8.0, heap.pop().unwrap().target);
        assert_eq!(12.0, heap.pop().unwrap().target);
    }

    #[test]
    fn scheduled_start_lands_on_the_bar() {
        let tempo = Arc::new(Tempo::default());
        let tracks = Arc::new(TrackBank::new());
        let output = Arc::new(OutputRouter::new());
        let scheduler = Scheduler::start(tempo.clone(), tracks.clone(), output);

        // tempo position 1.3: 32 ticks inside the first bar
        for _ in 0..31 {
            tempo.internal_tick();
        }
        scheduler.schedule_start(0);
        assert!(tracks.get(0).unwrap().lock().unwrap().is_start_scheduled());

        // advance to the bar boundary and give the worker a moment
        for _ in 0..((4 * 24) - 31) {
            tempo.internal_tick();
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            {
                let track = tracks.get(0).unwrap().lock().unwrap();
                if track.is_running() {
                    assert_eq!(0.0, track.local_position(4.0));
                    break;
                }
            }
            assert!(std::time::Instant::now() < deadline, "scheduled start never fired");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
