//! Per-track filters. Each pass mutates a clone of the recorded event list;
//! the recorded originals are never touched. Filters move complete on/off
//! pairs together, so pairing survives the pipeline. An on-event still
//! waiting for its off (an in-flight recording) passes through untouched.

use crate::event::{sort_events, wrap_position, Event};
use crate::BEATS_PER_BAR;

/// Keep scaled gates strictly shorter than the loop so the off-event cannot
/// land back on its own on-event.
pub const GATE_EPSILON: f64 = 1.0 / 96.0;

/// Snap note starts to a grid of `1/divisor` of a bar.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantizerFilter {
    pub enabled: bool,
    pub divisor: u8,
}

impl Default for QuantizerFilter {
    fn default() -> QuantizerFilter {
        QuantizerFilter {
            enabled: false,
            divisor: 8,
        }
    }
}

impl QuantizerFilter {
    /// Grid step in beats.
    pub fn quantum(&self) -> f64 {
        BEATS_PER_BAR / self.divisor as f64
    }

    pub fn apply(&self, events: &mut [Event], loop_length: f64) {
        if !self.enabled {
            return;
        }
        let q = self.quantum();
        for on_index in 0..events.len() {
            if !events[on_index].is_note_on() {
                continue;
            }
            let Some(off_index) = off_index_for_on(events, on_index) else {
                continue;
            };
            let position = events[on_index].position;
            let delta = (position / q).round() * q - position;
            events[on_index].position = wrap_position(position + delta, loop_length);
            events[off_index].position =
                wrap_position(events[off_index].position + delta, loop_length);
        }
    }
}

/// Scale the distance between each on-event and its off-event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GateLengthFilter {
    pub multiplier: f64,
}

impl Default for GateLengthFilter {
    fn default() -> GateLengthFilter {
        GateLengthFilter { multiplier: 1.0 }
    }
}

impl GateLengthFilter {
    pub fn apply(&self, events: &mut [Event], loop_length: f64) {
        for on_index in 0..events.len() {
            if !events[on_index].is_note_on() {
                continue;
            }
            let Some(off_index) = off_index_for_on(events, on_index) else {
                continue;
            };
            let on_position = events[on_index].position;
            let length = wrap_position(events[off_index].position - on_position, loop_length);
            let scaled = (length * self.multiplier).min(loop_length - GATE_EPSILON);
            events[off_index].position = wrap_position(on_position + scaled, loop_length);
        }
    }
}

/// Shift every pair by a fixed number of beats, wrapping around the loop.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OffsetFilter {
    pub offset: f64,
}

impl OffsetFilter {
    pub fn apply(&self, events: &mut [Event], loop_length: f64) {
        if self.offset == 0.0 {
            return;
        }
        for on_index in 0..events.len() {
            if !events[on_index].is_note_on() {
                continue;
            }
            let Some(off_index) = off_index_for_on(events, on_index) else {
                continue;
            };
            events[on_index].position =
                wrap_position(events[on_index].position + self.offset, loop_length);
            events[off_index].position =
                wrap_position(events[off_index].position + self.offset, loop_length);
        }
    }
}

/// Find the off-event paired with the on-event at `on_index`: the first
/// matching note-off scanning forward in list order, wrapping to the start.
pub fn off_index_for_on(events: &[Event], on_index: usize) -> Option<usize> {
    let pitch = events[on_index].pitch()?;
    let after = (on_index + 1)..events.len();
    let before = 0..on_index;
    after
        .chain(before)
        .find(|&i| events[i].is_note_off() && events[i].pitch() == Some(pitch))
}

/// Run the whole pipeline over a clone of `events` and return the derived
/// list, sorted by position.
pub fn apply_pipeline(
    events: &[Event],
    offset: &OffsetFilter,
    gate_length: &GateLengthFilter,
    quantizer: &QuantizerFilter,
    loop_length: f64,
) -> Vec<Event> {
    let mut filtered = events.to_vec();
    offset.apply(&mut filtered, loop_length);
    gate_length.apply(&mut filtered, loop_length);
    quantizer.apply(&mut filtered, loop_length);
    sort_events(&mut filtered);
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use midi_types::MidiMessage;

    const LOOP: f64 = 8.0;

    fn note_on(position: f64, note: u8) -> Event {
        Event::new(position, MidiMessage::NoteOn(0.into(), note.into(), 100.into()))
    }

    fn note_off(position: f64, note: u8) -> Event {
        Event::new(position, MidiMessage::NoteOff(0.into(), note.into(), 0.into()))
    }

    fn positions(events: &[Event]) -> Vec<f64> {
        events.iter().map(|e| e.position).collect()
    }

    #[test]
    fn off_lookup_scans_forward_then_wraps() {
        let events = vec![note_off(0.25, 62), note_on(7.75, 62)];
        assert_eq!(Some(0), off_index_for_on(&events, 1));
    }

    #[test]
    fn off_lookup_matches_pitch() {
        let events = vec![note_on(0.0, 60), note_off(0.5, 64), note_off(1.0, 60)];
        assert_eq!(Some(2), off_index_for_on(&events, 0));
    }

    #[test]
    fn quantizer_snaps_on_and_shifts_off_together() {
        // divisor 4 on a 4-beat bar snaps to whole beats
        let mut events = vec![note_on(0.13, 60), note_off(0.37, 60)];
        let filter = QuantizerFilter { enabled: true, divisor: 4 };
        filter.apply(&mut events, LOOP);
        assert!((events[0].position - 0.0).abs() < 1e-9);
        assert!((events[1].position - 0.24).abs() < 1e-9);
    }

    #[test]
    fn quantizer_disabled_is_identity() {
        let mut events = vec![note_on(0.13, 60), note_off(0.37, 60)];
        let filter = QuantizerFilter { enabled: false, divisor: 4 };
        filter.apply(&mut events, LOOP);
        assert_eq!(vec![0.13, 0.37], positions(&events));
    }

    #[test]
    fn quantizer_is_idempotent() {
        let events = vec![note_on(0.6, 60), note_off(1.1, 60), note_on(3.4, 64), note_off(3.9, 64)];
        let filter = QuantizerFilter { enabled: true, divisor: 8 };
        let mut once = events.clone();
        filter.apply(&mut once, LOOP);
        let mut twice = once.clone();
        filter.apply(&mut twice, LOOP);
        assert_eq!(positions(&once), positions(&twice));
    }

    #[test]
    fn quantizer_wraps_past_loop_end() {
        let mut events = vec![note_on(7.9, 60), note_off(0.2, 60)];
        let filter = QuantizerFilter { enabled: true, divisor: 4 };
        filter.apply(&mut events, LOOP);
        // 7.9 snaps up to 8.0, which is position 0
        assert!((events[0].position - 0.0).abs() < 1e-9);
        assert!((events[1].position - 0.3).abs() < 1e-9);
    }

    #[test]
    fn gate_length_scales_pairs() {
        let mut events = vec![note_on(1.0, 60), note_off(1.5, 60)];
        let filter = GateLengthFilter { multiplier: 2.0 };
        filter.apply(&mut events, LOOP);
        assert_eq!(2.0, events[1].position);
    }

    #[test]
    fn gate_length_handles_wrapped_pairs() {
        let mut events = vec![note_on(7.75, 62), note_off(0.25, 62)];
        let filter = GateLengthFilter { multiplier: 0.5 };
        filter.apply(&mut events, LOOP);
        assert!((events[1].position - 0.0).abs() < 1e-9);
    }

    #[test]
    fn gate_length_caps_below_full_loop() {
        let mut events = vec![note_on(0.0, 60), note_off(4.0, 60)];
        let filter = GateLengthFilter { multiplier: 4.0 };
        filter.apply(&mut events, LOOP);
        assert!((events[1].position - (LOOP - GATE_EPSILON)).abs() < 1e-9);
    }

    #[test]
    fn offset_shifts_and_wraps() {
        let mut events = vec![note_on(7.5, 60), note_off(7.9, 60)];
        let filter = OffsetFilter { offset: 0.5 };
        filter.apply(&mut events, LOOP);
        assert!((events[0].position - 0.0).abs() < 1e-9);
        assert!((events[1].position - 0.4).abs() < 1e-9);
    }

    #[test]
    fn offset_shifts_backwards() {
        let mut events = vec![note_on(0.25, 60), note_off(1.0, 60)];
        let filter = OffsetFilter { offset: -0.5 };
        filter.apply(&mut events, LOOP);
        assert!((events[0].position - 7.75).abs() < 1e-9);
        assert!((events[1].position - 0.5).abs() < 1e-9);
    }

    #[test]
    fn pipeline_is_pure() {
        let events = vec![note_on(0.6, 60), note_off(1.1, 60)];
        let offset = OffsetFilter { offset: 0.25 };
        let gate = GateLengthFilter { multiplier: 2.0 };
        let quantizer = QuantizerFilter { enabled: true, divisor: 8 };
        let a = apply_pipeline(&events, &offset, &gate, &quantizer, LOOP);
        let b = apply_pipeline(&events, &offset, &gate, &quantizer, LOOP);
        assert_eq!(a, b);
        // originals untouched
        assert_eq!(vec![0.6, 1.1], positions(&events));
    }

    #[test]
    fn pipeline_skips_orphan_on_events() {
        let events = vec![note_on(0.6, 60)];
        let offset = OffsetFilter { offset: 0.25 };
        let gate = GateLengthFilter { multiplier: 2.0 };
        let quantizer = QuantizerFilter { enabled: true, divisor: 4 };
        let filtered = apply_pipeline(&events, &offset, &gate, &quantizer, LOOP);
        assert_eq!(vec![0.6], positions(&filtered));
    }

    #[test]
    fn pipeline_output_is_sorted() {
        let events = vec![note_on(7.75, 62), note_off(0.25, 62), note_on(2.0, 60), note_off(3.0, 60)];
        let offset = OffsetFilter { offset: 0.5 };
        let filtered = apply_pipeline(
            &events,
            &offset,
            &GateLengthFilter::default(),
            &QuantizerFilter::default(),
            LOOP,
        );
        let sorted: Vec<f64> = positions(&filtered);
        let mut expected = sorted.clone();
        expected.sort_by(f64::total_cmp);
        assert_eq!(expected, sorted);
    }
}
