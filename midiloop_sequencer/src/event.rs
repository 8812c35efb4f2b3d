use core::cmp::Ordering;

use midi_types::MidiMessage;

/// A recorded MIDI message pinned to a loop position, measured in beats.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub position: f64,
    pub message: MidiMessage,
}

impl Event {
    pub fn new(position: f64, message: MidiMessage) -> Event {
        Event { position, message }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self.message, MidiMessage::NoteOn(..))
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self.message, MidiMessage::NoteOff(..))
    }

    /// Pitch for note messages, `None` for everything else.
    pub fn pitch(&self) -> Option<u8> {
        match self.message {
            MidiMessage::NoteOn(_, note, _) | MidiMessage::NoteOff(_, note, _) => {
                Some(note.into())
            }
            _ => None,
        }
    }
}

/// Fold a position back into `[0, loop_length)`.
pub fn wrap_position(position: f64, loop_length: f64) -> f64 {
    position.rem_euclid(loop_length)
}

/// Sort events by position. At equal positions note-offs come first, so a
/// note ending exactly where another begins releases before the new attack.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(event_order);
}

fn event_order(a: &Event, b: &Event) -> Ordering {
    a.position
        .total_cmp(&b.position)
        .then_with(|| a.is_note_on().cmp(&b.is_note_on()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(position: f64, note: u8) -> Event {
        Event::new(position, MidiMessage::NoteOn(0.into(), note.into(), 100.into()))
    }

    fn note_off(position: f64, note: u8) -> Event {
        Event::new(position, MidiMessage::NoteOff(0.into(), note.into(), 0.into()))
    }

    #[test]
    fn sort_orders_by_position() {
        let mut events = vec![note_on(2.0, 60), note_on(0.5, 62), note_off(1.0, 62)];
        sort_events(&mut events);
        assert_eq!(Some(62), events[0].pitch());
        assert_eq!(0.5, events[0].position);
        assert_eq!(2.0, events[2].position);
    }

    #[test]
    fn sort_puts_offs_before_ons_at_equal_position() {
        let mut events = vec![note_on(1.0, 60), note_off(1.0, 64)];
        sort_events(&mut events);
        assert!(events[0].is_note_off());
        assert!(events[1].is_note_on());
    }

    #[test]
    fn wrap_position_folds_into_loop() {
        assert_eq!(0.5, wrap_position(8.5, 8.0));
        assert_eq!(7.5, wrap_position(-0.5, 8.0));
        assert_eq!(0.0, wrap_position(8.0, 8.0));
    }
}
