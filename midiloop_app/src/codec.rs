//! Raw bytes to and from `midi_types::MidiMessage` for MIDI 1.0 short
//! messages. Port callbacks hand us complete messages, so there is no
//! running-status state to track.

use midi_types::MidiMessage;

/// Decode one complete short message. Returns `None` for anything we do not
/// route (SysEx, MTC quarter frames, truncated data).
pub fn decode(bytes: &[u8]) -> Option<MidiMessage> {
    let status = *bytes.first()?;
    let channel = (status & 0x0f).into();
    match status & 0xf0 {
        0x80 => Some(MidiMessage::NoteOff(
            channel,
            (*bytes.get(1)?).into(),
            (*bytes.get(2)?).into(),
        )),
        0x90 => {
            let note = *bytes.get(1)?;
            let velocity = *bytes.get(2)?;
            // note-on with velocity zero is a release in disguise
            if velocity == 0 {
                Some(MidiMessage::NoteOff(channel, note.into(), 0.into()))
            } else {
                Some(MidiMessage::NoteOn(channel, note.into(), velocity.into()))
            }
        }
        0xa0 => Some(MidiMessage::KeyPressure(
            channel,
            (*bytes.get(1)?).into(),
            (*bytes.get(2)?).into(),
        )),
        0xb0 => Some(MidiMessage::ControlChange(
            channel,
            (*bytes.get(1)?).into(),
            (*bytes.get(2)?).into(),
        )),
        0xc0 => Some(MidiMessage::ProgramChange(channel, (*bytes.get(1)?).into())),
        0xd0 => Some(MidiMessage::ChannelPressure(channel, (*bytes.get(1)?).into())),
        0xe0 => {
            let lsb = *bytes.get(1)? as u16;
            let msb = *bytes.get(2)? as u16;
            Some(MidiMessage::PitchBendChange(channel, ((msb << 7) | lsb).into()))
        }
        0xf0 => match status {
            0xf2 => {
                let lsb = *bytes.get(1)? as u16;
                let msb = *bytes.get(2)? as u16;
                Some(MidiMessage::SongPositionPointer(((msb << 7) | lsb).into()))
            }
            0xf3 => Some(MidiMessage::SongSelect((*bytes.get(1)?).into())),
            0xf6 => Some(MidiMessage::TuneRequest),
            0xf8 => Some(MidiMessage::TimingClock),
            0xfa => Some(MidiMessage::Start),
            0xfb => Some(MidiMessage::Continue),
            0xfc => Some(MidiMessage::Stop),
            0xfe => Some(MidiMessage::ActiveSensing),
            0xff => Some(MidiMessage::Reset),
            _ => None,
        },
        _ => None,
    }
}

/// Encode a message back into wire bytes. Returns `None` for message kinds
/// the engine never emits.
pub fn encode(message: &MidiMessage) -> Option<Vec<u8>> {
    match *message {
        MidiMessage::NoteOff(channel, note, velocity) => Some(vec![
            0x80 | u8::from(channel),
            note.into(),
            velocity.into(),
        ]),
        MidiMessage::NoteOn(channel, note, velocity) => Some(vec![
            0x90 | u8::from(channel),
            note.into(),
            velocity.into(),
        ]),
        MidiMessage::KeyPressure(channel, note, value) => Some(vec![
            0xa0 | u8::from(channel),
            note.into(),
            value.into(),
        ]),
        MidiMessage::ControlChange(channel, control, value) => Some(vec![
            0xb0 | u8::from(channel),
            control.into(),
            value.into(),
        ]),
        MidiMessage::ProgramChange(channel, program) => {
            Some(vec![0xc0 | u8::from(channel), program.into()])
        }
        MidiMessage::ChannelPressure(channel, value) => {
            Some(vec![0xd0 | u8::from(channel), value.into()])
        }
        MidiMessage::PitchBendChange(channel, value) => {
            let value = u16::from(value);
            Some(vec![
                0xe0 | u8::from(channel),
                (value & 0x7f) as u8,
                (value >> 7) as u8,
            ])
        }
        MidiMessage::SongPositionPointer(value) => {
            let value = u16::from(value);
            Some(vec![0xf2, (value & 0x7f) as u8, (value >> 7) as u8])
        }
        MidiMessage::SongSelect(value) => Some(vec![0xf3, value.into()]),
        MidiMessage::TuneRequest => Some(vec![0xf6]),
        MidiMessage::TimingClock => Some(vec![0xf8]),
        MidiMessage::Start => Some(vec![0xfa]),
        MidiMessage::Continue => Some(vec![0xfb]),
        MidiMessage::Stop => Some(vec![0xfc]),
        MidiMessage::ActiveSensing => Some(vec![0xfe]),
        MidiMessage::Reset => Some(vec![0xff]),
        _ => None,
    }
}
