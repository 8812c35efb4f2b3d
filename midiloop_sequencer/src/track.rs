//! A track owns one fixed-length loop of recorded MIDI events plus the
//! record/play state machine that fills and replays it.
//!
//! All operations that need musical time take the current tempo position as
//! an argument, and everything that produces MIDI returns the messages to
//! the caller instead of touching an output port. The caller holds the
//! track's mutex for the duration of one operation and owns all I/O, so the
//! track itself stays single-threaded and host-testable.

use std::collections::BTreeMap;
use std::sync::Mutex;

use midi_types::{Channel, MidiMessage};

use crate::event::{sort_events, wrap_position, Event};
use crate::filter::{
    apply_pipeline, off_index_for_on, GateLengthFilter, OffsetFilter, QuantizerFilter,
};
use crate::{BEATS_PER_BAR, DEFAULT_BARS, MAX_BARS, MIN_BARS, TRACK_COUNT};

/// Inbound channel filter: record/thru everything, or one channel (1-16).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputChannel {
    #[default]
    Any,
    Channel(u8),
}

impl core::fmt::Display for InputChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            InputChannel::Any => write!(f, "ANY"),
            InputChannel::Channel(channel) => write!(f, "{channel}"),
        }
    }
}

#[derive(Debug)]
pub struct Track {
    bars: u8,
    pub input_channel: InputChannel,
    /// Outbound channel (1-16); every emitted message is rewritten to it.
    pub output_channel: u8,
    events: Vec<Event>,
    filtered_events: Vec<Event>,
    running: bool,
    recording: bool,
    pub thru: bool,
    /// Tempo position at which this loop started.
    start_position: f64,
    start_scheduled: bool,
    stop_scheduled: bool,
    /// Pitches we have emitted a note-on for and not yet released.
    currently_on: BTreeMap<u8, MidiMessage>,
    /// In-flight recorded notes awaiting their note-off.
    currently_recording_notes: BTreeMap<u8, Event>,
    /// Held notes passed through to the output.
    currently_open_thru_notes: BTreeMap<u8, MidiMessage>,
    pub quantizer: QuantizerFilter,
    pub gate_length: GateLengthFilter,
    pub offset: OffsetFilter,
}

impl Default for Track {
    fn default() -> Track {
        Track {
            bars: DEFAULT_BARS,
            input_channel: InputChannel::Any,
            output_channel: 1,
            events: Vec::new(),
            filtered_events: Vec::new(),
            running: false,
            recording: false,
            thru: false,
            start_position: 0.0,
            start_scheduled: false,
            stop_scheduled: false,
            currently_on: BTreeMap::new(),
            currently_recording_notes: BTreeMap::new(),
            currently_open_thru_notes: BTreeMap::new(),
            quantizer: QuantizerFilter::default(),
            gate_length: GateLengthFilter::default(),
            offset: OffsetFilter::default(),
        }
    }
}

impl Track {
    pub fn new() -> Track {
        Track::default()
    }

    pub fn bars(&self) -> u8 {
        self.bars
    }

    /// Resize the loop. Event positions are folded into the new length so
    /// every stored position stays inside the loop.
    pub fn set_bars(&mut self, bars: u8) {
        self.bars = bars.clamp(MIN_BARS, MAX_BARS);
        let loop_length = self.loop_length();
        for event in &mut self.events {
            event.position = wrap_position(event.position, loop_length);
        }
        self.refresh();
    }

    pub fn loop_length(&self) -> f64 {
        self.bars as f64 * BEATS_PER_BAR
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_start_scheduled(&self) -> bool {
        self.start_scheduled
    }

    pub fn is_stop_scheduled(&self) -> bool {
        self.stop_scheduled
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn filtered_events(&self) -> &[Event] {
        &self.filtered_events
    }

    /// Replace the recorded events wholesale (state restore).
    pub fn set_events(&mut self, events: Vec<Event>) {
        self.events = events;
        self.refresh();
    }

    /// Loop-local position for a given tempo position. A stopped track sits
    /// at the top of its loop.
    pub fn local_position(&self, tempo_position: f64) -> f64 {
        if !self.running {
            return 0.0;
        }
        wrap_position(tempo_position - self.start_position, self.loop_length())
    }

    // ------------------------------------------------------------------
    // transport

    pub fn start(&mut self, tempo_position: f64) {
        self.start_scheduled = false;
        self.start_position = tempo_position;
        self.running = true;
    }

    pub fn schedule_start(&mut self) {
        self.start_scheduled = true;
    }

    pub fn schedule_stop(&mut self) {
        self.stop_scheduled = true;
    }

    /// Arm recording without starting the loop (the scheduler starts it at
    /// the next bar).
    pub fn arm_recording(&mut self) {
        self.recording = true;
    }

    /// Scheduler fire: only acts if the schedule flag is still set.
    pub fn fire_scheduled_start(&mut self, bar_position: f64) {
        if !self.start_scheduled {
            return;
        }
        self.start(bar_position);
    }

    /// Scheduler fire: only acts if the schedule flag is still set.
    pub fn fire_scheduled_stop(&mut self, tempo_position: f64) -> Vec<MidiMessage> {
        if !self.stop_scheduled {
            return Vec::new();
        }
        self.stop(tempo_position)
    }

    /// Stop the loop: close any in-flight recorded notes at the current
    /// position, then release everything we are holding on the output.
    pub fn stop(&mut self, tempo_position: f64) -> Vec<MidiMessage> {
        let mut out = Vec::new();
        self.stop_scheduled = false;
        self.start_scheduled = false;
        if self.recording {
            let position = self.local_position(tempo_position);
            self.recording = false;
            self.close_open_notes(position);
        }
        self.running = false;
        self.panic(&mut out);
        self.currently_open_thru_notes.clear();
        out
    }

    /// Start recording immediately, starting playback too if needed.
    pub fn record(&mut self, tempo_position: f64) {
        if !self.running {
            self.start(tempo_position);
        }
        self.recording = true;
    }

    /// Leave recording but keep playing; dangling on-events get a synthetic
    /// note-off at the current position.
    pub fn stop_recording(&mut self, tempo_position: f64) {
        let position = self.local_position(tempo_position);
        self.recording = false;
        self.close_open_notes(position);
    }

    /// Stop and wipe the loop.
    pub fn reset(&mut self, tempo_position: f64) -> Vec<MidiMessage> {
        let out = self.stop(tempo_position);
        self.events.clear();
        self.currently_recording_notes.clear();
        self.refresh();
        out
    }

    // ------------------------------------------------------------------
    // recording

    /// Handle one inbound message: thru-echo it, and record it when
    /// recording. Returns the messages to emit.
    pub fn process_message(&mut self, tempo_position: f64, message: &MidiMessage) -> Vec<MidiMessage> {
        let mut out = Vec::new();
        if !self.accepts(message) {
            return out;
        }

        if self.thru {
            match *message {
                MidiMessage::NoteOn(_, note, _) => {
                    let sent = self.emit(*message, &mut out);
                    self.currently_open_thru_notes.insert(note.into(), sent);
                }
                MidiMessage::NoteOff(_, note, _) => {
                    self.currently_open_thru_notes.remove(&u8::from(note));
                    self.emit(*message, &mut out);
                }
                _ => {}
            }
        }

        if !self.recording {
            return out;
        }

        let position = self.local_position(tempo_position);
        match *message {
            MidiMessage::NoteOn(_, note, _) => {
                let pitch = u8::from(note);
                let event = Event::new(position, *message);
                self.events.push(event.clone());
                self.currently_recording_notes.insert(pitch, event);
                self.currently_on
                    .insert(pitch, self.stamp_channel(*message));
                self.refresh();
            }
            MidiMessage::NoteOff(_, note, _) => {
                let pitch = u8::from(note);
                if let Some(open) = self.currently_recording_notes.remove(&pitch) {
                    // overdubbing over older notes of the same pitch: purge
                    // everything the new pair covers or cuts through
                    self.remove_overlapping_pairs(pitch, open.position, position, &open);
                    self.remove_notes_between(pitch, open.position, position, &open);
                    self.events.push(Event::new(position, *message));
                }
                self.currently_on.remove(&pitch);
                self.refresh();
            }
            _ => {}
        }

        out
    }

    fn accepts(&self, message: &MidiMessage) -> bool {
        match (self.input_channel, message_channel(message)) {
            (InputChannel::Channel(wanted), Some(channel)) => u8::from(channel) + 1 == wanted,
            _ => true,
        }
    }

    /// Close every in-flight recorded note with a synthetic note-off.
    fn close_open_notes(&mut self, position: f64) {
        for (pitch, _) in core::mem::take(&mut self.currently_recording_notes) {
            self.events.push(Event::new(
                position,
                MidiMessage::NoteOff(0.into(), pitch.into(), 0.into()),
            ));
        }
        self.refresh();
    }

    /// Remove same-pitch events positioned within `[start, end]` (wrapping),
    /// keeping `exclude` (the on-event of the pair being recorded).
    fn remove_notes_between(&mut self, pitch: u8, start: f64, end: f64, exclude: &Event) {
        let loop_length = self.loop_length();
        let end = if end < start { end + loop_length } else { end };
        self.events.retain(|event| {
            if event.pitch() != Some(pitch) || event == exclude {
                return true;
            }
            let in_range = (event.position >= start && event.position <= end)
                || (event.position + loop_length >= start && event.position + loop_length <= end);
            !in_range
        });
    }

    /// Remove older same-pitch pairs whose interval overlaps the newly
    /// recorded `[start, end)` span, both events of each.
    fn remove_overlapping_pairs(&mut self, pitch: u8, start: f64, end: f64, exclude: &Event) {
        let loop_length = self.loop_length();
        let new_length = wrap_position(end - start, loop_length);
        let mut doomed: Vec<Event> = Vec::new();
        for (i, event) in self.events.iter().enumerate() {
            if !event.is_note_on() || event.pitch() != Some(pitch) || event == exclude {
                continue;
            }
            if let Some(off_index) = off_index_for_on(&self.events, i) {
                let length =
                    wrap_position(self.events[off_index].position - event.position, loop_length);
                if intervals_overlap(event.position, length, start, new_length, loop_length) {
                    doomed.push(event.clone());
                    doomed.push(self.events[off_index].clone());
                }
            }
        }
        self.events.retain(|event| !doomed.contains(event));
    }

    /// Sort the recorded events and recompute the filtered list. The only
    /// reconciliation point: orphan on-events are tolerated here, overlap
    /// repair happens at record time.
    pub fn refresh(&mut self) {
        sort_events(&mut self.events);
        self.filtered_events = apply_pipeline(
            &self.events,
            &self.offset,
            &self.gate_length,
            &self.quantizer,
            self.loop_length(),
        );
    }

    // ------------------------------------------------------------------
    // emission

    /// Clock hook: reconcile what should be sounding at the current position
    /// against what we are holding. Idempotent; note-offs come out first.
    pub fn on_clock(&mut self, tempo_position: f64) -> Vec<MidiMessage> {
        let mut out = Vec::new();
        if !self.running {
            return out;
        }
        let position = self.local_position(tempo_position);
        let open = self.open_notes_at(position);

        let stale: Vec<u8> = self
            .currently_on
            .keys()
            .filter(|pitch| {
                !open.contains_key(pitch)
                    && !self.currently_recording_notes.contains_key(pitch)
                    && !self.currently_open_thru_notes.contains_key(pitch)
            })
            .copied()
            .collect();
        for pitch in stale {
            self.emit(
                MidiMessage::NoteOff(0.into(), pitch.into(), 0.into()),
                &mut out,
            );
        }
        for (pitch, event) in open {
            if !self.currently_on.contains_key(&pitch) {
                self.emit(event.message, &mut out);
            }
        }
        out
    }

    /// Notes sounding at `position` according to the filtered events: walk
    /// the loop once in wrap-around order ending at `position`; whatever is
    /// left open is sounding. A note-off exactly at `position` closes, a
    /// note-on exactly at `position` opens.
    fn open_notes_at(&self, position: f64) -> BTreeMap<u8, Event> {
        let mut open = BTreeMap::new();
        let after = self
            .filtered_events
            .iter()
            .filter(|e| e.position > position);
        let up_to = self
            .filtered_events
            .iter()
            .filter(|e| e.position <= position);
        for event in after.chain(up_to) {
            match event.message {
                MidiMessage::NoteOn(_, note, _) => {
                    open.insert(note.into(), event.clone());
                }
                MidiMessage::NoteOff(_, note, _) => {
                    open.remove(&u8::from(note));
                }
                _ => {}
            }
        }
        open
    }

    /// Release every held pitch.
    fn panic(&mut self, out: &mut Vec<MidiMessage>) {
        let held: Vec<u8> = self.currently_on.keys().copied().collect();
        for pitch in held {
            self.emit(
                MidiMessage::NoteOff(0.into(), pitch.into(), 0.into()),
                out,
            );
        }
    }

    /// Stamp the output channel onto a message, track what is held, and
    /// queue it for sending.
    fn emit(&mut self, message: MidiMessage, out: &mut Vec<MidiMessage>) -> MidiMessage {
        let message = self.stamp_channel(message);
        match message {
            MidiMessage::NoteOn(_, note, _) => {
                self.currently_on.insert(note.into(), message);
            }
            MidiMessage::NoteOff(_, note, _) => {
                self.currently_on.remove(&u8::from(note));
            }
            _ => {}
        }
        out.push(message);
        message
    }

    fn stamp_channel(&self, message: MidiMessage) -> MidiMessage {
        with_channel(message, Channel::from(self.output_channel.saturating_sub(1)))
    }

    pub fn currently_on_pitches(&self) -> Vec<u8> {
        self.currently_on.keys().copied().collect()
    }

    pub fn currently_recording_pitches(&self) -> Vec<u8> {
        self.currently_recording_notes.keys().copied().collect()
    }
}

/// All tracks, each behind its own mutex. Callers lock exactly one track per
/// operation; nothing in the engine takes two track locks at once.
pub struct TrackBank {
    tracks: Vec<Mutex<Track>>,
}

impl TrackBank {
    pub fn new() -> TrackBank {
        TrackBank {
            tracks: (0..TRACK_COUNT).map(|_| Mutex::new(Track::new())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Mutex<Track>> {
        self.tracks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutex<Track>> {
        self.tracks.iter()
    }
}

impl Default for TrackBank {
    fn default() -> TrackBank {
        TrackBank::new()
    }
}

/// Whether two half-open intervals on the loop circle overlap.
fn intervals_overlap(start_a: f64, length_a: f64, start_b: f64, length_b: f64, loop_length: f64) -> bool {
    wrap_position(start_b - start_a, loop_length) < length_a
        || wrap_position(start_a - start_b, loop_length) < length_b
}

fn message_channel(message: &MidiMessage) -> Option<Channel> {
    match *message {
        MidiMessage::NoteOn(channel, ..)
        | MidiMessage::NoteOff(channel, ..)
        | MidiMessage::KeyPressure(channel, ..)
        | MidiMessage::ControlChange(channel, ..)
        | MidiMessage::ProgramChange(channel, ..)
        | MidiMessage::ChannelPressure(channel, ..)
        | MidiMessage::PitchBendChange(channel, ..) => Some(channel),
        _ => None,
    }
}

fn with_channel(message: MidiMessage, channel: Channel) -> MidiMessage {
    match message {
        MidiMessage::NoteOn(_, note, velocity) => MidiMessage::NoteOn(channel, note, velocity),
        MidiMessage::NoteOff(_, note, velocity) => MidiMessage::NoteOff(channel, note, velocity),
        MidiMessage::KeyPressure(_, note, value) => MidiMessage::KeyPressure(channel, note, value),
        MidiMessage::ControlChange(_, control, value) => {
            MidiMessage::ControlChange(channel, control, value)
        }
        MidiMessage::ProgramChange(_, program) => MidiMessage::ProgramChange(channel, program),
        MidiMessage::ChannelPressure(_, value) => MidiMessage::ChannelPressure(channel, value),
        MidiMessage::PitchBendChange(_, value) => MidiMessage::PitchBendChange(channel, value),
        other => other,
    }
}
