//! Message routing. The input router fans every inbound message out to all
//! tracks and owns clock selection; the output router multiplexes outbound
//! messages to every open endpoint and remembers what it sent recently so
//! the input side can suppress feedback loops.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use heapless::HistoryBuffer;
use log::{debug, trace};
use midi_types::MidiMessage;

use crate::clock::ClockSelector;
use crate::error::EngineError;
use crate::tempo::{MetronomeCue, Tempo};
use crate::track::TrackBank;

/// How long an echoed copy of an outbound message is treated as feedback.
pub const FEEDBACK_WINDOW: Duration = Duration::from_millis(100);

/// How many outbound messages the feedback suppressor remembers.
pub const RECENTLY_SENT_CAPACITY: usize = 50;

/// An open MIDI output. The app supplies real port-backed implementations;
/// tests use in-memory ones.
pub trait OutputEndpoint: Send {
    fn name(&self) -> &str;
    fn send(&mut self, message: &MidiMessage) -> Result<(), EngineError>;
}

pub struct OutputRouter {
    endpoints: Mutex<Vec<Box<dyn OutputEndpoint>>>,
    recently_sent: Mutex<HistoryBuffer<(Instant, MidiMessage), RECENTLY_SENT_CAPACITY>>,
}

impl OutputRouter {
    pub fn new() -> OutputRouter {
        OutputRouter {
            endpoints: Mutex::new(Vec::new()),
            recently_sent: Mutex::new(HistoryBuffer::new()),
        }
    }

    pub fn add_endpoint(&self, endpoint: Box<dyn OutputEndpoint>) {
        self.endpoints.lock().unwrap().push(endpoint);
    }

    pub fn remove_endpoint(&self, name: &str) {
        self.endpoints
            .lock()
            .unwrap()
            .retain(|endpoint| endpoint.name() != name);
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints
            .lock()
            .unwrap()
            .iter()
            .map(|endpoint| endpoint.name().to_string())
            .collect()
    }

    pub fn has_endpoints(&self) -> bool {
        !self.endpoints.lock().unwrap().is_empty()
    }

    /// Write one message to every endpoint and remember it for the feedback
    /// suppressor. Send failures are logged and absorbed.
    pub fn send(&self, message: &MidiMessage) {
        log_outbound(message);
        let mut endpoints = self.endpoints.lock().unwrap();
        for endpoint in endpoints.iter_mut() {
            if let Err(err) = endpoint.send(message) {
                log::error!("[midi_out] send to {} failed: {err}", endpoint.name());
            }
        }
        self.recently_sent
            .lock()
            .unwrap()
            .write((Instant::now(), *message));
    }

    pub fn send_all(&self, messages: &[MidiMessage]) {
        for message in messages {
            self.send(message);
        }
    }

    /// Was an identical message sent to the outputs within the feedback
    /// window before `now`?
    pub fn recently_sent(&self, message: &MidiMessage, now: Instant) -> bool {
        self.recently_sent
            .lock()
            .unwrap()
            .as_slice()
            .iter()
            .any(|(at, sent)| {
                sent == message && now.duration_since(*at) <= FEEDBACK_WINDOW
            })
    }
}

impl Default for OutputRouter {
    fn default() -> OutputRouter {
        OutputRouter::new()
    }
}

pub struct InputRouter {
    tempo: Arc<Tempo>,
    tracks: Arc<TrackBank>,
    output: Arc<OutputRouter>,
    clock: Mutex<ClockSelector>,
    metronome_sink: Mutex<Option<Sender<MetronomeCue>>>,
}

impl InputRouter {
    pub fn new(
        tempo: Arc<Tempo>,
        tracks: Arc<TrackBank>,
        output: Arc<OutputRouter>,
    ) -> InputRouter {
        InputRouter {
            tempo,
            tracks,
            output,
            clock: Mutex::new(ClockSelector::new()),
            metronome_sink: Mutex::new(None),
        }
    }

    pub fn tempo(&self) -> &Arc<Tempo> {
        &self.tempo
    }

    pub fn tracks(&self) -> &Arc<TrackBank> {
        &self.tracks
    }

    pub fn output(&self) -> &Arc<OutputRouter> {
        &self.output
    }

    /// Where metronome cues go once the app has an audio sink for them.
    pub fn set_metronome_sink(&self, sink: Sender<MetronomeCue>) {
        *self.metronome_sink.lock().unwrap() = Some(sink);
    }

    /// One inbound message from `port`. Clock and song position go to the
    /// tempo; everything else is checked against the feedback suppressor and
    /// fanned out to every track.
    pub fn handle_message(&self, port: &str, message: MidiMessage) {
        match message {
            MidiMessage::TimingClock => {
                let now = Instant::now();
                if self.clock.lock().unwrap().on_external_tick(port, now) {
                    let cue = self.tempo.external_tick(now);
                    self.after_tick(cue);
                }
            }
            MidiMessage::SongPositionPointer(pos) => {
                self.tempo.set_song_position(u16::from(pos));
            }
            MidiMessage::Start => {
                // external transport start rewinds to the top
                self.tempo.set_song_position(0);
            }
            message => {
                let now = Instant::now();
                if self.output.recently_sent(&message, now) {
                    debug!("[midi_in] {port}: suppressed feedback {message:?}");
                    return;
                }
                trace!("[midi_in] {port}: {message:?}");
                let position = self.tempo.position();
                for track in self.tracks.iter() {
                    let messages = track.lock().unwrap().process_message(position, &message);
                    self.output.send_all(&messages);
                }
            }
        }
    }

    /// One tick from the internal clock thread; ignored while an external
    /// clock is driving.
    pub fn internal_tick(&self) {
        if self.clock.lock().unwrap().poll_internal(Instant::now()) {
            let cue = self.tempo.internal_tick();
            self.after_tick(cue);
        }
    }

    /// Clock fan-out: let every running track reconcile, then send the
    /// resulting messages. Messages are computed under the track lock and
    /// sent after it is released.
    fn after_tick(&self, cue: Option<MetronomeCue>) {
        let position = self.tempo.position();
        for track in self.tracks.iter() {
            let messages = track.lock().unwrap().on_clock(position);
            self.output.send_all(&messages);
        }
        if let Some(cue) = cue {
            if let Some(sink) = &*self.metronome_sink.lock().unwrap() {
                let _ = sink.send(cue);
            }
        }
    }
}

fn log_outbound(message: &MidiMessage) {
    match message {
        MidiMessage::NoteOn(channel, note, velocity) => {
            let channel: u8 = (*channel).into();
            let note: u8 = (*note).into();
            let velocity: u8 = (*velocity).into();
            debug!("[midi_out] note on channel={channel} note={note} velocity={velocity}");
        }
        MidiMessage::NoteOff(channel, note, _velocity) => {
            let channel: u8 = (*channel).into();
            let note: u8 = (*note).into();
            debug!("[midi_out] note off channel={channel} note={note}");
        }
        message => trace!("[midi_out] {message:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingEndpoint {
        name: String,
        sent: Arc<Mutex<Vec<MidiMessage>>>,
    }

    impl OutputEndpoint for RecordingEndpoint {
        fn name(&self) -> &str {
            &self.name
        }

        fn send(&mut self, message: &MidiMessage) -> Result<(), EngineError> {
            self.sent.lock().unwrap().push(*message);
            Ok(())
        }
    }

    fn recording_endpoint(name: &str) -> (Box<RecordingEndpoint>, Arc<Mutex<Vec<MidiMessage>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(RecordingEndpoint { name: name.into(), sent: sent.clone() }),
            sent,
        )
    }

    fn note_on(note: u8) -> MidiMessage {
        MidiMessage::NoteOn(0.into(), note.into(), 100.into())
    }

    fn router() -> (Arc<InputRouter>, Arc<Mutex<Vec<MidiMessage>>>) {
        let tempo = Arc::new(Tempo::default());
        let tracks = Arc::new(TrackBank::new());
        let output = Arc::new(OutputRouter::new());
        let (endpoint, sent) = recording_endpoint("test out");
        output.add_endpoint(endpoint);
        (
            Arc::new(InputRouter::new(tempo, tracks, output)),
            sent,
        )
    }

    #[test]
    fn output_router_sends_to_every_endpoint() {
        let output = OutputRouter::new();
        let (a, sent_a) = recording_endpoint("a");
        let (b, sent_b) = recording_endpoint("b");
        output.add_endpoint(a);
        output.add_endpoint(b);
        output.send(&note_on(60));
        assert_eq!(1, sent_a.lock().unwrap().len());
        assert_eq!(1, sent_b.lock().unwrap().len());
    }

    #[test]
    fn sent_messages_count_as_recent_within_the_window() {
        let output = OutputRouter::new();
        output.send(&note_on(60));
        let now = Instant::now();
        assert!(output.recently_sent(&note_on(60), now));
        assert!(!output.recently_sent(&note_on(61), now));
        assert!(!output.recently_sent(
            &note_on(60),
            now + FEEDBACK_WINDOW + Duration::from_millis(1)
        ));
    }

    #[test]
    fn history_is_bounded() {
        let output = OutputRouter::new();
        for note in 0..80u8 {
            output.send(&note_on(note));
        }
        let now = Instant::now();
        // oldest entries have been overwritten
        assert!(!output.recently_sent(&note_on(0), now));
        assert!(output.recently_sent(&note_on(79), now));
    }

    #[test]
    fn feedback_is_not_recorded_by_tracks() {
        let (router, _sent) = router();
        {
            let mut track = router.tracks().get(0).unwrap().lock().unwrap();
            track.record(0.0);
        }
        // the router just sent this message; its echo must be dropped
        router.output().send(&note_on(60));
        router.handle_message("loopback in", note_on(60));
        assert!(router.tracks().get(0).unwrap().lock().unwrap().events().is_empty());
    }

    #[test]
    fn fresh_messages_reach_every_track() {
        let (router, _sent) = router();
        for track in router.tracks().iter() {
            track.lock().unwrap().record(0.0);
        }
        router.handle_message("keys", note_on(60));
        for track in router.tracks().iter() {
            assert_eq!(1, track.lock().unwrap().events().len());
        }
    }

    #[test]
    fn thru_emissions_are_forwarded_to_outputs() {
        let (router, sent) = router();
        {
            let mut track = router.tracks().get(0).unwrap().lock().unwrap();
            track.thru = true;
            track.output_channel = 2;
        }
        router.handle_message("keys", note_on(60));
        assert_eq!(
            vec![MidiMessage::NoteOn(1.into(), 60.into(), 100.into())],
            *sent.lock().unwrap()
        );
    }

    #[test]
    fn external_clock_ticks_advance_tempo() {
        let (router, _sent) = router();
        for _ in 0..24 {
            router.handle_message("synth", MidiMessage::TimingClock);
        }
        assert_eq!(1.0, router.tempo().position());
    }

    #[test]
    fn song_position_jumps_the_tempo() {
        let (router, _sent) = router();
        router.handle_message("synth", MidiMessage::SongPositionPointer(8u16.into()));
        assert_eq!(8.0, router.tempo().position());
    }

    #[test]
    fn external_start_rewinds_to_the_top() {
        let (router, _sent) = router();
        router.handle_message("synth", MidiMessage::SongPositionPointer(8u16.into()));
        router.handle_message("synth", MidiMessage::Start);
        assert_eq!(0.0, router.tempo().position());
    }
}
