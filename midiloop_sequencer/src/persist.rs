//! State snapshots. The whole bank plus global settings serialize to one
//! JSON document; writes go to a temp file first and rename over the real
//! one, so a crash mid-save never leaves a torn file. A corrupt or missing
//! file is ignored (with a warning) and only overwritten by the next
//! user-driven save.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};
use midi_types::MidiMessage;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::event::Event;
use crate::filter::{GateLengthFilter, OffsetFilter, QuantizerFilter};
use crate::tempo::Tempo;
use crate::track::{InputChannel, Track, TrackBank};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    pub sequencers: Vec<Option<SavedTrack>>,
    pub metronome: bool,
    pub tempo: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedTrack {
    pub bars: u8,
    pub input_channel: Option<u8>,
    pub output_channel: u8,
    pub quantizer: SavedQuantizer,
    pub gate_length: SavedGateLength,
    pub offset: SavedOffset,
    pub events: Vec<SavedEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedQuantizer {
    pub enabled: bool,
    pub divisor: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedGateLength {
    pub multiplier: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedOffset {
    pub offset: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedEvent {
    pub position: f64,
    pub message: SavedMessage,
}

/// Only note events are recorded into loops, so only note events persist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SavedMessage {
    NoteOn { note: u8, velocity: u8, channel: u8 },
    NoteOff { note: u8, channel: u8 },
}

impl SavedMessage {
    pub fn from_message(message: &MidiMessage) -> Option<SavedMessage> {
        match *message {
            MidiMessage::NoteOn(channel, note, velocity) => Some(SavedMessage::NoteOn {
                note: note.into(),
                velocity: velocity.into(),
                channel: channel.into(),
            }),
            MidiMessage::NoteOff(channel, note, _) => Some(SavedMessage::NoteOff {
                note: note.into(),
                channel: channel.into(),
            }),
            _ => None,
        }
    }

    pub fn to_message(&self) -> MidiMessage {
        match *self {
            SavedMessage::NoteOn { note, velocity, channel } => {
                MidiMessage::NoteOn(channel.into(), note.into(), velocity.into())
            }
            SavedMessage::NoteOff { note, channel } => {
                MidiMessage::NoteOff(channel.into(), note.into(), 0.into())
            }
        }
    }
}

/// Snapshot the whole engine.
pub fn capture(tracks: &TrackBank, tempo: &Tempo) -> SavedState {
    SavedState {
        sequencers: tracks
            .iter()
            .map(|track| Some(capture_track(&track.lock().unwrap())))
            .collect(),
        metronome: tempo.metronome_enabled(),
        tempo: tempo.bpm().round() as u32,
    }
}

fn capture_track(track: &Track) -> SavedTrack {
    SavedTrack {
        bars: track.bars(),
        input_channel: match track.input_channel {
            InputChannel::Any => None,
            InputChannel::Channel(channel) => Some(channel),
        },
        output_channel: track.output_channel,
        quantizer: SavedQuantizer {
            enabled: track.quantizer.enabled,
            divisor: track.quantizer.divisor,
        },
        gate_length: SavedGateLength { multiplier: track.gate_length.multiplier },
        offset: SavedOffset { offset: track.offset.offset },
        events: track
            .events()
            .iter()
            .filter_map(|event| {
                SavedMessage::from_message(&event.message).map(|message| SavedEvent {
                    position: event.position,
                    message,
                })
            })
            .collect(),
    }
}

/// Populate matching tracks and global settings from a snapshot.
pub fn restore(state: &SavedState, tracks: &TrackBank, tempo: &Tempo) {
    for (slot, track) in state.sequencers.iter().zip(tracks.iter()) {
        if let Some(saved) = slot {
            restore_track(saved, &mut track.lock().unwrap());
        }
    }
    tempo.set_bpm(state.tempo as f64);
    tempo.set_metronome_enabled(state.metronome);
}

fn restore_track(saved: &SavedTrack, track: &mut Track) {
    track.input_channel = match saved.input_channel {
        None => InputChannel::Any,
        Some(channel) => InputChannel::Channel(channel),
    };
    track.output_channel = saved.output_channel.clamp(1, 16);
    track.quantizer = QuantizerFilter {
        enabled: saved.quantizer.enabled,
        divisor: saved.quantizer.divisor,
    };
    track.gate_length = GateLengthFilter { multiplier: saved.gate_length.multiplier };
    track.offset = OffsetFilter { offset: saved.offset.offset };
    track.set_bars(saved.bars);
    track.set_events(
        saved
            .events
            .iter()
            .map(|event| Event::new(event.position, event.message.to_message()))
            .collect(),
    );
}

/// Owns the state file path and serializes saves and loads.
pub struct StateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> StateStore {
        StateStore { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomic save: write `<path>.tmp`, then rename over `<path>`.
    pub fn save(&self, state: &SavedState) -> Result<(), EngineError> {
        let _guard = self.lock.lock().unwrap();
        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Best-effort load: a missing file is a fresh start, an unreadable or
    /// unparsable one is logged and ignored.
    pub fn load(&self) -> Option<SavedState> {
        let _guard = self.lock.lock().unwrap();
        if !self.path.exists() {
            return None;
        }
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) => {
                warn!("[persist] cannot read {}: {err}", self.path.display());
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(state) => {
                info!("[persist] loaded {}", self.path.display());
                Some(state)
            }
            Err(err) => {
                warn!(
                    "[persist] ignoring corrupt state file {}: {err}",
                    self.path.display()
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn note_on(note: u8, velocity: u8) -> MidiMessage {
        MidiMessage::NoteOn(0.into(), note.into(), velocity.into())
    }

    fn note_off(note: u8) -> MidiMessage {
        MidiMessage::NoteOff(0.into(), note.into(), 0.into())
    }

    fn populated_bank() -> (Arc<TrackBank>, Arc<Tempo>) {
        let tracks = Arc::new(TrackBank::new());
        let tempo = Arc::new(Tempo::new(140.0));
        tempo.set_metronome_enabled(true);
        {
            let mut track = tracks.get(0).unwrap().lock().unwrap();
            track.set_bars(4);
            track.output_channel = 3;
            track.quantizer = QuantizerFilter { enabled: true, divisor: 16 };
            track.gate_length.multiplier = 0.5;
            track.offset.offset = 0.125;
            track.record(0.0);
            track.process_message(0.5, &note_on(60, 100));
            track.process_message(1.0, &note_off(60));
            track.stop_recording(1.5);
            track.stop(1.5);
            track.input_channel = InputChannel::Channel(2);
        }
        (tracks, tempo)
    }

    #[test]
    fn snapshot_round_trips() {
        let (tracks, tempo) = populated_bank();
        let state = capture(&tracks, &tempo);

        let restored_tracks = Arc::new(TrackBank::new());
        let restored_tempo = Arc::new(Tempo::default());
        restore(&state, &restored_tracks, &restored_tempo);

        assert_eq!(state, capture(&restored_tracks, &restored_tempo));
        let track = restored_tracks.get(0).unwrap().lock().unwrap();
        assert_eq!(4, track.bars());
        assert_eq!(2, track.events().len());
        assert_eq!(0.5, track.events()[0].position);
    }

    #[test]
    fn save_and_load_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let (tracks, tempo) = populated_bank();
        let state = capture(&tracks, &tempo);

        store.save(&state).unwrap();
        assert_eq!(Some(state), store.load());
        // no stray temp file
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert_eq!(None, store.load());
    }

    #[test]
    fn corrupt_file_is_ignored_and_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").unwrap();
        let store = StateStore::new(&path);
        assert_eq!(None, store.load());
        // untouched until the next user-driven save
        assert_eq!(b"{ not json".to_vec(), fs::read(&path).unwrap());
    }

    #[test]
    fn json_matches_the_declared_contract() {
        let (tracks, tempo) = populated_bank();
        let state = capture(&tracks, &tempo);
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(json["metronome"], serde_json::Value::Bool(true));
        assert_eq!(json["tempo"], serde_json::json!(140));
        let track = &json["sequencers"][0];
        assert_eq!(track["bars"], serde_json::json!(4));
        assert_eq!(track["input_channel"], serde_json::json!(2));
        assert_eq!(track["quantizer"]["divisor"], serde_json::json!(16));
        let event = &track["events"][0];
        assert_eq!(event["message"]["type"], serde_json::json!("note_on"));
        assert_eq!(event["message"]["note"], serde_json::json!(60));
    }
}
