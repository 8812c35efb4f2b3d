//! Glue between the control surface and the engine: track selection, the
//! parameter scopes, shift handling, and the snapshot-on-change policy.

use std::sync::{Arc, Mutex};

use log::error;

use midiloop_sequencer::param::{wrapping_add, GLOBAL_PARAMS, TRACK_PARAMS};
use midiloop_sequencer::persist::{self, StateStore};
use midiloop_sequencer::router::OutputRouter;
use midiloop_sequencer::scheduler::Scheduler;
use midiloop_sequencer::tempo::Tempo;
use midiloop_sequencer::track::{Track, TrackBank};

use crate::controls::ControlEvent;

/// Numbered buttons per bank.
pub const NUMBER_BUTTONS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Track,
    Global,
}

pub struct App {
    tempo: Arc<Tempo>,
    tracks: Arc<TrackBank>,
    output: Arc<OutputRouter>,
    scheduler: Scheduler,
    store: StateStore,
    selected: usize,
    bank: usize,
    scope: Scope,
    param_index: usize,
    shift: bool,
}

impl App {
    pub fn new(
        tempo: Arc<Tempo>,
        tracks: Arc<TrackBank>,
        output: Arc<OutputRouter>,
        scheduler: Scheduler,
        store: StateStore,
    ) -> App {
        App {
            tempo,
            tracks,
            output,
            scheduler,
            store,
            selected: 0,
            bank: 0,
            scope: Scope::Track,
            param_index: 0,
            shift: false,
        }
    }

    pub fn handle(&mut self, event: ControlEvent) {
        let shift = self.shift;
        if event == ControlEvent::Shift {
            self.shift = true;
            return;
        }
        self.shift = false;

        match event {
            ControlEvent::Play => {
                let position = self.tempo.position();
                let mut deferred = false;
                {
                    let mut track = self.selected_track().lock().unwrap();
                    if !track.is_running() && !track.is_start_scheduled() {
                        if shift {
                            track.start(position);
                        } else {
                            deferred = true;
                        }
                    }
                }
                if deferred {
                    self.scheduler.schedule_start(self.selected);
                }
                self.save();
            }
            ControlEvent::Stop => {
                if shift {
                    let position = self.tempo.position();
                    let messages = self.selected_track().lock().unwrap().stop(position);
                    self.output.send_all(&messages);
                } else {
                    self.scheduler.schedule_stop(self.selected);
                }
                self.save();
            }
            ControlEvent::Record => {
                let position = self.tempo.position();
                let mut deferred = false;
                {
                    let mut track = self.selected_track().lock().unwrap();
                    if track.is_recording() {
                        track.stop_recording(position);
                    } else if shift {
                        track.record(position);
                    } else {
                        deferred = true;
                    }
                }
                if deferred {
                    self.scheduler.schedule_record(self.selected);
                }
                self.save();
            }
            ControlEvent::Clear => {
                let position = self.tempo.position();
                let messages = self.selected_track().lock().unwrap().reset(position);
                self.output.send_all(&messages);
                self.save();
            }
            ControlEvent::Ok => {
                match self.scope {
                    Scope::Track => {
                        let param = TRACK_PARAMS[self.param_index];
                        param.ok(&mut self.selected_track().lock().unwrap());
                    }
                    Scope::Global => GLOBAL_PARAMS[self.param_index].ok(&self.tempo),
                }
                self.save();
            }
            ControlEvent::Scope => {
                self.scope = match self.scope {
                    Scope::Track => Scope::Global,
                    Scope::Global => Scope::Track,
                };
                self.param_index = 0;
            }
            ControlEvent::Number(n) => {
                let index = n.saturating_sub(1) as usize;
                if shift {
                    if index < self.tracks.len().div_ceil(NUMBER_BUTTONS) {
                        self.bank = index;
                    }
                } else {
                    let target = self.bank * NUMBER_BUTTONS + index;
                    if target < self.tracks.len() {
                        self.selected = target;
                    }
                }
            }
            ControlEvent::ParamTurn(delta) => {
                let count = match self.scope {
                    Scope::Track => TRACK_PARAMS.len(),
                    Scope::Global => GLOBAL_PARAMS.len(),
                };
                self.param_index =
                    wrapping_add(self.param_index as i32, delta, count as i32 - 1) as usize;
            }
            ControlEvent::ValueTurn(delta) => {
                match self.scope {
                    Scope::Track => {
                        let param = TRACK_PARAMS[self.param_index];
                        param.adjust(&mut self.selected_track().lock().unwrap(), delta);
                    }
                    Scope::Global => GLOBAL_PARAMS[self.param_index].adjust(&self.tempo, delta),
                }
                self.save();
            }
            ControlEvent::Shift => {}
        }
    }

    fn selected_track(&self) -> &Mutex<Track> {
        self.tracks
            .get(self.selected)
            .expect("selected track index is always in range")
    }

    fn save(&self) {
        let state = persist::capture(&self.tracks, &self.tempo);
        if let Err(err) = self.store.save(&state) {
            error!("[persist] save failed: {err}");
        }
    }

    /// One-line status for the terminal: transport, selection, and the
    /// parameter the encoders are pointing at.
    pub fn status(&self) -> String {
        let (transport, param) = {
            let track = self.selected_track().lock().unwrap();
            let transport = match (
                track.is_running(),
                track.is_recording(),
                track.is_start_scheduled(),
                track.is_stop_scheduled(),
            ) {
                (_, true, ..) => "REC",
                (true, _, _, true) => "PLAY>STOP",
                (true, ..) => "PLAY",
                (false, _, true, _) => "WAIT",
                _ => "IDLE",
            };
            let param = match self.scope {
                Scope::Track => {
                    let param = TRACK_PARAMS[self.param_index];
                    format!("{}={}", param.name(), param.format(&track))
                }
                Scope::Global => {
                    let param = GLOBAL_PARAMS[self.param_index];
                    format!("{}={}", param.name(), param.format(&self.tempo))
                }
            };
            (transport, param)
        };
        format!(
            "T{} bank {} {} pos {:.2} | {}",
            self.selected + 1,
            self.bank + 1,
            transport,
            self.tempo.position(),
            param
        )
    }
}
