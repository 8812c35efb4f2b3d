//! midiloop: a multi-track live MIDI looper. Records from every reachable
//! MIDI input into per-track loops and replays them to every reachable
//! output, following an internal clock or an external MIDI clock.

mod app;
mod codec;
mod controls;
mod metronome;
mod midi_io;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use midiloop_sequencer::clock;
use midiloop_sequencer::persist::{self, StateStore};
use midiloop_sequencer::router::{InputRouter, OutputRouter};
use midiloop_sequencer::scheduler::Scheduler;
use midiloop_sequencer::tempo::Tempo;
use midiloop_sequencer::track::TrackBank;
use midiloop_sequencer::{MAX_BPM, MIN_BPM};

use crate::app::App;

#[derive(Parser, Debug)]
#[command(name = "midiloop", about = "multi-track live MIDI looper")]
struct Args {
    /// State file, snapshotted on every state-changing control
    #[arg(long, default_value = "state.json")]
    state: PathBuf,

    /// Initial tempo in BPM (overridden by a loaded state file)
    #[arg(long, default_value_t = 120.0)]
    bpm: f64,

    /// Directory holding metronome.wav and metronome_b.wav
    #[arg(long, default_value = "assets")]
    assets: PathBuf,

    /// Run without metronome audio
    #[arg(long)]
    no_metronome: bool,

    /// List MIDI ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_ports {
        return midi_io::list_ports();
    }
    if !(MIN_BPM..=MAX_BPM).contains(&args.bpm) {
        anyhow::bail!("bpm must be in {MIN_BPM}..={MAX_BPM}");
    }

    let tempo = Arc::new(Tempo::new(args.bpm));
    let tracks = Arc::new(TrackBank::new());
    let output = Arc::new(OutputRouter::new());
    let router = Arc::new(InputRouter::new(
        tempo.clone(),
        tracks.clone(),
        output.clone(),
    ));

    let store = StateStore::new(&args.state);
    if let Some(state) = store.load() {
        persist::restore(&state, &tracks, &tempo);
    }

    let _metronome = if args.no_metronome {
        None
    } else {
        let (cue_tx, cue_rx) = crossbeam_channel::unbounded();
        match metronome::start(&args.assets, cue_rx) {
            Ok(metronome) => {
                router.set_metronome_sink(cue_tx);
                Some(metronome)
            }
            Err(err) => {
                warn!("[metronome] disabled: {err:#}");
                None
            }
        }
    };

    let scheduler = Scheduler::start(tempo.clone(), tracks.clone(), output.clone());
    midi_io::spawn_input_sweep(router.clone());
    midi_io::spawn_output_sweep(output.clone());
    clock::spawn_internal_clock(router.clone());
    info!("[main] running at {} bpm", tempo.bpm());

    let mut app = App::new(
        tempo.clone(),
        tracks.clone(),
        output.clone(),
        scheduler,
        store,
    );
    println!("{}", controls::HELP);
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim() == "q" {
            break;
        }
        for event in controls::parse_line(&line) {
            app.handle(event);
        }
        println!("{}", app.status());
    }

    // every held note gets its note-off before the endpoints go away
    let position = tempo.position();
    for track in tracks.iter() {
        let messages = track.lock().unwrap().stop(position);
        output.send_all(&messages);
    }
    Ok(())
}
