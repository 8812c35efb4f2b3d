//! midir-backed MIDI endpoints. Two sweep threads poll port enumeration
//! once a second and hot-plug connections; each connected input gets its
//! own midir reader thread whose callback feeds the input router.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, trace};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use midiloop_sequencer::error::EngineError;
use midiloop_sequencer::router::{InputRouter, OutputEndpoint, OutputRouter};

use crate::codec;

/// Port enumeration poll interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// midir client name; our own ports are skipped during sweeps.
const CLIENT_NAME: &str = "midiloop";

struct MidirOutputEndpoint {
    name: String,
    connection: MidiOutputConnection,
}

impl OutputEndpoint for MidirOutputEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, message: &midi_types::MidiMessage) -> Result<(), EngineError> {
        let Some(bytes) = codec::encode(message) else {
            trace!("[midi_out] {}: no wire form for {message:?}", self.name);
            return Ok(());
        };
        self.connection
            .send(&bytes)
            .map_err(|err| EngineError::Send {
                endpoint: self.name.clone(),
                reason: err.to_string(),
            })
    }
}

/// Poll input ports, connecting new ones and dropping vanished ones. Each
/// connection's callback runs on its own midir reader thread.
pub fn spawn_input_sweep(router: Arc<InputRouter>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("midi-in-sweep".into())
        .spawn(move || {
            let mut connections: HashMap<String, MidiInputConnection<()>> = HashMap::new();
            loop {
                match enumerate_inputs() {
                    Ok(names) => {
                        connections.retain(|name, _| {
                            let keep = names.contains(name);
                            if !keep {
                                info!("[midi_in] disconnected {name}");
                            }
                            keep
                        });
                        for name in names {
                            if connections.contains_key(&name) {
                                continue;
                            }
                            match connect_input(&name, router.clone()) {
                                Ok(connection) => {
                                    info!("[midi_in] connected {name}");
                                    connections.insert(name, connection);
                                }
                                Err(err) => error!("[midi_in] cannot open {name}: {err:#}"),
                            }
                        }
                    }
                    Err(err) => error!("[midi_in] enumeration failed: {err:#}"),
                }
                thread::sleep(SWEEP_INTERVAL);
            }
        })
        .expect("spawning input sweep thread should succeed")
}

/// Poll output ports, keeping the output router's endpoint set in sync.
pub fn spawn_output_sweep(output: Arc<OutputRouter>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("midi-out-sweep".into())
        .spawn(move || loop {
            match enumerate_outputs() {
                Ok(names) => {
                    for name in output.endpoint_names() {
                        if !names.contains(&name) {
                            info!("[midi_out] disconnected {name}");
                            output.remove_endpoint(&name);
                        }
                    }
                    let open = output.endpoint_names();
                    for name in names {
                        if open.contains(&name) {
                            continue;
                        }
                        match connect_output(&name) {
                            Ok(endpoint) => {
                                info!("[midi_out] connected {name}");
                                output.add_endpoint(Box::new(endpoint));
                            }
                            Err(err) => error!("[midi_out] cannot open {name}: {err:#}"),
                        }
                    }
                }
                Err(err) => error!("[midi_out] enumeration failed: {err:#}"),
            }
            thread::sleep(SWEEP_INTERVAL);
        })
        .expect("spawning output sweep thread should succeed")
}

fn enumerate_inputs() -> Result<Vec<String>> {
    let probe = MidiInput::new(CLIENT_NAME).context("creating midir input client")?;
    Ok(probe
        .ports()
        .iter()
        .filter_map(|port| probe.port_name(port).ok())
        .filter(|name| !name.contains(CLIENT_NAME))
        .collect())
}

fn enumerate_outputs() -> Result<Vec<String>> {
    let probe = MidiOutput::new(CLIENT_NAME).context("creating midir output client")?;
    Ok(probe
        .ports()
        .iter()
        .filter_map(|port| probe.port_name(port).ok())
        .filter(|name| !name.contains(CLIENT_NAME))
        .collect())
}

fn connect_input(name: &str, router: Arc<InputRouter>) -> Result<MidiInputConnection<()>> {
    let mut input = MidiInput::new(CLIENT_NAME).context("creating midir input client")?;
    // we want clock and song position, which midir ignores by default
    input.ignore(Ignore::None);
    let port = input
        .ports()
        .into_iter()
        .find(|port| input.port_name(port).ok().as_deref() == Some(name))
        .with_context(|| format!("input port {name} vanished"))?;
    let port_name = name.to_string();
    input
        .connect(
            &port,
            CLIENT_NAME,
            move |_timestamp, bytes, _| match codec::decode(bytes) {
                Some(message) => router.handle_message(&port_name, message),
                None => trace!("[midi_in] {port_name}: undecodable {bytes:02x?}"),
            },
            (),
        )
        .map_err(|err| anyhow::anyhow!("connecting {name}: {err}"))
}

fn connect_output(name: &str) -> Result<MidirOutputEndpoint> {
    let output = MidiOutput::new(CLIENT_NAME).context("creating midir output client")?;
    let port = output
        .ports()
        .into_iter()
        .find(|port| output.port_name(port).ok().as_deref() == Some(name))
        .with_context(|| format!("output port {name} vanished"))?;
    let connection = output
        .connect(&port, CLIENT_NAME)
        .map_err(|err| anyhow::anyhow!("connecting {name}: {err}"))?;
    Ok(MidirOutputEndpoint { name: name.to_string(), connection })
}

/// `--list-ports`: print what is reachable right now.
pub fn list_ports() -> Result<()> {
    println!("inputs:");
    for name in enumerate_inputs()? {
        println!("  {name}");
    }
    println!("outputs:");
    for name in enumerate_outputs()? {
        println!("  {name}");
    }
    Ok(())
}
