//! Metronome click playback. Cues arrive on a channel from the clock path;
//! the strong sample marks bar starts. Samples are loaded from wav files
//! once and mixed into a cpal output stream.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{ensure, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::Receiver;
use hound::SampleFormat as WavFormat;
use log::error;

use midiloop_sequencer::tempo::MetronomeCue;

struct Playback {
    samples: Arc<Vec<f32>>,
    offset: usize,
}

/// Keeps the stream alive for as long as the metronome should play.
pub struct Metronome {
    _stream: cpal::Stream,
}

pub fn start(assets_dir: &Path, cues: Receiver<MetronomeCue>) -> Result<Metronome> {
    let weak = load_sample(&assets_dir.join("metronome.wav"))?;
    let strong = load_sample(&assets_dir.join("metronome_b.wav"))?;

    let playing: Arc<Mutex<Option<Playback>>> = Arc::new(Mutex::new(None));

    {
        let playing = playing.clone();
        thread::Builder::new()
            .name("metronome".into())
            .spawn(move || {
                for cue in cues {
                    let samples = match cue {
                        MetronomeCue::Strong => strong.clone(),
                        MetronomeCue::Weak => weak.clone(),
                    };
                    *playing.lock().unwrap() = Some(Playback { samples, offset: 0 });
                }
            })
            .expect("spawning metronome thread should succeed");
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no audio output device")?;
    let config = device.default_output_config().context("no output config")?;
    ensure!(
        config.sample_format() == SampleFormat::F32,
        "unsupported output sample format {:?}",
        config.sample_format()
    );
    let channels = config.channels() as usize;

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _| fill(data, channels, &playing),
            |err| error!("[metronome] stream error: {err}"),
            None,
        )
        .context("building output stream")?;
    stream.play().context("starting output stream")?;

    Ok(Metronome { _stream: stream })
}

fn fill(data: &mut [f32], channels: usize, playing: &Mutex<Option<Playback>>) {
    data.fill(0.0);
    let mut playing = playing.lock().unwrap();
    if let Some(playback) = playing.as_mut() {
        for frame in data.chunks_mut(channels) {
            if playback.offset >= playback.samples.len() {
                break;
            }
            let sample = playback.samples[playback.offset];
            for out in frame {
                *out = sample;
            }
            playback.offset += 1;
        }
        if playback.offset >= playback.samples.len() {
            *playing = None;
        }
    }
}

/// Load a wav file as mono f32 samples.
fn load_sample(path: &Path) -> Result<Arc<Vec<f32>>> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let interleaved: Vec<f32> = match spec.sample_format {
        WavFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        WavFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok(Arc::new(mono))
}
