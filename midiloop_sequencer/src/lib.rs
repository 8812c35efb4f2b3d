//! Core engine for a multi-track, loop-oriented live MIDI sequencer.
//! Records incoming notes into fixed-length per-track loops, filters them
//! (quantize, gate length, offset) and re-emits them in lock-step with a
//! 24 PPQN clock that is either an internal timer or a slaved external
//! MIDI clock.
//!
//! The engine does no port I/O of its own: MIDI arrives through
//! [`router::InputRouter::handle_message`] and leaves through
//! [`router::OutputEndpoint`] implementations registered with the
//! [`router::OutputRouter`]. Everything that needs musical time takes the
//! current tempo position as a plain argument, which keeps the whole crate
//! runnable under `cargo test` with no hardware attached.

pub mod clock;
pub mod error;
pub mod event;
pub mod filter;
pub mod param;
pub mod persist;
pub mod router;
pub mod scheduler;
pub mod tempo;
pub mod track;

pub use error::EngineError;
pub use event::Event;
pub use tempo::{MetronomeCue, Tempo};
pub use track::{InputChannel, Track, TrackBank};

/// Number of tracks in the bank. Tracks live for the process lifetime.
pub const TRACK_COUNT: usize = 8;

/// MIDI clock pulses per quarter note.
pub const PPQN: u32 = 24;

/// Beats per bar. Positions, loop lengths and the scheduler all assume 4/4.
pub const BEATS_PER_BAR: f64 = 4.0;

pub const MIN_BPM: f64 = 60.0;
pub const MAX_BPM: f64 = 200.0;
pub const DEFAULT_BPM: f64 = 120.0;

pub const MIN_BARS: u8 = 1;
pub const MAX_BARS: u8 = 16;
pub const DEFAULT_BARS: u8 = 2;
