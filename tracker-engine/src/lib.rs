//! The audio-rendering core of a chiptune tracker for emulated sound
//! hardware (SNES S-DSP, with a legacy NES 2A03 path).
//!
//! A document snapshot flows through three nested event-driven loops, each on
//! its own clock: the [`synth::OverallSynth`] render loop (chip clocks against
//! the output-sample deadline), the per-chip run loop (register writes within
//! one timer tick), and the [`sequencer`] (beats and ticks across timeline
//! frames). The render loop's contract is sample-exact output length and
//! deterministic per-clock register application; `render` never blocks,
//! allocates, or returns an error.

pub mod doc;
pub mod doc_util;
pub mod envelope;
pub mod event_queue;
pub mod mix;
pub mod sequencer;
pub mod shared_doc;
pub mod synth;
pub mod tempo;
pub mod timing;

pub use shared_doc::{DocumentSource, SharedDocument};
pub use synth::{AudioOptions, OverallSynth};
pub use timing::{GridAndBeat, SequencerTime};
