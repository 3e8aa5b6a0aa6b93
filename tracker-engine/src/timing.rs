//! Shared time units: chip clocks, sequencer ticks, and musical positions.

use crate::doc::BeatFraction;

/// A duration or timestamp in chip clocks.
pub type ClockT = u32;

/// A duration or timestamp in sequencer ticks. Signed because the sequencer
/// works with tick offsets relative to "now".
pub type TickT = i32;

/// A count of output or native audio samples.
pub type NsampT = u32;

/// Nominal S-DSP sampling rate, used when computing tuning tables and tempos.
/// The user changing the emulated sampling rate should not affect how the
/// driver computes pitches and timers, since that would introduce a source of
/// behavioral discrepancies.
pub const SAMPLES_PER_S_IDEAL: NsampT = 32040;

/// SPC output runs at 32-ish kHz, the SPC clock at 1024-ish kHz.
pub const CLOCKS_PER_SAMPLE: ClockT = 32;
pub const CLOCKS_PER_S_IDEAL: ClockT = CLOCKS_PER_SAMPLE * SAMPLES_PER_S_IDEAL;

/// A position in the timeline: frame (grid row) index plus a fractional beat
/// within the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridAndBeat {
    pub grid: u32,
    pub beat: BeatFraction,
}

impl GridAndBeat {
    #[must_use]
    pub fn new(grid: u32, beat: BeatFraction) -> Self {
        Self { grid, beat }
    }
}

/// The sequencer position of the tick that just occurred, reported to the GUI
/// for the playback cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerTime {
    pub grid: u32,
    pub ticks_per_beat: TickT,
    pub beat: i32,
    pub tick: TickT,
}
