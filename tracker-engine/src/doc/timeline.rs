//! The timeline: frames (grid rows) holding per-chip-per-channel cells, each
//! cell holding pattern blocks placed on a beat range.

use crate::doc::{BeatFraction, ChipKind, RowEvent};

/// When an event plays, relative to the start of its block.
///
/// `anchor_beat` is fractional; `tick_offset` nudges the event by whole
/// sequencer ticks after beat-to-tick conversion, so a note can play slightly
/// before or after its anchor. Events are sorted by `(anchor_beat,
/// tick_offset)`; offsets that reorder events relative to later ones are not
/// errors, but playback piles the earlier event onto the later one's tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInPattern {
    pub anchor_beat: BeatFraction,
    pub tick_offset: i16,
}

impl TimeInPattern {
    #[must_use]
    pub fn beat(anchor_beat: BeatFraction) -> Self {
        Self { anchor_beat, tick_offset: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedRowEvent {
    pub time: TimeInPattern,
    pub ev: RowEvent,
}

/// A reusable chunk of events.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pattern {
    /// Sorted by `time`.
    pub events: Vec<TimedRowEvent>,
    /// If set, the pattern repeats every `loop_length` beats for the duration
    /// of its block. If unset the pattern plays once.
    pub loop_length: Option<BeatFraction>,
}

/// A pattern placed within a frame, audible on `[begin_time, end_time)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub begin_time: BeatFraction,
    pub end_time: BeatFraction,
    pub pattern: Pattern,
}

impl Block {
    #[must_use]
    pub fn new(begin_time: BeatFraction, end_time: BeatFraction, pattern: Pattern) -> Self {
        Self { begin_time, end_time, pattern }
    }
}

/// One channel's slice of a frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimelineCell {
    pub blocks: Vec<Block>,
}

impl TimelineCell {
    #[must_use]
    pub fn single(block: Block) -> Self {
        Self { blocks: vec![block] }
    }
}

/// One row of the timeline, spanning all chips and channels for `nbeats`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineFrame {
    pub nbeats: BeatFraction,
    /// `[chip][channel]`.
    pub chip_channel_cells: Vec<Vec<TimelineCell>>,
}

impl TimelineFrame {
    /// A frame with empty cells for every channel of the given chips.
    #[must_use]
    pub fn blank(chips: &[ChipKind], nbeats: BeatFraction) -> Self {
        let chip_channel_cells = chips
            .iter()
            .map(|chip| vec![TimelineCell::default(); chip.channel_count() as usize])
            .collect();
        Self { nbeats, chip_channel_cells }
    }
}
