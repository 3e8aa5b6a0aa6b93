//! The document data model: everything the renderer needs to play a module.
//!
//! Documents are immutable snapshots. The GUI builds a new `Document` (or
//! clones and edits the current one) and publishes it atomically through
//! [`crate::shared_doc::SharedDocument`]; the audio thread only ever reads.

pub mod events;
pub mod instrument;
pub mod sample;
pub mod timeline;
pub mod validate;

use crate::timing::TickT;
use num::rational::Ratio;

pub use events::{Effect, EffectList, Note, RowEvent, MAX_EFFECTS_PER_EVENT};
pub use instrument::{find_patch, Adsr, Instrument, InstrumentPatch};
pub use sample::{brr_header, Sample, SampleTuning, BRR_BLOCK_SIZE};
pub use timeline::{Block, Pattern, TimeInPattern, TimedRowEvent, TimelineCell, TimelineFrame};

/// Fractional musical time, in beats.
pub type BeatFraction = Ratio<i64>;

/// Round a beat fraction to the nearest integer, halves away from zero.
#[must_use]
pub fn round_to_int(frac: BeatFraction) -> i64 {
    frac.round().to_integer()
}

pub type ChipIndex = u32;
pub type ChannelIndex = u32;
pub type InstrumentIndex = u8;
pub type SampleIndex = u8;

pub const MAX_NCHIP: usize = 100;
pub const MAX_SAMPLES: usize = 256;
pub const MAX_INSTRUMENTS: usize = 256;

/// List of sound chips supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipKind {
    Nes2A03,
    Spc700,
}

impl ChipKind {
    #[must_use]
    pub fn channel_count(self) -> ChannelIndex {
        match self {
            // Pulse 1/2; the triangle/noise/DPCM half is not driven
            Self::Nes2A03 => 2,
            Self::Spc700 => 8,
        }
    }
}

/// Per-channel GUI/driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// How many effect columns are visible/editable for this channel.
    pub n_effect_col: u8,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self { n_effect_col: 1 }
    }
}

/// Tempo-related options.
///
/// The sequencer advances on S-SMP timer ticks. The timer fires every
/// `128 * spc_timer_period` clocks; each firing adds an 8.8 fixed-point tempo
/// byte to an accumulator, and the sequencer advances one tick per overflow.
/// See [`crate::tempo`] for the byte computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencerOptions {
    /// Musical tempo in beats per minute.
    pub target_tempo: f64,
    /// S-SMP timer divisor, 1..=256 on hardware.
    pub spc_timer_period: u32,
    /// Sequencer ticks per musical beat.
    pub ticks_per_beat: TickT,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self { target_tempo: 120.0, spc_timer_period: 64, ticks_per_beat: 48 }
    }
}

/// Hz for each MIDI note.
pub type FrequencyTable = [f64; 128];

/// 12-tone equal temperament tuned to A440.
#[must_use]
pub fn equal_temperament() -> FrequencyTable {
    std::array::from_fn(|note| 440.0 * 2.0_f64.powf((note as f64 - 69.0) / 12.0))
}

#[derive(Debug, Clone)]
pub struct Document {
    /// Active sound chips, in channel order. Length 1..=MAX_NCHIP.
    pub chips: Vec<ChipKind>,
    /// `[chip][channel]` settings; outer length matches `chips`.
    pub chip_channel_settings: Vec<Vec<ChannelSettings>>,
    /// 256 sample slots.
    pub samples: Vec<Option<Sample>>,
    /// 256 instrument slots.
    pub instruments: Vec<Option<Instrument>>,
    pub timeline: Vec<TimelineFrame>,
    pub sequencer_options: SequencerOptions,
    pub frequency_table: FrequencyTable,
}

impl Document {
    /// An empty document with the given chip lineup and a single blank
    /// 16-beat timeline frame.
    #[must_use]
    pub fn new(chips: Vec<ChipKind>) -> Self {
        assert!(!chips.is_empty() && chips.len() <= MAX_NCHIP);

        let chip_channel_settings = chips
            .iter()
            .map(|chip| vec![ChannelSettings::default(); chip.channel_count() as usize])
            .collect();
        let timeline = vec![TimelineFrame::blank(&chips, BeatFraction::from_integer(16))];

        Self {
            chips,
            chip_channel_settings,
            samples: vec![None; MAX_SAMPLES],
            instruments: vec![None; MAX_INSTRUMENTS],
            timeline,
            sequencer_options: SequencerOptions::default(),
            frequency_table: equal_temperament(),
        }
    }

    #[must_use]
    pub fn chip_channel_count(&self, chip: ChipIndex) -> ChannelIndex {
        self.chips[chip as usize].channel_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_temperament_reference_points() {
        let table = equal_temperament();
        assert!((table[69] - 440.0).abs() < 1e-9);
        assert!((table[57] - 220.0).abs() < 1e-9);
        assert!((table[60] - 261.6256).abs() < 1e-3);
    }

    #[test]
    fn round_to_int_rounds_half_up() {
        assert_eq!(round_to_int(BeatFraction::new(1, 2)), 1);
        assert_eq!(round_to_int(BeatFraction::new(1, 3)), 0);
        assert_eq!(round_to_int(BeatFraction::new(5, 2)), 3);
    }

    #[test]
    fn new_document_shape() {
        let doc = Document::new(vec![ChipKind::Spc700, ChipKind::Nes2A03]);
        assert_eq!(doc.chip_channel_settings[0].len(), 8);
        assert_eq!(doc.chip_channel_settings[1].len(), 2);
        assert_eq!(doc.samples.len(), MAX_SAMPLES);
        assert_eq!(doc.timeline.len(), 1);
    }
}
