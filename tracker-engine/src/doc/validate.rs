//! Document validation. Gathers warnings for the loader/GUI to display; the
//! renderer itself never re-validates and copes with every condition listed
//! here (skipping samples, piling up misordered events, silencing voices).

use crate::doc::{Document, MAX_NCHIP};
use crate::synth::spc700::SAMPLE_DATA_BASE;
use num::Zero;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationWarning {
    #[error("chips: expected 1..={MAX_NCHIP} chips, found {0}")]
    ChipCount(usize),
    #[error("samples[{0}].brr is empty")]
    BrrEmpty(usize),
    #[error("samples[{0}].brr.len() = {1} is not a multiple of 9")]
    BrrSizeNotBlockAligned(usize, usize),
    #[error("samples[{0}].loop_byte = {1} is not below brr.len() = {2}")]
    LoopByteOutOfRange(usize, u32, usize),
    #[error("samples[{0}].loop_byte = {1} is not a multiple of 9")]
    LoopByteNotBlockAligned(usize, u32),
    #[error("samples do not fit in audio RAM ({0} bytes needed, {1} available)")]
    SampleMemoryOverflow(usize, usize),
    #[error("instruments[{0}].keysplit is empty")]
    KeysplitEmpty(usize),
    #[error("instruments[{0}].keysplit is not sorted by min_note (entry {1})")]
    KeysplitOutOfOrder(usize, usize),
    #[error("timeline[{0}].nbeats must be positive")]
    FrameNotPositive(usize),
    #[error("timeline[{grid}] chip {chip} channel {channel}: block {block} has begin >= end")]
    BlockEmpty { grid: usize, chip: usize, channel: usize, block: usize },
    #[error("timeline[{grid}] chip {chip} channel {channel}: block {block} extends past the frame")]
    BlockPastFrameEnd { grid: usize, chip: usize, channel: usize, block: usize },
    #[error(
        "timeline[{grid}] chip {chip} channel {channel}: block {block} event {event} \
         has an out-of-range anchor beat"
    )]
    AnchorBeatOutOfRange { grid: usize, chip: usize, channel: usize, block: usize, event: usize },
    #[error(
        "timeline[{grid}] chip {chip} channel {channel}: block {block} event {event} \
         is out of order and will pile up during playback"
    )]
    MisorderedEvent { grid: usize, chip: usize, channel: usize, block: usize, event: usize },
    #[error(
        "timeline[{grid}] chip {chip} channel {channel}: block {block} event {event} \
         uses more effects than the channel has columns"
    )]
    TooManyEffects { grid: usize, chip: usize, channel: usize, block: usize, event: usize },
}

/// Check every invariant the data model documents as "warning, not error".
#[must_use]
pub fn validate_document(doc: &Document) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if doc.chips.is_empty() || doc.chips.len() > MAX_NCHIP {
        warnings.push(ValidationWarning::ChipCount(doc.chips.len()));
    }

    validate_samples(doc, &mut warnings);
    validate_instruments(doc, &mut warnings);
    validate_timeline(doc, &mut warnings);

    warnings
}

fn validate_samples(doc: &Document, warnings: &mut Vec<ValidationWarning>) {
    let mut aram_needed = SAMPLE_DATA_BASE;

    for (idx, sample) in doc.samples.iter().enumerate() {
        let Some(sample) = sample else { continue };

        if sample.brr.is_empty() {
            warnings.push(ValidationWarning::BrrEmpty(idx));
            continue;
        }
        if sample.brr.len() % 9 != 0 {
            warnings.push(ValidationWarning::BrrSizeNotBlockAligned(idx, sample.brr.len()));
        }
        if sample.loop_byte as usize >= sample.brr.len() {
            warnings.push(ValidationWarning::LoopByteOutOfRange(
                idx,
                sample.loop_byte,
                sample.brr.len(),
            ));
        }
        if sample.loop_byte % 9 != 0 {
            warnings.push(ValidationWarning::LoopByteNotBlockAligned(idx, sample.loop_byte));
        }

        aram_needed += sample.brr.len();
    }

    if aram_needed > sdsp_emu::AUDIO_RAM_LEN {
        warnings
            .push(ValidationWarning::SampleMemoryOverflow(aram_needed, sdsp_emu::AUDIO_RAM_LEN));
    }
}

fn validate_instruments(doc: &Document, warnings: &mut Vec<ValidationWarning>) {
    for (idx, instrument) in doc.instruments.iter().enumerate() {
        let Some(instrument) = instrument else { continue };

        if instrument.keysplit.is_empty() {
            warnings.push(ValidationWarning::KeysplitEmpty(idx));
        }
        for (entry, pair) in instrument.keysplit.windows(2).enumerate() {
            if pair[0].min_note >= pair[1].min_note {
                warnings.push(ValidationWarning::KeysplitOutOfOrder(idx, entry + 1));
            }
        }
    }
}

fn validate_timeline(doc: &Document, warnings: &mut Vec<ValidationWarning>) {
    for (grid, frame) in doc.timeline.iter().enumerate() {
        if frame.nbeats <= num::rational::Ratio::zero() {
            warnings.push(ValidationWarning::FrameNotPositive(grid));
        }

        for (chip, channels) in frame.chip_channel_cells.iter().enumerate() {
            for (channel, cell) in channels.iter().enumerate() {
                validate_cell(doc, grid, chip, channel, cell, frame.nbeats, warnings);
            }
        }
    }
}

fn validate_cell(
    doc: &Document,
    grid: usize,
    chip: usize,
    channel: usize,
    cell: &crate::doc::TimelineCell,
    nbeats: crate::doc::BeatFraction,
    warnings: &mut Vec<ValidationWarning>,
) {
    let n_effect_col = doc
        .chip_channel_settings
        .get(chip)
        .and_then(|channels| channels.get(channel))
        .map_or(1, |settings| settings.n_effect_col);

    for (block_idx, block) in cell.blocks.iter().enumerate() {
        if block.begin_time >= block.end_time {
            warnings.push(ValidationWarning::BlockEmpty { grid, chip, channel, block: block_idx });
        }
        if block.end_time > nbeats {
            warnings.push(ValidationWarning::BlockPastFrameEnd {
                grid,
                chip,
                channel,
                block: block_idx,
            });
        }

        let span = block.pattern.loop_length.unwrap_or(block.end_time - block.begin_time);
        let mut prev_time = None;
        for (event_idx, event) in block.pattern.events.iter().enumerate() {
            let time = event.time;
            if time.anchor_beat < num::rational::Ratio::zero() || time.anchor_beat >= span {
                warnings.push(ValidationWarning::AnchorBeatOutOfRange {
                    grid,
                    chip,
                    channel,
                    block: block_idx,
                    event: event_idx,
                });
            }
            if prev_time.is_some_and(|prev: crate::doc::TimeInPattern| {
                (time.anchor_beat, time.tick_offset) < (prev.anchor_beat, prev.tick_offset)
            }) {
                warnings.push(ValidationWarning::MisorderedEvent {
                    grid,
                    chip,
                    channel,
                    block: block_idx,
                    event: event_idx,
                });
            }
            prev_time = Some(time);

            let n_effects = event.ev.effects.iter().filter(|effect| effect.is_some()).count();
            if n_effects > usize::from(n_effect_col) {
                warnings.push(ValidationWarning::TooManyEffects {
                    grid,
                    chip,
                    channel,
                    block: block_idx,
                    event: event_idx,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{
        brr_header, Adsr, BeatFraction, ChipKind, Instrument, InstrumentPatch, Note, Sample,
        SampleTuning,
    };
    use crate::doc_util;

    fn doc_with_sample(brr: Vec<u8>, loop_byte: u32) -> Document {
        let mut doc = Document::new(vec![ChipKind::Spc700]);
        doc.samples[0] = Some(Sample {
            name: "test".to_owned(),
            brr,
            loop_byte,
            tuning: SampleTuning { sample_rate: 32000, root_key: 69, detune_cents: 0 },
        });
        doc
    }

    #[test]
    fn clean_document_has_no_warnings() {
        let doc = doc_util::single_note_document(Note(60), Adsr::INFINITE);
        assert_eq!(validate_document(&doc), vec![]);
    }

    #[test]
    fn misaligned_brr_warns() {
        let doc = doc_with_sample(vec![brr_header(0, 0, true, true), 0, 0], 0);
        let warnings = validate_document(&doc);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::BrrSizeNotBlockAligned(0, 3))));
    }

    #[test]
    fn loop_byte_out_of_range_warns() {
        let mut brr = vec![0; 9];
        brr[0] = brr_header(0, 0, true, true);
        let doc = doc_with_sample(brr, 9);
        let warnings = validate_document(&doc);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::LoopByteOutOfRange(0, 9, 9))));
    }

    #[test]
    fn unsorted_keysplit_warns() {
        let mut doc = Document::new(vec![ChipKind::Spc700]);
        doc.instruments[0] = Some(Instrument {
            name: "bad".to_owned(),
            keysplit: vec![
                InstrumentPatch { min_note: 60, sample_idx: 0, adsr: Adsr::INFINITE },
                InstrumentPatch { min_note: 48, sample_idx: 0, adsr: Adsr::INFINITE },
            ],
        });
        let warnings = validate_document(&doc);
        assert!(warnings.iter().any(|w| matches!(w, ValidationWarning::KeysplitOutOfOrder(0, 1))));
    }

    #[test]
    fn misordered_events_warn() {
        let mut doc = doc_util::single_note_document(Note(60), Adsr::INFINITE);
        let cell = &mut doc.timeline[0].chip_channel_cells[0][0];
        let pattern = &mut cell.blocks[0].pattern;
        pattern.events.push(crate::doc::TimedRowEvent {
            time: crate::doc::TimeInPattern::beat(BeatFraction::new(1, 1)),
            ev: crate::doc::RowEvent::note(Note(62)),
        });
        pattern.events.push(crate::doc::TimedRowEvent {
            time: crate::doc::TimeInPattern::beat(BeatFraction::new(1, 2)),
            ev: crate::doc::RowEvent::note(Note(64)),
        });

        let warnings = validate_document(&doc);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::MisorderedEvent { event: 2, .. })));
    }
}
