//! Builders for samples, instruments, and small documents, used by tests and
//! the demo/preview paths.

use crate::doc::{
    brr_header, Adsr, BeatFraction, Block, ChipKind, Document, Instrument, Note, Pattern, RowEvent,
    Sample, SampleTuning, TimeInPattern, TimedRowEvent, TimelineCell,
};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

pub const A440_MIDI: u8 = 69;

/// Build an unlooped/looped square wave with the given duty numerator out of 8.
/// One 16-sample period per wavelength, so `sample_rate = 16 * freq`.
fn pulse(name: &str, duty_out_of_8: usize) -> Sample {
    let mut brr = Vec::with_capacity(9);

    brr.push(brr_header(11, 0, true, true));
    for byte_idx in 0..8 {
        let mut byte = 0_u8;
        for nibble_idx in 0..2 {
            let sample_idx = 2 * byte_idx + nibble_idx;
            // +7 for the high part of the duty cycle, -7 for the rest
            let nibble: u8 = if sample_idx < 2 * duty_out_of_8 { 0x7 } else { 0x9 };
            byte = (byte << 4) | nibble;
        }
        brr.push(byte);
    }

    Sample {
        name: name.to_owned(),
        brr,
        loop_byte: 0,
        tuning: SampleTuning { sample_rate: 440 * 16, root_key: A440_MIDI, detune_cents: 0 },
    }
}

#[must_use]
pub fn pulse_12_5() -> Sample {
    pulse("pulse 12.5%", 1)
}

#[must_use]
pub fn pulse_25() -> Sample {
    pulse("pulse 25%", 2)
}

#[must_use]
pub fn pulse_50() -> Sample {
    pulse("pulse 50%", 4)
}

/// A 16-sample triangle wave, looped forever.
#[must_use]
pub fn triangle() -> Sample {
    let mut brr = Vec::with_capacity(9);
    brr.push(brr_header(11, 0, true, true));

    // 0 4 7 4 0 -4 -7 -4 ... as signed nibbles, two per byte
    let wave: [i8; 16] = [0, 2, 4, 6, 7, 6, 4, 2, 0, -2, -4, -6, -7, -6, -4, -2];
    for pair in wave.chunks_exact(2) {
        let hi = (pair[0] as u8) & 0x0F;
        let lo = (pair[1] as u8) & 0x0F;
        brr.push((hi << 4) | lo);
    }

    Sample {
        name: "triangle".to_owned(),
        brr,
        loop_byte: 0,
        tuning: SampleTuning { sample_rate: 440 * 16, root_key: A440_MIDI, detune_cents: 0 },
    }
}

/// 128 samples of looped pseudo-random noise. Deterministically seeded so
/// renders are reproducible.
#[must_use]
pub fn periodic_noise() -> Sample {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut brr = Vec::with_capacity(8 * 9);

    // 128 samples / 16 samples per block = 8 blocks
    const NBLOCK: usize = 8;
    for block in 0..NBLOCK {
        let last = block + 1 == NBLOCK;
        brr.push(brr_header(11, 0, last, last));
        for _ in 0..8 {
            brr.push(rng.random());
        }
    }

    Sample {
        name: "periodic noise".to_owned(),
        brr,
        loop_byte: 0,
        tuning: SampleTuning { sample_rate: 440 * 128, root_key: A440_MIDI, detune_cents: 0 },
    }
}

#[must_use]
pub fn music_box(sample_idx: u8) -> Instrument {
    Instrument::single("Music Box", sample_idx, Adsr::MUSIC_BOX)
}

/// A one-chip document playing a single note at beat 0 of a 16-beat frame,
/// with a pulse sample in slot 0 and an instrument in slot 0.
#[must_use]
pub fn single_note_document(note: Note, adsr: Adsr) -> Document {
    let mut doc = Document::new(vec![ChipKind::Spc700]);
    doc.samples[0] = Some(pulse_50());
    doc.instruments[0] = Some(Instrument::single("pulse", 0, adsr));

    let nbeats = doc.timeline[0].nbeats;
    doc.timeline[0].chip_channel_cells[0][0] = TimelineCell::single(Block::new(
        BeatFraction::from_integer(0),
        nbeats,
        Pattern {
            events: vec![TimedRowEvent {
                time: TimeInPattern::beat(BeatFraction::from_integer(0)),
                ev: RowEvent::note_instr(note, 0),
            }],
            loop_length: None,
        },
    ));

    doc
}

/// Like [`single_note_document`] but with a second note (and a second
/// instrument) `gap_beats` later.
#[must_use]
pub fn two_note_document(first: Note, second: Note, gap_beats: i64) -> Document {
    let mut doc = single_note_document(first, Adsr::INFINITE);
    doc.samples[1] = Some(triangle());
    doc.instruments[1] = Some(Instrument::single("triangle", 1, Adsr::INFINITE));

    let cell = &mut doc.timeline[0].chip_channel_cells[0][0];
    cell.blocks[0].pattern.events.push(TimedRowEvent {
        time: TimeInPattern::beat(BeatFraction::from_integer(gap_beats)),
        ev: RowEvent::note_instr(second, 1),
    });

    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::BRR_BLOCK_SIZE;

    #[test]
    fn samples_are_well_formed() {
        for sample in [pulse_12_5(), pulse_25(), pulse_50(), triangle(), periodic_noise()] {
            assert!(!sample.brr.is_empty(), "{}", sample.name);
            assert_eq!(sample.brr.len() % BRR_BLOCK_SIZE, 0, "{}", sample.name);
            assert!((sample.loop_byte as usize) < sample.brr.len(), "{}", sample.name);
        }
    }

    #[test]
    fn pulse_50_has_equal_halves() {
        let sample = pulse_50();
        // Header, then 4 bytes of +7 nibbles, then 4 bytes of -7 nibbles
        assert_eq!(sample.brr[1], 0x77);
        assert_eq!(sample.brr[4], 0x77);
        assert_eq!(sample.brr[5], 0x99);
        assert_eq!(sample.brr[8], 0x99);
    }

    #[test]
    fn noise_is_deterministic() {
        assert_eq!(periodic_noise().brr, periodic_noise().brr);
    }
}
