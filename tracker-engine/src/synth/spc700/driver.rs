//! The S-DSP software driver: converts row events into register writes,
//! manages the sample directory in audio RAM, and keeps per-voice state.
//!
//! Data-shape problems (missing instruments, unloaded samples, corrupt BRR)
//! are warnings: the offending voice is silenced and rendering continues.
//! Effect columns are carried in the document but no S-DSP effects are
//! defined yet; drivers skip them.

use crate::doc::{find_patch, Document, Note, RowEvent, SampleTuning};
use crate::synth::registers::{Address, RegisterWriteQueue};
use crate::synth::spc700::synth::Spc700Synth;
use crate::timing::{ClockT, SAMPLES_PER_S_IDEAL};
use sdsp_emu::registers as r;
use sdsp_emu::AUDIO_RAM_LEN;

/// The fixed 256-entry sample directory lives here; each entry is 2 bytes of
/// start address plus 2 bytes of loop address, little endian.
pub const SAMPLE_DIR: usize = 0x100;

const SAMPLE_DIR_ENTRY_SIZE: usize = 4;

/// Sample data is packed sequentially from the end of the directory.
pub const SAMPLE_DATA_BASE: usize = SAMPLE_DIR + 256 * SAMPLE_DIR_ENTRY_SIZE;

/// For some registers we must wait two full samples of clocks so the S-DSP
/// has seen and processed the write (it latches them every other sample).
const CLOCKS_PER_TWO_SAMPLES: ClockT = 64;

/// Volume 0x20 out of [-128, 127] is an acceptable default; 0x40 clips when
/// many channels play at once.
const DEFAULT_VOICE_VOLUME: u8 = 0x20;

const CENTS_PER_OCTAVE: f64 = 1200.;

/// The 14-bit pitch register: `0x1000` plays the sample at the nominal rate,
/// scaled by the sample's recorded rate, its detune, and the note's frequency
/// relative to the sample's root key. Out-of-range values clamp rather than
/// wrapping modulo 0x4000.
fn calc_tuning(freq_table: &[f64; 128], tuning: &SampleTuning, note: Note) -> u16 {
    let mut tuning_reg = f64::from(tuning.sample_rate) / f64::from(SAMPLES_PER_S_IDEAL) * 4096.;

    tuning_reg *= (f64::from(tuning.detune_cents) / CENTS_PER_OCTAVE).exp2();

    // The frequency table detunes notes, allowing custom tuning schemes
    // (though not microtonal scales unmapped from the chromatic one)
    tuning_reg *= freq_table[note.0 as usize] / freq_table[tuning.root_key as usize];

    tuning_reg.clamp(0., 16383.).round() as u16
}

/// Address of per-voice register `v_reg` for this channel.
fn calc_voice_reg(channel_id: u8, v_reg: u8) -> Address {
    debug_assert!(v_reg <= r::V_OUTX);
    Address::from(r::voice_base(channel_id) + v_reg)
}

/// Key-on/key-off bits accumulated across all channels within one tick.
#[derive(Debug, Clone, Copy, Default)]
struct Spc700ChipFlags {
    kon: u8,
    koff: u8,
}

#[derive(Debug, Clone)]
struct Spc700ChannelDriver {
    channel_id: u8,
    prev_instr: Option<u8>,
    prev_note: Note,
    note_playing: bool,
}

impl Spc700ChannelDriver {
    fn new(channel_id: u8) -> Self {
        Self { channel_id, prev_instr: None, prev_note: Note(0), note_playing: false }
    }

    /// Write this voice's sample, ADSR, and pitch registers for `note`.
    /// Returns false (leaving the voice untouched) when the note cannot be
    /// resolved to a loaded sample.
    fn try_play_note(
        &self,
        doc: &Document,
        samples_valid: &[bool; 256],
        note: Note,
        regs: &mut RegisterWriteQueue,
    ) -> bool {
        let Some(instr_idx) = self.prev_instr else {
            log::warn!("channel {}: cannot play note, no instrument set", self.channel_id);
            return false;
        };

        let Some(instrument) = &doc.instruments[instr_idx as usize] else {
            log::warn!(
                "channel {}: cannot play note, instrument {instr_idx:02X} does not exist",
                self.channel_id
            );
            return false;
        };

        let Some(patch) = find_patch(&instrument.keysplit, note.0) else {
            log::warn!(
                "channel {}: instrument {instr_idx:02X} has no patch covering note {}",
                self.channel_id,
                note.0
            );
            return false;
        };

        // The sample may be missing from ARAM (absent from the document, or
        // skipped because ARAM was full)
        if !samples_valid[patch.sample_idx as usize] {
            log::warn!(
                "channel {}: sample {:02X} is not loaded, silencing note {}",
                self.channel_id,
                patch.sample_idx,
                note.0
            );
            return false;
        }

        let Some(sample) = &doc.samples[patch.sample_idx as usize] else {
            // A loaded sample should exist in the document; tolerate state
            // propagation bugs instead of crashing the audio thread
            log::warn!(
                "channel {}: sample {:02X} loaded but missing from document",
                self.channel_id,
                patch.sample_idx
            );
            return false;
        };

        if sample.tuning.root_key >= 0x80 {
            log::warn!(
                "channel {}: sample {:02X} has invalid root key {}",
                self.channel_id,
                patch.sample_idx,
                sample.tuning.root_key
            );
            return false;
        }

        regs.write(calc_voice_reg(self.channel_id, r::V_SRCN), patch.sample_idx);

        let adsr = patch.adsr.to_hex();
        regs.write(calc_voice_reg(self.channel_id, r::V_ADSR1), adsr[0]);
        regs.write(calc_voice_reg(self.channel_id, r::V_ADSR2), adsr[1]);

        let pitch = calc_tuning(&doc.frequency_table, &sample.tuning, note);
        regs.write(calc_voice_reg(self.channel_id, r::V_PITCH_L), (pitch & 0xFF) as u8);
        regs.write(calc_voice_reg(self.channel_id, r::V_PITCH_H), (pitch >> 8) as u8);

        true
    }

    fn tick(
        &mut self,
        doc: &Document,
        samples_valid: &[bool; 256],
        events: &[RowEvent],
        regs: &mut RegisterWriteQueue,
        flags: &mut Spc700ChipFlags,
    ) {
        let channel_flag = 1_u8 << self.channel_id;

        for ev in events {
            if let Some(instr) = ev.instr {
                self.prev_instr = Some(instr);

                // A mid-note instrument change replays the held note with the
                // new instrument's sample and envelope
                if self.note_playing && ev.note.is_none() {
                    let note = self.prev_note;
                    if !self.try_play_note(doc, samples_valid, note, regs) {
                        flags.koff |= channel_flag;
                        self.note_playing = false;
                    }
                }
            }

            if let Some(note) = ev.note {
                if note.is_valid_note() {
                    self.prev_note = note;
                    if self.try_play_note(doc, samples_valid, note, regs) {
                        flags.kon |= channel_flag;
                        self.note_playing = true;
                    } else {
                        flags.koff |= channel_flag;
                        self.note_playing = false;
                    }
                } else if note.is_release() || note.is_cut() {
                    // TODO note cut should hard-stop via a GAIN ramp instead of
                    // sharing the release envelope with note release
                    flags.koff |= channel_flag;
                    self.note_playing = false;
                }
            }

            if let Some(volume) = ev.volume {
                regs.write(calc_voice_reg(self.channel_id, r::V_VOL_L), volume);
                regs.write(calc_voice_reg(self.channel_id, r::V_VOL_R), volume);
            }
        }
    }
}

pub struct Spc700Driver {
    channels: [Spc700ChannelDriver; 8],
    /// Which sample slots made it into ARAM on the last reload.
    samples_valid: [bool; 256],
}

impl Spc700Driver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|i| Spc700ChannelDriver::new(i as u8)),
            samples_valid: [false; 256],
        }
    }

    /// Reset the DSP and initialize registers to produce non-silent,
    /// non-distorted output with no echo.
    pub fn reset_state(
        &mut self,
        doc: &Document,
        synth: &mut Spc700Synth,
        regs: &mut RegisterWriteQueue,
    ) {
        synth.reset();

        for channel in &mut self.channels {
            *channel = Spc700ChannelDriver::new(channel.channel_id);
        }

        self.reload_samples(doc, synth, regs); // writes DIR

        // Maximize master volume
        regs.write(Address::from(r::MVOL_L), 0x7F);
        regs.write(Address::from(r::MVOL_R), 0x7F);

        // Disable soft reset, unmute the amplifier, disable echo buffer
        // writes, noise frequency 0
        regs.write(Address::from(r::FLG), 0b0010_0000);

        // Mute echo output
        regs.write(Address::from(r::EVOL_L), 0);
        regs.write(Address::from(r::EVOL_R), 0);

        regs.write(Address::from(r::PMON), 0x00);
        regs.write(Address::from(r::NON), 0x00);
        regs.write(Address::from(r::EON), 0x00);

        // If KON is left alone, stale key-on state can trigger voices even
        // when no notes are processed
        regs.write(Address::from(r::KON), 0x00);

        for channel_id in 0..8 {
            regs.write(calc_voice_reg(channel_id, r::V_VOL_L), DEFAULT_VOICE_VOLUME);
            regs.write(calc_voice_reg(channel_id, r::V_VOL_R), DEFAULT_VOICE_VOLUME);
        }
    }

    /// Repack every sample into ARAM behind the directory. Running voices are
    /// hard-stopped (they would otherwise keep playing from stale addresses);
    /// already-queued voices are not remapped.
    pub fn reload_samples(
        &mut self,
        doc: &Document,
        synth: &mut Spc700Synth,
        regs: &mut RegisterWriteQueue,
    ) {
        self.samples_valid = [false; 256];

        let ram = synth.ram_mut();
        let mut start_addr = SAMPLE_DATA_BASE;

        for (idx, sample) in doc.samples.iter().enumerate() {
            let Some(sample) = sample else { continue };

            if sample.brr.is_empty() {
                log::warn!("sample {idx:02X} is empty, skipping");
                continue;
            }

            let brr_size = sample.brr.len().min(AUDIO_RAM_LEN);
            let end_addr = start_addr + brr_size;
            if end_addr > AUDIO_RAM_LEN {
                // Keep trying later samples; they may be small enough to fit
                // the remaining space
                log::warn!("sample {idx:02X} does not fit in ARAM, skipping");
                continue;
            }

            let loop_addr = start_addr + sample.loop_byte as usize;
            if loop_addr >= end_addr {
                log::warn!("sample {idx:02X} has loop_byte past its BRR data, skipping");
                continue;
            }

            let entry_addr = SAMPLE_DIR + idx * SAMPLE_DIR_ENTRY_SIZE;
            ram[entry_addr..entry_addr + 2].copy_from_slice(&(start_addr as u16).to_le_bytes());
            ram[entry_addr + 2..entry_addr + 4].copy_from_slice(&(loop_addr as u16).to_le_bytes());

            ram[start_addr..end_addr].copy_from_slice(&sample.brr[..brr_size]);

            start_addr = end_addr;
            self.samples_valid[idx] = true;
        }

        regs.write(Address::from(r::DIR), (SAMPLE_DIR >> 8) as u8);

        // Samples moved; pulse a soft reset to hard-stop every voice, then
        // restore the no-echo-writes flag state
        regs.write(Address::from(r::FLG), 0b1010_0000);
        regs.write(Address::from(r::FLG), 0b0010_0000);

        for channel in &mut self.channels {
            channel.note_playing = false;
        }
    }

    /// Key off every voice. `driver_tick` must still run on the same tick.
    pub fn stop_playback(&mut self, regs: &mut RegisterWriteQueue) {
        regs.write(Address::from(r::KOFF), 0xFF);
        regs.wait(CLOCKS_PER_TWO_SAMPLES);

        for channel in &mut self.channels {
            channel.note_playing = false;
        }
    }

    /// Process one tick of events for all channels.
    ///
    /// Write order matters: the key-off latch is cleared first (it does not
    /// auto-clear like key-on does), voice parameters are written before the
    /// key-on that consumes them, and the accumulated key-off lands before the
    /// key-on so a voice cut and retriggered in one tick restarts cleanly.
    pub fn driver_tick(
        &mut self,
        doc: &Document,
        channel_events: &[&[RowEvent]],
        regs: &mut RegisterWriteQueue,
    ) {
        let mut flags = Spc700ChipFlags::default();

        regs.write(Address::from(r::KOFF), 0x00);

        let samples_valid = &self.samples_valid;
        for (channel, events) in self.channels.iter_mut().zip(channel_events) {
            channel.tick(doc, samples_valid, events, regs, &mut flags);
        }

        if flags.koff != 0 {
            regs.write(Address::from(r::KOFF), flags.koff);
        }
        if flags.kon != 0 {
            regs.write(Address::from(r::KON), flags.kon);
        }
    }
}

impl Default for Spc700Driver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{equal_temperament, Adsr};
    use crate::doc_util;
    use crate::synth::registers::RegisterWrite;

    fn tuning(sample_rate: u32, root_key: u8, detune_cents: i16) -> SampleTuning {
        SampleTuning { sample_rate, root_key, detune_cents }
    }

    #[test]
    fn tuning_at_root_key_scales_by_sample_rate() {
        let freqs = equal_temperament();

        // A sample recorded at the nominal rate plays 1:1 at its root key
        assert_eq!(calc_tuning(&freqs, &tuning(32040, 69, 0), Note(69)), 0x1000);
        // Half the recorded rate halves the register
        assert_eq!(calc_tuning(&freqs, &tuning(16020, 69, 0), Note(69)), 0x0800);
    }

    #[test]
    fn tuning_one_octave_doubles() {
        let freqs = equal_temperament();
        let base = calc_tuning(&freqs, &tuning(32040, 60, 0), Note(60));
        let octave_up = calc_tuning(&freqs, &tuning(32040, 60, 0), Note(72));
        assert_eq!(octave_up, 2 * base);
    }

    #[test]
    fn tuning_detune_cents() {
        let freqs = equal_temperament();
        let base = calc_tuning(&freqs, &tuning(32040, 69, 0), Note(69));
        let detuned = calc_tuning(&freqs, &tuning(32040, 69, 1200), Note(69));
        assert_eq!(detuned, 2 * base);
    }

    #[test]
    fn tuning_clamps_instead_of_wrapping() {
        let freqs = equal_temperament();
        // 3 octaves above a 1:1 root would be 0x8000; must clamp to 0x3FFF
        assert_eq!(calc_tuning(&freqs, &tuning(32040, 60, 0), Note(96)), 0x3FFF);
    }

    #[test]
    fn reload_packs_samples_behind_directory() {
        let mut doc = doc_util::single_note_document(Note(69), Adsr::INFINITE);
        doc.samples[3] = Some(doc_util::triangle());

        let mut driver = Spc700Driver::new();
        let mut synth = Spc700Synth::new();
        let mut regs = RegisterWriteQueue::new();
        driver.reload_samples(&doc, &mut synth, &mut regs);

        assert!(driver.samples_valid[0]);
        assert!(driver.samples_valid[3]);

        let ram = synth.ram_mut();
        let entry0 = u16::from_le_bytes([ram[SAMPLE_DIR], ram[SAMPLE_DIR + 1]]);
        assert_eq!(entry0 as usize, SAMPLE_DATA_BASE);

        // Sample 3 is packed immediately after sample 0's 9 bytes
        let entry3_addr = SAMPLE_DIR + 3 * SAMPLE_DIR_ENTRY_SIZE;
        let entry3 = u16::from_le_bytes([ram[entry3_addr], ram[entry3_addr + 1]]);
        assert_eq!(entry3 as usize, SAMPLE_DATA_BASE + 9);
    }

    #[test]
    fn reload_skips_oversized_samples_and_warns_by_omission() {
        let mut doc = doc_util::single_note_document(Note(69), Adsr::INFINITE);
        // 8000 blocks of 9 bytes = 72000 bytes, larger than ARAM
        let mut big = doc_util::triangle();
        big.brr = big.brr.repeat(8000);
        doc.samples[1] = Some(big);
        doc.samples[2] = Some(doc_util::triangle());

        let mut driver = Spc700Driver::new();
        let mut synth = Spc700Synth::new();
        let mut regs = RegisterWriteQueue::new();
        driver.reload_samples(&doc, &mut synth, &mut regs);

        assert!(driver.samples_valid[0]);
        assert!(!driver.samples_valid[1]);
        // Later, smaller samples still load
        assert!(driver.samples_valid[2]);
    }

    #[test]
    fn driver_tick_write_order() {
        let doc = doc_util::single_note_document(Note(69), Adsr::INFINITE);

        let mut driver = Spc700Driver::new();
        let mut synth = Spc700Synth::new();
        let mut regs = RegisterWriteQueue::new();
        driver.reload_samples(&doc, &mut synth, &mut regs);
        regs.clear();

        let note_on = [RowEvent::note_instr(Note(69), 0)];
        let events: [&[RowEvent]; 8] = [&note_on, &[], &[], &[], &[], &[], &[], &[]];
        driver.driver_tick(&doc, &events, &mut regs);

        let mut writes = Vec::new();
        while regs.num_unread() > 0 {
            if let Some(write) = regs.peek_mut() {
                write.time_before = 0;
            }
            writes.push(regs.pop());
        }

        // KOFF clear first, KON last, voice parameters in between
        assert_eq!(writes.first(), Some(&RegisterWrite { address: 0x5C, value: 0x00 }));
        assert_eq!(writes.last(), Some(&RegisterWrite { address: 0x4C, value: 0x01 }));
        let kon_idx = writes.len() - 1;
        let srcn_idx =
            writes.iter().position(|w| w.address == Address::from(r::V_SRCN)).unwrap();
        let pitch_idx =
            writes.iter().position(|w| w.address == Address::from(r::V_PITCH_L)).unwrap();
        assert!(srcn_idx < kon_idx && pitch_idx < kon_idx);

        // The pulse sample: 16 samples at 7040 Hz recorded rate
        let expected_pitch = calc_tuning(&doc.frequency_table, &tuning(7040, 69, 0), Note(69));
        assert_eq!(writes[pitch_idx].value, (expected_pitch & 0xFF) as u8);
    }

    #[test]
    fn missing_instrument_keys_off_instead_of_panicking() {
        let doc = doc_util::single_note_document(Note(69), Adsr::INFINITE);

        let mut driver = Spc700Driver::new();
        let mut regs = RegisterWriteQueue::new();

        // Instrument 5 does not exist
        let note_on = [RowEvent::note_instr(Note(69), 5)];
        let events: [&[RowEvent]; 8] = [&note_on, &[], &[], &[], &[], &[], &[], &[]];
        driver.driver_tick(&doc, &events, &mut regs);

        let mut writes = Vec::new();
        while regs.num_unread() > 0 {
            if let Some(write) = regs.peek_mut() {
                write.time_before = 0;
            }
            writes.push(regs.pop());
        }

        // KOFF clear, then the accumulated key-off for the failed voice
        assert_eq!(
            writes,
            vec![
                RegisterWrite { address: 0x5C, value: 0x00 },
                RegisterWrite { address: 0x5C, value: 0x01 },
            ]
        );
    }
}
