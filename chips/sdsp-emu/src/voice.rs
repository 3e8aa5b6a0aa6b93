use crate::tables::{ENVELOPE_OFFSET_TABLE, ENVELOPE_RATE_TABLE, GAUSSIAN_TABLE};
use crate::{AudioRam, DspRegisters};
use bincode::{Decode, Encode};
use std::ops::Index;
use tracker_common::num::GetBit;

pub(crate) const BRR_BLOCK_LEN: u16 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub(crate) enum EnvelopeMode {
    Adsr,
    #[default]
    Gain,
}

impl EnvelopeMode {
    fn from_bit(bit: bool) -> Self {
        if bit { Self::Adsr } else { Self::Gain }
    }

    fn to_bit(self) -> bool {
        self == Self::Adsr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub(crate) enum GainMode {
    #[default]
    Direct,
    Custom,
}

impl GainMode {
    fn from_bit(bit: bool) -> Self {
        if bit { Self::Custom } else { Self::Direct }
    }

    fn to_bit(self) -> bool {
        self == Self::Custom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub(crate) enum EnvelopePhase {
    Attack,
    Decay,
    Sustain,
    #[default]
    Release,
}

const BRR_BUFFER_LEN: usize = 12;

#[derive(Debug, Clone, Default, Encode, Decode)]
struct BrrRingBuffer {
    buffer: [i16; BRR_BUFFER_LEN],
    fill_idx: usize,
    sample_idx: usize,
}

impl BrrRingBuffer {
    fn reset(&mut self) {
        self.fill_idx = 0;
        self.sample_idx = 0;
    }

    fn write(&mut self, sample: i16) {
        self.buffer[self.fill_idx] = sample;
        self.fill_idx = (self.fill_idx + 1) % BRR_BUFFER_LEN;
    }

    fn shift_sample_idx(&mut self) {
        self.sample_idx = (self.sample_idx + 4) % BRR_BUFFER_LEN;
    }

    fn last_two_written_samples(&self) -> (i16, i16) {
        if self.fill_idx == 0 {
            (self.buffer[BRR_BUFFER_LEN - 2], self.buffer[BRR_BUFFER_LEN - 1])
        } else if self.fill_idx == 1 {
            (self.buffer[BRR_BUFFER_LEN - 1], self.buffer[0])
        } else {
            (self.buffer[self.fill_idx - 2], self.buffer[self.fill_idx - 1])
        }
    }
}

impl Index<u16> for BrrRingBuffer {
    type Output = i16;

    fn index(&self, index: u16) -> &Self::Output {
        let buffer_idx = (self.sample_idx + index as usize) % BRR_BUFFER_LEN;
        &self.buffer[buffer_idx]
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct Voice {
    // Registers
    pub(crate) source_number: u8,
    pub(crate) pitch: u16,
    pub(crate) pitch_modulation_enabled: bool,
    envelope_mode: EnvelopeMode,
    attack_rate: u8,
    decay_rate: u8,
    sustain_rate: u8,
    sustain_level: u8,
    gain_mode: GainMode,
    // Meaning of gain value varies based on gain mode
    gain_value: u8,
    pub(crate) volume_l: i8,
    pub(crate) volume_r: i8,
    pub(crate) keyed_on: bool,
    pub(crate) keyed_off: bool,
    pub(crate) output_noise: bool,
    // Stored in full to preserve the highest 2 bits which are R/W
    last_pitch_h_write: u8,
    // State
    brr_block_address: u16,
    brr_buffer: BrrRingBuffer,
    brr_decoder_idx: u16,
    pitch_counter: u16,
    pub(crate) envelope_level: u16,
    clipped_envelope_value: u16,
    envelope_phase: EnvelopePhase,
    pub(crate) current_sample: i16,
    restart_pending: bool,
    restart_delay_remaining: u8,
    pub(crate) end_flag_seen: bool,
}

impl Voice {
    pub(crate) fn write_pitch_low(&mut self, value: u8) {
        self.pitch = (self.pitch & 0xFF00) | u16::from(value);
    }

    pub(crate) fn write_pitch_high(&mut self, value: u8) {
        // Pitch is 14 bits; drop the highest 2
        self.pitch = (self.pitch & 0x00FF) | (u16::from(value & 0x3F) << 8);

        // Preserve original value for register reads
        self.last_pitch_h_write = value;
    }

    pub(crate) fn write_adsr_low(&mut self, value: u8) {
        // 4-bit attack rate, 3-bit decay rate, and ADSR/Gain select bit
        self.attack_rate = value & 0x0F;
        self.decay_rate = (value >> 4) & 0x07;
        self.envelope_mode = EnvelopeMode::from_bit(value.bit(7));

        log::trace!(
            "  Attack rate: {:02X}, Decay rate: {:02X}, Envelope mode: {:?}",
            self.attack_rate,
            self.decay_rate,
            self.envelope_mode
        );
    }

    pub(crate) fn read_adsr_low(&self) -> u8 {
        self.attack_rate | (self.decay_rate << 4) | (u8::from(self.envelope_mode.to_bit()) << 7)
    }

    pub(crate) fn write_adsr_high(&mut self, value: u8) {
        // 5-bit sustain rate, 3-bit sustain level
        self.sustain_rate = value & 0x1F;
        self.sustain_level = value >> 5;
    }

    pub(crate) fn read_adsr_high(&self) -> u8 {
        self.sustain_rate | (self.sustain_level << 5)
    }

    pub(crate) fn write_gain(&mut self, value: u8) {
        self.gain_mode = GainMode::from_bit(value.bit(7));
        self.gain_value = value & 0x7F;
    }

    pub(crate) fn read_gain(&self) -> u8 {
        self.gain_value | (u8::from(self.gain_mode.to_bit()) << 7)
    }

    pub(crate) fn read_envelope(&self) -> u8 {
        // VxENVX reads return the highest 7 bits of the 11-bit envelope value
        (self.envelope_level >> 4) as u8
    }

    pub(crate) fn read_output(&self) -> u8 {
        // VxOUTX reads return the highest 8 bits of the 15-bit sample value (pre-volume)
        (self.current_sample >> 7) as u8
    }

    pub(crate) fn read_pitch_high(&self) -> u8 {
        self.last_pitch_h_write
    }

    pub(crate) fn write_key_on(&mut self, key_on: bool) {
        self.keyed_on = key_on;

        // Keying on immediately moves envelope to attack, resets envelope value, and
        // restarts the channel
        if key_on {
            self.envelope_phase = EnvelopePhase::Attack;
            self.envelope_level = 0;
            self.restart_pending = true;
        }
    }

    pub(crate) fn write_key_off(&mut self, key_off: bool) {
        self.keyed_off = key_off;

        // Keying off immediately moves envelope to release (but does not modify
        // envelope value or other state)
        if key_off {
            self.envelope_phase = EnvelopePhase::Release;
        }
    }

    pub(crate) fn soft_reset(&mut self) {
        // Soft reset keys off the voice and immediately sets envelope to 0
        self.write_key_off(true);
        self.envelope_level = 0;
    }

    pub(crate) fn clock(
        &mut self,
        registers: &DspRegisters,
        audio_ram: &AudioRam,
        prev_voice_sample: i16,
        noise_generator_output: i16,
    ) {
        if self.restart_pending {
            self.restart_pending = false;
            self.restart(registers, audio_ram);
        }

        if self.restart_delay_remaining != 0 {
            // Output empty sample
            self.current_sample = 0;

            // After 2 clocks, prevent the channel from starting if key off or soft reset is set
            if self.restart_delay_remaining <= 3 && (self.keyed_off || registers.soft_reset) {
                self.envelope_phase = EnvelopePhase::Release;
            }

            self.restart_delay_remaining -= 1;
            if self.restart_delay_remaining == 0 {
                // Reset BRR decoder state and decode the first 2 groups.
                // Actual hardware decodes 3 groups here, but decoding 2 simplifies the
                // ring buffer handling
                self.brr_buffer.reset();
                self.brr_decoder_idx = 0;

                for _ in 0..2 {
                    self.decode_brr_group(registers.sample_table_address, audio_ram);
                }
            }

            return;
        }

        let interpolated_sample = if self.output_noise {
            // Noise replaces the voice output, but the envelope is still applied and BRR
            // decoding continues running in the background
            noise_generator_output
        } else {
            let interpolate_idx = self.pitch_counter >> 12;
            apply_gaussian_filter(GaussArgs {
                pitch_counter: self.pitch_counter,
                oldest: self.brr_buffer[interpolate_idx],
                older: self.brr_buffer[interpolate_idx + 1],
                old: self.brr_buffer[interpolate_idx + 2],
                sample: self.brr_buffer[interpolate_idx + 3],
            })
        };

        self.clock_envelope(registers.global_counter);

        // Apply 11-bit envelope; still a signed 15-bit sample
        let sample =
            ((i32::from(interpolated_sample) * i32::from(self.envelope_level)) >> 11) as i16;
        self.current_sample = sample;

        self.pitch_counter += self.pitch;
        if self.pitch_modulation_enabled && !self.output_noise {
            // Adjust pitch based on previous voice's output
            let modulation_rate =
                ((i32::from(prev_voice_sample) >> 5) * i32::from(self.pitch)) >> 10;
            self.pitch_counter =
                self.pitch_counter.wrapping_add_signed(modulation_rate as i16).clamp(0, 0x7FFF);
        }

        if self.pitch_counter >= 0x4000 {
            self.pitch_counter -= 0x4000;
            self.decode_brr_group(registers.sample_table_address, audio_ram);
            self.brr_buffer.shift_sample_idx();
        }
    }

    fn restart(&mut self, registers: &DspRegisters, audio_ram: &AudioRam) {
        // Table address is located at DIR + 4*source
        let table_addr =
            registers.sample_table_address.wrapping_add(u16::from(self.source_number) << 2)
                as usize;

        // First 2 bytes of table entry hold start address
        let start_addr = u16::from_le_bytes([audio_ram[table_addr], audio_ram[table_addr + 1]]);
        self.brr_block_address = start_addr;
        self.pitch_counter = 0;

        // Each voice outputs 5 empty samples after a restart
        self.restart_delay_remaining = 5;

        self.end_flag_seen = false;
    }

    // Decode a group of 4 BRR samples, advancing to the next BRR block or looping if necessary
    fn decode_brr_group(&mut self, sample_table_address: u16, audio_ram: &AudioRam) {
        if self.brr_decoder_idx == 16 {
            // Advance to next block
            let prev_block_header = audio_ram[self.brr_block_address as usize];
            let prev_block_end_flag = prev_block_header.bit(0);
            if prev_block_end_flag {
                self.end_flag_seen = true;

                // Jump to loop address
                let table_addr =
                    sample_table_address.wrapping_add(u16::from(self.source_number) << 2) as usize;
                let loop_addr =
                    u16::from_le_bytes([audio_ram[table_addr + 2], audio_ram[table_addr + 3]]);
                self.brr_block_address = loop_addr;
            } else {
                self.brr_block_address = self.brr_block_address.wrapping_add(BRR_BLOCK_LEN);
            }

            self.brr_decoder_idx = 0;
        }

        let header = audio_ram[self.brr_block_address as usize];
        let shift = header >> 4;
        let filter = (header >> 2) & 0x03;
        let loop_flag = header.bit(1);
        let end_flag = header.bit(0);

        // Immediately mute channel after decoding a header with end set and loop clear
        if end_flag && !loop_flag {
            self.envelope_phase = EnvelopePhase::Release;
            self.envelope_level = 0;
        }

        let mut brr_nibbles = [0_i8; 4];
        let decoder_idx = self.brr_decoder_idx;
        for i in 0..2 {
            let sample_addr = self.brr_block_address.wrapping_add(1 + (decoder_idx >> 1) + i);
            let sample_pair = audio_ram[sample_addr as usize];

            // High nibble stores the first sample, low nibble stores the second sample.
            // Treat both as signed 4-bit integers
            let first_sample = (sample_pair as i8) >> 4;
            let second_sample = ((sample_pair as i8) << 4) >> 4;
            brr_nibbles[(2 * i) as usize] = first_sample;
            brr_nibbles[(2 * i + 1) as usize] = second_sample;
        }
        self.brr_decoder_idx += 4;

        let (mut older_sample, mut old_sample) = self.brr_buffer.last_two_written_samples();
        for brr_nibble in brr_nibbles {
            let shifted = apply_brr_shift(brr_nibble, shift);
            let brr_sample = apply_brr_filter(shifted, filter, old_sample, older_sample);
            self.brr_buffer.write(brr_sample);

            older_sample = old_sample;
            old_sample = brr_sample;
        }
    }

    fn clock_envelope(&mut self, global_counter: u16) {
        if self.envelope_phase == EnvelopePhase::Release {
            // Release ignores other settings and decrements envelope value by 8 every sample
            self.envelope_level = self.envelope_level.saturating_sub(8);
            self.clipped_envelope_value = self.envelope_level.wrapping_sub(8) & 0x7FF;
            return;
        }

        // ADSR transitions are checked every sample, even if envelope is in Gain mode
        if self.envelope_phase == EnvelopePhase::Attack && self.envelope_level >= 0x7E0 {
            self.envelope_phase = EnvelopePhase::Decay;
        }

        if self.envelope_phase == EnvelopePhase::Decay {
            let sustain_level = u16::from(self.sustain_level + 1) << 8;
            if self.envelope_level <= sustain_level {
                self.envelope_phase = EnvelopePhase::Sustain;
            }
        }

        let current_value: i32 = self.envelope_level.into();
        let (rate, step) = match (self.envelope_mode, self.gain_mode) {
            (EnvelopeMode::Gain, GainMode::Direct) => {
                // Force envelope level to 16*N
                let target_value = i32::from(self.gain_value) << 4;
                if current_value == target_value {
                    (0, 0)
                } else {
                    (31, target_value - current_value)
                }
            }
            (EnvelopeMode::Gain, GainMode::Custom) => {
                let rate = self.gain_value & 0x1F;
                let step = match self.gain_value & 0x60 {
                    0x00 => {
                        // Linear decrease (fixed decrement by 32)
                        -32
                    }
                    0x20 => {
                        // Exponential decrease
                        compute_exp_decay(current_value)
                    }
                    0x40 => {
                        // Linear increase (fixed increment by 32)
                        32
                    }
                    0x60 => {
                        // Bent increase (uses clipped value rather than clamped value)
                        if self.clipped_envelope_value < 0x600 { 32 } else { 8 }
                    }
                    _ => unreachable!("value & 0x60 is always one of the above values"),
                };

                (rate, step)
            }
            (EnvelopeMode::Adsr, _) => match self.envelope_phase {
                EnvelopePhase::Attack => {
                    let rate = (self.attack_rate << 1) | 0x01;
                    let step = if rate == 31 { 1024 } else { 32 };
                    (rate, step)
                }
                EnvelopePhase::Decay => {
                    let rate = 0x10 | (self.decay_rate << 1);
                    let step = compute_exp_decay(current_value);
                    (rate, step)
                }
                EnvelopePhase::Sustain => {
                    let step = compute_exp_decay(current_value);
                    (self.sustain_rate, step)
                }
                EnvelopePhase::Release => (31, -8),
            },
        };

        if rate != 0
            && (global_counter + ENVELOPE_OFFSET_TABLE[rate as usize])
                % ENVELOPE_RATE_TABLE[rate as usize]
                == 0
        {
            let new_value = current_value + step;
            self.envelope_level = new_value.clamp(0, 0x7FF) as u16;
            self.clipped_envelope_value = (new_value as u16) & 0x7FF;
        }
    }
}

fn apply_brr_shift(nibble: i8, shift: u8) -> i16 {
    match shift {
        0 => (nibble >> 1).into(),
        1..=12 => i16::from(nibble) << (shift - 1),
        13..=15 => {
            // "Invalid" shift values; resulting sample will always be either 0 or -2048 ($F800)
            if nibble < 0 { -2048 } else { 0 }
        }
        _ => panic!("invalid BRR shift value: {shift}"),
    }
}

fn apply_brr_filter(sample: i16, filter: u8, old: i16, older: i16) -> i16 {
    // Do math in 32 bits to avoid overflows
    let sample: i32 = sample.into();
    let old: i32 = old.into();
    let older: i32 = older.into();

    let filtered = match filter {
        // no filter
        0 => sample,
        // sample + 0.9375 * old
        1 => sample + old + (-old >> 4),
        // sample + 1.90625 * old - 0.9375 * older
        2 => sample + (old << 1) + (-(3 * old) >> 5) - older + (older >> 4),
        // sample + 1.796875 * old - 0.8125 * older
        3 => sample + (old << 1) + (-(13 * old) >> 6) - older + ((3 * older) >> 4),
        _ => panic!("invalid BRR filter value: {filter}"),
    };

    // Clamp to 16 bits
    let clamped = filtered.clamp(i16::MIN.into(), i16::MAX.into()) as i16;

    // Clip to 15 bits
    (clamped << 1) >> 1
}

struct GaussArgs {
    pitch_counter: u16,
    oldest: i16,
    older: i16,
    old: i16,
    sample: i16,
}

fn apply_gaussian_filter(
    GaussArgs { sample, pitch_counter, old, older, oldest }: GaussArgs,
) -> i16 {
    // Do math in 32 bits to avoid overflows
    let sample: i32 = sample.into();
    let old: i32 = old.into();
    let older: i32 = older.into();
    let oldest: i32 = oldest.into();

    // Bits 4-11 of the pitch counter are used as the interpolation index
    let interpolation_idx = ((pitch_counter >> 4) & 0xFF) as usize;

    // Sum the 3 older samples with 15-bit wrapping
    let mut sum = (GAUSSIAN_TABLE[0x0FF - interpolation_idx] * oldest) >> 11;
    sum += (GAUSSIAN_TABLE[0x1FF - interpolation_idx] * older) >> 11;
    sum += (GAUSSIAN_TABLE[0x100 + interpolation_idx] * old) >> 11;

    // Clip to 15 bits
    sum = (((sum as i16) << 1) >> 1).into();

    // Add in the current sample
    sum += (GAUSSIAN_TABLE[interpolation_idx] * sample) >> 11;

    // Clamp the final result to signed 15-bit
    sum.clamp((i16::MIN >> 1).into(), (i16::MAX >> 1).into()) as i16
}

fn compute_exp_decay(current_value: i32) -> i32 {
    -(((current_value - 1) >> 8) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brr_shift_basic() {
        assert_eq!(apply_brr_shift(7, 0), 3);
        assert_eq!(apply_brr_shift(7, 1), 7);
        assert_eq!(apply_brr_shift(7, 12), 7 << 11);
        assert_eq!(apply_brr_shift(-8, 1), -8);
    }

    #[test]
    fn brr_shift_invalid_values() {
        for shift in 13..=15 {
            assert_eq!(apply_brr_shift(-1, shift), -2048);
            assert_eq!(apply_brr_shift(3, shift), 0);
        }
    }

    #[test]
    fn brr_filter_passthrough() {
        assert_eq!(apply_brr_filter(100, 0, 5000, -5000), 100);
    }

    #[test]
    fn exp_decay_matches_hardware_step() {
        // Hardware computes level-- followed by level -= level >> 8
        for level in [1_i32, 0xFF, 0x100, 0x2FF, 0x7FF] {
            let expected = {
                let l1 = level - 1;
                l1 - (l1 >> 8) - level
            };
            assert_eq!(compute_exp_decay(level), expected, "level {level:#X}");
        }
    }
}
