//! Sample-accurate emulator for the SNES S-DSP.
//!
//! The DSP is clocked once per output sample (every 32 SPC clocks) via
//! [`Sdsp::clock`], which runs all 8 voices, the noise generator, and the echo
//! filter, and returns one stereo sample pair. Registers are written directly by
//! `(register, value)` rather than through the $F2/$F3 address latch; the latch
//! belongs to the S-SMP side, which a tracker does not emulate.
//!
//! Audio RAM is owned by the caller and passed in by reference on every clock,
//! so the emulator holds no pointer into it.

mod echo;
mod tables;
mod voice;

use crate::echo::EchoFilter;
use crate::tables::{ENVELOPE_OFFSET_TABLE, ENVELOPE_RATE_TABLE};
use crate::voice::Voice;
use bincode::{Decode, Encode};
use std::array;
use tracker_common::num::GetBit;

pub const AUDIO_RAM_LEN: usize = 64 * 1024;

pub type AudioRam = [u8; AUDIO_RAM_LEN];

/// S-DSP register addresses, used by drivers when queueing register writes.
pub mod registers {
    /// Per-voice registers; add to `voice_base(voice)`.
    pub const V_VOL_L: u8 = 0x00;
    pub const V_VOL_R: u8 = 0x01;
    pub const V_PITCH_L: u8 = 0x02;
    pub const V_PITCH_H: u8 = 0x03;
    pub const V_SRCN: u8 = 0x04;
    pub const V_ADSR1: u8 = 0x05;
    pub const V_ADSR2: u8 = 0x06;
    pub const V_GAIN: u8 = 0x07;
    pub const V_ENVX: u8 = 0x08;
    pub const V_OUTX: u8 = 0x09;

    pub const MVOL_L: u8 = 0x0C;
    pub const MVOL_R: u8 = 0x1C;
    pub const EVOL_L: u8 = 0x2C;
    pub const EVOL_R: u8 = 0x3C;
    pub const KON: u8 = 0x4C;
    pub const KOFF: u8 = 0x5C;
    pub const FLG: u8 = 0x6C;
    pub const ENDX: u8 = 0x7C;
    pub const EFB: u8 = 0x0D;
    pub const PMON: u8 = 0x2D;
    pub const NON: u8 = 0x3D;
    pub const EON: u8 = 0x4D;
    pub const DIR: u8 = 0x5D;
    pub const ESA: u8 = 0x6D;
    pub const EDL: u8 = 0x7D;

    /// Address of voice register `reg` for voice `voice` (0-7).
    #[must_use]
    pub fn voice_base(voice: u8) -> u8 {
        debug_assert!(voice < 8);
        voice << 4
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct NoiseGenerator {
    output: i16,
}

impl NoiseGenerator {
    fn new() -> Self {
        Self { output: i16::MIN >> 1 }
    }

    fn clock(&mut self, noise_frequency: u8, global_counter: u16) {
        // Noise generator uses the same rate/offset tables as the envelopes
        let rate = noise_frequency as usize;
        if rate != 0
            && (global_counter + ENVELOPE_OFFSET_TABLE[rate]) % ENVELOPE_RATE_TABLE[rate] == 0
        {
            let new_bit = self.output.bit(0) ^ self.output.bit(1);
            self.output = ((self.output >> 1) & 0x3FFF) | (i16::from(new_bit) << 14);

            // Clip to 15 bits
            self.output = (self.output << 1) >> 1;
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct DspRegisters {
    pub(crate) sample_table_address: u16,
    pub(crate) master_volume_l: i8,
    pub(crate) master_volume_r: i8,
    pub(crate) noise_frequency: u8,
    pub(crate) echo_buffer_writes_enabled: bool,
    pub(crate) mute_amplifier: bool,
    pub(crate) soft_reset: bool,
    pub(crate) global_counter: u16,
    // Unused R/W registers
    unused_xa_registers: [u8; 8],
    unused_xb_registers: [u8; 8],
    unused_xe_registers: [u8; 8],
    unused_1d_register: u8,
}

impl DspRegisters {
    fn new() -> Self {
        Self {
            sample_table_address: 0,
            master_volume_l: 0,
            master_volume_r: 0,
            noise_frequency: 0,
            echo_buffer_writes_enabled: false,
            mute_amplifier: true,
            soft_reset: true,
            global_counter: 0,
            unused_xa_registers: [0; 8],
            unused_xb_registers: [0; 8],
            unused_xe_registers: [0; 8],
            unused_1d_register: 0,
        }
    }

    fn write_flg(&mut self, value: u8) {
        self.noise_frequency = value & 0x1F;
        self.echo_buffer_writes_enabled = !value.bit(5);
        self.mute_amplifier = value.bit(6);
        self.soft_reset = value.bit(7);

        log::trace!("  Noise frequency: {:02X}", self.noise_frequency);
        log::trace!("  Echo buffer writes enabled: {}", self.echo_buffer_writes_enabled);
        log::trace!("  Mute amplifier: {}", self.mute_amplifier);
        log::trace!("  Soft reset: {}", self.soft_reset);
    }

    fn read_flg(&self) -> u8 {
        self.noise_frequency
            | (u8::from(!self.echo_buffer_writes_enabled) << 5)
            | (u8::from(self.mute_amplifier) << 6)
            | (u8::from(self.soft_reset) << 7)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Sdsp {
    voices: [Voice; 8],
    registers: DspRegisters,
    noise_generator: NoiseGenerator,
    echo_filter: EchoFilter,
}

impl Default for Sdsp {
    fn default() -> Self {
        Self::new()
    }
}

impl Sdsp {
    #[must_use]
    pub fn new() -> Self {
        Self {
            voices: array::from_fn(|_| Voice::default()),
            registers: DspRegisters::new(),
            noise_generator: NoiseGenerator::new(),
            echo_filter: EchoFilter::new(),
        }
    }

    /// Current envelope level of a voice, 0..=0x7F (the VxENVX view).
    /// Intended for GUI level meters.
    #[must_use]
    pub fn voice_envelope(&self, voice: usize) -> u8 {
        self.voices[voice].read_envelope()
    }

    /// ENDX view: one bit per voice, set once the voice has decoded a BRR end block.
    #[must_use]
    pub fn end_flags(&self) -> u8 {
        (0..8).map(|v| u8::from(self.voices[v].end_flag_seen) << v).fold(0, |a, b| a | b)
    }

    #[must_use]
    pub fn read(&self, register: u8) -> u8 {
        // Addresses $80-$FF mirror $00-$7F
        let register = register & 0x7F;

        // High nibble of register address encodes the voice
        let voice = (register >> 4) as usize;

        match register & 0x0F {
            0x00 => self.voices[voice].volume_l as u8,
            0x01 => self.voices[voice].volume_r as u8,
            0x02 => (self.voices[voice].pitch & 0xFF) as u8,
            0x03 => self.voices[voice].read_pitch_high(),
            0x04 => self.voices[voice].source_number,
            0x05 => self.voices[voice].read_adsr_low(),
            0x06 => self.voices[voice].read_adsr_high(),
            0x07 => self.voices[voice].read_gain(),
            0x08 => self.voices[voice].read_envelope(),
            0x09 => self.voices[voice].read_output(),
            0x0A => self.registers.unused_xa_registers[voice],
            0x0B => self.registers.unused_xb_registers[voice],
            0x0E => self.registers.unused_xe_registers[voice],
            0x0F => self.echo_filter.fir_coefficients[voice] as u8,
            // $xC and $xD registers are not voice-specific
            0x0C | 0x0D => match register {
                0x0C => self.registers.master_volume_l as u8,
                0x1C => self.registers.master_volume_r as u8,
                0x2C => self.echo_filter.volume_l as u8,
                0x3C => self.echo_filter.volume_r as u8,
                0x4C => (0..8)
                    .map(|voice| u8::from(self.voices[voice].keyed_on) << voice)
                    .fold(0, |a, b| a | b),
                0x5C => (0..8)
                    .map(|voice| u8::from(self.voices[voice].keyed_off) << voice)
                    .fold(0, |a, b| a | b),
                0x6C => self.registers.read_flg(),
                0x7C => self.end_flags(),
                0x0D => self.echo_filter.feedback_volume as u8,
                0x1D => self.registers.unused_1d_register,
                0x2D => (1..8)
                    .map(|voice| u8::from(self.voices[voice].pitch_modulation_enabled) << voice)
                    .fold(0, |a, b| a | b),
                0x3D => (0..8)
                    .map(|voice| u8::from(self.voices[voice].output_noise) << voice)
                    .fold(0, |a, b| a | b),
                0x4D => self.echo_filter.read_echo_enabled(),
                0x5D => (self.registers.sample_table_address >> 8) as u8,
                0x6D => (self.echo_filter.buffer_start_address >> 8) as u8,
                0x7D => self.echo_filter.last_edl_write,
                _ => unreachable!("all $xC and $xD addresses covered"),
            },
            _ => unreachable!("all addresses <= $7F covered"),
        }
    }

    pub fn write(&mut self, register: u8, value: u8) {
        // Addresses $80-$FF are not writable
        if register >= 0x80 {
            return;
        }

        log::trace!("DSP register write: {register:02X}: {value:02X}");

        // High nibble of register address encodes the voice
        let voice = (register >> 4) as usize;

        match register & 0x0F {
            0x00 => {
                self.voices[voice].volume_l = value as i8;
            }
            0x01 => {
                self.voices[voice].volume_r = value as i8;
            }
            0x02 => {
                self.voices[voice].write_pitch_low(value);
            }
            0x03 => {
                self.voices[voice].write_pitch_high(value);
            }
            0x04 => {
                self.voices[voice].source_number = value;
            }
            0x05 => {
                self.voices[voice].write_adsr_low(value);
            }
            0x06 => {
                self.voices[voice].write_adsr_high(value);
            }
            0x07 => {
                self.voices[voice].write_gain(value);
            }
            0x08 | 0x09 => {
                // Current envelope value and current output value.
                // Technically writable, but the DSP overwrites them every sample.
            }
            0x0A => {
                self.registers.unused_xa_registers[voice] = value;
            }
            0x0B => {
                self.registers.unused_xb_registers[voice] = value;
            }
            0x0E => {
                self.registers.unused_xe_registers[voice] = value;
            }
            0x0F => {
                self.echo_filter.fir_coefficients[voice] = value as i8;
            }
            // $xC and $xD registers are not voice-specific
            0x0C | 0x0D => match register {
                0x0C => {
                    self.registers.master_volume_l = value as i8;
                }
                0x1C => {
                    self.registers.master_volume_r = value as i8;
                }
                0x2C => {
                    self.echo_filter.volume_l = value as i8;
                }
                0x3C => {
                    self.echo_filter.volume_r = value as i8;
                }
                0x4C => {
                    for voice in 0..8 {
                        self.voices[voice].write_key_on(value.bit(voice as u8));
                    }
                    log::trace!("  Key on: {value:02X}");
                }
                0x5C => {
                    for voice in 0..8 {
                        self.voices[voice].write_key_off(value.bit(voice as u8));
                    }
                    log::trace!("  Key off: {value:02X}");
                }
                0x6C => {
                    self.registers.write_flg(value);

                    // Apply soft reset immediately if set
                    if self.registers.soft_reset {
                        for voice in &mut self.voices {
                            voice.soft_reset();
                        }
                    }
                }
                0x7C => {
                    // ENDX; writing any value clears all of the flags
                    for voice in &mut self.voices {
                        voice.end_flag_seen = false;
                    }
                }
                0x0D => {
                    self.echo_filter.feedback_volume = value as i8;
                }
                0x1D => {
                    self.registers.unused_1d_register = value;
                }
                0x2D => {
                    // Pitch modulation enable flags (voices 1-7 only)
                    for voice in 1..8 {
                        self.voices[voice].pitch_modulation_enabled = value.bit(voice as u8);
                    }
                }
                0x3D => {
                    for voice in 0..8 {
                        self.voices[voice].output_noise = value.bit(voice as u8);
                    }
                }
                0x4D => {
                    self.echo_filter.write_echo_enabled(value);
                }
                0x5D => {
                    // Sample table address is in 256-byte steps
                    self.registers.sample_table_address = u16::from_le_bytes([0x00, value]);
                }
                0x6D => {
                    // Echo ring buffer address is in 256-byte steps
                    self.echo_filter.buffer_start_address = u16::from_le_bytes([0x00, value]);
                }
                0x7D => {
                    self.echo_filter.write_echo_buffer_size(value);
                }
                _ => unreachable!("all $xC and $xD addresses covered"),
            },
            _ => unreachable!("all addresses <= $7F covered"),
        }
    }

    /// Run the DSP for one output sample (32 SPC clocks) and return the stereo output.
    #[must_use]
    pub fn clock(&mut self, audio_ram: &mut AudioRam) -> (i16, i16) {
        if self.registers.global_counter == 0 {
            self.registers.global_counter = 0x77FF;
        } else {
            self.registers.global_counter -= 1;
        }

        self.noise_generator.clock(self.registers.noise_frequency, self.registers.global_counter);

        for i in 0..8 {
            let prev_voice_output = if i != 0 { self.voices[i - 1].current_sample } else { 0 };
            self.voices[i].clock(
                &self.registers,
                audio_ram,
                prev_voice_output,
                self.noise_generator.output,
            );
        }

        self.sample(audio_ram)
    }

    fn sample(&mut self, audio_ram: &mut AudioRam) -> (i16, i16) {
        let mut voice_samples_l = [0; 8];
        let mut voice_samples_r = [0; 8];
        let mut voice_sum_l = 0_i32;
        let mut voice_sum_r = 0_i32;
        for (i, voice) in self.voices.iter().enumerate() {
            let voice_sample_l = (i32::from(voice.current_sample) * i32::from(voice.volume_l)) >> 6;
            let voice_sample_r = (i32::from(voice.current_sample) * i32::from(voice.volume_r)) >> 6;

            voice_samples_l[i] = voice_sample_l;
            voice_samples_r[i] = voice_sample_r;

            voice_sum_l += voice_sample_l;
            voice_sum_r += voice_sample_r;

            voice_sum_l = voice_sum_l.clamp(i16::MIN.into(), i16::MAX.into());
            voice_sum_r = voice_sum_r.clamp(i16::MIN.into(), i16::MAX.into());
        }

        voice_sum_l = (voice_sum_l * i32::from(self.registers.master_volume_l)) >> 7;
        voice_sum_l = voice_sum_l.clamp(i16::MIN.into(), i16::MAX.into());

        voice_sum_r = (voice_sum_r * i32::from(self.registers.master_volume_r)) >> 7;
        voice_sum_r = voice_sum_r.clamp(i16::MIN.into(), i16::MAX.into());

        let (echo_l, echo_r) = self.echo_filter.do_filter(
            self.registers.echo_buffer_writes_enabled,
            audio_ram,
            &voice_samples_l,
            &voice_samples_r,
        );

        let (out_l, out_r) = if !self.registers.mute_amplifier {
            let out_l = (voice_sum_l + echo_l).clamp(i16::MIN.into(), i16::MAX.into());
            let out_r = (voice_sum_r + echo_r).clamp(i16::MIN.into(), i16::MAX.into());
            (out_l, out_r)
        } else {
            // All processing continues while muted, but the DSP outputs silence
            (0, 0)
        };

        // The DAC inverts the final output
        ((out_l as i16) ^ !0, (out_r as i16) ^ !0)
    }

    pub fn reset(&mut self) {
        // Set soft reset flag, mute amplifier, and block echo buffer writes
        self.registers.write_flg(0xE0);

        for voice in &mut self.voices {
            voice.soft_reset();
        }
    }
}
