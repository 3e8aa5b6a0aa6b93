//! Thin wrapper around the S-DSP emulator that owns audio RAM and converts
//! between SPC clocks and native output samples.

use crate::synth::chip_instance::ChipSynth;
use crate::synth::registers::RegisterWrite;
use crate::timing::{ClockT, NsampT, CLOCKS_PER_SAMPLE};
use sdsp_emu::{Sdsp, AUDIO_RAM_LEN};
use tracker_common::boxedarray::BoxedByteArray;

pub struct Spc700Synth {
    dsp: Sdsp,
    ram: BoxedByteArray<AUDIO_RAM_LEN>,
    /// Clocks into the current native sample window; kept in lockstep with the
    /// mixing buffer's phase.
    clock_phase: ClockT,
}

impl Spc700Synth {
    #[must_use]
    pub fn new() -> Self {
        Self { dsp: Sdsp::new(), ram: BoxedByteArray::new(), clock_phase: 0 }
    }

    /// Reset the DSP. Audio RAM and the native clock phase are preserved; the
    /// phase must stay aligned with the mixing buffer across resets.
    pub fn reset(&mut self) {
        self.dsp = Sdsp::new();
    }

    /// Sample data is loaded by mutating audio RAM directly; only DSP
    /// registers go through the write queue.
    pub fn ram_mut(&mut self) -> &mut [u8; AUDIO_RAM_LEN] {
        &mut self.ram
    }

    /// Envelope level of a voice for GUI meters, 0..=0x7F.
    #[must_use]
    pub fn voice_envelope(&self, voice: usize) -> u8 {
        self.dsp.voice_envelope(voice)
    }
}

impl Default for Spc700Synth {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipSynth for Spc700Synth {
    fn write_reg(&mut self, write: RegisterWrite) {
        debug_assert!(write.address <= 0xFF, "not a DSP register: {:04X}", write.address);
        self.dsp.write(write.address as u8, write.value);
    }

    fn run_clocks(&mut self, nclk: ClockT, out: &mut [i16]) -> NsampT {
        let mut written: NsampT = 0;

        let total = self.clock_phase + nclk;
        let nsamp = total / CLOCKS_PER_SAMPLE;
        self.clock_phase = total % CLOCKS_PER_SAMPLE;

        for _ in 0..nsamp {
            let (l, r) = self.dsp.clock(&mut self.ram);
            out[2 * written as usize] = l;
            out[2 * written as usize + 1] = r;
            written += 1;
        }

        written
    }
}
