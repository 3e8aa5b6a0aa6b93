//! Wrapper around the 2A03 APU1 emulator: converts SPC clocks to NES CPU
//! cycles, box-filters the pulse output down to the native sample grid, and
//! removes the APU's DC offset.

use crate::synth::chip_instance::ChipSynth;
use crate::synth::registers::RegisterWrite;
use crate::timing::{ClockT, NsampT, CLOCKS_PER_SAMPLE, CLOCKS_PER_S_IDEAL};
use nes_apu_emu::{Apu1, NES_CPU_RATE};

/// Peak-ish output amplitude: a single pulse at full volume lands near 3000,
/// comparable to an S-DSP voice at the default volume.
const AMPLITUDE_SCALE: f64 = 20000.0;

/// One-pole high-pass coefficient at the native rate; the APU's pulse mix is
/// unipolar and carries a DC offset the SNES path does not have.
const HPF_COEFF: f64 = 0.9995;

pub struct Apu1Synth {
    apu: Apu1,
    /// Fractional NES CPU cycles owed, scaled by `CLOCKS_PER_S_IDEAL`.
    cpu_product: u64,
    /// Clocks into the current native sample window; kept in lockstep with the
    /// mixing buffer's phase.
    clock_phase: ClockT,
    /// The mixer output is only re-sampled every `clocks_per_sound_update`
    /// clocks; 1 means every clock.
    clocks_per_sound_update: ClockT,
    update_countdown: ClockT,
    level: f64,
    window_sum: f64,
    hpf_prev_in: f64,
    hpf_prev_out: f64,
}

impl Apu1Synth {
    #[must_use]
    pub fn new(clocks_per_sound_update: ClockT) -> Self {
        assert!(clocks_per_sound_update > 0 && clocks_per_sound_update < CLOCKS_PER_S_IDEAL);

        Self {
            apu: Apu1::new(),
            cpu_product: 0,
            clock_phase: 0,
            clocks_per_sound_update,
            update_countdown: 0,
            level: 0.0,
            window_sum: 0.0,
            hpf_prev_in: 0.0,
            hpf_prev_out: 0.0,
        }
    }

    /// Reset the APU. The native clock phase is preserved; it must stay
    /// aligned with the mixing buffer across resets.
    pub fn reset(&mut self) {
        self.apu = Apu1::new();
        self.cpu_product = 0;
        self.update_countdown = 0;
        self.level = 0.0;
        self.window_sum = 0.0;
        self.hpf_prev_in = 0.0;
        self.hpf_prev_out = 0.0;
    }
}

impl ChipSynth for Apu1Synth {
    fn write_reg(&mut self, write: RegisterWrite) {
        self.apu.write_register(write.address, write.value);
    }

    fn run_clocks(&mut self, nclk: ClockT, out: &mut [i16]) -> NsampT {
        let mut written: NsampT = 0;

        for _ in 0..nclk {
            // 1.79 MHz CPU against the 1.02 MHz SPC clock domain
            self.cpu_product += u64::from(NES_CPU_RATE);
            while self.cpu_product >= u64::from(CLOCKS_PER_S_IDEAL) {
                self.cpu_product -= u64::from(CLOCKS_PER_S_IDEAL);
                self.apu.tick_cpu();
            }

            if self.update_countdown == 0 {
                self.level = self.apu.sample();
                self.update_countdown = self.clocks_per_sound_update;
            }
            self.update_countdown -= 1;
            self.window_sum += self.level;

            self.clock_phase += 1;
            if self.clock_phase == CLOCKS_PER_SAMPLE {
                self.clock_phase = 0;

                let raw = self.window_sum / f64::from(CLOCKS_PER_SAMPLE) * AMPLITUDE_SCALE;
                self.window_sum = 0.0;

                let filtered = HPF_COEFF * (self.hpf_prev_out + raw - self.hpf_prev_in);
                self.hpf_prev_in = raw;
                self.hpf_prev_out = filtered;

                let amp = filtered.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
                out[2 * written as usize] = amp;
                out[2 * written as usize + 1] = amp;
                written += 1;
            }
        }

        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_one_native_sample_per_window() {
        let mut synth = Apu1Synth::new(1);
        let mut out = vec![0_i16; 2 * 64];

        assert_eq!(synth.run_clocks(CLOCKS_PER_SAMPLE, &mut out), 1);
        assert_eq!(synth.run_clocks(CLOCKS_PER_SAMPLE / 2, &mut out), 0);
        assert_eq!(synth.run_clocks(CLOCKS_PER_SAMPLE / 2, &mut out), 1);
    }

    #[test]
    fn keyed_on_pulse_is_audible() {
        let mut synth = Apu1Synth::new(1);
        let mut out = vec![0_i16; 2 * 2048];

        synth.write_reg(RegisterWrite { address: 0x4015, value: 0x03 });
        synth.write_reg(RegisterWrite { address: 0x4001, value: 0x08 });
        synth.write_reg(RegisterWrite { address: 0x4000, value: 0xBF });
        synth.write_reg(RegisterWrite { address: 0x4002, value: 0xFF });
        synth.write_reg(RegisterWrite { address: 0x4003, value: 0x01 });

        let written = synth.run_clocks(2048 * CLOCKS_PER_SAMPLE, &mut out);
        assert_eq!(written, 2048);
        assert!(out.iter().any(|&sample| sample.unsigned_abs() > 500));
    }
}
