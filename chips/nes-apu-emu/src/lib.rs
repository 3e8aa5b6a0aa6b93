//! Emulator for the first half of the NES 2A03 APU: the two pulse channels,
//! the frame counter that clocks their envelope/length/sweep units, and the
//! nonlinear pulse mixer.
//!
//! The triangle/noise/DMC half ("APU2") is not emulated; the tracker's legacy
//! NES path only drives the pulse pair.

mod pulse;
mod units;

use crate::pulse::PulseChannel;
use bincode::{Decode, Encode};

/// NTSC NES CPU clock rate; the APU is clocked per CPU cycle.
pub const NES_CPU_RATE: u32 = 1_789_773;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum FrameCounterMode {
    FourStep,
    FiveStep,
}

/// Generates quarter-frame and half-frame clocks at roughly 240 Hz / 120 Hz.
#[derive(Debug, Clone, Encode, Decode)]
struct FrameCounter {
    cpu_ticks: u32,
    mode: FrameCounterMode,
    pending_reset: bool,
}

impl FrameCounter {
    fn new() -> Self {
        Self { cpu_ticks: 0, mode: FrameCounterMode::FourStep, pending_reset: false }
    }

    fn process_joy2_update(&mut self, value: u8) {
        self.mode = if value & 0x80 != 0 {
            FrameCounterMode::FiveStep
        } else {
            FrameCounterMode::FourStep
        };
        self.pending_reset = true;
    }

    fn period(&self) -> u32 {
        match self.mode {
            FrameCounterMode::FourStep => 29830,
            FrameCounterMode::FiveStep => 37282,
        }
    }

    /// Advance one CPU cycle; returns (quarter_frame, half_frame) clock pulses.
    fn tick(&mut self) -> (bool, bool) {
        if self.pending_reset {
            self.pending_reset = false;
            self.cpu_ticks = 0;

            // Writing $4017 with bit 7 set immediately clocks all units
            if self.mode == FrameCounterMode::FiveStep {
                return (true, true);
            }
            return (false, false);
        }

        self.cpu_ticks += 1;
        if self.cpu_ticks == self.period() {
            self.cpu_ticks = 0;
        }

        let quarter = matches!(self.cpu_ticks, 7457 | 14913 | 22371)
            || (self.cpu_ticks == 29829 && self.mode == FrameCounterMode::FourStep)
            || (self.cpu_ticks == 37281 && self.mode == FrameCounterMode::FiveStep);
        let half = self.cpu_ticks == 14913
            || (self.cpu_ticks == 29829 && self.mode == FrameCounterMode::FourStep)
            || (self.cpu_ticks == 37281 && self.mode == FrameCounterMode::FiveStep);

        (quarter, half)
    }
}

/// The 2A03 pulse pair with its frame counter.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Apu1 {
    pulse_1: PulseChannel,
    pulse_2: PulseChannel,
    frame_counter: FrameCounter,
}

impl Default for Apu1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Apu1 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pulse_1: PulseChannel::new_channel_1(),
            pulse_2: PulseChannel::new_channel_2(),
            frame_counter: FrameCounter::new(),
        }
    }

    /// Apply a write to a $40xx APU register. Writes to registers outside the
    /// pulse pair / frame counter are ignored.
    pub fn write_register(&mut self, address: u16, value: u8) {
        log::trace!("APU register write: {address:04X}: {value:02X}");

        match address {
            0x4000 => self.pulse_1.process_vol_update(value),
            0x4001 => self.pulse_1.process_sweep_update(value),
            0x4002 => self.pulse_1.process_lo_update(value),
            0x4003 => self.pulse_1.process_hi_update(value),
            0x4004 => self.pulse_2.process_vol_update(value),
            0x4005 => self.pulse_2.process_sweep_update(value),
            0x4006 => self.pulse_2.process_lo_update(value),
            0x4007 => self.pulse_2.process_hi_update(value),
            0x4015 => {
                self.pulse_1.process_snd_chn_update(value);
                self.pulse_2.process_snd_chn_update(value);
            }
            0x4017 => self.frame_counter.process_joy2_update(value),
            _ => {}
        }
    }

    /// $4015 status read: length-counter activity flags.
    #[must_use]
    pub fn read_status(&self) -> u8 {
        (u8::from(self.pulse_2.length_counter() > 0) << 1)
            | u8::from(self.pulse_1.length_counter() > 0)
    }

    /// Advance one CPU cycle.
    pub fn tick_cpu(&mut self) {
        let (quarter, half) = self.frame_counter.tick();

        if quarter {
            self.pulse_1.clock_quarter_frame();
            self.pulse_2.clock_quarter_frame();
        }
        if half {
            self.pulse_1.clock_half_frame();
            self.pulse_2.clock_half_frame();
        }

        self.pulse_1.tick_cpu();
        self.pulse_2.tick_cpu();
    }

    /// Current mixed output in [0.0, 1.0).
    #[must_use]
    pub fn sample(&self) -> f64 {
        mix_pulse_samples(self.pulse_1.sample(), self.pulse_2.sample())
    }
}

/// The standard nonlinear mixing curve for the two pulse channels.
#[must_use]
pub fn mix_pulse_samples(pulse1_sample: u8, pulse2_sample: u8) -> f64 {
    if pulse1_sample == 0 && pulse2_sample == 0 {
        return 0.0;
    }

    95.88 / (8128.0 / f64::from(pulse1_sample + pulse2_sample) + 100.0)
}
