//! Tempo math: mapping musical tempo onto the S-SMP timer the way the
//! hardware driver does it.
//!
//! The S-SMP timer fires every `128 * spc_timer_period` SPC clocks. Each
//! firing adds an 8.8 fixed-point "engine tempo byte" to an accumulator; the
//! sequencer advances one tick per overflow. The byte is chosen so that
//! `ticks_per_beat * target_tempo / 60` ticks elapse per second.

use crate::doc::SequencerOptions;
use crate::timing::{ClockT, CLOCKS_PER_S_IDEAL};

/// SPC clock runs at 1024-ish kHz, S-SMP timers 0/1 run at 8-ish kHz.
pub const CLOCKS_PER_PHASE: u32 = 128;

#[must_use]
pub fn calc_clocks_per_timer(spc_timer_period: u32) -> ClockT {
    // A divisor of 0 means 256 on the S-SMP timers
    let period = if spc_timer_period == 0 { 256 } else { spc_timer_period };
    CLOCKS_PER_PHASE * period
}

/// The engine tempo byte: `round(ticks_per_beat * spc_timer_period *
/// target_bpm * 256 / (60 * timer_base_freq))`, clamped to `0..=255`.
#[must_use]
pub fn calc_sequencer_rate(options: &SequencerOptions) -> u8 {
    /// Slightly above 8000 Hz. At the nominal 32040 Hz sampling rate this is 8010 Hz.
    const TIMER_BASE_FREQ: f64 = CLOCKS_PER_S_IDEAL as f64 / CLOCKS_PER_PHASE as f64;

    let t = options.target_tempo;
    let d = f64::from(options.spc_timer_period);
    let p = f64::from(options.ticks_per_beat);

    let rate = d * p * 256. / 60. / TIMER_BASE_FREQ * t;

    // A rate of 0 means the sequencer never advances, but the sound driver
    // still runs as normal. Rates above 255 can occur from poorly chosen
    // parameters; clamping to 255 plays the song too slowly, but there's no
    // better alternative.
    debug_assert!(rate >= 0.);
    rate.clamp(0., 255.).round() as u8
}
