//! Deterministic simulation of the S-DSP ADSR envelope, for the instrument
//! dialog's envelope plot and eventually the export pipeline.
//!
//! The real S-DSP clocks envelopes off a free-running global counter, so tick
//! times are nondeterministic between notes (switching periods can fire a tick
//! early). This simulation pretends the timer phase resets on every period
//! switch: simplified and slightly inaccurate, but fully deterministic.
//!
//! Hardware checks the Decay→Decay2 transition *before* the Decay check,
//! which at sustain level 7 introduces a 1-sample glitch where the Decay
//! period is still used. We transition instantly instead, intentionally
//! omitting the glitch.

use crate::doc::Adsr;
use crate::timing::NsampT;

/// Envelope tick periods in samples, indexed by the 5-bit hardware rate.
/// Index 0 never fires.
#[rustfmt::skip]
const PERIODS: [NsampT; 32] = [
    0x1_00_00, // never fires
           2048, 1536,
    1280, 1024,  768,
     640,  512,  384,
     320,  256,  192,
     160,  128,   96,
      80,   64,   48,
      40,   32,   24,
      20,   16,   12,
      10,    8,    6,
       5,    4,    3,
             2,
             1,
];

pub const MAX_LEVEL: u32 = 0x7FF;

/// A point on the envelope plot: absolute time in samples, level in
/// `0..=0x7FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub time: NsampT,
    pub level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvMode {
    Attack,
    Decay,
    Decay2,
}

/// The level Decay stops at: `(sustain_level + 1) << 8`.
#[must_use]
pub fn sustain_level(adsr: Adsr) -> u32 {
    (u32::from(adsr.sustain_level) + 1) << 8
}

/// Step-at-a-time ADSR simulator. Call [`AdsrIterator::step`] until it returns
/// `None` (envelope finished or stuck on a never-firing rate).
#[derive(Debug, Clone)]
pub struct AdsrIterator {
    adsr: Adsr,
    mode: EnvMode,
    now: NsampT,
    level: u32,
    done: bool,
    /// Set by the step that overflowed attack, for region shading.
    pub decay_begin: Option<Point>,
    /// Set by the step that crossed the sustain boundary, for region shading.
    pub sustain_point: Option<Point>,
}

impl AdsrIterator {
    #[must_use]
    pub fn new(adsr: Adsr) -> Self {
        Self {
            adsr,
            mode: EnvMode::Attack,
            now: 0,
            level: 0,
            done: false,
            decay_begin: None,
            sustain_point: None,
        }
    }

    /// Advance one envelope tick; returns the new (time, level) point.
    pub fn step(&mut self) -> Option<Point> {
        if self.done {
            return None;
        }

        let period_idx = match self.mode {
            EnvMode::Attack => {
                let period_idx = usize::from(self.adsr.attack_rate) * 2 + 1;
                self.level += if period_idx < 31 { 0x20 } else { 0x400 };
                period_idx
            }
            EnvMode::Decay => {
                self.level = exp_decay_step(self.level);
                usize::from(self.adsr.decay_rate) * 2 + 0x10
            }
            EnvMode::Decay2 => {
                self.level = exp_decay_step(self.level);
                usize::from(self.adsr.decay_2)
            }
        };

        if period_idx == 0 {
            // Rate 0 never fires; the envelope holds its level forever
            self.done = true;
            return None;
        }

        self.now += PERIODS[period_idx];

        if self.mode == EnvMode::Attack && self.level > MAX_LEVEL {
            self.level = MAX_LEVEL;
            self.mode = EnvMode::Decay;
            self.decay_begin = Some(Point { time: self.now, level: self.level });
        }

        if self.mode == EnvMode::Decay && (self.level >> 8) == u32::from(self.adsr.sustain_level) {
            self.mode = EnvMode::Decay2;
            self.sustain_point = Some(Point { time: self.now, level: sustain_level(self.adsr) });
        }

        let point = Point { time: self.now, level: self.level };
        if self.level == 0 {
            self.done = true;
        }
        Some(point)
    }
}

fn exp_decay_step(level: u32) -> u32 {
    let level = level.saturating_sub(1);
    level - (level >> 8)
}

/// The simulated envelope, plotted as a stairstep.
#[derive(Debug, Clone, Default)]
pub struct AdsrPlot {
    /// Each level change emits two points, `(t, prev_level)` and
    /// `(t, new_level)`. The first element is `(0, 0)`; the last element's
    /// time is `>= end_time` unless the envelope holds forever.
    pub points: Vec<Point>,
    /// Where Decay begins, for background shading.
    pub decay_begin: Option<Point>,
    /// Where Decay2 begins, for background shading.
    pub sustain_point: Option<Point>,
}

/// Simulate the ADSR of a note held forever, covering at least `end_time`
/// samples.
#[must_use]
pub fn simulate_adsr(adsr: Adsr, end_time: NsampT) -> AdsrPlot {
    let mut iter = AdsrIterator::new(adsr);
    let mut plot = AdsrPlot { points: vec![Point::default()], ..AdsrPlot::default() };

    let mut prev_level = 0;
    loop {
        let envelope_done = plot.points.last().is_some_and(|point| point.time >= end_time);
        // Keep stepping past end_time until the shading metadata is resolved,
        // so a shrinking window doesn't lose the sustain boundary
        if envelope_done && plot.decay_begin.is_some() && plot.sustain_point.is_some() {
            break;
        }

        let Some(point) = iter.step() else { break };
        plot.points.push(Point { time: point.time, level: prev_level });
        plot.points.push(point);
        prev_level = point.level;

        plot.decay_begin = plot.decay_begin.or(iter.decay_begin);
        plot.sustain_point = plot.sustain_point.or(iter.sustain_point);
    }

    plot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_attack_infinite_sustain_holds_max_level() {
        // Attack 0xF, no decay needed (sustain level 7), decay2 0 never fires
        let adsr = Adsr::INFINITE;
        let mut iter = AdsrIterator::new(adsr);

        let mut last = Point::default();
        while let Some(point) = iter.step() {
            last = point;
        }

        assert_eq!(last.level, MAX_LEVEL);
        // Attack at rate 31 steps by 0x400 every sample: full scale in 2 steps
        assert_eq!(last.time, 2);
    }

    #[test]
    fn slowest_decay2_reaches_zero_in_finite_time() {
        let adsr = Adsr { attack_rate: 0, decay_rate: 0, sustain_level: 0, decay_2: 1 };
        let mut iter = AdsrIterator::new(adsr);

        let mut levels = Vec::new();
        let mut steps = 0_u32;
        while let Some(point) = iter.step() {
            levels.push(point.level);
            steps += 1;
            assert!(steps < 1_000_000, "envelope never reached zero");
        }

        assert_eq!(*levels.last().unwrap(), 0);

        // Non-increasing after the attack peak
        let peak = levels.iter().position(|&level| level == MAX_LEVEL).unwrap();
        for pair in levels[peak..].windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn decay_stops_at_sustain_boundary() {
        let adsr = Adsr { attack_rate: 0xF, decay_rate: 0x7, sustain_level: 0x3, decay_2: 0 };
        let mut iter = AdsrIterator::new(adsr);

        let mut last = Point::default();
        while let Some(point) = iter.step() {
            last = point;
        }

        // Decay2 rate 0 freezes the envelope the moment decay crosses into
        // the sustain range
        assert_eq!(last.level >> 8, u32::from(adsr.sustain_level));
        assert!(iter.decay_begin.is_some());
        assert!(iter.sustain_point.is_some());
    }

    #[test]
    fn plot_is_a_stairstep() {
        let adsr = Adsr { attack_rate: 0x4, decay_rate: 0x0, sustain_level: 0x2, decay_2: 0x0D };
        let plot = simulate_adsr(adsr, 32000);

        assert_eq!(plot.points[0], Point { time: 0, level: 0 });
        // Pairs of points share a timestamp (vertical edges)
        for pair in plot.points[1..].chunks_exact(2) {
            assert_eq!(pair[0].time, pair[1].time);
        }
        assert!(plot.points.last().unwrap().time >= 32000);
        assert!(plot.decay_begin.is_some());
        assert!(plot.sustain_point.is_some());
    }
}
