//! The per-chip capability surface and the shared 1-tick run loop that
//! interleaves register writes with synthesis.

use crate::doc::Document;
use crate::event_queue::{EventId, EventQueue};
use crate::synth::registers::{RegisterWrite, RegisterWriteQueue};
use crate::timing::{ClockT, GridAndBeat, NsampT, SequencerTime};

/// A single chip's software driver + sequencers + hardware emulator.
///
/// `OverallSynth` owns one instance per document chip and drives them all in
/// lockstep: on every timer tick exactly one of `sequencer_driver_tick` /
/// `driver_tick` / `stop_playback`+`driver_tick`, followed by `run_chip_for`
/// covering the tick's clocks.
pub trait ChipInstance {
    /// Seek the sequencer. The instance does not know whether the song is
    /// playing; `OverallSynth` decides which tick method to call.
    fn seek(&mut self, doc: &Document, time: GridAndBeat);

    /// Stop the sequencer and tell the driver to stop all playing notes.
    /// `driver_tick` must still be called on the same tick.
    fn stop_playback(&mut self);

    /// Keep the sequencer's position in the event list, recompute ticks.
    fn tempo_changed(&mut self, doc: &Document);

    /// Keep the sequencer's real time in ticks, recompute event positions.
    fn doc_edited(&mut self, doc: &Document);

    /// Timeline rows changed; clamp the cursor in-bounds and invalidate both.
    fn timeline_modified(&mut self, doc: &Document);

    /// Reset driver and synth state. Called when playback begins.
    /// `driver_tick` must still be called on the same tick.
    fn reset_state(&mut self, doc: &Document);

    /// Repack all samples into audio RAM and hard-stop running voices (they
    /// would be playing from stale addresses).
    fn reload_samples(&mut self, doc: &Document);

    /// Tick the sequencer, then the driver. Only called while the song plays;
    /// the call rate is proportional to the tempo. Returns the position of the
    /// tick that just occurred.
    fn sequencer_driver_tick(&mut self, doc: &Document) -> SequencerTime;

    /// Tick the driver with no sequencer events, advancing real-time effects
    /// only. Called on timer ticks that are not sequencer ticks, and on every
    /// timer tick while stopped (so notes decay naturally).
    fn driver_tick(&mut self, doc: &Document);

    /// Assert the previous tick's register writes were fully consumed, then
    /// reset the queue. Call at the start of each tick, before any driver call.
    fn flush_register_writes(&mut self);

    /// Run the chip for one tick's worth of clocks, applying queued register
    /// writes at their scheduled clock and synthesizing `out` (interleaved
    /// stereo native-rate samples). Returns native sample frames written.
    fn run_chip_for(&mut self, num_clocks: ClockT, out: &mut [i16]) -> NsampT;
}

/// The synthesis half of a chip instance, as seen by the shared run loop.
pub(crate) trait ChipSynth {
    /// Apply a register write. Time does not pass.
    fn write_reg(&mut self, write: RegisterWrite);

    /// Advance `nclk` clocks, writing native samples to `out`. Returns native
    /// frames written. Never called across a register-write boundary.
    fn run_clocks(&mut self, nclk: ClockT, out: &mut [i16]) -> NsampT;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChipEvent {
    /// Index 0 so a write clamped exactly onto the tick boundary is applied
    /// before the tick ends and the queue drains fully.
    RegWrite,
    EndOfTick,
}

impl EventId for ChipEvent {
    const COUNT: usize = 2;

    fn to_index(self) -> usize {
        self as usize
    }

    fn from_index(index: usize) -> Self {
        match index {
            0 => Self::RegWrite,
            1 => Self::EndOfTick,
            _ => panic!("invalid chip event index {index}"),
        }
    }
}

/// Schedule the next queued register write, truncating its delay so it cannot
/// overflow the current tick (mimicking how the hardware driver's writes would
/// land inside the timer period).
fn fetch_next_reg(regs: &mut RegisterWriteQueue, events: &mut EventQueue<ChipEvent>) {
    if let Some(next_reg) = regs.peek_mut() {
        next_reg.time_before =
            next_reg.time_before.min(events.get_time_until(ChipEvent::EndOfTick));
        events.set_timeout(ChipEvent::RegWrite, next_reg.time_before);
    }
}

/// The shared chip run loop: consume exactly `num_clocks` clocks, applying
/// register writes at their cumulative delays and synthesizing in between.
pub(crate) fn run_chip_for<S: ChipSynth>(
    regs: &mut RegisterWriteQueue,
    synth: &mut S,
    num_clocks: ClockT,
    out: &mut [i16],
) -> NsampT {
    let mut events = EventQueue::new();
    events.set_timeout(ChipEvent::EndOfTick, num_clocks);
    fetch_next_reg(regs, &mut events);

    let mut nsamp_total: NsampT = 0;

    loop {
        let ev = events.next_event();

        if ev.clk_elapsed > 0 {
            if let Some(next_reg) = regs.peek_mut() {
                next_reg.time_before -= ev.clk_elapsed;
            }

            // Time passes
            let nsamp = synth.run_clocks(ev.clk_elapsed, &mut out[2 * nsamp_total as usize..]);
            nsamp_total += nsamp;
        }

        // Time does not pass
        match ev.id {
            ChipEvent::RegWrite => {
                synth.write_reg(regs.pop());
                fetch_next_reg(regs, &mut events);
            }
            ChipEvent::EndOfTick => return nsamp_total,
        }
    }
}
