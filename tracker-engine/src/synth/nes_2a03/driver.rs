//! The 2A03 software driver: maps notes onto the pulse channels' 11-bit
//! period registers and emits only the register bytes that changed.

use crate::doc::{Document, FrequencyTable, Note, RowEvent};
use crate::synth::nes_2a03::synth::Apu1Synth;
use crate::synth::registers::{Address, RegisterWriteQueue};
use nes_apu_emu::NES_CPU_RATE;

/// Pulse period registers are 11 bits.
const MAX_PERIOD: u16 = 0x07FF;

/// Negate flag set, shift 0: disables the sweep unit's overflow mute without
/// actually sweeping.
const SWEEP_DISABLE: u8 = 0x08;

/// `[note]` 11-bit period register, or `MAX_PERIOD` for notes too low to play.
type TuningTable = Box<[u16; 128]>;

/// The pulse period formula: `f = cpu_clock / (16 * (period + 1))`.
fn make_tuning_table(frequencies: &FrequencyTable, clocks_per_sec: u32) -> TuningTable {
    let table = frequencies.map(|freq| {
        let period = f64::from(clocks_per_sec) / (16.0 * freq) - 1.0;
        period.clamp(0.0, f64::from(MAX_PERIOD)).round() as u16
    });
    Box::new(table)
}

/// The 4 registers of one pulse channel ($4000-$4003 / $4004-$4007), kept as
/// a shadow image so each tick only writes bytes that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PulseRegs {
    bytes: [u8; 4],
}

impl PulseRegs {
    /// Duty 50%, length-counter halt, constant volume.
    fn with_volume(volume: u8) -> Self {
        let mut regs = Self::default();
        regs.bytes[0] = 0x80 | 0x30 | (volume & 0x0F);
        regs.bytes[1] = SWEEP_DISABLE;
        regs
    }

    fn set_volume(&mut self, volume: u8) {
        self.bytes[0] = (self.bytes[0] & 0xF0) | (volume & 0x0F);
    }

    fn set_period(&mut self, period: u16) {
        self.bytes[2] = (period & 0xFF) as u8;
        self.bytes[3] = (self.bytes[3] & 0xF8) | ((period >> 8) & 0x07) as u8;
    }
}

#[derive(Debug, Clone)]
struct Apu1PulseDriver {
    pulse_num: u8,
    base_address: Address,
    note_active: bool,
    /// Channel volume in APU units, 0..=15.
    volume: u8,
    prev_state: PulseRegs,
    next_state: PulseRegs,
}

impl Apu1PulseDriver {
    fn new(pulse_num: u8) -> Self {
        Self {
            pulse_num,
            base_address: 0x4000 + 0x4 * Address::from(pulse_num),
            note_active: false,
            volume: 0x0F,
            prev_state: PulseRegs::default(),
            next_state: PulseRegs::with_volume(0),
        }
    }

    fn tick(
        &mut self,
        tuning_table: &TuningTable,
        events: &[RowEvent],
        regs: &mut RegisterWriteQueue,
    ) {
        // A write to the $4003 length/period-high register resets the duty
        // phase and reloads the length counter, so it doubles as key-on
        let mut retrigger = false;

        for ev in events {
            if let Some(volume) = ev.volume {
                // Document volume is 0..=0x7F; the APU envelope is 4 bits
                self.volume = volume >> 3;
                if self.note_active {
                    self.next_state.set_volume(self.volume);
                }
            }

            if let Some(note) = ev.note {
                if note.is_valid_note() {
                    let period = tuning_table[note.0 as usize];
                    if period >= 8 {
                        self.note_active = true;
                        retrigger = true;
                        self.next_state.set_volume(self.volume);
                        self.next_state.set_period(period);
                    } else {
                        // Periods below 8 are muted by the sweep unit anyway
                        log::warn!("pulse {}: note {} is too high to play", self.pulse_num, note.0);
                        self.note_active = false;
                        self.next_state.set_volume(0);
                    }
                } else if note.is_release() || note.is_cut() {
                    // No release envelope on the 2A03 path; cut to silence
                    self.note_active = false;
                    self.next_state.set_volume(0);
                }
            }
        }

        for byte_idx in 0..4 {
            let changed = self.next_state.bytes[byte_idx] != self.prev_state.bytes[byte_idx];
            if changed || (retrigger && byte_idx == 3) {
                regs.write(
                    self.base_address + byte_idx as Address,
                    self.next_state.bytes[byte_idx],
                );
            }
        }
        self.prev_state = self.next_state;
    }
}

pub struct Apu1Driver {
    tuning_table: TuningTable,
    pulse_1: Apu1PulseDriver,
    pulse_2: Apu1PulseDriver,
}

impl Apu1Driver {
    #[must_use]
    pub fn new(doc: &Document) -> Self {
        Self {
            tuning_table: make_tuning_table(&doc.frequency_table, NES_CPU_RATE),
            pulse_1: Apu1PulseDriver::new(0),
            pulse_2: Apu1PulseDriver::new(1),
        }
    }

    /// The frequency table lives in the document, so edits can retune.
    pub fn recompute_tuning(&mut self, doc: &Document) {
        self.tuning_table = make_tuning_table(&doc.frequency_table, NES_CPU_RATE);
    }

    pub fn reset_state(
        &mut self,
        doc: &Document,
        synth: &mut Apu1Synth,
        regs: &mut RegisterWriteQueue,
    ) {
        synth.reset();
        self.recompute_tuning(doc);
        self.pulse_1 = Apu1PulseDriver::new(0);
        self.pulse_2 = Apu1PulseDriver::new(1);

        // Enable both pulse length counters, 4-step frame counter
        regs.write(0x4015, 0x03);
        regs.write(0x4017, 0x00);
        regs.write(0x4001, SWEEP_DISABLE);
        regs.write(0x4005, SWEEP_DISABLE);
    }

    pub fn stop_playback(&mut self, regs: &mut RegisterWriteQueue) {
        self.pulse_1.note_active = false;
        self.pulse_1.next_state.set_volume(0);
        self.pulse_2.note_active = false;
        self.pulse_2.next_state.set_volume(0);

        // Volume writes land on the next driver tick's diff; silence
        // immediately as well in case the tick is delayed
        regs.write(0x4000, 0xB0);
        regs.write(0x4004, 0xB0);
        self.pulse_1.prev_state.bytes[0] = 0xB0;
        self.pulse_2.prev_state.bytes[0] = 0xB0;
    }

    pub fn driver_tick(
        &mut self,
        _doc: &Document,
        channel_events: &[&[RowEvent]],
        regs: &mut RegisterWriteQueue,
    ) {
        self.pulse_1.tick(&self.tuning_table, channel_events[0], regs);
        self.pulse_2.tick(&self.tuning_table, channel_events[1], regs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{equal_temperament, ChipKind};
    use crate::synth::registers::RegisterWrite;

    fn drain(regs: &mut RegisterWriteQueue) -> Vec<RegisterWrite> {
        let mut writes = Vec::new();
        while regs.num_unread() > 0 {
            if let Some(write) = regs.peek_mut() {
                write.time_before = 0;
            }
            writes.push(regs.pop());
        }
        writes
    }

    #[test]
    fn tuning_table_matches_period_formula() {
        let table = make_tuning_table(&equal_temperament(), NES_CPU_RATE);

        // A440 : 1789773 / (16 * 440) - 1 = 253.2 -> 253
        assert_eq!(table[69], 253);
        // An octave down doubles the period (plus one)
        assert_eq!(table[57], 507);
        // Very low notes clamp to the 11-bit maximum
        assert_eq!(table[0], MAX_PERIOD);
    }

    #[test]
    fn note_on_writes_period_and_volume() {
        let doc = Document::new(vec![ChipKind::Nes2A03]);
        let mut driver = Apu1Driver::new(&doc);
        let mut regs = RegisterWriteQueue::new();

        let note_on = [RowEvent::note(Note(69))];
        let events: [&[RowEvent]; 2] = [&note_on, &[]];
        driver.driver_tick(&doc, &events, &mut regs);

        let writes = drain(&mut regs);
        assert!(writes.contains(&RegisterWrite { address: 0x4000, value: 0xBF }));
        assert!(writes.contains(&RegisterWrite { address: 0x4002, value: 253 }));
        assert!(writes.iter().any(|w| w.address == 0x4003));
    }

    #[test]
    fn unchanged_state_writes_nothing() {
        let doc = Document::new(vec![ChipKind::Nes2A03]);
        let mut driver = Apu1Driver::new(&doc);
        let mut regs = RegisterWriteQueue::new();

        let note_on = [RowEvent::note(Note(69))];
        let events: [&[RowEvent]; 2] = [&note_on, &[]];
        driver.driver_tick(&doc, &events, &mut regs);
        regs.clear();

        // A tick with no events re-emits nothing
        let events: [&[RowEvent]; 2] = [&[], &[]];
        driver.driver_tick(&doc, &events, &mut regs);
        assert_eq!(regs.num_unread(), 0);
    }

    #[test]
    fn retrigger_rewrites_the_length_register() {
        let doc = Document::new(vec![ChipKind::Nes2A03]);
        let mut driver = Apu1Driver::new(&doc);
        let mut regs = RegisterWriteQueue::new();

        let note_on = [RowEvent::note(Note(69))];
        let events: [&[RowEvent]; 2] = [&note_on, &[]];
        driver.driver_tick(&doc, &events, &mut regs);
        regs.clear();

        // The same note again: everything is unchanged except the $4003
        // retrigger write
        let events: [&[RowEvent]; 2] = [&note_on, &[]];
        driver.driver_tick(&doc, &events, &mut regs);
        let writes = drain(&mut regs);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].address, 0x4003);
    }

    #[test]
    fn note_cut_zeroes_the_volume() {
        let doc = Document::new(vec![ChipKind::Nes2A03]);
        let mut driver = Apu1Driver::new(&doc);
        let mut regs = RegisterWriteQueue::new();

        let note_on = [RowEvent::note(Note(69))];
        let events: [&[RowEvent]; 2] = [&note_on, &[]];
        driver.driver_tick(&doc, &events, &mut regs);
        regs.clear();

        let cut = [RowEvent::note(Note::CUT)];
        let events: [&[RowEvent]; 2] = [&cut, &[]];
        driver.driver_tick(&doc, &events, &mut regs);
        let writes = drain(&mut regs);
        assert_eq!(writes, vec![RegisterWrite { address: 0x4000, value: 0xB0 }]);
    }
}
