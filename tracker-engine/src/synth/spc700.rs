//! The S-DSP chip instance: sequencer + driver + emulated DSP for one SPC-700.

pub mod driver;
pub mod synth;

pub use driver::{Spc700Driver, SAMPLE_DATA_BASE, SAMPLE_DIR};
pub use synth::Spc700Synth;

use crate::doc::{Document, RowEvent};
use crate::sequencer::ChipSequencer;
use crate::synth::chip_instance::{self, ChipInstance};
use crate::synth::registers::RegisterWriteQueue;
use crate::timing::{ClockT, GridAndBeat, NsampT, SequencerTime};

pub struct Spc700Instance {
    regs: RegisterWriteQueue,
    sequencer: ChipSequencer,
    driver: Spc700Driver,
    synth: Spc700Synth,
}

impl Spc700Instance {
    #[must_use]
    pub fn new(chip_index: usize, doc: &Document) -> Self {
        let nchan = doc.chips[chip_index].channel_count() as usize;
        Self {
            regs: RegisterWriteQueue::new(),
            sequencer: ChipSequencer::new(chip_index, nchan, doc),
            driver: Spc700Driver::new(),
            synth: Spc700Synth::new(),
        }
    }

    fn run_driver(&mut self, doc: &Document) {
        let sequencer = &self.sequencer;
        let channel_events: [&[RowEvent]; 8] =
            std::array::from_fn(|chan| sequencer.events_this_tick(chan));
        self.driver.driver_tick(doc, &channel_events, &mut self.regs);
    }
}

impl ChipInstance for Spc700Instance {
    fn seek(&mut self, doc: &Document, time: GridAndBeat) {
        self.sequencer.seek(doc, time);
    }

    fn stop_playback(&mut self) {
        self.sequencer.clear_events();
        self.driver.stop_playback(&mut self.regs);
    }

    fn tempo_changed(&mut self, doc: &Document) {
        self.sequencer.tempo_changed(doc);
    }

    fn doc_edited(&mut self, doc: &Document) {
        self.sequencer.doc_edited(doc);
    }

    fn timeline_modified(&mut self, doc: &Document) {
        self.sequencer.timeline_modified(doc);
    }

    fn reset_state(&mut self, doc: &Document) {
        self.driver.reset_state(doc, &mut self.synth, &mut self.regs);
    }

    fn reload_samples(&mut self, doc: &Document) {
        self.driver.reload_samples(doc, &mut self.synth, &mut self.regs);
    }

    fn sequencer_driver_tick(&mut self, doc: &Document) -> SequencerTime {
        let time = self.sequencer.tick(doc);
        self.run_driver(doc);
        time
    }

    fn driver_tick(&mut self, doc: &Document) {
        self.sequencer.clear_events();
        self.run_driver(doc);
    }

    fn flush_register_writes(&mut self) {
        assert_eq!(
            self.regs.num_unread(),
            0,
            "register writes from the previous tick were not consumed"
        );
        self.regs.clear();
    }

    fn run_chip_for(&mut self, num_clocks: ClockT, out: &mut [i16]) -> NsampT {
        chip_instance::run_chip_for(&mut self.regs, &mut self.synth, num_clocks, out)
    }
}
