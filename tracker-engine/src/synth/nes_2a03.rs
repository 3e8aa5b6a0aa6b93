//! The legacy NES 2A03 chip instance: drives the APU1 pulse pair.

pub mod driver;
pub mod synth;

pub use driver::Apu1Driver;
pub use synth::Apu1Synth;

use crate::doc::{Document, RowEvent};
use crate::sequencer::ChipSequencer;
use crate::synth::chip_instance::{self, ChipInstance};
use crate::synth::registers::RegisterWriteQueue;
use crate::synth::AudioOptions;
use crate::timing::{ClockT, GridAndBeat, NsampT, SequencerTime};

pub struct Apu1Instance {
    regs: RegisterWriteQueue,
    sequencer: ChipSequencer,
    driver: Apu1Driver,
    synth: Apu1Synth,
}

impl Apu1Instance {
    #[must_use]
    pub fn new(chip_index: usize, doc: &Document, options: AudioOptions) -> Self {
        let nchan = doc.chips[chip_index].channel_count() as usize;
        Self {
            regs: RegisterWriteQueue::new(),
            sequencer: ChipSequencer::new(chip_index, nchan, doc),
            driver: Apu1Driver::new(doc),
            synth: Apu1Synth::new(options.clocks_per_sound_update),
        }
    }

    fn run_driver(&mut self, doc: &Document) {
        let sequencer = &self.sequencer;
        let channel_events: [&[RowEvent]; 2] =
            std::array::from_fn(|chan| sequencer.events_this_tick(chan));
        self.driver.driver_tick(doc, &channel_events, &mut self.regs);
    }
}

impl ChipInstance for Apu1Instance {
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
        self.driver.recompute_tuning(doc);
    }

    fn timeline_modified(&mut self, doc: &Document) {
        self.sequencer.timeline_modified(doc);
    }

    fn reset_state(&mut self, doc: &Document) {
        self.driver.reset_state(doc, &mut self.synth, &mut self.regs);
    }

    fn reload_samples(&mut self, _doc: &Document) {
        // The 2A03 pulse pair has no sample memory
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
