//! The overall synth: owns one chip instance per document chip, coordinates
//! timer ticks against the output-sample deadline, and fills each render
//! buffer exactly.

pub mod chip_instance;
pub mod nes_2a03;
pub mod registers;
pub mod spc700;

use crate::doc::{ChipKind, Document};
use crate::event_queue::{EventId, EventQueue};
use crate::mix::MixBuffer;
use crate::shared_doc::DocumentSource;
use crate::synth::chip_instance::ChipInstance;
use crate::synth::nes_2a03::Apu1Instance;
use crate::synth::spc700::Spc700Instance;
use crate::tempo::{calc_clocks_per_timer, calc_sequencer_rate};
use crate::timing::{ClockT, GridAndBeat, NsampT, SequencerTime, SAMPLES_PER_S_IDEAL};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioOptions {
    /// How often the 2A03 synth re-samples its mixer output, in clocks.
    /// 1 samples every clock; larger values trade accuracy for speed.
    pub clocks_per_sound_update: ClockT,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self { clocks_per_sound_update: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SynthEvent {
    /// Index 0: a callback ending at the same time as a tick should return;
    /// the tick happens next callback.
    EndOfCallback,
    Tick,
}

impl EventId for SynthEvent {
    const COUNT: usize = 2;

    fn to_index(self) -> usize {
        self as usize
    }

    fn from_index(index: usize) -> Self {
        match index {
            0 => Self::EndOfCallback,
            1 => Self::Tick,
            _ => panic!("invalid synth event index {index}"),
        }
    }
}

fn make_chip_instance(
    chip_index: usize,
    kind: ChipKind,
    doc: &Document,
    options: AudioOptions,
) -> Box<dyn ChipInstance + Send> {
    match kind {
        ChipKind::Spc700 => Box::new(Spc700Instance::new(chip_index, doc)),
        ChipKind::Nes2A03 => Box::new(Apu1Instance::new(chip_index, doc, options)),
    }
}

pub struct OverallSynth<D> {
    doc_source: D,
    out_nchan: usize,

    events: EventQueue<SynthEvent>,
    chips: Vec<Box<dyn ChipInstance + Send>>,
    mix: MixBuffer,
    /// Per-chip native output for the frame in flight. Preallocated; `render`
    /// must not allocate.
    chip_scratch: Vec<i16>,

    clocks_per_tick: ClockT,
    sequencer_rate: u8,
    /// 8.8 fixed-point tempo accumulator; the sequencer advances one tick per
    /// overflow.
    tempo_accum: u32,

    playing: bool,
    pending_reset: bool,
    pending_stop: bool,
    pending_reload: bool,
    last_seq_time: Option<SequencerTime>,
}

impl<D: DocumentSource> OverallSynth<D> {
    /// `output` spans passed to [`Self::render`] hold `stereo_nchan`
    /// interleaved channels (1 = mono, 2 = stereo) at `smp_per_s`.
    #[must_use]
    pub fn new(stereo_nchan: usize, smp_per_s: u32, doc_source: D, options: AudioOptions) -> Self {
        let doc = doc_source.current_document();

        let chips = doc
            .chips
            .iter()
            .enumerate()
            .map(|(chip_index, &kind)| make_chip_instance(chip_index, kind, &doc, options))
            .collect();

        let mut events = EventQueue::new();
        events.set_timeout(SynthEvent::Tick, 0);

        Self {
            doc_source,
            out_nchan: stereo_nchan,
            events,
            chips,
            mix: MixBuffer::new(stereo_nchan, smp_per_s, SAMPLES_PER_S_IDEAL),
            chip_scratch: vec![0; 2 * MixBuffer::MAX_FRAME_NATIVE as usize],
            clocks_per_tick: calc_clocks_per_timer(doc.sequencer_options.spc_timer_period),
            sequencer_rate: calc_sequencer_rate(&doc.sequencer_options),
            tempo_accum: 0,
            playing: false,
            // The first tick initializes the drivers, keeping the
            // queue-drained invariant unconditional
            pending_reset: true,
            pending_stop: false,
            pending_reload: false,
            last_seq_time: None,
        }
    }

    /// Fill the entire output span. Returns only when it is full; never
    /// blocks, allocates, or errors.
    pub fn render(&mut self, output: &mut [i16]) {
        assert_eq!(output.len() % self.out_nchan, 0);
        let nsamp = (output.len() / self.out_nchan) as NsampT;

        let doc = self.doc_source.current_document();

        let mut samples_so_far: NsampT = 0;
        let mut request_clamped = false;

        loop {
            // Output that overflowed the previous frame drains first
            samples_so_far += self.mix.drain_pending(
                &mut output[samples_so_far as usize * self.out_nchan..],
                nsamp - samples_so_far,
            );

            // The clocks-to-samples conversion saturates (16.16 fixed point),
            // so recompute the deadline on every iteration rather than once
            let needed = nsamp - samples_so_far;
            let clocks_to_play = if needed > 0 {
                let request = self.mix.count_clocks(needed);
                request_clamped = request.clamped;
                request.clocks
            } else {
                request_clamped = false;
                0
            };
            self.events.set_timeout(SynthEvent::EndOfCallback, clocks_to_play);

            let ev = self.events.next_event();

            // Synthesize audio (the chips' time passes)
            if ev.clk_elapsed > 0 {
                let nnative = self.mix.begin_frame(ev.clk_elapsed);
                let scratch = &mut self.chip_scratch[..2 * nnative as usize];
                for chip in &mut self.chips {
                    let wrote = chip.run_chip_for(ev.clk_elapsed, scratch);
                    assert_eq!(wrote, nnative, "chip output disagrees with the mixing buffer");
                    self.mix.accumulate(scratch);
                }

                samples_so_far += self.mix.end_frame(
                    nnative,
                    &mut output[samples_so_far as usize * self.out_nchan..],
                    nsamp - samples_so_far,
                );
            }

            // Handle events (time does not pass)
            match ev.id {
                SynthEvent::EndOfCallback => {
                    if samples_so_far == nsamp {
                        return;
                    }
                    // Only a saturated conversion may end early
                    assert!(
                        request_clamped,
                        "end of callback with {samples_so_far}/{nsamp} samples written"
                    );
                }
                SynthEvent::Tick => {
                    self.tick(&doc);
                    self.events.set_timeout(SynthEvent::Tick, self.clocks_per_tick);
                }
            }
        }
    }

    /// One S-SMP timer tick: drain control flags, then run each chip's driver
    /// (and sequencer, when the tempo accumulator overflows during playback).
    fn tick(&mut self, doc: &Arc<Document>) {
        for chip in &mut self.chips {
            chip.flush_register_writes();
        }

        if self.pending_reset {
            self.pending_reset = false;
            self.pending_reload = false;
            for chip in &mut self.chips {
                chip.reset_state(doc);
            }
        } else if self.pending_reload {
            self.pending_reload = false;
            for chip in &mut self.chips {
                chip.reload_samples(doc);
            }
        }

        if self.pending_stop {
            self.pending_stop = false;
            for chip in &mut self.chips {
                chip.stop_playback();
            }
        }

        let mut sequencer_ticks = false;
        if self.playing {
            self.tempo_accum += u32::from(self.sequencer_rate);
            if self.tempo_accum >= 0x100 {
                self.tempo_accum -= 0x100;
                sequencer_ticks = true;
            }
        }

        for chip in &mut self.chips {
            if sequencer_ticks {
                self.last_seq_time = Some(chip.sequencer_driver_tick(doc));
            } else {
                chip.driver_tick(doc);
            }
        }
    }

    /// Start (or move) playback at the given timeline position.
    pub fn seek(&mut self, time: GridAndBeat) {
        let doc = self.doc_source.current_document();
        for chip in &mut self.chips {
            chip.seek(&doc, time);
        }

        self.playing = true;
        // Reset driver/synth state when playback begins
        self.pending_reset = true;
        self.pending_stop = false;
        // Saturate the accumulator so the first timer tick advances the
        // sequencer and the seeked-to row plays immediately
        self.tempo_accum = 0xFF;
        self.last_seq_time = None;
    }

    /// Stop the sequencer. Playing notes are keyed off on the next timer tick
    /// and decay naturally (the drivers keep ticking while stopped).
    pub fn stop_playback(&mut self) {
        if self.playing {
            self.playing = false;
            self.pending_stop = true;
        }
        self.last_seq_time = None;
    }

    /// Events changed (but not the tempo): sequencers keep their tick
    /// positions and recompute event positions.
    pub fn doc_edited(&mut self) {
        let doc = self.doc_source.current_document();
        for chip in &mut self.chips {
            chip.doc_edited(&doc);
        }
    }

    /// The tempo options changed: sequencers keep their musical positions and
    /// recompute tick counts; the timer and tempo byte are rebuilt.
    pub fn tempo_changed(&mut self) {
        let doc = self.doc_source.current_document();
        self.clocks_per_tick = calc_clocks_per_timer(doc.sequencer_options.spc_timer_period);
        self.sequencer_rate = calc_sequencer_rate(&doc.sequencer_options);
        for chip in &mut self.chips {
            chip.tempo_changed(&doc);
        }
    }

    /// Timeline rows changed: clamp sequencer cursors in-bounds.
    pub fn timeline_modified(&mut self) {
        let doc = self.doc_source.current_document();
        for chip in &mut self.chips {
            chip.timeline_modified(&doc);
        }
    }

    /// Samples changed: repack audio RAM on the next tick (hard-stopping
    /// running voices, which would otherwise play from stale addresses).
    pub fn reload_samples(&mut self) {
        self.pending_reload = true;
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// The sequencer position of the most recent tick, for the GUI playback
    /// cursor. `None` while stopped.
    #[must_use]
    pub fn sequencer_time(&self) -> Option<SequencerTime> {
        self.last_seq_time
    }
}
