//! The channel sequencer: walks one channel's timeline, emitting the row
//! events anchored to each tick, across frame boundaries.
//!
//! Every tick rebuilds the flattened event list from the previous, current,
//! and next frames. Rebuilding is O(events near the playhead) but pattern
//! sizes are small; incremental cache maintenance keyed on (document version,
//! tick) is a known future optimization, not a correctness concern.

use crate::doc::{round_to_int, BeatFraction, Document, RowEvent};
use crate::timing::{GridAndBeat, SequencerTime, TickT};
use num::Zero;

/// An event tagged with either an absolute tick (relative to now) or, after
/// [`convert_tick_to_delay`], a delay from the previous event.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TickOrDelayEvent {
    tick_or_delay: TickT,
    event: RowEvent,
}

/// Each event cannot occur later than events following it. Move late events
/// ahead in time to enforce this rule: events pushed past later events pile up
/// at the later event's time, matching legacy tracker behavior. Document
/// validation reports these as warnings; playback stays deterministic.
fn make_tick_times_monotonic(delay_events: &mut [TickOrDelayEvent]) {
    let mut latest_tick = TickT::MAX;

    for event in delay_events.iter_mut().rev() {
        event.tick_or_delay = event.tick_or_delay.min(latest_tick);
        latest_tick = event.tick_or_delay;
    }
}

/// Converts a weakly-increasing list of times from "absolute tick" to "delay
/// from previous time", in place.
///
/// Returns the first index with `tick >= now`; earlier entries are in the past
/// and their output values are unspecified. The entry at the returned index
/// holds `tick - now`; later entries hold `tick - previous tick`.
fn convert_tick_to_delay(now: TickT, delay_events: &mut [TickOrDelayEvent]) -> usize {
    let mut first_idx = None;
    let mut prev = TickT::MAX / 2;

    for (idx, event) in delay_events.iter_mut().enumerate() {
        let input = event.tick_or_delay;
        if first_idx.is_none() {
            if input >= now {
                first_idx = Some(idx);
                event.tick_or_delay = input - now;
                prev = input;
            }
        } else {
            event.tick_or_delay = input - prev;
            prev = input;
        }
    }

    first_idx.unwrap_or(delay_events.len())
}

/// Ticks a frame's length occupies. Every frame plays for at least 1 tick;
/// only insane frame lengths would round down to 0.
fn frame_ticks(nbeats: BeatFraction, ticks_per_beat: TickT) -> TickT {
    (round_to_int(nbeats * BeatFraction::from_integer(i64::from(ticks_per_beat))) as TickT).max(1)
}

pub struct ChannelSequencer {
    chip_index: usize,
    chan_index: usize,

    /// The frame the previous tick belonged to, for events anchored near its
    /// end that spill past the boundary. Cleared on seek and timeline edits.
    prev_frame: Option<usize>,
    curr_frame: usize,
    /// Ticks since the start of `curr_frame`.
    tick_in_frame: TickT,
    /// Cached from the document; used to convert the playback position when
    /// the tempo changes.
    ticks_per_beat: TickT,

    delay_events: Vec<TickOrDelayEvent>,
    events_this_tick: Vec<RowEvent>,
}

impl ChannelSequencer {
    #[must_use]
    pub fn new(chip_index: usize, chan_index: usize, doc: &Document) -> Self {
        Self {
            chip_index,
            chan_index,
            prev_frame: None,
            curr_frame: 0,
            tick_in_frame: 0,
            ticks_per_beat: doc.sequencer_options.ticks_per_beat,
            // On ticks without events this stays empty; on ticks with events it
            // holds 1 event. More than 1 only happens with broken documents
            // where offsets pile events onto the same tick.
            delay_events: Vec::with_capacity(64),
            events_this_tick: Vec::with_capacity(8),
        }
    }

    /// Reset the playback position. Also the way playback starts.
    pub fn seek(&mut self, doc: &Document, time: GridAndBeat) {
        let tpb = doc.sequencer_options.ticks_per_beat;
        self.ticks_per_beat = tpb;

        self.curr_frame = (time.grid as usize).min(doc.timeline.len() - 1);
        let nticks = frame_ticks(doc.timeline[self.curr_frame].nbeats, tpb);
        let tick = round_to_int(time.beat * BeatFraction::from_integer(i64::from(tpb))) as TickT;
        self.tick_in_frame = tick.clamp(0, nticks - 1);
        self.prev_frame = None;
    }

    /// The tempo changed: keep the musical position, recompute its tick count.
    pub fn tempo_changed(&mut self, doc: &Document) {
        let new_tpb = doc.sequencer_options.ticks_per_beat;
        let old_tpb = self.ticks_per_beat;
        self.ticks_per_beat = new_tpb;

        if new_tpb != old_tpb && old_tpb > 0 {
            self.tick_in_frame = round_to_int(BeatFraction::new(
                i64::from(self.tick_in_frame) * i64::from(new_tpb),
                i64::from(old_tpb),
            )) as TickT;
        }
        self.clamp_position(doc);
    }

    /// Events changed but the tempo did not: keep the tick position. The event
    /// list is recomputed from it on the next tick anyway.
    pub fn doc_edited(&mut self, doc: &Document) {
        self.ticks_per_beat = doc.sequencer_options.ticks_per_beat;
        self.clamp_position(doc);
    }

    /// Frames were added, removed, or resized: the cursor may be out of
    /// bounds, and both real time and event positions are stale.
    pub fn timeline_modified(&mut self, doc: &Document) {
        self.curr_frame = self.curr_frame.min(doc.timeline.len() - 1);
        self.prev_frame = None;
        self.clamp_position(doc);
    }

    fn clamp_position(&mut self, doc: &Document) {
        let nticks =
            frame_ticks(doc.timeline[self.curr_frame].nbeats, doc.sequencer_options.ticks_per_beat);
        self.tick_in_frame = self.tick_in_frame.clamp(0, nticks - 1);
    }

    /// Flatten one frame's cell into `delay_events`, with event ticks relative
    /// to now. `frame_base` is the tick of the frame's first beat relative to
    /// now.
    fn flatten_frame(&mut self, doc: &Document, frame: usize, frame_base: TickT) {
        let tpb = doc.sequencer_options.ticks_per_beat;
        let frame_len = doc.timeline[frame].nbeats;

        let cell = &doc.timeline[frame].chip_channel_cells[self.chip_index][self.chan_index];
        for block in &cell.blocks {
            let block_end = block.end_time.min(frame_len);
            let loop_step = block.pattern.loop_length;

            let mut base_beat = block.begin_time;
            loop {
                for timed in &block.pattern.events {
                    let beat = base_beat + timed.time.anchor_beat;
                    if beat >= block_end {
                        break;
                    }

                    let tick = round_to_int(beat * BeatFraction::from_integer(i64::from(tpb)))
                        as TickT
                        + TickT::from(timed.time.tick_offset);
                    self.delay_events.push(TickOrDelayEvent {
                        tick_or_delay: frame_base + tick,
                        event: timed.ev,
                    });
                }

                match loop_step {
                    Some(step) if step > BeatFraction::zero() => {
                        base_beat += step;
                        if base_beat >= block_end {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
    }

    /// Advance one tick and return the events anchored to it.
    pub fn next_tick(&mut self, doc: &Document) -> (SequencerTime, &[RowEvent]) {
        self.events_this_tick.clear();
        self.delay_events.clear();

        let tpb = doc.sequencer_options.ticks_per_beat;
        let curr_ticks = frame_ticks(doc.timeline[self.curr_frame].nbeats, tpb);
        let next_frame = (self.curr_frame + 1) % doc.timeline.len();

        // Relative tick of each frame's start: the previous frame ended where
        // the current one begins, and the next frame begins where it ends.
        if let Some(prev) = self.prev_frame {
            let prev_ticks = frame_ticks(doc.timeline[prev].nbeats, tpb);
            self.flatten_frame(doc, prev, -(prev_ticks + self.tick_in_frame));
        }
        self.flatten_frame(doc, self.curr_frame, -self.tick_in_frame);
        self.flatten_frame(doc, next_frame, curr_ticks - self.tick_in_frame);

        make_tick_times_monotonic(&mut self.delay_events);
        let mut next_event_idx = convert_tick_to_delay(0, &mut self.delay_events);

        // Emit everything due now; the next pending event's delay shrinks by
        // the tick that is about to elapse.
        while let Some(delay_event) = self.delay_events.get_mut(next_event_idx) {
            if delay_event.tick_or_delay == 0 {
                self.events_this_tick.push(delay_event.event);
                next_event_idx += 1;
            } else {
                delay_event.tick_or_delay -= 1;
                break;
            }
        }

        let time = SequencerTime {
            grid: self.curr_frame as u32,
            ticks_per_beat: tpb,
            beat: self.tick_in_frame / tpb.max(1),
            tick: self.tick_in_frame % tpb.max(1),
        };

        self.tick_in_frame += 1;
        if self.tick_in_frame >= curr_ticks {
            self.tick_in_frame = 0;
            self.prev_frame = Some(self.curr_frame);
            self.curr_frame = next_frame;
        }

        (time, &self.events_this_tick)
    }

    /// Events emitted by the most recent [`Self::next_tick`] call.
    #[must_use]
    pub fn events_this_tick(&self) -> &[RowEvent] {
        &self.events_this_tick
    }

    /// Clear the buffered events, so a driver tick without a sequencer tick
    /// plays nothing.
    pub fn clear_events(&mut self) {
        self.events_this_tick.clear();
    }
}

/// The per-chip bundle of channel sequencers, all advancing in lockstep.
pub struct ChipSequencer {
    channels: Vec<ChannelSequencer>,
}

impl ChipSequencer {
    #[must_use]
    pub fn new(chip_index: usize, nchan: usize, doc: &Document) -> Self {
        let channels =
            (0..nchan).map(|chan| ChannelSequencer::new(chip_index, chan, doc)).collect();
        Self { channels }
    }

    pub fn seek(&mut self, doc: &Document, time: GridAndBeat) {
        for channel in &mut self.channels {
            channel.seek(doc, time);
        }
    }

    pub fn tempo_changed(&mut self, doc: &Document) {
        for channel in &mut self.channels {
            channel.tempo_changed(doc);
        }
    }

    pub fn doc_edited(&mut self, doc: &Document) {
        for channel in &mut self.channels {
            channel.doc_edited(doc);
        }
    }

    pub fn timeline_modified(&mut self, doc: &Document) {
        for channel in &mut self.channels {
            channel.timeline_modified(doc);
        }
    }

    /// Advance all channels one tick. Returns the position of the tick that
    /// just occurred.
    pub fn tick(&mut self, doc: &Document) -> SequencerTime {
        let mut time = None;
        for channel in &mut self.channels {
            let (channel_time, _) = channel.next_tick(doc);
            debug_assert!(time.is_none() || time == Some(channel_time));
            time = Some(channel_time);
        }
        time.expect("chip has at least one channel")
    }

    /// Discard buffered events so the driver sees an empty tick.
    pub fn clear_events(&mut self) {
        for channel in &mut self.channels {
            channel.clear_events();
        }
    }

    #[must_use]
    pub fn events_this_tick(&self, chan: usize) -> &[RowEvent] {
        self.channels[chan].events_this_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{
        Block, ChipKind, Note, Pattern, RowEvent, TimeInPattern, TimedRowEvent, TimelineCell,
    };

    fn ticks(values: &[TickT]) -> Vec<TickOrDelayEvent> {
        values
            .iter()
            .map(|&tick| TickOrDelayEvent { tick_or_delay: tick, event: RowEvent::default() })
            .collect()
    }

    fn tick_values(events: &[TickOrDelayEvent]) -> Vec<TickT> {
        events.iter().map(|event| event.tick_or_delay).collect()
    }

    #[test]
    fn convert_tick_to_delay_on_empty_input() {
        for now in [-100, 0, 100] {
            assert_eq!(convert_tick_to_delay(now, &mut []), 0);
        }
    }

    #[test]
    fn convert_tick_to_delay_on_dense_input() {
        let mut events = ticks(&[0, 1, 2, 3, 4]);
        assert_eq!(convert_tick_to_delay(2, &mut events), 2);
        assert_eq!(tick_values(&events)[2..], [0, 1, 1]);
    }

    #[test]
    fn convert_tick_to_delay_with_repeated_input() {
        let mut events = ticks(&[0, 1, 2, 2, 2]);
        assert_eq!(convert_tick_to_delay(2, &mut events), 2);
        assert_eq!(tick_values(&events)[2..], [0, 0, 0]);
    }

    #[test]
    fn convert_tick_to_delay_with_gaps() {
        let mut events = ticks(&[0, 5, 10, 15]);
        assert_eq!(convert_tick_to_delay(7, &mut events), 2);
        assert_eq!(tick_values(&events)[2..], [3, 5]);
    }

    #[test]
    fn convert_tick_to_delay_with_negative_input() {
        let mut events = ticks(&[-20, -10, 0]);
        assert_eq!(convert_tick_to_delay(-15, &mut events), 1);
        assert_eq!(tick_values(&events)[1..], [5, 10]);

        let mut events = ticks(&[-20, -10, 0]);
        assert_eq!(convert_tick_to_delay(10, &mut events), 3);

        let mut events = ticks(&[0, 10]);
        assert_eq!(convert_tick_to_delay(-10, &mut events), 0);
        assert_eq!(tick_values(&events), [10, 10]);
    }

    #[test]
    fn convert_tick_to_delay_returns_zero() {
        let mut events = ticks(&[5, 10, 20]);
        assert_eq!(convert_tick_to_delay(0, &mut events), 0);
        assert_eq!(tick_values(&events), [5, 5, 10]);
    }

    #[test]
    fn convert_tick_to_delay_returns_len() {
        let mut events = ticks(&[5, 10, 20]);
        assert_eq!(convert_tick_to_delay(30, &mut events), 3);
    }

    #[test]
    fn monotonic_pile_up() {
        // The event at tick 9 is pushed back to tick 5 by the event after it
        let mut events = ticks(&[2, 9, 5, 7]);
        make_tick_times_monotonic(&mut events);
        assert_eq!(tick_values(&events), [2, 5, 5, 7]);
    }

    fn beat(n: i64) -> BeatFraction {
        BeatFraction::from_integer(n)
    }

    /// One Spc700 chip, one 4-beat frame, notes on channel 0 at beats 0 and 2.
    fn two_note_doc() -> Document {
        let mut doc = Document::new(vec![ChipKind::Spc700]);
        doc.timeline[0].nbeats = beat(4);
        doc.timeline[0].chip_channel_cells[0][0] = TimelineCell::single(Block::new(
            beat(0),
            beat(4),
            Pattern {
                events: vec![
                    TimedRowEvent {
                        time: TimeInPattern::beat(beat(0)),
                        ev: RowEvent::note(Note(60)),
                    },
                    TimedRowEvent {
                        time: TimeInPattern::beat(beat(2)),
                        ev: RowEvent::note(Note(64)),
                    },
                ],
                loop_length: None,
            },
        ));
        doc
    }

    #[test]
    fn notes_fire_on_their_ticks() {
        let doc = two_note_doc();
        let tpb = doc.sequencer_options.ticks_per_beat;

        let mut seq = ChannelSequencer::new(0, 0, &doc);
        seq.seek(&doc, GridAndBeat::new(0, beat(0)));

        let mut fired = Vec::new();
        for tick in 0..(4 * tpb) {
            let (_, events) = seq.next_tick(&doc);
            for event in events {
                fired.push((tick, event.note.unwrap()));
            }
        }

        assert_eq!(fired, vec![(0, Note(60)), (2 * tpb, Note(64))]);
    }

    #[test]
    fn frame_wraps_to_start() {
        let doc = two_note_doc();
        let tpb = doc.sequencer_options.ticks_per_beat;

        let mut seq = ChannelSequencer::new(0, 0, &doc);
        seq.seek(&doc, GridAndBeat::new(0, beat(0)));

        // Play through the full frame plus one tick; the note at beat 0
        // fires again after the wrap
        let mut fired = Vec::new();
        for tick in 0..(4 * tpb + 1) {
            let (time, events) = seq.next_tick(&doc);
            for event in events {
                fired.push((tick, time.grid, event.note.unwrap()));
            }
        }

        assert_eq!(fired.last(), Some(&(4 * tpb, 0, Note(60))));
    }

    #[test]
    fn sequencing_is_history_independent() {
        let doc = two_note_doc();
        let tpb = doc.sequencer_options.ticks_per_beat;

        let mut continuous = ChannelSequencer::new(0, 0, &doc);
        continuous.seek(&doc, GridAndBeat::new(0, beat(0)));
        let mut replayed = ChannelSequencer::new(0, 0, &doc);
        replayed.seek(&doc, GridAndBeat::new(0, beat(0)));

        for _ in 0..(2 * 4 * tpb) {
            let (time_a, events_a) = continuous.next_tick(&doc);
            let events_a = events_a.to_vec();
            let (time_b, events_b) = replayed.next_tick(&doc);
            assert_eq!(time_a, time_b);
            assert_eq!(events_a, events_b);
        }
    }

    #[test]
    fn doc_edited_every_tick_is_a_no_op() {
        let doc = two_note_doc();
        let tpb = doc.sequencer_options.ticks_per_beat;

        let mut plain = ChannelSequencer::new(0, 0, &doc);
        plain.seek(&doc, GridAndBeat::new(0, beat(0)));
        let mut reloaded = ChannelSequencer::new(0, 0, &doc);
        reloaded.seek(&doc, GridAndBeat::new(0, beat(0)));

        for _ in 0..(4 * tpb) {
            let (_, events_a) = plain.next_tick(&doc);
            let events_a = events_a.to_vec();
            reloaded.doc_edited(&doc);
            let (_, events_b) = reloaded.next_tick(&doc);
            assert_eq!(events_a, events_b);
        }
    }

    #[test]
    fn tempo_change_preserves_musical_position() {
        let mut doc = two_note_doc();
        let mut seq = ChannelSequencer::new(0, 0, &doc);
        seq.seek(&doc, GridAndBeat::new(0, beat(0)));

        // Advance one beat at 48 ticks/beat
        for _ in 0..48 {
            seq.next_tick(&doc);
        }
        assert_eq!(seq.tick_in_frame, 48);

        doc.sequencer_options.ticks_per_beat = 24;
        seq.tempo_changed(&doc);
        assert_eq!(seq.tick_in_frame, 24);

        // The note at beat 2 (tick 48 at the new rate) fires 24 ticks later
        let mut fired = Vec::new();
        for tick in 0..25_i32 {
            let (_, events) = seq.next_tick(&doc);
            for event in events {
                fired.push((tick, event.note.unwrap()));
            }
        }
        assert_eq!(fired, vec![(24, Note(64))]);
    }

    #[test]
    fn one_tick_per_beat_advances_one_beat_per_tick() {
        let mut doc = two_note_doc();
        doc.sequencer_options.ticks_per_beat = 1;

        let mut seq = ChannelSequencer::new(0, 0, &doc);
        seq.seek(&doc, GridAndBeat::new(0, beat(0)));

        let mut prev_beat = -1;
        for _ in 0..16 {
            let (time, _) = seq.next_tick(&doc);
            let dbeat = if time.beat >= prev_beat { time.beat - prev_beat } else { 1 };
            assert!(dbeat <= 1, "advanced {dbeat} beats in one tick");
            prev_beat = if time.beat == 3 { -1 } else { time.beat };
        }
    }

    #[test]
    fn misordered_events_pile_up_at_later_event() {
        let mut doc = Document::new(vec![ChipKind::Spc700]);
        let tpb = doc.sequencer_options.ticks_per_beat;
        doc.timeline[0].nbeats = beat(4);
        doc.timeline[0].chip_channel_cells[0][0] = TimelineCell::single(Block::new(
            beat(0),
            beat(4),
            Pattern {
                events: vec![
                    // Offset far past the following event
                    TimedRowEvent {
                        time: TimeInPattern { anchor_beat: beat(0), tick_offset: 1000 },
                        ev: RowEvent::note(Note(60)),
                    },
                    TimedRowEvent {
                        time: TimeInPattern::beat(beat(1)),
                        ev: RowEvent::note(Note(64)),
                    },
                ],
                loop_length: None,
            },
        ));

        let mut seq = ChannelSequencer::new(0, 0, &doc);
        seq.seek(&doc, GridAndBeat::new(0, beat(0)));

        let mut fired = Vec::new();
        for tick in 0..(2 * tpb) {
            let (_, events) = seq.next_tick(&doc);
            for event in events {
                fired.push((tick, event.note.unwrap()));
            }
        }

        // Both events play at the later event's tick, earlier one first
        assert_eq!(fired, vec![(tpb, Note(60)), (tpb, Note(64))]);
    }

    #[test]
    fn looped_pattern_repeats_within_block() {
        let mut doc = Document::new(vec![ChipKind::Spc700]);
        let tpb = doc.sequencer_options.ticks_per_beat;
        doc.timeline[0].nbeats = beat(4);
        doc.timeline[0].chip_channel_cells[0][0] = TimelineCell::single(Block::new(
            beat(0),
            beat(4),
            Pattern {
                events: vec![TimedRowEvent {
                    time: TimeInPattern::beat(beat(0)),
                    ev: RowEvent::note(Note(60)),
                }],
                loop_length: Some(beat(1)),
            },
        ));

        let mut seq = ChannelSequencer::new(0, 0, &doc);
        seq.seek(&doc, GridAndBeat::new(0, beat(0)));

        let mut fired = Vec::new();
        for tick in 0..(4 * tpb) {
            let (_, events) = seq.next_tick(&doc);
            for _ in events {
                fired.push(tick);
            }
        }

        assert_eq!(fired, vec![0, tpb, 2 * tpb, 3 * tpb]);
    }
}
