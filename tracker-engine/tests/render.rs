//! End-to-end render scenarios: build a document, render PCM, and check the
//! audio and sequencer positions that come out.

use std::sync::Arc;
use test_log::test;
use tracker_engine::doc::{Adsr, BeatFraction, ChipKind, Document, Note};
use tracker_engine::doc_util;
use tracker_engine::{AudioOptions, GridAndBeat, OverallSynth, SharedDocument};

const SAMPLE_RATE: u32 = 48000;

fn beat(n: i64) -> BeatFraction {
    BeatFraction::from_integer(n)
}

fn synth_for(doc: Document) -> OverallSynth<Arc<Document>> {
    OverallSynth::new(2, SAMPLE_RATE, Arc::new(doc), AudioOptions::default())
}

/// Samples per sequencer tick at the given document's tempo settings.
fn samples_per_tick(doc: &Document) -> f64 {
    let options = &doc.sequencer_options;
    f64::from(SAMPLE_RATE) * 60.0 / options.target_tempo / f64::from(options.ticks_per_beat)
}

#[test]
fn empty_document_renders_noise_floor() {
    let mut synth = synth_for(Document::new(vec![ChipKind::Spc700]));

    let mut output = vec![0_i16; 2 * 1024];
    synth.render(&mut output);

    // The DSP's output DAC inversion leaves a 1-LSB floor on silence
    assert!(output.iter().all(|&sample| sample.unsigned_abs() <= 1));
}

#[test]
fn single_note_becomes_audible_within_one_tick() {
    let mut doc = doc_util::single_note_document(Note(69), Adsr::INFINITE);
    doc.sequencer_options.target_tempo = 150.0;
    doc.sequencer_options.ticks_per_beat = 48;
    let tick_samples = samples_per_tick(&doc) as usize;

    let mut synth = synth_for(doc);
    synth.seek(GridAndBeat::new(0, beat(0)));

    // Two beats at 150 BPM
    let nsamp = 2 * 48 * tick_samples;
    let mut output = vec![0_i16; 2 * nsamp];
    synth.render(&mut output);

    // Key-on happens on the first tick; allow the DSP's 5-sample restart
    // delay plus BRR warm-up inside the first tick's span
    let first_tick = &output[..2 * 2 * tick_samples];
    assert!(first_tick.iter().any(|&sample| sample.unsigned_abs() > 200));

    // Infinite sustain: the last quarter of the render is still loud
    let tail = &output[output.len() - output.len() / 4..];
    let peak = tail.iter().map(|&sample| i32::from(sample.unsigned_abs())).max().unwrap();
    assert!(peak > 200, "sustained note decayed, peak {peak}");
}

#[test]
fn note_decays_under_finite_envelope() {
    // Full decay straight to zero sustain
    let adsr = Adsr { attack_rate: 0xF, decay_rate: 0x7, sustain_level: 0x0, decay_2: 0x1F };
    let doc = doc_util::single_note_document(Note(69), adsr);

    let mut synth = synth_for(doc);
    synth.seek(GridAndBeat::new(0, beat(0)));

    let mut output = vec![0_i16; 2 * 48000];
    synth.render(&mut output);

    let head = &output[..8000];
    let tail = &output[output.len() - 8000..];
    let head_peak = head.iter().map(|&s| i32::from(s.unsigned_abs())).max().unwrap();
    let tail_peak = tail.iter().map(|&s| i32::from(s.unsigned_abs())).max().unwrap();

    assert!(head_peak > 500, "note never became audible, peak {head_peak}");
    assert!(tail_peak <= 1, "note failed to decay, tail peak {tail_peak}");
}

#[test]
fn second_note_retriggers_amplitude() {
    let mut doc = doc_util::two_note_document(Note(69), Note(57), 2);
    doc.sequencer_options.target_tempo = 120.0;
    let tick_samples = samples_per_tick(&doc);
    let second_note_sample = (2.0 * 48.0 * tick_samples) as usize;

    let mut synth = synth_for(doc);
    synth.seek(GridAndBeat::new(0, beat(0)));

    let nsamp = 4 * second_note_sample / 2;
    let mut output = vec![0_i16; 2 * nsamp];
    synth.render(&mut output);

    // Both notes sustain forever; audio exists before and after the second
    // note-on boundary (the second note swaps to the triangle instrument)
    let before = &output[2 * (second_note_sample - 4800)..2 * second_note_sample];
    let after = &output[2 * second_note_sample..2 * (second_note_sample + 4800)];
    assert!(before.iter().any(|&s| s.unsigned_abs() > 200));
    assert!(after.iter().any(|&s| s.unsigned_abs() > 100));
}

#[test]
fn tempo_change_mid_render_doubles_tick_rate() {
    let mut doc = doc_util::single_note_document(Note(69), Adsr::INFINITE);
    doc.sequencer_options.target_tempo = 120.0;
    // 24 ticks/beat keeps the doubled tempo byte below the 255 clamp
    doc.sequencer_options.ticks_per_beat = 24;
    let shared = SharedDocument::new(doc.clone());

    let mut synth =
        OverallSynth::new(2, SAMPLE_RATE, Arc::clone(&shared), AudioOptions::default());
    synth.seek(GridAndBeat::new(0, beat(0)));

    let half = 2 * 48000;
    let mut output = vec![0_i16; half];
    synth.render(&mut output);
    let first_half_time = synth.sequencer_time().expect("sequencer ran");
    let first_half_ticks =
        first_half_time.beat * first_half_time.ticks_per_beat + first_half_time.tick;

    doc.sequencer_options.target_tempo = 240.0;
    shared.publish(doc);
    synth.tempo_changed();

    synth.render(&mut output);
    let second_half_time = synth.sequencer_time().expect("sequencer ran");
    let second_half_ticks =
        second_half_time.beat * second_half_time.ticks_per_beat + second_half_time.tick
            - first_half_ticks;

    // Twice the tempo, twice the ticks (within rounding of the tempo byte and
    // the timer/tick quantization at the half boundary)
    let ratio = f64::from(second_half_ticks) / f64::from(first_half_ticks);
    assert!((ratio - 2.0).abs() < 0.1, "tick ratio {ratio}");
}

#[test]
fn absurd_tempo_clamps_and_completes() {
    let mut doc = doc_util::single_note_document(Note(69), Adsr::INFINITE);
    doc.sequencer_options.ticks_per_beat = 1;
    doc.sequencer_options.target_tempo = 999.0;

    let mut synth = synth_for(doc);
    synth.seek(GridAndBeat::new(0, beat(0)));

    let mut output = vec![0_i16; 2 * 4096];
    synth.render(&mut output);

    // The tempo accumulator advances the sequencer at most once per timer
    // firing, so even at 1 tick/beat the cursor moves at most one beat per
    // tick and render returns with the cursor in bounds
    let time = synth.sequencer_time().expect("sequencer ran");
    assert!(time.beat < 16, "cursor ran past the frame: {time:?}");
}

#[test]
fn mono_and_multi_chip_render_completes() {
    let mut doc = Document::new(vec![ChipKind::Spc700, ChipKind::Nes2A03]);
    doc.samples[0] = Some(doc_util::pulse_50());
    doc.instruments[0] = Some(doc_util::music_box(0));

    let mut synth = OverallSynth::new(1, 32040, Arc::new(doc), AudioOptions::default());

    let mut output = vec![0_i16; 4096];
    synth.render(&mut output);
    synth.render(&mut output);
}

#[test]
fn stopping_keys_voices_off() {
    let doc = doc_util::single_note_document(Note(69), Adsr::INFINITE);
    let mut synth = synth_for(doc);
    synth.seek(GridAndBeat::new(0, beat(0)));

    let mut output = vec![0_i16; 2 * 24000];
    synth.render(&mut output);
    assert!(output.iter().any(|&s| s.unsigned_abs() > 200));

    synth.stop_playback();
    assert!(synth.sequencer_time().is_none());

    // Release decays at 8 levels per sample from 0x7FF: silent well within
    // half a second
    synth.render(&mut output);
    let tail = &output[output.len() - 8000..];
    assert!(tail.iter().all(|&s| s.unsigned_abs() <= 1));
}

#[test]
fn seek_mid_document_starts_from_that_row() {
    let mut doc = doc_util::two_note_document(Note(69), Note(57), 8);
    doc.sequencer_options.target_tempo = 120.0;

    let mut synth = synth_for(doc);
    // Start at beat 8, right on the second note
    synth.seek(GridAndBeat::new(0, beat(8)));

    let mut output = vec![0_i16; 2 * 24000];
    synth.render(&mut output);

    assert!(output.iter().any(|&s| s.unsigned_abs() > 100));
    let time = synth.sequencer_time().expect("sequencer ran");
    assert!(time.beat >= 8);
}
