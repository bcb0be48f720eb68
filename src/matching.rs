// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Non-consuming trigger matching. Callers advance their own cursor by
//! [Trigger::note_count] on success.

use log::error;
use midimacs_core::message::PlayedNote;
use midimacs_core::{Env, Expression, Value};

use crate::macros::{MacroChord, MacroNote, Trigger};

pub fn match_trigger(trigger: &Trigger, held: &[PlayedNote], position: usize) -> bool {
    match trigger {
        Trigger::Note(note) => match_note(note, held, position),
        Trigger::Chord(chord) => match_chord(chord, held, position),
    }
}

fn match_note(macro_note: &MacroNote, held: &[PlayedNote], position: usize) -> bool {
    let played = &held[position];
    if played.note != macro_note.note {
        return false;
    }
    if macro_note.predicates.is_empty() {
        return true;
    }
    let mut env = Env::new();
    env.bind(&["PLAYED_NOTE", "pn"], Value::from(played.note));
    env.bind(&["VELOCITY", "v"], Value::from(played.velocity));
    env.bind(&["TIME", "t"], Value::Int(played.time));
    env.bind(&["CHANNEL", "c"], Value::from(played.channel));
    env.bind(
        &["ELAPSED_TIME", "et"],
        if position == 0 {
            Value::None
        } else {
            Value::Int(played.time - held[position - 1].time)
        },
    );
    test_predicates(&macro_note.predicates, &env)
}

fn match_chord(chord: &MacroChord, held: &[PlayedNote], position: usize) -> bool {
    let length = chord.notes.len();
    let slice = &held[position..position + length];
    // The held slice is compared in pitch order, but each note keeps its
    // original position so ELAPSED_TIME still refers to press order. The
    // sort is stable: equal pitches stay in press order.
    let mut by_pitch: Vec<(usize, &PlayedNote)> = slice
        .iter()
        .enumerate()
        .map(|(offset, note)| (position + offset, note))
        .collect();
    by_pitch.sort_by_key(|(_, note)| note.note);
    for (macro_note, (played_position, _)) in chord.notes.iter().zip(&by_pitch) {
        if !match_note(macro_note, held, *played_position) {
            return false;
        }
    }
    if chord.predicates.is_empty() {
        return true;
    }
    let start_time = slice[0].time;
    let finish_time = slice[length - 1].time;
    let velocities: Vec<u8> = slice.iter().map(|note| note.velocity).collect();
    let channels: Vec<u8> = slice.iter().map(|note| note.channel).collect();
    let mut unique_channels = channels.clone();
    unique_channels.sort_unstable();
    unique_channels.dedup();

    let mut env = Env::new();
    env.bind(
        &["CHANNEL", "c"],
        match unique_channels.as_slice() {
            [single] => Value::from(*single),
            _ => Value::List(unique_channels.iter().map(|&ch| Value::from(ch)).collect()),
        },
    );
    env.bind(&["CHORD_START_TIME", "cst"], Value::Int(start_time));
    env.bind(&["CHORD_FINISH_TIME", "cft"], Value::Int(finish_time));
    env.bind(
        &["CHORD_ELAPSED_TIME", "cet"],
        Value::Int(finish_time - start_time),
    );
    env.bind(
        &["CHORD_MIN_VELOCITY", "cminv"],
        Value::from(*velocities.iter().min().expect("chords are non-empty")),
    );
    env.bind(
        &["CHORD_MAX_VELOCITY", "cmaxv"],
        Value::from(*velocities.iter().max().expect("chords are non-empty")),
    );
    let average = velocities.iter().map(|&v| v as f64).sum::<f64>() / velocities.len() as f64;
    env.bind(&["CHORD_AVERAGE_VELOCITY", "cavgv"], Value::Float(average));
    test_predicates(&chord.predicates, &env)
}

/// A predicate that fails to evaluate is a non-match, not a crash; the
/// failure is logged and later predicates are not consulted.
fn test_predicates(predicates: &[Expression], env: &Env) -> bool {
    for predicate in predicates {
        match predicate.eval_truthy(env) {
            Ok(true) => continue,
            Ok(false) => return false,
            Err(err) => {
                error!("failed to evaluate match predicate: {predicate}: {err}");
                return false;
            }
        }
    }
    true
}
