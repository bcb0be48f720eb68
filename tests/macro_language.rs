// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Macro-language coverage that crosses the parser/engine boundary: what
//! parses must also dispatch the way the text reads.

use midimacs::listener::{CallbackScripts, ControlTriggers, Listener};
use midimacs::parse_macro_file;
use midimacs::{MacroTree, RuntimeContext};
use std::sync::Arc;

fn listener_for(macros: &str, context: &Arc<RuntimeContext>) -> Arc<Listener> {
    let tree = MacroTree::from_macros(parse_macro_file(macros, "test", "profile", None).unwrap());
    Listener::new(
        "profile".to_string(),
        "fake input".to_string(),
        tree,
        None,
        ControlTriggers::default(),
        CallbackScripts::default(),
        Arc::clone(context),
    )
}

fn press_and_release(listener: &Listener, notes: &[(u8, u8)]) {
    for (note, velocity) in notes {
        listener.handle_midi(&[0x90, *note, *velocity], midimacs_core::time::now_nanos());
    }
    for (note, _) in notes {
        listener.handle_midi(&[0x80, *note, 0], midimacs_core::time::now_nanos());
    }
}

#[test]
fn unicode_spellings_match_their_ascii_twins() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let context = Arc::new(RuntimeContext::new());
    // C♯4 (unicode sharp, unicode arrow) is MIDI 61, same as C#4
    let listener = listener_for(
        &format!("C♯4 → echo sharp >> {}\n", out.display()),
        &context,
    );
    press_and_release(&listener, &[(61, 90)]);
    listener.stop();
    // non-BLOCK invocation: the child may outlive the worker briefly
    let mut text = String::new();
    for _ in 0..100 {
        text = std::fs::read_to_string(&out).unwrap_or_default();
        if !text.is_empty() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    assert_eq!(text, "sharp\n");
}

#[test]
fn double_accidentals_shift_by_two() {
    let macros = parse_macro_file("C𝄪4 -> true\nD𝄫4 -> true\n", "t", "p", None).unwrap();
    for parsed in &macros {
        let triggers = parsed.triggers.as_ref().unwrap();
        let midimacs::Trigger::Note(note) = &triggers[0] else {
            panic!("expected note");
        };
        // both spell MIDI 62
        assert_eq!(note.note, 62);
    }
}

#[test]
fn sequences_require_order() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let context = Arc::new(RuntimeContext::new());
    let listener = listener_for(
        &format!("C4+E4 [BLOCK]-> echo seq >> {}", out.display()),
        &context,
    );
    // E4 before C4: the sequence macro must not fire
    press_and_release(&listener, &[(64, 90), (60, 90)]);
    // C4 then E4 fires
    press_and_release(&listener, &[(60, 90), (64, 90)]);
    listener.stop();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "seq\n");
}

#[test]
fn fstring_joiner_renders_per_note() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let context = Arc::new(RuntimeContext::new());
    let listener = listener_for(
        &format!(
            "NOTES[2]([\",\"] f\"%a@%v\") [BLOCK]-> cat > {}",
            out.display()
        ),
        &context,
    );
    press_and_release(&listener, &[(60, 90), (64, 80)]);
    listener.stop();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "C4@90,E4@80");
}

#[test]
fn invocation_format_wraps_the_argument_string() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let context = Arc::new(RuntimeContext::new());
    let listener = listener_for(
        &format!(
            "NOTES[2](ASPN) [BLOCK|INVOCATION_FORMAT=f\"<%n>\"]-> cat > {}",
            out.display()
        ),
        &context,
    );
    press_and_release(&listener, &[(60, 90), (64, 80)]);
    listener.stop();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "<C4 E4>");
}

#[test]
fn group_predicates_apply_to_every_member() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let context = Arc::new(RuntimeContext::new());
    let listener = listener_for(
        &format!("(C4+E4){{v > 85}} [BLOCK]-> echo loud >> {}", out.display()),
        &context,
    );
    // E4 at velocity 80 fails the distributed predicate
    press_and_release(&listener, &[(60, 90), (64, 80)]);
    press_and_release(&listener, &[(60, 90), (64, 95)]);
    listener.stop();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "loud\n");
}

#[test]
fn velocity_predicates_on_single_notes() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let context = Arc::new(RuntimeContext::new());
    let listener = listener_for(
        &format!("C4{{v >= 100}} [BLOCK]-> echo hard >> {}", out.display()),
        &context,
    );
    press_and_release(&listener, &[(60, 60)]);
    press_and_release(&listener, &[(60, 110)]);
    listener.stop();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "hard\n");
}

#[test]
fn parse_errors_carry_positions() {
    let err = parse_macro_file("C4 ->", "macros", "p", None).unwrap_err();
    assert!(err.to_string().contains("source: <macros>"));

    let err = parse_macro_file("C4+H4 -> echo", "macros", "p", None).unwrap_err();
    assert!(err.to_string().contains("position:1,4"));

    let err = parse_macro_file("\n\n  129 -> echo", "macros", "p", None).unwrap_err();
    assert!(err.message.contains("Invalid MIDI note: 129"));
    assert_eq!(err.position, (2, 2));
}

#[test]
fn longer_and_shorter_macros_share_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let context = Arc::new(RuntimeContext::new());
    let listener = listener_for(
        &format!(
            "C4 [BLOCK]-> echo one >> {out}\nC4+E4 [BLOCK]-> echo two >> {out}\n",
            out = out.display()
        ),
        &context,
    );
    press_and_release(&listener, &[(60, 90)]);
    press_and_release(&listener, &[(60, 90), (64, 90)]);
    listener.stop();
    let text = std::fs::read_to_string(&out).unwrap();
    // two scripts, two workers: the set is fixed, the interleaving is not
    let mut lines: Vec<&str> = text.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["one", "two"]);
}
