// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The trigger model: single notes, chords, and the macro that pairs a
//! trigger sequence (or the wildcard) with a [Script](crate::script::Script).

use midimacs_core::aspn;
use midimacs_core::Expression;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::argument::ArgumentDefinition;
use crate::script::Script;

/// Structural rule violations. Any of these aborts the offending macro's
/// registration, which in turn aborts the reload that tried to register it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MacroError {
    #[error("wildcard trigger macros can only be used with a MIDI-message argument definition")]
    WildcardWithoutMidi,
    #[error("KILL requires BACKGROUND")]
    KillWithoutBackground,
    #[error("BACKGROUND cannot be combined with {0}")]
    BackgroundConflict(&'static str),
}

/// Matches exactly one held note by MIDI number, then by its predicates.
#[derive(Clone, Debug, PartialEq)]
pub struct MacroNote {
    pub note: u8,
    pub predicates: Vec<Expression>,
}
impl MacroNote {
    pub fn new(note: u8) -> Self {
        Self {
            note,
            predicates: Vec::new(),
        }
    }
}
impl fmt::Display for MacroNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", aspn::midi_to_aspn(self.note, false))?;
        for predicate in &self.predicates {
            write!(f, "{{{predicate}}}")?;
        }
        Ok(())
    }
}

/// Matches `notes.len()` consecutive held notes, compared in pitch order.
/// The note list is sorted by MIDI number at parse time; that order defines
/// the element-wise match.
#[derive(Clone, Debug, PartialEq)]
pub struct MacroChord {
    pub notes: Vec<MacroNote>,
    pub predicates: Vec<Expression>,
}
impl fmt::Display for MacroChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, note) in self.notes.iter().enumerate() {
            if i > 0 {
                write!(f, "|")?;
            }
            write!(f, "{note}")?;
        }
        write!(f, "]")?;
        for predicate in &self.predicates {
            write!(f, "{{{predicate}}}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Trigger {
    Note(MacroNote),
    Chord(MacroChord),
}
impl Trigger {
    /// How many held notes a successful match consumes.
    pub fn note_count(&self) -> usize {
        match self {
            Trigger::Note(_) => 1,
            Trigger::Chord(chord) => chord.notes.len(),
        }
    }

    /// Group predicates distribute onto every trigger inside the group.
    pub fn append_predicates(&mut self, predicates: &[Expression]) {
        match self {
            Trigger::Note(note) => note.predicates.extend_from_slice(predicates),
            Trigger::Chord(chord) => chord.predicates.extend_from_slice(predicates),
        }
    }
}
impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Note(note) => write!(f, "{note}"),
            Trigger::Chord(chord) => write!(f, "{chord}"),
        }
    }
}

/// One parsed macro. `triggers` is `None` for the wildcard form, which is
/// only legal when the script catches raw MIDI messages.
#[derive(Clone, Debug)]
pub struct Macro {
    pub triggers: Option<Vec<Trigger>>,
    pub script: Arc<Script>,
}
impl Macro {
    pub fn new(triggers: Option<Vec<Trigger>>, script: Arc<Script>) -> Result<Self, MacroError> {
        if triggers.is_none()
            && !matches!(script.argument_definition(), ArgumentDefinition::Midi { .. })
        {
            return Err(MacroError::WildcardWithoutMidi);
        }
        Ok(Self { triggers, script })
    }
}
impl fmt::Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.triggers {
            None => write!(f, "*")?,
            Some(triggers) => {
                for (i, trigger) in triggers.iter().enumerate() {
                    if i > 0 {
                        write!(f, "+")?;
                    }
                    write!(f, "{trigger}")?;
                }
            }
        }
        write!(f, " {}", self.script)
    }
}
