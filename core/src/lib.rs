// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Fundamental types for the macro engine: pitch names, raw MIDI events,
//! monotonic time, and the sandboxed predicate expression language.

/// Maps between MIDI note numbers and American Standard Pitch Notation.
pub mod aspn;
/// The sandboxed expression language for match-predicates and templates.
pub mod expr;
/// [message::PlayedNote] and the raw [message::MidiMessage].
pub mod message;
/// Monotonic nanosecond timestamps and conversions.
pub mod time;

pub use expr::{Env, Expression, ExprError, Value};
pub use message::{MidiMessage, PlayedNote};
