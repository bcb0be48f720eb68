// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Argument definitions: what the tail of held notes (or the raw MIDI
//! message that just arrived) means to a script, and how it gets rendered
//! into text.

use log::error;
use midimacs_core::message::{MidiMessage, PlayedNote};
use midimacs_core::{Env, Expression, Value};
use std::fmt;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Named projections of one played note or one MIDI message to text.
#[derive(Clone, Copy, Debug, Display, EnumIter, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ArgumentFormat {
    Midi,
    Aspn,
    AspnUnicode,
    Piano,
    Velocity,
    Time,
    Channel,
    ChannelHex,
    MessageBytes,
    MessageBytesHex,
    #[strum(serialize = "DATA_0")]
    Data0,
    #[strum(serialize = "DATA_1")]
    Data1,
    #[strum(serialize = "DATA_2")]
    Data2,
    #[strum(serialize = "DATA_0_HEX")]
    Data0Hex,
    #[strum(serialize = "DATA_1_HEX")]
    Data1Hex,
    #[strum(serialize = "DATA_2_HEX")]
    Data2Hex,
    Status,
    StatusHex,
    CcValue,
    CcValuePercent,
    CcValueBool,
    None,
}
impl ArgumentFormat {
    /// All names, longest first, for longest-match-wins parsing.
    pub fn names_longest_first() -> Vec<(String, ArgumentFormat)> {
        let mut names: Vec<(String, ArgumentFormat)> = ArgumentFormat::iter()
            .map(|format| (format.to_string(), format))
            .collect();
        names.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));
        names
    }

    pub fn applies_to_notes(&self) -> bool {
        matches!(
            self,
            ArgumentFormat::Midi
                | ArgumentFormat::Aspn
                | ArgumentFormat::AspnUnicode
                | ArgumentFormat::Piano
                | ArgumentFormat::Velocity
                | ArgumentFormat::Time
                | ArgumentFormat::Channel
                | ArgumentFormat::None
        )
    }

    pub fn applies_to_messages(&self) -> bool {
        !matches!(
            self,
            ArgumentFormat::Midi
                | ArgumentFormat::Aspn
                | ArgumentFormat::AspnUnicode
                | ArgumentFormat::Piano
                | ArgumentFormat::Velocity
        )
    }

    pub fn render_note(&self, note: &PlayedNote) -> String {
        match self {
            ArgumentFormat::Midi => note.note.to_string(),
            ArgumentFormat::Aspn => note.aspn(),
            ArgumentFormat::AspnUnicode => note.aspn_unicode(),
            ArgumentFormat::Piano => note.piano_key().to_string(),
            ArgumentFormat::Velocity => note.velocity.to_string(),
            ArgumentFormat::Time => note.time.to_string(),
            ArgumentFormat::Channel => note.channel.to_string(),
            ArgumentFormat::None => String::new(),
            _ => String::new(),
        }
    }

    pub fn render_message(&self, message: &MidiMessage) -> String {
        fn dec(byte: Option<u8>) -> String {
            byte.map_or_else(|| "None".to_string(), |b| b.to_string())
        }
        fn hex(byte: Option<u8>) -> String {
            byte.map_or_else(|| "None".to_string(), |b| format!("{b:#x}"))
        }
        match self {
            ArgumentFormat::MessageBytes => message
                .bytes()
                .iter()
                .map(|byte| byte.to_string())
                .collect::<Vec<_>>()
                .join("-"),
            ArgumentFormat::MessageBytesHex => message
                .bytes()
                .iter()
                .map(|byte| format!("{byte:#x}"))
                .collect::<Vec<_>>()
                .join("-"),
            ArgumentFormat::Data0 => message.data_0().to_string(),
            ArgumentFormat::Data1 => dec(message.data_1()),
            ArgumentFormat::Data2 | ArgumentFormat::CcValue => dec(message.data_2()),
            ArgumentFormat::Data0Hex => format!("{:#x}", message.data_0()),
            ArgumentFormat::Data1Hex => hex(message.data_1()),
            ArgumentFormat::Data2Hex => hex(message.data_2()),
            ArgumentFormat::Status => message.status().to_string(),
            ArgumentFormat::StatusHex => format!("{:#x}", message.status()),
            ArgumentFormat::Channel => message.channel().to_string(),
            ArgumentFormat::ChannelHex => format!("{:#x}", message.channel()),
            ArgumentFormat::CcValuePercent => message.data_2().map_or_else(
                || "None".to_string(),
                |value| ((100.0 * value as f64 / 127.0).round() as i64).to_string(),
            ),
            ArgumentFormat::CcValueBool => message.data_2().map_or_else(
                || "None".to_string(),
                |value| if value >= 64 { "True" } else { "False" }.to_string(),
            ),
            ArgumentFormat::Time => message.time().to_string(),
            ArgumentFormat::None => String::new(),
            _ => String::new(),
        }
    }
}

/// One piece of an f-string: literal text or a `%x` format escape.
#[derive(Clone, Debug, PartialEq)]
pub enum TemplateSegment {
    Literal(String),
    Format(ArgumentFormat),
}

/// A parsed f-string. Rendered once per argument (joiners) or once per
/// invocation (`INVOCATION_FORMAT`, where every format escape stands for
/// the whole processed-arguments string).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FStringTemplate {
    pub segments: Vec<TemplateSegment>,
}
impl FStringTemplate {
    pub fn render_note(&self, note: &PlayedNote) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                TemplateSegment::Literal(text) => text.clone(),
                TemplateSegment::Format(format) => format.render_note(note),
            })
            .collect()
    }

    pub fn render_message(&self, message: &MidiMessage) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                TemplateSegment::Literal(text) => text.clone(),
                TemplateSegment::Format(format) => format.render_message(message),
            })
            .collect()
    }

    pub fn render_invocation(&self, arguments: &str) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                TemplateSegment::Literal(text) => text.clone(),
                TemplateSegment::Format(_) => arguments.to_string(),
            })
            .collect()
    }
}

/// Inclusive argument-count bounds; `hi == None` means unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArgumentRange {
    pub lo: usize,
    pub hi: Option<usize>,
}
impl ArgumentRange {
    pub const UNBOUNDED: ArgumentRange = ArgumentRange { lo: 0, hi: None };
    pub const ZERO: ArgumentRange = ArgumentRange { lo: 0, hi: Some(0) };
    pub const SINGLE: ArgumentRange = ArgumentRange { lo: 1, hi: Some(1) };

    pub fn exactly(n: usize) -> Self {
        Self { lo: n, hi: Some(n) }
    }

    pub fn contains(&self, n: usize) -> bool {
        n >= self.lo && self.hi.map_or(true, |hi| n <= hi)
    }

    pub fn accepts_arguments(&self) -> bool {
        self.hi.map_or(true, |hi| hi > 0)
    }
}
impl fmt::Display for ArgumentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hi {
            Some(hi) if hi == self.lo => write!(f, "[{}]", self.lo),
            Some(hi) => write!(f, "[{}:{}]", self.lo, hi),
            None => write!(f, "[{}:]", self.lo),
        }
    }
}

/// Either a named projection or an f-string, applied per argument.
#[derive(Clone, Debug, PartialEq)]
pub enum FormatSpec {
    Named(ArgumentFormat),
    Template(FStringTemplate),
}

/// Joins per-argument renderings with a separator (default one space).
#[derive(Clone, Debug, PartialEq)]
pub struct Joiner {
    pub separator: String,
    pub format: FormatSpec,
}
impl Joiner {
    pub fn named(format: ArgumentFormat) -> Self {
        Self {
            separator: " ".to_string(),
            format: FormatSpec::Named(format),
        }
    }

    fn render_notes(&self, notes: &[PlayedNote]) -> String {
        let rendered: Vec<String> = notes
            .iter()
            .map(|note| match &self.format {
                FormatSpec::Named(format) => format.render_note(note),
                FormatSpec::Template(template) => template.render_note(note),
            })
            .collect();
        rendered.join(&self.separator)
    }

    fn render_midi(&self, message: &MidiMessage) -> String {
        match &self.format {
            FormatSpec::Named(format) => format.render_message(message),
            FormatSpec::Template(template) => template.render_message(message),
        }
    }
}
impl fmt::Display for Joiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.separator != " " {
            write!(f, "[\"{}\"] ", self.separator)?;
        }
        match &self.format {
            FormatSpec::Named(format) => write!(f, "{format}"),
            FormatSpec::Template(_) => write!(f, "f\"…\""),
        }
    }
}

/// A joiner, or an ordered list of script-text substitutions.
#[derive(Clone, Debug, PartialEq)]
pub enum Processor {
    Joiner(Joiner),
    /// `(replace_token, joiner)` pairs applied to the script text in order.
    Preprocessor(Vec<(String, Joiner)>),
}
impl Processor {
    pub fn is_preprocessor(&self) -> bool {
        matches!(self, Processor::Preprocessor(_))
    }
}

/// The candidate argument tuple assembled by the trie.
#[derive(Clone, Debug)]
pub enum Arguments {
    Notes(Vec<PlayedNote>),
    Midi(MidiMessage),
}
impl Arguments {
    pub fn len(&self) -> usize {
        match self {
            Arguments::Notes(notes) => notes.len(),
            Arguments::Midi(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a processed invocation hands the worker.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessedArguments {
    /// Rendered argument text, destined for stdin (or `INVOCATION_FORMAT`).
    Text(String),
    /// Script-text substitutions, applied before spawning.
    Replacements(Vec<(String, String)>),
}

#[derive(Clone, Debug)]
pub enum ArgumentDefinition {
    Zero,
    PlayedNotes {
        range: ArgumentRange,
        predicates: Vec<Expression>,
        processor: Option<Processor>,
    },
    Midi {
        predicates: Vec<Expression>,
        processor: Option<Processor>,
    },
}
impl ArgumentDefinition {
    pub fn range(&self) -> ArgumentRange {
        match self {
            ArgumentDefinition::Zero => ArgumentRange::ZERO,
            ArgumentDefinition::PlayedNotes { range, .. } => *range,
            ArgumentDefinition::Midi { .. } => ArgumentRange::SINGLE,
        }
    }

    pub fn processor(&self) -> Option<&Processor> {
        match self {
            ArgumentDefinition::Zero => None,
            ArgumentDefinition::PlayedNotes { processor, .. } => processor.as_ref(),
            ArgumentDefinition::Midi { processor, .. } => processor.as_ref(),
        }
    }

    pub fn uses_preprocessor(&self) -> bool {
        self.processor().is_some_and(Processor::is_preprocessor)
    }

    /// Count, type, and predicate check, in that order. This is the gate the
    /// trie consults before queueing an invocation.
    pub fn accepts(&self, arguments: &Arguments) -> bool {
        match (self, arguments) {
            (ArgumentDefinition::Zero, Arguments::Notes(notes)) => notes.is_empty(),
            (ArgumentDefinition::PlayedNotes { range, predicates, .. }, Arguments::Notes(notes)) => {
                range.contains(notes.len()) && test_predicates(predicates, &notes_env(notes))
            }
            (ArgumentDefinition::Midi { predicates, .. }, Arguments::Midi(message)) => {
                test_predicates(predicates, &message_env(message))
            }
            _ => false,
        }
    }

    /// Renders the accepted arguments. Call only after [Self::accepts].
    pub fn process(&self, arguments: &Arguments) -> ProcessedArguments {
        let processor = match self.processor() {
            Some(processor) => processor,
            // Bare argument definitions render nothing per argument.
            None => {
                return ProcessedArguments::Text(default_rendering(arguments));
            }
        };
        match processor {
            Processor::Joiner(joiner) => ProcessedArguments::Text(apply_joiner(joiner, arguments)),
            Processor::Preprocessor(replacements) => ProcessedArguments::Replacements(
                replacements
                    .iter()
                    .map(|(token, joiner)| (token.clone(), apply_joiner(joiner, arguments)))
                    .collect(),
            ),
        }
    }
}
impl fmt::Display for ArgumentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentDefinition::Zero => Ok(()),
            ArgumentDefinition::PlayedNotes {
                range,
                predicates,
                processor,
            } => {
                write!(f, "NOTES{range}")?;
                for predicate in predicates {
                    write!(f, "{{{predicate}}}")?;
                }
                if let Some(Processor::Joiner(joiner)) = processor {
                    write!(f, "({joiner})")?;
                }
                Ok(())
            }
            ArgumentDefinition::Midi {
                predicates,
                processor,
            } => {
                write!(f, "MIDI")?;
                for predicate in predicates {
                    write!(f, "{{{predicate}}}")?;
                }
                if let Some(Processor::Joiner(joiner)) = processor {
                    write!(f, "({joiner})")?;
                }
                Ok(())
            }
        }
    }
}

fn apply_joiner(joiner: &Joiner, arguments: &Arguments) -> String {
    match arguments {
        Arguments::Notes(notes) => joiner.render_notes(notes),
        Arguments::Midi(message) => joiner.render_midi(message),
    }
}

/// Without a processor the NONE format applies: every argument renders as
/// the empty string, space-joined.
fn default_rendering(arguments: &Arguments) -> String {
    match arguments {
        Arguments::Notes(notes) => vec![String::new(); notes.len()].join(" "),
        Arguments::Midi(_) => String::new(),
    }
}

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

/// Variables for NOTES-argument predicates.
pub fn notes_env(notes: &[PlayedNote]) -> Env {
    let mut env = Env::new();
    env.bind(
        &["NOTES", "ns"],
        Value::List(notes.iter().map(|note| Value::from(note.note)).collect()),
    );
    let channels: Vec<u8> = notes.iter().map(|note| note.channel).collect();
    env.bind(&["CHANNEL", "c"], channel_value(&channels));
    env.bind(
        &["CHANNELS", "cs"],
        Value::List(channels.iter().map(|&ch| Value::from(ch)).collect()),
    );
    env.bind(
        &["VELOCITIES", "vs"],
        Value::List(notes.iter().map(|note| Value::from(note.velocity)).collect()),
    );
    env.bind(
        &["TIMES", "ts"],
        Value::List(notes.iter().map(|note| Value::Int(note.time)).collect()),
    );
    let elapsed: Vec<Value> = notes
        .iter()
        .enumerate()
        .map(|(i, note)| {
            if i == 0 {
                Value::Int(0)
            } else {
                Value::Int(note.time - notes[i - 1].time)
            }
        })
        .collect();
    env.bind(&["ELAPSED_TIMES", "ets"], Value::List(elapsed));
    if notes.is_empty() {
        for names in [
            ["NOTES_START_TIME", "nst"],
            ["NOTES_FINISH_TIME", "nft"],
            ["NOTES_ELAPSED_TIME", "net"],
            ["NOTES_MIN_VELOCITY", "nminv"],
            ["NOTES_MAX_VELOCITY", "nmaxv"],
            ["NOTES_AVERAGE_VELOCITY", "navgv"],
        ] {
            env.bind(&names, Value::None);
        }
    } else {
        let start = notes[0].time;
        let finish = notes[notes.len() - 1].time;
        let velocities: Vec<u8> = notes.iter().map(|note| note.velocity).collect();
        env.bind(&["NOTES_START_TIME", "nst"], Value::Int(start));
        env.bind(&["NOTES_FINISH_TIME", "nft"], Value::Int(finish));
        env.bind(&["NOTES_ELAPSED_TIME", "net"], Value::Int(finish - start));
        env.bind(
            &["NOTES_MIN_VELOCITY", "nminv"],
            Value::from(*velocities.iter().min().unwrap()),
        );
        env.bind(
            &["NOTES_MAX_VELOCITY", "nmaxv"],
            Value::from(*velocities.iter().max().unwrap()),
        );
        let average =
            velocities.iter().map(|&v| v as f64).sum::<f64>() / velocities.len() as f64;
        env.bind(&["NOTES_AVERAGE_VELOCITY", "navgv"], Value::Float(average));
    }
    env
}

/// Variables for MIDI-argument predicates.
pub fn message_env(message: &MidiMessage) -> Env {
    fn byte_value(byte: Option<u8>) -> Value {
        byte.map_or(Value::None, Value::from)
    }
    let mut env = Env::new();
    env.bind(
        &["MESSAGE", "m"],
        Value::List(message.bytes().iter().map(|&b| Value::from(b)).collect()),
    );
    env.bind(&["DATA_0", "d0"], Value::from(message.data_0()));
    env.bind(&["DATA_1", "d1"], byte_value(message.data_1()));
    env.bind(&["DATA_2", "d2"], byte_value(message.data_2()));
    env.bind(&["STATUS", "s"], Value::from(message.status()));
    env.bind(&["CHANNEL", "c"], Value::from(message.channel()));
    env.bind(&["TIME", "t"], Value::Int(message.time()));
    env.bind(&["CC_VALUE", "ccv"], byte_value(message.data_2()));
    env.bind(&["CC_FUNCTION", "ccf"], byte_value(message.data_1()));
    env
}

/// A single channel binds as a scalar, a mixed set as the list itself.
fn channel_value(channels: &[u8]) -> Value {
    let mut unique: Vec<u8> = channels.to_vec();
    unique.sort_unstable();
    unique.dedup();
    match unique.as_slice() {
        [single] => Value::from(*single),
        _ => Value::List(unique.iter().map(|&ch| Value::from(ch)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(note: u8, velocity: u8, time: i64) -> PlayedNote {
        PlayedNote::new(note, 0, velocity, time)
    }

    #[test]
    fn longest_match_ordering() {
        let names = ArgumentFormat::names_longest_first();
        let aspn_unicode = names
            .iter()
            .position(|(name, _)| name == "ASPN_UNICODE")
            .unwrap();
        let aspn = names.iter().position(|(name, _)| name == "ASPN").unwrap();
        assert!(aspn_unicode < aspn);
    }

    #[test]
    fn joiner_renders_aspn_chord() {
        let joiner = Joiner {
            separator: "-".to_string(),
            format: FormatSpec::Named(ArgumentFormat::Aspn),
        };
        let arguments = Arguments::Notes(vec![note(60, 90, 0), note(64, 90, 1), note(67, 90, 2)]);
        let definition = ArgumentDefinition::PlayedNotes {
            range: ArgumentRange::UNBOUNDED,
            predicates: vec![],
            processor: Some(Processor::Joiner(joiner)),
        };
        assert_eq!(
            definition.process(&arguments),
            ProcessedArguments::Text("C4-E4-G4".to_string())
        );
    }

    #[test]
    fn range_gating() {
        let definition = ArgumentDefinition::PlayedNotes {
            range: ArgumentRange { lo: 1, hi: Some(2) },
            predicates: vec![],
            processor: None,
        };
        assert!(!definition.accepts(&Arguments::Notes(vec![])));
        assert!(definition.accepts(&Arguments::Notes(vec![note(60, 90, 0)])));
        assert!(!definition.accepts(&Arguments::Notes(vec![
            note(60, 90, 0),
            note(62, 90, 1),
            note(64, 90, 2),
        ])));
    }

    #[test]
    fn zero_rejects_nonempty() {
        assert!(ArgumentDefinition::Zero.accepts(&Arguments::Notes(vec![])));
        assert!(!ArgumentDefinition::Zero.accepts(&Arguments::Notes(vec![note(60, 90, 0)])));
    }

    #[test]
    fn midi_predicate_gating() {
        let definition = ArgumentDefinition::Midi {
            predicates: vec![Expression::parse("s == 11 and d1 == 74").unwrap()],
            processor: None,
        };
        let matching = MidiMessage::new(vec![0xB0, 74, 64], 0);
        let wrong_cc = MidiMessage::new(vec![0xB0, 73, 64], 0);
        assert!(definition.accepts(&Arguments::Midi(matching)));
        assert!(!definition.accepts(&Arguments::Midi(wrong_cc)));
    }

    #[test]
    fn failing_predicate_is_false_not_fatal() {
        let definition = ArgumentDefinition::PlayedNotes {
            range: ArgumentRange::UNBOUNDED,
            predicates: vec![Expression::parse("no_such_name > 1").unwrap()],
            processor: None,
        };
        assert!(!definition.accepts(&Arguments::Notes(vec![note(60, 90, 0)])));
    }

    #[test]
    fn notes_env_stats() {
        let env = notes_env(&[note(60, 80, 100), note(64, 90, 250)]);
        assert_eq!(env.get("nminv"), Some(&Value::Int(80)));
        assert_eq!(env.get("nmaxv"), Some(&Value::Int(90)));
        assert_eq!(env.get("net"), Some(&Value::Int(150)));
        assert_eq!(env.get("navgv"), Some(&Value::Float(85.0)));
        assert_eq!(env.get("CHANNEL"), Some(&Value::Int(0)));
    }

    #[test]
    fn invocation_template() {
        let template = FStringTemplate {
            segments: vec![
                TemplateSegment::Literal("notify-send ".to_string()),
                TemplateSegment::Format(ArgumentFormat::None),
            ],
        };
        assert_eq!(template.render_invocation("hello"), "notify-send hello");
    }

    #[test]
    fn cc_projections() {
        let message = MidiMessage::new(vec![0xB0, 74, 127], 0);
        assert_eq!(ArgumentFormat::CcValue.render_message(&message), "127");
        assert_eq!(
            ArgumentFormat::CcValuePercent.render_message(&message),
            "100"
        );
        assert_eq!(ArgumentFormat::CcValueBool.render_message(&message), "True");
        assert_eq!(
            ArgumentFormat::MessageBytesHex.render_message(&message),
            "0xb0-0x4a-0x7f"
        );
    }
}
