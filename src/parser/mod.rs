// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Turns macro-file text into [Macro] values. The grammar, informally:
//!
//! ```text
//! macro       := [ triggers ]?  argDef?  interp?  flags?  arrow  script
//! triggers    := '*' | trigger ('+' trigger)*
//! trigger     := note | chord | '(' triggers ')' predicate*
//! chord       := '[' note ('|' note)* ']' predicate*
//! predicate   := '{' balanced-expr '}'
//! argDef      := 'NOTES' range? predicate* processor?
//!              | 'MIDI' predicate* processor?
//! flags       := '[' flag ('|' flag)* ']'
//! arrow       := '->' | '→'
//! script      := rest-of-line | '{' newline tab-indented-lines '}'
//! ```
//!
//! The parser never executes scripts or predicates; predicates are parsed
//! into expression trees so a malformed one fails the reload instead of the
//! first match.

pub mod buffer;

pub use buffer::{ParseBuffer, ParseError, Position};

use log::debug;
use midimacs_core::{aspn, Expression};
use std::sync::Arc;

use crate::argument::{
    ArgumentDefinition, ArgumentFormat, ArgumentRange, FStringTemplate, FormatSpec, Joiner,
    Processor, TemplateSegment,
};
use crate::macros::{Macro, MacroChord, MacroNote, Trigger};
use crate::script::{Script, ScriptFlags};

const ACCIDENTALS: &str = "#♯b♭𝄪𝄫";
const ARROW_DESCRIPTION: &str = "arrow operator (->, →)";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArgKind {
    Notes,
    Midi,
}

/// Parses a whole macro file. `source_name` labels errors; `profile` and
/// `subprofile` label every produced script's logs.
pub fn parse_macro_file(
    text: &str,
    source_name: &str,
    profile: &str,
    subprofile: Option<&str>,
) -> Result<Vec<Macro>, ParseError> {
    let mut buffer = ParseBuffer::new(text, source_name);
    let mut macros = Vec::new();
    loop {
        buffer.skip_till_data(true);
        if buffer.at_end_of_file() {
            return Ok(macros);
        }
        let parsed = parse_macro(&mut buffer, profile, subprofile)?;
        debug!("adding macro {parsed}");
        macros.push(parsed);
    }
}

/// Parses a control-trigger pattern (enable / cycle-subprofiles). Same
/// trigger grammar, no argument definition, no script.
pub fn parse_control_trigger(text: &str, source_name: &str) -> Result<Vec<Trigger>, ParseError> {
    let mut buffer = ParseBuffer::new(text, source_name);
    buffer.skip_whitespace();
    let triggers = parse_triggers(&mut buffer)?;
    buffer.skip_whitespace();
    if !buffer.at_end_of_line() {
        return Err(ParseError::expected_got(
            Some("end of trigger"),
            Some(&buffer.peek()?.to_string()),
            &buffer,
        ));
    }
    Ok(triggers)
}

fn parse_macro(
    buffer: &mut ParseBuffer,
    profile: &str,
    subprofile: Option<&str>,
) -> Result<Macro, ParseError> {
    let macro_start = buffer.at();
    let first = buffer.peek()?;
    let triggers = if first == '*' {
        buffer.advance(1);
        None
    } else if is_trigger_start(first) {
        Some(parse_triggers(buffer)?)
    } else {
        Some(Vec::new())
    };
    buffer.skip_whitespace();

    let argument_definition = parse_argument_definition(buffer)?;
    buffer.skip_whitespace();

    let interpreter = if !buffer.at_end_of_line() && buffer.peek()? == '(' {
        Some(parse_interpreter(buffer)?)
    } else {
        None
    };
    buffer.skip_whitespace();

    let flags_start = buffer.at();
    let parsed_flags = if !buffer.at_end_of_line() && buffer.peek()? == '[' {
        parse_flags(buffer)?
    } else {
        ParsedFlags::default()
    };
    buffer.skip_whitespace();

    parse_arrow(buffer)?;
    let body = parse_script_text(buffer)?;

    let script = Script::new(
        body,
        interpreter,
        parsed_flags.flags,
        parsed_flags.locks,
        parsed_flags.invocation_format,
        argument_definition,
        profile,
        subprofile,
    )
    .map_err(|err| ParseError::at(err.to_string(), buffer, flags_start))?;
    Macro::new(triggers, Arc::new(script))
        .map_err(|err| ParseError::at(err.to_string(), buffer, macro_start))
}

fn is_trigger_start(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, 'A'..='G' | 'a'..='g' | '(' | '[')
}

fn parse_triggers(buffer: &mut ParseBuffer) -> Result<Vec<Trigger>, ParseError> {
    let mut triggers = Vec::new();
    loop {
        buffer.skip_whitespace();
        parse_trigger_element(buffer, &mut triggers)?;
        let after_trigger = buffer.at();
        buffer.skip_whitespace();
        if !buffer.at_end_of_line() && buffer.peek()? == '+' {
            buffer.advance(1);
            continue;
        }
        buffer.jump(after_trigger);
        return Ok(triggers);
    }
}

fn parse_trigger_element(
    buffer: &mut ParseBuffer,
    triggers: &mut Vec<Trigger>,
) -> Result<(), ParseError> {
    match buffer.peek()? {
        '(' => {
            buffer.advance(1);
            let mut inner = parse_triggers(buffer)?;
            buffer.skip_whitespace();
            expect_char(buffer, ')')?;
            let predicates = parse_predicates(buffer)?;
            // Group predicates distribute left-to-right onto every trigger
            // inside the group.
            for trigger in &mut inner {
                trigger.append_predicates(&predicates);
            }
            triggers.append(&mut inner);
            Ok(())
        }
        '[' => {
            let chord = parse_chord(buffer)?;
            triggers.push(Trigger::Chord(chord));
            Ok(())
        }
        c if c.is_ascii_digit() || is_base_pitch(c) => {
            let note = parse_note(buffer)?;
            triggers.push(Trigger::Note(note));
            Ok(())
        }
        other => Err(ParseError::expected_got(
            Some("chord, note, or trigger group"),
            Some(&other.to_string()),
            buffer,
        )),
    }
}

fn is_base_pitch(c: char) -> bool {
    matches!(c, 'A'..='G' | 'a'..='g')
}

fn parse_chord(buffer: &mut ParseBuffer) -> Result<MacroChord, ParseError> {
    expect_char(buffer, '[')?;
    let mut notes = Vec::new();
    loop {
        buffer.skip_whitespace();
        notes.push(parse_note(buffer)?);
        buffer.skip_whitespace();
        match buffer.peek()? {
            '|' => {
                buffer.advance(1);
            }
            ']' => {
                buffer.advance(1);
                break;
            }
            other => {
                return Err(ParseError::expected_got(
                    Some("| or ]"),
                    Some(&other.to_string()),
                    buffer,
                ))
            }
        }
    }
    // Post-sort order defines the element-wise match. The sort is stable so
    // equal notes keep their predicate association.
    notes.sort_by_key(|note| note.note);
    let predicates = parse_predicates(buffer)?;
    Ok(MacroChord { notes, predicates })
}

fn parse_note(buffer: &mut ParseBuffer) -> Result<MacroNote, ParseError> {
    let start = buffer.at();
    let c = buffer.peek()?;
    let note = if c.is_ascii_digit() {
        parse_positive_integer(buffer)?
    } else if is_base_pitch(c) {
        parse_aspn_note(buffer)?
    } else {
        return Err(ParseError::expected_got(
            Some("note"),
            Some(&c.to_string()),
            buffer,
        ));
    };
    if !(0..=127).contains(&note) {
        return Err(ParseError::at(
            format!("Invalid MIDI note: {note}"),
            buffer,
            start,
        ));
    }
    let predicates = parse_predicates(buffer)?;
    Ok(MacroNote {
        note: note as u8,
        predicates,
    })
}

fn parse_aspn_note(buffer: &mut ParseBuffer) -> Result<i64, ParseError> {
    let letter = buffer.peek()?;
    if !is_base_pitch(letter) {
        return Err(ParseError::expected_got(
            Some("ASPN note"),
            Some(&letter.to_string()),
            buffer,
        ));
    }
    buffer.advance(1);
    let next = buffer.peek()?;
    if !ACCIDENTALS.contains(next) && next != '-' && !next.is_ascii_digit() {
        return Err(ParseError::expected_got(
            Some(&format!("pitch modifiers ({ACCIDENTALS}) or octave")),
            Some(&next.to_string()),
            buffer,
        ));
    }
    let mut offset = 0i64;
    while !buffer.at_end_of_line() {
        match buffer.peek()? {
            '#' | '♯' => offset += 1,
            'b' | '♭' => offset -= 1,
            '𝄪' => offset += 2,
            '𝄫' => offset -= 2,
            _ => break,
        }
        buffer.advance(1);
    }
    let mut octave_sign = 1i64;
    if buffer.peek()? == '-' {
        octave_sign = -1;
        buffer.advance(1);
    }
    let octave = octave_sign * parse_positive_integer(buffer)?;
    Ok(aspn::aspn_to_midi(octave as i32, letter, offset as i32) as i64)
}

fn parse_positive_integer(buffer: &mut ParseBuffer) -> Result<i64, ParseError> {
    let start = buffer.at();
    if !buffer.peek()?.is_ascii_digit() {
        return Err(ParseError::expected_got(
            Some("positive number"),
            Some(&buffer.peek()?.to_string()),
            buffer,
        ));
    }
    while !buffer.at_end_of_line() && buffer.peek()?.is_ascii_digit() {
        buffer.advance(1);
    }
    let text = buffer.slice_between(start, buffer.at());
    text.parse()
        .map_err(|_| ParseError::at(format!("number out of range: {text}"), buffer, start))
}

fn parse_predicates(buffer: &mut ParseBuffer) -> Result<Vec<Expression>, ParseError> {
    let mut predicates = Vec::new();
    while !buffer.at_end_of_line() && buffer.peek()? == '{' {
        predicates.push(read_match_predicate(buffer)?);
    }
    Ok(predicates)
}

/// Reads one `{ … }` match-predicate by balanced-brace skipping. String
/// literals (including triple-quoted) are transparent to the brace count,
/// and the whole predicate may span lines.
fn read_match_predicate(buffer: &mut ParseBuffer) -> Result<Expression, ParseError> {
    expect_char(buffer, '{')?;
    let start = buffer.at();
    let mut depth = 0usize;
    loop {
        if buffer.at_end_of_line() {
            buffer.newline()?;
            continue;
        }
        let c = buffer.peek()?;
        match c {
            '}' if depth == 0 => break,
            '}' => depth -= 1,
            '{' => depth += 1,
            '"' | '\'' => {
                skip_python_string(buffer)?;
                continue;
            }
            _ => {}
        }
        buffer.advance(1);
    }
    let end = buffer.at();
    buffer.advance(1);
    let text = buffer.slice_between(start, end);
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::at(
            "empty match predicate".to_string(),
            buffer,
            start,
        ));
    }
    Expression::parse(text)
        .map_err(|err| ParseError::at(format!("invalid match predicate: {err}"), buffer, start))
}

/// Skips a Python-style string literal starting at the cursor's quote
/// character, escape-aware, with triple-quote support.
fn skip_python_string(buffer: &mut ParseBuffer) -> Result<(), ParseError> {
    let quote = buffer.peek()?;
    let triple = buffer.has_at_cursor(&quote.to_string().repeat(3));
    buffer.advance(if triple { 3 } else { 1 });
    let mut escaping = false;
    let mut consecutive = 0;
    loop {
        if buffer.at_end_of_line() {
            if triple {
                buffer.newline()?;
                escaping = false;
                consecutive = 0;
                continue;
            }
            // peek() raises the end-of-line error for an unterminated
            // single-line string
            buffer.peek()?;
        }
        let c = buffer.peek()?;
        if c == quote && !escaping {
            consecutive += 1;
            buffer.advance(1);
            if !triple || consecutive == 3 {
                return Ok(());
            }
        } else {
            consecutive = 0;
            escaping = c == '\\' && !escaping;
            buffer.advance(1);
        }
    }
}

fn parse_argument_definition(buffer: &mut ParseBuffer) -> Result<ArgumentDefinition, ParseError> {
    if keyword_at_cursor(buffer, "NOTES") {
        buffer.advance("NOTES".len());
        let range = if !buffer.at_end_of_line() && buffer.peek()? == '[' {
            parse_argument_range(buffer)?
        } else {
            ArgumentRange::UNBOUNDED
        };
        let predicates = parse_predicates(buffer)?;
        let processor = try_parse_processor(buffer, ArgKind::Notes)?;
        Ok(ArgumentDefinition::PlayedNotes {
            range,
            predicates,
            processor,
        })
    } else if keyword_at_cursor(buffer, "MIDI") {
        buffer.advance("MIDI".len());
        let predicates = parse_predicates(buffer)?;
        let processor = try_parse_processor(buffer, ArgKind::Midi)?;
        Ok(ArgumentDefinition::Midi {
            predicates,
            processor,
        })
    } else {
        Ok(ArgumentDefinition::Zero)
    }
}

fn keyword_at_cursor(buffer: &ParseBuffer, keyword: &str) -> bool {
    if !buffer.has_at_cursor(keyword) {
        return false;
    }
    // word boundary: the keyword must not continue as an identifier
    let mut probe = buffer.clone();
    probe.advance(keyword.len());
    match probe.peek() {
        Ok(c) => !(c.is_alphanumeric() || c == '_'),
        Err(_) => true,
    }
}

fn parse_argument_range(buffer: &mut ParseBuffer) -> Result<ArgumentRange, ParseError> {
    expect_char(buffer, '[')?;
    let mut lower = 0i64;
    let mut saw_lower = false;
    if buffer.peek()?.is_ascii_digit() {
        lower = parse_positive_integer(buffer)?;
        saw_lower = true;
        if buffer.peek()? == ']' {
            buffer.advance(1);
            return Ok(ArgumentRange::exactly(lower as usize));
        }
    }
    if buffer.peek()? != ':' {
        return Err(ParseError::expected_got(
            Some(if saw_lower { "number, : or ]" } else { "number or :" }),
            Some(&buffer.peek()?.to_string()),
            buffer,
        ));
    }
    buffer.advance(1);
    let mut upper = None;
    if buffer.peek()?.is_ascii_digit() {
        upper = Some(parse_positive_integer(buffer)? as usize);
    }
    if buffer.peek()? != ']' {
        return Err(ParseError::expected_got(
            Some("number or ]"),
            Some(&buffer.peek()?.to_string()),
            buffer,
        ));
    }
    buffer.advance(1);
    Ok(ArgumentRange {
        lo: lower as usize,
        hi: upper,
    })
}

/// A parenthesized group after an argument definition is a processor if it
/// reads like one; otherwise the cursor is restored and the group is left
/// for the interpreter rule.
fn try_parse_processor(
    buffer: &mut ParseBuffer,
    kind: ArgKind,
) -> Result<Option<Processor>, ParseError> {
    let save = buffer.at();
    buffer.skip_whitespace();
    if buffer.at_end_of_line() || buffer.peek()? != '(' {
        buffer.jump(save);
        return Ok(None);
    }
    buffer.advance(1);
    buffer.skip_whitespace();
    let c = buffer.peek()?;
    if c == '"' || c == '\'' {
        // Either a replacement list ("token" -> …) or an interpreter
        // string; the arrow decides.
        let probe = buffer.at();
        let _token = parse_quoted_string(buffer)?;
        buffer.skip_whitespace();
        if buffer.has_at_cursor("->") || buffer.has_at_cursor("→") {
            buffer.jump(probe);
            let replacements = parse_replacement_list(buffer, kind)?;
            return Ok(Some(Processor::Preprocessor(replacements)));
        }
        buffer.jump(save);
        return Ok(None);
    }
    if c == '[' || (c == 'f' && fstring_follows(buffer)) || named_format_at_cursor(buffer) {
        let joiner = parse_arg_body(buffer, kind)?;
        buffer.skip_whitespace();
        expect_char(buffer, ')')?;
        return Ok(Some(Processor::Joiner(joiner)));
    }
    buffer.jump(save);
    Ok(None)
}

fn fstring_follows(buffer: &ParseBuffer) -> bool {
    let mut probe = buffer.clone();
    probe.advance(1);
    matches!(probe.peek(), Ok('"') | Ok('\''))
}

fn named_format_at_cursor(buffer: &ParseBuffer) -> bool {
    ArgumentFormat::names_longest_first()
        .iter()
        .any(|(name, _)| buffer.has_at_cursor(name))
}

fn parse_replacement_list(
    buffer: &mut ParseBuffer,
    kind: ArgKind,
) -> Result<Vec<(String, Joiner)>, ParseError> {
    let mut replacements = Vec::new();
    loop {
        buffer.skip_whitespace();
        let token_start = buffer.at();
        let token = parse_quoted_string(buffer)?;
        if token.is_empty() {
            return Err(ParseError::at(
                "empty replacement token".to_string(),
                buffer,
                token_start,
            ));
        }
        buffer.skip_whitespace();
        parse_arrow(buffer)?;
        buffer.skip_whitespace();
        let joiner = parse_arg_body(buffer, kind)?;
        replacements.push((token, joiner));
        buffer.skip_whitespace();
        match buffer.peek()? {
            ',' => {
                buffer.advance(1);
            }
            ')' => {
                buffer.advance(1);
                return Ok(replacements);
            }
            other => {
                return Err(ParseError::expected_got(
                    Some(", or )"),
                    Some(&other.to_string()),
                    buffer,
                ))
            }
        }
    }
}

fn parse_arg_body(buffer: &mut ParseBuffer, kind: ArgKind) -> Result<Joiner, ParseError> {
    let mut separator = " ".to_string();
    if buffer.peek()? == '[' {
        separator = parse_separator(buffer)?;
        buffer.skip_whitespace();
    }
    let format = if buffer.peek()? == 'f' && fstring_follows(buffer) {
        FormatSpec::Template(parse_fstring(buffer, Some(kind))?)
    } else {
        FormatSpec::Named(parse_named_format(buffer, kind)?)
    };
    Ok(Joiner { separator, format })
}

fn parse_separator(buffer: &mut ParseBuffer) -> Result<String, ParseError> {
    expect_char(buffer, '[')?;
    buffer.skip_whitespace();
    let c = buffer.peek()?;
    let separator = if c == '"' || c == '\'' {
        let quoted = parse_quoted_string(buffer)?;
        buffer.skip_whitespace();
        quoted
    } else {
        // bare separator text up to the closing bracket
        let start = buffer.at();
        while buffer.peek()? != ']' {
            buffer.advance(1);
        }
        buffer.slice_between(start, buffer.at()).trim().to_string()
    };
    expect_char(buffer, ']')?;
    Ok(separator)
}

fn parse_named_format(
    buffer: &mut ParseBuffer,
    kind: ArgKind,
) -> Result<ArgumentFormat, ParseError> {
    let start = buffer.at();
    for (name, format) in ArgumentFormat::names_longest_first() {
        if !buffer.has_at_cursor(&name) {
            continue;
        }
        let applicable = match kind {
            ArgKind::Notes => format.applies_to_notes(),
            ArgKind::Midi => format.applies_to_messages(),
        };
        if !applicable {
            return Err(ParseError::at(
                format!(
                    "argument format {name} does not apply to {} arguments",
                    match kind {
                        ArgKind::Notes => "NOTES",
                        ArgKind::Midi => "MIDI",
                    }
                ),
                buffer,
                start,
            ));
        }
        buffer.advance(name.len());
        return Ok(format);
    }
    Err(ParseError::expected_got(
        Some("argument format"),
        Some(&buffer.peek()?.to_string()),
        buffer,
    ))
}

/// `f"…"` (one or more concatenated strings) with `%` escapes. `%m %a %A
/// %p %v %t %c %n` select named formats, `%%` is a literal percent, and any
/// other `%` sequence passes through unchanged.
fn parse_fstring(
    buffer: &mut ParseBuffer,
    kind: Option<ArgKind>,
) -> Result<FStringTemplate, ParseError> {
    let start = buffer.at();
    expect_char(buffer, 'f')?;
    let mut raw = parse_quoted_string(buffer)?;
    loop {
        let save = buffer.at();
        buffer.skip_whitespace();
        match buffer.peek() {
            Ok('"') | Ok('\'') => raw.push_str(&parse_quoted_string(buffer)?),
            _ => {
                buffer.jump(save);
                break;
            }
        }
    }
    build_template(&raw, kind)
        .map_err(|message| ParseError::at(message, buffer, start))
}

fn build_template(raw: &str, kind: Option<ArgKind>) -> Result<FStringTemplate, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                literal.push('%');
            }
            Some(&shorthand) if shorthand_format(shorthand).is_some() => {
                chars.next();
                let format = shorthand_format(shorthand).unwrap();
                let applicable = match kind {
                    Some(ArgKind::Notes) => format.applies_to_notes(),
                    Some(ArgKind::Midi) => format.applies_to_messages(),
                    None => true,
                };
                if !applicable {
                    return Err(format!("%{shorthand} does not apply here"));
                }
                if !literal.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(TemplateSegment::Format(format));
            }
            _ => literal.push('%'),
        }
    }
    if !literal.is_empty() {
        segments.push(TemplateSegment::Literal(literal));
    }
    Ok(FStringTemplate { segments })
}

fn shorthand_format(shorthand: char) -> Option<ArgumentFormat> {
    match shorthand {
        'm' => Some(ArgumentFormat::Midi),
        'a' => Some(ArgumentFormat::Aspn),
        'A' => Some(ArgumentFormat::AspnUnicode),
        'p' => Some(ArgumentFormat::Piano),
        'v' => Some(ArgumentFormat::Velocity),
        't' => Some(ArgumentFormat::Time),
        'c' => Some(ArgumentFormat::Channel),
        'n' => Some(ArgumentFormat::None),
        _ => None,
    }
}

/// Reads a quoted string at the cursor and decodes C-style escapes.
fn parse_quoted_string(buffer: &mut ParseBuffer) -> Result<String, ParseError> {
    let quote = buffer.peek()?;
    if quote != '"' && quote != '\'' {
        return Err(ParseError::expected_got(
            Some("quoted string"),
            Some(&quote.to_string()),
            buffer,
        ));
    }
    buffer.advance(1);
    let mut out = String::new();
    loop {
        let c = buffer.peek()?;
        buffer.advance(1);
        if c == quote {
            return Ok(out);
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = buffer.peek()?;
        buffer.advance(1);
        let resolved = match escaped {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            other => {
                out.push('\\');
                other
            }
        };
        out.push(resolved);
    }
}

/// `("python3")` or `(python3 -u)`: a quoted (possibly concatenated) string
/// or free text up to the closing parenthesis.
fn parse_interpreter(buffer: &mut ParseBuffer) -> Result<String, ParseError> {
    expect_char(buffer, '(')?;
    buffer.skip_whitespace();
    let c = buffer.peek()?;
    let interpreter = if c == '"' || c == '\'' {
        let mut text = parse_quoted_string(buffer)?;
        loop {
            buffer.skip_whitespace();
            match buffer.peek()? {
                '"' | '\'' => text.push_str(&parse_quoted_string(buffer)?),
                _ => break,
            }
        }
        text
    } else {
        let start = buffer.at();
        while buffer.peek()? != ')' {
            buffer.advance(1);
        }
        buffer.slice_between(start, buffer.at()).trim().to_string()
    };
    expect_char(buffer, ')')?;
    if interpreter.is_empty() {
        return Err(ParseError::expected_got(Some("interpreter"), None, buffer));
    }
    Ok(interpreter)
}

#[derive(Debug, Default)]
struct ParsedFlags {
    flags: ScriptFlags,
    locks: Vec<String>,
    invocation_format: Option<FStringTemplate>,
}

fn parse_flags(buffer: &mut ParseBuffer) -> Result<ParsedFlags, ParseError> {
    expect_char(buffer, '[')?;
    let mut parsed = ParsedFlags::default();
    loop {
        buffer.skip_whitespace();
        let name_start = buffer.at();
        while !buffer.at_end_of_line()
            && (buffer.peek()?.is_ascii_alphanumeric() || buffer.peek()? == '_')
        {
            buffer.advance(1);
        }
        let name = buffer.slice_between(name_start, buffer.at());
        match name.as_str() {
            "BLOCK" => parsed.flags.block = true,
            "DEBOUNCE" => parsed.flags.debounce = true,
            "BACKGROUND" => parsed.flags.background = true,
            "KILL" => parsed.flags.kill = true,
            "SCRIPT_PATH_AS_ENV_VAR" => parsed.flags.script_path_as_env_var = true,
            "LOCK" => {
                expect_char(buffer, '=')?;
                let value_start = buffer.at();
                while buffer.peek()? != '|' && buffer.peek()? != ']' {
                    buffer.advance(1);
                }
                let value = buffer.slice_between(value_start, buffer.at());
                parsed.locks = value
                    .split(',')
                    .map(|lock| lock.trim().to_string())
                    .filter(|lock| !lock.is_empty())
                    .collect();
                if parsed.locks.is_empty() {
                    return Err(ParseError::at(
                        "LOCK needs at least one lock name".to_string(),
                        buffer,
                        value_start,
                    ));
                }
            }
            "INVOCATION_FORMAT" => {
                expect_char(buffer, '=')?;
                parsed.invocation_format = Some(parse_fstring(buffer, None)?);
            }
            _ => {
                return Err(ParseError::expected_got(
                    Some("flag"),
                    Some(&name),
                    buffer,
                ))
            }
        }
        buffer.skip_whitespace();
        match buffer.peek()? {
            '|' => {
                buffer.advance(1);
            }
            ']' => {
                buffer.advance(1);
                return Ok(parsed);
            }
            other => {
                return Err(ParseError::expected_got(
                    Some("| or ]"),
                    Some(&other.to_string()),
                    buffer,
                ))
            }
        }
    }
}

fn parse_arrow(buffer: &mut ParseBuffer) -> Result<(), ParseError> {
    match buffer.peek()? {
        '→' => {
            buffer.advance(1);
            Ok(())
        }
        '-' => {
            buffer.advance(1);
            if buffer.peek()? != '>' {
                return Err(ParseError::expected_got(
                    Some(">"),
                    Some(&buffer.peek()?.to_string()),
                    buffer,
                ));
            }
            buffer.advance(1);
            Ok(())
        }
        other => Err(ParseError::expected_got(
            Some(ARROW_DESCRIPTION),
            Some(&other.to_string()),
            buffer,
        )),
    }
}

fn parse_script_text(buffer: &mut ParseBuffer) -> Result<String, ParseError> {
    buffer.skip_whitespace();
    if buffer.at_end_of_line() {
        return Err(ParseError::expected_got(Some("script"), None, buffer));
    }
    if buffer.peek()? == '{' {
        let brace = buffer.at();
        let mut probe = buffer.clone();
        probe.advance(1);
        probe.skip_whitespace();
        if probe.at_end_of_line() {
            buffer.jump(brace);
            return parse_multi_line_script(buffer);
        }
    }
    Ok(buffer.read_to_end_of_line().trim_end().to_string())
}

/// `{`, newline, TAB-indented lines (blank lines contribute empty strings),
/// and a lone `}` terminator.
fn parse_multi_line_script(buffer: &mut ParseBuffer) -> Result<String, ParseError> {
    expect_char(buffer, '{')?;
    buffer.newline()?;
    let mut lines = Vec::new();
    loop {
        if buffer.at_end_of_file() {
            return Err(ParseError::at(
                "unexpectedly reached end of file inside script block".to_string(),
                buffer,
                buffer.at(),
            ));
        }
        let line_index = buffer.at().0;
        let text = buffer.line_text(line_index);
        let trimmed = text.trim();
        if trimmed == "}" {
            let close = text.find('}').unwrap_or(0);
            buffer.jump((line_index, close + 1));
            return Ok(lines.join("\n"));
        }
        if trimmed.is_empty() {
            lines.push(String::new());
        } else if let Some(content) = text.strip_prefix('\t') {
            lines.push(content.to_string());
        } else {
            return Err(ParseError::at(
                "incorrect indentation".to_string(),
                buffer,
                (line_index, 0),
            ));
        }
        buffer.jump((line_index, text.chars().count()));
        buffer.newline()?;
    }
}

fn expect_char(buffer: &mut ParseBuffer, wanted: char) -> Result<(), ParseError> {
    let c = buffer.peek()?;
    if c != wanted {
        return Err(ParseError::expected_got(
            Some(&wanted.to_string()),
            Some(&c.to_string()),
            buffer,
        ));
    }
    buffer.advance(1);
    Ok(())
}
