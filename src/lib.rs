// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! midimacs watches MIDI input ports and launches shell scripts whenever
//! the currently-held notes match a user-declared pattern. Profiles come
//! from a TOML config, patterns from a small macro language, and a
//! Unix-domain control socket toggles profiles, cycles subprofiles, and
//! drives a virtual sustain pedal at runtime.

/// Argument definitions, formats, and processors.
pub mod argument;
/// The global status-callback queue and its dispatcher thread.
pub mod callback;
/// The Unix-socket control surface.
pub mod ipc;
/// The per-profile listener: press tracker, control API, macro dispatch.
pub mod listener;
/// Named reentrant locks shared across scripts.
pub mod locking;
/// Triggers and macros.
pub mod macros;
/// Non-consuming trigger matching and predicate environments.
pub mod matching;
/// The macro-language parser and its line-addressed buffer.
pub mod parser;
/// Config-directory bootstrap.
pub mod paths;
/// Process-level context and the profile manager.
pub mod runtime;
/// Scripts and their invocation workers.
pub mod script;
/// The subprofile ring.
pub mod subprofile;
/// The macro trie.
pub mod tree;

pub use listener::Listener;
pub use macros::{Macro, MacroError, Trigger};
pub use parser::{parse_control_trigger, parse_macro_file, ParseError};
pub use runtime::{Runtime, RuntimeContext};
pub use script::Script;
pub use tree::MacroTree;
