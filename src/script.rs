// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! A [Script] and its invocation worker. Every script owns at most one
//! long-lived worker thread, started lazily on the first queued invocation,
//! draining an unbounded FIFO queue under the flag policy (BLOCK, DEBOUNCE,
//! BACKGROUND, KILL, LOCK, SCRIPT_PATH_AS_ENV_VAR).

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use tempfile::NamedTempFile;

use crate::argument::{ArgumentDefinition, Arguments, FStringTemplate, ProcessedArguments};
use crate::locking::{LockRegistry, LockSet};
use crate::macros::MacroError;

/// The env var that carries the temp-script path to children.
pub const SCRIPT_PATH_ENV_VAR: &str = "MM_SCRIPT";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScriptFlags {
    pub block: bool,
    pub debounce: bool,
    pub background: bool,
    pub kill: bool,
    pub script_path_as_env_var: bool,
}

pub struct Script {
    body: String,
    interpreter: Option<String>,
    flags: ScriptFlags,
    locks: Vec<String>,
    invocation_format: Option<FStringTemplate>,
    argument_definition: ArgumentDefinition,
    log_label: String,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    sender: Sender<WorkerMessage>,
    handle: JoinHandle<()>,
}

enum WorkerMessage {
    Invoke(Arguments),
    Shutdown,
}

impl Script {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        body: String,
        interpreter: Option<String>,
        flags: ScriptFlags,
        locks: Vec<String>,
        invocation_format: Option<FStringTemplate>,
        argument_definition: ArgumentDefinition,
        profile: &str,
        subprofile: Option<&str>,
    ) -> Result<Self, MacroError> {
        if flags.kill && !flags.background {
            return Err(MacroError::KillWithoutBackground);
        }
        if flags.background {
            if flags.debounce {
                return Err(MacroError::BackgroundConflict("DEBOUNCE"));
            }
            if flags.block {
                return Err(MacroError::BackgroundConflict("BLOCK"));
            }
            if !locks.is_empty() {
                return Err(MacroError::BackgroundConflict("LOCK"));
            }
            if argument_definition.uses_preprocessor() {
                return Err(MacroError::BackgroundConflict("a replace-token processor"));
            }
        }
        let log_label = match subprofile {
            Some(subprofile) => format!("[{profile}][{subprofile}]"),
            None => format!("[{profile}]"),
        };
        Ok(Self {
            body,
            interpreter,
            flags,
            locks,
            invocation_format,
            argument_definition,
            log_label,
            worker: Mutex::new(None),
        })
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    pub fn flags(&self) -> &ScriptFlags {
        &self.flags
    }

    pub fn locks(&self) -> &[String] {
        &self.locks
    }

    pub fn invocation_format(&self) -> Option<&FStringTemplate> {
        self.invocation_format.as_ref()
    }

    pub fn argument_definition(&self) -> &ArgumentDefinition {
        &self.argument_definition
    }

    pub fn log_label(&self) -> &str {
        &self.log_label
    }

    /// The trie's gate: count, type, and predicate checks happen here on the
    /// listener thread; everything that can block happens on the worker.
    pub fn queue_if_arguments_match(self: &Arc<Self>, arguments: Arguments, locks: &Arc<LockRegistry>) {
        if !self.argument_definition.accepts(&arguments) {
            return;
        }
        debug!("{} queueing invocation", self.log_label);
        self.queue(arguments, locks);
    }

    fn queue(self: &Arc<Self>, arguments: Arguments, locks: &Arc<LockRegistry>) {
        let mut worker = self.worker.lock();
        let worker = worker.get_or_insert_with(|| self.start_worker(Arc::clone(locks)));
        let _ = worker.sender.send(WorkerMessage::Invoke(arguments));
    }

    fn start_worker(self: &Arc<Self>, locks: Arc<LockRegistry>) -> Worker {
        let (sender, receiver) = unbounded();
        let script = Arc::clone(self);
        let handle = std::thread::spawn(move || worker_loop(script, receiver, locks));
        Worker { sender, handle }
    }

    /// Queues the shutdown sentinel and joins the worker. Everything already
    /// queued still runs (subject to DEBOUNCE) before the worker exits.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.sender.send(WorkerMessage::Shutdown);
            let _ = worker.handle.join();
        }
    }

    /// Step 1 and 2 of the invocation body: render the arguments, then wrap
    /// through `INVOCATION_FORMAT`. `None` means "run the script verbatim".
    fn render_arguments(&self, arguments: &Arguments) -> Option<ProcessedArguments> {
        if matches!(self.argument_definition, ArgumentDefinition::Zero)
            && self.invocation_format.is_none()
        {
            return None;
        }
        let processed = self.argument_definition.process(arguments);
        match (processed, &self.invocation_format) {
            (ProcessedArguments::Text(text), Some(template)) => {
                Some(ProcessedArguments::Text(template.render_invocation(&text)))
            }
            (processed, _) => Some(processed),
        }
    }

    fn invoke(&self, arguments: Arguments, locks: &LockRegistry) {
        // LOCK holds through the child's exit so lock domains serialise
        // wall-clock child lifetimes, which forces the wait below.
        let lock_set: Option<LockSet> = if self.locks.is_empty() {
            None
        } else {
            Some(locks.acquire(&self.locks))
        };
        match self.spawn_invocation(&arguments) {
            Err(err) => error!("{} failed to run script: {err}", self.log_label),
            Ok((mut child, temp_script)) => {
                if self.flags.block || lock_set.is_some() {
                    if let Err(err) = child.wait() {
                        error!("{} failed to wait on script: {err}", self.log_label);
                    }
                    drop(temp_script);
                } else {
                    // Reap off-thread so a long-running child doesn't stall
                    // the queue. The temp script lives until the child exits.
                    std::thread::spawn(move || {
                        let _ = child.wait();
                        drop(temp_script);
                    });
                }
            }
        }
        drop(lock_set);
    }

    fn spawn_invocation(
        &self,
        arguments: &Arguments,
    ) -> std::io::Result<(Child, Option<NamedTempFile>)> {
        let mut arguments_text = None;
        let mut body = self.body.clone();
        match self.render_arguments(arguments) {
            None => {}
            Some(ProcessedArguments::Text(text)) => arguments_text = Some(text),
            Some(ProcessedArguments::Replacements(replacements)) => {
                for (token, rendered) in &replacements {
                    body = body.replace(token.as_str(), rendered);
                }
            }
        }
        let arguments_over_stdin = arguments_text.is_some();
        let script_path_as_env_var = self.flags.script_path_as_env_var
            || (self.interpreter.is_some() && arguments_over_stdin);
        let script_over_stdin = self.interpreter.is_some() && !script_path_as_env_var;

        let mut temp_script = None;
        let command_text = if script_path_as_env_var {
            let mut file = NamedTempFile::new()?;
            file.write_all(body.as_bytes())?;
            file.flush()?;
            let text = self.interpreter.clone().unwrap_or_else(|| body.clone());
            temp_script = Some(file);
            text
        } else if let Some(interpreter) = &self.interpreter {
            interpreter.clone()
        } else {
            body.clone()
        };

        let mut command = Command::new("sh");
        command.arg("-c").arg(&command_text);
        if let Some(file) = &temp_script {
            command.env(SCRIPT_PATH_ENV_VAR, file.path());
        }
        if script_over_stdin || arguments_over_stdin {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }
        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            let payload = if script_over_stdin {
                body.as_bytes()
            } else {
                arguments_text.as_deref().unwrap_or_default().as_bytes()
            };
            if let Err(err) = stdin.write_all(payload) {
                error!("{} failed to write to script stdin: {err}", self.log_label);
            }
            // dropping the handle closes the pipe
        }
        Ok((child, temp_script))
    }
}
impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !matches!(self.argument_definition, ArgumentDefinition::Zero) {
            write!(f, "{} ", self.argument_definition)?;
        }
        if let Some(interpreter) = &self.interpreter {
            write!(f, "(\"{interpreter}\") ")?;
        }
        write!(f, "-> ")?;
        if self.body.contains('\n') {
            writeln!(f, "{{")?;
            for line in self.body.lines() {
                writeln!(f, "\t{line}")?;
            }
            write!(f, "}}")
        } else {
            write!(f, "{}", self.body)
        }
    }
}
impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("body", &self.body)
            .field("interpreter", &self.interpreter)
            .field("flags", &self.flags)
            .field("locks", &self.locks)
            .field("log_label", &self.log_label)
            .finish()
    }
}

fn worker_loop(script: Arc<Script>, receiver: Receiver<WorkerMessage>, locks: Arc<LockRegistry>) {
    let mut background = if script.flags.background {
        match BackgroundChild::spawn(&script) {
            Ok(child) => Some(child),
            Err(err) => {
                error!(
                    "{} failed to start background script: {err}",
                    script.log_label
                );
                None
            }
        }
    } else {
        None
    };
    loop {
        let Ok(first) = receiver.recv() else {
            break;
        };
        let mut shutting_down = false;
        let mut invocations = Vec::new();
        for message in std::iter::once(first).chain(receiver.try_iter()) {
            match message {
                WorkerMessage::Invoke(arguments) => invocations.push(arguments),
                WorkerMessage::Shutdown => shutting_down = true,
            }
        }
        if script.flags.debounce {
            // only the last invocation of a drained batch runs
            if let Some(arguments) = invocations.pop() {
                run_one(&script, arguments, background.as_mut(), &locks);
            }
        } else {
            for arguments in invocations {
                run_one(&script, arguments, background.as_mut(), &locks);
            }
        }
        if shutting_down {
            break;
        }
    }
    if let Some(child) = background {
        child.finish(script.flags.kill, &script);
    }
}

fn run_one(
    script: &Script,
    arguments: Arguments,
    background: Option<&mut BackgroundChild>,
    locks: &LockRegistry,
) {
    match background {
        Some(child) => {
            let text = match script.render_arguments(&arguments) {
                Some(ProcessedArguments::Text(text)) => text,
                // replace-token processors are rejected for BACKGROUND at
                // construction; a bare argdef still renders
                _ => String::new(),
            };
            child.write_line(&text, script);
        }
        None => script.invoke(arguments, locks),
    }
}

/// The single long-lived child of a BACKGROUND script. Invocations become
/// newline-terminated writes to its stdin.
struct BackgroundChild {
    child: Child,
    stdin: Option<ChildStdin>,
    temp_script: Option<NamedTempFile>,
}
impl BackgroundChild {
    fn spawn(script: &Script) -> std::io::Result<Self> {
        // stdin carries arguments, so an interpreter can't read the script
        // from the same pipe; the temp-file path is forced in that case.
        let script_path_as_env_var =
            script.flags.script_path_as_env_var || script.interpreter.is_some();
        let mut temp_script = None;
        let command_text = if script_path_as_env_var {
            let mut file = NamedTempFile::new()?;
            file.write_all(script.body.as_bytes())?;
            file.flush()?;
            let text = script
                .interpreter
                .clone()
                .unwrap_or_else(|| script.body.clone());
            temp_script = Some(file);
            text
        } else {
            script.body.clone()
        };
        let mut command = Command::new("sh");
        command.arg("-c").arg(&command_text).stdin(Stdio::piped());
        if let Some(file) = &temp_script {
            command.env(SCRIPT_PATH_ENV_VAR, file.path());
        }
        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        Ok(Self {
            child,
            stdin,
            temp_script,
        })
    }

    fn write_line(&mut self, text: &str, script: &Script) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(stdin, "{text}").and_then(|_| stdin.flush()) {
            error!(
                "{} failed to write to background script: {err}",
                script.log_label
            );
        }
    }

    fn finish(mut self, kill: bool, script: &Script) {
        if kill {
            if let Err(err) = self.child.kill() {
                error!(
                    "{} failed to kill background script: {err}",
                    script.log_label
                );
            }
        } else {
            // closing stdin lets the child run down on its own
            drop(self.stdin.take());
        }
        let _ = self.child.wait();
        drop(self.temp_script.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::ArgumentRange;
    use std::time::Duration;

    fn zero_arg_script(body: &str, flags: ScriptFlags) -> Arc<Script> {
        Arc::new(
            Script::new(
                body.to_string(),
                None,
                flags,
                vec![],
                None,
                ArgumentDefinition::Zero,
                "test",
                None,
            )
            .unwrap(),
        )
    }

    fn notes_script(body: &str, flags: ScriptFlags) -> Arc<Script> {
        Arc::new(
            Script::new(
                body.to_string(),
                None,
                flags,
                vec![],
                None,
                ArgumentDefinition::PlayedNotes {
                    range: ArgumentRange::UNBOUNDED,
                    predicates: vec![],
                    processor: Some(crate::argument::Processor::Joiner(
                        crate::argument::Joiner::named(crate::argument::ArgumentFormat::Midi),
                    )),
                },
                "test",
                None,
            )
            .unwrap(),
        )
    }

    fn played(note: u8) -> midimacs_core::PlayedNote {
        midimacs_core::PlayedNote::new(note, 0, 90, 0)
    }

    #[test]
    fn structural_flag_rules() {
        let make = |flags: ScriptFlags, locks: Vec<String>| {
            Script::new(
                "true".to_string(),
                None,
                flags,
                locks,
                None,
                ArgumentDefinition::Zero,
                "test",
                None,
            )
        };
        assert!(matches!(
            make(
                ScriptFlags {
                    kill: true,
                    ..Default::default()
                },
                vec![]
            ),
            Err(MacroError::KillWithoutBackground)
        ));
        assert!(matches!(
            make(
                ScriptFlags {
                    background: true,
                    debounce: true,
                    ..Default::default()
                },
                vec![]
            ),
            Err(MacroError::BackgroundConflict("DEBOUNCE"))
        ));
        assert!(matches!(
            make(
                ScriptFlags {
                    background: true,
                    ..Default::default()
                },
                vec!["a".to_string()]
            ),
            Err(MacroError::BackgroundConflict("LOCK"))
        ));
    }

    #[test]
    fn every_queued_invocation_runs_without_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let locks = Arc::new(LockRegistry::new());
        let script = zero_arg_script(
            &format!("echo ran >> {}", out.display()),
            ScriptFlags {
                block: true,
                ..Default::default()
            },
        );
        for _ in 0..4 {
            script.queue_if_arguments_match(Arguments::Notes(vec![]), &locks);
        }
        script.shutdown();
        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn arguments_arrive_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let locks = Arc::new(LockRegistry::new());
        let script = notes_script(
            &format!("cat > {}", out.display()),
            ScriptFlags {
                block: true,
                ..Default::default()
            },
        );
        script.queue_if_arguments_match(
            Arguments::Notes(vec![played(60), played(64), played(67)]),
            &locks,
        );
        script.shutdown();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "60 64 67");
    }

    #[test]
    fn debounce_runs_the_last_of_a_batch() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let locks = Arc::new(LockRegistry::new());
        // BLOCK plus the sleep holds the worker long enough that the later
        // queued invocations coalesce into one drained batch.
        let script = notes_script(
            &format!("sleep 0.2; cat >> {}; echo >> {}", out.display(), out.display()),
            ScriptFlags {
                block: true,
                debounce: true,
                ..Default::default()
            },
        );
        script.queue_if_arguments_match(Arguments::Notes(vec![played(1)]), &locks);
        std::thread::sleep(Duration::from_millis(50));
        for note in 2..=5 {
            script.queue_if_arguments_match(Arguments::Notes(vec![played(note)]), &locks);
        }
        script.shutdown();
        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["1", "5"]);
    }

    #[test]
    fn background_spawns_one_child_for_many_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let locks = Arc::new(LockRegistry::new());
        // every line read appends; $$ distinguishes child processes
        let script = notes_script(
            &format!("while read line; do echo \"$$ $line\" >> {}; done", out.display()),
            ScriptFlags {
                background: true,
                ..Default::default()
            },
        );
        for note in 1..=3 {
            script.queue_if_arguments_match(Arguments::Notes(vec![played(note)]), &locks);
        }
        script.shutdown();
        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let pid = lines[0].split_whitespace().next().unwrap();
        assert!(lines.iter().all(|line| line.starts_with(pid)));
    }

    #[test]
    fn script_path_as_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let locks = Arc::new(LockRegistry::new());
        let script = Arc::new(
            Script::new(
                format!("cp \"$MM_SCRIPT\" {}", out.display()),
                None,
                ScriptFlags {
                    block: true,
                    script_path_as_env_var: true,
                    ..Default::default()
                },
                vec![],
                None,
                ArgumentDefinition::Zero,
                "test",
                None,
            )
            .unwrap(),
        );
        script.queue_if_arguments_match(Arguments::Notes(vec![]), &locks);
        script.shutdown();
        let copied = std::fs::read_to_string(&out).unwrap();
        assert!(copied.contains("MM_SCRIPT"));
    }

    #[test]
    fn spawn_failure_keeps_the_worker_alive() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let locks = Arc::new(LockRegistry::new());
        // an unwritable output path makes the child fail, not the worker
        let script = zero_arg_script(
            &format!("echo ok >> {}; exit 1", out.display()),
            ScriptFlags {
                block: true,
                ..Default::default()
            },
        );
        script.queue_if_arguments_match(Arguments::Notes(vec![]), &locks);
        script.queue_if_arguments_match(Arguments::Notes(vec![]), &locks);
        script.shutdown();
        assert_eq!(std::fs::read_to_string(&out).unwrap().lines().count(), 2);
    }
}
