// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The status-callback dispatcher: one global queue drained by one worker
//! thread. Profiles that opt into debouncing get at most one callback per
//! `(profile, kind)` out of each drained batch.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::error;
use parking_lot::Mutex;
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use strum_macros::Display;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "kebab-case")]
pub enum CallbackKind {
    Enabled,
    VirtualSustain,
    Subprofile,
}

#[derive(Clone, Debug)]
pub struct Callback {
    pub profile: String,
    pub kind: CallbackKind,
    pub script: String,
    /// Written to the child's stdin: "enabled"/"disabled" for toggles, the
    /// subprofile name for subprofile changes.
    pub payload: String,
    pub debounce: bool,
}

#[derive(Debug)]
pub struct CallbackDispatcher {
    sender: Sender<Callback>,
    worker: Mutex<Option<JoinHandle<()>>>,
}
impl CallbackDispatcher {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        let worker = std::thread::spawn(move || dispatch_loop(receiver));
        Self {
            sender,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn queue(&self, callback: Callback) {
        let _ = self.sender.send(callback);
    }

    /// Drains and joins. The queue refuses nothing before this point, so
    /// callers stop listeners first.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = self.sender.send_timeout(
                Callback {
                    profile: String::new(),
                    kind: CallbackKind::Enabled,
                    script: String::new(),
                    payload: String::new(),
                    debounce: false,
                },
                std::time::Duration::ZERO,
            );
            // an empty script is the shutdown sentinel
            let _ = worker.join();
        }
    }
}
impl Default for CallbackDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch_loop(receiver: Receiver<Callback>) {
    loop {
        let Ok(first) = receiver.recv() else {
            return;
        };
        let mut batch = vec![first];
        batch.extend(receiver.try_iter());
        let shutting_down = batch.iter().any(|callback| callback.script.is_empty());
        batch.retain(|callback| !callback.script.is_empty());
        for index in surviving_indices(&batch) {
            run_callback(&batch[index]);
        }
        if shutting_down {
            return;
        }
    }
}

/// Within one drained batch a debouncing profile keeps only its last
/// callback per `(profile, kind)`; a toggle and untoggle collapse to the
/// final state. Non-debouncing callbacks pass through in order.
fn surviving_indices(batch: &[Callback]) -> Vec<usize> {
    batch
        .iter()
        .enumerate()
        .filter(|(index, callback)| {
            !(callback.debounce
                && batch[index + 1..]
                    .iter()
                    .any(|later| later.profile == callback.profile && later.kind == callback.kind))
        })
        .map(|(index, _)| index)
        .collect()
}

fn run_callback(callback: &Callback) {
    let spawned = Command::new("sh")
        .arg("-c")
        .arg(&callback.script)
        .stdin(Stdio::piped())
        .spawn();
    match spawned {
        Err(err) => error!(
            "[{}] failed to run {} callback: {err}",
            callback.profile, callback.kind
        ),
        Ok(mut child) => {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(callback.payload.as_bytes());
            }
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
    }
}
