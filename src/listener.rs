// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! One listener per profile: it owns the input port, the press-tracker
//! state machine, the macro tries, and the control surface the IPC layer
//! talks to. All press-tracker state lives under one reentrant lock;
//! public methods lock once and everything inside takes `&mut State`.

use log::{debug, info};
use midimacs_core::message::{MidiMessage, PlayedNote};
use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use midimacs_midi::InputConnection;

use crate::callback::{Callback, CallbackKind};
use crate::macros::Trigger;
use crate::matching::match_trigger;
use crate::runtime::RuntimeContext;
use crate::subprofile::SubprofileHolder;
use crate::tree::MacroTree;

/// Patterns attached to the listener instead of the trie. They never run
/// scripts; an exact match flips listener state.
#[derive(Debug, Default)]
pub struct ControlTriggers {
    pub enable: Option<Vec<Trigger>>,
    pub cycle_subprofiles: Option<Vec<Trigger>>,
}

/// The configured callback scripts, queued on status changes.
#[derive(Debug, Default)]
pub struct CallbackScripts {
    pub enabled: Option<String>,
    pub virtual_sustain: Option<String>,
    pub subprofile: Option<String>,
    pub debounce: bool,
}

/// Snapshot returned over IPC.
#[derive(Clone, Debug)]
pub struct ListenerInfo {
    pub enabled: bool,
    pub midi_input: String,
    pub sustain: [bool; 16],
    pub virtual_sustain: bool,
    pub subprofiles: Option<(String, Vec<String>)>,
}

struct State {
    held: Vec<PlayedNote>,
    queued_releases: FxHashSet<(u8, u8)>,
    pedal_down: [bool; 16],
    virtual_pedal_down: bool,
    last_change_was_add: bool,
    had_extra_message_since_press: bool,
    global_tree: MacroTree,
    subprofiles: Option<SubprofileHolder>,
}
impl State {
    fn sustaining(&self, channel: u8) -> bool {
        self.virtual_pedal_down || self.pedal_down[channel as usize]
    }
}

pub struct Listener {
    profile: String,
    midi_input: String,
    enabled: AtomicBool,
    state: ReentrantMutex<RefCell<State>>,
    connection: Mutex<Option<InputConnection>>,
    context: Arc<RuntimeContext>,
    control: ControlTriggers,
    callbacks: CallbackScripts,
}

impl Listener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profile: String,
        midi_input: String,
        global_tree: MacroTree,
        subprofiles: Option<SubprofileHolder>,
        control: ControlTriggers,
        callbacks: CallbackScripts,
        context: Arc<RuntimeContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            profile,
            midi_input,
            enabled: AtomicBool::new(true),
            state: ReentrantMutex::new(RefCell::new(State {
                held: Vec::new(),
                queued_releases: FxHashSet::default(),
                pedal_down: [false; 16],
                virtual_pedal_down: false,
                last_change_was_add: false,
                had_extra_message_since_press: false,
                global_tree,
                subprofiles,
            })),
            connection: Mutex::new(None),
            context,
            control,
            callbacks,
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Opens the input port; the driver's callback thread feeds
    /// [Listener::handle_midi] from here on.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let listener = Arc::clone(self);
        let connection =
            InputConnection::connect(&self.midi_input, move |bytes, time| {
                listener.handle_midi(bytes, time)
            })?;
        info!("[{}] listening on {}", self.profile, connection.port_name());
        *self.connection.lock() = Some(connection);
        Ok(())
    }

    /// Closes the port (the driver joins its callback thread), then drains
    /// every script worker.
    pub fn stop(&self) {
        let connection = self.connection.lock().take();
        if let Some(mut connection) = connection {
            connection.close();
        }
        let guard = self.state.lock();
        let state = guard.borrow();
        info!("[{}] waiting for queued script invocations", self.profile);
        state.global_tree.shutdown();
        if let Some(holder) = &state.subprofiles {
            holder.shutdown();
        }
    }

    /// The per-message entry point. Serialised per port by the MIDI driver;
    /// the reentrant lock covers control calls from other threads.
    pub fn handle_midi(&self, bytes: &[u8], time: i64) {
        let message = MidiMessage::new(bytes.to_vec(), time);
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if message.is_sustain_cc() {
            let channel = message.channel();
            let was_sustaining = state.sustaining(channel);
            state.pedal_down[channel as usize] = message.data_2().unwrap_or(0) >= 64;
            if was_sustaining && !state.sustaining(channel) {
                self.sustain_release(&mut state);
            }
            return;
        }
        if !message.is_note_message() {
            if !message.is_aftertouch() {
                state.had_extra_message_since_press = true;
            }
            self.dispatch_message(&mut state, &message);
            return;
        }
        // Wildcard catchers see every note event too, against the held set
        // as it was when the event arrived.
        self.dispatch_message(&mut state, &message);
        let note = message.data_1().unwrap_or(0);
        let channel = message.channel();
        if message.is_note_on() {
            // A re-strike of a queued-released key revives it: the old
            // entry stays held and a new one appends.
            state.queued_releases.remove(&(note, channel));
            state.held.push(PlayedNote::new(
                note,
                channel,
                message.data_2().unwrap_or(0),
                time,
            ));
            state.last_change_was_add = true;
            state.had_extra_message_since_press = false;
        } else if message.is_note_off() {
            if state.sustaining(channel) {
                state.queued_releases.insert((note, channel));
                return;
            }
            if state.last_change_was_add {
                self.dispatch_notes(&mut state);
            }
            state
                .held
                .retain(|held| !(held.note == note && held.channel == channel));
            state.last_change_was_add = false;
        }
    }

    /// A channel stopped sustaining: fire first, then trim exactly the
    /// queued releases whose channel no longer sustains.
    fn sustain_release(&self, state: &mut State) {
        let picked: Vec<(u8, u8)> = state
            .queued_releases
            .iter()
            .filter(|(_, channel)| !state.sustaining(*channel))
            .copied()
            .collect();
        if picked.is_empty() {
            return;
        }
        if state.last_change_was_add {
            self.dispatch_notes(state);
            state.last_change_was_add = false;
        }
        state
            .held
            .retain(|held| !picked.contains(&(held.note, held.channel)));
        for pair in &picked {
            state.queued_releases.remove(pair);
        }
    }

    /// The notes-only evaluation path: control triggers first, then the
    /// global trie and the current subprofile's trie.
    fn dispatch_notes(&self, state: &mut State) {
        debug!(
            "[{}] evaluating held notes: {:?}",
            self.profile,
            state.held.iter().map(PlayedNote::aspn).collect::<Vec<_>>()
        );
        if let Some(enable) = &self.control.enable {
            if exact_match(enable, &state.held) {
                self.toggle_enabled();
                return;
            }
        }
        if !self.is_enabled() {
            return;
        }
        if let Some(cycle) = &self.control.cycle_subprofiles {
            if exact_match(cycle, &state.held) {
                Self::cycle_holder(state, self);
                return;
            }
        }
        let extra = state.had_extra_message_since_press;
        state
            .global_tree
            .execute_macros(&state.held, extra, None, &self.context.locks);
        if let Some(holder) = &state.subprofiles {
            holder
                .current_tree()
                .execute_macros(&state.held, extra, None, &self.context.locks);
        }
    }

    fn dispatch_message(&self, state: &mut State, message: &MidiMessage) {
        if !self.is_enabled() {
            return;
        }
        let extra = state.had_extra_message_since_press;
        state
            .global_tree
            .execute_macros(&state.held, extra, Some(message), &self.context.locks);
        if let Some(holder) = &state.subprofiles {
            holder.current_tree().execute_macros(
                &state.held,
                extra,
                Some(message),
                &self.context.locks,
            );
        }
    }

    fn cycle_holder(state: &mut State, listener: &Listener) {
        let Some(holder) = state.subprofiles.as_mut() else {
            return;
        };
        if holder.cycle() {
            let current = holder.current_name().to_string();
            info!("[{}] switched to subprofile: {current}", listener.profile);
            listener.queue_callback(
                CallbackKind::Subprofile,
                &listener.callbacks.subprofile,
                &current,
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let changed = self.enabled.swap(enabled, Ordering::SeqCst) != enabled;
        if !changed {
            return;
        }
        info!(
            "[{}] {}",
            self.profile,
            if enabled { "enabled" } else { "disabled" }
        );
        self.queue_callback(
            CallbackKind::Enabled,
            &self.callbacks.enabled,
            if enabled { "enabled" } else { "disabled" },
        );
    }

    pub fn toggle_enabled(&self) {
        self.set_enabled(!self.is_enabled());
    }

    pub fn set_virtual_sustain(&self, down: bool) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.virtual_pedal_down == down {
            return;
        }
        state.virtual_pedal_down = down;
        if !down {
            // dropping the virtual pedal may stop channels sustaining;
            // this is not an "extra message since press"
            self.sustain_release(&mut state);
        }
        self.queue_callback(
            CallbackKind::VirtualSustain,
            &self.callbacks.virtual_sustain,
            if down { "enabled" } else { "disabled" },
        );
    }

    pub fn toggle_virtual_sustain(&self) {
        let down = {
            let guard = self.state.lock();
            let down = guard.borrow().virtual_pedal_down;
            down
        };
        self.set_virtual_sustain(!down);
    }

    pub fn virtual_sustain(&self) -> bool {
        let guard = self.state.lock();
        let down = guard.borrow().virtual_pedal_down;
        down
    }

    /// Returns the current subprofile after rotating, or `None` when the
    /// profile has no subprofiles.
    pub fn cycle_subprofiles(&self) -> Option<String> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        Self::cycle_holder(&mut state, self);
        let current = state
            .subprofiles
            .as_ref()
            .map(|holder| holder.current_name().to_string());
        current
    }

    /// `Err` carries the reply text for an unknown subprofile name.
    pub fn set_subprofile(&self, name: &str) -> Result<(), String> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let Some(holder) = state.subprofiles.as_mut() else {
            return Err(format!("profile: {}, has no subprofiles", self.profile));
        };
        match holder.set_current(name) {
            None => Err(format!(
                "profile: {}, has no subprofile: {name}",
                self.profile
            )),
            Some(false) => Ok(()),
            Some(true) => {
                info!("[{}] switched to subprofile: {name}", self.profile);
                self.queue_callback(CallbackKind::Subprofile, &self.callbacks.subprofile, name);
                Ok(())
            }
        }
    }

    pub fn subprofile_names(&self) -> Vec<String> {
        let guard = self.state.lock();
        let names = guard
            .borrow()
            .subprofiles
            .as_ref()
            .map(SubprofileHolder::names)
            .unwrap_or_default();
        names
    }

    pub fn get_info(&self) -> ListenerInfo {
        let guard = self.state.lock();
        let state = guard.borrow();
        ListenerInfo {
            enabled: self.is_enabled(),
            midi_input: self.midi_input.clone(),
            sustain: state.pedal_down,
            virtual_sustain: state.virtual_pedal_down,
            subprofiles: state
                .subprofiles
                .as_ref()
                .map(|holder| (holder.current_name().to_string(), holder.names())),
        }
    }

    fn queue_callback(&self, kind: CallbackKind, script: &Option<String>, payload: &str) {
        let Some(script) = script else {
            return;
        };
        self.context.callbacks.queue(Callback {
            profile: self.profile.clone(),
            kind,
            script: script.clone(),
            payload: payload.to_string(),
            debounce: self.callbacks.debounce,
        });
    }

    #[cfg(test)]
    fn held_notes(&self) -> Vec<(u8, u8)> {
        let guard = self.state.lock();
        let held = guard
            .borrow()
            .held
            .iter()
            .map(|note| (note.note, note.channel))
            .collect();
        held
    }
}
impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("profile", &self.profile)
            .field("midi_input", &self.midi_input)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// True when the triggers consume every held note exactly.
fn exact_match(triggers: &[Trigger], held: &[PlayedNote]) -> bool {
    let mut position = 0;
    for trigger in triggers {
        if position + trigger.note_count() > held.len() {
            return false;
        }
        if !match_trigger(trigger, held, position) {
            return false;
        }
        position += trigger.note_count();
    }
    position == held.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_control_trigger, parse_macro_file};
    use crate::runtime::RuntimeContext;
    use std::time::Duration;

    fn context() -> Arc<RuntimeContext> {
        Arc::new(RuntimeContext::new())
    }

    fn listener_with(
        macros: &str,
        control: ControlTriggers,
        context: Arc<RuntimeContext>,
    ) -> Arc<Listener> {
        let tree = MacroTree::from_macros(
            parse_macro_file(macros, "test", "profile", None).unwrap(),
        );
        Listener::new(
            "profile".to_string(),
            "fake input".to_string(),
            tree,
            None,
            control,
            CallbackScripts::default(),
            context,
        )
    }

    fn on(listener: &Listener, note: u8, velocity: u8) {
        listener.handle_midi(&[0x90, note, velocity], midimacs_core::time::now_nanos());
    }

    fn off(listener: &Listener, note: u8) {
        listener.handle_midi(&[0x80, note, 0], midimacs_core::time::now_nanos());
    }

    fn cc(listener: &Listener, controller: u8, value: u8) {
        listener.handle_midi(&[0xB0, controller, value], midimacs_core::time::now_nanos());
    }

    fn wait_for_line_count(path: &std::path::Path, count: usize) -> Vec<String> {
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(path) {
                let lines: Vec<String> = text.lines().map(str::to_string).collect();
                if lines.len() >= count {
                    return lines;
                }
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn held_follows_press_and_release_without_sustain() {
        let listener = listener_with("", ControlTriggers::default(), context());
        on(&listener, 60, 90);
        on(&listener, 64, 90);
        assert_eq!(listener.held_notes(), vec![(60, 0), (64, 0)]);
        off(&listener, 60);
        assert_eq!(listener.held_notes(), vec![(64, 0)]);
        off(&listener, 64);
        assert!(listener.held_notes().is_empty());
    }

    #[test]
    fn note_on_velocity_zero_releases() {
        let listener = listener_with("", ControlTriggers::default(), context());
        on(&listener, 60, 90);
        listener.handle_midi(&[0x90, 60, 0], 0);
        assert!(listener.held_notes().is_empty());
    }

    #[test]
    fn sustain_retains_releases_until_pedal_up() {
        let listener = listener_with("", ControlTriggers::default(), context());
        cc(&listener, 64, 127);
        on(&listener, 60, 90);
        off(&listener, 60);
        assert_eq!(listener.held_notes(), vec![(60, 0)]);
        on(&listener, 64, 90);
        off(&listener, 64);
        assert_eq!(listener.held_notes(), vec![(60, 0), (64, 0)]);
        cc(&listener, 64, 0);
        assert!(listener.held_notes().is_empty());
    }

    #[test]
    fn sustain_is_per_channel() {
        let listener = listener_with("", ControlTriggers::default(), context());
        // pedal down on channel 0 only
        cc(&listener, 64, 127);
        listener.handle_midi(&[0x91, 60, 90], 0);
        listener.handle_midi(&[0x81, 60, 0], 1);
        // channel 1 is not sustaining, so the note released for real
        assert!(listener.held_notes().is_empty());
    }

    #[test]
    fn restrike_of_a_queued_release_appends() {
        let listener = listener_with("", ControlTriggers::default(), context());
        cc(&listener, 64, 127);
        on(&listener, 60, 90);
        off(&listener, 60);
        on(&listener, 60, 95);
        assert_eq!(listener.held_notes(), vec![(60, 0), (60, 0)]);
        // the queued release was cancelled; pedal up removes nothing
        cc(&listener, 64, 0);
        assert_eq!(listener.held_notes(), vec![(60, 0), (60, 0)]);
    }

    #[test]
    fn single_note_macro_fires_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let context = context();
        let listener = listener_with(
            &format!("C4 [BLOCK]-> echo hi >> {}", out.display()),
            ControlTriggers::default(),
            Arc::clone(&context),
        );
        on(&listener, 60, 90);
        assert!(!out.exists());
        off(&listener, 60);
        listener.stop();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hi\n");
    }

    #[test]
    fn pedal_lift_fires_with_retained_notes_then_trims() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let context = context();
        let listener = listener_with(
            &format!(
                "C4+D4 [BLOCK]-> echo both >> {out}\nD4 [BLOCK]-> echo lone >> {out}\n",
                out = out.display()
            ),
            ControlTriggers::default(),
            Arc::clone(&context),
        );
        on(&listener, 60, 80);
        cc(&listener, 64, 127);
        off(&listener, 60);
        on(&listener, 62, 80);
        off(&listener, 62);
        // pedal lift evaluates the retained [C4, D4], then trims both
        cc(&listener, 64, 0);
        assert!(listener.held_notes().is_empty());
        listener.stop();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "both\n");
    }

    #[test]
    fn wildcard_catcher_ignores_held_state() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let context = context();
        let listener = listener_with(
            &format!(
                "* MIDI{{s == 11 and d1 == 74}} [BLOCK]-> echo cc >> {}",
                out.display()
            ),
            ControlTriggers::default(),
            Arc::clone(&context),
        );
        cc(&listener, 74, 64);
        cc(&listener, 73, 64);
        listener.stop();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "cc\n");
        assert!(listener.held_notes().is_empty());
    }

    #[test]
    fn midi_catcher_needs_an_extra_message() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let context = context();
        let listener = listener_with(
            &format!("C4 MIDI{{s == 11}} [BLOCK]-> echo caught >> {}", out.display()),
            ControlTriggers::default(),
            Arc::clone(&context),
        );
        // clean press and release: the catcher stays silent
        on(&listener, 60, 90);
        off(&listener, 60);
        // held C4 plus a knob turn: the catcher fires
        on(&listener, 60, 90);
        cc(&listener, 74, 100);
        off(&listener, 60);
        listener.stop();
        let lines = wait_for_line_count(&out, 1);
        assert_eq!(lines, vec!["caught"]);
    }

    #[test]
    fn enable_trigger_toggles_and_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let context = context();
        let listener = listener_with(
            &format!("A0+B0 [BLOCK]-> echo macro >> {}", out.display()),
            ControlTriggers {
                enable: Some(parse_control_trigger("A0+B0", "test").unwrap()),
                cycle_subprofiles: None,
            },
            Arc::clone(&context),
        );
        assert!(listener.is_enabled());
        on(&listener, 21, 90);
        on(&listener, 23, 90);
        off(&listener, 21);
        // the control trigger won, the identical macro did not run
        assert!(!listener.is_enabled());
        off(&listener, 23);
        listener.stop();
        assert!(!out.exists());
    }

    #[test]
    fn disabled_listener_fires_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let context = context();
        let listener = listener_with(
            &format!("C4 [BLOCK]-> echo hi >> {}", out.display()),
            ControlTriggers::default(),
            Arc::clone(&context),
        );
        listener.set_enabled(false);
        on(&listener, 60, 90);
        off(&listener, 60);
        listener.stop();
        assert!(!out.exists());
    }

    #[test]
    fn virtual_sustain_retains_like_the_pedal() {
        let listener = listener_with("", ControlTriggers::default(), context());
        listener.set_virtual_sustain(true);
        on(&listener, 60, 90);
        off(&listener, 60);
        assert_eq!(listener.held_notes(), vec![(60, 0)]);
        listener.set_virtual_sustain(false);
        assert!(listener.held_notes().is_empty());
    }

    #[test]
    fn virtual_sustain_layers_with_the_pedal() {
        let listener = listener_with("", ControlTriggers::default(), context());
        listener.set_virtual_sustain(true);
        cc(&listener, 64, 127);
        on(&listener, 60, 90);
        off(&listener, 60);
        // physical pedal still holds the channel after the virtual one lifts
        listener.set_virtual_sustain(false);
        assert_eq!(listener.held_notes(), vec![(60, 0)]);
        cc(&listener, 64, 0);
        assert!(listener.held_notes().is_empty());
    }

    #[test]
    fn chord_with_predicate_gates_on_velocity() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let context = context();
        let listener = listener_with(
            &format!(
                "[C4|E4|G4]{{cminv > 80}} [BLOCK]-> echo chord >> {}",
                out.display()
            ),
            ControlTriggers::default(),
            Arc::clone(&context),
        );
        // min velocity 70: predicate false, nothing fires
        on(&listener, 60, 90);
        on(&listener, 64, 70);
        on(&listener, 67, 95);
        off(&listener, 60);
        off(&listener, 64);
        off(&listener, 67);
        // min velocity 85: fires exactly once, on the first release
        on(&listener, 60, 85);
        on(&listener, 64, 90);
        on(&listener, 67, 95);
        off(&listener, 60);
        off(&listener, 64);
        off(&listener, 67);
        listener.stop();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "chord\n");
    }
}
