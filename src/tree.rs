// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The macro trie. Triggers form a prefix tree whose nodes carry inclusive
//! bounds on the remaining-action count, so whole subtrees prune on a single
//! comparison before any predicate runs.

use midimacs_core::message::{MidiMessage, PlayedNote};
use std::sync::Arc;

use crate::argument::Arguments;
use crate::locking::LockRegistry;
use crate::macros::{Macro, Trigger};
use crate::matching::match_trigger;
use crate::script::Script;

#[derive(Debug, Default)]
pub struct MacroTree {
    root: MacroTreeNode,
    /// Wildcard macros are not part of the prefix tree; they fire once per
    /// inbound MIDI message regardless of held notes.
    wildcard_scripts: Vec<Arc<Script>>,
}

#[derive(Debug)]
pub struct MacroTreeNode {
    // Branch iteration order is the match tie-break, so branches stay in
    // insertion order rather than any keyed map.
    branches: Vec<(Trigger, MacroTreeNode)>,
    scripts: Vec<Arc<Script>>,
    min_actions: usize,
    max_actions: usize,
}
impl Default for MacroTreeNode {
    fn default() -> Self {
        Self {
            branches: Vec::new(),
            scripts: Vec::new(),
            min_actions: usize::MAX,
            max_actions: 0,
        }
    }
}
impl MacroTreeNode {
    /// True when some descendant could fire a script given `actions`
    /// remaining actions (held notes past this node, plus one for a MIDI
    /// message being dispatched).
    pub fn should_process(&self, actions: usize) -> bool {
        self.min_actions <= actions && actions <= self.max_actions
    }

    fn widen(&mut self, lo: usize, hi: Option<usize>) {
        self.min_actions = self.min_actions.min(lo);
        self.max_actions = self.max_actions.max(hi.unwrap_or(usize::MAX));
    }

    #[cfg(test)]
    pub fn bounds(&self) -> (usize, usize) {
        (self.min_actions, self.max_actions)
    }
}

impl MacroTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_macros(macros: Vec<Macro>) -> Self {
        let mut tree = Self::new();
        for parsed in macros {
            tree.add_macro(parsed);
        }
        tree
    }

    pub fn is_empty(&self) -> bool {
        self.root.branches.is_empty()
            && self.root.scripts.is_empty()
            && self.wildcard_scripts.is_empty()
    }

    pub fn add_macro(&mut self, parsed: Macro) {
        let Macro { triggers, script } = parsed;
        let Some(triggers) = triggers else {
            self.wildcard_scripts.push(script);
            return;
        };
        let range = script.argument_definition().range();
        // notes_after[i]: held notes a match still needs once the walk
        // stands at the node *before* edge i
        let mut notes_after = Vec::with_capacity(triggers.len());
        let mut remaining: usize = triggers.iter().map(Trigger::note_count).sum();
        for trigger in &triggers {
            notes_after.push(remaining);
            remaining -= trigger.note_count();
        }
        let mut node = &mut self.root;
        for (trigger, notes) in triggers.into_iter().zip(notes_after) {
            node.widen(notes + range.lo, range.hi.map(|hi| notes + hi));
            let position = node
                .branches
                .iter()
                .position(|(existing, _)| *existing == trigger);
            let index = match position {
                Some(index) => index,
                None => {
                    node.branches.push((trigger, MacroTreeNode::default()));
                    node.branches.len() - 1
                }
            };
            node = &mut node.branches[index].1;
        }
        node.widen(range.lo, range.hi);
        node.scripts.push(script);
    }

    /// Walks the trie against the held notes. When `message` is present the
    /// call is a MIDI dispatch: wildcard scripts always see the message, and
    /// trigger-guarded MIDI catchers see it only once every held note is
    /// consumed and an extra message has arrived since the last press.
    pub fn execute_macros(
        &self,
        held: &[PlayedNote],
        had_extra_message: bool,
        message: Option<&MidiMessage>,
        locks: &Arc<LockRegistry>,
    ) {
        if let Some(message) = message {
            for script in &self.wildcard_scripts {
                script.queue_if_arguments_match(Arguments::Midi(message.clone()), locks);
            }
        }
        let actions = held.len() + usize::from(message.is_some());
        if !self.root.should_process(actions) {
            return;
        }
        self.recurse(&self.root, 0, held, had_extra_message, message, locks);
    }

    #[allow(clippy::too_many_arguments)]
    fn recurse(
        &self,
        node: &MacroTreeNode,
        position: usize,
        held: &[PlayedNote],
        had_extra_message: bool,
        message: Option<&MidiMessage>,
        locks: &Arc<LockRegistry>,
    ) {
        for script in &node.scripts {
            match message {
                Some(message) => {
                    // a MIDI catcher fires only when all notes are consumed
                    if position < held.len() || !had_extra_message {
                        continue;
                    }
                    script.queue_if_arguments_match(Arguments::Midi(message.clone()), locks);
                }
                None => {
                    script
                        .queue_if_arguments_match(Arguments::Notes(held[position..].to_vec()), locks);
                }
            }
        }
        let remaining = held.len() - position;
        if remaining == 0 {
            return;
        }
        let has_midi = usize::from(message.is_some());
        for (trigger, child) in &node.branches {
            let consumed = trigger.note_count();
            if consumed > remaining || !child.should_process(remaining - consumed + has_midi) {
                continue;
            }
            if match_trigger(trigger, held, position) {
                self.recurse(child, position + consumed, held, had_extra_message, message, locks);
            }
        }
    }

    /// Post-order worker drain. Call once, after the listener's port is
    /// closed, so nothing can queue new invocations.
    pub fn shutdown(&self) {
        fn drain(node: &MacroTreeNode) {
            for (_, child) in &node.branches {
                drain(child);
            }
            for script in &node.scripts {
                script.shutdown();
            }
        }
        drain(&self.root);
        for script in &self.wildcard_scripts {
            script.shutdown();
        }
    }

    #[cfg(test)]
    pub fn root(&self) -> &MacroTreeNode {
        &self.root
    }
}
