// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Process-level wiring: the runtime context (lock registry + callback
//! dispatcher) that listeners receive explicitly, and the profile manager
//! that builds, swaps, and stops listeners.

use anyhow::Context;
use log::{error, info};
use midimacs_settings::{Config, ProfileConfig};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::callback::CallbackDispatcher;
use crate::listener::{CallbackScripts, ControlTriggers, Listener};
use crate::locking::LockRegistry;
use crate::parser::{parse_control_trigger, parse_macro_file};
use crate::subprofile::SubprofileHolder;
use crate::tree::MacroTree;

/// The two process-wide services, initialised once at startup and handed to
/// every listener instead of living behind hidden globals.
#[derive(Debug)]
pub struct RuntimeContext {
    pub locks: Arc<LockRegistry>,
    pub callbacks: CallbackDispatcher,
}
impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(LockRegistry::new()),
            callbacks: CallbackDispatcher::new(),
        }
    }
}
impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the loaded profiles. Reloads are all-or-nothing: the new set is
/// fully parsed and constructed before any old listener stops.
pub struct Runtime {
    context: Arc<RuntimeContext>,
    config_file: PathBuf,
    macro_dir: PathBuf,
    listeners: Mutex<Vec<(String, Arc<Listener>)>>,
    socket_path_setting: Mutex<Option<String>>,
}
impl Runtime {
    pub fn new(context: Arc<RuntimeContext>, config_file: PathBuf, macro_dir: PathBuf) -> Self {
        Self {
            context,
            config_file,
            macro_dir,
            listeners: Mutex::new(Vec::new()),
            socket_path_setting: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    /// The `socket-path` setting from the most recent successful load.
    pub fn socket_path_setting(&self) -> Option<String> {
        self.socket_path_setting.lock().clone()
    }

    /// Initial load. Config or macro-file errors are fatal here; a port
    /// that fails to open only skips its own listener.
    pub fn start(&self) -> anyhow::Result<()> {
        let (config, listeners) = self.build_listeners()?;
        *self.socket_path_setting.lock() = config.socket_path;
        self.install(listeners);
        Ok(())
    }

    /// Re-parses everything; only if every profile and subprofile parses
    /// does the new set replace the old one.
    pub fn reload(&self) -> anyhow::Result<()> {
        let (config, listeners) = self.build_listeners()?;
        info!("stopping listeners");
        self.stop_listeners();
        *self.socket_path_setting.lock() = config.socket_path;
        info!("restarting listeners");
        self.install(listeners);
        Ok(())
    }

    pub fn stop_listeners(&self) {
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for (_, listener) in listeners {
            listener.stop();
        }
    }

    pub fn loaded_profiles(&self) -> Vec<String> {
        self.listeners
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn listener(&self, profile: &str) -> Option<Arc<Listener>> {
        self.listeners
            .lock()
            .iter()
            .find(|(name, _)| name == profile)
            .map(|(_, listener)| Arc::clone(listener))
    }

    fn install(&self, listeners: Vec<(String, Arc<Listener>)>) {
        for (name, listener) in &listeners {
            if let Err(err) = listener.start() {
                // the profile stays loaded so a later reload can retry
                error!("[{name}] could not start listener: {err:#}");
            }
        }
        *self.listeners.lock() = listeners;
    }

    fn build_listeners(&self) -> anyhow::Result<(Config, Vec<(String, Arc<Listener>)>)> {
        let config = midimacs_settings::load_config(&self.config_file)
            .with_context(|| format!("loading {}", self.config_file.display()))?;
        let mut listeners = Vec::new();
        for (name, profile) in &config.profiles {
            let listener = self
                .build_listener(name, profile)
                .with_context(|| format!("loading profile: {name}"))?;
            listeners.push((name.clone(), listener));
        }
        Ok((config, listeners))
    }

    fn build_listener(
        &self,
        name: &str,
        profile: &ProfileConfig,
    ) -> anyhow::Result<Arc<Listener>> {
        let global_tree = match &profile.global_macros {
            Some(path) => self.parse_macro_tree(path, name, None)?,
            None => MacroTree::new(),
        };
        let mut subprofiles = Vec::new();
        for (subprofile_name, subprofile) in &profile.subprofiles {
            let tree = self.parse_macro_tree(&subprofile.macros, name, Some(subprofile_name))?;
            subprofiles.push((subprofile_name.clone(), tree));
        }
        let control = ControlTriggers {
            enable: parse_trigger_setting(profile.enable_trigger.as_deref(), name)?,
            cycle_subprofiles: parse_trigger_setting(
                profile.cycle_subprofiles_trigger.as_deref(),
                name,
            )?,
        };
        let callbacks = CallbackScripts {
            enabled: profile.enable_callback.clone(),
            virtual_sustain: profile.virtual_sustain_callback.clone(),
            subprofile: profile.subprofile_callback.clone(),
            debounce: profile.debounce_callbacks,
        };
        Ok(Listener::new(
            name.to_string(),
            profile.midi_input.clone(),
            global_tree,
            SubprofileHolder::new(subprofiles),
            control,
            callbacks,
            Arc::clone(&self.context),
        ))
    }

    fn parse_macro_tree(
        &self,
        path: &str,
        profile: &str,
        subprofile: Option<&str>,
    ) -> anyhow::Result<MacroTree> {
        let resolved = resolve_macro_path(&self.macro_dir, path);
        let text = std::fs::read_to_string(&resolved)
            .with_context(|| format!("reading macro file {}", resolved.display()))?;
        let macros = parse_macro_file(&text, path, profile, subprofile)
            .map_err(|err| anyhow::format_err!("{err}"))?;
        Ok(MacroTree::from_macros(macros))
    }
}

fn parse_trigger_setting(
    setting: Option<&str>,
    profile: &str,
) -> anyhow::Result<Option<Vec<crate::macros::Trigger>>> {
    match setting {
        None => Ok(None),
        Some(text) => parse_control_trigger(text, profile)
            .map(Some)
            .map_err(|err| anyhow::format_err!("{err}")),
    }
}

fn resolve_macro_path(macro_dir: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        macro_dir.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, text: &str) {
        fs::write(path, text).unwrap();
    }

    fn runtime_in(dir: &Path) -> Runtime {
        let macro_dir = dir.join("macros");
        fs::create_dir_all(&macro_dir).unwrap();
        Runtime::new(
            Arc::new(RuntimeContext::new()),
            dir.join("config.toml"),
            macro_dir,
        )
    }

    #[test]
    fn profiles_build_without_ports() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_in(dir.path());
        write(&dir.path().join("macros/piano"), "C4 -> echo hi\n");
        write(
            &dir.path().join("config.toml"),
            "[piano]\nmidi-input = \"nowhere\"\nglobal-macros = \"piano\"\n",
        );
        let (_, listeners) = runtime.build_listeners().unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].0, "piano");
    }

    #[test]
    fn reload_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_in(dir.path());
        write(&dir.path().join("macros/good"), "C4 -> echo hi\n");
        write(
            &dir.path().join("config.toml"),
            "[piano]\nmidi-input = \"nowhere\"\nglobal-macros = \"good\"\n",
        );
        runtime.start().unwrap();
        assert_eq!(runtime.loaded_profiles(), vec!["piano"]);

        // break the macro file: reload fails, the old set stays loaded
        write(&dir.path().join("macros/good"), "C4 echo hi\n");
        assert!(runtime.reload().is_err());
        assert_eq!(runtime.loaded_profiles(), vec!["piano"]);

        write(&dir.path().join("macros/good"), "D4 -> echo hi\n");
        runtime.reload().unwrap();
        assert_eq!(runtime.loaded_profiles(), vec!["piano"]);
        runtime.stop_listeners();
    }

    #[test]
    fn bad_control_trigger_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_in(dir.path());
        write(
            &dir.path().join("config.toml"),
            "[piano]\nmidi-input = \"nowhere\"\nenable-trigger = \"not a note\"\n",
        );
        assert!(runtime.start().is_err());
    }

    #[test]
    fn socket_path_setting_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_in(dir.path());
        write(
            &dir.path().join("config.toml"),
            "socket-path = \"/tmp/midimacs-test.sock\"\n",
        );
        runtime.start().unwrap();
        assert_eq!(
            runtime.socket_path_setting().as_deref(),
            Some("/tmp/midimacs-test.sock")
        );
    }
}
