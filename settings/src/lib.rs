// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The configuration model. A config file is TOML where every top-level
//! table is a profile and every table nested in a profile is a subprofile;
//! scalars at each level are that level's settings. Keeping this crate
//! separate from the engine keeps file-format churn away from the dispatch
//! code.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use toml::Value;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{scope}setting: {setting}, is not a valid setting")]
    UnknownSetting { scope: Scope, setting: String },
    #[error("{scope}setting: {setting}, should be of type: {expected}")]
    WrongType {
        scope: Scope,
        setting: String,
        expected: &'static str,
    },
    #[error("{scope}required setting: {setting}, is not present")]
    MissingSetting { scope: Scope, setting: String },
    #[error("{scope}{message}")]
    Invalid { scope: Scope, message: String },
}

/// Which profile/subprofile a config error belongs to, prerendered for the
/// error messages above.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    pub profile: Option<String>,
    pub subprofile: Option<String>,
}
impl Scope {
    fn global() -> Self {
        Self::default()
    }

    fn profile(name: &str) -> Self {
        Self {
            profile: Some(name.to_string()),
            subprofile: None,
        }
    }

    fn subprofile(profile: &str, name: &str) -> Self {
        Self {
            profile: Some(profile.to_string()),
            subprofile: Some(name.to_string()),
        }
    }
}
impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.profile, &self.subprofile) {
            (Some(p), Some(s)) => write!(f, "[{p}][{s}]: "),
            (Some(p), None) => write!(f, "[{p}]: "),
            _ => Ok(()),
        }
    }
}

/// Everything the process needs to start: global scalars plus the enabled
/// profiles in file order.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub socket_path: Option<String>,
    pub profiles: Vec<(String, ProfileConfig)>,
}

#[derive(Clone, Debug)]
pub struct ProfileConfig {
    pub enabled: bool,
    pub midi_input: String,
    /// Macro file shared by every subprofile, relative to the macro dir.
    pub global_macros: Option<String>,
    pub enable_trigger: Option<String>,
    pub cycle_subprofiles_trigger: Option<String>,
    pub enable_callback: Option<String>,
    pub virtual_sustain_callback: Option<String>,
    pub subprofile_callback: Option<String>,
    pub debounce_callbacks: bool,
    pub subprofiles: Vec<(String, SubprofileConfig)>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SubprofileConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub macros: String,
}

fn default_enabled() -> bool {
    true
}

fn default_debounce_callbacks() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<Config, ConfigError> {
    let table: toml::Table = text.parse().map_err(ConfigError::Toml)?;
    let mut config = Config::default();
    for (key, value) in table {
        match value {
            Value::Table(profile_table) => {
                let profile = parse_profile(&key, profile_table)?;
                if profile.enabled {
                    config.profiles.push((key, profile));
                }
            }
            other => match key.as_str() {
                "socket-path" => {
                    config.socket_path = Some(expect_str(&key, other, Scope::global())?);
                }
                _ => {
                    return Err(ConfigError::UnknownSetting {
                        scope: Scope::global(),
                        setting: key,
                    })
                }
            },
        }
    }
    Ok(config)
}

fn parse_profile(name: &str, table: toml::Table) -> Result<ProfileConfig, ConfigError> {
    let scope = Scope::profile(name);
    let mut enabled = true;
    let mut midi_input = None;
    let mut global_macros = None;
    let mut enable_trigger = None;
    let mut cycle_subprofiles_trigger = None;
    let mut enable_callback = None;
    let mut virtual_sustain_callback = None;
    let mut subprofile_callback = None;
    let mut debounce_callbacks = default_debounce_callbacks();
    let mut subprofiles = Vec::new();
    for (key, value) in table {
        if let Value::Table(_) = value {
            let sub_scope = Scope::subprofile(name, &key);
            let subprofile: SubprofileConfig =
                value.try_into().map_err(|e: toml::de::Error| {
                    ConfigError::Invalid {
                        scope: sub_scope,
                        message: e.message().to_string(),
                    }
                })?;
            if subprofile.enabled {
                subprofiles.push((key, subprofile));
            }
            continue;
        }
        match key.as_str() {
            "enabled" => enabled = expect_bool(&key, value, scope.clone())?,
            "midi-input" => midi_input = Some(expect_str(&key, value, scope.clone())?),
            "global-macros" => global_macros = Some(expect_str(&key, value, scope.clone())?),
            "enable-trigger" => enable_trigger = Some(expect_str(&key, value, scope.clone())?),
            "cycle-subprofiles-trigger" => {
                cycle_subprofiles_trigger = Some(expect_str(&key, value, scope.clone())?)
            }
            "enable-callback" => enable_callback = Some(expect_str(&key, value, scope.clone())?),
            "virtual-sustain-callback" => {
                virtual_sustain_callback = Some(expect_str(&key, value, scope.clone())?)
            }
            "subprofile-callback" => {
                subprofile_callback = Some(expect_str(&key, value, scope.clone())?)
            }
            "debounce-callbacks" => debounce_callbacks = expect_bool(&key, value, scope.clone())?,
            _ => {
                return Err(ConfigError::UnknownSetting {
                    scope,
                    setting: key,
                })
            }
        }
    }
    let Some(midi_input) = midi_input else {
        return Err(ConfigError::MissingSetting {
            scope,
            setting: "midi-input".to_string(),
        });
    };
    Ok(ProfileConfig {
        enabled,
        midi_input,
        global_macros,
        enable_trigger,
        cycle_subprofiles_trigger,
        enable_callback,
        virtual_sustain_callback,
        subprofile_callback,
        debounce_callbacks,
        subprofiles,
    })
}

fn expect_str(key: &str, value: Value, scope: Scope) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(ConfigError::WrongType {
            scope,
            setting: key.to_string(),
            expected: "string",
        }),
    }
}

fn expect_bool(key: &str, value: Value, scope: Scope) -> Result<bool, ConfigError> {
    match value {
        Value::Boolean(b) => Ok(b),
        _ => Err(ConfigError::WrongType {
            scope,
            setting: key.to_string(),
            expected: "bool",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_profile() {
        let config = parse_config(
            r#"
socket-path = "/tmp/test.sock"

[piano]
midi-input = "Digital Piano MIDI 1"
global-macros = "piano"
enable-trigger = "A0+B0"
debounce-callbacks = false

[piano.media]
macros = "piano-media"

[piano.games]
macros = "piano-games"
enabled = false
"#,
        )
        .unwrap();
        assert_eq!(config.socket_path.as_deref(), Some("/tmp/test.sock"));
        assert_eq!(config.profiles.len(), 1);
        let (name, piano) = &config.profiles[0];
        assert_eq!(name, "piano");
        assert_eq!(piano.midi_input, "Digital Piano MIDI 1");
        assert!(!piano.debounce_callbacks);
        // games is disabled and therefore not loaded
        assert_eq!(piano.subprofiles.len(), 1);
        assert_eq!(piano.subprofiles[0].0, "media");
    }

    #[test]
    fn disabled_profile_is_skipped() {
        let config = parse_config(
            r#"
[off]
midi-input = "x"
enabled = false
"#,
        )
        .unwrap();
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn missing_midi_input() {
        let err = parse_config("[p]\nenabled = true\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingSetting { ref setting, .. } if setting == "midi-input"
        ));
    }

    #[test]
    fn unknown_setting_names_the_profile() {
        let err = parse_config("[p]\nmidi-input = \"x\"\ntypo = 3\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "[p]: setting: typo, is not a valid setting"
        );
    }

    #[test]
    fn wrong_type() {
        let err = parse_config("[p]\nmidi-input = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::WrongType { .. }));
    }

    #[test]
    fn subprofile_requires_macros() {
        let err = parse_config("[p]\nmidi-input = \"x\"\n[p.s]\nenabled = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn top_level_scalar_must_be_known() {
        let err = parse_config("stray = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSetting { .. }));
    }
}
