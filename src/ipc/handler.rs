// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Verb dispatch for control messages. The first string is the verb; the
//! reply is `(success, text)`.

use crate::runtime::Runtime;

pub fn handle_message(message: &[String], runtime: &Runtime) -> (bool, String) {
    let Some(verb) = message.first() else {
        return (false, "empty message".to_string());
    };
    match verb.as_str() {
        "reload" => handle_reload(&message[1..], runtime),
        "get-loaded-profiles" => handle_get_loaded_profiles(&message[1..], runtime),
        "profile" => handle_profile(&message[1..], runtime),
        _ => (false, "unknown message".to_string()),
    }
}

fn handle_reload(rest: &[String], runtime: &Runtime) -> (bool, String) {
    if !rest.is_empty() {
        return (false, "reload message takes no arguments".to_string());
    }
    match runtime.reload() {
        Ok(()) => (true, "successfully reloaded all profiles".to_string()),
        Err(err) => (false, format!("failed to reload configuration: {err:#}")),
    }
}

fn handle_get_loaded_profiles(rest: &[String], runtime: &Runtime) -> (bool, String) {
    if !rest.is_empty() {
        return (
            false,
            "get-loaded-profiles message takes no arguments".to_string(),
        );
    }
    (true, runtime.loaded_profiles().join("\n"))
}

fn handle_profile(rest: &[String], runtime: &Runtime) -> (bool, String) {
    let [name, action, args @ ..] = rest else {
        return (false, "profile message needs a profile and an action".to_string());
    };
    let Some(listener) = runtime.listener(name) else {
        return (false, format!("unknown profile: {name}"));
    };
    let enabled_reply = |enabled: bool| {
        (
            true,
            if enabled { "enabled" } else { "disabled" }.to_string(),
        )
    };
    match action.as_str() {
        "toggle" if args.is_empty() => {
            listener.toggle_enabled();
            enabled_reply(listener.is_enabled())
        }
        "enable" if args.is_empty() => {
            listener.set_enabled(true);
            enabled_reply(true)
        }
        "disable" if args.is_empty() => {
            listener.set_enabled(false);
            enabled_reply(false)
        }
        "get-loaded-subprofiles" if args.is_empty() => {
            (true, listener.subprofile_names().join("\n"))
        }
        "cycle-subprofiles" if args.is_empty() => match listener.cycle_subprofiles() {
            Some(current) => (true, current),
            None => (false, format!("profile: {name}, has no subprofiles")),
        },
        "set-subprofile" => {
            let [subprofile] = args else {
                return (
                    false,
                    "set-subprofile takes exactly one subprofile name".to_string(),
                );
            };
            match listener.set_subprofile(subprofile) {
                Ok(()) => (true, subprofile.clone()),
                Err(reply) => (false, reply),
            }
        }
        "virtual-sustain" => {
            let [sub_action] = args else {
                return (
                    false,
                    "virtual-sustain needs toggle, enable, or disable".to_string(),
                );
            };
            match sub_action.as_str() {
                "toggle" => listener.toggle_virtual_sustain(),
                "enable" => listener.set_virtual_sustain(true),
                "disable" => listener.set_virtual_sustain(false),
                _ => {
                    return (
                        false,
                        "virtual-sustain needs toggle, enable, or disable".to_string(),
                    )
                }
            }
            enabled_reply(listener.virtual_sustain())
        }
        _ => (false, format!("unknown profile action: {action}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeContext;
    use std::sync::Arc;

    fn runtime_with_profile(dir: &std::path::Path) -> Runtime {
        let macro_dir = dir.join("macros");
        std::fs::create_dir_all(&macro_dir).unwrap();
        std::fs::write(dir.join("config.toml"), concat!(
            "[piano]\n",
            "midi-input = \"nowhere\"\n",
            "[piano.media]\n",
            "macros = \"media\"\n",
            "[piano.games]\n",
            "macros = \"games\"\n",
        ))
        .unwrap();
        std::fs::write(macro_dir.join("media"), "C4 -> echo media\n").unwrap();
        std::fs::write(macro_dir.join("games"), "C4 -> echo games\n").unwrap();
        let runtime = Runtime::new(
            Arc::new(RuntimeContext::new()),
            dir.join("config.toml"),
            macro_dir,
        );
        runtime.start().unwrap();
        runtime
    }

    fn send(runtime: &Runtime, parts: &[&str]) -> (bool, String) {
        let message: Vec<String> = parts.iter().map(|part| part.to_string()).collect();
        handle_message(&message, runtime)
    }

    #[test]
    fn unknown_and_empty_messages() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_profile(dir.path());
        assert_eq!(send(&runtime, &[]), (false, "empty message".to_string()));
        assert_eq!(
            send(&runtime, &["bogus"]),
            (false, "unknown message".to_string())
        );
        runtime.stop_listeners();
    }

    #[test]
    fn profile_toggle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_profile(dir.path());
        assert_eq!(
            send(&runtime, &["profile", "piano", "toggle"]),
            (true, "disabled".to_string())
        );
        assert_eq!(
            send(&runtime, &["profile", "piano", "enable"]),
            (true, "enabled".to_string())
        );
        assert_eq!(
            send(&runtime, &["profile", "missing", "toggle"]),
            (false, "unknown profile: missing".to_string())
        );
        runtime.stop_listeners();
    }

    #[test]
    fn subprofile_controls() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_profile(dir.path());
        assert_eq!(
            send(&runtime, &["profile", "piano", "get-loaded-subprofiles"]),
            (true, "media\ngames".to_string())
        );
        assert_eq!(
            send(&runtime, &["profile", "piano", "cycle-subprofiles"]),
            (true, "games".to_string())
        );
        assert_eq!(
            send(&runtime, &["profile", "piano", "set-subprofile", "media"]),
            (true, "media".to_string())
        );
        assert!(!send(&runtime, &["profile", "piano", "set-subprofile", "nope"]).0);
        runtime.stop_listeners();
    }

    #[test]
    fn virtual_sustain_controls() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_profile(dir.path());
        assert_eq!(
            send(&runtime, &["profile", "piano", "virtual-sustain", "enable"]),
            (true, "enabled".to_string())
        );
        assert_eq!(
            send(&runtime, &["profile", "piano", "virtual-sustain", "toggle"]),
            (true, "disabled".to_string())
        );
        runtime.stop_listeners();
    }

    #[test]
    fn get_loaded_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_profile(dir.path());
        assert_eq!(
            send(&runtime, &["get-loaded-profiles"]),
            (true, "piano".to_string())
        );
        runtime.stop_listeners();
    }
}
