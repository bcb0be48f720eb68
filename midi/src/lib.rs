// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! This crate owns the `midir` plumbing for input ports: enumerating them,
//! resolving a configured port name, and holding the open connection whose
//! driver-owned callback thread feeds raw bytes to the engine.

use log::warn;
use midimacs_core::time::now_nanos;
use midir::{MidiInput, MidiInputConnection};

const CLIENT_NAME: &str = "midimacs input";

/// Names of all currently-visible input ports, in driver order.
pub fn input_port_names() -> anyhow::Result<Vec<String>> {
    let midi = new_input()?;
    Ok(midi
        .ports()
        .iter()
        .map(|port| {
            midi.port_name(port)
                .unwrap_or_else(|_| "[unnamed input]".to_string())
        })
        .collect())
}

/// An open input port. Dropping it (or calling [InputConnection::close])
/// disconnects, which joins the driver's callback thread.
pub struct InputConnection {
    // The connection owns the underlying MidiInput until close() passes it
    // back; the Option models that hand-off.
    connection: Option<MidiInputConnection<()>>,
    port_name: String,
}
impl InputConnection {
    /// Connects to the port whose name matches `wanted`: exact match first,
    /// then the first port containing `wanted` as a substring (port names
    /// pick up suffixes like "128:0" across reconnects, so exact-only would
    /// be brittle). The callback runs on the driver's thread once per
    /// inbound message with the raw bytes and a monotonic-nanos stamp.
    pub fn connect<F>(wanted: &str, mut callback: F) -> anyhow::Result<Self>
    where
        F: FnMut(&[u8], i64) + Send + 'static,
    {
        let midi = new_input()?;
        let ports = midi.ports();
        let mut chosen = None;
        for port in &ports {
            let Ok(name) = midi.port_name(port) else {
                continue;
            };
            if name == wanted {
                chosen = Some((port.clone(), name));
                break;
            }
            if chosen.is_none() && name.contains(wanted) {
                chosen = Some((port.clone(), name));
            }
        }
        let Some((port, port_name)) = chosen else {
            return Err(anyhow::format_err!("no MIDI input matching: {wanted}"));
        };
        match midi.connect(
            &port,
            CLIENT_NAME,
            move |_timestamp, bytes, _| {
                if bytes.is_empty() {
                    warn!("dropping empty MIDI message");
                    return;
                }
                // midir's timestamp epoch is driver-specific; the engine
                // wants process-monotonic nanos, so stamp on arrival.
                callback(bytes, now_nanos());
            },
            (),
        ) {
            Ok(connection) => Ok(Self {
                connection: Some(connection),
                port_name,
            }),
            Err(err) => Err(anyhow::format_err!(
                "could not connect to {port_name}: {err}"
            )),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.close();
        }
    }
}
impl Drop for InputConnection {
    fn drop(&mut self) {
        self.close();
    }
}
impl std::fmt::Debug for InputConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputConnection")
            .field("port_name", &self.port_name)
            .field("open", &self.connection.is_some())
            .finish()
    }
}

fn new_input() -> anyhow::Result<MidiInput> {
    MidiInput::new(CLIENT_NAME).map_err(|err| anyhow::format_err!("couldn't create MIDI input: {err}"))
}
