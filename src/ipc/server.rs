// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The Unix-domain control server. One accept loop, clients handled in
//! turn; a framing error closes the client with no response and the server
//! carries on.

use log::{info, warn};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::handler::handle_message;
use super::protocol::{read_message, write_response};
use crate::runtime::Runtime;

pub const SOCKET_FILE_NAME: &str = "midi-macros-ipc.sock";

/// `socket-path` setting, else `$XDG_RUNTIME_DIR`, else the system temp
/// dir.
pub fn resolve_socket_path(setting: Option<&str>) -> PathBuf {
    if let Some(path) = setting {
        return PathBuf::from(path);
    }
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    dir.join(SOCKET_FILE_NAME)
}

/// Binds the socket (replacing a stale file) and serves until the process
/// exits.
pub fn serve(path: &Path, runtime: Arc<Runtime>) -> anyhow::Result<JoinHandle<()>> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    info!("listening for IPC on {}", path.display());
    let handle = std::thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(mut stream) => handle_client(&mut stream, &runtime),
                Err(err) => warn!("failed to accept IPC client: {err}"),
            }
        }
    });
    Ok(handle)
}

fn handle_client(stream: &mut UnixStream, runtime: &Runtime) {
    match read_message(stream) {
        Ok(message) => {
            let response = handle_message(&message, runtime);
            if let Err(err) = write_response(stream, response) {
                warn!("failed to respond to IPC client: {err}");
            }
        }
        Err(err) => {
            // no response; dropping the stream closes the connection
            warn!("dropping IPC client: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{read_response, write_message};
    use crate::runtime::RuntimeContext;
    use std::io::Write;

    #[test]
    fn socket_path_resolution() {
        assert_eq!(
            resolve_socket_path(Some("/tmp/custom.sock")),
            PathBuf::from("/tmp/custom.sock")
        );
        let fallback = resolve_socket_path(None);
        assert!(fallback.ends_with(SOCKET_FILE_NAME));
    }

    #[test]
    fn request_response_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("macros")).unwrap();
        std::fs::write(dir.path().join("config.toml"), "").unwrap();
        let runtime = Arc::new(Runtime::new(
            Arc::new(RuntimeContext::new()),
            dir.path().join("config.toml"),
            dir.path().join("macros"),
        ));
        runtime.start().unwrap();
        let socket_path = dir.path().join("ipc.sock");
        let _server = serve(&socket_path, Arc::clone(&runtime)).unwrap();

        let mut client = UnixStream::connect(&socket_path).unwrap();
        write_message(&mut client, &["get-loaded-profiles".to_string()]).unwrap();
        let (success, text) = read_response(&mut client).unwrap();
        assert!(success);
        assert_eq!(text, "");

        // a client that sends garbage is dropped without a response and the
        // server keeps accepting
        let mut bad = UnixStream::connect(&socket_path).unwrap();
        bad.write_all(&[0xFF; 32]).unwrap();
        drop(bad);

        let mut second = UnixStream::connect(&socket_path).unwrap();
        write_message(&mut second, &["bogus".to_string()]).unwrap();
        let (success, _) = read_response(&mut second).unwrap();
        assert!(!success);
    }
}
