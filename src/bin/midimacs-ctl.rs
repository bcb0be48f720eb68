// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Control-socket client: frames its arguments as one message, prints the
//! reply, and exits 0 or -1 on the reply's success flag. Handy from window
//! manager keybindings:
//!
//! ```sh
//! midimacs-ctl profile piano toggle
//! midimacs-ctl profile piano virtual-sustain toggle
//! midimacs-ctl reload
//! ```

use clap::Parser;
use midimacs::ipc::protocol::{read_response, write_message};
use midimacs::ipc::resolve_socket_path;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Socket path (defaults to $XDG_RUNTIME_DIR or the temp dir)
    #[clap(short, long, value_parser)]
    socket: Option<PathBuf>,

    /// The message, e.g. `profile piano toggle`
    #[clap(required = true)]
    message: Vec<String>,
}

fn main() {
    let args = Args::parse();
    let socket_path = args
        .socket
        .unwrap_or_else(|| resolve_socket_path(None));
    match send(&socket_path, &args.message) {
        Ok((success, reply)) => {
            if !reply.is_empty() {
                println!("{reply}");
            }
            if !success {
                std::process::exit(-1);
            }
        }
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(-1);
        }
    }
}

fn send(socket_path: &std::path::Path, message: &[String]) -> anyhow::Result<(bool, String)> {
    let mut stream = UnixStream::connect(socket_path)
        .map_err(|err| anyhow::format_err!("could not connect to {}: {err}", socket_path.display()))?;
    write_message(&mut stream, message)?;
    Ok(read_response(&mut stream)?)
}
