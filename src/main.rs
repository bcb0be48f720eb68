// Copyright (c) 2023 Mike Tsao. All rights reserved.

use clap::Parser;
use log::error;
use midimacs::{ipc, paths, Runtime, RuntimeContext};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the per-user config directory)
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// List MIDI input port names and exit
    #[clap(long)]
    list_midi_inputs: bool,

    /// More logging (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    let default_filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    if let Err(err) = run(args) {
        error!("{err:#}");
        std::process::exit(-1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.list_midi_inputs {
        for name in midimacs_midi::input_port_names()? {
            println!("{name}");
        }
        return Ok(());
    }
    let paths = paths::bootstrap(args.config.as_deref())?;
    let context = Arc::new(RuntimeContext::new());
    let runtime = Arc::new(Runtime::new(context, paths.config_file, paths.macro_dir));
    runtime.start()?;
    let socket_path = ipc::resolve_socket_path(runtime.socket_path_setting().as_deref());
    let server = ipc::serve(&socket_path, Arc::clone(&runtime))?;
    // the accept loop runs until the process is killed
    let _ = server.join();
    Ok(())
}
