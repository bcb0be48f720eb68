// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The Unix-socket control surface: wire framing, verb handling, and the
//! accept loop.

pub mod handler;
pub mod protocol;
pub mod server;

pub use protocol::IpcError;
pub use server::{resolve_socket_path, serve, SOCKET_FILE_NAME};
