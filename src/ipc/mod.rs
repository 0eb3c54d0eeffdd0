//! Local IPC transport
//!
//! Unix socket server feeding the service inbox, and the client used to
//! reach it. Frames use [`crate::protocol::IpcCodec`].

mod client;
mod server;

pub use client::{stop_service, IpcClient};
pub use server::IpcServer;
