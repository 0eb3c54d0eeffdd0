//! IPC protocol
//!
//! Framing ([`codec`]) and the typed messages carried inside frames
//! ([`message`]). The wire format is not self-describing: the message code
//! determines the payload layout.

pub mod codec;
pub mod message;

pub use codec::IpcCodec;
pub use message::{
    decode_relocations, encode_relocations, HostRelocation, IpcMessage, MessageKind, Request,
    SyncMode, SyncRequest, SyncResponse, MAX_PARTIAL_HOSTS, SYNC_RESPONSE_HEADER,
};
