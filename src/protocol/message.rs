//! Typed IPC messages and their fixed-layout payloads
//!
//! All integers are little-endian. Layouts:
//!
//! | Kind | Payload |
//! |---|---|
//! | `HostRelocationBatch` | `(host_id:u64, source_group_id:u64, dest_group_id:u64)*` |
//! | `SyncRequest` | `proxy_id:u64, known_revision:u64` |
//! | `SyncResponse` | `mode:u8, hpmap_revision:u64` then for PARTIAL `count:i32, host_id:u64 * count` |
//! | `Stop` | empty |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::domain::{GroupId, HostId, ProxyId, Revision};
use crate::error::{Error, Result};

/// Size of one packed relocation triple
pub const RELOCATION_SIZE: usize = 24;

/// Size of a sync request payload
pub const SYNC_REQUEST_SIZE: usize = 16;

/// Size of the sync response prefix (mode + revision)
const SYNC_RESPONSE_PREFIX: usize = 9;

/// Size of the sync response prefix plus the PARTIAL host count
pub const SYNC_RESPONSE_HEADER: usize = SYNC_RESPONSE_PREFIX + 4;

/// Most host ids the `count:i32` field of a PARTIAL response can announce
pub const MAX_PARTIAL_HOSTS: usize = i32::MAX as usize;

// =============================================================================
// Message Kind
// =============================================================================

/// Message kinds understood by the proxy group manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    HostRelocationBatch = 1,
    SyncRequest = 2,
    SyncResponse = 3,
    Stop = 4,
}

impl MessageKind {
    /// Resolve a wire code; unknown codes yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(MessageKind::HostRelocationBatch),
            2 => Some(MessageKind::SyncRequest),
            3 => Some(MessageKind::SyncResponse),
            4 => Some(MessageKind::Stop),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::HostRelocationBatch => "host relocation batch",
            MessageKind::SyncRequest => "sync request",
            MessageKind::SyncResponse => "sync response",
            MessageKind::Stop => "stop",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Raw framed message: a code plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcMessage {
    pub code: u32,
    pub payload: Bytes,
}

impl IpcMessage {
    pub fn new(code: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Message of a known kind
    pub fn of_kind(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self::new(kind.code(), payload)
    }

    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_code(self.code)
    }
}

// =============================================================================
// Host Relocation
// =============================================================================

/// One host move. A zero group id means "no group" on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRelocation {
    pub host_id: HostId,
    pub source_group_id: GroupId,
    pub dest_group_id: GroupId,
}

impl HostRelocation {
    pub fn new(host_id: HostId, source_group_id: GroupId, dest_group_id: GroupId) -> Self {
        Self {
            host_id,
            source_group_id,
            dest_group_id,
        }
    }

    /// Group the host leaves, if any
    pub fn source(&self) -> Option<GroupId> {
        (self.source_group_id != 0).then_some(self.source_group_id)
    }

    /// Group the host joins, if any
    pub fn dest(&self) -> Option<GroupId> {
        (self.dest_group_id != 0).then_some(self.dest_group_id)
    }
}

/// Pack relocations back to back.
pub fn encode_relocations(relocations: &[HostRelocation]) -> Bytes {
    let mut buf = BytesMut::with_capacity(relocations.len() * RELOCATION_SIZE);
    for r in relocations {
        buf.put_u64_le(r.host_id);
        buf.put_u64_le(r.source_group_id);
        buf.put_u64_le(r.dest_group_id);
    }
    buf.freeze()
}

/// Unpack a relocation batch; a trailing partial triple rejects the batch.
pub fn decode_relocations(mut payload: &[u8]) -> Result<Vec<HostRelocation>> {
    if payload.len() % RELOCATION_SIZE != 0 {
        return Err(Error::malformed(
            MessageKind::HostRelocationBatch.name(),
            format!("a multiple of {}", RELOCATION_SIZE),
            payload.len(),
        ));
    }

    let mut relocations = Vec::with_capacity(payload.len() / RELOCATION_SIZE);
    while payload.has_remaining() {
        relocations.push(HostRelocation {
            host_id: payload.get_u64_le(),
            source_group_id: payload.get_u64_le(),
            dest_group_id: payload.get_u64_le(),
        });
    }
    Ok(relocations)
}

// =============================================================================
// Sync Request
// =============================================================================

/// A proxy asking what it needs to catch up from `known_revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub proxy_id: ProxyId,
    pub known_revision: Revision,
}

impl SyncRequest {
    pub fn new(proxy_id: ProxyId, known_revision: Revision) -> Self {
        Self {
            proxy_id,
            known_revision,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SYNC_REQUEST_SIZE);
        buf.put_u64_le(self.proxy_id);
        buf.put_u64_le(self.known_revision);
        buf.freeze()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        if payload.len() != SYNC_REQUEST_SIZE {
            return Err(Error::malformed(
                MessageKind::SyncRequest.name(),
                SYNC_REQUEST_SIZE.to_string(),
                payload.len(),
            ));
        }
        Ok(Self {
            proxy_id: payload.get_u64_le(),
            known_revision: payload.get_u64_le(),
        })
    }
}

// =============================================================================
// Sync Response
// =============================================================================

/// Resync mode sent back to a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SyncMode {
    /// Proxy is unknown to this manager
    None = 0,
    /// Discard local state and remap everything
    Full = 1,
    /// Apply the attached deletions
    Partial = 2,
}

impl SyncMode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SyncMode::None),
            1 => Ok(SyncMode::Full),
            2 => Ok(SyncMode::Partial),
            other => Err(Error::UnknownSyncMode(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::None => "none",
            SyncMode::Full => "full",
            SyncMode::Partial => "partial",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reply to a [`SyncRequest`]. Only PARTIAL carries a host list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResponse {
    None {
        hpmap_revision: Revision,
    },
    Full {
        hpmap_revision: Revision,
    },
    Partial {
        hpmap_revision: Revision,
        deleted_hosts: Vec<HostId>,
    },
}

impl SyncResponse {
    pub fn mode(&self) -> SyncMode {
        match self {
            SyncResponse::None { .. } => SyncMode::None,
            SyncResponse::Full { .. } => SyncMode::Full,
            SyncResponse::Partial { .. } => SyncMode::Partial,
        }
    }

    pub fn hpmap_revision(&self) -> Revision {
        match self {
            SyncResponse::None { hpmap_revision }
            | SyncResponse::Full { hpmap_revision }
            | SyncResponse::Partial { hpmap_revision, .. } => *hpmap_revision,
        }
    }

    /// Hosts the proxy must drop; empty unless PARTIAL
    pub fn deleted_hosts(&self) -> &[HostId] {
        match self {
            SyncResponse::Partial { deleted_hosts, .. } => deleted_hosts,
            _ => &[],
        }
    }

    /// Fails only for a PARTIAL host list longer than [`MAX_PARTIAL_HOSTS`].
    pub fn encode(&self) -> Result<Bytes> {
        let hosts = self.deleted_hosts();
        let mut buf = BytesMut::with_capacity(SYNC_RESPONSE_HEADER + hosts.len() * 8);

        buf.put_u8(self.mode() as u8);
        buf.put_u64_le(self.hpmap_revision());

        if let SyncResponse::Partial { deleted_hosts, .. } = self {
            let count = i32::try_from(deleted_hosts.len()).map_err(|_| {
                Error::malformed(
                    MessageKind::SyncResponse.name(),
                    format!("at most {} hosts", MAX_PARTIAL_HOSTS),
                    deleted_hosts.len(),
                )
            })?;
            buf.put_i32_le(count);
            for &host_id in deleted_hosts {
                buf.put_u64_le(host_id);
            }
        }

        Ok(buf.freeze())
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        let kind = MessageKind::SyncResponse.name();

        if payload.len() < SYNC_RESPONSE_PREFIX {
            return Err(Error::malformed(
                kind,
                format!("at least {}", SYNC_RESPONSE_PREFIX),
                payload.len(),
            ));
        }

        let total = payload.len();
        let mode = SyncMode::from_u8(payload.get_u8())?;
        let hpmap_revision = payload.get_u64_le();

        match mode {
            SyncMode::None | SyncMode::Full if payload.has_remaining() => Err(Error::malformed(
                kind,
                SYNC_RESPONSE_PREFIX.to_string(),
                total,
            )),
            SyncMode::None => Ok(SyncResponse::None { hpmap_revision }),
            SyncMode::Full => Ok(SyncResponse::Full { hpmap_revision }),
            SyncMode::Partial => {
                if payload.remaining() < 4 {
                    return Err(Error::malformed(
                        kind,
                        format!("at least {}", SYNC_RESPONSE_HEADER),
                        total,
                    ));
                }

                let count = payload.get_i32_le();
                let expected = usize::try_from(count).ok().and_then(|n| n.checked_mul(8));
                if expected != Some(payload.remaining()) {
                    return Err(Error::malformed(
                        kind,
                        format!("{} host ids", count),
                        total,
                    ));
                }

                let mut deleted_hosts = Vec::with_capacity(payload.remaining() / 8);
                while payload.has_remaining() {
                    deleted_hosts.push(payload.get_u64_le());
                }

                Ok(SyncResponse::Partial {
                    hpmap_revision,
                    deleted_hosts,
                })
            }
        }
    }
}

// =============================================================================
// Inbound Requests
// =============================================================================

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Relocate(Vec<HostRelocation>),
    Sync(SyncRequest),
    Stop,
}

impl Request {
    /// Decode an inbound message.
    ///
    /// Returns `Ok(None)` for codes the service does not handle, and an error
    /// when the payload does not fit the layout of its kind.
    pub fn decode(message: &IpcMessage) -> Result<Option<Self>> {
        let request = match message.kind() {
            Some(MessageKind::HostRelocationBatch) => {
                Request::Relocate(decode_relocations(&message.payload)?)
            }
            Some(MessageKind::SyncRequest) => Request::Sync(SyncRequest::decode(&message.payload)?),
            Some(MessageKind::Stop) => Request::Stop,
            Some(MessageKind::SyncResponse) | None => return Ok(None),
        };
        Ok(Some(request))
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Request::Relocate(_) => MessageKind::HostRelocationBatch,
            Request::Sync(_) => MessageKind::SyncRequest,
            Request::Stop => MessageKind::Stop,
        }
    }

    pub fn encode(&self) -> IpcMessage {
        let payload = match self {
            Request::Relocate(relocations) => encode_relocations(relocations),
            Request::Sync(request) => request.encode(),
            Request::Stop => Bytes::new(),
        };
        IpcMessage::of_kind(self.kind(), payload)
    }
}

// =============================================================================
// Tests
// =============================================================================
