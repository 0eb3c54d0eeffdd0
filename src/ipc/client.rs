//! IPC Client
//!
//! Used by relocation producers, proxies' sync pollers and the shutdown path.

use std::path::Path;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::error;

use crate::domain::{ProxyId, Revision};
use crate::error::{Error, Result};
use crate::protocol::{
    HostRelocation, IpcCodec, IpcMessage, MessageKind, Request, SyncRequest, SyncResponse,
};

/// Connection to the proxy group service.
pub struct IpcClient {
    framed: Framed<UnixStream, IpcCodec>,
}

impl IpcClient {
    /// Connect to the service socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            Error::Transport(format!(
                "cannot connect to proxy group manager at {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            framed: Framed::new(stream, IpcCodec::default()),
        })
    }

    pub async fn send(&mut self, message: IpcMessage) -> Result<()> {
        self.framed
            .send(message)
            .await
            .map_err(|e| Error::Transport(format!("cannot send IPC message: {}", e)))
    }

    /// Wait for the next frame from the service.
    pub async fn recv(&mut self) -> Result<IpcMessage> {
        match self.framed.next().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(Error::Transport(format!("cannot read IPC message: {}", e))),
            None => Err(Error::Transport("connection closed by service".to_string())),
        }
    }

    /// Report a batch of host moves.
    pub async fn relocate_hosts(&mut self, relocations: &[HostRelocation]) -> Result<()> {
        self.send(Request::Relocate(relocations.to_vec()).encode())
            .await
    }

    /// Ask what `proxy_id` needs to catch up from `known_revision`.
    pub async fn proxy_sync_data(
        &mut self,
        proxy_id: ProxyId,
        known_revision: Revision,
    ) -> Result<SyncResponse> {
        self.send(Request::Sync(SyncRequest::new(proxy_id, known_revision)).encode())
            .await?;

        let reply = self.recv().await?;
        if reply.kind() != Some(MessageKind::SyncResponse) {
            return Err(Error::Transport(format!(
                "unexpected reply code {} to sync request",
                reply.code
            )));
        }

        SyncResponse::decode(&reply.payload)
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.send(Request::Stop.encode()).await
    }
}

/// Ask the service listening on `path` to stop.
///
/// An unreachable service is logged and reported as a transport error.
pub async fn stop_service(path: impl AsRef<Path>) -> Result<()> {
    let result = async {
        let mut client = IpcClient::connect(path.as_ref()).await?;
        client.stop().await
    }
    .await;

    if let Err(e) = &result {
        error!(error = %e, "Cannot stop proxy group manager service");
    }
    result
}
