//! Inbound message envelope and per-client reply handle

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::protocol::IpcMessage;

/// A received message together with the connection that sent it.
#[derive(Debug)]
pub struct Inbound {
    pub message: IpcMessage,
    /// Where replies go; `None` for fire-and-forget in-process submissions
    pub client: Option<ClientHandle>,
}

impl Inbound {
    pub fn new(message: IpcMessage, client: Option<ClientHandle>) -> Self {
        Self { message, client }
    }
}

/// Sends framed replies back to one specific client connection.
///
/// Sending never waits: a client whose reply queue is full has stopped
/// reading, so the reply is dropped and its connection is closed.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: u64,
    replies: mpsc::Sender<IpcMessage>,
    connection: CancellationToken,
}

impl ClientHandle {
    /// `connection` is cancelled to close the client's connection.
    pub fn new(id: u64, replies: mpsc::Sender<IpcMessage>, connection: CancellationToken) -> Self {
        Self {
            id,
            replies,
            connection,
        }
    }

    /// In-memory client: the receiver sees every reply sent to the handle.
    pub fn channel(id: u64, capacity: usize) -> (Self, mpsc::Receiver<IpcMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(id, tx, CancellationToken::new()), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection has been closed by either side
    pub fn is_closed(&self) -> bool {
        self.connection.is_cancelled() || self.replies.is_closed()
    }

    pub fn send(&self, message: IpcMessage) -> Result<()> {
        if self.connection.is_cancelled() {
            return Err(Error::Transport(format!("client {} disconnected", self.id)));
        }

        match self.replies.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(client = self.id, "Client is not reading replies, closing connection");
                self.connection.cancel();
                Err(Error::Transport(format!(
                    "client {} reply queue is full",
                    self.id
                )))
            }
            Err(TrySendError::Closed(_)) => {
                Err(Error::Transport(format!("client {} disconnected", self.id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_client_handle_delivers_reply() {
        let (client, mut rx) = ClientHandle::channel(3, 1);
        client.send(IpcMessage::new(3, Bytes::new())).unwrap();

        assert_eq!(client.id(), 3);
        assert_eq!(rx.try_recv().unwrap().code, 3);
    }

    #[test]
    fn test_send_to_closed_client_is_transport_error() {
        let (client, rx) = ClientHandle::channel(4, 1);
        drop(rx);

        let err = client.send(IpcMessage::new(3, Bytes::new())).unwrap_err();
        assert!(err.is_transport());
        assert!(client.is_closed());
    }

    #[test]
    fn test_full_reply_queue_closes_connection() {
        let (tx, mut rx) = mpsc::channel(1);
        let connection = CancellationToken::new();
        let client = ClientHandle::new(5, tx, connection.clone());

        client.send(IpcMessage::new(3, Bytes::new())).unwrap();
        let err = client.send(IpcMessage::new(3, Bytes::new())).unwrap_err();

        assert!(err.is_transport());
        assert!(connection.is_cancelled());
        assert!(client.is_closed());

        // the queued reply is kept, later ones are refused
        assert!(rx.try_recv().is_ok());
        assert!(client.send(IpcMessage::new(3, Bytes::new())).is_err());
    }
}
