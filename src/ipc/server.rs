//! IPC Server
//!
//! Accepts Unix socket connections and feeds every decoded frame into the
//! service inbox with a handle for replying on the same connection.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::protocol::{IpcCodec, IpcMessage};
use crate::service::{ClientHandle, Inbound};

/// Replies queued per connection; a client that lets it fill up is dropped
const REPLY_QUEUE: usize = 16;

/// Unix socket endpoint of the proxy group service
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
    codec: IpcCodec,
}

impl IpcServer {
    /// Bind the socket, replacing a stale socket file left by a previous run.
    ///
    /// Refuses to touch a path that is not a socket, or a socket some other
    /// service still accepts connections on.
    pub fn bind(path: impl AsRef<Path>, max_frame_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(Error::Config(format!(
                    "{} exists and is not a socket",
                    path.display()
                )));
            }
            if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(Error::Transport(format!(
                    "proxy group manager already running at {}",
                    path.display()
                )));
            }
            warn!(path = %path.display(), "Removing stale IPC socket");
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "IPC server listening");

        Ok(Self {
            listener,
            path,
            codec: IpcCodec::new(max_frame_size),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `cancel` fires, then remove the socket file.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn serve(self, inbox: mpsc::Sender<Inbound>, cancel: CancellationToken) -> Result<()> {
        let mut next_client_id = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        next_client_id += 1;
                        debug!(client = next_client_id, "Accepted IPC connection");
                        tokio::spawn(handle_connection(
                            stream,
                            next_client_id,
                            self.codec,
                            inbox.clone(),
                            cancel.child_token(),
                        ));
                    }
                    Err(e) => error!(error = %e, "IPC accept failed"),
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(error = %e, "Cannot remove IPC socket file");
        }
        info!("IPC server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    client_id: u64,
    codec: IpcCodec,
    inbox: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    let (mut sink, mut frames) = Framed::new(stream, codec).split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<IpcMessage>(REPLY_QUEUE);
    let client = ClientHandle::new(client_id, reply_tx, cancel.clone());

    // ends once every clone of the client handle is gone or the connection is closed
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            let reply = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };

            let written = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                written = sink.send(reply) => written,
            };
            if let Err(e) = written {
                warn!(client = client_id, error = %e, "Cannot write IPC reply");
                writer_cancel.cancel();
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = frames.next() => match frame {
                Some(Ok(message)) => {
                    let inbound = Inbound::new(message, Some(client.clone()));
                    let delivered = tokio::select! {
                        _ = cancel.cancelled() => break,
                        delivered = inbox.send(inbound) => delivered,
                    };
                    if delivered.is_err() {
                        debug!(client = client_id, "Service inbox closed");
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(client = client_id, error = %e, "Dropping IPC connection after frame error");
                    cancel.cancel();
                    break;
                }
                None => break,
            },
        }
    }

    // the writer still delivers replies to messages already queued
    drop(client);
    if writer.await.is_err() {
        error!(client = client_id, "IPC reply writer panicked");
    }
    debug!(client = client_id, "IPC connection closed");
}
