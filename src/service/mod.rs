//! Proxy Group Service
//!
//! A single task owns the inbound queue and dispatches every message to the
//! relocation or sync handler. Each handler runs to completion under the
//! cache lock before the loop looks at the next message or at shutdown.
//!
//! ```text
//!  IpcServer ──▶ inbox ──▶ PgService::run ──┬──▶ relocation::apply_relocations
//!                                           ├──▶ sync::proxy_sync_data ──▶ ClientHandle
//!                                           └──▶ Stop ──▶ STOPPING
//! ```

mod inbox;
pub mod relocation;
pub mod sync;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub use inbox::{ClientHandle, Inbound};
pub use relocation::{apply_relocations, RelocationOutcome};
pub use sync::{proxy_sync_data, proxy_sync_data_within};

use crate::adapters::LoggingEventPublisher;
use crate::cache::PgCache;
use crate::config::ServiceConfig;
use crate::domain::{DomainEvent, EventPublisher, GroupSnapshot, GroupSource};
use crate::error::{Error, Result};
use crate::metrics::PgMetrics;
use crate::protocol::{HostRelocation, IpcMessage, MessageKind, Request, SyncRequest};

/// Service loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopping,
}

/// Proxy group service: cache plus its collaborators.
pub struct PgService {
    cache: Arc<PgCache>,
    config: ServiceConfig,
    metrics: PgMetrics,
    group_source: Option<Arc<dyn GroupSource>>,
    publisher: Arc<dyn EventPublisher>,
}

impl PgService {
    /// Create a service over a shared cache
    pub fn new(cache: Arc<PgCache>, config: ServiceConfig, metrics: PgMetrics) -> Self {
        Self {
            cache,
            config,
            metrics,
            group_source: None,
            publisher: Arc::new(LoggingEventPublisher::new()),
        }
    }

    /// Refresh groups from this source before every relocation batch
    pub fn with_group_source(mut self, source: Arc<dyn GroupSource>) -> Self {
        self.group_source = Some(source);
        self
    }

    /// Publish domain events through this publisher
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn cache(&self) -> &Arc<PgCache> {
        &self.cache
    }

    /// Spawn the service loop on the current runtime.
    pub fn start(self) -> PgServiceHandle {
        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.inbox_capacity);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(inbox_rx, cancel.clone()));

        PgServiceHandle {
            inbox: inbox_tx,
            cancel,
            task,
        }
    }

    /// Run until a stop message, cancellation, or the inbox closing.
    ///
    /// Cancels `cancel` on exit so the transport feeding the inbox winds down
    /// with the loop.
    #[instrument(skip_all)]
    pub async fn run(self, mut inbox: mpsc::Receiver<Inbound>, cancel: CancellationToken) {
        info!(
            poll_timeout = ?self.config.poll_timeout,
            full_resync_interval = ?self.config.full_resync_interval,
            "Starting proxy group service"
        );
        self.metrics.set_revision(self.cache.hpmap_revision());

        let mut state = ServiceState::Running;

        while state == ServiceState::Running {
            let received = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Proxy group service cancelled");
                    break;
                }

                received = tokio::time::timeout(self.config.poll_timeout, inbox.recv()) => received,
            };

            state = match received {
                Err(_) => ServiceState::Running,
                Ok(None) => {
                    debug!("Proxy group service inbox closed");
                    ServiceState::Stopping
                }
                Ok(Some(inbound)) => self.dispatch(inbound).await,
            };
        }

        cancel.cancel();
        self.publish(DomainEvent::ServiceStopped {
            timestamp: Utc::now(),
        })
        .await;

        info!("Proxy group service stopped");
    }

    /// Handle one inbound message; returns the state the loop continues in.
    async fn dispatch(&self, inbound: Inbound) -> ServiceState {
        let Inbound { message, client } = inbound;

        let request = match Request::decode(&message) {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(code = message.code, "Ignoring unsupported message");
                return ServiceState::Running;
            }
            Err(e) => {
                warn!(code = message.code, error = %e, "Rejecting malformed message");
                self.metrics.record_rejected();
                self.publish(DomainEvent::MessageRejected {
                    code: message.code,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                })
                .await;
                return ServiceState::Running;
            }
        };

        match request {
            Request::Relocate(relocations) => self.update_host_groups(&relocations).await,
            Request::Sync(request) => self.send_proxy_sync_data(request, client).await,
            Request::Stop => {
                info!("Stop requested");
                return ServiceState::Stopping;
            }
        }

        ServiceState::Running
    }

    async fn load_snapshot(&self) -> Option<GroupSnapshot> {
        let source = self.group_source.as_ref()?;
        match source.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Cannot load group snapshot, using current groups");
                None
            }
        }
    }

    #[instrument(skip_all, fields(relocations = relocations.len()))]
    async fn update_host_groups(&self, relocations: &[HostRelocation]) {
        let snapshot = self.load_snapshot().await;
        let outcome = apply_relocations(&self.cache, snapshot.as_ref(), relocations);

        self.metrics
            .record_relocation(outcome.changes, outcome.bumped());
        self.metrics.set_revision(outcome.hpmap_revision);

        let mut events = Vec::with_capacity(2);
        if let (true, Some(snapshot)) = (outcome.groups_refreshed, snapshot.as_ref()) {
            events.push(DomainEvent::GroupsRefreshed {
                config_revision: snapshot.revision,
                groups: snapshot.groups.len(),
                hpmap_revision: outcome.hpmap_revision,
                timestamp: Utc::now(),
            });
        }
        events.push(DomainEvent::HostsRelocated {
            relocations: outcome.relocations,
            changes: outcome.changes,
            hpmap_revision: outcome.hpmap_revision,
            timestamp: Utc::now(),
        });

        if let Err(e) = self.publisher.publish_all(events).await {
            warn!(error = %e, "Failed to publish relocation events");
        }
    }

    #[instrument(skip_all, fields(proxy_id = request.proxy_id))]
    async fn send_proxy_sync_data(&self, request: SyncRequest, client: Option<ClientHandle>) {
        let now = Utc::now().timestamp();
        let response = proxy_sync_data_within(
            &self.cache,
            request,
            now,
            self.config.full_resync_secs(),
            self.config.max_partial_hosts(),
        );

        debug!(
            mode = %response.mode(),
            known_revision = request.known_revision,
            hpmap_revision = response.hpmap_revision(),
            deleted = response.deleted_hosts().len(),
            "Prepared proxy sync data"
        );
        self.metrics.record_sync(response.mode());

        match client {
            Some(client) => match response.encode() {
                Ok(payload) => {
                    let reply = IpcMessage::of_kind(MessageKind::SyncResponse, payload);
                    if let Err(e) = client.send(reply) {
                        warn!(client = client.id(), error = %e, "Cannot send proxy sync data");
                    }
                }
                Err(e) => error!(client = client.id(), error = %e, "Cannot encode proxy sync data"),
            },
            None => warn!("Sync request has no client to reply to"),
        }

        self.publish(DomainEvent::ProxySynced {
            proxy_id: request.proxy_id,
            mode: response.mode().to_string(),
            known_revision: request.known_revision,
            hpmap_revision: response.hpmap_revision(),
            deleted_hosts: response.deleted_hosts().len(),
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(error = %e, "Failed to publish domain event");
        }
    }
}

// =============================================================================
// Service Handle
// =============================================================================

/// Handle to a running service loop.
pub struct PgServiceHandle {
    inbox: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PgServiceHandle {
    /// Sender feeding the service inbox (for transports)
    pub fn sender(&self) -> mpsc::Sender<Inbound> {
        self.inbox.clone()
    }

    /// Token cancelled when the service stops, or to make it stop
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue a message for the service
    pub async fn submit(&self, message: IpcMessage, client: Option<ClientHandle>) -> Result<()> {
        self.inbox
            .send(Inbound::new(message, client))
            .await
            .map_err(|_| Error::ServiceStopped)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the loop to exit on its own (stop message or cancellation).
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Proxy group service task failed: {}", e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
