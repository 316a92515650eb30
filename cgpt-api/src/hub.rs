//! Broadcast hub for live viewers
//!
//! Each connected viewer (WebSocket or SSE) owns a bounded channel registered
//! with the hub. A single broadcaster task ([`run_broadcaster`]) drains the
//! state store's snapshot channel and fans every snapshot out with
//! `try_send`, so one slow viewer can never stall the others:
//! - closed channel: the viewer is gone and is unsubscribed
//! - full channel: this message is dropped for that viewer only
//!
//! Delivery is best-effort; viewers always receive full snapshots, so a
//! dropped message is repaired by the next one.

use cgpt_common::AnalysisState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::SnapshotReceiver;

/// Message delivered to one viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerMessage {
    /// Full serialized [`AnalysisState`]
    Snapshot(Arc<str>),
    /// Keep-alive after an idle interval
    Heartbeat,
}

/// Broadcast failures
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The broadcaster task is no longer draining snapshots
    #[error("Broadcast channel closed")]
    ChannelClosed,

    /// A snapshot could not be serialized
    #[error("Snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Viewers whose buffer was full; they miss this message
    pub dropped: usize,
    /// Viewers unsubscribed because their channel was closed
    pub removed: usize,
}

/// Registered viewer handle; hold it for the connection lifetime
pub struct ViewerSubscription {
    pub id: Uuid,
    pub rx: mpsc::Receiver<ViewerMessage>,
}

struct HubInner {
    viewers: HashMap<Uuid, mpsc::Sender<ViewerMessage>>,
    /// Last snapshot fanned out; pushed to every new viewer
    latest: Option<Arc<str>>,
}

/// Set of live viewers
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<RwLock<HubInner>>,
    buffer: usize,
}

impl BroadcastHub {
    /// Create a hub whose viewers buffer up to `buffer` messages each
    pub fn new(buffer: usize) -> Self {
        Self::with_initial(buffer, None)
    }

    /// Hub that hands `initial` to viewers joining before the first publish
    pub fn with_initial(buffer: usize, initial: Option<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HubInner {
                viewers: HashMap::new(),
                latest: initial,
            })),
            buffer: buffer.max(1),
        }
    }

    /// Register a viewer and queue the current snapshot for it
    pub async fn subscribe(&self) -> ViewerSubscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();

        let mut inner = self.inner.write().await;
        if let Some(latest) = &inner.latest {
            // Fresh channel with capacity >= 1 cannot be full
            let _ = tx.try_send(ViewerMessage::Snapshot(latest.clone()));
        }
        inner.viewers.insert(id, tx);
        info!(viewer = %id, viewers = inner.viewers.len(), "Viewer subscribed");

        ViewerSubscription { id, rx }
    }

    /// Remove a viewer; unknown ids are ignored
    pub async fn unsubscribe(&self, id: Uuid) {
        let mut inner = self.inner.write().await;
        if inner.viewers.remove(&id).is_some() {
            info!(viewer = %id, viewers = inner.viewers.len(), "Viewer unsubscribed");
        }
    }

    pub async fn viewer_count(&self) -> usize {
        self.inner.read().await.viewers.len()
    }

    /// Fan a serialized snapshot out to every viewer
    pub async fn publish(&self, snapshot: Arc<str>) -> PublishReport {
        // Copy the viewer set; sends happen outside the lock
        let viewers: Vec<(Uuid, mpsc::Sender<ViewerMessage>)> = {
            let mut inner = self.inner.write().await;
            inner.latest = Some(snapshot.clone());
            inner
                .viewers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        self.deliver(viewers, ViewerMessage::Snapshot(snapshot)).await
    }

    /// Send a heartbeat to every viewer
    pub async fn heartbeat(&self) -> PublishReport {
        let viewers: Vec<(Uuid, mpsc::Sender<ViewerMessage>)> = {
            let inner = self.inner.read().await;
            inner
                .viewers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        self.deliver(viewers, ViewerMessage::Heartbeat).await
    }

    async fn deliver(
        &self,
        viewers: Vec<(Uuid, mpsc::Sender<ViewerMessage>)>,
        message: ViewerMessage,
    ) -> PublishReport {
        let mut report = PublishReport::default();
        let mut failed = Vec::new();

        for (id, tx) in viewers {
            match tx.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(viewer = %id, "Viewer buffer full, dropping message");
                    report.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => failed.push(id),
            }
        }

        if !failed.is_empty() {
            let mut inner = self.inner.write().await;
            for id in &failed {
                inner.viewers.remove(id);
                warn!(viewer = %id, "Viewer disconnected, removed from broadcast set");
            }
            report.removed = failed.len();
        }

        report
    }
}

/// Drain the store's snapshot channel and fan snapshots out
///
/// When snapshots pile up only the newest is sent. A heartbeat goes out
/// whenever `heartbeat_interval` passes without an update. Returns once the
/// store (and with it every sender) has been dropped.
pub async fn run_broadcaster(
    mut rx: SnapshotReceiver,
    hub: BroadcastHub,
    heartbeat_interval: Duration,
) {
    info!("Broadcaster started");

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(mut snapshot) = received else {
                    break;
                };
                while let Ok(newer) = rx.try_recv() {
                    snapshot = newer;
                }

                match serialize_snapshot(&snapshot) {
                    Ok(json) => {
                        let report = hub.publish(json).await;
                        debug!(
                            status = ?snapshot.status,
                            progress = snapshot.progress,
                            delivered = report.delivered,
                            dropped = report.dropped,
                            removed = report.removed,
                            "Snapshot broadcast"
                        );
                    }
                    Err(e) => warn!(error = %e, "Skipping snapshot"),
                }
            }

            _ = tokio::time::sleep(heartbeat_interval) => {
                let report = hub.heartbeat().await;
                debug!(delivered = report.delivered, "Heartbeat sent");
            }
        }
    }

    info!("Broadcaster stopped");
}

/// Serialize a snapshot once for all viewers
pub fn serialize_snapshot(state: &AnalysisState) -> Result<Arc<str>, BroadcastError> {
    Ok(Arc::from(serde_json::to_string(state)?))
}
