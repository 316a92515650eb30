//! Shared analysis state store
//!
//! The single mutable record of the current run. Every mutation happens in
//! one write-lock critical section and hands the resulting snapshot to the
//! broadcaster channel before the lock is released, so the channel sees
//! snapshots in exactly the order merges were applied.

use cgpt_common::{AnalysisState, StateUpdate};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::hub::BroadcastError;

/// Receiving end handed to the broadcaster task
pub type SnapshotReceiver = mpsc::UnboundedReceiver<AnalysisState>;

pub struct StateStore {
    state: RwLock<AnalysisState>,
    publisher: mpsc::UnboundedSender<AnalysisState>,
    max_log_lines: usize,
}

impl StateStore {
    /// Create an idle store and the channel its snapshots are published on
    pub fn new(max_log_lines: usize) -> (Self, SnapshotReceiver) {
        let (publisher, rx) = mpsc::unbounded_channel();
        let store = Self {
            state: RwLock::new(AnalysisState::idle()),
            publisher,
            max_log_lines: max_log_lines.max(1),
        };
        (store, rx)
    }

    /// Apply an update and return the resulting snapshot
    pub async fn merge(&self, update: StateUpdate) -> AnalysisState {
        let mut state = self.state.write().await;
        state.apply(update);
        state.cap_logs(self.max_log_lines);
        let snapshot = state.clone();
        self.publish(snapshot.clone());
        snapshot
    }

    /// Immutable copy of the current state
    pub async fn snapshot(&self) -> AnalysisState {
        self.state.read().await.clone()
    }

    /// Install a fresh starting state unless a run is already active
    ///
    /// Returns the new state, or `None` when the current status is
    /// `starting` or `running`.
    pub async fn begin_run(&self, channel_id: &str) -> Option<AnalysisState> {
        let mut state = self.state.write().await;
        if state.status.is_active() {
            debug!(status = ?state.status, "Refusing to start over an active run");
            return None;
        }
        *state = AnalysisState::starting(channel_id);
        let snapshot = state.clone();
        self.publish(snapshot.clone());
        Some(snapshot)
    }

    /// Restore the idle state; any in-flight child keeps running
    pub async fn reset(&self) -> AnalysisState {
        let mut state = self.state.write().await;
        *state = AnalysisState::idle();
        let snapshot = state.clone();
        self.publish(snapshot.clone());
        snapshot
    }

    /// Called with the write lock held
    fn publish(&self, snapshot: AnalysisState) {
        if self.publisher.send(snapshot).is_err() {
            warn!(error = %BroadcastError::ChannelClosed, "State change not broadcast");
        }
    }
}
