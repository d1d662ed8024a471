//! Subscription manager - composition root for one call session
//!
//! This module provides:
//! - Construction of the store -> debounce -> viewport -> overrides chain
//! - A background worker so render code can report viewports without awaiting
//!   network calls, while updates are still applied in submission order
//! - Local-only teardown when the call ends

use crate::config::SubscriptionConfig;
use crate::debounce::{DebouncePolicy, DebouncedSubscriptions};
use crate::error::Error;
use crate::overrides::ManualOverrides;
use crate::signaling::SignalingService;
use crate::store::SubscriptionStore;
use crate::types::{SessionId, TrackKey, VideoDimension, ViewportId};
use crate::viewport::{ViewportEntry, ViewportSubscriptions};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Command {
    UpdateViewports(Vec<ViewportEntry>),
    RemoveViewport(ViewportId),
    Flush(oneshot::Sender<()>),
}

pub struct SubscriptionManager {
    config: Arc<SubscriptionConfig>,
    engine: Arc<ManualOverrides>,
    commands: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    /// Build the engine for the local participant `local_session_id`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: SubscriptionConfig,
        local_session_id: SessionId,
        signaling: Arc<dyn SignalingService>,
    ) -> Self {
        let policy = DebouncePolicy::from_millis(config.debounce_time_ms);
        let store = Arc::new(SubscriptionStore::new(local_session_id.clone(), signaling));
        let engine = Arc::new(ManualOverrides::new(ViewportSubscriptions::new(
            DebouncedSubscriptions::new(store, policy),
        )));

        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::run(Arc::clone(&engine), receiver));

        info!(
            session_id = %local_session_id,
            debounce_time_ms = config.debounce_time_ms,
            "Subscription manager initialized"
        );

        Self {
            config: Arc::new(config),
            engine,
            commands,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// The decorator chain, for overrides and direct calls
    #[must_use]
    pub fn engine(&self) -> &Arc<ManualOverrides> {
        &self.engine
    }

    #[must_use]
    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Queue a viewport report without waiting for the SFU
    pub fn submit_viewport(
        &self,
        viewport_id: impl Into<ViewportId>,
        key: TrackKey,
        visible: bool,
        dimension: Option<VideoDimension>,
    ) {
        let dimension = dimension.unwrap_or(self.config.default_dimension);
        let entry = ViewportEntry::new(viewport_id, key, visible, dimension);
        self.send(Command::UpdateViewports(vec![entry]));
    }

    /// Queue a whole layout pass, applied with one subscribe round trip
    pub fn submit_viewports(&self, entries: Vec<ViewportEntry>) {
        self.send(Command::UpdateViewports(entries));
    }

    /// Queue the removal of a detached surface
    pub fn submit_viewport_removal(&self, viewport_id: impl Into<ViewportId>) {
        self.send(Command::RemoveViewport(viewport_id.into()));
    }

    /// Wait until every report queued before this call has been applied
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx));
        let _ = rx.await;
    }

    /// End of call: stop the worker, cancel timers and forget all state
    /// without contacting the SFU
    pub fn teardown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        self.engine.clear();
        info!("Subscription manager torn down");
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Subscription manager stopped, dropping command");
        }
    }

    async fn run(engine: Arc<ManualOverrides>, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            let result = match command {
                Command::UpdateViewports(entries) => engine.update_viewports(entries).await,
                Command::RemoveViewport(viewport_id) => engine.remove_viewport(&viewport_id).await,
                Command::Flush(done) => {
                    let _ = done.send(());
                    Ok(())
                }
            };

            match result {
                Ok(()) => {}
                Err(Error::Cancelled(reason)) => {
                    debug!(reason = %reason, "Viewport update dropped");
                }
                Err(e) => warn!(
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to apply viewport update"
                ),
            }
        }
        debug!("Subscription worker stopped");
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}
