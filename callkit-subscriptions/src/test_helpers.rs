//! Test doubles for the engine's external collaborators
//!
//! A recording SFU signaling peer and a native transceiver whose disposal can
//! be toggled, shared by unit and integration tests.

use crate::error::{Error, Result};
use crate::signaling::{SignalingService, UpdateSubscriptionsRequest, UpdateSubscriptionsResponse};
use crate::transceiver::TransceiverHandle;
use crate::types::TrackKey;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Accept,
    Reject,
    TransportFailure,
}

/// Signaling peer that records every request it receives
#[derive(Debug)]
pub struct RecordingSignaling {
    requests: Mutex<Vec<UpdateSubscriptionsRequest>>,
    outcome: Mutex<(Outcome, String)>,
    latency: Mutex<Option<Duration>>,
}

impl Default for RecordingSignaling {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            outcome: Mutex::new((Outcome::Accept, String::new())),
            latency: Mutex::new(None),
        }
    }
}

impl RecordingSignaling {
    /// Requests received so far, including rejected ones
    #[must_use]
    pub fn requests(&self) -> Vec<UpdateSubscriptionsRequest> {
        self.requests.lock().clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Tracks requested by the most recent update
    #[must_use]
    pub fn last_tracks(&self) -> Option<Vec<TrackKey>> {
        self.requests
            .lock()
            .last()
            .map(|request| request.tracks.iter().map(|track| track.key()).collect())
    }

    /// Answer subsequent requests with an SFU error
    pub fn reject_with(&self, message: &str) {
        *self.outcome.lock() = (Outcome::Reject, message.to_string());
    }

    /// Fail subsequent requests before they reach the SFU
    pub fn fail_transport(&self) {
        *self.outcome.lock() = (Outcome::TransportFailure, "connection reset".to_string());
    }

    pub fn accept(&self) {
        *self.outcome.lock() = (Outcome::Accept, String::new());
    }

    /// Delay every answer, keeping requests in flight
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }
}

#[async_trait]
impl SignalingService for RecordingSignaling {
    async fn update_subscriptions(
        &self,
        request: UpdateSubscriptionsRequest,
    ) -> Result<UpdateSubscriptionsResponse> {
        self.requests.lock().push(request);
        let (outcome, message) = self.outcome.lock().clone();
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match outcome {
            Outcome::Accept => Ok(UpdateSubscriptionsResponse::default()),
            Outcome::Reject => Ok(UpdateSubscriptionsResponse {
                error: Some(message),
            }),
            Outcome::TransportFailure => Err(Error::Transport(message)),
        }
    }
}

/// Native transceiver stand-in whose sender track can be disposed
#[derive(Debug, Clone, Default)]
pub struct FakeTransceiver {
    disposed: Arc<AtomicBool>,
}

impl FakeTransceiver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.disposed, &other.disposed)
    }
}

#[async_trait]
impl TransceiverHandle for FakeTransceiver {
    async fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
