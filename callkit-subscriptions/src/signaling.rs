//! Boundary to the SFU signaling service
//!
//! The engine never writes raw wire messages. It hands the complete desired
//! subscription set to a [`SignalingService`] which owns the transport.

use crate::error::Result;
use crate::types::{SessionId, TrackSubscription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Desired-state subscription update for the local participant
///
/// `tracks` lists every track the client wants to receive after the update,
/// so requests may be reordered or retried without drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSubscriptionsRequest {
    /// Session id of the local participant's transport
    pub session_id: SessionId,
    pub tracks: Vec<TrackSubscription>,
}

/// SFU response to a subscription update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSubscriptionsResponse {
    pub error: Option<String>,
}

#[async_trait]
pub trait SignalingService: Send + Sync {
    /// Send a subscription update to the SFU
    ///
    /// Transport failures are returned as `Err`; a rejection by the SFU is
    /// reported through [`UpdateSubscriptionsResponse::error`].
    async fn update_subscriptions(
        &self,
        request: UpdateSubscriptionsRequest,
    ) -> Result<UpdateSubscriptionsResponse>;
}
