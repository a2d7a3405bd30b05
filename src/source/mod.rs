//! The data-access collaborator the console reads from.
//!
//! Everything the dispatch view knows about drivers and bookings comes
//! through [`GeoSource`]. Implementations return raw rows; validation into
//! domain types happens in the snapshot store so malformed rows are counted
//! in one place.

pub mod memory;
pub mod realtime;
pub mod rest;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::booking::BookingRow;
use crate::models::driver::DriverRow;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}")]
    Status { endpoint: String, status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The backend accepted the registration.
    Confirmed,
    /// Some row in the watched table changed.
    Changed,
    /// The transport went away. No further events follow.
    Dropped(String),
}

/// One registration on the driver change feed. A closed `events` channel
/// means the same as [`FeedEvent::Dropped`].
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::Receiver<FeedEvent>,
}

#[async_trait]
pub trait GeoSource: Send + Sync {
    /// Online drivers that have reported a location.
    async fn list_online_drivers(&self) -> Result<Vec<DriverRow>, SourceError>;

    /// Bookings in `requested` or `searching`.
    async fn list_unassigned_bookings(&self) -> Result<Vec<BookingRow>, SourceError>;

    async fn subscribe_to_driver_changes(&self) -> Result<Subscription, SourceError>;

    /// Releases a registration. Unknown or already released ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId);
}
