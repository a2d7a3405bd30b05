use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::models::booking::{BookingRow, BookingStatus};
use crate::models::driver::DriverRow;
use crate::source::{FeedEvent, GeoSource, SourceError, Subscription, SubscriptionId};

/// In-process [`GeoSource`] applying the same filters as the hosted backend.
/// Driver mutations are pushed to subscribers as change events; failures,
/// latency and transport drops can be injected.
pub struct MemorySource {
    drivers: DashMap<String, DriverRow>,
    bookings: DashMap<String, BookingRow>,
    subscribers: DashMap<SubscriptionId, mpsc::Sender<FeedEvent>>,
    feed_buffer_size: usize,
    drivers_failing: AtomicBool,
    bookings_failing: AtomicBool,
    refuse_subscriptions: AtomicBool,
    auto_confirm: AtomicBool,
    fetch_delay_ms: AtomicU64,
    driver_fetches: AtomicUsize,
    booking_fetches: AtomicUsize,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self::with_feed_buffer(64)
    }

    pub fn with_feed_buffer(feed_buffer_size: usize) -> Self {
        Self {
            drivers: DashMap::new(),
            bookings: DashMap::new(),
            subscribers: DashMap::new(),
            feed_buffer_size: feed_buffer_size.max(1),
            drivers_failing: AtomicBool::new(false),
            bookings_failing: AtomicBool::new(false),
            refuse_subscriptions: AtomicBool::new(false),
            auto_confirm: AtomicBool::new(true),
            fetch_delay_ms: AtomicU64::new(0),
            driver_fetches: AtomicUsize::new(0),
            booking_fetches: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Inserts or replaces a driver row and notifies subscribers. Rows
    /// without an id are stored under a generated key.
    pub fn upsert_driver(&self, row: DriverRow) {
        let key = row
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.drivers.insert(key, row);
        self.notify_driver_change();
    }

    pub fn remove_driver(&self, id: &str) {
        if self.drivers.remove(id).is_some() {
            self.notify_driver_change();
        }
    }

    /// Bookings are not on the watched table, so this does not notify.
    pub fn upsert_booking(&self, row: BookingRow) {
        let key = row
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.bookings.insert(key, row);
    }

    pub fn remove_booking(&self, id: &str) {
        self.bookings.remove(id);
    }

    pub fn notify_driver_change(&self) {
        for entry in self.subscribers.iter() {
            // A full buffer already guarantees a pending refresh.
            let _ = entry.value().try_send(FeedEvent::Changed);
        }
    }

    /// Confirms every open registration (used when auto-confirm is off).
    pub fn confirm_subscriptions(&self) {
        for entry in self.subscribers.iter() {
            let _ = entry.value().try_send(FeedEvent::Confirmed);
        }
    }

    /// Simulates a transport failure on every open registration.
    pub fn drop_subscriptions(&self, reason: &str) {
        let ids: Vec<SubscriptionId> = self.subscribers.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.subscribers.remove(&id) {
                let _ = tx.try_send(FeedEvent::Dropped(reason.to_string()));
            }
        }
    }

    pub fn set_drivers_failing(&self, failing: bool) {
        self.drivers_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_bookings_failing(&self, failing: bool) {
        self.bookings_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_refuse_subscriptions(&self, refuse: bool) {
        self.refuse_subscriptions.store(refuse, Ordering::SeqCst);
    }

    pub fn set_auto_confirm(&self, auto_confirm: bool) {
        self.auto_confirm.store(auto_confirm, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn driver_fetches(&self) -> usize {
        self.driver_fetches.load(Ordering::SeqCst)
    }

    pub fn booking_fetches(&self) -> usize {
        self.booking_fetches.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscribers.len()
    }

    fn online_driver_rows(&self) -> Vec<DriverRow> {
        let mut rows: Vec<(String, DriverRow)> = self
            .drivers
            .iter()
            .filter(|e| e.value().is_online == Some(true) && e.value().current_location.is_some())
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        rows.into_iter().map(|(_, row)| row).collect()
    }

    fn unassigned_booking_rows(&self) -> Vec<BookingRow> {
        let unassigned = |status: &Option<String>| {
            status.as_deref().is_some_and(|s| {
                BookingStatus::UNASSIGNED
                    .iter()
                    .any(|candidate| candidate.as_str() == s)
            })
        };

        let mut rows: Vec<(String, BookingRow)> = self
            .bookings
            .iter()
            .filter(|e| unassigned(&e.value().status))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        rows.into_iter().map(|(_, row)| row).collect()
    }

    async fn simulate_latency(&self) {
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl GeoSource for MemorySource {
    /// Rows are read when the call is made; the configured fetch delay only
    /// holds back the reply, like a slow backend response.
    async fn list_online_drivers(&self) -> Result<Vec<DriverRow>, SourceError> {
        self.driver_fetches.fetch_add(1, Ordering::SeqCst);

        let result = if self.drivers_failing.load(Ordering::SeqCst) {
            Err(SourceError::Unavailable("drivers query failed".to_string()))
        } else {
            Ok(self.online_driver_rows())
        };

        self.simulate_latency().await;
        result
    }

    async fn list_unassigned_bookings(&self) -> Result<Vec<BookingRow>, SourceError> {
        self.booking_fetches.fetch_add(1, Ordering::SeqCst);

        let result = if self.bookings_failing.load(Ordering::SeqCst) {
            Err(SourceError::Unavailable("bookings query failed".to_string()))
        } else {
            Ok(self.unassigned_booking_rows())
        };

        self.simulate_latency().await;
        result
    }

    async fn subscribe_to_driver_changes(&self) -> Result<Subscription, SourceError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        if self.refuse_subscriptions.load(Ordering::SeqCst) {
            return Err(SourceError::Transport(
                "realtime endpoint refused the connection".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.feed_buffer_size);
        if self.auto_confirm.load(Ordering::SeqCst) {
            let _ = tx.try_send(FeedEvent::Confirmed);
        }

        let id = SubscriptionId::new();
        self.subscribers.insert(id, tx);
        debug!(subscription_id = %id, "memory subscription opened");

        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if self.subscribers.remove(&id).is_some() {
            self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
            debug!(subscription_id = %id, "memory subscription released");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::MemorySource;
    use crate::models::booking::BookingRow;
    use crate::models::driver::DriverRow;
    use crate::source::{FeedEvent, GeoSource};

    fn driver_row(id: &str, online: bool, located: bool) -> DriverRow {
        let mut value = json!({
            "id": id,
            "is_online": online,
            "status": "approved",
            "rating": 4.0
        });
        if located {
            value["current_location"] = json!({ "coordinates": [-122.4, 37.7] });
        }
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn applies_backend_filters() {
        let source = MemorySource::new();
        source.upsert_driver(driver_row("a", true, true));
        source.upsert_driver(driver_row("b", false, true));
        source.upsert_driver(driver_row("c", true, false));
        source.upsert_booking(BookingRow {
            id: Some("x".to_string()),
            status: Some("requested".to_string()),
            ..Default::default()
        });
        source.upsert_booking(BookingRow {
            id: Some("y".to_string()),
            status: Some("completed".to_string()),
            ..Default::default()
        });

        let drivers = source.list_online_drivers().await.unwrap();
        let bookings = source.list_unassigned_bookings().await.unwrap();

        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].id.as_deref(), Some("a"));
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].id.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn driver_mutation_reaches_subscribers() {
        let source = MemorySource::new();
        let mut sub = source.subscribe_to_driver_changes().await.unwrap();

        assert_eq!(sub.events.recv().await, Some(FeedEvent::Confirmed));
        source.upsert_driver(driver_row("a", true, true));
        assert_eq!(sub.events.recv().await, Some(FeedEvent::Changed));

        source.unsubscribe(sub.id).await;
        source.unsubscribe(sub.id).await;
        assert_eq!(source.unsubscribe_calls(), 1);
        assert_eq!(sub.events.recv().await, None);
    }
}
