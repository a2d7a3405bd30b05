use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::models::booking::{Booking, BookingRow};
use crate::models::driver::{Driver, DriverRow};
use crate::models::snapshot::{DerivedStats, Snapshot};
use crate::observability::metrics::Metrics;
use crate::source::{GeoSource, SourceError};

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct RefreshHealth {
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_refresh_error: Option<String>,
    pub last_skipped_rows: usize,
    pub consecutive_failures: u32,
}

impl RefreshHealth {
    /// A store that never fetched anything is stale.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let Some(refreshed_at) = self.last_refreshed_at else {
            return true;
        };

        chrono::Duration::from_std(threshold)
            .map(|limit| now.signed_duration_since(refreshed_at) > limit)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Committed {
        drivers: usize,
        bookings: usize,
        skipped: usize,
    },
    /// A fetch that started after this request already committed; its
    /// snapshot is the current one.
    Coalesced,
}

/// Bookkeeping guarded by the in-flight lock.
#[derive(Debug, Default)]
struct Flight {
    /// Highest request ticket whose fetch has already started.
    covered: u64,
    last: Option<Result<RefreshOutcome, SyncError>>,
}

/// Holds the current snapshot. Only [`SnapshotStore::refresh`] writes it, and
/// always by replacing it whole.
pub struct SnapshotStore {
    source: Arc<dyn GeoSource>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    health_tx: watch::Sender<RefreshHealth>,
    requests: AtomicU64,
    in_flight: Mutex<Flight>,
    closed: AtomicBool,
    metrics: Metrics,
}

impl SnapshotStore {
    pub fn new(source: Arc<dyn GeoSource>, metrics: Metrics) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::default()));
        let (health_tx, _) = watch::channel(RefreshHealth::default());

        Self {
            source,
            snapshot_tx,
            health_tx,
            requests: AtomicU64::new(0),
            in_flight: Mutex::new(Flight::default()),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn stats(&self) -> DerivedStats {
        self.snapshot().stats()
    }

    pub fn health(&self) -> RefreshHealth {
        self.health_tx.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<RefreshHealth> {
        self.health_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tears the store down. Refreshes still in flight finish without
    /// writing anything.
    pub fn close(&self) {
        // Flipped under the snapshot channel's lock so no commit can sit
        // between its closed check and its write.
        let mut newly_closed = false;
        self.snapshot_tx.send_if_modified(|_| {
            newly_closed = !self.closed.swap(true, Ordering::SeqCst);
            false
        });

        if newly_closed {
            info!("snapshot store closed");
        }
    }

    /// Fetches drivers and bookings concurrently and swaps in a new snapshot
    /// once both arrive. On failure the previous snapshot stays in place.
    ///
    /// Never runs two fetches at once. A request made while a fetch is in
    /// flight waits for it and then runs one follow-up fetch, shared by every
    /// request that queued up meanwhile; those callers get the follow-up's
    /// result, as [`RefreshOutcome::Coalesced`] or its error.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        if self.is_closed() {
            return Err(SyncError::Detached);
        }

        let ticket = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let mut flight = self.in_flight.lock().await;

        if flight.covered >= ticket {
            self.metrics
                .refreshes_total
                .with_label_values(&["coalesced"])
                .inc();
            debug!(ticket, "refresh coalesced into one that started after it");

            if self.is_closed() {
                return Err(SyncError::Detached);
            }
            return match &flight.last {
                Some(Err(err)) => Err(err.clone()),
                _ => Ok(RefreshOutcome::Coalesced),
            };
        }
        flight.covered = self.requests.load(Ordering::SeqCst);

        let start = Instant::now();
        let (drivers, bookings) = tokio::join!(
            self.source.list_online_drivers(),
            self.source.list_unassigned_bookings()
        );
        let result = self.commit(drivers, bookings);

        let outcome = match &result {
            Ok(_) => "committed",
            Err(SyncError::Detached) => "discarded",
            Err(_) => "failed",
        };
        self.metrics
            .refresh_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .refreshes_total
            .with_label_values(&[outcome])
            .inc();

        flight.last = Some(result.clone());
        result
    }

    fn commit(
        &self,
        drivers: Result<Vec<DriverRow>, SourceError>,
        bookings: Result<Vec<BookingRow>, SourceError>,
    ) -> Result<RefreshOutcome, SyncError> {
        if self.is_closed() {
            debug!("discarding refresh that completed after teardown");
            return Err(SyncError::Detached);
        }

        let (driver_rows, booking_rows) = match (drivers, bookings) {
            (Ok(drivers), Ok(bookings)) => (drivers, bookings),
            (Err(err), _) => return Err(self.record_failure(fetch_failure("drivers", err))),
            (_, Err(err)) => return Err(self.record_failure(fetch_failure("bookings", err))),
        };

        let (drivers, bad_drivers) = decode::<_, Driver>(driver_rows, &self.metrics);
        let (bookings, bad_bookings) = decode::<_, Booking>(booking_rows, &self.metrics);
        let skipped = bad_drivers + bad_bookings;

        let snapshot = Arc::new(Snapshot::new(drivers, bookings, Utc::now()));
        let stats = snapshot.stats();
        let fetched_at = snapshot.fetched_at;
        let outcome = RefreshOutcome::Committed {
            drivers: snapshot.drivers.len(),
            bookings: snapshot.bookings.len(),
            skipped,
        };

        let mut published = false;
        self.snapshot_tx.send_if_modified(|current| {
            if self.is_closed() {
                return false;
            }
            *current = snapshot;
            published = true;
            true
        });
        if !published {
            debug!("discarding refresh that completed after teardown");
            return Err(SyncError::Detached);
        }

        self.metrics.record_stats(&stats);
        self.health_tx.send_modify(|health| {
            health.last_refreshed_at = fetched_at;
            health.last_refresh_error = None;
            health.last_skipped_rows = skipped;
            health.consecutive_failures = 0;
        });

        info!(
            online = stats.online_count,
            available = stats.available_count,
            unassigned = stats.unassigned_count,
            skipped,
            "snapshot refreshed"
        );

        Ok(outcome)
    }

    fn record_failure(&self, err: SyncError) -> SyncError {
        warn!(error = %err, "refresh failed; keeping previous snapshot");
        self.health_tx.send_modify(|health| {
            health.last_refresh_error = Some(err.to_string());
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        });
        err
    }
}

fn fetch_failure(entity: &'static str, err: SourceError) -> SyncError {
    SyncError::FetchFailure {
        entity,
        reason: err.to_string(),
    }
}

/// Converts rows, skipping and counting the ones that do not validate.
fn decode<R, T>(rows: Vec<R>, metrics: &Metrics) -> (Vec<T>, usize)
where
    T: TryFrom<R, Error = SyncError>,
{
    let mut items = Vec::with_capacity(rows.len());
    let mut skipped = 0;

    for row in rows {
        match T::try_from(row) {
            Ok(item) => items.push(item),
            Err(err) => {
                skipped += 1;
                let entity = match &err {
                    SyncError::MalformedEntity { entity, .. } => *entity,
                    _ => "unknown",
                };
                metrics
                    .malformed_rows_total
                    .with_label_values(&[entity])
                    .inc();
                warn!(error = %err, "skipping malformed row");
            }
        }
    }

    (items, skipped)
}
