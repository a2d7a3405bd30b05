use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::observability::metrics::Metrics;
use crate::source::{FeedEvent, GeoSource, Subscription};
use crate::sync::store::SnapshotStore;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    Detached,
    Subscribing,
    Active,
}

impl ListenerState {
    fn gauge_value(self) -> i64 {
        match self {
            ListenerState::Detached => 0,
            ListenerState::Subscribing => 1,
            ListenerState::Active => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub debounce: Duration,
    pub debounce_max_wait: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub confirm_timeout: Duration,
}

/// Trailing debounce: fires `window` after the latest event, but never later
/// than `max_wait` after the first event of the burst.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    max_wait: Duration,
    first: Option<Instant>,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration, max_wait: Duration) -> Self {
        Self {
            window,
            max_wait: max_wait.max(window),
            first: None,
            last: None,
        }
    }

    pub fn record(&mut self, at: Instant) {
        self.first.get_or_insert(at);
        self.last = Some(at);
    }

    pub fn deadline(&self) -> Option<Instant> {
        let first = self.first?;
        let last = self.last?;
        Some((last + self.window).min(first + self.max_wait))
    }

    pub fn clear(&mut self) {
        self.first = None;
        self.last = None;
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Owner-side handle of the running listener. Dropping it detaches too.
pub struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ListenerState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    /// Releases the subscription and waits for the task to finish. Calling it
    /// again is a no-op.
    pub async fn detach(&self) {
        let task = self.task.lock().await.take();
        let Some(task) = task else {
            return;
        };

        let _ = self.shutdown.send(true);
        if let Err(err) = task.await {
            warn!(error = %err, "change listener task ended abnormally");
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Keeps one live registration on the driver change feed and turns change
/// events into debounced snapshot refreshes.
pub struct ChangeListener {
    source: Arc<dyn GeoSource>,
    store: Arc<SnapshotStore>,
    config: ListenerConfig,
    metrics: Metrics,
    state_tx: watch::Sender<ListenerState>,
}

enum SessionEnd {
    Shutdown,
    Dropped(SyncError),
}

impl ChangeListener {
    pub fn attach(
        source: Arc<dyn GeoSource>,
        store: Arc<SnapshotStore>,
        config: ListenerConfig,
        metrics: Metrics,
    ) -> ListenerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ListenerState::Detached);

        let listener = ChangeListener {
            source,
            store,
            config,
            metrics,
            state_tx,
        };
        let task = tokio::spawn(listener.run(shutdown_rx));

        ListenerHandle {
            shutdown: shutdown_tx,
            state: state_rx,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.reconnect_initial, self.config.reconnect_max);
        let mut resubscribing = false;

        info!("change listener started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(ListenerState::Subscribing);

            let attempt = tokio::select! {
                result = self.source.subscribe_to_driver_changes() => result,
                _ = shutdown.changed() => break,
            };

            let mut subscription = match attempt {
                Ok(subscription) => subscription,
                Err(err) => {
                    self.count_event("subscribe_failed");
                    let delay = backoff.next_delay();
                    warn!(
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "driver feed subscription failed"
                    );
                    if pause(delay, &mut shutdown).await {
                        break;
                    }
                    resubscribing = true;
                    continue;
                }
            };

            let end = self
                .session(&mut subscription, &mut shutdown, &mut backoff, resubscribing)
                .await;
            self.source.unsubscribe(subscription.id).await;

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Dropped(err) => {
                    self.count_event("dropped");
                    let delay = backoff.next_delay();
                    warn!(
                        subscription_id = %subscription.id,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "driver feed lost; resubscribing"
                    );
                    self.set_state(ListenerState::Subscribing);
                    if pause(delay, &mut shutdown).await {
                        break;
                    }
                    resubscribing = true;
                }
            }
        }

        self.set_state(ListenerState::Detached);
        info!("change listener detached");
    }

    async fn session(
        &self,
        subscription: &mut Subscription,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
        resubscribing: bool,
    ) -> SessionEnd {
        let confirm_by = Instant::now() + self.config.confirm_timeout;

        loop {
            tokio::select! {
                event = subscription.events.recv() => match event {
                    Some(FeedEvent::Confirmed) => break,
                    Some(FeedEvent::Changed) => continue,
                    Some(FeedEvent::Dropped(reason)) => return SessionEnd::Dropped(SyncError::SubscriptionDropped(reason)),
                    None => return SessionEnd::Dropped(SyncError::SubscriptionDropped("feed closed before confirmation".to_string())),
                },
                _ = sleep_until(confirm_by) => {
                    return SessionEnd::Dropped(SyncError::SubscriptionDropped("confirmation timed out".to_string()));
                }
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            }
        }

        self.set_state(ListenerState::Active);
        self.count_event("confirmed");
        backoff.reset();
        info!(subscription_id = %subscription.id, "driver feed active");

        // Changes made while we were disconnected are invisible otherwise.
        if resubscribing {
            self.spawn_refresh("resubscribed");
        }

        let mut debounce = Debounce::new(self.config.debounce, self.config.debounce_max_wait);

        loop {
            let deadline = debounce.deadline();

            tokio::select! {
                event = subscription.events.recv() => match event {
                    Some(FeedEvent::Changed) => debounce.record(Instant::now()),
                    Some(FeedEvent::Confirmed) => {}
                    Some(FeedEvent::Dropped(reason)) => return SessionEnd::Dropped(SyncError::SubscriptionDropped(reason)),
                    None => return SessionEnd::Dropped(SyncError::SubscriptionDropped("feed closed".to_string())),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    debounce.clear();
                    self.spawn_refresh("driver change");
                }
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            }
        }
    }

    fn spawn_refresh(&self, reason: &'static str) {
        let store = self.store.clone();
        debug!(reason, "scheduling snapshot refresh");

        tokio::spawn(async move {
            match store.refresh().await {
                Ok(outcome) => debug!(reason, ?outcome, "triggered refresh finished"),
                Err(SyncError::Detached) => debug!(reason, "triggered refresh discarded after teardown"),
                Err(err) => warn!(reason, error = %err, "triggered refresh failed"),
            }
        });
    }

    fn set_state(&self, state: ListenerState) {
        self.metrics.listener_state.set(state.gauge_value());
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = ?*current, to = ?state, "listener state change");
            *current = state;
            true
        });
    }

    fn count_event(&self, event: &str) {
        self.metrics
            .subscription_events_total
            .with_label_values(&[event])
            .inc();
    }
}

/// Sleeps for `delay`; returns `true` if shutdown was requested meanwhile.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(delay) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}
