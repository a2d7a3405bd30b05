use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ConsoleSettings;
use crate::error::SyncError;
use crate::models::marker::{MapView, Marker};
use crate::models::snapshot::{DerivedStats, Snapshot};
use crate::observability::metrics::Metrics;
use crate::projection::{project_map_view, project_to_markers};
use crate::source::GeoSource;
use crate::sync::listener::{ChangeListener, ListenerConfig, ListenerHandle, ListenerState};
use crate::sync::store::{RefreshHealth, RefreshOutcome, SnapshotStore};

impl From<&ConsoleSettings> for ListenerConfig {
    fn from(settings: &ConsoleSettings) -> Self {
        Self {
            debounce: settings.debounce,
            debounce_max_wait: settings.debounce_max_wait,
            reconnect_initial: settings.reconnect_initial,
            reconnect_max: settings.reconnect_max,
            confirm_timeout: settings.confirm_timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleStatus {
    pub listener: ListenerState,
    pub stale: bool,
    pub stats: DerivedStats,
    #[serde(flatten)]
    pub health: RefreshHealth,
}

/// The live dispatch view: one snapshot store kept current by one change
/// listener, projected onto map markers on demand.
pub struct DispatchConsole {
    store: Arc<SnapshotStore>,
    listener: ListenerHandle,
    settings: ConsoleSettings,
}

impl DispatchConsole {
    /// Subscribes to driver changes and loads the first snapshot. A failing
    /// first load is reported through [`DispatchConsole::health`].
    pub async fn mount(
        source: Arc<dyn GeoSource>,
        settings: ConsoleSettings,
        metrics: Metrics,
    ) -> Self {
        let store = Arc::new(SnapshotStore::new(source.clone(), metrics.clone()));
        let listener = ChangeListener::attach(
            source,
            store.clone(),
            ListenerConfig::from(&settings),
            metrics,
        );

        if let Err(err) = store.refresh().await {
            warn!(error = %err, "initial snapshot load failed");
        }
        info!("dispatch console mounted");

        Self {
            store,
            listener,
            settings,
        }
    }

    pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        self.store.refresh().await
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    pub fn stats(&self) -> DerivedStats {
        self.store.stats()
    }

    pub fn markers(&self) -> Vec<Marker> {
        project_to_markers(&self.store.snapshot())
    }

    pub fn map_view(&self) -> MapView {
        self.project(&self.store.snapshot())
    }

    /// Projects a given snapshot with this console's map settings.
    pub fn project(&self, snapshot: &Snapshot) -> MapView {
        project_map_view(snapshot, self.settings.map_center, self.settings.map_zoom)
    }

    pub fn health(&self) -> RefreshHealth {
        self.store.health()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn watch_listener(&self) -> watch::Receiver<ListenerState> {
        self.listener.watch_state()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.store.subscribe_snapshots()
    }

    pub fn is_mounted(&self) -> bool {
        !self.store.is_closed()
    }

    pub fn status(&self, now: DateTime<Utc>) -> ConsoleStatus {
        let health = self.store.health();

        ConsoleStatus {
            listener: self.listener.state(),
            stale: health.is_stale(now, self.settings.stale_after),
            stats: self.store.stats(),
            health,
        }
    }

    /// Releases the change feed and closes the store. Safe to call twice.
    pub async fn unmount(&self) {
        self.store.close();
        self.listener.detach().await;
    }
}
