use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::models::snapshot::DerivedStats;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub refreshes_total: IntCounterVec,
    pub refresh_latency_seconds: HistogramVec,
    pub malformed_rows_total: IntCounterVec,
    pub subscription_events_total: IntCounterVec,
    pub listener_state: IntGauge,
    pub online_drivers: IntGauge,
    pub available_drivers: IntGauge,
    pub unassigned_bookings: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let refreshes_total = IntCounterVec::new(
            Opts::new("refreshes_total", "Snapshot refreshes by outcome"),
            &["outcome"],
        )
        .expect("valid refreshes_total metric");

        let refresh_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "refresh_latency_seconds",
                "Latency of the paired driver and booking fetch in seconds",
            ),
            &["outcome"],
        )
        .expect("valid refresh_latency_seconds metric");

        let malformed_rows_total = IntCounterVec::new(
            Opts::new("malformed_rows_total", "Rows skipped during refresh"),
            &["entity"],
        )
        .expect("valid malformed_rows_total metric");

        let subscription_events_total = IntCounterVec::new(
            Opts::new(
                "subscription_events_total",
                "Driver change feed lifecycle events",
            ),
            &["event"],
        )
        .expect("valid subscription_events_total metric");

        let listener_state = IntGauge::new(
            "listener_state",
            "Change listener state (0 detached, 1 subscribing, 2 active)",
        )
        .expect("valid listener_state metric");

        let online_drivers = IntGauge::new("online_drivers", "Online drivers in the current snapshot")
            .expect("valid online_drivers metric");

        let available_drivers = IntGauge::new(
            "available_drivers",
            "Approved and online drivers in the current snapshot",
        )
        .expect("valid available_drivers metric");

        let unassigned_bookings = IntGauge::new(
            "unassigned_bookings",
            "Bookings waiting for a driver in the current snapshot",
        )
        .expect("valid unassigned_bookings metric");

        registry
            .register(Box::new(refreshes_total.clone()))
            .expect("register refreshes_total");
        registry
            .register(Box::new(refresh_latency_seconds.clone()))
            .expect("register refresh_latency_seconds");
        registry
            .register(Box::new(malformed_rows_total.clone()))
            .expect("register malformed_rows_total");
        registry
            .register(Box::new(subscription_events_total.clone()))
            .expect("register subscription_events_total");
        registry
            .register(Box::new(listener_state.clone()))
            .expect("register listener_state");
        registry
            .register(Box::new(online_drivers.clone()))
            .expect("register online_drivers");
        registry
            .register(Box::new(available_drivers.clone()))
            .expect("register available_drivers");
        registry
            .register(Box::new(unassigned_bookings.clone()))
            .expect("register unassigned_bookings");

        Self {
            registry,
            refreshes_total,
            refresh_latency_seconds,
            malformed_rows_total,
            subscription_events_total,
            listener_state,
            online_drivers,
            available_drivers,
            unassigned_bookings,
        }
    }

    pub fn record_stats(&self, stats: &DerivedStats) {
        self.online_drivers.set(stats.online_count as i64);
        self.available_drivers.set(stats.available_count as i64);
        self.unassigned_bookings.set(stats.unassigned_count as i64);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
