use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::models::booking::{BookingRow, BookingStatus};
use crate::models::driver::DriverRow;
use crate::source::realtime::{self, FeedSettings, DRIVER_CHANNEL_TOPIC};
use crate::source::{GeoSource, SourceError, Subscription, SubscriptionId};

const DRIVERS_TABLE: &str = "drivers";
const BOOKINGS_TABLE: &str = "bookings";
const DRIVER_SELECT: &str = "*,profiles:id(email,full_name)";

/// Hosted backend: PostgREST row queries plus the realtime websocket.
///
/// Cheap to share behind an `Arc`; the inner [`reqwest::Client`] pools
/// connections.
pub struct RestSource {
    client: Client,
    config: BackendConfig,
    realtime_url: String,
    feeds: DashMap<SubscriptionId, watch::Sender<bool>>,
}

impl RestSource {
    pub fn new(config: BackendConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let realtime_url = realtime::realtime_url(&config.url, &config.api_key)?;

        Ok(Self {
            client,
            config,
            realtime_url,
            feeds: DashMap::new(),
        })
    }

    pub fn open_feeds(&self) -> usize {
        self.feeds.len()
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.url.trim_end_matches('/'),
            table
        )
    }

    fn bearer(&self) -> &str {
        self.config
            .access_token
            .as_deref()
            .unwrap_or(self.config.api_key.as_str())
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, SourceError> {
        let resp = self
            .client
            .get(self.table_url(table))
            .query(query)
            .header("apikey", &self.config.api_key)
            .header("Accept", "application/json")
            .bearer_auth(self.bearer())
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SourceError::Status {
                endpoint: format!("GET /rest/v1/{table}"),
                status: resp.status().as_u16(),
            });
        }

        let rows: Vec<T> = resp.json().await?;
        debug!(table, rows = rows.len(), "fetched rows");
        Ok(rows)
    }
}

#[async_trait]
impl GeoSource for RestSource {
    async fn list_online_drivers(&self) -> Result<Vec<DriverRow>, SourceError> {
        self.select(
            DRIVERS_TABLE,
            &[
                ("select", DRIVER_SELECT.to_string()),
                ("is_online", "eq.true".to_string()),
                ("current_location", "not.is.null".to_string()),
                ("order", "id.asc".to_string()),
            ],
        )
        .await
    }

    async fn list_unassigned_bookings(&self) -> Result<Vec<BookingRow>, SourceError> {
        let statuses = BookingStatus::UNASSIGNED
            .iter()
            .map(BookingStatus::as_str)
            .collect::<Vec<_>>()
            .join(",");

        self.select(
            BOOKINGS_TABLE,
            &[
                ("select", "*".to_string()),
                ("status", format!("in.({statuses})")),
                ("order", "id.asc".to_string()),
            ],
        )
        .await
    }

    async fn subscribe_to_driver_changes(&self) -> Result<Subscription, SourceError> {
        let id = SubscriptionId::new();
        let (events_tx, events_rx) = mpsc::channel(self.config.feed_buffer_size.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let settings = FeedSettings {
            url: self.realtime_url.clone(),
            topic: DRIVER_CHANNEL_TOPIC.to_string(),
            table: DRIVERS_TABLE.to_string(),
            access_token: self.config.access_token.clone(),
            heartbeat_interval: self.config.heartbeat_interval,
        };

        self.feeds.insert(id, shutdown_tx);
        tokio::spawn(realtime::run_feed(settings, events_tx, shutdown_rx));
        info!(subscription_id = %id, "driver change feed requested");

        Ok(Subscription {
            id,
            events: events_rx,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((_, shutdown)) = self.feeds.remove(&id) {
            let _ = shutdown.send(true);
            info!(subscription_id = %id, "driver change feed released");
        }
    }
}
