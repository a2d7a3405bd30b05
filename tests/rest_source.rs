mod common;

use std::sync::Arc;
use std::time::Duration;

use dispatch_console::config::BackendConfig;
use dispatch_console::error::SyncError;
use dispatch_console::observability::metrics::Metrics;
use dispatch_console::source::rest::RestSource;
use dispatch_console::source::{FeedEvent, GeoSource, SourceError};
use dispatch_console::sync::store::SnapshotStore;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{BOOKING_X, DRIVER_A};

fn backend(url: &str, access_token: Option<&str>) -> BackendConfig {
    BackendConfig {
        url: url.to_string(),
        api_key: "anon-key".to_string(),
        access_token: access_token.map(str::to_string),
        request_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_secs(30),
        feed_buffer_size: 16,
    }
}

fn driver_json(id: &str) -> Value {
    json!({
        "id": id,
        "is_online": true,
        "status": "approved",
        "rating": 4.9,
        "current_location": { "type": "Point", "coordinates": [-122.4194, 37.7749] },
        "profiles": { "email": "sam@example.com", "full_name": "Sam Lee" }
    })
}

fn booking_json(id: &str) -> Value {
    json!({
        "id": id,
        "status": "searching",
        "pickup_lat": 37.7793,
        "pickup_lng": -122.4193,
        "pickup_address": "1 Market St"
    })
}

#[tokio::test]
async fn drivers_query_filters_online_located_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/drivers"))
        .and(query_param("select", "*,profiles:id(email,full_name)"))
        .and(query_param("is_online", "eq.true"))
        .and(query_param("current_location", "not.is.null"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([driver_json(DRIVER_A)])))
        .expect(1)
        .mount(&server)
        .await;

    let source = RestSource::new(backend(&server.uri(), None)).unwrap();
    let rows = source.list_online_drivers().await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id.as_deref(), Some(DRIVER_A));
}

#[tokio::test]
async fn bookings_query_selects_unassigned_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .and(query_param("status", "in.(requested,searching)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([booking_json(BOOKING_X)])))
        .expect(1)
        .mount(&server)
        .await;

    let source = RestSource::new(backend(&server.uri(), None)).unwrap();
    let rows = source.list_unassigned_bookings().await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].pickup_address.as_deref(), Some("1 Market St"));
}

#[tokio::test]
async fn access_token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer user-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let source = RestSource::new(backend(&server.uri(), Some("user-jwt"))).unwrap();
    let rows = source.list_unassigned_bookings().await.unwrap();

    assert!(rows.is_empty());
}

#[tokio::test]
async fn non_success_status_is_reported_with_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/drivers"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = RestSource::new(backend(&server.uri(), None)).unwrap();
    let err = source.list_online_drivers().await.unwrap_err();

    match err {
        SourceError::Status { endpoint, status } => {
            assert_eq!(endpoint, "GET /rest/v1/drivers");
            assert_eq!(status, 503);
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn store_keeps_nothing_when_one_half_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/drivers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([driver_json(DRIVER_A)])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source = Arc::new(RestSource::new(backend(&server.uri(), None)).unwrap());
    let store = SnapshotStore::new(source, Metrics::new());

    let err = store.refresh().await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::FetchFailure {
            entity: "bookings",
            ..
        }
    ));
    assert!(store.snapshot().drivers.is_empty());
    assert!(store.snapshot().fetched_at.is_none());
}

#[tokio::test]
async fn store_commits_both_halves_from_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/drivers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([driver_json(DRIVER_A)])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([booking_json(BOOKING_X)])))
        .mount(&server)
        .await;

    let source = Arc::new(RestSource::new(backend(&server.uri(), None)).unwrap());
    let store = SnapshotStore::new(source, Metrics::new());
    store.refresh().await.unwrap();

    let stats = store.stats();
    assert_eq!(stats.online_count, 1);
    assert_eq!(stats.available_count, 1);
    assert_eq!(stats.unassigned_count, 1);
    assert_eq!(store.snapshot().drivers[0].display_name(), "Sam Lee");
}

async fn next(events: &mut mpsc::Receiver<FeedEvent>) -> Option<FeedEvent> {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
}

async fn next_phoenix<S>(stream: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("socket ended early: {other:?}"),
        }
    }
}

#[tokio::test]
async fn realtime_feed_confirms_forwards_changes_and_reports_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let (mut sink, mut stream) = ws.split();

        let join = next_phoenix(&mut stream).await;
        assert_eq!(join["event"], "phx_join");
        assert_eq!(join["payload"]["config"]["postgres_changes"][0]["table"], "drivers");

        let topic = join["topic"].as_str().unwrap().to_string();
        let reply = json!({
            "topic": topic,
            "event": "phx_reply",
            "payload": { "status": "ok", "response": {} },
            "ref": join["ref"]
        });
        sink.send(Message::Text(reply.to_string())).await.unwrap();

        let change = json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": { "data": { "type": "UPDATE", "table": "drivers" } },
            "ref": null
        });
        sink.send(Message::Text(change.to_string())).await.unwrap();
        sink.send(Message::Close(None)).await.unwrap();
    });

    let source = RestSource::new(backend(&format!("http://{addr}"), None)).unwrap();
    let mut subscription = source.subscribe_to_driver_changes().await.unwrap();

    assert_eq!(next(&mut subscription.events).await, Some(FeedEvent::Confirmed));
    assert_eq!(next(&mut subscription.events).await, Some(FeedEvent::Changed));
    assert!(matches!(
        next(&mut subscription.events).await,
        Some(FeedEvent::Dropped(_))
    ));

    server.await.unwrap();
    source.unsubscribe(subscription.id).await;
    assert_eq!(source.open_feeds(), 0);
}

#[tokio::test]
async fn unsubscribe_leaves_the_channel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let (mut sink, mut stream) = ws.split();

        let join = next_phoenix(&mut stream).await;
        let reply = json!({
            "topic": join["topic"],
            "event": "phx_reply",
            "payload": { "status": "ok", "response": {} },
            "ref": join["ref"]
        });
        sink.send(Message::Text(reply.to_string())).await.unwrap();

        next_phoenix(&mut stream).await
    });

    let source = RestSource::new(backend(&format!("http://{addr}"), None)).unwrap();
    let mut subscription = source.subscribe_to_driver_changes().await.unwrap();

    assert_eq!(next(&mut subscription.events).await, Some(FeedEvent::Confirmed));
    assert_eq!(source.open_feeds(), 1);

    source.unsubscribe(subscription.id).await;
    source.unsubscribe(subscription.id).await;
    assert_eq!(source.open_feeds(), 0);

    let leave = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leave["event"], "phx_leave");
    assert_eq!(next(&mut subscription.events).await, None);
}
