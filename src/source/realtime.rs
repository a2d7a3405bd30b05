//! Driver change feed over the backend's Phoenix-channel websocket.
//!
//! One task per subscription: connect, join the `postgres_changes` channel
//! for the drivers table, forward changes, heartbeat. Any transport problem
//! ends the task with a single [`FeedEvent::Dropped`]; reconnecting is the
//! listener's job.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::source::{FeedEvent, SourceError};

pub const DRIVER_CHANNEL_TOPIC: &str = "realtime:drivers-changes";
const PHOENIX_TOPIC: &str = "phoenix";
const PROTOCOL_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn join(topic: &str, table: &str, access_token: Option<&str>, msg_ref: &str) -> Self {
        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table }
                ]
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }

        Self {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload,
            msg_ref: Some(msg_ref.to_string()),
            join_ref: Some(msg_ref.to_string()),
        }
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    pub fn leave(topic: &str, msg_ref: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Joined,
    Change,
    HeartbeatAck(String),
    Closed(String),
    Ignored,
}

pub fn classify(message: &PhoenixMessage, topic: &str, join_ref: &str) -> Inbound {
    if message.topic == PHOENIX_TOPIC {
        return match (message.event.as_str(), &message.msg_ref) {
            ("phx_reply", Some(msg_ref)) => Inbound::HeartbeatAck(msg_ref.clone()),
            _ => Inbound::Ignored,
        };
    }

    if message.topic != topic {
        return Inbound::Ignored;
    }

    match message.event.as_str() {
        "phx_reply" if message.msg_ref.as_deref() == Some(join_ref) => {
            match message.reply_status() {
                Some("ok") => Inbound::Joined,
                _ => Inbound::Closed(format!(
                    "join rejected: {}",
                    message.payload.get("response").unwrap_or(&Value::Null)
                )),
            }
        }
        "postgres_changes" => Inbound::Change,
        "phx_error" => Inbound::Closed("channel errored".to_string()),
        "phx_close" => Inbound::Closed("channel closed by server".to_string()),
        "system" if message.reply_status() == Some("error") => Inbound::Closed(format!(
            "system error: {}",
            message
                .payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
        )),
        _ => Inbound::Ignored,
    }
}

/// Derives the websocket endpoint from the backend's HTTP base url.
pub fn realtime_url(base_url: &str, api_key: &str) -> Result<String, SourceError> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|err| SourceError::Transport(format!("invalid backend url {base_url}: {err}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SourceError::Transport(format!(
                "unsupported backend url scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SourceError::Transport(format!("cannot use {scheme} for {base_url}")))?;

    let path = format!("{}/realtime/v1/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VERSION);

    Ok(url.to_string())
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub url: String,
    pub topic: String,
    pub table: String,
    pub access_token: Option<String>,
    pub heartbeat_interval: Duration,
}

#[derive(Default)]
struct RefCounter(u64);

impl RefCounter {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

/// Runs one subscription until it is released (`shutdown` flips or its
/// sender goes away) or the transport fails.
pub async fn run_feed(
    settings: FeedSettings,
    events: mpsc::Sender<FeedEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    match drive(&settings, &events, &mut shutdown).await {
        Ok(()) => debug!(topic = %settings.topic, "realtime feed released"),
        Err(reason) => {
            warn!(topic = %settings.topic, reason = %reason, "realtime feed dropped");
            let _ = events.send(FeedEvent::Dropped(reason)).await;
        }
    }
}

async fn drive(
    settings: &FeedSettings,
    events: &mpsc::Sender<FeedEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), String> {
    if *shutdown.borrow() {
        return Ok(());
    }

    let (socket, _) = tokio::select! {
        result = tokio_tungstenite::connect_async(settings.url.as_str()) => {
            result.map_err(|err| format!("connect failed: {err}"))?
        }
        _ = shutdown.changed() => return Ok(()),
    };
    let (mut sink, mut stream) = socket.split();
    let mut refs = RefCounter::default();

    let join_ref = refs.next();
    let join = PhoenixMessage::join(
        &settings.topic,
        &settings.table,
        settings.access_token.as_deref(),
        &join_ref,
    );
    sink.send(encode(&join)?)
        .await
        .map_err(|err| format!("join send failed: {err}"))?;

    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut pending_heartbeat: Option<String> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(encode(&PhoenixMessage::leave(&settings.topic, &refs.next()))?).await;
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                if let Some(unanswered) = &pending_heartbeat {
                    return Err(format!("heartbeat {unanswered} went unanswered"));
                }
                let msg_ref = refs.next();
                sink.send(encode(&PhoenixMessage::heartbeat(&msg_ref))?)
                    .await
                    .map_err(|err| format!("heartbeat send failed: {err}"))?;
                pending_heartbeat = Some(msg_ref);
            }
            frame = stream.next() => {
                let text = match frame {
                    None => return Err("socket closed".to_string()),
                    Some(Err(err)) => return Err(format!("socket error: {err}")),
                    Some(Ok(Message::Close(_))) => return Err("server closed the socket".to_string()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };

                let message: PhoenixMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(err) => {
                        debug!(error = %err, "ignoring undecodable realtime frame");
                        continue;
                    }
                };

                match classify(&message, &settings.topic, &join_ref) {
                    Inbound::Joined => {
                        info!(topic = %settings.topic, "realtime channel joined");
                        if events.send(FeedEvent::Confirmed).await.is_err() {
                            return Ok(());
                        }
                    }
                    Inbound::Change => {
                        if let Err(mpsc::error::TrySendError::Closed(_)) =
                            events.try_send(FeedEvent::Changed)
                        {
                            return Ok(());
                        }
                    }
                    Inbound::HeartbeatAck(msg_ref) => {
                        if pending_heartbeat.as_deref() == Some(msg_ref.as_str()) {
                            pending_heartbeat = None;
                        }
                    }
                    Inbound::Closed(reason) => return Err(reason),
                    Inbound::Ignored => {}
                }
            }
        }
    }
}

fn encode(message: &PhoenixMessage) -> Result<Message, String> {
    serde_json::to_string(message)
        .map(Message::Text)
        .map_err(|err| format!("failed to encode {}: {err}", message.event))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{classify, realtime_url, Inbound, PhoenixMessage, DRIVER_CHANNEL_TOPIC};

    fn inbound(value: serde_json::Value) -> PhoenixMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn join_subscribes_to_every_driver_change() {
        let join = PhoenixMessage::join(DRIVER_CHANNEL_TOPIC, "drivers", Some("jwt"), "1");
        let value = serde_json::to_value(&join).unwrap();

        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "1");
        assert_eq!(value["join_ref"], "1");
        assert_eq!(value["payload"]["access_token"], "jwt");
        assert_eq!(
            value["payload"]["config"]["postgres_changes"][0],
            json!({ "event": "*", "schema": "public", "table": "drivers" })
        );
    }

    #[test]
    fn ok_reply_to_join_confirms() {
        let reply = inbound(json!({
            "topic": DRIVER_CHANNEL_TOPIC,
            "event": "phx_reply",
            "payload": { "status": "ok", "response": { "postgres_changes": [] } },
            "ref": "1"
        }));
        assert_eq!(classify(&reply, DRIVER_CHANNEL_TOPIC, "1"), Inbound::Joined);
    }

    #[test]
    fn error_reply_to_join_closes() {
        let reply = inbound(json!({
            "topic": DRIVER_CHANNEL_TOPIC,
            "event": "phx_reply",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } },
            "ref": "1"
        }));
        assert!(matches!(
            classify(&reply, DRIVER_CHANNEL_TOPIC, "1"),
            Inbound::Closed(reason) if reason.contains("unauthorized")
        ));
    }

    #[test]
    fn postgres_change_and_heartbeat_reply() {
        let change = inbound(json!({
            "topic": DRIVER_CHANNEL_TOPIC,
            "event": "postgres_changes",
            "payload": { "data": { "type": "UPDATE", "table": "drivers" } },
            "ref": null
        }));
        assert_eq!(classify(&change, DRIVER_CHANNEL_TOPIC, "1"), Inbound::Change);

        let ack = inbound(json!({
            "topic": "phoenix",
            "event": "phx_reply",
            "payload": { "status": "ok", "response": {} },
            "ref": "7"
        }));
        assert_eq!(
            classify(&ack, DRIVER_CHANNEL_TOPIC, "1"),
            Inbound::HeartbeatAck("7".to_string())
        );
    }

    #[test]
    fn other_topics_are_ignored() {
        let other = inbound(json!({
            "topic": "realtime:bookings",
            "event": "phx_close",
            "payload": {}
        }));
        assert_eq!(classify(&other, DRIVER_CHANNEL_TOPIC, "1"), Inbound::Ignored);
    }

    #[test]
    fn websocket_url_follows_http_scheme() {
        let url = realtime_url("https://abc.example.co/", "anon").unwrap();
        assert_eq!(
            url,
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let local = realtime_url("http://127.0.0.1:54321", "anon").unwrap();
        assert!(local.starts_with("ws://127.0.0.1:54321/realtime/v1/websocket?"));

        assert!(realtime_url("ftp://example.com", "anon").is_err());
    }
}
