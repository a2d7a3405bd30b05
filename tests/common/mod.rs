#![allow(dead_code)]
use std::time::Duration;

use dispatch_console::config::ConsoleSettings;
use dispatch_console::models::booking::BookingRow;
use dispatch_console::models::driver::DriverRow;
use dispatch_console::sync::listener::ListenerConfig;
use serde_json::json;

pub const DRIVER_A: &str = "00000000-0000-0000-0000-00000000000a";
pub const DRIVER_B: &str = "00000000-0000-0000-0000-00000000000b";
pub const BOOKING_X: &str = "00000000-0000-0000-0000-0000000000f1";
pub const BOOKING_Y: &str = "00000000-0000-0000-0000-0000000000f2";

pub fn driver_row(id: &str, status: &str, lng_lat: Option<[f64; 2]>) -> DriverRow {
    let location = match lng_lat {
        Some([lng, lat]) => json!({ "type": "Point", "coordinates": [lng, lat] }),
        None => json!({ "type": "Point", "coordinates": null }),
    };

    serde_json::from_value(json!({
        "id": id,
        "is_online": true,
        "status": status,
        "rating": 4.7,
        "current_location": location,
        "profiles": { "email": format!("{id}@example.com"), "full_name": "Test Driver" }
    }))
    .unwrap()
}

pub fn booking_row(id: &str, status: &str, address: Option<&str>) -> BookingRow {
    BookingRow {
        id: Some(id.to_string()),
        status: Some(status.to_string()),
        pickup_lat: Some(37.7793),
        pickup_lng: Some(-122.4193),
        pickup_address: address.map(str::to_string),
    }
}

pub fn fast_settings() -> ConsoleSettings {
    ConsoleSettings {
        debounce: Duration::from_millis(150),
        debounce_max_wait: Duration::from_millis(1000),
        reconnect_initial: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
        confirm_timeout: Duration::from_millis(500),
        ..ConsoleSettings::default()
    }
}

pub fn fast_listener_config() -> ListenerConfig {
    ListenerConfig::from(&fast_settings())
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
