use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{Bounds, GeoPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Driver,
    Booking,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircleStyle {
    pub color: String,
    pub fill_opacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Marker {
    pub id: Uuid,
    pub kind: MarkerKind,
    pub position: GeoPoint,
    /// Presence circle radius in meters.
    pub radius_m: f64,
    pub label: String,
    pub status: String,
    /// Driver contact shown in the popup; bookings carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub style: CircleStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapView {
    pub center: GeoPoint,
    pub zoom: u8,
    pub bounds: Option<Bounds>,
    pub markers: Vec<Marker>,
}
