use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;
use crate::geo::GeoPoint;

const ENTITY: &str = "booking";

/// Only the statuses of bookings still waiting for a driver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Requested,
    Searching,
}

impl BookingStatus {
    pub const UNASSIGNED: [BookingStatus; 2] = [BookingStatus::Requested, BookingStatus::Searching];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "requested",
            BookingStatus::Searching => "searching",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(BookingStatus::Requested),
            "searching" => Ok(BookingStatus::Searching),
            other => Err(format!("booking status {other} is not unassigned")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub status: BookingStatus,
    pub pickup: GeoPoint,
    pub pickup_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BookingRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub pickup_lat: Option<f64>,
    #[serde(default)]
    pub pickup_lng: Option<f64>,
    #[serde(default)]
    pub pickup_address: Option<String>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = SyncError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .as_deref()
            .ok_or_else(|| malformed("missing id"))?
            .parse::<Uuid>()
            .map_err(|err| malformed(format!("invalid id: {err}")))?;

        let status = row
            .status
            .as_deref()
            .ok_or_else(|| malformed(format!("booking {id} missing status")))?
            .parse::<BookingStatus>()
            .map_err(|err| malformed(format!("booking {id}: {err}")))?;

        let (lat, lng) = row
            .pickup_lat
            .zip(row.pickup_lng)
            .ok_or_else(|| malformed(format!("booking {id} has no pickup coordinates")))?;
        let pickup = GeoPoint::new(lat, lng).ok_or_else(|| {
            malformed(format!("booking {id} has invalid pickup coordinates {lat},{lng}"))
        })?;

        let pickup_address = row
            .pickup_address
            .filter(|address| !address.trim().is_empty());

        Ok(Booking {
            id,
            status,
            pickup,
            pickup_address,
        })
    }
}

fn malformed(reason: impl Into<String>) -> SyncError {
    SyncError::MalformedEntity {
        entity: ENTITY,
        reason: reason.into(),
    }
}
