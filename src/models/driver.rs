use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;
use crate::geo::GeoPoint;

const ENTITY: &str = "driver";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Pending,
    Approved,
    Rejected,
    Suspended,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Pending => "pending",
            DriverStatus::Approved => "approved",
            DriverStatus::Rejected => "rejected",
            DriverStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DriverStatus::Pending),
            "approved" => Ok(DriverStatus::Approved),
            "rejected" => Ok(DriverStatus::Rejected),
            "suspended" => Ok(DriverStatus::Suspended),
            other => Err(format!("unknown driver status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DriverProfile {
    pub email: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Driver {
    pub id: Uuid,
    pub is_online: bool,
    pub status: DriverStatus,
    pub rating: f64,
    pub location: Option<GeoPoint>,
    pub profile: Option<DriverProfile>,
}

impl Driver {
    pub fn is_available(&self) -> bool {
        self.is_online && self.status == DriverStatus::Approved
    }

    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .and_then(|p| p.full_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("Driver")
    }
}

/// GeoJSON point as the backend serializes a driver's `current_location`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LocationRow {
    #[serde(default)]
    pub coordinates: Option<Vec<f64>>,
}

/// A `drivers` row exactly as the backend returns it, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DriverRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub is_online: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub current_location: Option<LocationRow>,
    #[serde(default)]
    pub profiles: Option<DriverProfile>,
}

impl TryFrom<DriverRow> for Driver {
    type Error = SyncError;

    fn try_from(row: DriverRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .as_deref()
            .ok_or_else(|| malformed("missing id"))?
            .parse::<Uuid>()
            .map_err(|err| malformed(format!("invalid id: {err}")))?;

        let is_online = row
            .is_online
            .ok_or_else(|| malformed(format!("driver {id} missing is_online")))?;

        let status = row
            .status
            .as_deref()
            .ok_or_else(|| malformed(format!("driver {id} missing status")))?
            .parse::<DriverStatus>()
            .map_err(|err| malformed(format!("driver {id}: {err}")))?;

        let rating = row.rating.filter(|r| r.is_finite()).unwrap_or(0.0);

        // Absent location is normal (driver has not reported one yet); a
        // present but unusable one is not.
        let location = match row.current_location {
            None => None,
            Some(LocationRow { coordinates: None }) => None,
            Some(LocationRow {
                coordinates: Some(coordinates),
            }) => Some(GeoPoint::from_lng_lat(&coordinates).ok_or_else(|| {
                malformed(format!("driver {id} has invalid coordinates {coordinates:?}"))
            })?),
        };

        Ok(Driver {
            id,
            is_online,
            status,
            rating: rating.clamp(0.0, 5.0),
            location,
            profile: row.profiles,
        })
    }
}

fn malformed(reason: impl Into<String>) -> SyncError {
    SyncError::MalformedEntity {
        entity: ENTITY,
        reason: reason.into(),
    }
}
