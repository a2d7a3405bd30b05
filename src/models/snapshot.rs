use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::booking::Booking;
use crate::models::driver::Driver;

/// Point-in-time pairing of drivers and unassigned bookings. Replaced
/// wholesale on every refresh, never patched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Snapshot {
    pub drivers: Vec<Driver>,
    pub bookings: Vec<Booking>,
    /// `None` until the first successful fetch.
    pub fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DerivedStats {
    pub online_count: usize,
    pub available_count: usize,
    pub unassigned_count: usize,
}

impl Snapshot {
    pub fn new(drivers: Vec<Driver>, bookings: Vec<Booking>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            drivers,
            bookings,
            fetched_at: Some(fetched_at),
        }
    }

    pub fn stats(&self) -> DerivedStats {
        DerivedStats {
            online_count: self.drivers.iter().filter(|d| d.is_online).count(),
            available_count: self.drivers.iter().filter(|d| d.is_available()).count(),
            unassigned_count: self.bookings.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::Snapshot;
    use crate::geo::GeoPoint;
    use crate::models::booking::{Booking, BookingStatus};
    use crate::models::driver::{Driver, DriverStatus};

    fn driver(seed: u128, is_online: bool, status: DriverStatus) -> Driver {
        Driver {
            id: Uuid::from_u128(seed),
            is_online,
            status,
            rating: 4.5,
            location: Some(GeoPoint {
                lat: 37.77,
                lng: -122.42,
            }),
            profile: None,
        }
    }

    fn booking(seed: u128) -> Booking {
        Booking {
            id: Uuid::from_u128(seed),
            status: BookingStatus::Requested,
            pickup: GeoPoint {
                lat: 37.78,
                lng: -122.41,
            },
            pickup_address: None,
        }
    }

    #[test]
    fn empty_snapshot_has_zero_counts() {
        let stats = Snapshot::default().stats();
        assert_eq!(stats.online_count, 0);
        assert_eq!(stats.available_count, 0);
        assert_eq!(stats.unassigned_count, 0);
    }

    #[test]
    fn available_requires_approval_and_online() {
        let snapshot = Snapshot::new(
            vec![
                driver(1, true, DriverStatus::Approved),
                driver(2, true, DriverStatus::Pending),
                driver(3, false, DriverStatus::Approved),
                driver(4, true, DriverStatus::Suspended),
            ],
            vec![booking(10), booking(11)],
            Utc::now(),
        );

        let stats = snapshot.stats();
        assert_eq!(stats.online_count, 3);
        assert_eq!(stats.available_count, 1);
        assert_eq!(stats.unassigned_count, 2);
    }

    #[test]
    fn counts_hold_across_mixed_snapshots() {
        let statuses = [
            DriverStatus::Pending,
            DriverStatus::Approved,
            DriverStatus::Rejected,
            DriverStatus::Suspended,
        ];

        for size in 0..12u128 {
            let drivers = (0..size)
                .map(|i| driver(i, i % 3 != 0, statuses[(i % 4) as usize]))
                .collect();
            let bookings = (0..size / 2).map(|i| booking(100 + i)).collect::<Vec<_>>();
            let snapshot = Snapshot::new(drivers, bookings, Utc::now());

            let stats = snapshot.stats();
            assert_eq!(stats.unassigned_count, snapshot.bookings.len());
            assert!(stats.available_count <= stats.online_count);
        }
    }
}
