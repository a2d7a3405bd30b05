use crate::geo::{Bounds, GeoPoint};
use crate::models::booking::Booking;
use crate::models::driver::Driver;
use crate::models::marker::{CircleStyle, MapView, Marker, MarkerKind};
use crate::models::snapshot::Snapshot;

pub const DRIVER_PRESENCE_RADIUS_M: f64 = 500.0;
pub const BOOKING_PRESENCE_RADIUS_M: f64 = 300.0;

const DRIVER_COLOR: &str = "green";
const DRIVER_FILL_OPACITY: f64 = 0.1;
const BOOKING_COLOR: &str = "yellow";
const BOOKING_FILL_OPACITY: f64 = 0.2;

/// Drivers first, then bookings, each in snapshot order. Drivers without a
/// reported location get no marker.
pub fn project_to_markers(snapshot: &Snapshot) -> Vec<Marker> {
    let drivers = snapshot.drivers.iter().filter_map(driver_marker);
    let bookings = snapshot.bookings.iter().map(booking_marker);

    drivers.chain(bookings).collect()
}

pub fn project_map_view(snapshot: &Snapshot, center: GeoPoint, zoom: u8) -> MapView {
    let markers = project_to_markers(snapshot);
    let bounds = Bounds::enclosing(markers.iter().map(|m| &m.position));

    MapView {
        center,
        zoom,
        bounds,
        markers,
    }
}

fn driver_marker(driver: &Driver) -> Option<Marker> {
    let position = driver.location?;

    Some(Marker {
        id: driver.id,
        kind: MarkerKind::Driver,
        position,
        radius_m: DRIVER_PRESENCE_RADIUS_M,
        label: format!(
            "{} · {} · {:.1}★",
            driver.display_name(),
            driver.status,
            driver.rating
        ),
        status: driver.status.to_string(),
        email: driver
            .profile
            .as_ref()
            .and_then(|profile| profile.email.clone())
            .filter(|email| !email.trim().is_empty()),
        style: CircleStyle {
            color: DRIVER_COLOR.to_string(),
            fill_opacity: DRIVER_FILL_OPACITY,
        },
    })
}

fn booking_marker(booking: &Booking) -> Marker {
    let address = booking
        .pickup_address
        .as_deref()
        .unwrap_or("Address not set");

    Marker {
        id: booking.id,
        kind: MarkerKind::Booking,
        position: booking.pickup,
        radius_m: BOOKING_PRESENCE_RADIUS_M,
        label: format!("Pickup Request · {address} · {}", booking.status),
        status: booking.status.to_string(),
        email: None,
        style: CircleStyle {
            color: BOOKING_COLOR.to_string(),
            fill_opacity: BOOKING_FILL_OPACITY,
        },
    }
}
