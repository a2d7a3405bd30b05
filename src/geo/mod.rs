use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Builds a point only if both coordinates are finite and inside WGS84 range.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);

        valid.then_some(Self { lat, lng })
    }

    /// GeoJSON orders positions as `[lng, lat]`.
    pub fn from_lng_lat(coordinates: &[f64]) -> Option<Self> {
        match coordinates {
            [lng, lat] => Self::new(*lat, *lng),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

impl Bounds {
    pub fn enclosing<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = *points.next()?;

        let bounds = points.fold(
            Self {
                south_west: first,
                north_east: first,
            },
            |acc, p| Self {
                south_west: GeoPoint {
                    lat: acc.south_west.lat.min(p.lat),
                    lng: acc.south_west.lng.min(p.lng),
                },
                north_east: GeoPoint {
                    lat: acc.north_east.lat.max(p.lat),
                    lng: acc.north_east.lng.max(p.lng),
                },
            },
        );

        Some(bounds)
    }
}
