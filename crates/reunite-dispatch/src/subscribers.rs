//! Subscriber location index.
//!
//! Subscribers are bucketed into a fixed-degree grid so a range query only
//! scans the cells overlapping the query circle instead of the whole
//! registry.

use std::collections::HashMap;
use std::sync::RwLock;

use reunite_core::geo::GeoPoint;

/// Grid cell edge in degrees, roughly 55km of latitude.
const CELL_DEGREES: f64 = 0.5;

/// Approximate meters per degree of latitude, used to bound the cell scan.
const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub id: String,
    pub location: GeoPoint,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    cells: RwLock<HashMap<(i32, i32), Vec<Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or relocate a subscriber.
    pub fn upsert(&self, subscriber: Subscriber) {
        let mut cells = self.cells.write().expect("registry lock poisoned");
        for bucket in cells.values_mut() {
            bucket.retain(|s| s.id != subscriber.id);
        }
        cells
            .entry(cell_of(&subscriber.location))
            .or_default()
            .push(subscriber);
    }

    /// All subscribers within `radius_meters` of `center`, nearest first.
    pub fn within(&self, center: &GeoPoint, radius_meters: f64) -> Vec<Subscriber> {
        let cells = self.cells.read().expect("registry lock poisoned");

        // Longitude degrees shrink toward the poles; widen the scan by the
        // cosine of the latitude so the circle is always covered.
        let lat_span = (radius_meters / METERS_PER_DEGREE / CELL_DEGREES).ceil() as i32 + 1;
        let lon_scale = center.lat.to_radians().cos().max(0.01);
        let lon_span = (radius_meters / (METERS_PER_DEGREE * lon_scale) / CELL_DEGREES).ceil()
            as i32
            + 1;

        let (center_x, center_y) = cell_of(center);
        let mut hits: Vec<(f64, Subscriber)> = Vec::new();
        for dx in -lon_span..=lon_span {
            for dy in -lat_span..=lat_span {
                let Some(bucket) = cells.get(&(center_x + dx, center_y + dy)) else {
                    continue;
                };
                for subscriber in bucket {
                    let distance = center.distance_meters(&subscriber.location);
                    if distance <= radius_meters {
                        hits.push((distance, subscriber.clone()));
                    }
                }
            }
        }

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        let cells = self.cells.read().expect("registry lock poisoned");
        cells.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cell_of(point: &GeoPoint) -> (i32, i32) {
    (
        (point.lon / CELL_DEGREES).floor() as i32,
        (point.lat / CELL_DEGREES).floor() as i32,
    )
}
