//! Geographic utilities.

use geo::{Distance, Haversine, Point};

/// Mean Earth radius used by `geo`'s Haversine implementation, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Anything with a latitude and longitude in degrees.
pub trait Position {
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
}

impl Position for (f64, f64) {
    fn latitude(&self) -> f64 {
        self.0
    }
    fn longitude(&self) -> f64 {
        self.1
    }
}

/// Great-circle distance between two positions in meters.
pub fn haversine_distance<A: Position + ?Sized, B: Position + ?Sized>(a: &A, b: &B) -> f64 {
    let point1 = Point::new(a.longitude(), a.latitude());
    let point2 = Point::new(b.longitude(), b.latitude());
    Haversine::distance(point1, point2)
}

/// Convert a north-south distance in meters to degrees of latitude.
pub fn meters_to_latitude_degrees(meters: f64) -> f64 {
    (meters / EARTH_RADIUS_M).to_degrees()
}
