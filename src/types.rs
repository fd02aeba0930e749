//! Core data types shared by the recording pipeline and the store.
//!
//! A [`Fix`] is what a location source reports; a [`Trackpoint`] is a fix
//! that survived admission and was persisted. [`Homepoint`]s are circular
//! zones where recording is suppressed.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrkptError};
use crate::geo_utils::{self, Position};
use crate::source::Provider;

// ============================================================================
// Fix
// ============================================================================

/// One instantaneous position reading from a source, before any filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub provider: Provider,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above the WGS84 ellipsoid
    pub altitude: f64,
    /// Horizontal accuracy radius in meters (one standard deviation)
    pub accuracy: f64,
    /// Unix timestamp in milliseconds
    pub time: i64,
    /// Satellites used for the fix, when the provider reports it
    pub satellites: Option<u32>,
    /// Device monotonic clock at acquisition, in nanoseconds.
    /// Independent of wall-clock adjustments; used for the staleness check.
    pub elapsed_realtime_nanos: u64,
}

impl Fix {
    /// Create a fix with no satellite count.
    pub fn new(
        provider: Provider,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        time: i64,
        elapsed_realtime_nanos: u64,
    ) -> Self {
        Self {
            provider,
            latitude,
            longitude,
            altitude: 0.0,
            accuracy,
            time,
            satellites: None,
            elapsed_realtime_nanos,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn with_satellites(mut self, satellites: u32) -> Self {
        self.satellites = Some(satellites);
        self
    }

    /// (0, 0) is what sensors report when they have no real position.
    pub fn is_zero(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

impl Position for Fix {
    fn latitude(&self) -> f64 {
        self.latitude
    }
    fn longitude(&self) -> f64 {
        self.longitude
    }
}

// ============================================================================
// Trackpoint
// ============================================================================

/// A fix that has been accepted and persisted.
///
/// `(device_id, time)` is the primary key in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trackpoint {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
    /// Unix timestamp in milliseconds
    pub time: i64,
    pub satellites: Option<u32>,
}

impl Trackpoint {
    pub fn from_fix(device_id: &str, fix: &Fix) -> Self {
        Self {
            device_id: device_id.to_string(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            accuracy: fix.accuracy,
            time: fix.time,
            satellites: fix.satellites,
        }
    }
}

impl Position for Trackpoint {
    fn latitude(&self) -> f64 {
        self.latitude
    }
    fn longitude(&self) -> f64 {
        self.longitude
    }
}

// ============================================================================
// Homepoint
// ============================================================================

/// A named circular zone that suppresses recording while the device is inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Homepoint {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters, always > 0
    pub radius: f64,
    pub name: String,
}

impl Homepoint {
    /// Create a homepoint, rejecting non-positive or non-finite radii.
    pub fn new(id: i64, name: &str, latitude: f64, longitude: f64, radius: f64) -> Result<Self> {
        let homepoint = Self {
            id,
            latitude,
            longitude,
            radius,
            name: name.to_string(),
        };
        homepoint.validate()?;
        Ok(homepoint)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(TrkptError::InvalidHomepoint {
                id: self.id,
                message: format!("radius must be positive, got {}", self.radius),
            });
        }
        Ok(())
    }

    /// Whether a position lies inside the zone (boundary included).
    pub fn contains<P: Position>(&self, position: &P) -> bool {
        geo_utils::haversine_distance(self, position) <= self.radius
    }
}

impl Position for Homepoint {
    fn latitude(&self) -> f64 {
        self.latitude
    }
    fn longitude(&self) -> f64 {
        self.longitude
    }
}

// ============================================================================
// Bounding Box
// ============================================================================

/// Geographic bounding box used for spatial point queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    pub fn contains<P: Position>(&self, position: &P) -> bool {
        let (lat, lon) = (position.latitude(), position.longitude());
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }
}
