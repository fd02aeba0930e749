//! Track assembly, segmentation and statistics.
//!
//! A [`Track`] is a view over a time window of one device's points. It is
//! never stored as such; the store only knows trackpoints.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::Result;
use crate::geo_utils::haversine_distance;
use crate::persistence::PointStore;
use crate::types::{BoundingBox, Trackpoint};

/// A gap longer than this between consecutive points starts a new segment.
pub const STOP_OVER_THRESHOLD_MS: i64 = 5 * 60 * 1000;

// ============================================================================
// Track
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub device_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub name: String,
    pub trkpts: Vec<Trackpoint>,
}

impl Track {
    /// Create an empty track for a window.
    pub fn new(device_id: &str, start_time: i64, end_time: i64) -> Self {
        Self {
            device_id: device_id.to_string(),
            start_time,
            end_time,
            name: suggested_name(device_id, start_time, end_time),
            trkpts: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.trkpts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trkpts.is_empty()
    }

    /// Split at gaps longer than `threshold_ms`.
    pub fn segments(&self, threshold_ms: i64) -> Vec<&[Trackpoint]> {
        split_segments(&self.trkpts, threshold_ms)
    }

    pub fn statistics(&self) -> TrackStatistics {
        let mut acc = StatisticsAccumulator::new();
        for trkpt in &self.trkpts {
            acc.push(trkpt);
        }
        acc.finish()
    }
}

/// `"<date> <device>"`, or `"<first date> - <last date> <device>"` when the
/// window spans several local days.
pub fn suggested_name(device_id: &str, start_time: i64, end_time: i64) -> String {
    let start = local_date(start_time);
    let end = local_date(end_time);
    match (start, end) {
        (Some(start), Some(end)) if start != end => format!("{} - {} {}", start, end, device_id),
        (Some(start), _) => format!("{} {}", start, device_id),
        _ => device_id.to_string(),
    }
}

fn local_date(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d").to_string())
}

/// Split `points` wherever consecutive timestamps differ by more than
/// `threshold_ms`. Empty input gives no segments.
pub fn split_segments(points: &[Trackpoint], threshold_ms: i64) -> Vec<&[Trackpoint]> {
    let mut segments = Vec::new();
    let mut start = 0;
    for i in 1..points.len() {
        if points[i].time - points[i - 1].time > threshold_ms {
            segments.push(&points[start..i]);
            start = i;
        }
    }
    if start < points.len() {
        segments.push(&points[start..]);
    }
    segments
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStatistics {
    pub point_count: usize,
    /// Meters
    pub distance: f64,
    /// Milliseconds between first and last point
    pub duration: i64,
    /// Meters per second
    pub velocity: f64,
    pub total_ascent: f64,
    /// Positive magnitude
    pub total_descent: f64,
    pub max_altitude: f64,
    pub min_altitude: f64,
}

/// Single-pass statistics over a time-ordered point stream.
#[derive(Debug, Clone, Default)]
pub struct StatisticsAccumulator {
    stats: TrackStatistics,
    first_time: Option<i64>,
    previous: Option<Trackpoint>,
}

impl StatisticsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, trkpt: &Trackpoint) {
        let stats = &mut self.stats;
        match &self.previous {
            None => {
                self.first_time = Some(trkpt.time);
                stats.max_altitude = trkpt.altitude;
                stats.min_altitude = trkpt.altitude;
            }
            Some(previous) => {
                stats.distance += haversine_distance(previous, trkpt);
                let delta = trkpt.altitude - previous.altitude;
                if delta > 0.0 {
                    stats.total_ascent += delta;
                } else {
                    stats.total_descent -= delta;
                }
                stats.max_altitude = stats.max_altitude.max(trkpt.altitude);
                stats.min_altitude = stats.min_altitude.min(trkpt.altitude);
            }
        }
        stats.point_count += 1;
        self.previous = Some(trkpt.clone());
    }

    pub fn finish(self) -> TrackStatistics {
        let mut stats = self.stats;
        if let (Some(first), Some(last)) = (self.first_time, self.previous.as_ref()) {
            stats.duration = last.time - first;
        }
        if stats.point_count >= 2 && stats.duration > 0 {
            stats.velocity = stats.distance / (stats.duration as f64 / 1000.0);
        }
        stats
    }
}

// ============================================================================
// Assembler
// ============================================================================

/// Builds tracks from a [`PointStore`].
pub struct TrackAssembler<'a> {
    store: &'a PointStore,
    max_accuracy: Option<f64>,
}

impl<'a> TrackAssembler<'a> {
    pub fn new(store: &'a PointStore) -> Self {
        Self {
            store,
            max_accuracy: None,
        }
    }

    /// Leave out points less accurate than `max_accuracy`.
    pub fn with_max_accuracy(mut self, max_accuracy: f64) -> Self {
        self.max_accuracy = Some(max_accuracy);
        self
    }

    /// Load the points of `device_id` in `[start, end]`.
    pub fn load(&self, device_id: &str, start: i64, end: i64) -> Track {
        let mut track = Track::new(device_id, start, end);
        track.trkpts = match self.max_accuracy {
            Some(max) => self
                .store
                .query_range_filtered(device_id, start, end, max)
                .collect(),
            None => self.store.query_range(device_id, start, end).collect(),
        };
        log::debug!("[TrackAssembler] Loaded {} points for {}", track.len(), track.name);
        track
    }

    /// Every visit of `device_id` to `bbox`, as one track.
    pub fn load_bbox(&self, device_id: &str, bbox: BoundingBox) -> Track {
        let trkpts: Vec<Trackpoint> = match self.max_accuracy {
            Some(max) => self.store.query_bbox_filtered(device_id, bbox, max).collect(),
            None => self
                .store
                .query_bbox(device_id, bbox.north, bbox.south, bbox.east, bbox.west)
                .collect(),
        };
        let start = trkpts.first().map(|p| p.time).unwrap_or(0);
        let end = trkpts.last().map(|p| p.time).unwrap_or(0);
        let mut track = Track::new(device_id, start, end);
        track.trkpts = trkpts;
        track
    }

    pub fn statistics(&self, track: &Track) -> TrackStatistics {
        track.statistics()
    }

    /// Statistics straight from the store without materializing the track.
    pub fn statistics_for_range(&self, device_id: &str, start: i64, end: i64) -> TrackStatistics {
        let mut acc = StatisticsAccumulator::new();
        let cursor = match self.max_accuracy {
            Some(max) => self.store.query_range_filtered(device_id, start, end, max),
            None => self.store.query_range(device_id, start, end),
        };
        for trkpt in cursor {
            acc.push(&trkpt);
        }
        acc.finish()
    }

    pub fn segments<'t>(&self, track: &'t Track) -> Vec<&'t [Trackpoint]> {
        track.segments(STOP_OVER_THRESHOLD_MS)
    }

    /// One empty track header per recorded local day and device, newest first.
    pub fn list_tracks(&self) -> Result<Vec<Track>> {
        Ok(self
            .store
            .track_days()?
            .into_iter()
            .map(|day| Track::new(&day.device_id, day.start_time, day.end_time))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::meters_to_latitude_degrees;
    use chrono::TimeZone;

    fn point(time: i64, meters_north: f64, altitude: f64) -> Trackpoint {
        Trackpoint {
            device_id: "phone".to_string(),
            latitude: 46.0 + meters_to_latitude_degrees(meters_north),
            longitude: 7.0,
            altitude,
            accuracy: 5.0,
            time,
            satellites: None,
        }
    }

    #[test]
    fn test_segmentation_at_stop_over() {
        let points: Vec<_> = [0, 60_000, 400_000, 420_000]
            .iter()
            .map(|&t| point(t, 0.0, 0.0))
            .collect();
        let segments = split_segments(&points, STOP_OVER_THRESHOLD_MS);
        let times: Vec<Vec<i64>> = segments
            .iter()
            .map(|s| s.iter().map(|p| p.time).collect())
            .collect();
        assert_eq!(times, vec![vec![0, 60_000], vec![400_000, 420_000]]);
    }

    #[test]
    fn test_segmentation_gap_equal_to_threshold_does_not_split() {
        let points = vec![point(0, 0.0, 0.0), point(STOP_OVER_THRESHOLD_MS, 0.0, 0.0)];
        assert_eq!(split_segments(&points, STOP_OVER_THRESHOLD_MS).len(), 1);
        assert!(split_segments(&[], STOP_OVER_THRESHOLD_MS).is_empty());
    }

    #[test]
    fn test_statistics_collinear() {
        let mut track = Track::new("phone", 0, 20_000);
        track.trkpts = vec![
            point(0, 0.0, 10.0),
            point(10_000, 100.0, 15.0),
            point(20_000, 200.0, 5.0),
        ];
        let stats = track.statistics();
        assert_eq!(stats.point_count, 3);
        assert_eq!(stats.total_ascent, 5.0);
        assert_eq!(stats.total_descent, 10.0);
        assert_eq!(stats.max_altitude, 15.0);
        assert_eq!(stats.min_altitude, 5.0);
        assert!((stats.distance - 200.0).abs() < 0.01);
        assert_eq!(stats.duration, 20_000);
        assert!((stats.velocity - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_statistics_degenerate() {
        let empty = Track::new("phone", 0, 0).statistics();
        assert_eq!(empty, TrackStatistics::default());

        let mut single = Track::new("phone", 0, 0);
        single.trkpts = vec![point(5, 0.0, 42.0)];
        let stats = single.statistics();
        assert_eq!(stats.velocity, 0.0);
        assert_eq!(stats.duration, 0);
        assert_eq!(stats.max_altitude, 42.0);
    }

    #[test]
    fn test_statistics_span_segments() {
        let mut track = Track::new("phone", 0, 1_000_000);
        track.trkpts = vec![point(0, 0.0, 0.0), point(900_000, 100.0, 0.0)];
        assert_eq!(track.segments(STOP_OVER_THRESHOLD_MS).len(), 2);
        assert!((track.statistics().distance - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_suggested_name() {
        let start = Local.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap().timestamp_millis();
        let same_day = start + 3_600_000;
        let later = Local.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap().timestamp_millis();
        assert_eq!(suggested_name("phone", start, same_day), "2024-05-01 phone");
        assert_eq!(suggested_name("phone", start, later), "2024-05-01 - 2024-05-03 phone");
    }

    #[test]
    fn test_assembler_load_and_list() {
        let mut store = PointStore::in_memory().unwrap();
        let base = Local.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap().timestamp_millis();
        for (i, meters) in [0.0, 100.0, 200.0].iter().enumerate() {
            let mut p = point(base + i as i64 * 10_000, *meters, 0.0);
            if i == 1 {
                p.accuracy = 60.0;
            }
            store.insert(&p).unwrap();
        }

        let assembler = TrackAssembler::new(&store);
        let tracks = assembler.list_tracks().unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "2024-06-02 phone");

        let track = assembler.load("phone", tracks[0].start_time, tracks[0].end_time);
        assert_eq!(track.len(), 3);
        let streamed = assembler.statistics_for_range("phone", track.start_time, track.end_time);
        assert_eq!(streamed, assembler.statistics(&track));

        let filtered = TrackAssembler::new(&store)
            .with_max_accuracy(30.0)
            .load("phone", track.start_time, track.end_time);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_assembler_load_bbox() {
        let mut store = PointStore::in_memory().unwrap();
        store.insert(&point(1_000, 0.0, 0.0)).unwrap();
        store.insert(&point(9_000_000, 10.0, 0.0)).unwrap();
        store.insert(&point(5_000, 50_000.0, 0.0)).unwrap();
        let bbox = BoundingBox::new(46.01, 45.99, 7.01, 6.99);
        let track = TrackAssembler::new(&store).load_bbox("phone", bbox);
        assert_eq!(track.len(), 2);
        assert_eq!(track.start_time, 1_000);
        assert_eq!(track.end_time, 9_000_000);
        assert_eq!(TrackAssembler::new(&store).segments(&track).len(), 2);
    }
}
