//! Transactional SQLite store for trackpoints, homepoints and meta values.
//!
//! # Commit discipline
//!
//! Every write runs inside an explicit transaction that is opened lazily on
//! the first write. Nothing is committed until a caller asks:
//!
//! - [`PointStore::commit`] flushes immediately
//! - [`PointStore::commit_if_due`] flushes when the interval has elapsed
//! - dropping or closing the store flushes before the connection goes away
//!
//! ## Disconnected store
//!
//! A store without a database ([`PointStore::disconnected`], or after
//! [`PointStore::close`]) is a normal state: writes succeed as no-ops and
//! reads come back empty.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, TimeZone};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::migrations;
use crate::types::{BoundingBox, Homepoint, Trackpoint};

/// Rows fetched per cursor page.
const PAGE_SIZE: i64 = 256;

/// A local calendar day on which a device recorded at least one point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDay {
    pub date: NaiveDate,
    pub device_id: String,
    /// 00:00:00.000 local time, unix millis
    pub start_time: i64,
    /// 23:59:59.999 local time, unix millis
    pub end_time: i64,
}

/// Durable point storage.
pub struct PointStore {
    conn: Option<Connection>,
    path: Option<PathBuf>,
    last_commit: i64,
}

impl PointStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// A store with no backing database.
    pub fn disconnected() -> Self {
        Self {
            conn: None,
            path: None,
            last_commit: 0,
        }
    }

    /// Open (or create) the database at `path` and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let mut store = Self::from_connection(conn)?;
        store.path = Some(path.to_path_buf());
        log::info!("[PointStore] Opened {}", path.display());
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migrations::apply(&mut conn)?;
        Ok(Self {
            conn: Some(conn),
            path: None,
            last_commit: 0,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.conn.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Commit and release the connection. The store is disconnected afterwards.
    pub fn close(&mut self) {
        if let Err(e) = self.commit() {
            log::warn!("[PointStore] Commit on close failed: {}", e);
        }
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                log::warn!("[PointStore] Close failed: {}", e);
            }
            log::info!("[PointStore] Closed");
        }
        self.path = None;
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Whether a write transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|conn| !conn.is_autocommit())
    }

    fn begin(conn: &Connection) -> Result<()> {
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Flush the open transaction, if any.
    pub fn commit(&mut self) -> Result<()> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(());
        };
        if !conn.is_autocommit() {
            log::debug!("[PointStore] Committing");
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Commit if at least `interval_ms` passed since the last commit made here.
    /// Returns whether a commit happened.
    pub fn commit_if_due(&mut self, now_ms: i64, interval_ms: i64) -> Result<bool> {
        if !self.in_transaction() || now_ms - self.last_commit < interval_ms {
            return Ok(false);
        }
        self.commit()?;
        self.last_commit = now_ms;
        Ok(true)
    }

    // ========================================================================
    // Trackpoints
    // ========================================================================

    /// Insert a trackpoint. Returns false when `(device_id, time)` already exists.
    pub fn insert(&mut self, trkpt: &Trackpoint) -> Result<bool> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(false);
        };
        Self::begin(conn)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO trkpt(device_id, lat, lon, time, ele, accuracy, sat)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                trkpt.device_id,
                trkpt.latitude,
                trkpt.longitude,
                trkpt.time,
                trkpt.altitude,
                trkpt.accuracy,
                trkpt.satellites,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn delete(&mut self, device_id: &str, time: i64) -> Result<usize> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(0);
        };
        Self::begin(conn)?;
        let deleted = conn.execute(
            "DELETE FROM trkpt WHERE device_id = ?1 AND time = ?2",
            params![device_id, time],
        )?;
        Ok(deleted)
    }

    /// Delete every point of `device_id` in `[start, end]`.
    pub fn delete_range(&mut self, device_id: &str, start: i64, end: i64) -> Result<usize> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(0);
        };
        Self::begin(conn)?;
        let deleted = conn.execute(
            "DELETE FROM trkpt WHERE device_id = ?1 AND time >= ?2 AND time <= ?3",
            params![device_id, start, end],
        )?;
        log::info!(
            "[PointStore] Deleted {} points of {} in [{}, {}]",
            deleted,
            device_id,
            start,
            end
        );
        Ok(deleted)
    }

    /// Points of `device_id` in `[start, end]`, oldest first.
    pub fn query_range(&self, device_id: &str, start: i64, end: i64) -> TrkptCursor<'_> {
        self.cursor(PointQuery::Range {
            device_id: device_id.to_string(),
            start,
            end,
            max_accuracy: None,
        })
    }

    /// Like [`PointStore::query_range`], skipping points less accurate than
    /// `max_accuracy`.
    pub fn query_range_filtered(
        &self,
        device_id: &str,
        start: i64,
        end: i64,
        max_accuracy: f64,
    ) -> TrkptCursor<'_> {
        self.cursor(PointQuery::Range {
            device_id: device_id.to_string(),
            start,
            end,
            max_accuracy: Some(max_accuracy),
        })
    }

    /// Points of `device_id` inside the box, oldest first.
    pub fn query_bbox(
        &self,
        device_id: &str,
        north: f64,
        south: f64,
        east: f64,
        west: f64,
    ) -> TrkptCursor<'_> {
        self.cursor(PointQuery::BoundingBox {
            device_id: device_id.to_string(),
            bbox: BoundingBox::new(north, south, east, west),
            max_accuracy: None,
        })
    }

    pub fn query_bbox_filtered(
        &self,
        device_id: &str,
        bbox: BoundingBox,
        max_accuracy: f64,
    ) -> TrkptCursor<'_> {
        self.cursor(PointQuery::BoundingBox {
            device_id: device_id.to_string(),
            bbox,
            max_accuracy: Some(max_accuracy),
        })
    }

    fn cursor(&self, query: PointQuery) -> TrkptCursor<'_> {
        TrkptCursor {
            store: self,
            query,
            after: i64::MIN,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Number of points stored for `device_id`.
    pub fn count(&self, device_id: &str) -> Result<u64> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(0);
        };
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trkpt WHERE device_id = ?1",
            params![device_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every (local day, device) with recorded points, newest day first.
    pub fn track_days(&self) -> Result<Vec<TrackDay>> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare(
            "SELECT DISTINCT date(time / 1000, 'unixepoch', 'localtime') AS thedate,
                    CAST(device_id AS TEXT)
             FROM trkpt ORDER BY thedate DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut days = Vec::new();
        for row in rows {
            let (date, device_id) = row?;
            match track_day(&date, device_id) {
                Some(day) => days.push(day),
                None => log::warn!("[PointStore] Skipping unparseable day '{}'", date),
            }
        }
        Ok(days)
    }

    // ========================================================================
    // Homepoints
    // ========================================================================

    pub fn insert_homepoint(&mut self, homepoint: &Homepoint) -> Result<()> {
        homepoint.validate()?;
        let Some(conn) = self.conn.as_ref() else {
            return Ok(());
        };
        Self::begin(conn)?;
        conn.execute(
            "INSERT INTO homepoints(id, lat, lon, radius, name) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                homepoint.id,
                homepoint.latitude,
                homepoint.longitude,
                homepoint.radius,
                homepoint.name,
            ],
        )?;
        log::info!("[PointStore] Added homepoint {} '{}'", homepoint.id, homepoint.name);
        Ok(())
    }

    /// Rewrite the homepoint with `homepoint.id`. Returns false if it does not exist.
    pub fn update_homepoint(&mut self, homepoint: &Homepoint) -> Result<bool> {
        homepoint.validate()?;
        let Some(conn) = self.conn.as_ref() else {
            return Ok(false);
        };
        Self::begin(conn)?;
        let updated = conn.execute(
            "UPDATE homepoints SET lat = ?2, lon = ?3, radius = ?4, name = ?5 WHERE id = ?1",
            params![
                homepoint.id,
                homepoint.latitude,
                homepoint.longitude,
                homepoint.radius,
                homepoint.name,
            ],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_homepoint(&mut self, id: i64) -> Result<bool> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(false);
        };
        Self::begin(conn)?;
        let deleted = conn.execute("DELETE FROM homepoints WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// All homepoints, ordered by id.
    pub fn homepoints(&self) -> Result<Vec<Homepoint>> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(Vec::new());
        };
        let mut stmt =
            conn.prepare("SELECT id, lat, lon, radius, name FROM homepoints ORDER BY id")?;
        let homepoints = stmt
            .query_map([], |row| {
                Ok(Homepoint {
                    id: row.get(0)?,
                    latitude: row.get(1)?,
                    longitude: row.get(2)?,
                    radius: row.get(3)?,
                    name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })?
            .filter_map(|r| r.ok())
            .filter(|home: &Homepoint| {
                let valid = home.validate().is_ok();
                if !valid {
                    log::warn!("[PointStore] Ignoring homepoint {} with radius {}", home.id, home.radius);
                }
                valid
            })
            .collect();
        Ok(homepoints)
    }

    // ========================================================================
    // Meta
    // ========================================================================

    pub fn meta_get(&self, name: &str) -> Result<Option<String>> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(None);
        };
        let value = conn
            .query_row(
                "SELECT value FROM meta WHERE name = ?1",
                params![name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn meta_set(&mut self, name: &str, value: &str) -> Result<()> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(());
        };
        Self::begin(conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO meta(name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        Ok(())
    }
}

impl Drop for PointStore {
    fn drop(&mut self) {
        if let Err(e) = self.commit() {
            log::warn!("[PointStore] Commit on drop failed: {}", e);
        }
    }
}

fn track_day(date: &str, device_id: String) -> Option<TrackDay> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let start = Local
        .from_local_datetime(&date.and_hms_milli_opt(0, 0, 0, 0)?)
        .earliest()?;
    let end = Local
        .from_local_datetime(&date.and_hms_milli_opt(23, 59, 59, 999)?)
        .latest()?;
    Some(TrackDay {
        date,
        device_id,
        start_time: start.timestamp_millis(),
        end_time: end.timestamp_millis(),
    })
}

// ============================================================================
// Cursor
// ============================================================================

#[derive(Debug, Clone)]
enum PointQuery {
    Range {
        device_id: String,
        start: i64,
        end: i64,
        max_accuracy: Option<f64>,
    },
    BoundingBox {
        device_id: String,
        bbox: BoundingBox,
        max_accuracy: Option<f64>,
    },
}

/// Lazy, restartable sequence of trackpoints in ascending time order.
///
/// Rows are fetched a page at a time with keyset pagination on `time`; no
/// statement stays open between pages. The cursor borrows the store, so no
/// write can happen while it is alive; drop it (or [`TrkptCursor::close`] it)
/// first. A read error ends the sequence and is logged.
///
/// ```compile_fail
/// use trkpt::PointStore;
///
/// let mut store = PointStore::in_memory().unwrap();
/// let mut cursor = store.query_range("phone", 0, i64::MAX);
/// store.delete("phone", 0).unwrap();
/// cursor.next();
/// ```
pub struct TrkptCursor<'a> {
    store: &'a PointStore,
    query: PointQuery,
    /// Time of the last row handed out
    after: i64,
    buffer: VecDeque<Trackpoint>,
    exhausted: bool,
}

impl TrkptCursor<'_> {
    /// Start over from the first matching point.
    pub fn rewind(&mut self) {
        self.after = i64::MIN;
        self.buffer.clear();
        self.exhausted = false;
    }

    /// Stop early and drop buffered rows. Further calls to `next` yield nothing
    /// until [`TrkptCursor::rewind`].
    pub fn close(&mut self) {
        self.buffer.clear();
        self.exhausted = true;
    }

    fn fetch_page(&self, conn: &Connection) -> rusqlite::Result<Vec<Trackpoint>> {
        match &self.query {
            PointQuery::Range {
                device_id,
                start,
                end,
                max_accuracy,
            } => {
                let mut stmt = conn.prepare_cached(
                    "SELECT CAST(device_id AS TEXT), lat, lon, time, ele, accuracy, sat FROM trkpt
                     WHERE device_id = ?1 AND time >= ?2 AND time <= ?3 AND time > ?4
                       AND (?5 IS NULL OR accuracy <= ?5)
                     ORDER BY time ASC LIMIT ?6",
                )?;
                let rows = stmt.query_map(
                    params![device_id, start, end, self.after, max_accuracy, PAGE_SIZE],
                    read_trackpoint,
                )?;
                rows.collect()
            }
            PointQuery::BoundingBox {
                device_id,
                bbox,
                max_accuracy,
            } => {
                let mut stmt = conn.prepare_cached(
                    "SELECT CAST(device_id AS TEXT), lat, lon, time, ele, accuracy, sat FROM trkpt
                     WHERE device_id = ?1 AND lat >= ?2 AND lat <= ?3 AND lon >= ?4 AND lon <= ?5
                       AND time > ?6 AND (?7 IS NULL OR accuracy <= ?7)
                     ORDER BY time ASC LIMIT ?8",
                )?;
                let rows = stmt.query_map(
                    params![
                        device_id,
                        bbox.south,
                        bbox.north,
                        bbox.west,
                        bbox.east,
                        self.after,
                        max_accuracy,
                        PAGE_SIZE
                    ],
                    read_trackpoint,
                )?;
                rows.collect()
            }
        }
    }
}

impl Iterator for TrkptCursor<'_> {
    type Item = Trackpoint;

    fn next(&mut self) -> Option<Trackpoint> {
        if self.buffer.is_empty() && !self.exhausted {
            let Some(conn) = self.store.conn.as_ref() else {
                self.exhausted = true;
                return None;
            };
            match self.fetch_page(conn) {
                Ok(page) => {
                    if (page.len() as i64) < PAGE_SIZE {
                        self.exhausted = true;
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    log::warn!("[PointStore] Cursor read failed: {}", e);
                    self.exhausted = true;
                }
            }
        }
        let trkpt = self.buffer.pop_front()?;
        self.after = trkpt.time;
        Some(trkpt)
    }
}

fn read_trackpoint(row: &Row<'_>) -> rusqlite::Result<Trackpoint> {
    Ok(Trackpoint {
        device_id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        time: row.get(3)?,
        altitude: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
        accuracy: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        satellites: row.get::<_, Option<i64>>(6)?.map(|sat| sat.max(0) as u32),
    })
}
