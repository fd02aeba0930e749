//! Unified error handling for the trkpt library.
//!
//! Sensor noise is never an error: rejected fixes are reported through
//! [`crate::admission::RejectReason`]. A disconnected store is not an error
//! either; writes become no-ops and reads come back empty. What remains here
//! are the failures a caller can act on.

use std::io;

use crate::source::Provider;

/// Unified error type for trkpt operations.
#[derive(Debug, thiserror::Error)]
pub enum TrkptError {
    /// SQLite failure while reading or writing the point store
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    /// Homepoint violates its invariants (radius must be > 0)
    #[error("Homepoint {id} is invalid: {message}")]
    InvalidHomepoint { id: i64, message: String },

    /// Export destination could not be written
    #[error("Export to '{path}' failed: {message}")]
    Export { path: String, message: String },

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Persisted tracking state could not be read or written
    #[error("State persistence error: {message}")]
    State { message: String },

    /// Location source could not be attached
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for trkpt operations.
pub type Result<T> = std::result::Result<T, TrkptError>;

/// Reasons a location source refuses to deliver fixes.
///
/// These are degradations, not failures: the tracker keeps recording with
/// whatever sources remain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("location permission not granted for {0}")]
    PermissionDenied(Provider),

    #[error("provider {0} is disabled")]
    ProviderDisabled(Provider),

    #[error("provider {0} is not present on this device")]
    Unsupported(Provider),
}
