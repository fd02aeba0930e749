//! GPX 1.1 export.
//!
//! Besides the standard `ele`/`time`/`sat` children every `trkpt` carries the
//! raw `unix` milliseconds and the `accuracy` radius, so an export can be
//! re-read without losing precision.

use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use tempfile::NamedTempFile;

use crate::error::{Result, TrkptError};
use crate::track::{Track, STOP_OVER_THRESHOLD_MS};

/// Render `track` as a GPX document.
pub fn render_gpx(track: &Track) -> String {
    let mut xml = String::with_capacity(256 + track.len() * 200);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\" ?>\n");
    xml.push_str(
        "<gpx version=\"1.1\" creator=\"trkpt\" xmlns=\"http://www.topografix.com/GPX/1/1\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xsi:schemaLocation=\"http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd\">\n",
    );
    xml.push_str("\t<metadata>\n");
    let _ = writeln!(xml, "\t\t<name>{}</name>", escape_xml(&track.name));
    let _ = writeln!(xml, "\t\t<device>{}</device>", escape_xml(&track.device_id));
    xml.push_str("\t</metadata>\n");
    xml.push_str("\t<trk>\n");
    let _ = writeln!(xml, "\t\t<name>{}</name>", escape_xml(&track.name));

    let segments = track.segments(STOP_OVER_THRESHOLD_MS);
    if segments.is_empty() {
        xml.push_str("\t\t<trkseg>\n\t\t</trkseg>\n");
    }
    for segment in segments {
        xml.push_str("\t\t<trkseg>\n");
        for trkpt in segment {
            let _ = writeln!(
                xml,
                "\t\t\t<trkpt lat=\"{}\" lon=\"{}\">",
                trkpt.latitude, trkpt.longitude
            );
            let _ = writeln!(xml, "\t\t\t\t<ele>{}</ele>", trkpt.altitude);
            let _ = writeln!(xml, "\t\t\t\t<time>{}</time>", iso8601(trkpt.time));
            let _ = writeln!(xml, "\t\t\t\t<unix>{}</unix>", trkpt.time);
            let _ = writeln!(xml, "\t\t\t\t<accuracy>{}</accuracy>", trkpt.accuracy);
            if let Some(sat) = trkpt.satellites {
                let _ = writeln!(xml, "\t\t\t\t<sat>{}</sat>", sat);
            }
            xml.push_str("\t\t\t</trkpt>\n");
        }
        xml.push_str("\t\t</trkseg>\n");
    }

    xml.push_str("\t</trk>\n");
    xml.push_str("</gpx>\n");
    xml
}

/// Write `track` to `path`. The file appears only once fully written.
pub fn export_gpx(track: &Track, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let export_error = |message: String| TrkptError::Export {
        path: path.display().to_string(),
        message,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(export_error(format!("{} is not a directory", dir.display())));
    }

    let xml = render_gpx(track);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| export_error(e.to_string()))?;
    tmp.write_all(xml.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| export_error(e.to_string()))?;
    tmp.persist(path).map_err(|e| export_error(e.error.to_string()))?;

    log::info!(
        "[Gpx] Exported {} points of '{}' to {}",
        track.len(),
        track.name,
        path.display()
    );
    Ok(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
}

/// `2024-05-01T08:30:00.123Z`
fn iso8601(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|utc| utc.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_default()
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
