//! On-disk layout for the metrics store
//!
//! Each model owns one directory under the data dir:
//! append-only JSONL logs for events and retraining attempts, and
//! whole-file JSON snapshots (written temp-then-rename) for the window
//! map and the health row.

use crate::error::MonitorError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub(crate) const EVENTS_LOG: &str = "events.jsonl";
pub(crate) const RETRAINING_LOG: &str = "retraining.jsonl";
pub(crate) const WINDOWS_SNAPSHOT: &str = "windows.json";
pub(crate) const HEALTH_SNAPSHOT: &str = "health.json";

/// Encode a model id into a filesystem-safe directory name.
///
/// Alphanumerics, `-`, `_` and interior `.` pass through; everything
/// else (including a leading dot, so `.` / `..` cannot be produced)
/// becomes `%XX`. The encoding is injective, so distinct ids never
/// share a directory.
pub(crate) fn encode_model_id(model_id: &str) -> String {
    let mut out = String::with_capacity(model_id.len());
    for (i, b) in model_id.bytes().enumerate() {
        let plain = b.is_ascii_alphanumeric()
            || b == b'-'
            || b == b'_'
            || (b == b'.' && i > 0);
        if plain {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

pub(crate) fn decode_model_id(dir_name: &str) -> Option<String> {
    let bytes = dir_name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 3 > bytes.len() {
                return None;
            }
            let hex = dir_name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

pub(crate) fn model_dir(data_dir: &Path, model_id: &str) -> PathBuf {
    data_dir.join(encode_model_id(model_id))
}

/// Open a JSONL log for appending, creating it (and the parent
/// directory) if needed.
pub(crate) fn open_log(path: &Path) -> Result<File, MonitorError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Append one record to an open JSONL log and flush it.
pub(crate) fn append_record<T: Serialize>(log: &mut File, record: &T) -> Result<(), MonitorError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    log.write_all(&line)?;
    log.flush()?;
    Ok(())
}

/// Read every record from a JSONL log.
///
/// A line that fails to parse (e.g. torn by a crash mid-append) is
/// skipped with a warning rather than poisoning the whole log.
pub(crate) fn load_log<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, MonitorError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "Skipping unreadable log line"
            ),
        }
    }
    Ok(records)
}

/// Write a snapshot atomically: serialize to a temp file, sync, rename.
pub(crate) fn save_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<(), MonitorError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec(value)?;
    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Load a snapshot if it exists.
pub(crate) fn load_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, MonitorError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&data)?))
}
