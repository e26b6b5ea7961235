//! Write-to-temp-then-rename helpers shared by every store.
//!
//! Readers never observe a half-written record: final paths are only ever
//! produced by `rename(2)` or `link(2)` of a fully written, fsynced temp file.
//! Temp files are dot-prefixed so listings skip them.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{HiveError, Result};

/// Current on-disk schema version for every persisted record.
pub const SCHEMA_VERSION: u32 = 1;

fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| HiveError::InvalidInput(format!("no parent for {}", path.display())))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let token = uuid::Uuid::new_v4().simple().to_string();
    Ok(parent.join(format!(".{name}.{}.tmp", &token[..8])))
}

fn write_temp<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path_for(path)?;
    let json = serde_json::to_string_pretty(value)?;
    let written = (|| -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(tmp)
}

/// Atomically replace `path` with the JSON encoding of `value`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = write_temp(path, value)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Atomically replace `path` with raw text (used for the plain `pid` file).
pub fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path_for(path)?;
    let written = fs::write(&tmp, text).and_then(|()| fs::rename(&tmp, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Create `path` only if it does not exist yet. Returns `false` when another
/// writer got there first; the existing file is left untouched.
pub fn write_json_new<T: Serialize>(path: &Path, value: &T) -> Result<bool> {
    let tmp = write_temp(path, value)?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Read one record, rejecting unknown schema versions before typed decoding.
pub fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| HiveError::CorruptFile(path.display().to_string(), e.to_string()))?;
    let found = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    if found != u64::from(SCHEMA_VERSION) {
        return Err(HiveError::SchemaVersionMismatch {
            path: path.display().to_string(),
            found,
            expected: SCHEMA_VERSION,
        });
    }
    serde_json::from_value(value)
        .map_err(|e| HiveError::CorruptFile(path.display().to_string(), e.to_string()))
}

/// Read an optional record: `Ok(None)` when the file is absent.
pub fn read_record_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_record(path) {
        Ok(record) => Ok(Some(record)),
        Err(HiveError::Io(err)) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Paths of the visible `*.json` files directly inside `dir`, sorted by name.
pub fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || !name.ends_with(".json") || !path.is_file() {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// Read every record in `dir`. A record that fails to decode (corrupt, wrong
/// schema version, vanished mid-listing) is logged and skipped; it never
/// aborts the listing.
pub fn read_records<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for path in json_files(dir)? {
        match read_record(&path) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(path = %path.display(), code = err.code(), "skipping unreadable record: {err}");
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        schema_version: u32,
        name: String,
    }

    fn sample(name: &str) -> Sample {
        Sample {
            schema_version: SCHEMA_VERSION,
            name: name.into(),
        }
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("a.json");

        write_json_atomic(&path, &sample("one")).unwrap();
        write_json_atomic(&path, &sample("two")).unwrap();

        let read: Sample = read_record(&path).unwrap();
        assert_eq!(read.name, "two");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["a.json".to_string()]);
    }

    #[test]
    fn write_new_is_first_writer_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.json");

        assert!(write_json_new(&path, &sample("first")).unwrap());
        assert!(!write_json_new(&path, &sample("second")).unwrap());

        let read: Sample = read_record(&path).unwrap();
        assert_eq!(read.name, "first");
        assert_eq!(json_files(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn unknown_schema_version_fails_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.json");
        fs::write(&path, r#"{"schema_version": 2, "name": "future"}"#).unwrap();

        let err = read_record::<Sample>(&path).unwrap_err();
        assert!(matches!(
            err,
            HiveError::SchemaVersionMismatch { found: 2, expected: 1, .. }
        ));

        fs::write(&path, r#"{"name": "unversioned"}"#).unwrap();
        let err = read_record::<Sample>(&path).unwrap_err();
        assert!(matches!(err, HiveError::SchemaVersionMismatch { found: 0, .. }));
    }

    #[test]
    fn listing_skips_bad_records_and_temp_files() {
        let dir = tempdir().unwrap();
        write_json_atomic(&dir.path().join("good.json"), &sample("good")).unwrap();
        fs::write(dir.path().join("corrupt.json"), "{not json").unwrap();
        fs::write(
            dir.path().join("future.json"),
            r#"{"schema_version": 99, "name": "x"}"#,
        )
        .unwrap();
        fs::write(dir.path().join(".inflight.json.abcd.tmp"), "{").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let records: Vec<Sample> = read_records(dir.path()).unwrap();
        assert_eq!(records, vec![sample("good")]);
    }

    #[test]
    fn read_record_opt_maps_missing_to_none() {
        let dir = tempdir().unwrap();
        let missing: Option<Sample> = read_record_opt(&dir.path().join("nope.json")).unwrap();
        assert!(missing.is_none());
        assert!(read_records::<Sample>(&dir.path().join("absent")).unwrap().is_empty());
    }
}
