//! Whole-file JSON persistence with atomic replace.

use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::StoreError;

/// Read and decode `path`. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

/// Pretty-print `value` into `path`.
///
/// The bytes go to a temp file in the same directory which is then renamed
/// over `path`, so readers see either the old file or the new one.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| StoreError::json(path, e))?;
        writer.flush().map_err(|e| StoreError::io(path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        let got: Option<Value> = read_json(&tmp.path().join("nope.json")).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn write_replaces_whole_file_and_keeps_greek() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("f.json");
        write_json(&path, &json!({"a": "x".repeat(100)})).unwrap();
        write_json(&path, &json!({"τίτλος": "Άδεια"})).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Άδεια"));
        assert!(!text.contains("xxx"));
        let back: Value = read_json(&path).unwrap().unwrap();
        assert_eq!(back["τίτλος"], "Άδεια");

        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn malformed_json_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let err = read_json::<Value>(&path).unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
        assert!(err.to_string().contains("bad.json"));
    }
}
