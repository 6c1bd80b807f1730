//! Flat JSON documents on disk.
//!
//! Every document is written whole: the new contents go to a temp file in the
//! destination directory which is then persisted over the old file, so readers
//! see either the previous or the next version, never a partial one.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::Path,
};

use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use super::error::InfraError;

/// Marker that selects an object-shaped fallback for preview documents.
const OBJECT_SHAPED_MARKER: &str = "link-previews";

/// Read and parse a JSON document.
pub fn read_json(path: &Path) -> Result<Value, InfraError> {
    let contents = fs::read_to_string(path)?;
    let value = serde_json::from_str(&contents)?;
    Ok(value)
}

/// Read a JSON document, returning `None` when the file does not exist.
pub fn read_json_if_exists(path: &Path) -> Result<Option<Value>, InfraError> {
    match read_json(path) {
        Ok(value) => Ok(Some(value)),
        Err(InfraError::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Serialize `value` as 2-space pretty JSON and atomically replace `path`.
pub fn write_json_pretty<T>(path: &Path, value: &T) -> Result<(), InfraError>
where
    T: Serialize + ?Sized,
{
    let mut encoded = serde_json::to_vec_pretty(value)?;
    encoded.push(b'\n');

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(&encoded)?;
    staged.flush()?;
    staged.persist(path).map_err(|err| InfraError::Io(err.error))?;
    Ok(())
}

/// Typed-empty document for `filename`: `{}` for preview files, `[]` otherwise.
pub fn empty_document_for(filename: &str) -> Value {
    if filename.contains(OBJECT_SHAPED_MARKER) {
        Value::Object(Map::new())
    } else {
        Value::Array(Vec::new())
    }
}

/// Empty document with the same shape as `value`.
pub fn empty_like(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::Object(Map::new()),
        _ => Value::Array(Vec::new()),
    }
}

/// Human-readable shape name used in diagnostics.
pub fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
