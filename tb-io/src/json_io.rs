// tb-io/src/json_io.rs
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tb_common::error::{Result, TbError};
use tracing::debug;

/// Writes serializable data to a JSON file (pretty-printed) through an atomic replace.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    debug!("Writing JSON to: {}", path.display());
    let json_bytes = serde_json::to_vec_pretty(data).map_err(|e| TbError::Json(Arc::new(e)))?;
    crate::fs::atomic_write_file(path, &json_bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Reading JSON from: {}", path.display());
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| TbError::Json(Arc::new(e)))
}
