// tb-common/src/receipt.rs
// Per-keg install metadata (`INSTALL_RECEIPT.json`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{Options, PkgVersion, SpecKind};

pub const RECEIPT_FILENAME: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSource {
    #[serde(default)]
    pub tap: Option<String>,
    #[serde(default)]
    pub spec: SpecKind,
    /// SHA-256 of the formula definition the keg was built from.
    #[serde(default)]
    pub formula_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub name: String,
    pub version: PkgVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    pub version: PkgVersion,
    #[serde(default)]
    pub used_options: Options,
    #[serde(default)]
    pub unused_options: Options,
    #[serde(default)]
    pub poured_from_bottle: bool,
    #[serde(default)]
    pub installed_as_dependency: bool,
    #[serde(default)]
    pub installed_on_request: bool,
    pub time: DateTime<Utc>,
    pub source: ReceiptSource,
    #[serde(default)]
    pub runtime_dependencies: Vec<RuntimeDependency>,
}

impl InstallReceipt {
    pub fn path_in(keg_path: &Path) -> PathBuf {
        keg_path.join(RECEIPT_FILENAME)
    }

    /// Reads the receipt of the keg at `keg_path`. A keg without a receipt yields `None`; an
    /// unreadable receipt is logged and also yields `None`.
    pub fn read(keg_path: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(keg_path);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No install receipt at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(receipt) => Ok(Some(receipt)),
            Err(e) => {
                warn!("Ignoring malformed install receipt {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn has_source_hash(&self) -> bool {
        self.source
            .formula_hash
            .as_deref()
            .is_some_and(|h| !h.is_empty())
    }

    pub fn depends_on(&self, name: &str, version: &PkgVersion) -> bool {
        self.runtime_dependencies
            .iter()
            .any(|dep| dep.name == name && dep.version == *version)
    }
}
