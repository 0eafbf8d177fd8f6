// tb-io/src/remove.rs
use std::fs;
use std::io;
use std::path::Path;

use tb_common::error::{Result, TbError};
use tracing::{debug, error};

/// Removes a file, symlink or directory tree without following symlinks. Missing paths are
/// fine.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(TbError::from(e)),
    };
    let is_dir = metadata.file_type().is_dir();
    let path_type = if is_dir {
        "directory"
    } else if metadata.file_type().is_symlink() {
        "symlink"
    } else {
        "file"
    };
    debug!("Removing {} at: {}", path_type, path.display());
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed to remove {}: {}", path.display(), e);
            Err(TbError::from(e))
        }
    }
}
