/*
File: tb-io/src/fs.rs
Purpose: Primitive synchronous filesystem operations.
*/
use std::{
    fs::{self, Permissions},
    io::{self, Write},
    os::unix::fs::{symlink, PermissionsExt},
    path::{Path, PathBuf},
    sync::Arc,
};

use tb_common::error::{Result, TbError};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

/// Checks if a path exists without following symlinks.
pub fn check_symlink_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// True when `path` is a symlink whose target cannot be resolved.
pub fn is_dangling_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
        && !path.exists()
}

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        TbError::from(e)
    })
}

/// Removes a file or symlink. A missing path is not an error.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed file: {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => {
            error!("Failed remove file {}: {}", path.display(), e);
            Err(TbError::from(e))
        }
    }
}

/// Removes `path` if it is an empty directory. Returns whether it was removed.
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    let is_empty = match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(TbError::from(e)),
    };
    if !is_empty {
        return Ok(false);
    }
    debug!("Removing empty directory: {}", path.display());
    match fs::remove_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(TbError::from(e)),
    }
}

/// Creates a symbolic link. Unix only.
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    debug!("Creating symlink {} -> {}", link.display(), target.display());
    symlink(target, link).map_err(|e| {
        error!(
            "Failed create symlink {} -> {}: {}",
            link.display(),
            target.display(),
            e
        );
        TbError::from(e)
    })
}

/// Points `link` at `target`, replacing whatever symlink or file is there.
pub fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        create_dir_all(parent)?;
    }
    remove_file_if_exists(link)?;
    create_symlink(target, link)
}

/// Absolute target of a symlink, resolving relative targets against its parent. `None` when
/// `link` is not a symlink. The target itself may not exist.
pub fn symlink_target(link: &Path) -> Option<PathBuf> {
    let target = fs::read_link(link).ok()?;
    if target.is_absolute() {
        Some(target)
    } else {
        link.parent().map(|parent| parent.join(target))
    }
}

/// Sets file permissions. Mode is standard Unix octal mode.
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    debug!("Setting permissions on {}: {:o}", path.display(), mode);
    fs::set_permissions(path, Permissions::from_mode(mode)).map_err(|e| {
        error!("Failed set permissions on {}: {}", path.display(), e);
        TbError::from(e)
    })
}

/// Atomically writes data to a file using a temporary file.
/// Preserves original permissions if possible.
pub fn atomic_write_file(original_path: &Path, content: &[u8]) -> Result<()> {
    let dir = original_path.parent().ok_or_else(|| {
        TbError::Generic(format!(
            "Cannot get parent directory for {}",
            original_path.display()
        ))
    })?;

    create_dir_all(dir)?;

    let original_perms = fs::metadata(original_path).map(|m| m.permissions()).ok();

    let mut temp_file = NamedTempFile::new_in(dir)?;
    let temp_path = temp_file.path().to_path_buf();

    debug!(
        "Atomically writing {} bytes to {} via temp file {}",
        content.len(),
        original_path.display(),
        temp_path.display()
    );

    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(original_path).map_err(|e| {
        error!(
            "Failed to persist temporary file {} over {}: {}",
            temp_path.display(),
            original_path.display(),
            e.error
        );
        TbError::Io(Arc::new(e.error))
    })?;

    let mode_result = match original_perms {
        Some(perms) => fs::set_permissions(original_path, perms).map_err(TbError::from),
        None => set_permissions(original_path, 0o644),
    };
    if let Err(e) = mode_result {
        warn!(
            "Failed to set permissions on {}: {}",
            original_path.display(),
            e
        );
    }

    Ok(())
}
