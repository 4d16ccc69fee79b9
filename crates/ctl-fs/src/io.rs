//! Atomic I/O operations with file locking

use crate::{Error, NormalizedPath, Result};
use backoff::ExponentialBackoff;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::Duration;

/// Tuning for lock acquisition and durability of writes.
#[derive(Debug, Clone, Copy)]
pub struct RobustnessConfig {
    /// How long to keep retrying the advisory lock before giving up.
    pub lock_timeout: Duration,
    /// Call `sync_all` on the temporary file before renaming it into place.
    pub enable_fsync: bool,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            enable_fsync: true,
        }
    }
}

/// Write content atomically to a file with locking.
///
/// Writes to a temporary sibling and renames it over the target, so readers
/// never observe a partial file. A `<file>.lock` sibling is held with an
/// exclusive advisory lock for the duration of the write.
pub fn write_atomic(path: &NormalizedPath, content: &[u8], config: RobustnessConfig) -> Result<()> {
    let native_path = path.to_native();

    if let Some(parent) = native_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
    }

    let file_name = native_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lock_path = native_path.with_file_name(format!("{file_name}.lock"));
    let temp_path = native_path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    let lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| Error::io(&lock_path, e))?;
    acquire_lock(&lock_file, config.lock_timeout).map_err(|_| Error::LockFailed {
        path: native_path.clone(),
    })?;

    let result = write_and_rename(&temp_path, &native_path, content, config.enable_fsync);

    let _ = FileExt::unlock(&lock_file);
    drop(lock_file);
    let _ = fs::remove_file(&lock_path);

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn acquire_lock(file: &fs::File, timeout: Duration) -> std::result::Result<(), std::io::Error> {
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(250),
        max_elapsed_time: Some(timeout),
        ..ExponentialBackoff::default()
    };
    backoff::retry_notify(
        policy,
        || file.try_lock_exclusive().map_err(backoff::Error::transient),
        |err: std::io::Error, wait: Duration| tracing::debug!(error = %err, ?wait, "Lock busy, retrying"),
    )
    .map_err(|e| match e {
        backoff::Error::Permanent(err) => err,
        backoff::Error::Transient { err, .. } => err,
    })
}

fn write_and_rename(temp_path: &Path, target: &Path, content: &[u8], fsync: bool) -> Result<()> {
    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_path)
        .map_err(|e| Error::io(temp_path, e))?;
    temp_file
        .write_all(content)
        .map_err(|e| Error::io(temp_path, e))?;
    if fsync {
        temp_file.sync_all().map_err(|e| Error::io(temp_path, e))?;
    }
    drop(temp_file);

    fs::rename(temp_path, target).map_err(|e| Error::io(target, e))
}

/// Read text content from a file.
pub fn read_text(path: &NormalizedPath) -> Result<String> {
    let native_path = path.to_native();
    fs::read_to_string(&native_path).map_err(|e| Error::io(&native_path, e))
}

/// Read text content, returning `None` when the file does not exist.
pub fn read_text_if_exists(path: &NormalizedPath) -> Result<Option<String>> {
    let native_path = path.to_native();
    match fs::read_to_string(&native_path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(&native_path, e)),
    }
}

/// Write text content to a file atomically with default robustness settings.
pub fn write_text(path: &NormalizedPath, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes(), RobustnessConfig::default())
}

/// Delete a file. Returns `false` if it was already absent.
pub fn remove_file_if_exists(path: &NormalizedPath) -> Result<bool> {
    let native_path = path.to_native();
    match fs::remove_file(&native_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(&native_path, e)),
    }
}

/// Recursively delete a directory. Returns `false` if it was already absent.
pub fn remove_dir_all_if_exists(path: &NormalizedPath) -> Result<bool> {
    let native_path = path.to_native();
    match fs::remove_dir_all(&native_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(&native_path, e)),
    }
}

/// Create a directory and all missing parents.
pub fn create_dir_all(path: &NormalizedPath) -> Result<()> {
    let native_path = path.to_native();
    fs::create_dir_all(&native_path).map_err(|e| Error::io(&native_path, e))
}

/// Rename `from` to `to`, creating the parent of `to` first.
pub fn rename(from: &NormalizedPath, to: &NormalizedPath) -> Result<()> {
    if let Some(parent) = to.parent() {
        create_dir_all(&parent)?;
    }
    let native_to = to.to_native();
    fs::rename(from.to_native(), &native_to).map_err(|e| Error::io(&native_to, e))?;
    tracing::debug!(from = %from, to = %to, "Renamed");
    Ok(())
}

/// Copy a file's bytes and permissions, creating the parent of `to` first.
pub fn copy_file(from: &NormalizedPath, to: &NormalizedPath) -> Result<()> {
    if let Some(parent) = to.parent() {
        create_dir_all(&parent)?;
    }
    let native_from = from.to_native();
    fs::copy(&native_from, to.to_native()).map_err(|e| Error::io(&native_from, e))?;
    tracing::debug!(from = %from, to = %to, "Copied");
    Ok(())
}

/// Read raw bytes, returning `None` when the file does not exist.
pub fn read_bytes_if_exists(path: &NormalizedPath) -> Result<Option<Vec<u8>>> {
    let native_path = path.to_native();
    match fs::read(&native_path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(&native_path, e)),
    }
}

/// Mark a file as executable for user, group and others.
#[cfg(unix)]
pub fn set_executable(path: &NormalizedPath) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let native_path = path.to_native();
    let mut perms = fs::metadata(&native_path)
        .map_err(|e| Error::io(&native_path, e))?
        .permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(&native_path, perms).map_err(|e| Error::io(&native_path, e))
}

/// Executable bits do not exist on this platform.
#[cfg(not(unix))]
pub fn set_executable(_path: &NormalizedPath) -> Result<()> {
    Ok(())
}

/// Whether the user executable bit is set. Absent files are not executable.
#[cfg(unix)]
pub fn is_executable(path: &NormalizedPath) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let native_path = path.to_native();
    match fs::metadata(&native_path) {
        Ok(meta) => Ok(meta.permissions().mode() & 0o100 != 0),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(&native_path, e)),
    }
}

/// Any existing file counts as executable on this platform.
#[cfg(not(unix))]
pub fn is_executable(path: &NormalizedPath) -> Result<bool> {
    Ok(path.is_file())
}
