//! Atomic file placement: temp write, fsync, rename
//!
//! Every file that becomes visible to a reader is first written in full to
//! the shared `tmp/` area and then renamed into place. `tmp/` and every
//! target directory must live on one filesystem: a cross-volume rename
//! degrades to copy+delete and loses both atomicity and the claim mutex.

use crate::io::error::BusError;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Write `bytes` to `target` so that no reader ever observes a partial file
///
/// The content goes to a uniquely named file inside `tmp_dir`, is flushed and
/// fsynced, and is then renamed onto `target` in a single step. A crash
/// mid-write leaves at most an orphan `*.tmp` file in `tmp_dir`.
///
/// When `sync_dir` is set, the target's parent directory is fsynced after the
/// rename so the new directory entry survives power loss (unix only).
///
/// # Errors
///
/// Returns `BusError::Io` for any create/write/fsync/rename failure. The temp
/// file is removed on a failed rename.
pub fn write_atomic(
    tmp_dir: &Path,
    target: &Path,
    bytes: &[u8],
    sync_dir: bool,
) -> Result<(), BusError> {
    let tmp_path = tmp_dir.join(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .map_err(|e| BusError::io(&tmp_path, e))?;
        let written = file
            .write_all(bytes)
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(BusError::io(&tmp_path, e));
        }
    }

    if let Err(e) = fs::rename(&tmp_path, target) {
        let _ = fs::remove_file(&tmp_path);
        return Err(BusError::io(target, e));
    }

    if sync_dir && let Some(parent) = target.parent() {
        sync_directory(parent)?;
    }

    Ok(())
}

/// Rename `from` onto `to` within the bus volume
///
/// Thin wrapper so every move in the bus goes through one place. The
/// `io::Error` is returned unwrapped because callers distinguish `NotFound`
/// (claim race) from real failures.
pub fn rename_file(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::rename(from, to)
}

/// Fsync a directory so renames into it are durable
///
/// No-op outside unix, where directories cannot be opened for syncing.
pub fn sync_directory(dir: &Path) -> Result<(), BusError> {
    #[cfg(unix)]
    {
        File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| BusError::io(dir, e))
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

/// Append one line to `path`, flushing and fsyncing before returning
pub fn append_line_durable(path: &Path, line: &str) -> Result<(), BusError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BusError::io(path, e))?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_all())
        .map_err(|e| BusError::io(path, e))
}
