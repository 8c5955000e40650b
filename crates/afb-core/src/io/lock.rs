//! Advisory file lock guarding the per-agent processed log
//!
//! Threads inside one process are already serialized by the bus mutex; this
//! lock extends that to separate processes acking for the same agent.

use crate::io::error::BusError;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

const BASE_BACKOFF_MS: u64 = 20;

/// Lock guard, released on drop
pub struct FileLock {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
    #[cfg_attr(unix, allow(dead_code))]
    path: PathBuf,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }

        #[cfg(not(unix))]
        {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Acquire an exclusive lock on `path`, retrying with exponential backoff
///
/// Waits 20ms, 40ms, 80ms, ... between attempts. `max_retries == 0` means a
/// single non-blocking attempt.
///
/// # Errors
///
/// `BusError::LockTimeout` when every attempt found the lock held, or
/// `BusError::Io` if the lock file cannot be opened.
pub fn acquire_lock(path: &Path, max_retries: u32) -> Result<FileLock, BusError> {
    for attempt in 0..=max_retries {
        if let Some(lock) = try_lock(path)? {
            return Ok(lock);
        }
        if attempt < max_retries {
            let wait_ms = BASE_BACKOFF_MS << attempt.min(10);
            std::thread::sleep(Duration::from_millis(wait_ms));
        }
    }

    Err(BusError::LockTimeout {
        path: path.to_path_buf(),
        retries: max_retries,
    })
}

#[cfg(unix)]
fn try_lock(path: &Path) -> Result<Option<FileLock>, BusError> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| BusError::io(path, e))?;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(Some(FileLock {
            file,
            path: path.to_path_buf(),
        }));
    }

    let err = std::io::Error::last_os_error();
    let would_block = err.raw_os_error() == Some(libc::EWOULDBLOCK)
        || err.raw_os_error() == Some(libc::EAGAIN);
    if would_block {
        Ok(None)
    } else {
        Err(BusError::io(path, err))
    }
}

#[cfg(not(unix))]
fn try_lock(path: &Path) -> Result<Option<FileLock>, BusError> {
    use std::fs::OpenOptions;

    // No flock here: exclusive creation of the lock file acts as the mutex.
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => Ok(Some(FileLock {
            file,
            path: path.to_path_buf(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(BusError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_lock_success() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("agent-a.lock");

        let lock = acquire_lock(&lock_path, 0).unwrap();
        assert!(lock_path.exists());
        drop(lock);
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("agent-a.lock");

        {
            let _lock = acquire_lock(&lock_path, 0).unwrap();
        }

        let _again = acquire_lock(&lock_path, 0).unwrap();
    }

    #[test]
    fn test_acquire_lock_waits_for_holder() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = Arc::new(temp_dir.path().join("agent-a.lock"));
        let barrier = Arc::new(Barrier::new(2));

        let holder_path = Arc::clone(&lock_path);
        let holder_barrier = Arc::clone(&barrier);
        let holder = thread::spawn(move || {
            let _lock = acquire_lock(&holder_path, 0).unwrap();
            holder_barrier.wait();
            thread::sleep(Duration::from_millis(60));
        });

        barrier.wait();
        // 20 + 40 + 80 + 160ms of backoff outlasts the holder
        let acquired = acquire_lock(&lock_path, 4);
        holder.join().unwrap();
        assert!(acquired.is_ok());
    }

    #[test]
    fn test_acquire_lock_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("agent-a.lock");

        let _held = acquire_lock(&lock_path, 0).unwrap();

        // flock is per open file description, so a second open in the same
        // process still contends.
        let result = acquire_lock(&lock_path, 1);
        assert!(matches!(result, Err(BusError::LockTimeout { retries: 1, .. })));
    }
}
