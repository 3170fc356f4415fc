#![forbid(unsafe_code)]
//! Cross-process mutual exclusion per source file.
//!
//! A lock marker is an exclusively-created file keyed by the MD5 hash of
//! the absolute source path. Contention is resolved by polling with a
//! short sleep until a timeout elapses; a sidecar metadata file records
//! the owning process's PID and creation time so a crashed owner's stale
//! marker can be detected and cleared rather than blocking forever.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct LockOwnerMeta {
    pid: u32,
    created_unix_secs: f64,
}

/// Guards a single source file's lock marker for the duration of its scope.
/// Dropping a held guard releases the marker, so a panicking stage does not
/// leave a lock behind for the remainder of the process lifetime (a crashed
/// *process*, as opposed to a panicking task within it, still relies on the
/// stale-lock detection below).
pub struct FileLockGuard {
    lock_path: PathBuf,
    meta_path: PathBuf,
    held: bool,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if self.held {
            let _ = release_paths(&self.lock_path, &self.meta_path);
        }
    }
}

/// Acquires the lock for `source_path`, retrying every `poll_interval` until
/// `timeout` elapses. Returns `None` (not an error) on timeout, matching the
/// `acquire(path, timeout) -> bool` contract — callers record a
/// `lock_skipped` outcome and move on rather than treating contention as a
/// failure.
pub fn acquire(
    locks_dir: &Path,
    source_path: &Path,
    timeout: Duration,
    poll_interval: Duration,
    stale_timeout: Duration,
) -> std::io::Result<Option<FileLockGuard>> {
    fs::create_dir_all(locks_dir)?;
    let key = lock_key(source_path);
    let lock_path = locks_dir.join(format!("{key}.lock"));
    let meta_path = locks_dir.join(format!("{key}.lock.meta"));

    let deadline = Instant::now() + timeout;
    loop {
        match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                // create_new already establishes exclusivity across
                // processes sharing this filesystem; the advisory
                // try_lock_exclusive call below additionally protects
                // against a marker surviving an unclean shutdown on
                // platforms where create_new alone is insufficient.
                let _ = file.try_lock_exclusive();
                write_meta(&meta_path, &mut file)?;
                return Ok(Some(FileLockGuard {
                    lock_path,
                    meta_path,
                    held: true,
                }));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if cleanup_if_stale(&lock_path, &meta_path, stale_timeout)? {
                    continue;
                }
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                std::thread::sleep(poll_interval);
            }
            Err(e) => return Err(e),
        }
    }
}

fn write_meta(meta_path: &Path, _lock_file: &mut File) -> std::io::Result<()> {
    let created_unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let meta = LockOwnerMeta {
        pid: std::process::id(),
        created_unix_secs,
    };
    let json = serde_json::to_vec(&meta).unwrap_or_default();
    let mut f = File::create(meta_path)?;
    f.write_all(&json)
}

fn cleanup_if_stale(
    lock_path: &Path,
    meta_path: &Path,
    stale_timeout: Duration,
) -> std::io::Result<bool> {
    let Ok(bytes) = fs::read(meta_path) else {
        // No sidecar at all (e.g. a crash between create_new and
        // write_meta): treat as stale immediately.
        let _ = release_paths(lock_path, meta_path);
        return Ok(true);
    };
    let Ok(meta) = serde_json::from_slice::<LockOwnerMeta>(&bytes) else {
        let _ = release_paths(lock_path, meta_path);
        return Ok(true);
    };

    let owner_alive = pid_alive(meta.pid);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let age = (now - meta.created_unix_secs).max(0.0);
    let is_stale = !owner_alive || (stale_timeout.as_secs_f64() > 0.0 && age >= stale_timeout.as_secs_f64());

    if is_stale {
        release_paths(lock_path, meta_path)?;
    }
    Ok(is_stale)
}

fn release_paths(lock_path: &Path, meta_path: &Path) -> std::io::Result<()> {
    let _ = fs::remove_file(meta_path);
    match fs::remove_file(lock_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use std::process::Command;
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // No portable liveness check; assume alive so a stale lock only
    // clears by age expiry on non-Unix platforms.
    true
}

fn lock_key(source_path: &Path) -> String {
    let abs = fs::canonicalize(source_path)
        .unwrap_or_else(|_| source_path.to_path_buf());
    let digest = md5::compute(abs.to_string_lossy().as_bytes());
    hex::encode(digest.0)
}

/// Removes every `*.lock`/`*.lock.meta` pair under `locks_dir`. Called on
/// shutdown; best-effort, ignores missing files.
pub fn release_all(locks_dir: &Path) -> std::io::Result<()> {
    if !locks_dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(locks_dir)? {
        let entry = entry?;
        let _ = fs::remove_file(entry.path());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquirer_is_excluded_while_first_holds() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.md");
        std::fs::write(&source, b"x").unwrap();
        let locks_dir = dir.path().join("locks");

        let first = acquire(
            &locks_dir,
            &source,
            Duration::from_millis(50),
            Duration::from_millis(5),
            Duration::from_secs(180),
        )
        .unwrap();
        assert!(first.is_some());

        let second = acquire(
            &locks_dir,
            &source,
            Duration::from_millis(50),
            Duration::from_millis(5),
            Duration::from_secs(180),
        )
        .unwrap();
        assert!(second.is_none(), "second acquirer must time out");
    }

    #[test]
    fn lock_is_released_on_drop_and_reacquirable() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.md");
        std::fs::write(&source, b"x").unwrap();
        let locks_dir = dir.path().join("locks");

        {
            let _guard = acquire(
                &locks_dir,
                &source,
                Duration::from_millis(50),
                Duration::from_millis(5),
                Duration::from_secs(180),
            )
            .unwrap();
        }

        let reacquired = acquire(
            &locks_dir,
            &source,
            Duration::from_millis(50),
            Duration::from_millis(5),
            Duration::from_secs(180),
        )
        .unwrap();
        assert!(reacquired.is_some());
    }

    #[test]
    fn stale_lock_with_dead_owner_is_reclaimed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.md");
        std::fs::write(&source, b"x").unwrap();
        let locks_dir = dir.path().join("locks");
        fs::create_dir_all(&locks_dir).unwrap();

        let key = lock_key(&source);
        let lock_path = locks_dir.join(format!("{key}.lock"));
        let meta_path = locks_dir.join(format!("{key}.lock.meta"));
        File::create(&lock_path).unwrap();
        let meta = LockOwnerMeta {
            pid: 999_999, // exceedingly unlikely to be a live PID
            created_unix_secs: 0.0,
        };
        fs::write(&meta_path, serde_json::to_vec(&meta).unwrap()).unwrap();

        let guard = acquire(
            &locks_dir,
            &source,
            Duration::from_millis(200),
            Duration::from_millis(5),
            Duration::from_secs(180),
        )
        .unwrap();
        assert!(guard.is_some(), "dead-owner lock should be reclaimed");
    }

    #[test]
    fn lock_key_is_stable_for_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.md");
        std::fs::write(&source, b"x").unwrap();
        assert_eq!(lock_key(&source), lock_key(&source));
    }
}
