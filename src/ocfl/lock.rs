use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[cfg(feature = "sql-lock")]
use std::path::Path;

use log::error;

use crate::ocfl::error::Result;
use crate::ocfl::RocflError;

/// Default amount of time a caller is willing to wait to acquire a lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// An object-scoped read/write lock manager. Every mutating repository operation acquires a
/// write lock on the target object's id before touching its storage; read operations that need
/// a consistent view of an object across multiple storage calls acquire a read lock. Locks are
/// released automatically when the returned guard is dropped.
///
/// Implementations are free to scope locking however is appropriate -- in-process only, or
/// coordinated through an external store shared by multiple processes.
pub trait ObjectLockManager: Send + Sync {
    /// Acquires an exclusive lock on `object_id`, blocking for up to `timeout` before failing
    /// with `RocflError::Lock`. The lock is released when the returned guard is dropped.
    fn acquire_write(&self, object_id: &str, timeout: Duration) -> Result<Box<dyn Any>>;

    /// Acquires a shared lock on `object_id`, blocking for up to `timeout` before failing with
    /// `RocflError::Lock`. The lock is released when the returned guard is dropped.
    fn acquire_read(&self, object_id: &str, timeout: Duration) -> Result<Box<dyn Any>>;

    /// Convenience wrapper that acquires a write lock using the default timeout and runs `body`
    /// while holding it.
    fn do_in_write_lock<T>(&self, object_id: &str, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.acquire_write(object_id, DEFAULT_LOCK_TIMEOUT)?;
        body()
    }

    /// Convenience wrapper that acquires a read lock using the default timeout and runs `body`
    /// while holding it.
    fn do_in_read_lock<T>(&self, object_id: &str, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.acquire_read(object_id, DEFAULT_LOCK_TIMEOUT)?;
        body()
    }
}

#[derive(Default)]
struct LockState {
    writer: bool,
    readers: u32,
}

struct LockEntry {
    state: Mutex<LockState>,
    cvar: Condvar,
}

/// An `ObjectLockManager` implementation that holds locks entirely in process memory, keyed by
/// object id. This is sufficient when a single process is the only writer to a storage root, but
/// provides no cross-process coordination -- use `SqliteLockManager` when multiple processes
/// (or hosts) share a storage root.
pub struct InMemoryLockManager {
    locks: Mutex<HashMap<String, Arc<LockEntry>>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn entry_for(&self, object_id: &str) -> Arc<LockEntry> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(object_id.to_string())
            .or_insert_with(|| {
                Arc::new(LockEntry {
                    state: Mutex::new(LockState::default()),
                    cvar: Condvar::new(),
                })
            })
            .clone()
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemoryLockGuard {
    entry: Arc<LockEntry>,
    write: bool,
}

impl Drop for InMemoryLockGuard {
    fn drop(&mut self) {
        let mut state = self.entry.state.lock().unwrap();
        if self.write {
            state.writer = false;
        } else {
            state.readers -= 1;
        }
        self.entry.cvar.notify_all();
    }
}

fn wait_until<F>(
    entry: &LockEntry,
    timeout: Duration,
    object_id: &str,
    kind: &'static str,
    mut blocked: F,
) -> Result<std::sync::MutexGuard<'_, LockState>>
where
    F: FnMut(&LockState) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut state = entry.state.lock().unwrap();

    while blocked(&state) {
        let now = Instant::now();
        if now >= deadline {
            return Err(RocflError::Lock {
                object_id: object_id.to_string(),
                kind,
                timeout,
                reason: "timed out waiting for the in-process lock to become available"
                    .to_string(),
            });
        }

        let (guard, result) = entry.cvar.wait_timeout(state, deadline - now).unwrap();
        state = guard;
        if result.timed_out() && blocked(&state) {
            return Err(RocflError::Lock {
                object_id: object_id.to_string(),
                kind,
                timeout,
                reason: "timed out waiting for the in-process lock to become available"
                    .to_string(),
            });
        }
    }

    Ok(state)
}

impl ObjectLockManager for InMemoryLockManager {
    fn acquire_write(&self, object_id: &str, timeout: Duration) -> Result<Box<dyn Any>> {
        let entry = self.entry_for(object_id);
        let mut state = wait_until(&entry, timeout, object_id, "write", |s| {
            s.writer || s.readers > 0
        })?;
        state.writer = true;
        drop(state);

        Ok(Box::new(InMemoryLockGuard { entry, write: true }))
    }

    fn acquire_read(&self, object_id: &str, timeout: Duration) -> Result<Box<dyn Any>> {
        let entry = self.entry_for(object_id);
        let mut state = wait_until(&entry, timeout, object_id, "read", |s| s.writer)?;
        state.readers += 1;
        drop(state);

        Ok(Box::new(InMemoryLockGuard {
            entry,
            write: false,
        }))
    }
}

/// An `ObjectLockManager` implementation backed by a SQLite database, allowing multiple
/// processes (potentially on different hosts, if the database file lives on shared storage) to
/// coordinate access to the same storage root. Locks are tracked as rows keyed by object id; a
/// lock that has been held for longer than `max_lock_duration` is considered abandoned and may
/// be stolen by another caller, which guards against a crashed process leaving a lock held
/// forever.
///
/// This implementation does not distinguish between read and write locks -- both acquire the
/// same exclusive row -- since the common failure mode this guards against (two writers
/// racing on the same object) does not benefit from allowing concurrent readers across
/// processes the way the in-process manager does.
#[cfg(feature = "sql-lock")]
pub struct SqliteLockManager {
    conn: Mutex<rusqlite::Connection>,
    max_lock_duration: Duration,
}

#[cfg(feature = "sql-lock")]
impl SqliteLockManager {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_max_lock_duration(db_path, Duration::from_secs(60 * 10))
    }

    pub fn with_max_lock_duration(
        db_path: impl AsRef<Path>,
        max_lock_duration: Duration,
    ) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS object_lock (
                object_id TEXT PRIMARY KEY,
                acquired_timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            max_lock_duration,
        })
    }

    fn try_acquire(&self, object_id: &str) -> Result<bool> {
        let now = now_millis();
        let conn = self.conn.lock().unwrap();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO object_lock (object_id, acquired_timestamp) VALUES (?1, ?2)",
            rusqlite::params![object_id, now],
        )?;

        if inserted > 0 {
            return Ok(true);
        }

        let stale_before = now - self.max_lock_duration.as_millis() as i64;
        let stolen = conn.execute(
            "UPDATE object_lock SET acquired_timestamp = ?1
             WHERE object_id = ?2 AND acquired_timestamp <= ?3",
            rusqlite::params![now, object_id, stale_before],
        )?;

        Ok(stolen > 0)
    }

    fn release(&self, object_id: &str) {
        let conn = self.conn.lock().unwrap();
        if let Err(e) = conn.execute(
            "DELETE FROM object_lock WHERE object_id = ?1",
            rusqlite::params![object_id],
        ) {
            error!("Failed to release database lock on object {object_id}: {e}");
        }
    }
}

#[cfg(feature = "sql-lock")]
fn now_millis() -> i64 {
    chrono::Local::now().timestamp_millis()
}

#[cfg(feature = "sql-lock")]
struct SqliteLockGuard<'a> {
    manager: &'a SqliteLockManager,
    object_id: String,
}

#[cfg(feature = "sql-lock")]
impl Drop for SqliteLockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.object_id);
    }
}

#[cfg(feature = "sql-lock")]
impl ObjectLockManager for SqliteLockManager {
    fn acquire_write(&self, object_id: &str, timeout: Duration) -> Result<Box<dyn Any>> {
        self.acquire_exclusive(object_id, timeout, "write")
    }

    fn acquire_read(&self, object_id: &str, timeout: Duration) -> Result<Box<dyn Any>> {
        self.acquire_exclusive(object_id, timeout, "read")
    }
}

#[cfg(feature = "sql-lock")]
impl SqliteLockManager {
    fn acquire_exclusive<'a>(
        &'a self,
        object_id: &str,
        timeout: Duration,
        kind: &'static str,
    ) -> Result<Box<dyn Any + 'a>> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.try_acquire(object_id)? {
                return Ok(Box::new(SqliteLockGuard {
                    manager: self,
                    object_id: object_id.to_string(),
                }));
            }

            if Instant::now() >= deadline {
                return Err(RocflError::Lock {
                    object_id: object_id.to_string(),
                    kind,
                    timeout,
                    reason: "timed out waiting for the database lock to become available"
                        .to_string(),
                });
            }

            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn acquire_lock_when_available() {
        let manager = InMemoryLockManager::new();
        let object_id = "testing";

        let _lock = manager
            .acquire_write(object_id, Duration::from_millis(50))
            .unwrap();

        assert_write_lock_unavailable(object_id, &manager);
    }

    #[test]
    fn acquire_multiple_locks_on_different_objects() {
        let manager = InMemoryLockManager::new();

        let _lock1 = manager
            .acquire_write("one", Duration::from_millis(50))
            .unwrap();
        let _lock2 = manager
            .acquire_write("two", Duration::from_millis(50))
            .unwrap();

        assert_write_lock_unavailable("one", &manager);
        assert_write_lock_unavailable("two", &manager);
    }

    #[test]
    fn release_lock_when_out_of_scope() {
        let manager = InMemoryLockManager::new();

        {
            let _lock1 = manager
                .acquire_write("one", Duration::from_millis(50))
                .unwrap();
            assert_write_lock_unavailable("one", &manager);
        }

        let _lock1 = manager
            .acquire_write("one", Duration::from_millis(50))
            .unwrap();
    }

    #[test]
    fn multiple_readers_allowed_concurrently() {
        let manager = InMemoryLockManager::new();

        let _read1 = manager
            .acquire_read("one", Duration::from_millis(50))
            .unwrap();
        let _read2 = manager
            .acquire_read("one", Duration::from_millis(50))
            .unwrap();

        assert_write_lock_unavailable("one", &manager);
    }

    #[test]
    fn writer_waits_for_reader_to_release() {
        let manager = Arc::new(InMemoryLockManager::new());
        let read_guard = manager.acquire_read("one", Duration::from_millis(500)).unwrap();

        let writer_manager = manager.clone();
        let handle = thread::spawn(move || {
            writer_manager
                .acquire_write("one", Duration::from_secs(2))
                .unwrap();
        });

        thread::sleep(Duration::from_millis(100));
        drop(read_guard);

        handle.join().unwrap();
    }

    fn assert_write_lock_unavailable(object_id: &str, manager: &InMemoryLockManager) {
        match manager.acquire_write(object_id, Duration::from_millis(10)) {
            Err(RocflError::Lock { .. }) => (),
            _ => panic!("Expected the lock to be unavailable"),
        }
    }
}
