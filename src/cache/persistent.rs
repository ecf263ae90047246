//! L2 persistent cache backed by SQLite.
//!
//! A single table `cache_entries(key, value, expires_at, created_at,
//! access_count)` with millisecond timestamps. Mutations are serialized
//! through one connection; lookup access-count bumps are applied by a
//! background thread so `get` never waits on a write. Bumps are
//! best-effort and dropped once the store is closed.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use super::{CacheLayer, CacheStats};
use crate::error::CacheError;

pub struct PersistentCache {
    conn: Arc<Mutex<Connection>>,
    closed: Arc<AtomicBool>,
    bump_tx: Mutex<Option<mpsc::Sender<String>>>,
    updater: Mutex<Option<JoinHandle<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    max_size: usize,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl PersistentCache {
    /// Open (or create) the store at `path`, creating parent directories as
    /// needed.
    pub fn open(path: &Path, max_size: usize) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(|e| CacheError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_cache_entries_expires
                ON cache_entries(expires_at);
            "#,
        )?;

        let conn = Arc::new(Mutex::new(conn));
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<String>();

        let updater_conn = Arc::clone(&conn);
        let updater_closed = Arc::clone(&closed);
        let updater = std::thread::spawn(move || {
            while let Ok(key) = rx.recv() {
                if updater_closed.load(Ordering::Acquire) {
                    // Drain silently; accounting is best-effort on shutdown.
                    continue;
                }
                let guard = updater_conn.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = guard.execute(
                    "UPDATE cache_entries SET access_count = access_count + 1 WHERE key = ?1",
                    params![key],
                ) {
                    tracing::debug!(error = %e, "L2 access-count bump failed");
                }
            }
        });

        Ok(Self {
            conn,
            closed,
            bump_tx: Mutex::new(Some(tx)),
            updater: Mutex::new(Some(updater)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            max_size,
        })
    }

    /// Flip the closed flag, stop accepting access-count bumps, and wait for
    /// the updater thread to drain. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the sender ends the updater's recv loop.
        drop(
            self.bump_tx
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take(),
        );
        if let Some(handle) = self
            .updater
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            if handle.join().is_err() {
                tracing::warn!("L2 access-count updater panicked during shutdown");
            }
        }
    }

    fn try_get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        let row: Option<(Vec<u8>, i64)> = {
            let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .query_row(
                    "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
        };
        match row {
            Some((bytes, expires_at)) if expires_at > now_ms() => {
                // Best-effort bump; a closed channel just drops it.
                let tx_guard = self.bump_tx.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(tx) = tx_guard.as_ref() {
                    let _ = tx.send(key.to_string());
                }
                Ok(Some(bytes))
            }
            _ => Ok(None),
        }
    }

    fn try_set(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        let now = now_ms();
        let expires_at = now + ttl.as_millis() as i64;
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            r#"
            INSERT INTO cache_entries (key, value, expires_at, created_at, access_count)
            VALUES (?1, ?2, ?3, ?4, 0)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at,
                access_count = 0
            "#,
            params![key, bytes, expires_at, now],
        )?;

        // Enforce max_size: expired rows go first, then the coldest rows by
        // (access_count, created_at).
        guard.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![now],
        )?;
        let count: i64 =
            guard.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        let overflow = count - self.max_size as i64;
        if overflow > 0 {
            guard.execute(
                r#"
                DELETE FROM cache_entries WHERE key IN (
                    SELECT key FROM cache_entries
                    ORDER BY access_count ASC, created_at ASC
                    LIMIT ?1
                )
                "#,
                params![overflow],
            )?;
        }
        Ok(())
    }
}

impl CacheLayer for PersistentCache {
    fn get(&self, key: &str) -> Option<Value> {
        match self.try_get(key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "L2 entry is not valid JSON, treating as miss");
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "L2 lookup failed");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "L2 serialization failed, skipping write");
                return;
            }
        };
        if let Err(e) = self.try_set(key, &bytes, ttl) {
            tracing::warn!(key = %key, error = %e, "L2 write failed");
        }
    }

    fn clear(&self) {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = guard.execute("DELETE FROM cache_entries", []) {
            tracing::warn!(error = %e, "L2 clear failed");
        }
    }

    fn stats(&self) -> CacheStats {
        let size = {
            let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
                    row.get::<_, i64>(0)
                })
                .unwrap_or(0) as usize
        };
        CacheStats {
            level: "L2",
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size,
            max_size: self.max_size,
        }
    }
}

impl Drop for PersistentCache {
    fn drop(&mut self) {
        self.close();
    }
}
