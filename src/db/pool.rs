//! A fixed set of read-only connections to one database file.
//!
//! Reads check out a connection here instead of queueing behind the writer, so
//! a long batch transaction on one project never stalls reads of another.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

use rusqlite::Connection;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct ReadPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    /// Open `size` read-only connections to `path`.
    pub fn open(path: &Path, size: usize) -> Result<Self> {
        let conns = (0..size)
            .map(|_| super::open_reader(path).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(path = %path.display(), size, "read pool opened");
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    /// A pool with no connections; [`get`](Self::get) always yields `None`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// The first idle connection, or else the next one in rotation once it
    /// frees up. `None` for an empty pool.
    pub fn get(&self) -> Result<Option<MutexGuard<'_, Connection>>> {
        let n = self.conns.len();
        if n == 0 {
            return Ok(None);
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for i in 0..n {
            match self.conns[(start + i) % n].try_lock() {
                Ok(guard) => return Ok(Some(guard)),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => return Err(poisoned()),
            }
        }

        self.conns[start % n]
            .lock()
            .map(Some)
            .map_err(|_| poisoned())
    }
}

fn poisoned() -> Error {
    Error::Internal("read connection lock poisoned".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_yields_nothing() {
        let pool = ReadPool::empty();
        assert!(pool.is_empty());
        assert!(pool.get().unwrap().is_none());
    }

    #[test]
    fn readers_see_committed_writes_and_reject_writes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("pool.db");
        let writer = crate::db::open_database(&path).unwrap();
        let pool = ReadPool::open(&path, 2).unwrap();
        assert_eq!(pool.len(), 2);

        crate::db::migrations::set_meta(&writer, "reader_check", "v").unwrap();

        let conn = pool.get().unwrap().unwrap();
        assert_eq!(
            crate::db::migrations::get_meta(&conn, "reader_check").unwrap().as_deref(),
            Some("v")
        );
        assert!(crate::db::migrations::set_meta(&conn, "x", "y").is_err());
    }

    #[test]
    fn busy_connections_are_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("pool.db");
        let _writer = crate::db::open_database(&path).unwrap();
        let pool = ReadPool::open(&path, 2).unwrap();

        let first = pool.get().unwrap().unwrap();
        let second = pool.get().unwrap().unwrap();
        assert!(!std::ptr::eq(&*first, &*second));
    }
}
