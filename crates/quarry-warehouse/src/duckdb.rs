//! `DuckDB` connection pool management.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ::duckdb::Connection;

struct PoolInner {
    db_path: PathBuf,
    max_idle: usize,
    /// Root handle; every pooled connection is cloned from it so the process
    /// holds a single database instance per file.
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

/// A small pool of `DuckDB` connections sharing one database instance.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Open the database file and create a pool around it.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    pub fn open(path: impl Into<PathBuf>, max_idle: usize) -> Result<Self, ::duckdb::Error> {
        let db_path = path.into();
        let root = Connection::open(db_path.as_path())?;
        configure_connection(&root)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                db_path,
                max_idle: max_idle.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Acquire a connection from the pool, cloning a new one from the root
    /// handle when the pool is empty.
    ///
    /// # Errors
    /// Returns an error if a new connection cannot be created.
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let reused = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let connection = match reused {
            Some(connection) => connection,
            None => {
                let root = self
                    .inner
                    .root
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let connection = root.try_clone()?;
                configure_connection(&connection)?;
                connection
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }
}

/// A pooled connection that returns to the pool when dropped.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let Ok(mut idle) = self.pool.idle.lock() else {
            return;
        };
        if idle.len() < self.pool.max_idle {
            idle.push(connection);
        }
    }
}

fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn released_connections_are_reused() {
        let temp = tempdir().expect("tempdir");
        let manager =
            DuckDbConnectionManager::open(temp.path().join("pool.duckdb"), 1).expect("open");

        {
            let first = manager.acquire().expect("first");
            first
                .execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1);")
                .expect("write");
        }

        let second = manager.acquire().expect("second");
        let count: i64 = second
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
        assert_eq!(manager.inner.idle.lock().expect("lock").len(), 0);
    }
}
