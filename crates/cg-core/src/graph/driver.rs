//! Shared handle to the graph database

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::graph::GraphTx;
use crate::{Error, Result};

/// Default time a writer waits for another connection's write lock
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS graph_nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_graph_nodes_label ON graph_nodes(label);

CREATE TABLE IF NOT EXISTS graph_properties (
    node_id INTEGER NOT NULL REFERENCES graph_nodes(id),
    key TEXT NOT NULL,
    value,
    PRIMARY KEY (node_id, key)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_graph_properties_lookup ON graph_properties(key, value);

CREATE TABLE IF NOT EXISTS graph_relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rel_type TEXT NOT NULL,
    start_id INTEGER NOT NULL REFERENCES graph_nodes(id),
    end_id INTEGER NOT NULL REFERENCES graph_nodes(id)
);
CREATE INDEX IF NOT EXISTS idx_graph_relationships_start ON graph_relationships(start_id, rel_type);
CREATE INDEX IF NOT EXISTS idx_graph_relationships_end ON graph_relationships(end_id);
";

/// Cloneable handle to a property graph stored in SQLite
///
/// All clones share one write connection. Separate drivers opened on the
/// same file coordinate through SQLite's own locking: [`write`](Self::write)
/// takes the database write lock when the transaction begins, so writers
/// are serialized no matter which process or handle they come from.
///
/// File graphs also get a query-only read connection. [`read`](Self::read)
/// runs there against a WAL snapshot and never waits for a writer, nor a
/// writer for it. In-memory graphs have a single connection for both.
#[derive(Clone)]
pub struct GraphDriver {
    conn: Arc<Mutex<Connection>>,
    reader: Option<Arc<Mutex<Connection>>>,
    location: Option<PathBuf>,
}

impl GraphDriver {
    /// Open (or create) a graph database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open a graph database file with a custom busy timeout
    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening graph database at: {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Graph database journal mode: {}", mode);

        let mut driver = Self::init(conn, Some(path.to_path_buf()))?;

        let reader = Connection::open(path)?;
        reader.busy_timeout(busy_timeout)?;
        reader.pragma_update(None, "query_only", true)?;
        driver.reader = Some(Arc::new(Mutex::new(reader)));

        info!("GraphDriver initialized at {}", path.display());
        Ok(driver)
    }

    /// Create a private in-memory graph (useful for testing)
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    /// Wrap an already configured connection
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let location = conn.path().filter(|p| !p.is_empty()).map(PathBuf::from);
        Self::init(conn, location)
    }

    fn init(conn: Connection, location: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            reader: None,
            location,
        })
    }

    /// Database file backing this driver, `None` for in-memory graphs
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Run `f` inside a write transaction
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back
    /// otherwise, so a failed unit of work leaves no partial graph behind.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&GraphTx<'_>) -> Result<T>,
    {
        self.run(&self.conn, TransactionBehavior::Immediate, f)
    }

    /// Run `f` inside a read transaction; it sees one consistent snapshot
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&GraphTx<'_>) -> Result<T>,
    {
        let conn = self.reader.as_ref().unwrap_or(&self.conn);
        self.run(conn, TransactionBehavior::Deferred, f)
    }

    fn run<T, F>(&self, conn: &Mutex<Connection>, behavior: TransactionBehavior, f: F) -> Result<T>
    where
        F: FnOnce(&GraphTx<'_>) -> Result<T>,
    {
        let mut conn = lock(conn)?;
        let tx = GraphTx::new(conn.transaction_with_behavior(behavior)?);
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| Error::ConnectionPoisoned)
}

impl std::fmt::Debug for GraphDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDriver")
            .field("location", &self.location)
            .field("separate_reader", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PropertyValue;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_has_no_location() -> Result<()> {
        let driver = GraphDriver::in_memory()?;
        assert!(driver.location().is_none());
        Ok(())
    }

    #[test]
    fn test_file_graph_persists_across_handles() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("graph.db");

        {
            let driver = GraphDriver::open(&path)?;
            assert_eq!(driver.location(), Some(path.as_path()));
            driver.write(|tx| tx.merge_node("Session", "id", &"kept".into()))?;
        }

        let reopened = GraphDriver::open(&path)?;
        let found = reopened.read(|tx| tx.find_node("Session", "id", &PropertyValue::from("kept")))?;
        assert!(found.is_some());
        Ok(())
    }

    #[test]
    fn test_clones_share_connection() -> Result<()> {
        let driver = GraphDriver::in_memory()?;
        let clone = driver.clone();
        clone.write(|tx| tx.merge_node("Session", "id", &"shared".into()))?;

        let found = driver.read(|tx| tx.find_node("Session", "id", &"shared".into()))?;
        assert!(found.is_some());
        Ok(())
    }

    #[test]
    fn test_relationships_require_existing_nodes() -> Result<()> {
        let driver = GraphDriver::in_memory()?;
        let result = driver.write(|tx| tx.relate(1, "HAS_MESSAGE", 2));
        assert!(matches!(result, Err(Error::Persistence(_))));
        Ok(())
    }

    #[test]
    fn test_read_in_flight_does_not_block_writer() -> Result<()> {
        let dir = TempDir::new()?;
        let driver = GraphDriver::open(dir.path().join("graph.db"))?;
        driver.write(|tx| tx.merge_node("Session", "id", &"before".into()))?;

        let (started_tx, started_rx) = mpsc::channel();
        let reader = driver.clone();
        let handle = thread::spawn(move || -> Result<bool> {
            reader.read(|tx| {
                let seen = tx.find_node("Session", "id", &"before".into())?.is_some();
                let _ = started_tx.send(());
                thread::sleep(Duration::from_millis(1500));
                // Still the snapshot taken before the concurrent write
                let later = tx.find_node("Session", "id", &"during".into())?.is_some();
                Ok(seen && !later)
            })
        });

        started_rx
            .recv()
            .map_err(|_| Error::MalformedRecord("reader thread exited early".into()))?;
        let start = Instant::now();
        driver.write(|tx| tx.merge_node("Session", "id", &"during".into()))?;
        let waited = start.elapsed();
        assert!(waited < Duration::from_millis(750), "writer waited {:?} behind a read", waited);

        assert!(handle.join().expect("reader thread panicked")?);
        let found = driver.read(|tx| tx.find_node("Session", "id", &"during".into()))?;
        assert!(found.is_some());
        Ok(())
    }

    #[test]
    fn test_file_reader_is_query_only() -> Result<()> {
        let dir = TempDir::new()?;
        let driver = GraphDriver::open(dir.path().join("graph.db"))?;
        let result = driver.read(|tx| tx.merge_node("Session", "id", &"nope".into()));
        assert!(matches!(result, Err(Error::Persistence(_))));
        Ok(())
    }
}
