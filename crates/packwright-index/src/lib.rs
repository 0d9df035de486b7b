//! # packwright-index
//!
//! Path-keyed metadata sidecar for a vault.
//!
//! Stores one JSON payload per vault path in SQLite and keeps the rows
//! consistent with the tree by following the vault's change events:
//! renames and moves re-key rows, deletes drop them, copies duplicate
//! them. The vault never reads or writes the index; consumers own the
//! payloads.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use packwright_vault::{ChangeEvent, SharedChangeBus};

/// Errors from the metadata store.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("payload error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    path TEXT PRIMARY KEY,
    payload TEXT NOT NULL
);
"#;

/// One indexed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub path: String,
    pub payload: Value,
}

/// SQLite-backed `path → payload` store.
///
/// Handles are cheap clones over one shared connection.
#[derive(Clone)]
pub struct MetaStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore").finish_non_exhaustive()
    }
}

impl MetaStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> IndexResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests and scratch indexes.
    pub fn in_memory() -> IndexResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // =========================================================================
    // Owner-facing API
    // =========================================================================

    /// Insert or replace the payload for a path.
    pub fn upsert(&self, path: &str, payload: &Value) -> IndexResult<()> {
        let text = serde_json::to_string(payload)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO meta (path, payload) VALUES (?1, ?2)",
            params![path, text],
        )?;
        Ok(())
    }

    /// Payload for a path, if indexed.
    pub fn get(&self, path: &str) -> IndexResult<Option<Value>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT payload FROM meta WHERE path = ?1")?;
        let mut rows = stmt.query(params![path])?;
        if let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&text)?))
        } else {
            Ok(None)
        }
    }

    /// Drop the row for a path. Returns whether one existed.
    pub fn remove(&self, path: &str) -> IndexResult<bool> {
        let n = self
            .conn
            .lock()
            .execute("DELETE FROM meta WHERE path = ?1", params![path])?;
        Ok(n > 0)
    }

    /// Rows for a path and everything under it, path-sorted.
    pub fn list_prefix(&self, prefix: &str) -> IndexResult<Vec<MetaRecord>> {
        let conn = self.conn.lock();
        let pattern = format!("{}/%", escape_like(prefix));
        let mut stmt = conn.prepare(
            "SELECT path, payload FROM meta
             WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'
             ORDER BY path",
        )?;
        let rows = stmt.query_map(params![prefix, pattern], |row| {
            let path: String = row.get(0)?;
            let text: String = row.get(1)?;
            Ok((path, text))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (path, text) = row?;
            records.push(MetaRecord {
                path,
                payload: serde_json::from_str(&text)?,
            });
        }
        Ok(records)
    }

    pub fn len(&self) -> IndexResult<usize> {
        let n: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM meta", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> IndexResult<bool> {
        Ok(self.len()? == 0)
    }

    // =========================================================================
    // Event-driven maintenance
    // =========================================================================

    /// Re-key the row at `old` and every row under `old + "/"` to live
    /// under `new`. Substitution is exact-prefix, so `ab.txt` is never
    /// dragged along by a re-key of `a`. Returns the number of rows moved.
    pub fn repath(&self, old: &str, new: &str) -> IndexResult<usize> {
        let conn = self.conn.lock();
        let mut moved = conn.execute(
            "UPDATE OR REPLACE meta SET path = ?2 WHERE path = ?1",
            params![old, new],
        )?;

        let pattern = format!("{}/%", escape_like(old));
        let descendants: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT path FROM meta WHERE path LIKE ?1 ESCAPE '\\' ORDER BY path")?;
            let rows = stmt.query_map(params![pattern], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for path in descendants {
            let new_path = format!("{new}{}", &path[old.len()..]);
            moved += conn.execute(
                "UPDATE OR REPLACE meta SET path = ?2 WHERE path = ?1",
                params![path, new_path],
            )?;
        }
        Ok(moved)
    }

    /// Drop the row for `path` and every row under it. Returns the
    /// number of rows removed.
    pub fn remove_subtree(&self, path: &str) -> IndexResult<usize> {
        let pattern = format!("{}/%", escape_like(path));
        let n = self.conn.lock().execute(
            "DELETE FROM meta WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'",
            params![path, pattern],
        )?;
        Ok(n)
    }

    /// Duplicate the row at `from` and every row under it to `to`.
    /// Returns the number of rows written.
    pub fn copy_rows(&self, from: &str, to: &str) -> IndexResult<usize> {
        let records = self.list_prefix(from)?;
        let conn = self.conn.lock();
        let mut copied = 0;
        for record in records {
            let new_path = format!("{to}{}", &record.path[from.len()..]);
            let text = serde_json::to_string(&record.payload)?;
            copied += conn.execute(
                "INSERT OR REPLACE INTO meta (path, payload) VALUES (?1, ?2)",
                params![new_path, text],
            )?;
        }
        Ok(copied)
    }
}

/// Escape `\`, `%` and `_` so a path can sit inside a LIKE pattern with
/// `ESCAPE '\'`.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Follow a vault's change events, keeping the store consistent.
///
/// The subscription starts at the call, so events published earlier are
/// never replayed. Handler errors are logged and swallowed; the next
/// operation touching the same path restores consistency.
pub fn attach(store: MetaStore, bus: &SharedChangeBus) -> JoinHandle<()> {
    let mut sub = bus.subscribe(">");
    tokio::spawn(async move {
        while let Some(msg) = sub.recv().await {
            if let Err(e) = apply(&store, &msg.payload) {
                tracing::warn!(
                    subject = %msg.payload.subject(),
                    error = %e,
                    "index update failed"
                );
            }
        }
        tracing::debug!("change bus closed, index subscriber stopping");
    })
}

fn apply(store: &MetaStore, event: &ChangeEvent) -> IndexResult<()> {
    match event {
        ChangeEvent::FileRenamed { old_path, new_path }
        | ChangeEvent::FileMoved { old_path, new_path }
        | ChangeEvent::DirRenamed { old_path, new_path }
        | ChangeEvent::DirMoved { old_path, new_path } => {
            store.repath(old_path, new_path)?;
        }
        ChangeEvent::FileDeleted { path } | ChangeEvent::DirDeleted { path } => {
            store.remove_subtree(path)?;
        }
        ChangeEvent::FileCopied { from, to } | ChangeEvent::DirCopied { from, to } => {
            store.copy_rows(from, to)?;
        }
        ChangeEvent::FileCreated { .. }
        | ChangeEvent::FileModified { .. }
        | ChangeEvent::DirCreated { .. }
        | ChangeEvent::DirModified { .. } => {}
    }
    Ok(())
}
