//! Query Store - relational execution boundary
//!
//! The repair loop only sees the [`QueryStore`] trait. [`SqliteStore`] is the
//! bundled adapter: every query runs inside its own transaction, so a failed
//! query never leaves partial effects behind for later calls. A query whose
//! caller gives up (timeout, cancellation) is interrupted and rolled back.

use crate::error::{RepairError, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Scalar cell value returned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

pub type Row = Vec<Value>;

/// Rows produced by one successful execution
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Execute a single query and return all of its rows.
    ///
    /// Failures are reported as [`RepairError::QueryExecution`] with the
    /// engine's message unmodified.
    async fn execute(&self, query: &str) -> Result<QueryOutput>;
}

#[async_trait]
impl<T: QueryStore + ?Sized> QueryStore for Arc<T> {
    async fn execute(&self, query: &str) -> Result<QueryOutput> {
        (**self).execute(query).await
    }
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            interrupt: Arc::new(conn.get_interrupt_handle()),
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a multi-statement script (schema bootstrap, seeding) atomically.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.commit()?;
        Ok(())
    }

    /// `CREATE` statements of every user table, index and view.
    pub fn schema_ddl(&self) -> Result<String> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT sql FROM sqlite_master \
             WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
             ORDER BY type DESC, name",
        )?;
        let statements = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(statements
            .into_iter()
            .map(|s| format!("{};", s.trim()))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RepairError::QueryExecution {
            message: "store connection lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl QueryStore for SqliteStore {
    async fn execute(&self, query: &str) -> Result<QueryOutput> {
        debug!("Executing query: {}", query);
        let conn = Arc::clone(&self.conn);
        let sql = query.to_string();
        let call = Arc::new(CallState::default());
        let mut guard = AbandonOnDrop {
            call: Arc::clone(&call),
            interrupt: Arc::clone(&self.interrupt),
            armed: true,
        };

        let joined = tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| RepairError::QueryExecution {
                message: "store connection lock poisoned".to_string(),
            })?;
            if !call.begin() {
                return Err(abandoned());
            }
            let result = run_in_transaction(&mut conn, &sql, || call.finish());
            call.end();
            result
        })
        .await;
        guard.armed = false;

        joined.map_err(|e| RepairError::QueryExecution {
            message: format!("store task failed: {}", e),
        })?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPhase {
    Queued,
    Running,
    Committing,
    Done,
    Abandoned,
}

/// Phase of one `execute` call, shared between the caller and the blocking task
struct CallState {
    phase: Mutex<CallPhase>,
}

impl Default for CallState {
    fn default() -> Self {
        Self {
            phase: Mutex::new(CallPhase::Queued),
        }
    }
}

impl CallState {
    fn transition(&self, from: CallPhase, to: CallPhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase == from {
            *phase = to;
            true
        } else {
            false
        }
    }

    fn begin(&self) -> bool {
        self.transition(CallPhase::Queued, CallPhase::Running)
    }

    /// Claim the right to commit; false once the caller has given up.
    fn finish(&self) -> bool {
        self.transition(CallPhase::Running, CallPhase::Committing)
    }

    fn end(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase != CallPhase::Abandoned {
            *phase = CallPhase::Done;
        }
    }

    /// Mark the call abandoned and interrupt it if its statement is running.
    ///
    /// The interrupt happens under the phase lock, and the task only leaves
    /// `Running` under that lock too, so it can never hit another call's
    /// statement on the shared connection.
    fn abandon(&self, interrupt: &InterruptHandle) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        match *phase {
            CallPhase::Queued => *phase = CallPhase::Abandoned,
            CallPhase::Running => {
                interrupt.interrupt();
                *phase = CallPhase::Abandoned;
            }
            CallPhase::Committing | CallPhase::Done | CallPhase::Abandoned => {}
        }
    }
}

/// Dropped with the `execute` future when the caller times out or cancels
struct AbandonOnDrop {
    call: Arc<CallState>,
    interrupt: Arc<InterruptHandle>,
    armed: bool,
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if self.armed {
            debug!("Query abandoned by caller, rolling back");
            self.call.abandon(&self.interrupt);
        }
    }
}

fn abandoned() -> RepairError {
    RepairError::QueryExecution {
        message: "query abandoned by caller".to_string(),
    }
}

/// Dropping an uncommitted rusqlite transaction rolls it back, so nothing is
/// kept unless `may_commit` agrees after the statement has run.
fn run_in_transaction(
    conn: &mut Connection,
    sql: &str,
    may_commit: impl FnOnce() -> bool,
) -> Result<QueryOutput> {
    let tx = conn.transaction().map_err(store_error)?;

    let output = {
        let mut stmt = tx.prepare(sql).map_err(store_error)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        let column_count = columns.len();

        let mut rows = stmt.query([]).map_err(store_error)?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next().map_err(store_error)? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                values.push(Value::from(row.get_ref(idx).map_err(store_error)?));
            }
            collected.push(values);
        }

        QueryOutput {
            columns,
            rows: collected,
        }
    };

    if !may_commit() {
        return Err(abandoned());
    }
    tx.commit().map_err(store_error)?;
    Ok(output)
}

fn store_error(e: rusqlite::Error) -> RepairError {
    let message = match e {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg,
        rusqlite::Error::SqlInputError { msg, .. } => msg,
        other => other.to_string(),
    };
    RepairError::QueryExecution { message }
}
