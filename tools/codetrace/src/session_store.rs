use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::errors::CodetraceError;
use crate::evaluation::StoredEvaluation;
use crate::logging::append_run_log;
use crate::session::{Event, EventKind, Session, SessionSummary};

const READ_POOL_SIZE: usize = 2;

type StoreResult<T> = Result<T, CodetraceError>;

#[derive(Debug)]
enum WriteCmd {
    Save {
        session: Box<Session>,
        now: i64,
        reply: oneshot::Sender<StoreResult<usize>>,
    },
}

/// SQLite-backed archive of finalized sessions. All writes go through one
/// writer thread; reads use a small pool of read-only connections.
pub struct SessionStore {
    write_tx: Option<mpsc::Sender<WriteCmd>>,
    read_pool: ReadPool,
    writer_join: Option<thread::JoinHandle<()>>,
    db_path: PathBuf,
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        // Closing the sender ends the writer loop; joining flushes it.
        drop(self.write_tx.take());
        if let Some(handle) = self.writer_join.take() {
            let _ = handle.join();
        }
    }
}

impl SessionStore {
    fn sender(&self) -> StoreResult<&mpsc::Sender<WriteCmd>> {
        self.write_tx
            .as_ref()
            .ok_or_else(|| CodetraceError::Database("store is closed".to_string()))
    }

    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        append_run_log(
            "info",
            "session_store.open",
            json!({ "path": path.display().to_string() }),
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CodetraceError::Database(e.to_string()))?;
        }

        let existed_before_open = path.exists();
        if existed_before_open {
            let meta = std::fs::metadata(&path)
                .map_err(|e| CodetraceError::Database(e.to_string()))?;
            if meta.len() == 0 {
                return Err(CodetraceError::Database(format!(
                    "session database is 0 bytes (corrupt): {}",
                    path.display()
                )));
            }
        }

        let mut write_conn = Connection::open(&path).map_err(db_err)?;
        configure_write_connection(&write_conn)?;

        if existed_before_open {
            let integrity: String = write_conn
                .pragma_query_value(None, "quick_check", |row| row.get(0))
                .map_err(db_err)?;
            if integrity != "ok" {
                return Err(CodetraceError::Database(format!(
                    "session database failed integrity check: {integrity}"
                )));
            }
        }

        run_migrations(&mut write_conn)?;

        let (write_tx, mut write_rx) = mpsc::channel(32);
        let writer_join = thread::spawn(move || {
            while let Some(cmd) = write_rx.blocking_recv() {
                match cmd {
                    WriteCmd::Save {
                        session,
                        now,
                        reply,
                    } => {
                        let result = save_session(&mut write_conn, &session, now);
                        let _ = reply.send(result);
                    }
                }
            }
        });

        let read_pool = ReadPool::open(&path, READ_POOL_SIZE)?;
        append_run_log(
            "info",
            "session_store.opened",
            json!({ "path": path.display().to_string() }),
        );
        Ok(Self {
            write_tx: Some(write_tx),
            read_pool,
            writer_join: Some(writer_join),
            db_path: path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Insert or replace a session together with its full event log.
    /// Returns the number of events written.
    pub fn save_session(&self, session: &Session) -> StoreResult<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender()?
            .blocking_send(WriteCmd::Save {
                session: Box::new(session.clone()),
                now: system_time_unix(),
                reply: reply_tx,
            })
            .map_err(|e| CodetraceError::Database(e.to_string()))?;
        let result = reply_rx
            .blocking_recv()
            .map_err(|e| CodetraceError::Database(e.to_string()))?;
        match &result {
            Ok(events) => append_run_log(
                "info",
                "session_store.session.saved",
                json!({
                    "session_id": session.id,
                    "events": events,
                    "evaluated": session.evaluation.is_some(),
                }),
            ),
            Err(e) => append_run_log(
                "error",
                "session_store.session.save_failed",
                json!({ "session_id": session.id, "error": e.to_string() }),
            ),
        }
        result
    }

    pub fn load_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let loaded = self.read_pool.with_conn(|conn| fetch_session(conn, session_id));
        match &loaded {
            Ok(Some(session)) => append_run_log(
                "debug",
                "session_store.session.loaded",
                json!({ "session_id": session_id, "events": session.events.len() }),
            ),
            Ok(None) => append_run_log(
                "debug",
                "session_store.session.missing",
                json!({ "session_id": session_id }),
            ),
            Err(e) => append_run_log(
                "error",
                "session_store.session.load_failed",
                json!({ "session_id": session_id, "error": e.to_string() }),
            ),
        }
        loaded
    }

    /// Newest first.
    pub fn list_sessions(&self) -> StoreResult<Vec<SessionSummary>> {
        self.read_pool.with_conn(|conn| {
            let mut statement = conn
                .prepare(
                    "SELECT s.session_id, s.problem_statement, s.completed_at,
                            (SELECT COUNT(*) FROM session_events e WHERE e.session_id = s.session_id),
                            s.evaluation_json IS NOT NULL
                     FROM sessions s
                     ORDER BY s.completed_at DESC, s.stored_at DESC",
                )
                .map_err(db_err)?;
            let rows = statement
                .query_map([], |row| {
                    let completed_at: i64 = row.get(2)?;
                    let event_count: i64 = row.get(3)?;
                    Ok(SessionSummary {
                        id: row.get(0)?,
                        problem_statement: row.get(1)?,
                        completed_at: completed_at.max(0) as u64,
                        event_count: event_count.max(0) as usize,
                        evaluated: row.get(4)?,
                    })
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    pub fn latest_session_id(&self) -> StoreResult<Option<String>> {
        self.read_pool.with_conn(|conn| {
            conn.query_row(
                "SELECT session_id FROM sessions ORDER BY completed_at DESC, stored_at DESC LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)
        })
    }
}

#[derive(Clone)]
struct ReadPool {
    conns: Arc<Vec<Mutex<Connection>>>,
    next: Arc<AtomicUsize>,
}

impl ReadPool {
    fn open(path: &Path, size: usize) -> StoreResult<Self> {
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(db_err)?;
            conn.busy_timeout(std::time::Duration::from_secs(3))
                .map_err(db_err)?;
            conns.push(Mutex::new(conn));
        }
        Ok(Self {
            conns: Arc::new(conns),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let guard = self.conns[idx]
            .lock()
            .map_err(|_| CodetraceError::Database("read connection lock poisoned".to_string()))?;
        f(&guard)
    }
}

fn configure_write_connection(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "FULL")
        .map_err(db_err)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(db_err)?;
    Ok(())
}

fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let migrations = [(1_i64, include_str!("../migrations/0001_sessions.sql"))];

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL);",
    )
    .map_err(db_err)?;

    for (version, sql) in migrations {
        let applied = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1 LIMIT 1",
                [version],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?
            .is_some();
        if applied {
            continue;
        }

        append_run_log(
            "info",
            "session_store.migration.applying",
            json!({ "version": version }),
        );
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute_batch(sql).map_err(db_err)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, system_time_unix()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
    }
    Ok(())
}

fn save_session(conn: &mut Connection, session: &Session, now: i64) -> StoreResult<usize> {
    let evaluation_json = session
        .evaluation
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| CodetraceError::Database(e.to_string()))?;

    let tx = conn.transaction().map_err(db_err)?;
    tx.execute(
        "INSERT INTO sessions (
            session_id, problem_statement, started_at, completed_at, final_code, evaluation_json, stored_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(session_id) DO UPDATE SET
            problem_statement = excluded.problem_statement,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at,
            final_code = excluded.final_code,
            evaluation_json = excluded.evaluation_json,
            stored_at = excluded.stored_at",
        params![
            session.id,
            session.problem_statement,
            session.started_at as i64,
            session.completed_at as i64,
            session.final_code,
            evaluation_json,
            now,
        ],
    )
    .map_err(db_err)?;
    tx.execute(
        "DELETE FROM session_events WHERE session_id = ?1",
        params![session.id],
    )
    .map_err(db_err)?;
    {
        let mut insert = tx
            .prepare(
                "INSERT INTO session_events (
                    session_id, seq, timestamp_ms, kind, description, buffer_snapshot, detail
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(db_err)?;
        for (seq, event) in session.events.iter().enumerate() {
            insert
                .execute(params![
                    session.id,
                    seq as i64,
                    event.timestamp as i64,
                    event.kind.as_str(),
                    event.description,
                    event.buffer_snapshot,
                    event.detail,
                ])
                .map_err(db_err)?;
        }
    }
    tx.commit().map_err(db_err)?;
    Ok(session.events.len())
}

fn fetch_session(conn: &Connection, session_id: &str) -> StoreResult<Option<Session>> {
    let header = conn
        .query_row(
            "SELECT problem_statement, started_at, completed_at, final_code, evaluation_json
             FROM sessions WHERE session_id = ?1",
            params![session_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()
        .map_err(db_err)?;
    let Some((problem_statement, started_at, completed_at, final_code, evaluation_json)) = header
    else {
        return Ok(None);
    };

    let evaluation = evaluation_json
        .map(|raw| serde_json::from_str::<StoredEvaluation>(&raw))
        .transpose()
        .map_err(|e| {
            CodetraceError::Database(format!("session {session_id} evaluation is malformed: {e}"))
        })?;

    let mut statement = conn
        .prepare(
            "SELECT timestamp_ms, kind, description, buffer_snapshot, detail
             FROM session_events WHERE session_id = ?1 ORDER BY seq ASC",
        )
        .map_err(db_err)?;
    let events = statement
        .query_map(params![session_id], row_to_event)
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;

    Ok(Some(Session {
        id: session_id.to_string(),
        problem_statement,
        started_at: started_at.max(0) as u64,
        completed_at: completed_at.max(0) as u64,
        final_code,
        events,
        evaluation,
    }))
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let timestamp: i64 = row.get(0)?;
    let kind: String = row.get(1)?;
    Ok(Event {
        timestamp: u64::try_from(timestamp).map_err(|_| invalid_column(0, "negative timestamp"))?,
        kind: EventKind::from_db(&kind).ok_or_else(|| invalid_column(1, "invalid kind"))?,
        description: row.get(2)?,
        buffer_snapshot: row.get(3)?,
        detail: row.get(4)?,
    })
}

fn invalid_column(index: usize, message: &'static str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn db_err(error: rusqlite::Error) -> CodetraceError {
    CodetraceError::Database(error.to_string())
}

pub fn system_time_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
