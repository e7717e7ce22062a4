use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::error;

use crate::error::{AgoraError, ErrorKind, Result};

pub const AGORA_DIR: &str = ".agora";
pub const AGORA_DB: &str = "agora.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    unread_count INTEGER NOT NULL DEFAULT 0,
    last_seen_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS teams (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS team_members (
    team_id INTEGER NOT NULL REFERENCES teams(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    PRIMARY KEY (team_id, user_id)
);

CREATE TABLE IF NOT EXISTS families (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS family_members (
    family_id INTEGER NOT NULL REFERENCES families(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    role TEXT NOT NULL CHECK (role IN ('parent', 'child')),
    PRIMARY KEY (family_id, user_id)
);

CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    parent_id INTEGER REFERENCES nodes(id),
    title TEXT,
    body TEXT NOT NULL,
    author_id INTEGER NOT NULL REFERENCES users(id),
    owner_kind TEXT NOT NULL,
    owner_id INTEGER,
    visibility TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);

CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_title
    ON nodes(kind, COALESCE(parent_id, 0), title)
    WHERE kind IN ('initiative', 'workstream');

CREATE TABLE IF NOT EXISTS node_invited_teams (
    node_id INTEGER NOT NULL REFERENCES nodes(id),
    team_id INTEGER NOT NULL REFERENCES teams(id),
    PRIMARY KEY (node_id, team_id)
);

CREATE TABLE IF NOT EXISTS workstream_approvals (
    initiative_id INTEGER PRIMARY KEY REFERENCES nodes(id),
    workstream_id INTEGER NOT NULL UNIQUE REFERENCES nodes(id),
    approved_by INTEGER NOT NULL REFERENCES users(id),
    approved_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS review_tickets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    node_id INTEGER NOT NULL REFERENCES nodes(id),
    node_kind INTEGER NOT NULL,
    author_id INTEGER NOT NULL REFERENCES users(id),
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    resolved_by INTEGER REFERENCES users(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_one_pending
    ON review_tickets(node_id) WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    recipient_id INTEGER NOT NULL REFERENCES users(id),
    ticket_id INTEGER NOT NULL REFERENCES review_tickets(id),
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id);

CREATE TABLE IF NOT EXISTS reference_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    UNIQUE (category, name)
);

CREATE TABLE IF NOT EXISTS investigations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    workstream_id INTEGER NOT NULL REFERENCES nodes(id),
    kind TEXT NOT NULL,
    step INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    created_by INTEGER NOT NULL REFERENCES users(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    UNIQUE (workstream_id, kind)
);

CREATE TABLE IF NOT EXISTS investigation_selections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES investigations(id),
    step INTEGER NOT NULL,
    reference_id INTEGER NOT NULL REFERENCES reference_items(id),
    UNIQUE (record_id, step, reference_id)
);

CREATE TABLE IF NOT EXISTS investigation_observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES investigations(id),
    step INTEGER NOT NULL,
    sense TEXT NOT NULL,
    detail TEXT NOT NULL,
    UNIQUE (record_id, step, sense)
);

CREATE TABLE IF NOT EXISTS investigation_notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES investigations(id),
    step INTEGER NOT NULL,
    text TEXT NOT NULL,
    UNIQUE (record_id, step)
);
";

/// SQLite-backed persistence for every entity in the workspace
///
/// Each handler owns its own store; concurrent stores on the same file
/// serialize through `BEGIN IMMEDIATE` and the busy timeout.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create `.agora/` under `root` and an empty database inside it
    pub fn init(root: &Path) -> Result<Self> {
        let dir = root.join(AGORA_DIR);
        if dir.exists() {
            return Err(AgoraError::AlreadyInitialized);
        }
        fs::create_dir_all(&dir)?;
        Self::open_path(&dir.join(AGORA_DB))
    }

    /// Open the workspace database under `root`
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(AGORA_DIR).join(AGORA_DB);
        if !path.exists() {
            return Err(AgoraError::NotInitialized);
        }
        Self::open_path(&path)
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.configure()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, path: None };
        store.configure()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn configure(&self) -> Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Read-only access outside a transaction
    pub fn repo(&self) -> Repo<'_> {
        Repo { conn: &self.conn }
    }

    /// Run `op` inside one immediate transaction. Commits on `Ok`, rolls
    /// back on `Err` (the transaction is dropped uncommitted)
    pub fn write<T, F>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnOnce(&Repo<'_>) -> Result<T>,
    {
        let result = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(AgoraError::from)
            .and_then(|tx| {
                let value = op(&Repo { conn: &tx })?;
                tx.commit()?;
                Ok(value)
            });

        if let Err(e) = &result {
            if e.kind() == ErrorKind::Dependency {
                error!(operation, error = %e, "transaction rolled back");
            }
        }
        result
    }
}

/// Query surface over a connection or an open transaction
pub struct Repo<'c> {
    pub(crate) conn: &'c Connection,
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| AgoraError::Integrity(format!("bad timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

pub(crate) fn parse_uuid(value: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| AgoraError::Integrity(format!("bad uuid '{}': {}", value, e)))
}

/// Parse a text column into one of the entity enums
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| AgoraError::Integrity(format!("column {}: {}", column, e)))
}

/// UNIQUE or PRIMARY KEY clash; foreign-key failures are not included
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}
