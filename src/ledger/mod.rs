//! Durable record of attachments already materialized on disk.
//!
//! Keyed by `(message_id, attachment_id)`. Entries are only ever inserted;
//! nothing here updates or deletes them.

pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::LedgerError;

/// One recorded download.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub message_id: String,
    pub attachment_id: String,
    pub destination_path: PathBuf,
    pub recorded_at: DateTime<Utc>,
}

/// SQLite-backed ledger.
pub struct Ledger {
    conn: Connection,
    path: PathBuf,
}

impl Ledger {
    /// Open (or create) the ledger file, creating parent directories.
    ///
    /// Call [`Ledger::ensure_schema`] before use.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Unreachable {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(schema::PRAGMAS)?;
        debug!(path = %path.display(), "Opened ledger");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// A throwaway ledger for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the table and key index if absent. Safe on every start.
    pub fn ensure_schema(&self) -> Result<(), LedgerError> {
        self.conn.execute_batch(schema::TABLE)?;
        if let Err(e) = self.conn.execute_batch(schema::UNIQUE_KEY) {
            if is_constraint_violation(&e) {
                // Inserts stay conditional, so no new duplicates can appear.
                warn!(
                    path = %self.path.display(),
                    "Ledger already contains duplicate rows; unique key not created"
                );
            } else {
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Whether the pair has been recorded.
    pub fn has(&self, message_id: &str, attachment_id: &str) -> Result<bool, LedgerError> {
        let found = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM downloaded_attachments
                WHERE message_id = ?1 AND attachment_id = ?2
            )",
            params![message_id, attachment_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Record a relocated attachment.
    ///
    /// Fails with [`LedgerError::DuplicateEntry`] if the pair exists and with
    /// [`LedgerError::MissingDestination`] if `destination` is not on disk.
    pub fn record(
        &self,
        message_id: &str,
        attachment_id: &str,
        destination: &Path,
    ) -> Result<(), LedgerError> {
        if !destination.exists() {
            return Err(LedgerError::MissingDestination(destination.to_path_buf()));
        }

        let duplicate = || LedgerError::DuplicateEntry {
            message_id: message_id.to_string(),
            attachment_id: attachment_id.to_string(),
        };

        let inserted = self
            .conn
            .execute(
                schema::INSERT_IF_ABSENT,
                params![
                    message_id,
                    attachment_id,
                    destination.to_string_lossy().into_owned(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    duplicate()
                } else {
                    LedgerError::Storage(e)
                }
            })?;

        if inserted == 0 {
            return Err(duplicate());
        }
        debug!(message_id, attachment_id, path = %destination.display(), "Recorded attachment");
        Ok(())
    }

    /// Look up the entry for a pair.
    pub fn get(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, message_id, attachment_id, file_path, download_date
                 FROM downloaded_attachments
                 WHERE message_id = ?1 AND attachment_id = ?2
                 ORDER BY id LIMIT 1",
                params![message_id, attachment_id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, message_id, attachment_id, file_path, download_date
             FROM downloaded_attachments ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Number of recorded entries.
    pub fn count(&self) -> Result<u64, LedgerError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM downloaded_attachments", [], |row| {
                row.get(0)
            })?;
        Ok(n as u64)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let recorded: String = row.get(4)?;
    let recorded_at = parse_recorded_at(&recorded).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("invalid download_date '{recorded}'").into(),
        )
    })?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        message_id: row.get(1)?,
        attachment_id: row.get(2)?,
        destination_path: PathBuf::from(row.get::<_, String>(3)?),
        recorded_at,
    })
}

/// RFC 3339, or the naive ISO form written by older versions (taken as UTC).
fn parse_recorded_at(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ndt| ndt.and_utc())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
