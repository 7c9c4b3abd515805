//! Ledger DDL.

/// Connection settings applied on every open. `synchronous = FULL` makes each
/// committed insert durable before the call returns.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;
PRAGMA busy_timeout = 5000;
";

/// Table layout, compatible with databases written by earlier versions of the tool.
pub const TABLE: &str = "
CREATE TABLE IF NOT EXISTS downloaded_attachments (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id    TEXT NOT NULL,
    attachment_id TEXT NOT NULL,
    file_path     TEXT NOT NULL,
    download_date TEXT NOT NULL
);
";

/// Natural key. Created separately: legacy files may already hold duplicates.
pub const UNIQUE_KEY: &str = "
CREATE UNIQUE INDEX IF NOT EXISTS idx_downloaded_attachments_key
    ON downloaded_attachments(message_id, attachment_id);
";

/// Insert only when the pair is absent, as one statement.
pub const INSERT_IF_ABSENT: &str = "
INSERT INTO downloaded_attachments (message_id, attachment_id, file_path, download_date)
SELECT ?1, ?2, ?3, ?4
WHERE NOT EXISTS (
    SELECT 1 FROM downloaded_attachments WHERE message_id = ?1 AND attachment_id = ?2
)
";
