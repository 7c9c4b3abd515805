//! Centralized error types for mailharvest.
//!
//! Every component has its own error enum. [`HarvestError`] wraps them all
//! and decides which ones abort a run ([`HarvestError::is_fatal`]).

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailharvest library.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// I/O error with the associated file path (directory creation, staging write).
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Credential failure. The operator must re-authenticate out of band.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A per-item call to the mail provider failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Listing the messages of a label failed; there is nothing to iterate.
    #[error("Could not list messages for label '{label}': {source}")]
    Listing {
        label: String,
        #[source]
        source: FetchError,
    },

    /// Ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A staged file could not be moved into place.
    #[error(transparent)]
    Relocate(#[from] RelocateError),

    /// The configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, HarvestError>`.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run.
    ///
    /// Auth, listing, ledger storage and configuration failures are fatal.
    /// Everything else is scoped to one message or attachment.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Auth(_) | Self::Listing { .. } | Self::Config(_) => true,
            Self::Fetch(e) => e.is_auth(),
            Self::Ledger(e) => e.is_fatal(),
            Self::Io { .. } | Self::Relocate(_) => false,
        }
    }
}

/// Credential errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No usable token; the consent flow has to be run again.
    #[error("Re-authentication required: {0}")]
    ReauthRequired(String),

    /// The token file could not be read or written.
    #[error("Token file error on '{path}': {source}")]
    TokenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The token file is not valid JSON of the expected shape.
    #[error("Malformed token file '{path}': {source}")]
    MalformedToken {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The token endpoint refused to refresh the access token.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The provider rejected the credential.
    #[error("Credential rejected by provider (HTTP {status})")]
    Rejected { status: u16 },
}

/// Errors from the mail provider.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Network or TLS failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The message has no `Date` header.
    #[error("Message {message_id} has no Date header")]
    MissingDate { message_id: String },

    /// The `Date` header could not be parsed.
    #[error("Message {message_id} has an unparseable Date header: '{value}'")]
    InvalidDate { message_id: String, value: String },
}

impl FetchError {
    /// Whether this failure comes from the credential rather than the item.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The pair is already recorded. Callers treat this as already satisfied.
    #[error("Attachment {attachment_id} of message {message_id} is already recorded")]
    DuplicateEntry {
        message_id: String,
        attachment_id: String,
    },

    /// Refused to record a destination that does not exist on disk.
    #[error("Destination does not exist: {0}")]
    MissingDestination(PathBuf),

    /// The database location cannot be prepared.
    #[error("Ledger at '{path}' is unreachable: {source}")]
    Unreachable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The underlying store failed or is corrupt.
    #[error("Ledger storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl LedgerError {
    /// Storage failures abort the run; the other variants are per item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Unreachable { .. })
    }
}

/// Relocation errors.
#[derive(Error, Debug)]
pub enum RelocateError {
    /// Every attempt failed. The staged file is still at `staged`.
    #[error("Could not move '{staged}' to '{destination}' after {attempts} attempt(s): {source}")]
    Exhausted {
        staged: PathBuf,
        destination: PathBuf,
        attempts: u32,
        source: std::io::Error,
    },
}
