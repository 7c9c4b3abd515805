//! Attachment parts and per-attachment work items.
//!
//! Parts describe what the provider reports; the binary payload is only
//! fetched once the ledger says it is needed.

use chrono::{DateTime, FixedOffset};

/// A filename-bearing MIME part of a provider message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AttachmentPart {
    /// Filename as stated by the sender (not yet sanitized).
    pub filename: String,

    /// Provider handle used to download the body. `None` for parts whose
    /// content is inline or referenced elsewhere.
    pub attachment_id: Option<String>,

    /// MIME content type (e.g. `"application/pdf"`).
    pub mime_type: String,

    /// Size in bytes as reported by the provider.
    pub size: u64,
}

/// One attachment to materialize, built per loop iteration and then dropped.
#[derive(Debug, Clone)]
pub struct AttachmentTask {
    pub message_id: String,
    pub attachment_id: String,
    /// Sanitized filename used for staging and the destination.
    pub filename: String,
    /// Send date of the owning message.
    pub source_timestamp: DateTime<FixedOffset>,
}
