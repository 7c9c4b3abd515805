//! Message metadata as returned by a [`Fetcher`](crate::fetch::Fetcher).

use chrono::{DateTime, FixedOffset};

use super::attachment::AttachmentPart;
use crate::error::FetchError;
use crate::parser::date::parse_date;

/// Headers and attachment parts of one message. The body is never loaded.
#[derive(Debug, Clone, Default)]
pub struct MessageMeta {
    /// Provider message id.
    pub id: String,

    /// Top-level headers in order, names as sent.
    pub headers: Vec<(String, String)>,

    /// Filename-bearing parts, collected from nested multiparts in document order.
    pub parts: Vec<AttachmentPart>,
}

impl MessageMeta {
    /// Get the first value for a header name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the send timestamp from the `Date` header.
    ///
    /// The sender's UTC offset is kept so year and month match the date the
    /// sender wrote.
    pub fn sent_at(&self) -> Result<DateTime<FixedOffset>, FetchError> {
        let value = self.header("Date").ok_or_else(|| FetchError::MissingDate {
            message_id: self.id.clone(),
        })?;
        parse_date(value).ok_or_else(|| FetchError::InvalidDate {
            message_id: self.id.clone(),
            value: value.to_string(),
        })
    }

    /// Whether any filename-bearing part exists.
    pub fn has_attachments(&self) -> bool {
        !self.parts.is_empty()
    }
}
