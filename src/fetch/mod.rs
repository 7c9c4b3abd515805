//! Access to the mail provider.
//!
//! The pipeline only sees the [`Fetcher`] trait; [`gmail::GmailClient`] is
//! the production implementation and [`auth`] supplies its credentials.

pub mod auth;
pub mod gmail;

use crate::error::FetchError;
use crate::model::message::MessageMeta;

/// Read-only view of a mailbox.
pub trait Fetcher {
    /// Ids of all messages carrying `label`. May be empty.
    fn list_messages(&mut self, label: &str) -> Result<Vec<String>, FetchError>;

    /// Headers and filename-bearing parts of one message.
    fn get_message(&mut self, message_id: &str) -> Result<MessageMeta, FetchError>;

    /// Decoded bytes of one attachment.
    fn get_attachment_bytes(
        &mut self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, FetchError>;
}
