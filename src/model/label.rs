//! Provider labels.

/// A mailbox label.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Label {
    /// Opaque id, used in the `gmail.labels` configuration.
    pub id: String,
    /// Display name.
    pub name: String,
    /// `"system"` or `"user"`, when reported.
    pub kind: Option<String>,
}
