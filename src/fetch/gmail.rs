//! Gmail REST API v1 client (read-only).

use std::time::Duration;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::auth::CredentialProvider;
use super::Fetcher;
use crate::config::GmailConfig;
use crate::error::{AuthError, FetchError};
use crate::model::attachment::AttachmentPart;
use crate::model::label::Label;
use crate::model::message::MessageMeta;

/// Gmail sends URL-safe base64 and is inconsistent about padding.
const GMAIL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Page size requested from `messages.list`.
const LIST_PAGE_SIZE: u32 = 500;

/// 403 reasons that are quota throttling rather than a refused credential.
const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

// ── Wire types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: String,
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    attachment_id: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<GmailLabel>,
}

#[derive(Debug, Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorReason {
    #[serde(default)]
    reason: String,
}

// ── Conversions ─────────────────────────────────────────────────

/// Parse a `messages.get` (format=full) response body.
pub fn parse_message(json: &str) -> Result<MessageMeta, FetchError> {
    let msg: GmailMessage =
        serde_json::from_str(json).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(into_meta(msg))
}

fn into_meta(msg: GmailMessage) -> MessageMeta {
    let mut meta = MessageMeta {
        id: msg.id,
        ..Default::default()
    };
    if let Some(payload) = msg.payload {
        meta.headers = payload
            .headers
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect();
        collect_parts(&payload, &mut meta.parts);
    }
    meta
}

/// Depth-first walk collecting every part that carries a filename.
fn collect_parts(part: &MessagePart, out: &mut Vec<AttachmentPart>) {
    if !part.filename.is_empty() {
        out.push(AttachmentPart {
            filename: part.filename.clone(),
            attachment_id: part
                .body
                .as_ref()
                .and_then(|b| b.attachment_id.clone())
                .filter(|id| !id.is_empty()),
            mime_type: part.mime_type.clone(),
            size: part.body.as_ref().map(|b| b.size).unwrap_or(0),
        });
    }
    for child in &part.parts {
        collect_parts(child, out);
    }
}

/// Decode an attachment `data` field.
pub fn decode_attachment_data(data: &str) -> Result<Vec<u8>, FetchError> {
    GMAIL_BASE64
        .decode(data.trim())
        .map_err(|e| FetchError::Decode(format!("attachment data: {e}")))
}

// ── Client ──────────────────────────────────────────────────────

/// Blocking Gmail client.
pub struct GmailClient {
    http: Client,
    credentials: Box<dyn CredentialProvider>,
    api_base: String,
    user_id: String,
}

impl GmailClient {
    pub fn new(
        http: Client,
        credentials: Box<dyn CredentialProvider>,
        api_base: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    /// Build a client from the `[gmail]` configuration section.
    pub fn from_config(
        config: &GmailConfig,
        http: Client,
        credentials: Box<dyn CredentialProvider>,
    ) -> Self {
        Self::new(http, credentials, &config.api_base, &config.user_id)
    }

    /// HTTP client with the configured request timeout.
    pub fn http_client(config: &GmailConfig) -> Result<Client, FetchError> {
        Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("mailharvest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/{}/{path}", self.api_base, self.user_id)
    }

    /// Send an authorized GET, retrying once with a fresh token on 401.
    fn get_json<T: DeserializeOwned>(
        &mut self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = self.url(path);
        let mut retried = false;
        loop {
            let credential = self.credentials.get_valid_credential()?;
            let request: RequestBuilder = self
                .http
                .get(&url)
                .query(query)
                .bearer_auth(&credential.access_token);
            let response = request
                .send()
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            if response.status() == StatusCode::UNAUTHORIZED && !retried {
                debug!(url = %url, "Access token rejected, refreshing");
                self.credentials.invalidate();
                retried = true;
                continue;
            }
            return decode_response(response);
        }
    }

    /// All labels of the mailbox.
    pub fn list_labels(&mut self) -> Result<Vec<Label>, FetchError> {
        let list: LabelList = self.get_json("labels", &[])?;
        Ok(list
            .labels
            .into_iter()
            .map(|l| Label {
                id: l.id,
                name: l.name,
                kind: l.kind,
            })
            .collect())
    }
}

fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(error_for_status(status, &body));
    }
    response
        .json::<T>()
        .map_err(|e| FetchError::Decode(e.to_string()))
}

/// Map a non-success response to an error.
///
/// 401, and 403 for anything but quota throttling, mean the credential was
/// refused. Everything else is an API error scoped to the request.
fn error_for_status(status: StatusCode, body: &str) -> FetchError {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|b| b.error);
    let rate_limited = detail.as_ref().is_some_and(|d| {
        d.errors
            .iter()
            .any(|e| RATE_LIMIT_REASONS.contains(&e.reason.as_str()))
    });

    if status == StatusCode::UNAUTHORIZED || (status == StatusCode::FORBIDDEN && !rate_limited) {
        return FetchError::Auth(AuthError::Rejected {
            status: status.as_u16(),
        });
    }
    let message = detail
        .map(|d| d.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());
    FetchError::Api {
        status: status.as_u16(),
        message,
    }
}

impl Fetcher for GmailClient {
    fn list_messages(&mut self, label: &str) -> Result<Vec<String>, FetchError> {
        let page_size = LIST_PAGE_SIZE.to_string();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("labelIds", label), ("maxResults", page_size.as_str())];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: MessageList = self.get_json("messages", &query)?;
            ids.extend(page.messages.into_iter().map(|m| m.id));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!(label, count = ids.len(), "Listed messages");
        Ok(ids)
    }

    fn get_message(&mut self, message_id: &str) -> Result<MessageMeta, FetchError> {
        let msg: GmailMessage =
            self.get_json(&format!("messages/{message_id}"), &[("format", "full")])?;
        if msg.payload.is_none() {
            warn!(message_id, "Message has no payload");
        }
        Ok(into_meta(msg))
    }

    fn get_attachment_bytes(
        &mut self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, FetchError> {
        let body: AttachmentBody = self.get_json(
            &format!("messages/{message_id}/attachments/{attachment_id}"),
            &[],
        )?;
        decode_attachment_data(&body.data)
    }
}
