//! Integration tests for the Gmail client against a local mock API.
//!
//! The mock server runs on its own thread; the tokio runtime here only
//! drives setup and inspection, so the blocking client is called from the
//! plain test thread.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mailharvest::error::{AuthError, FetchError, HarvestError};
use mailharvest::fetch::auth::{Credential, CredentialProvider, StaticCredential};
use mailharvest::fetch::gmail::GmailClient;
use mailharvest::fetch::Fetcher;

const LABEL: &str = "Label_8001345254298395342";

struct GmailStub {
    server: MockServer,
    rt: tokio::runtime::Runtime,
}

impl GmailStub {
    fn start() -> Self {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let server = rt.block_on(MockServer::start());
        Self { server, rt }
    }

    fn mount(&self, mock: Mock) {
        self.rt.block_on(mock.mount(&self.server));
    }

    fn client(&self, credentials: Box<dyn CredentialProvider>) -> GmailClient {
        GmailClient::new(
            reqwest::blocking::Client::new(),
            credentials,
            format!("{}/gmail/v1", self.server.uri()),
            "me",
        )
    }

    fn static_client(&self) -> GmailClient {
        self.client(Box::new(StaticCredential("tok".into())))
    }

    fn request_count(&self) -> usize {
        self.rt
            .block_on(self.server.received_requests())
            .unwrap_or_default()
            .len()
    }
}

/// Hands out "stale" until invalidated, then "fresh".
struct RotatingToken {
    current: String,
    invalidations: Rc<Cell<u32>>,
}

impl CredentialProvider for RotatingToken {
    fn get_valid_credential(&mut self) -> Result<Credential, AuthError> {
        Ok(Credential {
            access_token: self.current.clone(),
        })
    }

    fn invalidate(&mut self) {
        self.invalidations.set(self.invalidations.get() + 1);
        self.current = "fresh".to_string();
    }
}

fn message_json() -> serde_json::Value {
    json!({
        "id": "m1",
        "payload": {
            "mimeType": "multipart/mixed",
            "filename": "",
            "headers": [{"name": "Date", "value": "Wed, 15 Mar 2023 10:00:00 +0000"}],
            "parts": [{
                "mimeType": "application/pdf",
                "filename": "invoice.pdf",
                "body": {"attachmentId": "a1", "size": 3}
            }]
        }
    })
}

fn api_error(code: u16, message: &str, reason: &str) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_json(json!({
        "error": {
            "code": code,
            "message": message,
            "errors": [{"reason": reason, "message": message}]
        }
    }))
}

#[test]
fn test_list_messages_follows_page_tokens() {
    let stub = GmailStub::start();
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "m3", "threadId": "t3"}],
                "resultSizeEstimate": 1
            }))),
    );
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("labelIds", LABEL))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "m1", "threadId": "t1"}, {"id": "m2", "threadId": "t2"}],
                "nextPageToken": "p2",
                "resultSizeEstimate": 3
            }))),
    );

    let ids = stub.static_client().list_messages(LABEL).unwrap();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
    assert_eq!(stub.request_count(), 2);
}

#[test]
fn test_empty_label_has_no_messages_field() {
    let stub = GmailStub::start();
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultSizeEstimate": 0}))),
    );

    assert!(stub.static_client().list_messages(LABEL).unwrap().is_empty());
}

#[test]
fn test_attachment_bytes_sent_with_bearer_token() {
    let stub = GmailStub::start();
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1/attachments/a1"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"size": 2, "data": "aGk"})),
            ),
    );

    let bytes = stub.static_client().get_attachment_bytes("m1", "a1").unwrap();
    assert_eq!(bytes, b"hi");
}

#[test]
fn test_rejected_token_is_refreshed_once() {
    let stub = GmailStub::start();
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(api_error(401, "Invalid Credentials", "authError")),
    );
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .and(header("authorization", "Bearer fresh"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_json())),
    );

    let invalidations = Rc::new(Cell::new(0));
    let mut client = stub.client(Box::new(RotatingToken {
        current: "stale".into(),
        invalidations: invalidations.clone(),
    }));

    let meta = client.get_message("m1").unwrap();
    assert_eq!(meta.parts[0].attachment_id.as_deref(), Some("a1"));
    assert_eq!(invalidations.get(), 1);
    assert_eq!(stub.request_count(), 2);
}

#[test]
fn test_second_401_is_fatal() {
    let stub = GmailStub::start();
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(api_error(401, "Invalid Credentials", "authError")),
    );

    let err = stub.static_client().get_message("m1").unwrap_err();
    assert!(matches!(err, FetchError::Auth(AuthError::Rejected { status: 401 })));
    assert!(HarvestError::Fetch(err).is_fatal());
    assert_eq!(stub.request_count(), 2);
}

#[test]
fn test_rate_limited_attachment_is_not_fatal() {
    let stub = GmailStub::start();
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1/attachments/a1"))
            .respond_with(api_error(403, "User-rate limit exceeded.", "userRateLimitExceeded")),
    );

    let err = stub.static_client().get_attachment_bytes("m1", "a1").unwrap_err();
    assert!(matches!(err, FetchError::Api { status: 403, .. }));
    assert!(!HarvestError::Fetch(err).is_fatal());
    assert_eq!(stub.request_count(), 1);
}

#[test]
fn test_missing_permission_is_fatal() {
    let stub = GmailStub::start();
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(api_error(403, "Insufficient Permission", "insufficientPermissions")),
    );

    let err = stub.static_client().get_message("m1").unwrap_err();
    assert!(matches!(err, FetchError::Auth(AuthError::Rejected { status: 403 })));
    assert!(HarvestError::Fetch(err).is_fatal());
}

#[test]
fn test_not_found_carries_api_message() {
    let stub = GmailStub::start();
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/gone"))
            .respond_with(api_error(404, "Requested entity was not found.", "notFound")),
    );

    match stub.static_client().get_message("gone").unwrap_err() {
        FetchError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Requested entity was not found.");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[test]
fn test_list_labels() {
    let stub = GmailStub::start();
    stub.mount(
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "labels": [
                    {"id": "INBOX", "name": "INBOX", "type": "system"},
                    {"id": LABEL, "name": "Invoices", "type": "user"}
                ]
            }))),
    );

    let labels = stub.static_client().list_labels().unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels[1].id, LABEL);
    assert_eq!(labels[1].name, "Invoices");
    assert_eq!(labels[1].kind.as_deref(), Some("user"));
}
