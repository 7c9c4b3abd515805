//! Credential capability for the provider client.
//!
//! The consent flow that first produces a token file happens out of band.
//! This module only loads that file and refreshes the access token when
//! it is about to expire.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AuthError;

/// Default OAuth token endpoint.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are refreshed ahead of time.
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// A bearer token ready to attach to a request.
#[derive(Clone)]
pub struct Credential {
    pub access_token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Anything that can hand out a currently valid credential.
pub trait CredentialProvider {
    fn get_valid_credential(&mut self) -> Result<Credential, AuthError>;

    /// Forget any cached token so the next call obtains a fresh one.
    fn invalidate(&mut self) {}
}

/// A fixed token, e.g. from `MAILHARVEST_ACCESS_TOKEN`. Never refreshed.
pub struct StaticCredential(pub String);

impl CredentialProvider for StaticCredential {
    fn get_valid_credential(&mut self) -> Result<Credential, AuthError> {
        Ok(Credential {
            access_token: self.0.clone(),
        })
    }
}

/// Authorized-user token file as written by Google's client libraries.
///
/// Unknown fields (`scopes`, `universe_domain`, ...) are carried through on rewrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizedUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthorizedUser {
    /// Parsed `expiry`. Values without an offset are UTC.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.expiry.as_deref()?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|ndt| ndt.and_utc())
    }

    /// The access token, if it is present and not about to expire at `now`.
    ///
    /// A token without a known expiry is trusted until the provider rejects it.
    pub fn fresh_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        match self.expires_at() {
            Some(exp) if exp - Duration::seconds(EXPIRY_SKEW_SECONDS) <= now => None,
            _ => Some(token),
        }
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct RefreshErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Credentials backed by a token file, refreshed in place when expired.
pub struct TokenFileCredentials {
    path: PathBuf,
    http: reqwest::blocking::Client,
    user: Option<AuthorizedUser>,
}

impl TokenFileCredentials {
    pub fn new(path: impl Into<PathBuf>, http: reqwest::blocking::Client) -> Self {
        Self {
            path: path.into(),
            http,
            user: None,
        }
    }

    fn load(&mut self) -> Result<&mut AuthorizedUser, AuthError> {
        if self.user.is_none() {
            self.user = Some(read_token_file(&self.path)?);
        }
        self.user
            .as_mut()
            .ok_or_else(|| AuthError::ReauthRequired("token file not loaded".into()))
    }

    fn refresh(&mut self) -> Result<Credential, AuthError> {
        let http = self.http.clone();
        let path = self.path.clone();
        let user = self.load()?;

        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            user.refresh_token.clone(),
            user.client_id.clone(),
            user.client_secret.clone(),
        ) else {
            return Err(AuthError::ReauthRequired(format!(
                "{} has no refresh material",
                path.display()
            )));
        };
        let token_uri = user
            .token_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());

        debug!(token_uri = %token_uri, "Refreshing access token");
        let response = http
            .post(&token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(match serde_json::from_str::<RefreshErrorBody>(&body) {
                Ok(err) if err.error == "invalid_grant" => AuthError::ReauthRequired(
                    err.error_description
                        .unwrap_or_else(|| "refresh token revoked or expired".into()),
                ),
                Ok(err) => AuthError::RefreshFailed(format!("HTTP {status}: {}", err.error)),
                Err(_) => AuthError::RefreshFailed(format!("HTTP {status}")),
            });
        }

        let refreshed: RefreshResponse = response
            .json()
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        user.token = Some(refreshed.access_token.clone());
        user.expiry = refreshed.expires_in.map(|secs| {
            (Utc::now() + Duration::seconds(secs)).to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
        });
        if let Some(rotated) = refreshed.refresh_token {
            user.refresh_token = Some(rotated);
        }
        write_token_file(&path, user)?;
        info!(path = %path.display(), "Refreshed access token");

        Ok(Credential {
            access_token: refreshed.access_token,
        })
    }
}

impl CredentialProvider for TokenFileCredentials {
    fn get_valid_credential(&mut self) -> Result<Credential, AuthError> {
        let user = self.load()?;
        if let Some(token) = user.fresh_token(Utc::now()) {
            return Ok(Credential {
                access_token: token.to_string(),
            });
        }
        self.refresh()
    }

    fn invalidate(&mut self) {
        if let Some(user) = self.user.as_mut() {
            user.token = None;
        }
    }
}

/// Read and parse a token file.
pub fn read_token_file(path: &Path) -> Result<AuthorizedUser, AuthError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AuthError::ReauthRequired(format!(
                "token file {} not found",
                path.display()
            )));
        }
        Err(source) => {
            return Err(AuthError::TokenFile {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&contents).map_err(|source| AuthError::MalformedToken {
        path: path.to_path_buf(),
        source,
    })
}

fn write_token_file(path: &Path, user: &AuthorizedUser) -> Result<(), AuthError> {
    let json = serde_json::to_string_pretty(user).map_err(|source| AuthError::MalformedToken {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(|source| AuthError::TokenFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_JSON: &str = r#"{
        "token": "ya29.a0AfH6",
        "refresh_token": "1//0gLx",
        "token_uri": "https://oauth2.googleapis.com/token",
        "client_id": "123.apps.googleusercontent.com",
        "client_secret": "shh",
        "scopes": ["https://www.googleapis.com/auth/gmail.readonly"],
        "universe_domain": "googleapis.com",
        "expiry": "2024-05-01T12:00:00.123456Z"
    }"#;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_token_file_keeps_unknown_fields() {
        let user: AuthorizedUser = serde_json::from_str(TOKEN_JSON).unwrap();
        assert_eq!(user.client_id.as_deref(), Some("123.apps.googleusercontent.com"));
        assert!(user.extra.contains_key("scopes"));

        let rewritten = serde_json::to_string(&user).unwrap();
        assert!(rewritten.contains("universe_domain"));
    }

    #[test]
    fn test_fresh_token_respects_expiry_skew() {
        let user: AuthorizedUser = serde_json::from_str(TOKEN_JSON).unwrap();
        assert_eq!(
            user.fresh_token(at("2024-05-01T11:00:00Z")),
            Some("ya29.a0AfH6")
        );
        assert_eq!(user.fresh_token(at("2024-05-01T11:59:30Z")), None);
        assert_eq!(user.fresh_token(at("2024-06-01T00:00:00Z")), None);
    }

    #[test]
    fn test_naive_expiry_is_utc() {
        let user = AuthorizedUser {
            expiry: Some("2024-05-01T12:00:00".into()),
            ..Default::default()
        };
        assert_eq!(user.expires_at(), Some(at("2024-05-01T12:00:00Z")));
    }

    #[test]
    fn test_token_without_expiry_is_trusted() {
        let user = AuthorizedUser {
            token: Some("abc".into()),
            ..Default::default()
        };
        assert_eq!(user.fresh_token(Utc::now()), Some("abc"));
    }

    #[test]
    fn test_missing_file_requires_reauth() {
        let dir = tempfile::tempdir().unwrap();
        let mut creds = TokenFileCredentials::new(
            dir.path().join("token.json"),
            reqwest::blocking::Client::new(),
        );
        assert!(matches!(
            creds.get_valid_credential(),
            Err(AuthError::ReauthRequired(_))
        ));
    }

    #[test]
    fn test_expired_without_refresh_token_requires_reauth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(
            &path,
            r#"{"token": "old", "expiry": "2000-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let mut creds = TokenFileCredentials::new(&path, reqwest::blocking::Client::new());
        assert!(matches!(
            creds.get_valid_credential(),
            Err(AuthError::ReauthRequired(_))
        ));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            read_token_file(&path),
            Err(AuthError::MalformedToken { .. })
        ));
    }

    #[test]
    fn test_static_credential() {
        let mut creds = StaticCredential("tok".into());
        assert_eq!(creds.get_valid_credential().unwrap().access_token, "tok");
    }
}
