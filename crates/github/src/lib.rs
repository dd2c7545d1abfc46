pub mod signature;
pub mod webhook;

use std::{collections::HashMap, time::Duration};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Method, StatusCode, header};
use serde::Serialize;
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::Mutex;

pub const ACCEPT_HEADER: &str = "application/vnd.github+json";
pub const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("patchpilot/", env!("CARGO_PKG_VERSION"));
const TOKEN_EXPIRY_SKEW: time::Duration = time::Duration::seconds(60);
const PR_FILES_PAGE_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum GitHubApiError {
    #[error("GitHub API request to {url} failed with status {status}")]
    Api { url: String, status: StatusCode, body: Option<Value> },
    #[error("unexpected GitHub API response: {0}")]
    Response(String),
    #[error("failed to encode app JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl GitHubApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Short-lived token scoped to one app installation.
#[derive(Debug, Clone)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub permissions: Option<Value>,
}

impl InstallationToken {
    /// Whether the token is still usable, with a safety margin for clock skew.
    pub fn is_active(&self) -> bool { self.is_active_at(OffsetDateTime::now_utc()) }

    fn is_active_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at - TOKEN_EXPIRY_SKEW > now
    }
}

#[derive(Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: u64,
}

/// GitHub App client for installation-scoped REST operations.
///
/// Holds the app credentials and a per-installation token cache. Tokens are
/// reused while active and refreshed transparently on expiry.
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    app_id: u64,
    encoding_key: EncodingKey,
    tokens: Mutex<HashMap<u64, InstallationToken>>,
}

impl GitHubClient {
    pub fn new(
        api_base_url: &str,
        app_id: u64,
        private_key_pem: &str,
    ) -> Result<Self, GitHubApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(ACCEPT_HEADER));
        headers.insert("X-GitHub-Api-Version", header::HeaderValue::from_static(API_VERSION));
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()?;
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())?;
        Ok(Self {
            http,
            base_url: api_base_url.trim_end_matches('/').to_string(),
            app_id,
            encoding_key,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Build the short-lived app-level assertion used only to mint
    /// installation tokens. Issued-at is skewed into the past to tolerate
    /// clock drift between us and GitHub.
    fn build_app_jwt(&self) -> Result<String, GitHubApiError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            iat: (now - time::Duration::seconds(60)).unix_timestamp(),
            exp: (now + time::Duration::minutes(10)).unix_timestamp(),
            iss: self.app_id,
        };
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)?)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        bearer: &str,
        query: Option<&[(&str, String)]>,
        body: Option<&Value>,
    ) -> Result<Value, GitHubApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url).bearer_auth(bearer);
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.json::<Value>().await.ok();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                tracing::error!(%status, url, "GitHub rejected credentials or permissions");
            } else {
                tracing::warn!(%status, url, "GitHub API request failed");
            }
            return Err(GitHubApiError::Api { url, status, body });
        }
        Ok(response.json().await?)
    }

    async fn fetch_installation_token(
        &self,
        installation_id: u64,
    ) -> Result<InstallationToken, GitHubApiError> {
        let jwt = self.build_app_jwt()?;
        let data = self
            .request(
                Method::POST,
                &format!("/app/installations/{installation_id}/access_tokens"),
                &jwt,
                None,
                None,
            )
            .await?;
        let token = data
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GitHubApiError::Response("GitHub did not return an installation token".into())
            })?
            .to_string();
        let expires_at = data
            .get("expires_at")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GitHubApiError::Response(
                    "GitHub did not return an expiry for the installation token".into(),
                )
            })
            .and_then(|raw| {
                OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| {
                    GitHubApiError::Response(format!("invalid installation token expiry: {e}"))
                })
            })?;
        Ok(InstallationToken { token, expires_at, permissions: data.get("permissions").cloned() })
    }

    /// Return a cached installation token if still active, otherwise exchange
    /// the app assertion for a fresh one.
    pub async fn get_installation_token(
        &self,
        installation_id: u64,
    ) -> Result<InstallationToken, GitHubApiError> {
        {
            let tokens = self.tokens.lock().await;
            if let Some(cached) = tokens.get(&installation_id) {
                if cached.is_active() {
                    return Ok(cached.clone());
                }
            }
        }
        let token = self.fetch_installation_token(installation_id).await?;
        tracing::debug!(installation_id, expires_at = %token.expires_at, "Fetched installation token");
        self.tokens.lock().await.insert(installation_id, token.clone());
        Ok(token)
    }

    /// Compare two commits, returning the raw compare response. The file list
    /// is a single page; GitHub truncates very large compares server-side and
    /// we accept that as-is.
    pub async fn get_commit_compare(
        &self,
        installation_id: u64,
        full_name: &str,
        base: &str,
        head: &str,
    ) -> Result<Value, GitHubApiError> {
        let token = self.get_installation_token(installation_id).await?;
        let (owner, repo) = split_full_name(full_name)?;
        self.request(
            Method::GET,
            &format!("/repos/{owner}/{repo}/compare/{base}...{head}"),
            &token.token,
            None,
            None,
        )
        .await
    }

    /// List all changed files of a pull request, following pagination until a
    /// short page is returned. Page order is preserved.
    pub async fn list_pull_request_files(
        &self,
        installation_id: u64,
        full_name: &str,
        pull_number: u64,
    ) -> Result<Vec<Value>, GitHubApiError> {
        let token = self.get_installation_token(installation_id).await?;
        let (owner, repo) = split_full_name(full_name)?;
        let path = format!("/repos/{owner}/{repo}/pulls/{pull_number}/files");
        let mut files = Vec::new();
        let mut page = 1u32;
        loop {
            let batch = self
                .request(
                    Method::GET,
                    &path,
                    &token.token,
                    Some(&[
                        ("per_page", PR_FILES_PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ]),
                    None,
                )
                .await?;
            let Value::Array(batch) = batch else {
                return Err(GitHubApiError::Response(
                    "expected an array while listing pull request files".into(),
                ));
            };
            let len = batch.len();
            files.extend(batch);
            if len < PR_FILES_PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(files)
    }

    /// Submit one batched review with inline comments on a pull request.
    pub async fn create_pull_request_review(
        &self,
        installation_id: u64,
        full_name: &str,
        pull_number: u64,
        body: Option<&str>,
        comments: Vec<Value>,
    ) -> Result<Value, GitHubApiError> {
        let token = self.get_installation_token(installation_id).await?;
        let (owner, repo) = split_full_name(full_name)?;
        let mut payload = json!({ "event": "COMMENT", "comments": comments });
        if let Some(body) = body {
            payload["body"] = Value::String(body.to_string());
        }
        self.request(
            Method::POST,
            &format!("/repos/{owner}/{repo}/pulls/{pull_number}/reviews"),
            &token.token,
            None,
            Some(&payload),
        )
        .await
    }

    /// Post a single commit comment, optionally anchored to a file and line.
    pub async fn create_commit_comment(
        &self,
        installation_id: u64,
        full_name: &str,
        commit_sha: &str,
        body: &str,
        path: Option<&str>,
        line: Option<u64>,
    ) -> Result<Value, GitHubApiError> {
        let token = self.get_installation_token(installation_id).await?;
        let (owner, repo) = split_full_name(full_name)?;
        let mut payload = json!({ "body": body });
        if let Some(path) = path {
            payload["path"] = Value::String(path.to_string());
        }
        if let Some(line) = line {
            payload["line"] = Value::from(line);
        }
        self.request(
            Method::POST,
            &format!("/repos/{owner}/{repo}/commits/{commit_sha}/comments"),
            &token.token,
            None,
            Some(&payload),
        )
        .await
    }
}

pub fn split_full_name(full_name: &str) -> Result<(&str, &str), GitHubApiError> {
    full_name.split_once('/').ok_or_else(|| {
        GitHubApiError::Response(format!("repository full name '{full_name}' is invalid"))
    })
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_split_full_name() {
        assert_eq!(split_full_name("foo/bar").unwrap(), ("foo", "bar"));
        assert_eq!(split_full_name("foo/bar/baz").unwrap(), ("foo", "bar/baz"));
        assert!(split_full_name("foobar").is_err());
    }

    #[test]
    fn test_token_expiry_skew() {
        let token = InstallationToken {
            token: "ghs_test".into(),
            expires_at: datetime!(2026-01-01 12:00:00 UTC),
            permissions: None,
        };
        // Active well before expiry
        assert!(token.is_active_at(datetime!(2026-01-01 11:00:00 UTC)));
        // Inactive within the 60s skew margin, even though not yet expired
        assert!(!token.is_active_at(datetime!(2026-01-01 11:59:30 UTC)));
        assert!(!token.is_active_at(datetime!(2026-01-01 12:00:00 UTC)));
    }

    #[test]
    fn test_parse_token_expiry_format() {
        let parsed = OffsetDateTime::parse("2016-07-11T22:14:10Z", &Rfc3339).unwrap();
        assert_eq!(parsed.year(), 2016);
        assert_eq!(parsed.offset(), time::UtcOffset::UTC);
    }
}
