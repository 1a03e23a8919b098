//! GitHub repository sink using the contents API.
//!
//! Each payload becomes one file committed to the target branch.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SinkError, retry_after_header};
use crate::{Confirmation, Sink};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_MESSAGE: &str = "batchvault: add {name}";

/// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Serialize)]
struct PutRequest<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutResponse {
    content: ContentInfo,
}

#[derive(Deserialize)]
struct ContentInfo {
    sha: String,
}

/// File metadata returned by a contents GET.
#[derive(Deserialize)]
struct ExistingFile {
    sha: String,
    size: u64,
    /// Base64 with embedded newlines; empty for files over 1 MB.
    #[serde(default)]
    content: String,
}

impl ExistingFile {
    /// Whether the stored file holds `bytes`. Without inline content only
    /// the size can be compared.
    fn matches(&self, bytes: &[u8]) -> bool {
        if self.size != bytes.len() as u64 {
            return false;
        }
        let packed: String = self.content.split_whitespace().collect();
        if packed.is_empty() {
            return true;
        }
        BASE64
            .decode(packed)
            .is_ok_and(|stored| stored.as_slice() == bytes)
    }
}

pub struct GithubSink {
    http: reqwest::Client,
    api_url: String,
    repo: String,
    branch: Option<String>,
    path_prefix: String,
    message: String,
}

impl GithubSink {
    /// Creates a sink committing to `repo` (`owner/name`) with `token`.
    pub fn new(token: &str, repo: &str) -> Result<Self, SinkError> {
        if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
            return Err(SinkError::permanent(format!(
                "repository must be owner/name, got {repo:?}"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| SinkError::permanent("token contains invalid characters"))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("batchvault"));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(SinkError::from)?;

        Ok(Self {
            http,
            api_url: DEFAULT_API_URL.to_string(),
            repo: repo.to_string(),
            branch: None,
            path_prefix: String::new(),
            message: DEFAULT_MESSAGE.to_string(),
        })
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Directory inside the repository the payloads are stored under.
    pub fn with_path_prefix(mut self, prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        self.path_prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        self
    }

    /// Commit message template; `{name}` is replaced with the destination.
    pub fn with_message(mut self, template: impl Into<String>) -> Self {
        self.message = template.into();
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn contents_url(&self, destination: &str) -> String {
        let path = format!("{}{destination}", self.path_prefix);
        let encoded: Vec<String> = path
            .split('/')
            .map(|seg| utf8_percent_encode(seg, SEGMENT).to_string())
            .collect();
        format!(
            "{}/repos/{}/contents/{}",
            self.api_url,
            self.repo,
            encoded.join("/")
        )
    }

    async fn put_file(&self, destination: &str, bytes: &[u8]) -> Result<Confirmation, SinkError> {
        let url = self.contents_url(destination);
        let body = PutRequest {
            message: self.message.replace("{name}", destination),
            content: BASE64.encode(bytes),
            branch: self.branch.as_deref(),
        };

        debug!(repo = %self.repo, destination, size = bytes.len(), "PUT contents");
        let resp = self.http.put(&url).json(&body).send().await?;
        let status = resp.status();

        if status.is_success() {
            let parsed: PutResponse = resp.json().await?;
            return Ok(Confirmation {
                destination: destination.to_string(),
                id: parsed.content.sha,
            });
        }

        let headers = resp.headers().clone();
        let text = resp.text().await.unwrap_or_default();

        if status == StatusCode::UNPROCESSABLE_ENTITY && text.contains("sha") {
            // A previous attempt may have landed with its response lost.
            let existing = self.existing_file(&url).await?;
            if !existing.matches(bytes) {
                return Err(SinkError::permanent(format!(
                    "{destination} already exists in {} with different content ({} bytes, expected {})",
                    self.repo,
                    existing.size,
                    bytes.len()
                )));
            }
            warn!(destination, sha = %existing.sha, "identical file already present, treating as uploaded");
            return Ok(Confirmation {
                destination: destination.to_string(),
                id: existing.sha,
            });
        }

        Err(classify(status, &headers, &text))
    }

    async fn existing_file(&self, url: &str) -> Result<ExistingFile, SinkError> {
        let mut req = self.http.get(url);
        if let Some(branch) = &self.branch {
            req = req.query(&[("ref", branch)]);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let text = resp.text().await.unwrap_or_default();
            return Err(classify(status, &headers, &text));
        }
        Ok(resp.json().await?)
    }
}

impl Sink for GithubSink {
    fn put<'a>(
        &'a self,
        destination: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Confirmation, SinkError>> + Send + 'a>> {
        Box::pin(self.put_file(destination, bytes))
    }

    fn kind(&self) -> &'static str {
        "github"
    }
}

/// Maps a failed response, recognizing GitHub's rate-limit signals.
fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> SinkError {
    let code = status.as_u16();
    let retry_after = retry_after_header(headers);
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    if matches!(code, 403 | 429) && (exhausted || retry_after.is_some()) {
        let wait = retry_after.or_else(|| rate_limit_reset(headers));
        return SinkError::Transient {
            message: format!("HTTP {code}: rate limited"),
            retry_after: wait,
        };
    }

    SinkError::from_status(code, body, retry_after)
}

/// Time until the `x-ratelimit-reset` epoch second.
fn rate_limit_reset(headers: &HeaderMap) -> Option<Duration> {
    let reset = headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;
    let now = chrono::Utc::now().timestamp();
    Some(Duration::from_secs(reset.saturating_sub(now).max(1) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_http::{MockServer, Reply};

    fn sink(url: &str) -> GithubSink {
        GithubSink::new("ghp_test", "owner/backups")
            .unwrap()
            .with_api_url(url)
    }

    #[test]
    fn rejects_malformed_repo() {
        assert!(GithubSink::new("t", "just-a-name").is_err());
        assert!(GithubSink::new("t", "a/b/c").is_err());
        assert!(GithubSink::new("t", "owner/name").is_ok());
    }

    #[test]
    fn contents_url_encodes_segments() {
        let s = GithubSink::new("t", "o/r")
            .unwrap()
            .with_api_url("http://h/")
            .with_path_prefix("/nightly/");
        assert_eq!(
            s.contents_url("backup-1.zip"),
            "http://h/repos/o/r/contents/nightly/backup-1.zip"
        );
        assert_eq!(
            s.contents_url("my file#1.txt"),
            "http://h/repos/o/r/contents/nightly/my%20file%231.txt"
        );
    }

    #[tokio::test]
    async fn put_sends_base64_content() {
        let server = MockServer::start(vec![Reply::json(
            201,
            r#"{"content":{"name":"a.zip","sha":"abc123"}}"#,
        )])
        .await;

        let s = sink(&server.url)
            .with_branch("main")
            .with_message("upload {name}");
        let conf = s.put("a.zip", b"hello").await.unwrap();
        assert_eq!(conf.id, "abc123");
        assert_eq!(conf.destination, "a.zip");

        let reqs = server.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, "PUT");
        assert_eq!(reqs[0].path, "/repos/owner/backups/contents/a.zip");
        assert_eq!(reqs[0].header("authorization"), Some("Bearer ghp_test"));

        let body: serde_json::Value = serde_json::from_slice(&reqs[0].body).unwrap();
        assert_eq!(body["content"], "aGVsbG8=");
        assert_eq!(body["message"], "upload a.zip");
        assert_eq!(body["branch"], "main");
    }

    #[tokio::test]
    async fn bad_credentials_are_permanent() {
        let server = MockServer::start(vec![Reply::json(
            401,
            r#"{"message":"Bad credentials"}"#,
        )])
        .await;

        let err = sink(&server.url).put("a.zip", b"x").await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[tokio::test]
    async fn exhausted_rate_limit_is_transient() {
        let reset = chrono::Utc::now().timestamp() + 90;
        let server = MockServer::start(vec![
            Reply::json(403, r#"{"message":"API rate limit exceeded"}"#)
                .header("x-ratelimit-remaining", "0")
                .header("x-ratelimit-reset", &reset.to_string()),
        ])
        .await;

        let err = sink(&server.url).put("a.zip", b"x").await.unwrap_err();
        assert!(err.is_transient());
        let wait = err.retry_after().unwrap();
        assert!(wait > Duration::from_secs(80) && wait <= Duration::from_secs(90));
    }

    #[tokio::test]
    async fn secondary_rate_limit_uses_retry_after() {
        let server = MockServer::start(vec![
            Reply::json(403, r#"{"message":"secondary rate limit"}"#).header("Retry-After", "60"),
        ])
        .await;

        let err = sink(&server.url).put("a.zip", b"x").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn plain_forbidden_is_permanent() {
        let server = MockServer::start(vec![Reply::json(
            403,
            r#"{"message":"Resource not accessible"}"#,
        )])
        .await;

        let err = sink(&server.url).put("a.zip", b"x").await.unwrap_err();
        assert!(!err.is_transient());
    }

    const SHA_MISSING: &str = r#"{"message":"Invalid request.\n\n\"sha\" wasn't supplied."}"#;

    #[tokio::test]
    async fn identical_existing_file_counts_as_uploaded() {
        let server = MockServer::start(vec![
            Reply::json(422, SHA_MISSING),
            Reply::json(
                200,
                r#"{"name":"a.zip","sha":"deadbeef","size":5,"encoding":"base64","content":"aGVs\nbG8=\n"}"#,
            ),
        ])
        .await;

        let conf = sink(&server.url)
            .with_branch("main")
            .put("a.zip", b"hello")
            .await
            .unwrap();
        assert_eq!(conf.id, "deadbeef");

        let reqs = server.requests();
        assert_eq!(reqs[1].method, "GET");
        assert_eq!(reqs[1].path, "/repos/owner/backups/contents/a.zip?ref=main");
    }

    #[tokio::test]
    async fn different_existing_file_is_rejected() {
        let server = MockServer::start(vec![
            Reply::json(422, SHA_MISSING),
            Reply::json(
                200,
                r#"{"name":"a.zip","sha":"0ther","size":5,"encoding":"base64","content":"d29ybGQ=\n"}"#,
            ),
        ])
        .await;

        let err = sink(&server.url).put("a.zip", b"hello").await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("different content"), "{err}");
    }

    #[tokio::test]
    async fn large_existing_file_is_compared_by_size() {
        let server = MockServer::start(vec![
            Reply::json(422, SHA_MISSING),
            Reply::json(
                200,
                r#"{"name":"a.zip","sha":"big","size":3,"encoding":"none","content":""}"#,
            ),
            Reply::json(422, SHA_MISSING),
            Reply::json(
                200,
                r#"{"name":"a.zip","sha":"big","size":3,"encoding":"none","content":""}"#,
            ),
        ])
        .await;

        let s = sink(&server.url);
        assert_eq!(s.put("a.zip", b"abc").await.unwrap().id, "big");
        assert!(s.put("a.zip", b"abcd").await.is_err());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start(vec![Reply::json(502, "")]).await;
        let err = sink(&server.url).put("a.zip", b"x").await.unwrap_err();
        assert!(err.is_transient());
    }
}
