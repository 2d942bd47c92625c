//! Tenant API storage provider
//!
//! Implements `RemoteFs` over the tenant's files, postits and jobs services.
//! Every response is wrapped in a `{status, message, result}` envelope;
//! failures are mapped onto `ProviderError` by HTTP status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::http_retry::{send_with_retry, HttpRetryConfig};
use super::{JobArchive, PermissionLevel, ProviderError, RemoteFile, RemoteFs, TempLink};
use crate::file_id::join_path;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 300;

/// Connection settings for the tenant API
#[derive(Debug, Clone)]
pub struct AgaveConfig {
    pub base_url: Url,
    pub token: SecretString,
    pub timeout: Duration,
    pub retry: HttpRetryConfig,
    pub postit_lifetime_secs: u64,
    pub postit_max_uses: u32,
}

impl AgaveConfig {
    pub fn new(base_url: &str, token: SecretString) -> Result<Self, ProviderError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ProviderError::InvalidConfig(format!("base url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ProviderError::InvalidConfig(format!("base url '{}' cannot be a base", base_url)));
        }

        Ok(Self {
            base_url,
            token,
            timeout: Duration::from_secs(30),
            retry: HttpRetryConfig::default(),
            postit_lifetime_secs: 3600,
            postit_max_uses: 1,
        })
    }
}

/// Response envelope shared by every tenant service
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct Href {
    #[serde(default)]
    href: String,
}

/// One entry of a files listing
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgaveFile {
    name: String,
    path: String,
    #[serde(default)]
    length: u64,
    #[serde(rename = "type")]
    file_type: String,
    last_modified: Option<String>,
    #[serde(default, rename = "_links")]
    links: HashMap<String, Href>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgavePostit {
    postit: Option<String>,
    expires_at: Option<String>,
    remaining_uses: Option<u32>,
    #[serde(default, rename = "_links")]
    links: HashMap<String, Href>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgaveJob {
    id: String,
    owner: String,
    archive_system: Option<String>,
    archive_path: Option<String>,
}

/// Strip tokens and control characters from an error body and cap its length
fn sanitize_api_error(body: &str) -> String {
    let cleaned: String = body
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    for word in words.iter_mut() {
        if word.len() > 32 && word.chars().all(|c| c.is_ascii_alphanumeric()) {
            *word = "[redacted]";
        }
    }
    let joined = words.join(" ");
    if joined.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !joined.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &joined[..end])
    } else {
        joined
    }
}

fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let detail = sanitize_api_error(body);
    match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound(detail),
        StatusCode::UNAUTHORIZED => ProviderError::AuthenticationFailed(detail),
        StatusCode::FORBIDDEN => ProviderError::PermissionDenied(detail),
        StatusCode::CONFLICT => ProviderError::AlreadyExists(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,
        _ => ProviderError::ServerError(format!("HTTP {}: {}", status.as_u16(), detail)),
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn form_body(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

impl AgaveFile {
    fn into_remote(self, system: &str) -> RemoteFile {
        let mut file = if self.file_type == "dir" || self.file_type == "folder" {
            RemoteFile::directory(system, &self.path)
        } else {
            RemoteFile::file(system, &self.path, self.length)
        };
        file.last_modified = self.last_modified.as_deref().and_then(parse_timestamp);
        file.links = self
            .links
            .into_iter()
            .filter(|(_, link)| !link.href.is_empty())
            .map(|(name, link)| (name, link.href))
            .collect();
        file
    }
}

/// `RemoteFs` backed by the tenant HTTP API
pub struct AgaveProvider {
    config: AgaveConfig,
    client: reqwest::Client,
}

impl AgaveProvider {
    pub fn new(config: AgaveConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("datadepot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    /// Build `{base}/{service...}/{path segments...}`
    fn endpoint(&self, service: &[&str], path: &str) -> Result<Url, ProviderError> {
        let mut url = self.config.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ProviderError::InvalidConfig("base url cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(service);
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn media_url(&self, system: &str, path: &str) -> Result<Url, ProviderError> {
        self.endpoint(&["files", "v2", "media", "system", system], path)
    }

    fn listing_url(&self, system: &str, path: &str) -> Result<Url, ProviderError> {
        self.endpoint(&["files", "v2", "listings", "system", system], path)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.config.token.expose_secret())
    }

    fn form_request(&self, method: Method, url: Url, pairs: &[(&str, &str)]) -> RequestBuilder {
        self.request(method, url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(form_body(pairs))
    }

    /// Send, check status and unwrap the envelope's `result`
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, ProviderError> {
        let response = send_with_retry(request, &self.config.retry).await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }

        let envelope: Envelope<T> = serde_json::from_str(&text)
            .map_err(|e| ProviderError::ParseError(format!("response envelope: {}", e)))?;
        if envelope.status == "error" {
            return Err(ProviderError::ServerError(
                envelope.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(envelope.result)
    }

    async fn file_action(
        &self,
        file: &RemoteFile,
        action: &str,
        target: &str,
    ) -> Result<Option<AgaveFile>, ProviderError> {
        let url = self.media_url(&file.system, &file.full_path())?;
        debug!("{} {} -> {}", action, file.file_id(), target);
        self.call(self.form_request(Method::PUT, url, &[("action", action), ("path", target)]))
            .await
    }

    /// Handle for an entry created by a file action, preferring the server's view
    fn created_entry(&self, result: Option<AgaveFile>, system: &str, template: &RemoteFile, full_path: &str) -> RemoteFile {
        match result {
            Some(entry) if entry.path.trim_matches('/') == full_path.trim_matches('/') => entry.into_remote(system),
            _ => {
                let mut file = if template.is_dir() {
                    RemoteFile::directory(system, full_path)
                } else {
                    RemoteFile::file(system, full_path, template.size)
                };
                file.last_modified = template.last_modified;
                file
            }
        }
    }
}

#[async_trait]
impl RemoteFs for AgaveProvider {
    async fn stat(&self, system: &str, path: &str) -> Result<RemoteFile, ProviderError> {
        let mut url = self.listing_url(system, path)?;
        url.query_pairs_mut().append_pair("limit", "1");
        let entries: Vec<AgaveFile> = self
            .call(self.request(Method::GET, url))
            .await?
            .unwrap_or_default();

        let first = entries
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", system, path)))?;

        // a directory reports itself as "."; the path carries the real name
        let mut file = first.into_remote(system);
        if file.name == "." {
            file = RemoteFile {
                last_modified: file.last_modified,
                links: file.links,
                ..RemoteFile::directory(system, path)
            };
        }
        Ok(file)
    }

    async fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteFile>, ProviderError> {
        let url = self.listing_url(system, path)?;
        let entries: Vec<AgaveFile> = self
            .call(self.request(Method::GET, url))
            .await?
            .unwrap_or_default();

        Ok(entries
            .into_iter()
            .filter(|entry| entry.name != ".")
            .map(|entry| entry.into_remote(system))
            .collect())
    }

    async fn copy(&self, file: &RemoteFile, dest_path: &str) -> Result<RemoteFile, ProviderError> {
        let target = format!("/{}", dest_path.trim_matches('/'));
        let result = self.file_action(file, "copy", &target).await?;
        info!("Copied {} to {}", file.file_id(), target);
        Ok(self.created_entry(result, &file.system, file, dest_path))
    }

    async fn move_to(&self, file: &RemoteFile, dest_path: &str) -> Result<RemoteFile, ProviderError> {
        let target = format!("/{}", dest_path.trim_matches('/'));
        let result = self.file_action(file, "move", &target).await?;
        info!("Moved {} to {}", file.file_id(), target);
        Ok(self.created_entry(result, &file.system, file, dest_path))
    }

    async fn rename(&self, file: &RemoteFile, new_name: &str) -> Result<RemoteFile, ProviderError> {
        if new_name.is_empty() || new_name.contains('/') {
            return Err(ProviderError::InvalidPath(format!("invalid name '{}'", new_name)));
        }
        let result = self.file_action(file, "rename", new_name).await?;
        let dest = join_path(&file.path, new_name);
        info!("Renamed {} to {}", file.file_id(), new_name);
        Ok(self.created_entry(result, &file.system, file, &dest))
    }

    async fn delete(&self, file: &RemoteFile) -> Result<(), ProviderError> {
        let url = self.media_url(&file.system, &file.full_path())?;
        self.call::<serde_json::Value>(self.request(Method::DELETE, url)).await?;
        info!("Deleted {}", file.file_id());
        Ok(())
    }

    async fn mkdir(&self, system: &str, parent_path: &str, name: &str) -> Result<RemoteFile, ProviderError> {
        let url = self.media_url(system, parent_path)?;
        let result: Option<AgaveFile> = self
            .call(self.form_request(Method::PUT, url, &[("action", "mkdir"), ("path", name)]))
            .await?;
        let full_path = join_path(parent_path, name);
        info!("Created directory {}/{}", system, full_path);
        let template = RemoteFile::directory(system, &full_path);
        Ok(self.created_entry(result, system, &template, &full_path))
    }

    async fn create_temp_link(&self, file: &RemoteFile, force: bool) -> Result<TempLink, ProviderError> {
        if !force {
            if let Some(cached) = file.links.get("postit") {
                debug!("Reusing cached link for {}", file.file_id());
                return Ok(TempLink {
                    url: cached.clone(),
                    expires_at: None,
                    remaining_uses: None,
                });
            }
        }

        let target = self.media_url(&file.system, &file.full_path())?;
        let url = self.endpoint(&["postits", "v2"], "")?;
        let lifetime = self.config.postit_lifetime_secs.to_string();
        let max_uses = self.config.postit_max_uses.to_string();
        let postit: AgavePostit = self
            .call(self.form_request(
                Method::POST,
                url,
                &[
                    ("url", target.as_str()),
                    ("method", "GET"),
                    ("lifetime", lifetime.as_str()),
                    ("maxUses", max_uses.as_str()),
                    ("noauth", "false"),
                ],
            ))
            .await?
            .ok_or_else(|| ProviderError::ParseError("empty postit response".to_string()))?;

        let link = postit
            .links
            .get("self")
            .map(|l| l.href.clone())
            .filter(|href| !href.is_empty())
            .or_else(|| {
                postit.postit.as_ref().and_then(|id| {
                    self.endpoint(&["postits", "v2"], id).ok().map(|u| u.to_string())
                })
            })
            .ok_or_else(|| ProviderError::ParseError("postit response without a link".to_string()))?;

        Ok(TempLink {
            url: link,
            expires_at: postit.expires_at.as_deref().and_then(parse_timestamp),
            remaining_uses: postit.remaining_uses,
        })
    }

    async fn share(&self, file: &RemoteFile, username: &str, level: PermissionLevel) -> Result<(), ProviderError> {
        let url = self.endpoint(&["files", "v2", "pems", "system", &file.system], &file.full_path())?;
        let body = serde_json::json!({
            "username": username,
            "permission": level.as_str(),
            "recursive": file.is_dir(),
        });
        self.call::<serde_json::Value>(self.request(Method::POST, url).json(&body))
            .await?;
        info!("Granted {} on {} to {}", level, file.file_id(), username);
        Ok(())
    }

    async fn download_bytes(&self, file: &RemoteFile, max_bytes: usize) -> Result<Vec<u8>, ProviderError> {
        if file.is_dir() {
            return Err(ProviderError::InvalidPath(format!("{} is a directory", file.file_id())));
        }
        if max_bytes == 0 {
            return Ok(Vec::new());
        }
        let url = self.media_url(&file.system, &file.full_path())?;
        let request = self
            .request(Method::GET, url)
            .header(RANGE, format!("bytes=0-{}", max_bytes - 1));
        let mut response = send_with_retry(request, &self.config.retry).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        // servers may ignore Range; stop reading once the cap is reached
        let mut buf = Vec::with_capacity(max_bytes.min(file.size as usize));
        while let Some(chunk) = response.chunk().await? {
            let room = max_bytes - buf.len();
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if buf.len() >= max_bytes {
                break;
            }
        }
        debug!("Read {} bytes of {}", buf.len(), file.file_id());
        Ok(buf)
    }

    async fn import(&self, system: &str, dest_path: &str, url_to_ingest: &str) -> Result<(), ProviderError> {
        let url = self.media_url(system, dest_path)?;
        self.call::<serde_json::Value>(self.form_request(
            Method::POST,
            url,
            &[("urlToIngest", url_to_ingest)],
        ))
        .await?;
        info!("Queued import of {} into {}/{}", url_to_ingest, system, dest_path);
        Ok(())
    }

    async fn job_archive(&self, job_id: &str) -> Result<JobArchive, ProviderError> {
        let url = self.endpoint(&["jobs", "v2"], job_id)?;
        let job: AgaveJob = self
            .call(self.request(Method::GET, url))
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("job {}", job_id)))?;

        match (job.archive_system, job.archive_path) {
            (Some(archive_system), Some(archive_path)) => Ok(JobArchive {
                job_id: job.id,
                owner: job.owner,
                archive_system,
                archive_path: archive_path.trim_matches('/').to_string(),
            }),
            _ => Err(ProviderError::NotFound(format!("job {} has no archive location", job_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(base: &str) -> AgaveProvider {
        let config = AgaveConfig::new(base, SecretString::from("token".to_string())).unwrap();
        AgaveProvider::new(config).unwrap()
    }

    #[test]
    fn test_media_url_encodes_segments() {
        let p = provider("https://tenant.example.org/");
        let url = p.media_url("data.storage", "alice/My Docs/a#1.txt").unwrap();
        assert_eq!(
            url.as_str(),
            "https://tenant.example.org/files/v2/media/system/data.storage/alice/My%20Docs/a%231.txt"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_prefix() {
        let p = provider("https://gateway.example.org/api");
        let url = p.listing_url("sys", "/alice/").unwrap();
        assert_eq!(url.as_str(), "https://gateway.example.org/api/files/v2/listings/system/sys/alice");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = AgaveConfig::new("not a url", SecretString::from("t".to_string())).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
    }

    #[test]
    fn test_listing_entry_conversion() {
        let json = r#"{
            "status": "success",
            "message": null,
            "result": [
                {"name": ".", "path": "/alice/data", "length": 0, "type": "dir",
                 "lastModified": "2017-03-01T10:00:00.000-06:00"},
                {"name": "run.json", "path": "/alice/data/run.json", "length": 42, "type": "file",
                 "lastModified": "2017-03-01T10:00:00.000-06:00",
                 "_links": {"self": {"href": "https://x/files/v2/media/system/sys/alice/data/run.json"}}}
            ]
        }"#;
        let envelope: Envelope<Vec<AgaveFile>> = serde_json::from_str(json).unwrap();
        let entries = envelope.result.unwrap();
        let file = entries.into_iter().nth(1).unwrap().into_remote("sys");
        assert_eq!(file.owner, "alice");
        assert_eq!(file.path, "alice/data");
        assert_eq!(file.ext, ".json");
        assert_eq!(file.size, 42);
        assert!(file.last_modified.is_some());
        assert!(file.links.contains_key("self"));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(StatusCode::NOT_FOUND, "missing"), ProviderError::NotFound(_)));
        assert!(matches!(status_error(StatusCode::UNAUTHORIZED, ""), ProviderError::AuthenticationFailed(_)));
        assert!(matches!(status_error(StatusCode::FORBIDDEN, ""), ProviderError::PermissionDenied(_)));
        assert!(matches!(status_error(StatusCode::CONFLICT, ""), ProviderError::AlreadyExists(_)));
        assert!(matches!(status_error(StatusCode::BAD_GATEWAY, ""), ProviderError::ServerError(_)));
    }

    #[test]
    fn test_sanitize_api_error() {
        let token = "a".repeat(40);
        let cleaned = sanitize_api_error(&format!("bad token {}\n\tretry", token));
        assert_eq!(cleaned, "bad token [redacted] retry");
        assert!(sanitize_api_error(&"x ".repeat(400)).ends_with("..."));
    }

    #[test]
    fn test_form_body_encoding() {
        assert_eq!(
            form_body(&[("action", "rename"), ("path", "a b&c.txt")]),
            "action=rename&path=a+b%26c.txt"
        );
    }
}
