//! GitHub contents API backend.
//!
//! Objects map to `/repos/{owner}/{repo}/contents/{path}`, blobs to
//! `/repos/{owner}/{repo}/git/blobs/{sha}`. The contents endpoint stops
//! inlining content above 1 MB; those objects are fetched through the blob
//! endpoint by their sha.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use super::{DirEntry, EntryKind, ObjectInfo, RemoteError, RemoteObject, RemoteStore};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("gitsync-rs/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    /// Branch to read and write. `None` uses the repository default.
    pub branch: Option<String>,
    pub token: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_base", &self.api_base)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug)]
pub struct GitHubStore {
    client: reqwest::Client,
    repo_base: Url,
    branch: Option<String>,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ContentsItem {
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Dir(Vec<ContentsItem>),
    File(ContentsItem),
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    message: &'a str,
    sha: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

impl GitHubStore {
    pub fn new(config: &GitHubConfig) -> Result<Self, RemoteError> {
        let mut repo_base =
            Url::parse(config.api_base.trim_end_matches('/')).map_err(|e| RemoteError::Rejected {
                status: 0,
                path: config.api_base.clone(),
                message: format!("invalid API base URL: {e}"),
            })?;
        repo_base
            .path_segments_mut()
            .map_err(|_| RemoteError::Rejected {
                status: 0,
                path: config.api_base.clone(),
                message: "API base URL cannot carry a path".into(),
            })?
            .pop_if_empty()
            .extend(["repos", config.owner.as_str(), config.repo.as_str()]);

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|source| RemoteError::Http {
                source,
                path: String::new(),
            })?;

        Ok(Self {
            client,
            repo_base,
            branch: config.branch.clone(),
            token: config.token.clone(),
        })
    }

    fn contents_url(&self, path: &str, with_ref: bool) -> Url {
        let mut url = self.repo_base.clone();
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.push("contents");
            segs.extend(path.split('/').filter(|s| !s.is_empty()));
        }
        if with_ref {
            if let Some(branch) = &self.branch {
                url.query_pairs_mut().append_pair("ref", branch);
            }
        }
        url
    }

    fn blob_url(&self, sha: &str) -> Url {
        let mut url = self.repo_base.clone();
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.extend(["git", "blobs", sha]);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header("X-GitHub-Api-Version", API_VERSION);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }
        req
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<reqwest::Response, RemoteError> {
        let resp = req.send().await.map_err(|source| RemoteError::Http {
            source,
            path: path.to_string(),
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        tracing::debug!(path, status = status.as_u16(), body = %body, "Remote request failed");
        Err(RemoteError::from_status(status.as_u16(), path, &body))
    }

    /// GET contents; `Ok(None)` on 404.
    async fn get_contents(&self, path: &str) -> Result<Option<ContentsResponse>, RemoteError> {
        let req = self
            .request(Method::GET, self.contents_url(path, true))
            .header("Accept", "application/vnd.github+json");
        let resp = match self.send(req, path).await {
            Ok(resp) => resp,
            Err(RemoteError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let bytes = resp.bytes().await.map_err(|source| RemoteError::Http {
            source,
            path: path.to_string(),
        })?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RemoteError::Decode {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    fn expect_file(path: &str, resp: ContentsResponse) -> Result<ContentsItem, RemoteError> {
        match resp {
            ContentsResponse::File(item) if item.kind == "file" => Ok(item),
            _ => Err(RemoteError::Rejected {
                status: 0,
                path: path.to_string(),
                message: "path is not a regular file".into(),
            }),
        }
    }
}

/// Inline content is base64 with embedded newlines.
fn decode_inline(path: &str, encoded: &str) -> Result<Vec<u8>, RemoteError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact).map_err(|e| RemoteError::Decode {
        path: path.to_string(),
        reason: format!("inline content: {e}"),
    })
}

#[async_trait]
impl RemoteStore for GitHubStore {
    async fn read_object(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let Some(resp) = self.get_contents(path).await? else {
            return Ok(None);
        };
        let item = Self::expect_file(path, resp)?;

        let inline = match (&item.content, item.encoding.as_deref()) {
            (Some(c), Some("base64")) if !c.is_empty() || item.size == 0 => {
                Some(decode_inline(path, c)?)
            }
            _ => None,
        };
        let content = match inline {
            Some(bytes) => bytes,
            None => self.read_blob(&item.sha).await?,
        };
        if content.len() as u64 != item.size {
            return Err(RemoteError::Decode {
                path: path.to_string(),
                reason: format!("expected {} bytes, got {}", item.size, content.len()),
            });
        }

        Ok(Some(RemoteObject {
            path: item.path,
            sha: item.sha,
            content,
        }))
    }

    async fn head_object(&self, path: &str) -> Result<Option<ObjectInfo>, RemoteError> {
        let Some(resp) = self.get_contents(path).await? else {
            return Ok(None);
        };
        let item = Self::expect_file(path, resp)?;
        Ok(Some(ObjectInfo {
            path: item.path,
            sha: item.sha,
            size: item.size,
        }))
    }

    async fn write_object(
        &self,
        path: &str,
        content: &[u8],
        previous_sha: Option<&str>,
        message: &str,
    ) -> Result<String, RemoteError> {
        let body = PutBody {
            message,
            content: STANDARD.encode(content),
            sha: previous_sha,
            branch: self.branch.as_deref(),
        };
        let req = self
            .request(Method::PUT, self.contents_url(path, false))
            .header("Accept", "application/vnd.github+json")
            .json(&body);
        let resp = self.send(req, path).await?;
        let parsed: PutResponse = resp.json().await.map_err(|e| RemoteError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(parsed.content.sha)
    }

    async fn delete_object(
        &self,
        path: &str,
        sha: &str,
        message: &str,
    ) -> Result<(), RemoteError> {
        let body = DeleteBody {
            message,
            sha,
            branch: self.branch.as_deref(),
        };
        let req = self
            .request(Method::DELETE, self.contents_url(path, false))
            .header("Accept", "application/vnd.github+json")
            .json(&body);
        self.send(req, path).await?;
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Option<Vec<DirEntry>>, RemoteError> {
        let Some(resp) = self.get_contents(path).await? else {
            return Ok(None);
        };
        match resp {
            ContentsResponse::Dir(items) => Ok(Some(
                items
                    .into_iter()
                    .map(|item| DirEntry {
                        kind: EntryKind::from_api(&item.kind),
                        name: item.name,
                        path: item.path,
                        sha: item.sha,
                        size: item.size,
                    })
                    .collect(),
            )),
            ContentsResponse::File(_) => Err(RemoteError::Rejected {
                status: 0,
                path: path.to_string(),
                message: "path is a file, not a directory".into(),
            }),
        }
    }

    async fn read_blob(&self, sha: &str) -> Result<Vec<u8>, RemoteError> {
        let req = self
            .request(Method::GET, self.blob_url(sha))
            .header("Accept", "application/vnd.github.raw+json");
        let resp = self.send(req, sha).await?;
        let bytes = resp.bytes().await.map_err(|source| RemoteError::Http {
            source,
            path: sha.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(branch: Option<&str>) -> GitHubStore {
        GitHubStore::new(&GitHubConfig {
            api_base: "https://api.example.com/".into(),
            owner: "me".into(),
            repo: "vault".into(),
            branch: branch.map(str::to_string),
            token: "t0k".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_contents_url_encodes_segments() {
        let s = store(None);
        assert_eq!(
            s.contents_url("docs/my file#1.txt", true).as_str(),
            "https://api.example.com/repos/me/vault/contents/docs/my%20file%231.txt"
        );
        assert_eq!(
            s.contents_url("", true).as_str(),
            "https://api.example.com/repos/me/vault/contents"
        );
    }

    #[test]
    fn test_contents_url_ref_only_on_reads() {
        let s = store(Some("main"));
        assert_eq!(
            s.contents_url("a.txt", true).as_str(),
            "https://api.example.com/repos/me/vault/contents/a.txt?ref=main"
        );
        assert_eq!(
            s.contents_url("a.txt", false).as_str(),
            "https://api.example.com/repos/me/vault/contents/a.txt"
        );
    }

    #[test]
    fn test_blob_url() {
        assert_eq!(
            store(None).blob_url("abc123").as_str(),
            "https://api.example.com/repos/me/vault/git/blobs/abc123"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let cfg = GitHubConfig {
            api_base: DEFAULT_API_BASE.into(),
            owner: "o".into(),
            repo: "r".into(),
            branch: None,
            token: "supersecret".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(!format!("{cfg:?}").contains("supersecret"));
    }

    #[test]
    fn test_parse_file_response() {
        let json = r#"{"name":"a.txt","path":"d/a.txt","sha":"s1","size":3,"type":"file","content":"aGkh\n","encoding":"base64"}"#;
        let resp: ContentsResponse = serde_json::from_str(json).unwrap();
        let item = GitHubStore::expect_file("d/a.txt", resp).unwrap();
        assert_eq!(decode_inline("d/a.txt", item.content.as_deref().unwrap()).unwrap(), b"hi!");
    }

    #[test]
    fn test_parse_large_file_has_no_inline_content() {
        let json = r#"{"name":"big","path":"big","sha":"s2","size":5000000,"type":"file","content":"","encoding":"none"}"#;
        let resp: ContentsResponse = serde_json::from_str(json).unwrap();
        let item = GitHubStore::expect_file("big", resp).unwrap();
        assert_eq!(item.encoding.as_deref(), Some("none"));
    }

    #[test]
    fn test_parse_dir_response() {
        let json = r#"[
            {"name":"x.parts","path":"x.parts","sha":"d1","size":0,"type":"dir"},
            {"name":"y","path":"y","sha":"f1","size":9,"type":"file"},
            {"name":"sub","path":"sub","sha":"m1","size":0,"type":"submodule"}
        ]"#;
        let ContentsResponse::Dir(items) = serde_json::from_str(json).unwrap() else {
            panic!("expected directory listing");
        };
        let kinds: Vec<_> = items.iter().map(|i| EntryKind::from_api(&i.kind)).collect();
        assert_eq!(kinds, vec![EntryKind::Dir, EntryKind::File, EntryKind::Other]);
    }

    #[test]
    fn test_put_body_omits_absent_sha() {
        let body = PutBody {
            message: "Add a",
            content: "aGkh".into(),
            sha: None,
            branch: None,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"message":"Add a","content":"aGkh"}"#
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_retryable_transport_error() {
        let s = GitHubStore::new(&GitHubConfig {
            api_base: "http://127.0.0.1:1".into(),
            owner: "o".into(),
            repo: "r".into(),
            branch: None,
            token: String::new(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        let err = s.head_object("a").await.unwrap_err();
        assert!(matches!(err, RemoteError::Http { .. }));
        assert!(err.is_retryable());
    }
}
