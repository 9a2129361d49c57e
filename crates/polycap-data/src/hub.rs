//! Hugging Face Hub HTTP client for creating repositories and committing files.
//!
//! Small files are committed inline (base64). Files the hub classifies as LFS are
//! uploaded through the git-lfs batch API first and then referenced by oid. LFS
//! bodies are streamed from disk, or sent part by part when the hub asks for a
//! multipart upload, so model weights are never held in memory whole.

use crate::error::{DataError, DataResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

const HUB_ENDPOINT: &str = "https://huggingface.co";
const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";
/// Bytes of each file the hub inspects to pick regular or LFS upload.
const PREUPLOAD_SAMPLE: usize = 512;
/// Key of the multipart chunk size in an LFS upload action's header map.
const CHUNK_SIZE_KEY: &str = "chunk_size";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubRepoType {
    Model,
    Dataset,
}

impl HubRepoType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Dataset => "dataset",
        }
    }

    /// Path segment used by `/api/<segment>/<repo_id>/...` routes.
    fn api_segment(self) -> &'static str {
        match self {
            Self::Model => "models",
            Self::Dataset => "datasets",
        }
    }

    /// Prefix used by the git remote (`<endpoint>/<prefix><repo_id>.git`).
    fn git_prefix(self) -> &'static str {
        match self {
            Self::Model => "",
            Self::Dataset => "datasets/",
        }
    }
}

/// A file to commit: local source and path inside the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub local_path: PathBuf,
    pub path_in_repo: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub commit_url: String,
    pub commit_oid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadResponse {
    files: Vec<PreuploadFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadFile {
    path: String,
    upload_mode: String,
    #[serde(default)]
    should_ignore: bool,
}

#[derive(Debug, Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Debug, Deserialize)]
struct LfsObject {
    oid: String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<LfsObjectError>,
}

#[derive(Debug, Deserialize)]
struct LfsObjectError {
    code: u16,
    message: String,
}

#[derive(Debug, Deserialize)]
struct LfsActions {
    upload: Option<LfsAction>,
    verify: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    commit_url: String,
    #[serde(default)]
    commit_oid: Option<String>,
}

/// A prepared file: digest, size, preupload sample and the hub's upload decision.
#[derive(Debug)]
struct StagedFile {
    path_in_repo: String,
    local_path: PathBuf,
    size: u64,
    sha256: String,
    sample: Vec<u8>,
    lfs: bool,
}

impl StagedFile {
    /// Hash `file` in one streaming pass, keeping only the leading sample.
    fn read(file: &UploadFile) -> DataResult<Self> {
        let mut reader = std::fs::File::open(&file.local_path)?;
        let mut hasher = Sha256::new();
        let mut sample = Vec::with_capacity(PREUPLOAD_SAMPLE);
        let mut buf = vec![0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            if sample.len() < PREUPLOAD_SAMPLE {
                let take = (PREUPLOAD_SAMPLE - sample.len()).min(n);
                sample.extend_from_slice(&buf[..take]);
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok(Self {
            path_in_repo: file.path_in_repo.clone(),
            local_path: file.local_path.clone(),
            size,
            sha256: hex::encode(hasher.finalize()),
            sample,
            lfs: false,
        })
    }
}

/// Part URLs of a multipart upload ordered by part number, or `None` for a single PUT.
fn multipart_plan(header: &HashMap<String, String>, size: u64) -> DataResult<Option<(u64, Vec<String>)>> {
    let Some(chunk_size) = header.get(CHUNK_SIZE_KEY) else {
        return Ok(None);
    };
    let chunk_size: u64 = chunk_size
        .parse()
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| DataError::Publish(format!("invalid LFS chunk_size {chunk_size:?}")))?;

    let mut parts: Vec<(u32, String)> =
        header.iter().filter_map(|(k, v)| k.parse::<u32>().ok().map(|n| (n, v.clone()))).collect();
    parts.sort_by_key(|(n, _)| *n);

    let expected = size.div_ceil(chunk_size);
    if parts.len() as u64 != expected {
        return Err(DataError::Publish(format!(
            "LFS multipart response has {} part URLs, expected {expected} for {size} bytes",
            parts.len()
        )));
    }
    Ok(Some((chunk_size, parts.into_iter().map(|(_, url)| url).collect())))
}

/// Client for the subset of the Hub API needed to publish artifacts.
#[derive(Clone)]
pub struct HubClient {
    endpoint: String,
    token: String,
    client: Client,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient").field("endpoint", &self.endpoint).finish_non_exhaustive()
    }
}

impl HubClient {
    pub fn new(token: impl Into<String>) -> DataResult<Self> {
        let client = Client::builder().connect_timeout(Duration::from_secs(30)).build()?;
        Ok(Self { endpoint: HUB_ENDPOINT.to_string(), token: token.into(), client })
    }

    /// Token from `HF_TOKEN`, then the token cached by `huggingface-cli login`.
    pub fn from_env() -> DataResult<Self> {
        let token = resolve_token()
            .ok_or_else(|| DataError::Credentials("set HF_TOKEN or run `huggingface-cli login`".to_string()))?;
        Self::new(token)
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Name of the account that owns the token.
    pub async fn whoami(&self) -> DataResult<String> {
        let url = format!("{}/api/whoami-v2", self.endpoint);
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let body: WhoAmI = check(response, &url).await?.json().await?;
        Ok(body.name)
    }

    /// Create `repo_id`; an existing repository is not an error.
    pub async fn create_repo(&self, repo_id: &str, repo_type: HubRepoType, private: bool) -> DataResult<()> {
        let (organization, name) = match repo_id.split_once('/') {
            Some((org, name)) => (Some(org), name),
            None => (None, repo_id),
        };
        let url = format!("{}/api/repos/create", self.endpoint);
        let mut body = json!({ "name": name, "type": repo_type.as_str(), "private": private });
        if let Some(org) = organization {
            body["organization"] = json!(org);
        }

        let response = self.client.post(&url).bearer_auth(&self.token).json(&body).send().await?;
        if response.status() == StatusCode::CONFLICT {
            tracing::debug!("Repository {} already exists", repo_id);
            return Ok(());
        }
        check(response, &url).await?;
        tracing::info!("Created {} repository {}", repo_type.as_str(), repo_id);
        Ok(())
    }

    /// Commit `files` to `revision` of `repo_id` in a single commit.
    pub async fn upload_files(
        &self,
        repo_id: &str,
        repo_type: HubRepoType,
        revision: &str,
        files: &[UploadFile],
        summary: &str,
    ) -> DataResult<CommitInfo> {
        if files.is_empty() {
            return Err(DataError::Publish("nothing to upload".to_string()));
        }

        let mut staged = Vec::with_capacity(files.len());
        for file in files {
            let file = file.clone();
            let entry = tokio::task::spawn_blocking(move || StagedFile::read(&file))
                .await
                .map_err(|e| DataError::Publish(format!("hashing task failed: {e}")))??;
            staged.push(entry);
        }

        self.preupload(repo_id, repo_type, revision, &mut staged).await?;
        for file in staged.iter().filter(|f| f.lfs) {
            self.upload_lfs(repo_id, repo_type, revision, file).await?;
        }
        self.commit(repo_id, repo_type, revision, &staged, summary).await
    }

    /// Ask the hub which files must go through LFS; drops files it says to ignore.
    async fn preupload(
        &self,
        repo_id: &str,
        repo_type: HubRepoType,
        revision: &str,
        staged: &mut Vec<StagedFile>,
    ) -> DataResult<()> {
        let url = format!("{}/api/{}/{repo_id}/preupload/{revision}", self.endpoint, repo_type.api_segment());
        let files: Vec<_> = staged
            .iter()
            .map(|f| json!({ "path": f.path_in_repo, "size": f.size, "sample": BASE64.encode(&f.sample) }))
            .collect();

        let response = self.client.post(&url).bearer_auth(&self.token).json(&json!({ "files": files })).send().await?;
        let decision: PreuploadResponse = check(response, &url).await?.json().await?;

        for entry in decision.files {
            if entry.should_ignore {
                tracing::warn!("Hub ignores {}; skipping", entry.path);
                staged.retain(|f| f.path_in_repo != entry.path);
                continue;
            }
            if let Some(file) = staged.iter_mut().find(|f| f.path_in_repo == entry.path) {
                file.lfs = entry.upload_mode == "lfs";
            }
        }
        Ok(())
    }

    async fn upload_lfs(&self, repo_id: &str, repo_type: HubRepoType, revision: &str, file: &StagedFile) -> DataResult<()> {
        let url = format!("{}/{}{repo_id}.git/info/lfs/objects/batch", self.endpoint, repo_type.git_prefix());
        let body = json!({
            "operation": "upload",
            "transfers": ["basic"],
            "objects": [{ "oid": file.sha256, "size": file.size }],
            "hash_algo": "sha256",
            "ref": { "name": revision },
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("accept", LFS_CONTENT_TYPE)
            .header("content-type", LFS_CONTENT_TYPE)
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;
        let batch: LfsBatchResponse = check(response, &url).await?.json().await?;

        let object = batch
            .objects
            .into_iter()
            .find(|o| o.oid == file.sha256)
            .ok_or_else(|| DataError::Publish(format!("LFS batch response has no entry for {}", file.path_in_repo)))?;
        if let Some(err) = object.error {
            return Err(DataError::Publish(format!("LFS rejected {}: {} {}", file.path_in_repo, err.code, err.message)));
        }

        // No actions means the object is already stored.
        let Some(actions) = object.actions else {
            tracing::debug!("LFS object for {} already uploaded", file.path_in_repo);
            return Ok(());
        };

        if let Some(upload) = actions.upload {
            match multipart_plan(&upload.header, file.size)? {
                Some((chunk_size, parts)) => self.upload_multipart(file, &upload.href, chunk_size, &parts).await?,
                None => {
                    let body = Body::wrap_stream(ReaderStream::new(tokio::fs::File::open(&file.local_path).await?));
                    let mut request = self.client.put(&upload.href).header(CONTENT_LENGTH, file.size).body(body);
                    for (name, value) in &upload.header {
                        request = request.header(name.as_str(), value.as_str());
                    }
                    check(request.send().await?, &upload.href).await?;
                }
            }
            tracing::info!("Uploaded {} ({} bytes) via LFS", file.path_in_repo, file.size);
        }

        if let Some(verify) = actions.verify {
            let mut request = self
                .client
                .post(&verify.href)
                .bearer_auth(&self.token)
                .json(&json!({ "oid": file.sha256, "size": file.size }));
            for (name, value) in &verify.header {
                request = request.header(name.as_str(), value.as_str());
            }
            check(request.send().await?, &verify.href).await?;
        }
        Ok(())
    }

    /// PUT each `chunk_size` slice to its part URL, then report the etags to `completion_url`.
    async fn upload_multipart(
        &self,
        file: &StagedFile,
        completion_url: &str,
        chunk_size: u64,
        parts: &[String],
    ) -> DataResult<()> {
        let mut reader = tokio::fs::File::open(&file.local_path).await?;
        let mut etags = Vec::with_capacity(parts.len());
        for (index, part_url) in parts.iter().enumerate() {
            let offset = index as u64 * chunk_size;
            reader.seek(SeekFrom::Start(offset)).await?;
            let len = chunk_size.min(file.size - offset);
            let mut chunk = Vec::with_capacity(len as usize);
            (&mut reader).take(len).read_to_end(&mut chunk).await?;

            let response = check(self.client.put(part_url).body(chunk).send().await?, part_url).await?;
            let etag = response
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| DataError::Publish(format!("part {} of {} returned no etag", index + 1, file.path_in_repo)))?;
            tracing::debug!("Uploaded part {}/{} of {}", index + 1, parts.len(), file.path_in_repo);
            etags.push(json!({ "partNumber": index + 1, "etag": etag }));
        }

        let response = self
            .client
            .post(completion_url)
            .header("accept", LFS_CONTENT_TYPE)
            .header("content-type", LFS_CONTENT_TYPE)
            .body(serde_json::to_vec(&json!({ "oid": file.sha256, "parts": etags }))?)
            .send()
            .await?;
        check(response, completion_url).await?;
        Ok(())
    }

    async fn commit(
        &self,
        repo_id: &str,
        repo_type: HubRepoType,
        revision: &str,
        staged: &[StagedFile],
        summary: &str,
    ) -> DataResult<CommitInfo> {
        let mut lines = vec![json!({ "key": "header", "value": { "summary": summary, "description": "" } })];
        for file in staged {
            if file.lfs {
                lines.push(json!({
                    "key": "lfsFile",
                    "value": { "path": file.path_in_repo, "algo": "sha256", "oid": file.sha256 },
                }));
            } else {
                let content = tokio::fs::read(&file.local_path).await?;
                lines.push(json!({
                    "key": "file",
                    "value": { "path": file.path_in_repo, "content": BASE64.encode(&content), "encoding": "base64" },
                }));
            }
        }

        let mut body = String::new();
        for line in &lines {
            body.push_str(&serde_json::to_string(line)?);
            body.push('\n');
        }

        let url = format!("{}/api/{}/{repo_id}/commit/{revision}", self.endpoint, repo_type.api_segment());
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let commit: CommitResponse = check(response, &url).await?.json().await?;
        tracing::info!("Committed {} file(s) to {}: {}", staged.len(), repo_id, commit.commit_url);
        Ok(CommitInfo { commit_url: commit.commit_url, commit_oid: commit.commit_oid })
    }
}

async fn check(response: reqwest::Response, url: &str) -> DataResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(DataError::Publish(format!("{url} returned {status}: {body}")))
}

/// `HF_TOKEN`, then `$HF_HOME/token`, then `~/.cache/huggingface/token`.
pub fn resolve_token() -> Option<String> {
    if let Ok(token) = std::env::var("HF_TOKEN") {
        if !token.trim().is_empty() {
            return Some(token.trim().to_string());
        }
    }

    let token_path = std::env::var("HF_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache").join("huggingface")))?
        .join("token");
    read_token_file(&token_path)
}

fn read_token_file(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}
