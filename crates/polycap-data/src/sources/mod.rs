//! Caption sources: where they live and how to read them.

pub mod afrimmd;
pub mod avila;

use crate::error::{DataError, DataResult};
use hf_hub::api::tokio::{Api, ApiBuilder};
use hf_hub::{Repo, RepoType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use afrimmd::load_afrimmd;
pub use avila::load_avila;

const HF_DATASETS_PREFIX: &str = "hf://datasets/";

/// A local file or a file inside a Hugging Face dataset repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceLocation {
    Local(PathBuf),
    Hub {
        repo_id: String,
        revision: Option<String>,
        path: String,
    },
}

impl FromStr for SourceLocation {
    type Err = DataError;

    /// Accepts `hf://datasets/<owner>/<name>[@<revision>]/<path>` or a plain filesystem path.
    fn from_str(s: &str) -> DataResult<Self> {
        let Some(rest) = s.strip_prefix(HF_DATASETS_PREFIX) else {
            if s.trim().is_empty() {
                return Err(DataError::InvalidSource("location is empty".to_string()));
            }
            return Ok(Self::Local(PathBuf::from(s)));
        };

        let mut parts = rest.splitn(3, '/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();
        if owner.is_empty() || name.is_empty() || path.is_empty() {
            return Err(DataError::InvalidSource(format!(
                "expected hf://datasets/<owner>/<name>/<path>, got {s}"
            )));
        }

        let (name, revision) = match name.split_once('@') {
            Some((n, rev)) if !rev.is_empty() => (n, Some(rev.to_string())),
            Some(_) => return Err(DataError::InvalidSource(format!("empty revision in {s}"))),
            None => (name, None),
        };

        Ok(Self::Hub { repo_id: format!("{owner}/{name}"), revision, path: path.to_string() })
    }
}

impl TryFrom<String> for SourceLocation {
    type Error = DataError;

    fn try_from(value: String) -> DataResult<Self> {
        value.parse()
    }
}

impl From<SourceLocation> for String {
    fn from(value: SourceLocation) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Hub { repo_id, revision: Some(rev), path } => {
                write!(f, "{HF_DATASETS_PREFIX}{repo_id}@{rev}/{path}")
            }
            Self::Hub { repo_id, revision: None, path } => write!(f, "{HF_DATASETS_PREFIX}{repo_id}/{path}"),
        }
    }
}

/// Resolves source locations to local files, downloading hub files into the hub cache.
pub struct SourceFetcher {
    api: Api,
}

impl SourceFetcher {
    pub fn new(token: Option<String>) -> DataResult<Self> {
        // The builder already picks up the token cached by `huggingface-cli login`.
        let mut builder = ApiBuilder::new();
        if token.is_some() {
            builder = builder.with_token(token);
        }
        let api = builder.build().map_err(|e| DataError::Hub(e.to_string()))?;
        Ok(Self { api })
    }

    pub async fn fetch(&self, location: &SourceLocation) -> DataResult<PathBuf> {
        match location {
            SourceLocation::Local(path) => {
                if !path.is_file() {
                    return Err(DataError::InvalidSource(format!("file not found: {}", path.display())));
                }
                Ok(path.clone())
            }
            SourceLocation::Hub { repo_id, revision, path } => {
                let repo = match revision {
                    Some(rev) => Repo::with_revision(repo_id.clone(), RepoType::Dataset, rev.clone()),
                    None => Repo::new(repo_id.clone(), RepoType::Dataset),
                };
                tracing::info!("Fetching {} from dataset {}", path, repo_id);
                self.api
                    .repo(repo)
                    .get(path)
                    .await
                    .map_err(|e| DataError::Download(format!("{location}: {e}")))
            }
        }
    }
}
