use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::github_api::{GitHubApiError, GitHubClient, JSON_ACCEPT, PER_PAGE};

pub trait SnapshotStore {
    /// Payload of the newest published snapshot, or `None` when nothing
    /// eligible has been published yet.
    fn fetch_latest(&self) -> Result<Option<Vec<u8>>, StoreError>;

    fn publish(&self, bytes: &[u8]) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub id: u64,
    pub name: String,
    pub expired: bool,
    pub created_at: DateTime<Utc>,
    pub archive_download_url: String,
}

/// Reads the previous snapshot from workflow artifacts and publishes the
/// current one to the data file that the workflow uploads after the run.
#[derive(Debug, Clone)]
pub struct GitHubArtifactStore {
    client: GitHubClient,
    owner: String,
    repo: String,
    artifact_name: String,
    data_file: PathBuf,
    entry_name: String,
}

impl GitHubArtifactStore {
    pub fn new(client: GitHubClient, config: &RuntimeConfig) -> Self {
        Self {
            client,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            artifact_name: config.artifact_name.clone(),
            data_file: config.data_file.clone(),
            entry_name: config.data_file_name(),
        }
    }

    fn list_artifacts(&self) -> Result<Vec<ArtifactSummary>, GitHubApiError> {
        let url = self.client.api_url(&format!(
            "repos/{}/{}/actions/artifacts",
            self.owner, self.repo
        ));
        let params = vec![
            ("name".to_string(), self.artifact_name.clone()),
            ("per_page".to_string(), PER_PAGE.to_string()),
        ];

        self.client.paginate(&url, &params, JSON_ACCEPT, parse_artifact_page)
    }
}

impl SnapshotStore for GitHubArtifactStore {
    fn fetch_latest(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let artifacts = self.list_artifacts()?;
        let Some(latest) = select_latest(&artifacts, &self.artifact_name) else {
            info!(
                artifact_name = %self.artifact_name,
                listed = artifacts.len(),
                "no eligible snapshot artifact found"
            );
            return Ok(None);
        };

        info!(
            artifact_id = latest.id,
            created_at = %latest.created_at,
            "downloading previous snapshot artifact"
        );
        let archive = self.client.get_bytes(&latest.archive_download_url)?;
        extract_payload(&archive, &self.entry_name).map(Some)
    }

    fn publish(&self, bytes: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.data_file, bytes).map_err(|source| StoreError::Write {
            path: self.data_file.clone(),
            source,
        })?;
        info!(path = %self.data_file.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }
}

/// Newest non-expired artifact named `name`; equal timestamps go to the
/// highest artifact id.
pub fn select_latest<'a>(
    artifacts: &'a [ArtifactSummary],
    name: &str,
) -> Option<&'a ArtifactSummary> {
    artifacts
        .iter()
        .filter(|artifact| artifact.name == name && !artifact.expired)
        .max_by_key(|artifact| (artifact.created_at, artifact.id))
}

pub fn parse_artifact_page(body: &str) -> Result<Vec<ArtifactSummary>, GitHubApiError> {
    let payload: ArtifactListResponse =
        serde_json::from_str(body).map_err(GitHubApiError::InvalidResponse)?;

    payload
        .artifacts
        .into_iter()
        .map(|artifact| {
            let created_at = DateTime::parse_from_rfc3339(&artifact.created_at)
                .map(|value| value.with_timezone(&Utc))
                .map_err(|_| GitHubApiError::InvalidField {
                    field: "created_at",
                    value: artifact.created_at.clone(),
                })?;

            Ok(ArtifactSummary {
                id: artifact.id,
                name: artifact.name,
                expired: artifact.expired,
                created_at,
                archive_download_url: artifact.archive_download_url,
            })
        })
        .collect()
}

/// Reads `entry_name` from a downloaded artifact archive. An archive holding
/// a single file is accepted whatever that file is called.
pub fn extract_payload(archive: &[u8], entry_name: &str) -> Result<Vec<u8>, StoreError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive)).map_err(StoreError::Archive)?;

    let index = match archive.index_for_name(entry_name) {
        Some(index) => index,
        None if archive.len() == 1 => 0,
        None => {
            return Err(StoreError::MissingEntry {
                name: entry_name.to_string(),
            });
        }
    };

    let mut file = archive.by_index(index).map_err(StoreError::Archive)?;
    let mut payload = Vec::new();
    file.read_to_end(&mut payload).map_err(StoreError::Read)?;
    Ok(payload)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension(format!("{}.tmp", std::process::id()));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact request failed")]
    Api(#[from] GitHubApiError),
    #[error("invalid artifact archive")]
    Archive(#[source] zip::result::ZipError),
    #[error("artifact archive has no entry named {name}")]
    MissingEntry { name: String },
    #[error("failed to read artifact archive entry")]
    Read(#[source] io::Error),
    #[error("failed to write snapshot to {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ArtifactListResponse {
    #[serde(default)]
    artifacts: Vec<ArtifactItem>,
}

#[derive(Debug, Deserialize)]
struct ArtifactItem {
    id: u64,
    name: String,
    #[serde(default)]
    expired: bool,
    created_at: String,
    archive_download_url: String,
}
