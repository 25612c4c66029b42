//! Exported certificate artifacts and their download locations.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, BufReader};

use super::ChallengeError;
use crate::acme::{ArtifactPaths, ARTIFACT_FILES};

const STAGING_DIR: &str = ".staging";
const BUFFER_SIZE: usize = 64 * 1024;

/// One exported file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Lower-case hex SHA-256 of the file contents.
    pub sha256: String,
}

/// The four files exported for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
    pub domain: String,
    pub dir: PathBuf,
    pub files: Vec<ArtifactFile>,
}

/// Public URL of one exported file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadLink {
    pub name: String,
    pub url: String,
}

/// Per-domain export directory.
pub fn export_dir(root: &Path, domain: &str) -> PathBuf {
    root.join(domain)
}

/// `{base_url}/{domain}/{file}` for every exported file.
pub fn download_links(base_url: &str, domain: &str) -> Vec<DownloadLink> {
    let base = base_url.trim_end_matches('/');
    ARTIFACT_FILES
        .iter()
        .map(|name| DownloadLink {
            name: name.to_string(),
            url: format!("{}/{}/{}", base, domain, name),
        })
        .collect()
}

/// Creates a fresh staging directory under the export root.
///
/// Staging lives on the same filesystem as the export so promotion is a rename.
pub(crate) async fn create_staging(root: &Path, domain: &str) -> Result<PathBuf, ChallengeError> {
    let dir = root
        .join(STAGING_DIR)
        .join(format!("{}-{}", domain, uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| ChallengeError::io(&dir, e))?;
    Ok(dir)
}

/// Best-effort removal of a staging directory.
pub(crate) async fn discard_staging(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove staging directory");
        }
    }
}

/// Copies every artifact from `from` to `to`, failing on the first absent source.
pub(crate) async fn copy_artifacts(
    from: &ArtifactPaths,
    to: &ArtifactPaths,
) -> Result<(), ChallengeError> {
    for ((_, source), (_, target)) in from.entries().into_iter().zip(to.entries()) {
        if !fs::try_exists(source).await.unwrap_or(false) {
            return Err(ChallengeError::ArtifactMissing {
                path: source.to_path_buf(),
            });
        }
        fs::copy(source, target)
            .await
            .map_err(|e| ChallengeError::io(target, e))?;
    }
    Ok(())
}

/// Checks that every artifact exists and is non-empty.
pub(crate) async fn ensure_complete(paths: &ArtifactPaths) -> Result<(), ChallengeError> {
    for (_, path) in paths.entries() {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => {
                return Err(ChallengeError::ArtifactMissing {
                    path: path.to_path_buf(),
                })
            }
        }
    }
    Ok(())
}

/// Moves staged artifacts over the export directory, one rename per file.
pub(crate) async fn promote(staging: &Path, target: &Path) -> Result<(), ChallengeError> {
    fs::create_dir_all(target)
        .await
        .map_err(|e| ChallengeError::io(target, e))?;

    for name in ARTIFACT_FILES {
        let from = staging.join(name);
        let to = target.join(name);
        fs::rename(&from, &to)
            .await
            .map_err(|e| ChallengeError::io(&to, e))?;
    }

    discard_staging(staging).await;
    Ok(())
}

async fn sha256_file(path: &Path) -> Result<(u64, String), ChallengeError> {
    let file = File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ChallengeError::ArtifactMissing {
                path: path.to_path_buf(),
            }
        } else {
            ChallengeError::io(path, e)
        }
    })?;

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut hasher = Sha256::new();
    let mut total = 0u64;

    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| ChallengeError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Sizes and fingerprints of the exported files for `domain`.
pub async fn describe(domain: &str, dir: &Path) -> Result<ArtifactSet, ChallengeError> {
    let mut files = Vec::with_capacity(ARTIFACT_FILES.len());
    for name in ARTIFACT_FILES {
        let path = dir.join(name);
        let (size_bytes, sha256) = sha256_file(&path).await?;
        files.push(ArtifactFile {
            name: name.to_string(),
            path,
            size_bytes,
            sha256,
        });
    }

    Ok(ArtifactSet {
        domain: domain.to_string(),
        dir: dir.to_path_buf(),
        files,
    })
}
