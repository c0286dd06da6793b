use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::services::classifier::SoftmaxModel;

/// Serialized classifiers on the local filesystem, one JSON file per run.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the model under a timestamped name and returns its path.
    pub async fn save(&self, model: &SoftmaxModel, created_at: DateTime<Utc>) -> AppResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating model dir {}", self.dir.display()))?;

        // Microseconds plus a short random suffix keep concurrent runs apart
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "model_{}_{}.json",
            created_at.format("%Y%m%d_%H%M%S_%6f"),
            &suffix[..8]
        );
        let path = self.dir.join(file_name);

        let body = serde_json::to_vec_pretty(model).context("serializing model")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing model file {}", path.display()))?;

        Ok(path)
    }

    pub async fn load(&self, path: &Path) -> AppResult<SoftmaxModel> {
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::ArtifactMissing(path.display().to_string()));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("reading model file {}", path.display()))
                    .into())
            }
        };

        let model = serde_json::from_slice(&body)
            .with_context(|| format!("decoding model file {}", path.display()))?;
        Ok(model)
    }

    /// Best-effort cleanup of an artifact whose run was never recorded.
    pub async fn remove(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Failed to remove orphaned model file {}: {}", path.display(), e);
        }
    }
}
