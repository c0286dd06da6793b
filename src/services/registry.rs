use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::get_latest_model_run;
use crate::error::{AppError, AppResult};
use crate::models::ModelRun;
use crate::services::artifacts::ArtifactStore;
use crate::services::classifier::SoftmaxModel;

/// A training run together with its deserialized classifier.
#[derive(Debug)]
pub struct LoadedModel {
    pub run: ModelRun,
    pub model: SoftmaxModel,
}

#[derive(Debug)]
enum ActiveModel {
    Empty,
    Missing(String),
    Ready(Arc<LoadedModel>),
}

/// Holds the model used for serving. It only changes on `reload`, which
/// re-reads the newest run and its artifact.
pub struct ModelRegistry {
    artifacts: ArtifactStore,
    active: RwLock<ActiveModel>,
}

impl ModelRegistry {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self {
            artifacts,
            active: RwLock::new(ActiveModel::Empty),
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Points the registry at the newest training run. Returns `Ok(None)` when
    /// nothing has been trained yet.
    pub async fn reload(&self, pool: &SqlitePool) -> AppResult<Option<ModelRun>> {
        let Some(run) = get_latest_model_run(pool).await? else {
            *self.active.write().await = ActiveModel::Empty;
            return Ok(None);
        };

        match self.artifacts.load(Path::new(&run.model_path)).await {
            Ok(model) => {
                tracing::info!(
                    "Activated model run {} (accuracy {:.3}, log loss {:.3})",
                    run.id,
                    run.metrics.accuracy,
                    run.metrics.log_loss
                );
                let loaded = Arc::new(LoadedModel { run: run.clone(), model });
                *self.active.write().await = ActiveModel::Ready(loaded);
                Ok(Some(run))
            }
            Err(AppError::ArtifactMissing(path)) => {
                tracing::warn!("Latest model run {} points at missing file {}", run.id, path);
                *self.active.write().await = ActiveModel::Missing(path.clone());
                Err(AppError::ArtifactMissing(path))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn current(&self) -> AppResult<Arc<LoadedModel>> {
        match &*self.active.read().await {
            ActiveModel::Ready(loaded) => Ok(Arc::clone(loaded)),
            ActiveModel::Missing(path) => Err(AppError::ArtifactMissing(path.clone())),
            ActiveModel::Empty => Err(AppError::NoModel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_model_run, test_pool};
    use crate::models::TrainingMetrics;
    use chrono::Utc;

    fn metrics() -> TrainingMetrics {
        TrainingMetrics {
            accuracy: 0.5,
            log_loss: 1.05,
            train_size: 40,
            test_size: 10,
        }
    }

    #[tokio::test]
    async fn empty_registry_reports_no_model() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(ArtifactStore::new(dir.path()));

        assert!(registry.reload(&pool).await.unwrap().is_none());
        assert!(matches!(registry.current().await, Err(AppError::NoModel)));
    }

    #[tokio::test]
    async fn reload_picks_up_new_runs() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let registry = ModelRegistry::new(store.clone());

        let model = SoftmaxModel {
            coefficients: [[0.0; 6]; 3],
            intercepts: [0.0; 3],
            iterations: 1,
        };
        let created_at = Utc::now();
        let path = store.save(&model, created_at).await.unwrap();
        let run = ModelRun {
            id: "run-1".to_string(),
            created_at,
            model_path: path.display().to_string(),
            metrics: metrics(),
        };
        insert_model_run(&pool, &run).await.unwrap();

        // stale until reloaded
        assert!(matches!(registry.current().await, Err(AppError::NoModel)));
        registry.reload(&pool).await.unwrap();
        assert_eq!(registry.current().await.unwrap().run.id, "run-1");
    }

    #[tokio::test]
    async fn missing_artifact_file_is_surfaced() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(ArtifactStore::new(dir.path()));

        let run = ModelRun {
            id: "run-gone".to_string(),
            created_at: Utc::now(),
            model_path: dir.path().join("model_gone.json").display().to_string(),
            metrics: metrics(),
        };
        insert_model_run(&pool, &run).await.unwrap();

        assert!(matches!(registry.reload(&pool).await, Err(AppError::ArtifactMissing(_))));
        assert!(matches!(registry.current().await, Err(AppError::ArtifactMissing(_))));
    }
}
