use anyhow::anyhow;
use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{get_matches_before, insert_prediction, team_exists};
use crate::error::{AppError, AppResult};
use crate::models::{Explanation, FeatureContribution, Outcome, Prediction, TeamId};
use crate::services::classifier::{Classifier, NUM_CLASSES};
use crate::services::features::{check_history, extract, FeatureVector};
use crate::services::registry::ModelRegistry;
use crate::utils::probabilities_sum_to_one;

const TOP_FEATURES: usize = 3;
const PROBABILITY_TOLERANCE: f64 = 1e-2;

/// Per-feature contribution: each class's weight times the feature value,
/// averaged over the classes.
pub fn explain(classifier: &dyn Classifier, features: &FeatureVector) -> Explanation {
    let coefficients = classifier.class_coefficients();

    let feature_contributions: Vec<FeatureContribution> = features
        .named()
        .enumerate()
        .map(|(i, (name, value))| {
            let total: f64 = coefficients.iter().map(|class| class[i] * value).sum();
            FeatureContribution {
                feature: name.to_string(),
                value,
                contribution: total / NUM_CLASSES as f64,
            }
        })
        .collect();

    let mut ranked = feature_contributions.clone();
    ranked.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
    ranked.truncate(TOP_FEATURES);

    Explanation {
        feature_contributions,
        top_features: ranked,
    }
}

pub struct PredictionEngine {
    registry: Arc<ModelRegistry>,
}

impl PredictionEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Predicts `home_id` vs `away_id` from history before `as_of` and records
    /// the prediction. Callers pass today's date when serving.
    pub async fn predict(
        &self,
        pool: &SqlitePool,
        home_id: TeamId,
        away_id: TeamId,
        season: &str,
        as_of: NaiveDate,
    ) -> AppResult<Prediction> {
        for team_id in [home_id, away_id] {
            if !team_exists(pool, team_id).await? {
                return Err(AppError::TeamNotFound(team_id));
            }
        }
        if home_id == away_id {
            return Err(AppError::InvalidMatchup(home_id));
        }

        let loaded = self.registry.current().await?;

        let history = get_matches_before(pool, as_of).await?;
        check_history(&history)?;
        let features = extract(home_id, away_id, as_of, &history);

        let probs = loaded.model.predict_proba(&features);
        if !probabilities_sum_to_one(&probs, PROBABILITY_TOLERANCE) {
            return Err(anyhow!("model {} produced invalid probabilities {:?}", loaded.run.id, probs).into());
        }

        let prediction = Prediction {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            home_team_id: home_id,
            away_team_id: away_id,
            season: season.to_string(),
            proba_home: probs[Outcome::HomeWin.index()],
            proba_draw: probs[Outcome::Draw.index()],
            proba_away: probs[Outcome::AwayWin.index()],
            explanation: explain(&loaded.model, &features),
        };
        insert_prediction(pool, &prediction).await?;

        tracing::info!(
            "Predicted {} vs {} with model {}: Home {:.2}%, Draw {:.2}%, Away {:.2}%",
            home_id,
            away_id,
            loaded.run.id,
            prediction.proba_home * 100.0,
            prediction.proba_draw * 100.0,
            prediction.proba_away * 100.0
        );

        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_recent_predictions, test_pool};
    use crate::services::artifacts::ArtifactStore;
    use crate::services::classifier::SoftmaxModel;
    use crate::services::features::FEATURE_COUNT;
    use crate::services::trainer::{fixtures::seed_league, TrainingPipeline};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    struct Fixed([[f64; FEATURE_COUNT]; NUM_CLASSES]);

    impl Classifier for Fixed {
        fn predict_proba(&self, _features: &FeatureVector) -> [f64; NUM_CLASSES] {
            [0.5, 0.3, 0.2]
        }

        fn class_coefficients(&self) -> [[f64; FEATURE_COUNT]; NUM_CLASSES] {
            self.0
        }
    }

    #[test]
    fn explanation_averages_class_contributions() {
        let classifier = Fixed([
            [0.3, 0.0, 1.0, 0.0, 0.0, 0.6],
            [0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            [0.0, -0.3, 1.0, 0.0, 0.0, -0.3],
        ]);
        let features = FeatureVector([9.0, 6.0, -3.0, 2.0, 4.0, 1.0]);

        let explanation = explain(&classifier, &features);
        assert_eq!(explanation.feature_contributions.len(), FEATURE_COUNT);

        let home_points = &explanation.feature_contributions[0];
        assert_eq!(home_points.feature, "home_team_points_last5");
        assert_eq!(home_points.value, 9.0);
        assert!((home_points.contribution - 0.9).abs() < 1e-12);

        let top: Vec<_> = explanation.top_features.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(
            top,
            vec!["home_goal_diff_last5", "home_team_points_last5", "away_team_points_last5"]
        );
        assert!((explanation.top_features[0].contribution + 3.0).abs() < 1e-12);
    }

    fn engine_with_store(dir: &std::path::Path) -> (Arc<ModelRegistry>, PredictionEngine) {
        let registry = Arc::new(ModelRegistry::new(ArtifactStore::new(dir)));
        let engine = PredictionEngine::new(Arc::clone(&registry));
        (registry, engine)
    }

    #[tokio::test]
    async fn unknown_team_fails_before_model_lookup() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine_with_store(dir.path());

        // no model exists either, but the team check comes first
        let err = engine.predict(&pool, 99999, 88888, "2023-24", as_of()).await.unwrap_err();
        assert!(matches!(err, AppError::TeamNotFound(99999)));
    }

    #[tokio::test]
    async fn predict_before_training_reports_no_model() {
        let pool = test_pool().await;
        let teams = seed_league(&pool, 60).await;
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine_with_store(dir.path());
        registry.reload(&pool).await.unwrap();

        let err = engine
            .predict(&pool, teams[0].id, teams[1].id, "2023-24", as_of())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoModel));
    }

    #[tokio::test]
    async fn same_team_is_rejected() {
        let pool = test_pool().await;
        let teams = seed_league(&pool, 10).await;
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine_with_store(dir.path());

        let err = engine
            .predict(&pool, teams[0].id, teams[0].id, "2023-24", as_of())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidMatchup(_)));
    }

    #[tokio::test]
    async fn prediction_is_a_distribution_and_is_recorded() {
        let pool = test_pool().await;
        let teams = seed_league(&pool, 60).await;
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine_with_store(dir.path());

        TrainingPipeline::new(registry.artifacts().clone())
            .train(&pool)
            .await
            .unwrap();
        registry.reload(&pool).await.unwrap();

        let prediction = engine
            .predict(&pool, teams[0].id, teams[1].id, "2023-24", as_of())
            .await
            .unwrap();

        let total = prediction.proba_home + prediction.proba_draw + prediction.proba_away;
        assert!((total - 1.0).abs() < 1e-2);
        for p in [prediction.proba_home, prediction.proba_draw, prediction.proba_away] {
            assert!(p >= 0.0);
        }
        assert_eq!(prediction.explanation.top_features.len(), 3);
        assert_eq!(prediction.explanation.feature_contributions[5].value, 1.0);

        let stored = get_recent_predictions(&pool, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, prediction.id);
        assert_eq!(stored[0].home_team_id, teams[0].id);
        assert_eq!(stored[0].away_team_id, teams[1].id);
        assert_eq!(stored[0].explanation, prediction.explanation);
    }

    #[tokio::test]
    async fn uses_loaded_model_coefficients() {
        let pool = test_pool().await;
        let teams = seed_league(&pool, 60).await;
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine_with_store(dir.path());

        // a model that always favours the home side
        let model = SoftmaxModel {
            coefficients: [[0.0; FEATURE_COUNT]; NUM_CLASSES],
            intercepts: [2.0, 0.0, 0.0],
            iterations: 1,
        };
        let created_at = Utc::now();
        let path = registry.artifacts().save(&model, created_at).await.unwrap();
        crate::db::insert_model_run(
            &pool,
            &crate::models::ModelRun {
                id: "fixed".to_string(),
                created_at,
                model_path: path.display().to_string(),
                metrics: crate::models::TrainingMetrics {
                    accuracy: 0.0,
                    log_loss: 0.0,
                    train_size: 0,
                    test_size: 0,
                },
            },
        )
        .await
        .unwrap();
        registry.reload(&pool).await.unwrap();

        let prediction = engine
            .predict(&pool, teams[2].id, teams[3].id, "2023-24", as_of())
            .await
            .unwrap();
        assert!(prediction.proba_home > prediction.proba_draw);
        assert!((prediction.proba_draw - prediction.proba_away).abs() < 1e-12);
        assert!(prediction
            .explanation
            .feature_contributions
            .iter()
            .all(|f| f.contribution == 0.0));
    }
}
