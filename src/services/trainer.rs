use anyhow::anyhow;
use chrono::Utc;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{get_all_matches_ordered, insert_model_run};
use crate::error::{AppError, AppResult};
use crate::models::{MatchResult, ModelRun, Outcome, TrainingMetrics};
use crate::services::artifacts::ArtifactStore;
use crate::services::classifier::{Classifier, SoftmaxModel, SoftmaxRegression};
use crate::services::features::{check_history, extract, sort_newest_first, FeatureVector};

pub const MIN_MATCHES: usize = 50;
pub const MIN_INFORMATIVE_ROWS: usize = 30;
pub const TEST_FRACTION: f64 = 0.2;
pub const SPLIT_SEED: u64 = 42;

const PROBA_CLIP: f64 = 1e-15;

/// Labeled, informative feature rows in chronological order.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub rows: Vec<FeatureVector>,
    pub labels: Vec<Outcome>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn subset(&self, indices: &[usize]) -> TrainingSet {
        TrainingSet {
            rows: indices.iter().map(|&i| self.rows[i]).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Replays history in date order, computing each match's features from the
/// matches before it.
pub fn build_training_set(matches: &[MatchResult]) -> AppResult<TrainingSet> {
    if matches.len() < MIN_MATCHES {
        return Err(AppError::InsufficientData {
            what: "matches",
            required: MIN_MATCHES,
            found: matches.len(),
        });
    }
    check_history(matches)?;

    let mut newest_first = matches.to_vec();
    sort_newest_first(&mut newest_first);

    let mut set = TrainingSet::default();
    // oldest first, same tie-break as the history view
    for record in newest_first.iter().rev() {
        let earlier = newest_first.partition_point(|m| m.date >= record.date);
        let features = extract(
            record.home_team_id,
            record.away_team_id,
            record.date,
            &newest_first[earlier..],
        );

        if !features.is_informative() {
            continue;
        }
        set.rows.push(features);
        set.labels.push(record.outcome());
    }

    if set.len() < MIN_INFORMATIVE_ROWS {
        return Err(AppError::InsufficientData {
            what: "matches with historical data",
            required: MIN_INFORMATIVE_ROWS,
            found: set.len(),
        });
    }

    Ok(set)
}

/// Seeded shuffle of `0..n` split into (train, test) index lists.
pub fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let test_len = ((n as f64) * test_fraction).ceil() as usize;
    let train = indices.split_off(test_len.min(n));
    (train, indices)
}

pub fn accuracy(model: &dyn Classifier, set: &TrainingSet) -> f64 {
    if set.is_empty() {
        return 0.0;
    }
    let correct = set
        .rows
        .iter()
        .zip(&set.labels)
        .filter(|(row, label)| model.predict(row) == **label)
        .count();
    correct as f64 / set.len() as f64
}

/// Mean cross-entropy of the true class, probabilities clipped away from 0 and 1.
pub fn log_loss(model: &dyn Classifier, set: &TrainingSet) -> f64 {
    if set.is_empty() {
        return 0.0;
    }
    let total: f64 = set
        .rows
        .iter()
        .zip(&set.labels)
        .map(|(row, label)| {
            let p = model.predict_proba(row)[label.index()];
            -p.clamp(PROBA_CLIP, 1.0 - PROBA_CLIP).ln()
        })
        .sum();
    total / set.len() as f64
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model: SoftmaxModel,
    pub metrics: TrainingMetrics,
}

pub fn fit_and_evaluate(set: &TrainingSet, fitter: &SoftmaxRegression) -> AppResult<TrainedModel> {
    let (train_idx, test_idx) = split_indices(set.len(), TEST_FRACTION, SPLIT_SEED);
    let train = set.subset(&train_idx);
    let test = set.subset(&test_idx);

    let model = fitter.fit(&train.rows, &train.labels)?;

    let metrics = TrainingMetrics {
        accuracy: accuracy(&model, &test),
        log_loss: log_loss(&model, &test),
        train_size: train.len(),
        test_size: test.len(),
    };

    Ok(TrainedModel { model, metrics })
}

/// End-to-end training run: read history, fit, evaluate, then persist the
/// artifact and its run record.
pub struct TrainingPipeline {
    fitter: SoftmaxRegression,
    artifacts: ArtifactStore,
}

impl TrainingPipeline {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self {
            fitter: SoftmaxRegression::default(),
            artifacts,
        }
    }

    pub async fn train(&self, pool: &SqlitePool) -> AppResult<ModelRun> {
        let matches = get_all_matches_ordered(pool).await?;

        let today = Utc::now().date_naive();
        let future = matches.iter().filter(|m| m.date > today).count();
        if future > 0 {
            tracing::warn!("{} stored matches are dated after today; training on them anyway", future);
        }

        let fitter = self.fitter.clone();
        let trained = tokio::task::spawn_blocking(move || {
            let set = build_training_set(&matches)?;
            tracing::info!("Built {} informative rows from {} matches", set.len(), matches.len());
            fit_and_evaluate(&set, &fitter)
        })
        .await
        .map_err(|e| anyhow!("training task failed: {e}"))??;

        // Nothing is persisted until the fit and evaluation have succeeded
        let created_at = Utc::now();
        let path = self.artifacts.save(&trained.model, created_at).await?;
        let run = ModelRun {
            id: Uuid::new_v4().to_string(),
            created_at,
            model_path: path.display().to_string(),
            metrics: trained.metrics,
        };

        if let Err(e) = insert_model_run(pool, &run).await {
            self.artifacts.remove(&path).await;
            return Err(e.into());
        }

        tracing::info!(
            "Trained model {}: accuracy {:.3}, log loss {:.3} ({} train / {} test, {} iterations)",
            run.id,
            run.metrics.accuracy,
            run.metrics.log_loss,
            run.metrics.train_size,
            run.metrics.test_size,
            trained.model.iterations
        );

        Ok(run)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, NaiveDate};
    use sqlx::SqlitePool;

    use crate::db::{get_or_create_team, insert_match_if_absent};
    use crate::models::{MatchResult, Team};

    /// Ten teams, `n` daily matches cycling through home win, draw, away win.
    pub fn league_matches(n: usize) -> Vec<MatchResult> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let home = (i % 10) as i64 + 1;
                let away = ((i + 1) % 10) as i64 + 1;
                let (home_goals, away_goals) = match i % 3 {
                    0 => (2, 1),
                    1 => (1, 1),
                    _ => (0, 2),
                };
                MatchResult {
                    id: i as i64 + 1,
                    date: start + Duration::days(i as i64),
                    season: "2023-24".to_string(),
                    home_team_id: home,
                    away_team_id: away,
                    home_goals,
                    away_goals,
                }
            })
            .collect()
    }

    pub async fn seed_league(pool: &SqlitePool, n: usize) -> Vec<Team> {
        let mut teams = Vec::new();
        for i in 0..10 {
            let (team, _) = get_or_create_team(pool, &format!("Team{i}")).await.unwrap();
            teams.push(team);
        }
        for m in league_matches(n) {
            let home = &teams[(m.home_team_id - 1) as usize];
            let away = &teams[(m.away_team_id - 1) as usize];
            insert_match_if_absent(pool, m.date, &m.season, home.id, away.id, m.home_goals, m.away_goals)
                .await
                .unwrap();
        }
        teams
    }
}
