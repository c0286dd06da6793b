use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type TeamId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

/// A completed match. Rows are never updated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: i64,
    pub date: NaiveDate,
    pub season: String,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub home_goals: i32,
    pub away_goals: i32,
}

impl MatchResult {
    pub fn outcome(&self) -> Outcome {
        Outcome::from_score(self.home_goals, self.away_goals)
    }

    /// True when the two sides are exactly `a` and `b`, in either order.
    pub fn is_between(&self, a: TeamId, b: TeamId) -> bool {
        (self.home_team_id == a && self.away_team_id == b)
            || (self.home_team_id == b && self.away_team_id == a)
    }
}

/// Match outcome from the home side's point of view. The discriminants are
/// the class indices used by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    HomeWin = 0,
    Draw = 1,
    AwayWin = 2,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::HomeWin, Outcome::Draw, Outcome::AwayWin];

    pub fn from_score(home_goals: i32, away_goals: i32) -> Self {
        match home_goals.cmp(&away_goals) {
            std::cmp::Ordering::Greater => Outcome::HomeWin,
            std::cmp::Ordering::Equal => Outcome::Draw,
            std::cmp::Ordering::Less => Outcome::AwayWin,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub accuracy: f64,
    pub log_loss: f64,
    pub train_size: usize,
    pub test_size: usize,
}

/// One training run: the serialized classifier on disk plus its held-out metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRun {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub model_path: String,
    pub metrics: TrainingMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// All features, in feature-vector order
    pub feature_contributions: Vec<FeatureContribution>,
    /// The three largest by absolute contribution, largest first
    pub top_features: Vec<FeatureContribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub season: String,
    pub proba_home: f64,
    pub proba_draw: f64,
    pub proba_away: f64,
    pub explanation: Explanation,
}

/// Optional filters for match listings. Date bounds are inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchFilter {
    pub team_id: Option<TeamId>,
    pub season: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormEntry {
    pub date: NaiveDate,
    pub opponent: String,
    pub opponent_id: TeamId,
    pub home: bool,
    pub team_goals: i32,
    pub opponent_goals: i32,
    pub result: char, // 'W', 'D' or 'L'
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamForm {
    pub team_id: TeamId,
    pub team_name: String,
    pub last_n_results: Vec<FormEntry>,
    pub form: String, // e.g. "WDLWW", oldest first
    pub points: i32,
    pub goal_difference: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub teams_created: usize,
    pub matches_created: usize,
    pub matches_skipped: usize,
    pub rows_rejected: usize,
}

// API Response types
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}
