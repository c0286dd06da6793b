use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{MatchResult, TeamId};

pub const FEATURE_COUNT: usize = 6;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "home_team_points_last5",
    "away_team_points_last5",
    "home_goal_diff_last5",
    "away_goal_diff_last5",
    "head_to_head_points_last3",
    "home_advantage",
];

const FORM_WINDOW: usize = 5;
const HEAD_TO_HEAD_WINDOW: usize = 3;

/// Points a side earns for a result: 3 for a win, 1 for a draw, 0 for a loss.
pub fn points_for(scored: i32, conceded: i32) -> i32 {
    match scored.cmp(&conceded) {
        std::cmp::Ordering::Greater => 3,
        std::cmp::Ordering::Equal => 1,
        std::cmp::Ordering::Less => 0,
    }
}

/// One historical match seen from a particular team's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideView {
    pub was_home: bool,
    pub scored: i32,
    pub conceded: i32,
    pub opponent_id: TeamId,
}

impl SideView {
    pub fn points(&self) -> i32 {
        points_for(self.scored, self.conceded)
    }

    pub fn goal_diff(&self) -> i32 {
        self.scored - self.conceded
    }

    pub fn result_char(&self) -> char {
        match self.points() {
            3 => 'W',
            1 => 'D',
            _ => 'L',
        }
    }
}

/// Works out which side `team_id` occupied in `record` and re-maps the score
/// to that team's perspective. `None` if the team did not play.
pub fn resolve_side(record: &MatchResult, team_id: TeamId) -> Option<SideView> {
    if record.home_team_id == team_id {
        Some(SideView {
            was_home: true,
            scored: record.home_goals,
            conceded: record.away_goals,
            opponent_id: record.away_team_id,
        })
    } else if record.away_team_id == team_id {
        Some(SideView {
            was_home: false,
            scored: record.away_goals,
            conceded: record.home_goals,
            opponent_id: record.home_team_id,
        })
    } else {
        None
    }
}

/// Points and goal differential accumulated over a window of matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormSummary {
    pub points: i32,
    pub goal_diff: i32,
}

impl FormSummary {
    fn add(&mut self, view: SideView) {
        self.points += view.points();
        self.goal_diff += view.goal_diff();
    }
}

/// Fixed-order feature vector for a (home, away, as-of date) triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    /// At least one of the four form features is nonzero. All-zero form means
    /// neither side has usable history.
    pub fn is_informative(&self) -> bool {
        self.0[..4].iter().any(|v| *v != 0.0)
    }

    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.0.iter().copied())
    }
}

/// Form over a team's most recent `window` matches in `history` (newest first).
pub fn team_form<'a, I>(history: I, team_id: TeamId, window: usize) -> FormSummary
where
    I: IntoIterator<Item = &'a MatchResult>,
{
    let mut summary = FormSummary::default();
    history
        .into_iter()
        .filter_map(|m| resolve_side(m, team_id))
        .take(window)
        .for_each(|view| summary.add(view));
    summary
}

/// Points the queried home side took from the last `window` meetings between
/// the two teams, whichever of them hosted each meeting.
pub fn head_to_head_points<'a, I>(history: I, home_id: TeamId, away_id: TeamId, window: usize) -> i32
where
    I: IntoIterator<Item = &'a MatchResult>,
{
    history
        .into_iter()
        .filter(|m| m.is_between(home_id, away_id))
        .take(window)
        .filter_map(|m| resolve_side(m, home_id))
        .map(|view| view.points())
        .sum()
}

/// Builds the feature vector for `home_id` vs `away_id` using only matches
/// dated strictly before `as_of`. `history` must be ordered newest first.
pub fn extract(home_id: TeamId, away_id: TeamId, as_of: NaiveDate, history: &[MatchResult]) -> FeatureVector {
    let visible = || history.iter().filter(move |m| m.date < as_of);

    let home = team_form(visible(), home_id, FORM_WINDOW);
    let away = team_form(visible(), away_id, FORM_WINDOW);
    let h2h = head_to_head_points(visible(), home_id, away_id, HEAD_TO_HEAD_WINDOW);

    FeatureVector([
        home.points as f64,
        away.points as f64,
        home.goal_diff as f64,
        away.goal_diff as f64,
        h2h as f64,
        1.0,
    ])
}

/// Rejects history rows the extractor cannot interpret.
pub fn check_history(history: &[MatchResult]) -> AppResult<()> {
    match history.iter().find(|m| m.home_goals < 0 || m.away_goals < 0) {
        Some(bad) => Err(AppError::Extraction(format!(
            "match {} has a negative score {}-{}",
            bad.id, bad.home_goals, bad.away_goals
        ))),
        None => Ok(()),
    }
}

/// Orders matches newest first, ties broken by id, as `extract` expects.
pub fn sort_newest_first(matches: &mut [MatchResult]) {
    matches.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
}
