use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::db::{get_all_teams, get_team_by_id, get_team_recent_matches};
use crate::error::{AppError, AppResult};
use crate::models::{FormEntry, TeamForm, TeamId};
use crate::services::features::resolve_side;
use crate::utils::results_to_form;

pub const MAX_FORM_WINDOW: usize = 50;

/// A team's last `n` results, oldest first, with points and goal difference.
pub async fn team_form(pool: &SqlitePool, team_id: TeamId, n: usize) -> AppResult<TeamForm> {
    if n == 0 || n > MAX_FORM_WINDOW {
        return Err(AppError::InvalidInput(format!(
            "n must be between 1 and {MAX_FORM_WINDOW}"
        )));
    }

    let team = get_team_by_id(pool, team_id)
        .await?
        .ok_or(AppError::TeamNotFound(team_id))?;

    let recent = get_team_recent_matches(pool, team_id, n as i64).await?;
    let names: HashMap<TeamId, String> = get_all_teams(pool)
        .await?
        .into_iter()
        .map(|t| (t.id, t.name))
        .collect();

    let mut entries = Vec::with_capacity(recent.len());
    let mut points = 0;
    let mut goal_difference = 0;

    // Reverse to show chronological order
    for record in recent.iter().rev() {
        let Some(view) = resolve_side(record, team_id) else {
            continue;
        };

        points += view.points();
        goal_difference += view.goal_diff();

        entries.push(FormEntry {
            date: record.date,
            opponent: names
                .get(&view.opponent_id)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string()),
            opponent_id: view.opponent_id,
            home: view.was_home,
            team_goals: view.scored,
            opponent_goals: view.conceded,
            result: view.result_char(),
        });
    }

    let dated: Vec<(char, _)> = entries.iter().map(|e| (e.result, e.date)).collect();

    Ok(TeamForm {
        team_id,
        team_name: team.name,
        form: results_to_form(&dated),
        last_n_results: entries,
        points,
        goal_difference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_or_create_team, insert_match_if_absent, test_pool};
    use chrono::NaiveDate;

    #[tokio::test]
    async fn form_is_chronological_with_totals() {
        let pool = test_pool().await;
        let (a, _) = get_or_create_team(&pool, "Arsenal").await.unwrap();
        let (b, _) = get_or_create_team(&pool, "Brentford").await.unwrap();
        let d = |day| NaiveDate::from_ymd_opt(2023, 2, day).unwrap();

        insert_match_if_absent(&pool, d(1), "2022-23", a.id, b.id, 2, 1).await.unwrap();
        insert_match_if_absent(&pool, d(8), "2022-23", b.id, a.id, 3, 0).await.unwrap();
        insert_match_if_absent(&pool, d(15), "2022-23", a.id, b.id, 1, 1).await.unwrap();

        let form = team_form(&pool, a.id, 5).await.unwrap();
        assert_eq!(form.team_name, "Arsenal");
        assert_eq!(form.form, "WLD");
        assert_eq!(form.points, 4);
        assert_eq!(form.goal_difference, -2);
        assert_eq!(form.last_n_results[1].opponent, "Brentford");
        assert!(!form.last_n_results[1].home);

        let last_two = team_form(&pool, a.id, 2).await.unwrap();
        assert_eq!(last_two.form, "LD");
    }

    #[tokio::test]
    async fn unknown_team_is_not_found() {
        let pool = test_pool().await;
        let err = team_form(&pool, 42, 5).await.unwrap_err();
        assert!(matches!(err, AppError::TeamNotFound(42)));
    }
}
