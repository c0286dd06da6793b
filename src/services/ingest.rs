use anyhow::Context;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::io::Read;
use std::path::Path;

use crate::db::{get_or_create_team, insert_match_if_absent};
use crate::error::{AppError, AppResult};
use crate::models::IngestSummary;
use crate::utils::{parse_match_date, validate_team_name};

pub const REQUIRED_COLUMNS: [&str; 6] = ["date", "season", "home_team", "away_team", "home_goals", "away_goals"];

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    season: String,
    home_team: String,
    away_team: String,
    home_goals: String,
    away_goals: String,
}

/// Loads a results CSV into the teams and matches tables. Teams are matched by
/// exact name and matches are deduplicated on date and sides, so re-running
/// the same file changes nothing.
pub async fn ingest_csv(pool: &SqlitePool, path: &Path) -> AppResult<IngestSummary> {
    let body = match tokio::fs::read(path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::FileNotFound(format!("CSV file not found: {}", path.display())));
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("reading {}", path.display()))
                .into())
        }
    };

    tracing::info!("Ingesting {}", path.display());
    ingest_reader(pool, body.as_slice()).await
}

pub async fn ingest_reader<R: Read>(pool: &SqlitePool, reader: R) -> AppResult<IngestSummary> {
    let rows = read_rows(reader)?;
    let mut summary = IngestSummary::default();

    // One transaction for the whole file: a storage failure leaves nothing behind
    let mut tx = pool.begin().await.map_err(anyhow::Error::from)?;

    for (line, row) in rows.into_iter().enumerate() {
        let Some(row) = row else {
            summary.rows_rejected += 1;
            continue;
        };

        let home_name = row.home_team.trim();
        let away_name = row.away_team.trim();
        if !validate_team_name(home_name) || !validate_team_name(away_name) {
            tracing::warn!("Skipping row {}: invalid team name", line + 1);
            summary.rows_rejected += 1;
            continue;
        }
        if home_name == away_name {
            tracing::warn!("Skipping row {}: {} listed as both sides", line + 1, home_name);
            summary.rows_rejected += 1;
            continue;
        }

        let Some(date) = parse_match_date(&row.date) else {
            tracing::warn!("Skipping row {} with invalid date: {:?}", line + 1, row.date);
            summary.rows_rejected += 1;
            continue;
        };

        let goals = (parse_goals(&row.home_goals), parse_goals(&row.away_goals));
        let (Some(home_goals), Some(away_goals)) = goals else {
            tracing::warn!(
                "Skipping row {} with invalid score: {:?}-{:?}",
                line + 1,
                row.home_goals,
                row.away_goals
            );
            summary.rows_rejected += 1;
            continue;
        };

        let (home, home_created) = get_or_create_team(&mut *tx, home_name).await?;
        let (away, away_created) = get_or_create_team(&mut *tx, away_name).await?;
        summary.teams_created += usize::from(home_created) + usize::from(away_created);

        let inserted = insert_match_if_absent(
            &mut *tx,
            date,
            row.season.trim(),
            home.id,
            away.id,
            home_goals,
            away_goals,
        )
        .await?;

        match inserted {
            Some(_) => summary.matches_created += 1,
            None => summary.matches_skipped += 1,
        }
    }

    tx.commit().await.map_err(anyhow::Error::from)?;

    tracing::info!(
        "Ingestion completed: {} teams created, {} matches created, {} skipped, {} rejected",
        summary.teams_created,
        summary.matches_created,
        summary.matches_skipped,
        summary.rows_rejected
    );

    Ok(summary)
}

/// Goal counts are non-negative and fit the stored integer column.
fn parse_goals(raw: &str) -> Option<i32> {
    raw.trim().parse::<i32>().ok().filter(|goals| *goals >= 0)
}

/// Parses every record up front; malformed records come back as `None`.
fn read_rows<R: Read>(reader: R) -> AppResult<Vec<Option<CsvRow>>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);

    let headers = csv_reader.headers().context("reading CSV header")?.clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "CSV must contain columns: {} (missing {})",
            REQUIRED_COLUMNS.join(", "),
            missing.join(", ")
        )));
    }

    Ok(csv_reader
        .deserialize::<CsvRow>()
        .enumerate()
        .map(|(line, record)| match record {
            Ok(row) => Some(row),
            Err(e) => {
                tracing::warn!("Skipping malformed CSV row {}: {}", line + 1, e);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_all_matches_ordered, get_all_teams, test_pool};

    const TWO_MATCHES: &str = "\
date,season,home_team,away_team,home_goals,away_goals
2023-01-01,2023-24,Arsenal,Liverpool,2,1
2023-01-02,2023-24,Chelsea,Manchester United,1,0
";

    #[tokio::test]
    async fn ingestion_is_idempotent() {
        let pool = test_pool().await;

        let first = ingest_reader(&pool, TWO_MATCHES.as_bytes()).await.unwrap();
        assert_eq!(first.teams_created, 4);
        assert_eq!(first.matches_created, 2);

        let second = ingest_reader(&pool, TWO_MATCHES.as_bytes()).await.unwrap();
        assert_eq!(second.teams_created, 0);
        assert_eq!(second.matches_created, 0);
        assert_eq!(second.matches_skipped, 2);

        assert_eq!(get_all_teams(&pool).await.unwrap().len(), 4);
        assert_eq!(get_all_matches_ordered(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn creates_teams_and_matches() {
        let pool = test_pool().await;
        let csv = "date,season,home_team,away_team,home_goals,away_goals\n2023-01-01,2023-24,Arsenal,Liverpool,2,1\n";
        ingest_reader(&pool, csv.as_bytes()).await.unwrap();

        let teams = get_all_teams(&pool).await.unwrap();
        let names: Vec<_> = teams.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Arsenal", "Liverpool"]);

        let matches = get_all_matches_ordered(&pool).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].home_team_id, teams[0].id);
        assert_eq!(matches[0].away_team_id, teams[1].id);
        assert_eq!((matches[0].home_goals, matches[0].away_goals), (2, 1));
        assert_eq!(matches[0].season, "2023-24");
    }

    #[tokio::test]
    async fn bad_rows_are_rejected_not_fatal() {
        let pool = test_pool().await;
        let csv = "\
date,season,home_team,away_team,home_goals,away_goals
yesterday,2023-24,Arsenal,Liverpool,2,1
2023-01-02,2023-24,Arsenal,Arsenal,1,0
2023-01-03,2023-24,Arsenal,Liverpool,two,1
2023-01-04,2023-24,Arsenal,Liverpool,1,1
";
        let summary = ingest_reader(&pool, csv.as_bytes()).await.unwrap();
        assert_eq!(summary.rows_rejected, 3);
        assert_eq!(summary.matches_created, 1);
        assert_eq!(summary.teams_created, 2);
    }

    #[tokio::test]
    async fn out_of_range_scores_are_rejected_rows() {
        let pool = test_pool().await;
        let csv = "\
date,season,home_team,away_team,home_goals,away_goals
2023-01-01,2023-24,Arsenal,Liverpool,2,1
2023-01-02,2023-24,Chelsea,Fulham,3000000000,0
2023-01-03,2023-24,Liverpool,Arsenal,-1,2
2023-01-04,2023-24,Fulham,Chelsea,0,0
";
        let summary = ingest_reader(&pool, csv.as_bytes()).await.unwrap();
        assert_eq!(summary.rows_rejected, 2);
        assert_eq!(summary.matches_created, 2);
        assert_eq!(get_all_matches_ordered(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn storage_failure_rolls_back_the_whole_file() {
        let pool = test_pool().await;
        sqlx::query("DROP TABLE matches").execute(&pool).await.unwrap();

        let err = ingest_reader(&pool, TWO_MATCHES.as_bytes()).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(get_all_teams(&pool).await.unwrap().is_empty());
    }

    #[test]
    fn goal_parsing_bounds() {
        assert_eq!(parse_goals(" 3 "), Some(3));
        assert_eq!(parse_goals("0"), Some(0));
        assert_eq!(parse_goals("-1"), None);
        assert_eq!(parse_goals("3000000000"), None);
        assert_eq!(parse_goals("two"), None);
    }

    #[tokio::test]
    async fn missing_columns_are_reported() {
        let pool = test_pool().await;
        let csv = "date,home_team,away_team\n2023-01-01,A,B\n";
        let err = ingest_reader(&pool, csv.as_bytes()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(msg) if msg.contains("season")));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let pool = test_pool().await;
        let err = ingest_csv(&pool, Path::new("/definitely/not/here.csv")).await.unwrap_err();
        assert!(matches!(err, AppError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn reads_csv_from_disk() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches.csv");
        std::fs::write(&path, TWO_MATCHES).unwrap();

        let summary = ingest_csv(&pool, &path).await.unwrap();
        assert_eq!(summary.matches_created, 2);
    }
}
