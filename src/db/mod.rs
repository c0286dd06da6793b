pub mod seed;
pub use seed::seed_demo_league;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteRow},
    Acquire, QueryBuilder, Row, Sqlite, SqlitePool,
};
use std::future::Future;
use std::str::FromStr;

use crate::config::Settings;
use crate::models::*;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    if let Some(parent) = std::path::Path::new(file_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Called from the CLI where no pool exists yet.
pub async fn init_database(settings: &Settings) -> Result<()> {
    let pool = create_pool(&settings.database_url).await?;
    init_database_with_pool(&pool).await
}

/// Called from the server so schema creation shares the main pool.
pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            season TEXT NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            home_goals INTEGER NOT NULL CHECK (home_goals >= 0),
            away_goals INTEGER NOT NULL CHECK (away_goals >= 0),
            FOREIGN KEY (home_team_id) REFERENCES teams (id),
            FOREIGN KEY (away_team_id) REFERENCES teams (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // model_runs: one row per training run, newest row is the serving candidate
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_runs (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            metrics_json TEXT NOT NULL,
            model_path TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            season TEXT NOT NULL,
            proba_home REAL NOT NULL,
            proba_draw REAL NOT NULL,
            proba_away REAL NOT NULL,
            explanation_json TEXT NOT NULL,
            FOREIGN KEY (home_team_id) REFERENCES teams (id),
            FOREIGN KEY (away_team_id) REFERENCES teams (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_season_date ON matches(season, date)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_home_team ON matches(home_team_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_away_team ON matches(away_team_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_model_runs_created ON model_runs(created_at)")
        .execute(pool)
        .await?;

    tracing::info!("Database initialized successfully");
    Ok(())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

fn team_from_row(row: &SqliteRow) -> Team {
    Team {
        id: row.get("id"),
        name: row.get("name"),
    }
}

fn match_from_row(row: &SqliteRow) -> Result<MatchResult> {
    let raw_date: String = row.get("date");
    Ok(MatchResult {
        id: row.get("id"),
        date: NaiveDate::parse_from_str(&raw_date, DATE_FORMAT)
            .with_context(|| format!("bad match date {raw_date:?}"))?,
        season: row.get("season"),
        home_team_id: row.get("home_team_id"),
        away_team_id: row.get("away_team_id"),
        home_goals: row.get("home_goals"),
        away_goals: row.get("away_goals"),
    })
}

fn matches_from_rows(rows: Vec<SqliteRow>) -> Result<Vec<MatchResult>> {
    rows.iter().map(match_from_row).collect()
}

// Team operations

/// Looks a team up by exact name, creating it when absent. The flag is true
/// when a new row was inserted. Accepts a pool or an open transaction.
pub fn get_or_create_team<'a, A>(conn: A, name: &'a str) -> impl Future<Output = Result<(Team, bool)>> + Send + 'a
where
    A: Acquire<'a, Database = Sqlite> + Send + 'a,
{
    async move {
        let mut conn = conn.acquire().await?;

        let existing = sqlx::query("SELECT id, name FROM teams WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(row) = existing {
            return Ok((team_from_row(&row), false));
        }

        let id = sqlx::query("INSERT INTO teams (name) VALUES (?)")
            .bind(name)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

        Ok((Team { id, name: name.to_string() }, true))
    }
}

pub async fn get_team_by_id(pool: &SqlitePool, team_id: TeamId) -> Result<Option<Team>> {
    let row = sqlx::query("SELECT id, name FROM teams WHERE id = ?")
        .bind(team_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(team_from_row))
}

pub async fn get_team_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Team>> {
    let row = sqlx::query("SELECT id, name FROM teams WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(team_from_row))
}

pub async fn team_exists(pool: &SqlitePool, team_id: TeamId) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM teams WHERE id = ?")
        .bind(team_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

pub async fn get_all_teams(pool: &SqlitePool) -> Result<Vec<Team>> {
    let rows = sqlx::query("SELECT id, name FROM teams ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(team_from_row).collect())
}

// Match operations

/// Inserts a match unless one already exists for the same date and sides.
/// Returns the new row id, or `None` when the match was a duplicate.
pub fn insert_match_if_absent<'a, A>(
    conn: A,
    date: NaiveDate,
    season: &'a str,
    home_team_id: TeamId,
    away_team_id: TeamId,
    home_goals: i32,
    away_goals: i32,
) -> impl Future<Output = Result<Option<i64>>> + Send + 'a
where
    A: Acquire<'a, Database = Sqlite> + Send + 'a,
{
    async move {
        let mut conn = conn.acquire().await?;
        let date = date.format(DATE_FORMAT).to_string();

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM matches WHERE date = ? AND home_team_id = ? AND away_team_id = ?",
        )
        .bind(&date)
        .bind(home_team_id)
        .bind(away_team_id)
        .fetch_optional(&mut *conn)
        .await?;

        if existing.is_some() {
            return Ok(None);
        }

        let id = sqlx::query(
            r#"
        INSERT INTO matches (date, season, home_team_id, away_team_id, home_goals, away_goals)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&date)
        .bind(season)
        .bind(home_team_id)
        .bind(away_team_id)
        .bind(home_goals)
        .bind(away_goals)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        Ok(Some(id))
    }
}

/// All matches dated strictly before `date`, most recent first.
pub async fn get_matches_before(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<MatchResult>> {
    let rows = sqlx::query("SELECT * FROM matches WHERE date < ? ORDER BY date DESC, id DESC")
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_all(pool)
        .await?;

    matches_from_rows(rows)
}

/// Every stored match in chronological order.
pub async fn get_all_matches_ordered(pool: &SqlitePool) -> Result<Vec<MatchResult>> {
    let rows = sqlx::query("SELECT * FROM matches ORDER BY date ASC, id ASC")
        .fetch_all(pool)
        .await?;

    matches_from_rows(rows)
}

pub async fn query_matches(pool: &SqlitePool, filter: &MatchFilter) -> Result<Vec<MatchResult>> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM matches WHERE 1=1");

    if let Some(team_id) = filter.team_id {
        query
            .push(" AND (home_team_id = ")
            .push_bind(team_id)
            .push(" OR away_team_id = ")
            .push_bind(team_id)
            .push(")");
    }

    if let Some(season) = &filter.season {
        query.push(" AND season = ").push_bind(season.clone());
    }

    if let Some(date_from) = filter.date_from {
        query
            .push(" AND date >= ")
            .push_bind(date_from.format(DATE_FORMAT).to_string());
    }

    if let Some(date_to) = filter.date_to {
        query
            .push(" AND date <= ")
            .push_bind(date_to.format(DATE_FORMAT).to_string());
    }

    query.push(" ORDER BY date DESC, id DESC");

    let rows = query.build().fetch_all(pool).await?;
    matches_from_rows(rows)
}

pub async fn get_team_recent_matches(
    pool: &SqlitePool,
    team_id: TeamId,
    limit: i64,
) -> Result<Vec<MatchResult>> {
    let rows = sqlx::query(
        r#"SELECT * FROM matches
           WHERE home_team_id = ? OR away_team_id = ?
           ORDER BY date DESC, id DESC LIMIT ?"#,
    )
    .bind(team_id)
    .bind(team_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    matches_from_rows(rows)
}

// Model run operations

pub async fn insert_model_run(pool: &SqlitePool, run: &ModelRun) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO model_runs (id, created_at, metrics_json, model_path)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&run.id)
    .bind(format_timestamp(&run.created_at))
    .bind(serde_json::to_string(&run.metrics)?)
    .bind(&run.model_path)
    .execute(pool)
    .await?;

    Ok(())
}

/// Newest training run. Rows sharing a timestamp resolve to the last inserted.
pub async fn get_latest_model_run(pool: &SqlitePool) -> Result<Option<ModelRun>> {
    let row = sqlx::query("SELECT * FROM model_runs ORDER BY created_at DESC, rowid DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(ModelRun {
        id: row.get("id"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        model_path: row.get("model_path"),
        metrics: serde_json::from_str(&row.get::<String, _>("metrics_json"))?,
    }))
}

// Prediction operations

pub async fn insert_prediction(pool: &SqlitePool, prediction: &Prediction) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO predictions
        (id, created_at, home_team_id, away_team_id, season,
         proba_home, proba_draw, proba_away, explanation_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&prediction.id)
    .bind(format_timestamp(&prediction.created_at))
    .bind(prediction.home_team_id)
    .bind(prediction.away_team_id)
    .bind(&prediction.season)
    .bind(prediction.proba_home)
    .bind(prediction.proba_draw)
    .bind(prediction.proba_away)
    .bind(serde_json::to_string(&prediction.explanation)?)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_recent_predictions(pool: &SqlitePool, limit: i64) -> Result<Vec<Prediction>> {
    let rows = sqlx::query("SELECT * FROM predictions ORDER BY created_at DESC, rowid DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await?;

    let mut predictions = Vec::new();
    for row in rows {
        predictions.push(Prediction {
            id: row.get("id"),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            home_team_id: row.get("home_team_id"),
            away_team_id: row.get("away_team_id"),
            season: row.get("season"),
            proba_home: row.get("proba_home"),
            proba_draw: row.get("proba_draw"),
            proba_away: row.get("proba_away"),
            explanation: serde_json::from_str(&row.get::<String, _>("explanation_json"))?,
        });
    }
    Ok(predictions)
}

/// Single-connection in-memory database with the schema applied.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    init_database_with_pool(&pool).await.expect("schema");
    pool
}
