use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::db::{
    create_pool, get_all_teams, get_team_by_name, init_database, init_database_with_pool, seed_demo_league,
};
use crate::models::{IngestSummary, Team};
use crate::services::{analytics, ingest, ArtifactStore, ModelRegistry, PredictionEngine, TrainingPipeline};
use crate::utils::probability_to_odds;

const SUGGESTION_THRESHOLD: f64 = 0.75;
const MAX_SUGGESTIONS: usize = 3;

async fn open_pool(settings: &Settings) -> Result<SqlitePool> {
    let pool = create_pool(&settings.database_url).await?;
    init_database_with_pool(&pool).await?;
    Ok(pool)
}

/// Closest known team names by Jaro-Winkler similarity, best first.
pub fn suggest_teams<'a>(name: &str, teams: &'a [Team]) -> Vec<&'a str> {
    let needle = name.to_lowercase();
    let mut scored: Vec<(f64, &str)> = teams
        .iter()
        .map(|t| (strsim::jaro_winkler(&needle, &t.name.to_lowercase()), t.name.as_str()))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().take(MAX_SUGGESTIONS).map(|(_, name)| name).collect()
}

/// Exact name lookup; prints suggestions and returns `None` when there is no match.
async fn resolve_team(pool: &SqlitePool, name: &str) -> Result<Option<Team>> {
    if let Some(team) = get_team_by_name(pool, name.trim()).await? {
        return Ok(Some(team));
    }

    println!("❌ No team named '{}'", name);
    let teams = get_all_teams(pool).await?;
    let suggestions = suggest_teams(name, &teams);
    if suggestions.is_empty() {
        println!("💡 Run 'matchmind ingest' or 'matchmind seed' to load teams");
    } else {
        println!("💡 Did you mean: {}?", suggestions.join(", "));
    }
    Ok(None)
}

fn print_summary(summary: &IngestSummary) {
    println!("   Teams created:   {}", summary.teams_created);
    println!("   Matches created: {}", summary.matches_created);
    println!("   Already present: {}", summary.matches_skipped);
    if summary.rows_rejected > 0 {
        println!("   Rows rejected:   {}", summary.rows_rejected);
    }
}

pub async fn init_db(settings: &Settings) -> Result<()> {
    init_database(settings).await?;
    println!("✅ Database ready at {}", settings.database_url);
    Ok(())
}

pub async fn ingest_matches(settings: &Settings, csv_path: Option<PathBuf>) -> Result<()> {
    let pool = open_pool(settings).await?;
    let path = csv_path.unwrap_or_else(|| settings.csv_path.clone());

    println!("📥 Ingesting matches from {}...", path.display());
    let summary = ingest::ingest_csv(&pool, &path).await?;
    print_summary(&summary);
    println!("✅ Ingestion complete");
    Ok(())
}

pub async fn seed_demo(settings: &Settings) -> Result<()> {
    let pool = open_pool(settings).await?;

    println!("🌱 Seeding demo league...");
    let summary = seed_demo_league(&pool).await?;
    print_summary(&summary);
    println!("💡 Next: matchmind train");
    Ok(())
}

pub async fn train_model(settings: &Settings) -> Result<()> {
    let pool = open_pool(settings).await?;
    let trainer = TrainingPipeline::new(ArtifactStore::new(settings.model_dir.clone()));

    println!("🧠 Training outcome model...");
    let run = trainer.train(&pool).await?;

    println!("✅ Model run {}", run.id);
    println!("   Artifact:  {}", run.model_path);
    println!("   Accuracy:  {:.1}%", run.metrics.accuracy * 100.0);
    println!("   Log loss:  {:.4}", run.metrics.log_loss);
    println!("   Rows:      {} train / {} test", run.metrics.train_size, run.metrics.test_size);
    Ok(())
}

pub async fn predict_match(settings: &Settings, home: &str, away: &str, season: &str) -> Result<()> {
    let pool = open_pool(settings).await?;

    let (Some(home_team), Some(away_team)) = (resolve_team(&pool, home).await?, resolve_team(&pool, away).await?)
    else {
        return Ok(());
    };

    let registry = Arc::new(ModelRegistry::new(ArtifactStore::new(settings.model_dir.clone())));
    if registry.reload(&pool).await?.is_none() {
        println!("📭 No trained model found. Run 'matchmind train' first.");
        return Ok(());
    }
    let engine = PredictionEngine::new(registry);

    let today = Utc::now().date_naive();
    let prediction = engine.predict(&pool, home_team.id, away_team.id, season, today).await?;

    println!("🔮 {} vs {} ({})", home_team.name, away_team.name, season);
    for (label, p) in [
        ("Home win", prediction.proba_home),
        ("Draw", prediction.proba_draw),
        ("Away win", prediction.proba_away),
    ] {
        println!("   {:<9} {:>5.1}%  (fair odds {:.2})", label, p * 100.0, probability_to_odds(p));
    }

    println!("\n📊 Top features:");
    for feature in &prediction.explanation.top_features {
        println!(
            "   {:<28} value {:>6.2}  contribution {:+.4}",
            feature.feature, feature.value, feature.contribution
        );
    }
    Ok(())
}

pub async fn show_form(settings: &Settings, name: &str, n: usize) -> Result<()> {
    let pool = open_pool(settings).await?;

    let Some(team) = resolve_team(&pool, name).await? else {
        return Ok(());
    };

    let form = analytics::team_form(&pool, team.id, n).await?;
    if form.last_n_results.is_empty() {
        println!("📭 No matches recorded for {}", form.team_name);
        return Ok(());
    }

    println!("📅 {}: last {} results", form.team_name, form.last_n_results.len());
    for entry in &form.last_n_results {
        let venue = if entry.home { "vs" } else { "at" };
        println!(
            "   {} {} {} ({}-{}) {}",
            entry.date.format("%Y-%m-%d"),
            venue,
            entry.opponent,
            entry.team_goals,
            entry.opponent_goals,
            entry.result
        );
    }
    println!(
        "\n   Form {}  |  {} pts  |  GD {:+}",
        form.form, form.points, form.goal_difference
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teams(names: &[&str]) -> Vec<Team> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| Team {
                id: i as i64 + 1,
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn suggests_close_names_first() {
        let known = teams(&["Arsenal", "Aston Villa", "Liverpool", "Manchester United"]);
        let suggestions = suggest_teams("arsenl", &known);
        assert_eq!(suggestions.first(), Some(&"Arsenal"));
        assert!(!suggestions.contains(&"Manchester United"));
    }

    #[test]
    fn no_suggestions_for_unrelated_names() {
        let known = teams(&["Arsenal", "Liverpool"]);
        assert!(suggest_teams("zzzzqqq", &known).is_empty());
    }
}
