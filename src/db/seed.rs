use anyhow::Result;
use chrono::{Duration, NaiveDate};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::SqlitePool;
use statrs::distribution::Poisson;

use crate::db::{get_or_create_team, insert_match_if_absent};
use crate::models::IngestSummary;

const DEMO_SEASON: &str = "2023-24";
const DEMO_SEED: u64 = 7;
const HOME_RATE: f64 = 1.45;
const AWAY_RATE: f64 = 1.15;

// (name, strength)
const DEMO_TEAMS: [(&str, f64); 10] = [
    ("Northbridge Rovers", 1.35),
    ("Eastfield Athletic", 1.25),
    ("Kingsport United", 1.15),
    ("Harbour City", 1.10),
    ("Millbrook Town", 1.00),
    ("Westvale Wanderers", 0.95),
    ("Ashford Albion", 0.90),
    ("Redcliffe Rangers", 0.85),
    ("Stonegate County", 0.80),
    ("Lowmoor Borough", 0.75),
];

/// Double round-robin by the circle method: each pair meets once per half,
/// with home and away swapped in the second half.
fn double_round_robin(team_count: usize) -> Vec<Vec<(usize, usize)>> {
    let mut ring: Vec<usize> = (0..team_count).collect();
    let mut first_half: Vec<Vec<(usize, usize)>> = Vec::with_capacity(team_count - 1);

    for round in 0..team_count - 1 {
        let fixtures: Vec<(usize, usize)> = (0..team_count / 2)
            .map(|i| {
                let (a, b) = (ring[i], ring[team_count - 1 - i]);
                if (round + i) % 2 == 0 {
                    (a, b)
                } else {
                    (b, a)
                }
            })
            .collect();
        first_half.push(fixtures);
        // team 0 stays fixed, the rest rotate
        ring[1..].rotate_right(1);
    }

    let second_half: Vec<Vec<(usize, usize)>> = first_half
        .iter()
        .map(|round| round.iter().map(|&(h, a)| (a, h)).collect())
        .collect();

    first_half.into_iter().chain(second_half).collect()
}

/// Seeds a fictional ten-team league with one simulated season. Scores are
/// drawn from Poisson rates scaled by team strength with a fixed RNG seed,
/// so every run produces the same table. Safe to run repeatedly.
pub async fn seed_demo_league(pool: &SqlitePool) -> Result<IngestSummary> {
    tracing::info!("Seeding demo league ({} teams)...", DEMO_TEAMS.len());

    let mut summary = IngestSummary::default();
    let mut team_ids = Vec::with_capacity(DEMO_TEAMS.len());
    for (name, _) in DEMO_TEAMS {
        let (team, created) = get_or_create_team(pool, name).await?;
        summary.teams_created += usize::from(created);
        team_ids.push(team.id);
    }

    let mut rng = StdRng::seed_from_u64(DEMO_SEED);
    let kickoff = NaiveDate::from_ymd_opt(2023, 8, 12).ok_or_else(|| anyhow::anyhow!("invalid kickoff date"))?;

    for (round, fixtures) in double_round_robin(DEMO_TEAMS.len()).into_iter().enumerate() {
        let date = kickoff + Duration::weeks(round as i64);

        for (home, away) in fixtures {
            let home_strength = DEMO_TEAMS[home].1;
            let away_strength = DEMO_TEAMS[away].1;

            let home_dist = Poisson::new(HOME_RATE * home_strength / away_strength)?;
            let away_dist = Poisson::new(AWAY_RATE * away_strength / home_strength)?;
            let home_goals: f64 = home_dist.sample(&mut rng);
            let away_goals: f64 = away_dist.sample(&mut rng);

            let inserted = insert_match_if_absent(
                pool,
                date,
                DEMO_SEASON,
                team_ids[home],
                team_ids[away],
                home_goals as i32,
                away_goals as i32,
            )
            .await?;

            match inserted {
                Some(_) => summary.matches_created += 1,
                None => summary.matches_skipped += 1,
            }
        }
    }

    tracing::info!(
        "Demo league seeded: {} teams created, {} matches created, {} already present",
        summary.teams_created,
        summary.matches_created,
        summary.matches_skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_all_matches_ordered, test_pool};
    use std::collections::HashSet;

    #[test]
    fn schedule_pairs_every_team_home_and_away() {
        let rounds = double_round_robin(10);
        assert_eq!(rounds.len(), 18);

        let fixtures: Vec<(usize, usize)> = rounds.iter().flatten().copied().collect();
        assert_eq!(fixtures.len(), 90);

        let unique: HashSet<_> = fixtures.iter().collect();
        assert_eq!(unique.len(), 90);
        assert!(fixtures.iter().all(|(h, a)| h != a));

        for round in &rounds {
            let mut playing: Vec<usize> = round.iter().flat_map(|&(h, a)| [h, a]).collect();
            playing.sort_unstable();
            assert_eq!(playing, (0..10).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn seeding_is_deterministic_and_idempotent() {
        let pool = test_pool().await;

        let first = seed_demo_league(&pool).await.unwrap();
        assert_eq!(first.teams_created, 10);
        assert_eq!(first.matches_created, 90);

        let second = seed_demo_league(&pool).await.unwrap();
        assert_eq!(second.teams_created, 0);
        assert_eq!(second.matches_created, 0);
        assert_eq!(second.matches_skipped, 90);

        let matches = get_all_matches_ordered(&pool).await.unwrap();
        assert_eq!(matches.len(), 90);
        assert!(matches.iter().all(|m| m.home_goals >= 0 && m.away_goals >= 0));
        assert_eq!(matches[0].date, NaiveDate::from_ymd_opt(2023, 8, 12).unwrap());

        let other = test_pool().await;
        seed_demo_league(&other).await.unwrap();
        let replay = get_all_matches_ordered(&other).await.unwrap();
        let scores = |ms: &[crate::models::MatchResult]| {
            ms.iter().map(|m| (m.date, m.home_goals, m.away_goals)).collect::<Vec<_>>()
        };
        assert_eq!(scores(&matches), scores(&replay));
    }
}
