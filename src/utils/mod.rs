use chrono::{DateTime, NaiveDate};

/// Parse a match date from the formats seen in results CSVs.
pub fn parse_match_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // two-digit years first: %Y would also accept "23" as year 23
    for format in ["%Y-%m-%d", "%d/%m/%y", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive())
}

/// Convert dated W/D/L results to a form string, oldest first (e.g. "WDLWW").
pub fn results_to_form(results: &[(char, NaiveDate)]) -> String {
    let mut sorted_results = results.to_vec();
    sorted_results.sort_by_key(|(_, date)| *date);
    sorted_results.iter().map(|(result, _)| *result).collect()
}

/// Convert probability to fair decimal odds
pub fn probability_to_odds(probability: f64) -> f64 {
    if probability <= 0.0 {
        return 1000.0; // Very high odds for impossible events
    }
    1.0 / probability
}

/// Non-negative and summing to one within `tolerance`.
pub fn probabilities_sum_to_one(probs: &[f64], tolerance: f64) -> bool {
    probs.iter().all(|p| p.is_finite() && *p >= 0.0)
        && (probs.iter().sum::<f64>() - 1.0).abs() <= tolerance
}

/// Validate team name format
pub fn validate_team_name(name: &str) -> bool {
    !name.trim().is_empty() && name.len() <= 100
}
