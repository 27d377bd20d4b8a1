// Scoring engine: pure functions from fetched stats to bounded scores.
//
// Nothing here does I/O, and identical inputs always give identical outputs.

pub mod advanced;
pub mod fallback;
pub mod matchup;
pub mod weather;

use startsit_core::config::ScoringWeights;
use tracing::debug;

use crate::stats::{DefenseBundle, StatsBundle};

pub use advanced::advanced_stats_score;
pub use fallback::fallback_grade;
pub use matchup::matchup_score;
pub use weather::weather_impact_score;

/// The midpoint every sub-score falls back to when its inputs are missing.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Clamp into [0, 100]. NaN becomes neutral.
pub(crate) fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        NEUTRAL_SCORE
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// All sub-scores for one player plus their blend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreCard {
    pub matchup: f64,
    pub weather: f64,
    pub advanced: Option<f64>,
    pub blended: f64,
}

/// Weighted mean of the available sub-scores. A missing advanced score drops
/// out and the remaining weights are renormalized to sum to 1.
pub fn blended_score(
    matchup: f64,
    weather: f64,
    advanced: Option<f64>,
    weights: &ScoringWeights,
) -> f64 {
    let components = [
        (Some(matchup), weights.matchup_weight),
        (Some(weather), weights.weather_weight),
        (advanced, weights.advanced_weight),
    ];

    let mut total = 0.0;
    let mut weight_sum = 0.0;
    for (score, weight) in components {
        if let Some(score) = score {
            if weight > 0.0 {
                total += score * weight;
                weight_sum += weight;
            }
        }
    }

    if weight_sum == 0.0 {
        return NEUTRAL_SCORE;
    }
    clamp_score(total / weight_sum)
}

/// Run every scorer for one player against one defense.
pub fn score_player(
    player: &StatsBundle,
    defense: &DefenseBundle,
    weights: &ScoringWeights,
) -> ScoreCard {
    if defense.is_empty() {
        debug!(team_id = %defense.team_id, "defense bundle is empty, matchup scores neutral");
    }
    let player_advanced = player.advanced.as_ref().filter(|a| !a.is_empty());
    if player_advanced.is_none() {
        debug!(player_id = %player.player_id, "no advanced stats, blending without them");
    }

    let matchup = matchup_score(player.position, defense);
    let weather = weather_impact_score(player.position, player.weather.as_ref());
    let advanced =
        advanced_stats_score(player.position, player_advanced, defense.advanced.as_ref());
    ScoreCard {
        matchup,
        weather,
        advanced,
        blended: blended_score(matchup, weather, advanced, weights),
    }
}
