// Advanced-stats score: position-specific efficiency, lightly adjusted by
// how much EPA the opponent allows.
//
// Each metric is mapped linearly onto 0-100 between a "poor" and an "elite"
// anchor. The player side is the mean of whatever metrics are present; the
// defense side only contributes when the player side exists.

use startsit_core::model::Position;

use crate::scoring::clamp_score;
use crate::stats::{DefenseAdvancedStats, PlayerAdvancedStats};

const PLAYER_WEIGHT: f64 = 0.7;
const DEFENSE_WEIGHT: f64 = 0.3;

/// Linear mapping of `value` from [`poor`, `elite`] onto [0, 100].
fn scale(value: f64, poor: f64, elite: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    Some(clamp_score((value - poor) / (elite - poor) * 100.0))
}

fn mean(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

fn player_component(position: Position, stats: &PlayerAdvancedStats) -> Option<f64> {
    match position {
        Position::Quarterback => mean(&[
            stats.epa_per_play.and_then(|v| scale(v, -0.3, 0.4)),
            stats.cpoe.and_then(|v| scale(v, -8.0, 8.0)),
        ]),
        Position::RunningBack => mean(&[
            stats
                .rush_yards_over_expected_per_att
                .and_then(|v| scale(v, -1.0, 1.5)),
            stats.success_rate.and_then(|v| scale(v, 0.30, 0.50)),
        ]),
        Position::WideReceiver | Position::TightEnd => mean(&[
            stats.avg_separation.and_then(|v| scale(v, 2.0, 4.0)),
            stats.yac_per_reception.and_then(|v| scale(v, 2.0, 7.0)),
            stats.target_share.and_then(|v| scale(v, 0.05, 0.30)),
        ]),
        Position::Kicker | Position::Defense => None,
    }
}

fn defense_component(position: Position, defense: &DefenseAdvancedStats) -> Option<f64> {
    let allowed = if position == Position::RunningBack {
        defense.rush_epa_per_play_allowed
    } else {
        defense.pass_epa_per_play_allowed
    };
    allowed.and_then(|v| scale(v, -0.25, 0.25))
}

/// 0-100, or `None` when the player has no usable advanced metrics for
/// their position. Never substitutes a number for missing data.
pub fn advanced_stats_score(
    position: Position,
    player: Option<&PlayerAdvancedStats>,
    defense: Option<&DefenseAdvancedStats>,
) -> Option<f64> {
    let player_part = player_component(position, player?)?;
    match defense.and_then(|d| defense_component(position, d)) {
        Some(defense_part) => Some(clamp_score(
            player_part * PLAYER_WEIGHT + defense_part * DEFENSE_WEIGHT,
        )),
        None => Some(player_part),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_data_is_none_not_zero() {
        assert_eq!(advanced_stats_score(Position::Quarterback, None, None), None);
        assert_eq!(
            advanced_stats_score(
                Position::Quarterback,
                Some(&PlayerAdvancedStats::default()),
                Some(&DefenseAdvancedStats {
                    pass_epa_per_play_allowed: Some(0.1),
                    rush_epa_per_play_allowed: None,
                }),
            ),
            None
        );
    }

    #[test]
    fn metrics_for_another_position_are_ignored() {
        let rb_only = PlayerAdvancedStats {
            success_rate: Some(0.45),
            ..Default::default()
        };
        assert_eq!(advanced_stats_score(Position::WideReceiver, Some(&rb_only), None), None);
        assert!(advanced_stats_score(Position::RunningBack, Some(&rb_only), None).is_some());
    }

    #[test]
    fn kickers_and_defenses_have_no_advanced_score() {
        let all = PlayerAdvancedStats {
            epa_per_play: Some(0.2),
            cpoe: Some(3.0),
            rush_yards_over_expected_per_att: Some(0.5),
            success_rate: Some(0.4),
            avg_separation: Some(3.0),
            yac_per_reception: Some(5.0),
            target_share: Some(0.2),
        };
        assert_eq!(advanced_stats_score(Position::Kicker, Some(&all), None), None);
        assert_eq!(advanced_stats_score(Position::Defense, Some(&all), None), None);
    }

    #[test]
    fn quarterback_mean_of_epa_and_cpoe() {
        let qb = PlayerAdvancedStats {
            epa_per_play: Some(0.05), // midpoint -> 50
            cpoe: Some(8.0),          // elite -> 100
            ..Default::default()
        };
        let s = advanced_stats_score(Position::Quarterback, Some(&qb), None).unwrap();
        assert!((s - 75.0).abs() < 1e-9);
    }

    #[test]
    fn defense_adjusts_by_thirty_percent() {
        let wr = PlayerAdvancedStats {
            avg_separation: Some(3.0), // 50
            ..Default::default()
        };
        let soft = DefenseAdvancedStats {
            pass_epa_per_play_allowed: Some(0.25), // 100
            rush_epa_per_play_allowed: Some(-0.25),
        };
        let s = advanced_stats_score(Position::WideReceiver, Some(&wr), Some(&soft)).unwrap();
        assert!((s - 65.0).abs() < 1e-9);

        // Running backs read the rush side of the same defense.
        let rb = PlayerAdvancedStats {
            success_rate: Some(0.40), // 50
            ..Default::default()
        };
        let s = advanced_stats_score(Position::RunningBack, Some(&rb), Some(&soft)).unwrap();
        assert!((s - 35.0).abs() < 1e-9);
    }

    #[test]
    fn outliers_are_clamped() {
        let qb = PlayerAdvancedStats {
            epa_per_play: Some(5.0),
            cpoe: Some(-40.0),
            ..Default::default()
        };
        let s = advanced_stats_score(Position::Quarterback, Some(&qb), None).unwrap();
        assert!((0.0..=100.0).contains(&s));
        assert!((s - 50.0).abs() < 1e-9);
    }
}
