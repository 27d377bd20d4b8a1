// Matchup score: how friendly the opposing defense is for a position.
//
// Two components, each 0-100:
//   rank      where the defense ranks against the player's phase of the game
//             (pass for QB/WR/TE, run for RB, overall for K), linear from
//             rank 1 = 0 to rank N = 100
//   weakness  fantasy points allowed to the position relative to the league
//             average, 50 at parity, +/-1 point per percent above/below
// Missing components are dropped and the remaining weights renormalized.

use startsit_core::model::Position;

use crate::scoring::{clamp_score, NEUTRAL_SCORE};
use crate::stats::{DefenseBundle, DefenseRankings};

const RANK_WEIGHT: f64 = 0.6;
const WEAKNESS_WEIGHT: f64 = 0.4;

/// 0-100, higher is a more favourable matchup. An empty defense bundle is
/// neutral (50).
pub fn matchup_score(position: Position, defense: &DefenseBundle) -> f64 {
    let rank = defense
        .rankings
        .as_ref()
        .and_then(|r| rank_component(position, r));
    let weakness = weakness_component(position, defense);

    let mut total = 0.0;
    let mut weight = 0.0;
    if let Some(r) = rank {
        total += r * RANK_WEIGHT;
        weight += RANK_WEIGHT;
    }
    if let Some(w) = weakness {
        total += w * WEAKNESS_WEIGHT;
        weight += WEAKNESS_WEIGHT;
    }

    if weight == 0.0 {
        return NEUTRAL_SCORE;
    }
    clamp_score(total / weight)
}

/// Defensive rank the position plays against. Team defenses have no
/// opposing-defense rank.
fn relevant_rank(position: Position, rankings: &DefenseRankings) -> Option<u8> {
    match position {
        Position::Quarterback | Position::WideReceiver | Position::TightEnd => {
            rankings.pass_defense_rank.or(rankings.total_defense_rank)
        }
        Position::RunningBack => rankings.run_defense_rank.or(rankings.total_defense_rank),
        Position::Kicker => rankings.total_defense_rank,
        Position::Defense => None,
    }
}

fn rank_component(position: Position, rankings: &DefenseRankings) -> Option<f64> {
    let rank = relevant_rank(position, rankings)?;
    let n = rankings.team_count;
    if n < 2 || rank == 0 {
        return None;
    }
    let rank = rank.min(n);
    Some(clamp_score(f64::from(rank - 1) / f64::from(n - 1) * 100.0))
}

fn weakness_component(position: Position, defense: &DefenseBundle) -> Option<f64> {
    let allowance = defense.points_allowed.get(&position)?;
    let allowed = allowance.fantasy_points_allowed_per_game;
    let average = allowance.league_average;
    if !allowed.is_finite() || !average.is_finite() || average <= 0.0 {
        return None;
    }
    Some(clamp_score(50.0 + (allowed / average - 1.0) * 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::PositionAllowance;

    fn rankings(pass: Option<u8>, run: Option<u8>, total: Option<u8>) -> DefenseRankings {
        DefenseRankings {
            pass_defense_rank: pass,
            run_defense_rank: run,
            total_defense_rank: total,
            team_count: 32,
        }
    }

    fn defense(rankings: Option<DefenseRankings>) -> DefenseBundle {
        DefenseBundle {
            team_id: "KC".into(),
            rankings,
            ..Default::default()
        }
    }

    #[test]
    fn empty_defense_is_neutral() {
        for pos in [
            Position::Quarterback,
            Position::RunningBack,
            Position::WideReceiver,
            Position::TightEnd,
            Position::Kicker,
            Position::Defense,
        ] {
            assert_eq!(matchup_score(pos, &defense(None)), 50.0);
        }
    }

    #[test]
    fn worst_pass_defense_is_best_matchup_for_qb() {
        let d = defense(Some(rankings(Some(32), Some(1), None)));
        assert_eq!(matchup_score(Position::Quarterback, &d), 100.0);
        // The same defense is the toughest for a running back.
        assert_eq!(matchup_score(Position::RunningBack, &d), 0.0);
    }

    #[test]
    fn kicker_uses_total_rank() {
        let d = defense(Some(rankings(Some(32), Some(32), Some(1))));
        assert_eq!(matchup_score(Position::Kicker, &d), 0.0);
    }

    #[test]
    fn missing_specific_rank_falls_back_to_total() {
        let d = defense(Some(rankings(None, None, Some(32))));
        assert_eq!(matchup_score(Position::WideReceiver, &d), 100.0);
    }

    #[test]
    fn rank_and_weakness_blend() {
        let mut d = defense(Some(rankings(Some(17), None, None)));
        d.points_allowed.insert(
            Position::WideReceiver,
            PositionAllowance {
                fantasy_points_allowed_per_game: 44.0,
                league_average: 40.0,
            },
        );
        // rank: 16/31*100 = 51.61..., weakness: 60.0
        let expected = (16.0 / 31.0 * 100.0) * 0.6 + 60.0 * 0.4;
        assert!((matchup_score(Position::WideReceiver, &d) - expected).abs() < 1e-9);
    }

    #[test]
    fn defense_position_uses_weakness_only() {
        let mut d = defense(Some(rankings(Some(1), Some(1), Some(1))));
        d.points_allowed.insert(
            Position::Defense,
            PositionAllowance {
                fantasy_points_allowed_per_game: 12.0,
                league_average: 8.0,
            },
        );
        assert_eq!(matchup_score(Position::Defense, &d), 100.0);
    }

    #[test]
    fn extreme_inputs_stay_in_range() {
        let mut d = defense(Some(DefenseRankings {
            pass_defense_rank: Some(250),
            run_defense_rank: Some(0),
            total_defense_rank: None,
            team_count: 32,
        }));
        d.points_allowed.insert(
            Position::RunningBack,
            PositionAllowance {
                fantasy_points_allowed_per_game: -50.0,
                league_average: 20.0,
            },
        );
        d.points_allowed.insert(
            Position::Quarterback,
            PositionAllowance {
                fantasy_points_allowed_per_game: f64::NAN,
                league_average: 20.0,
            },
        );
        for pos in [Position::Quarterback, Position::RunningBack] {
            let s = matchup_score(pos, &d);
            assert!((0.0..=100.0).contains(&s), "{pos}: {s}");
        }
    }
}
