// Numeric-only grading, used whenever the grading provider is disabled or
// fails after retries.

use startsit_core::model::Grade;
use startsit_llm::GradeResult;

use crate::scoring::ScoreCard;
use crate::stats::{DefenseBundle, StatsBundle};

/// Lower bound of each grade band on the blended score.
const GRADE_BANDS: [(f64, Grade); 10] = [
    (90.0, Grade::APlus),
    (85.0, Grade::A),
    (80.0, Grade::AMinus),
    (75.0, Grade::BPlus),
    (70.0, Grade::B),
    (65.0, Grade::BMinus),
    (60.0, Grade::CPlus),
    (55.0, Grade::C),
    (50.0, Grade::CMinus),
    (40.0, Grade::D),
];

pub fn grade_for_score(blended: f64) -> Grade {
    GRADE_BANDS
        .iter()
        .find(|(floor, _)| blended >= *floor)
        .map(|(_, grade)| *grade)
        .unwrap_or(Grade::F)
}

/// Confidence reflects how much of the scoring input was actually present.
fn coverage_confidence(card: &ScoreCard, player: &StatsBundle, defense: &DefenseBundle) -> u8 {
    let mut confidence: u8 = 35;
    if defense.rankings.is_some() {
        confidence += 15;
    }
    if defense.points_allowed.contains_key(&player.position) {
        confidence += 10;
    }
    if card.advanced.is_some() {
        confidence += 15;
    }
    if player.weather.is_some() {
        confidence += 10;
    }
    confidence
}

/// Deterministic grade derived only from the score card.
pub fn fallback_grade(
    card: &ScoreCard,
    player: &StatsBundle,
    defense: &DefenseBundle,
) -> GradeResult {
    let grade = grade_for_score(card.blended);
    let advanced = match card.advanced {
        Some(score) => format!("advanced {score:.1}"),
        None => "advanced stats unavailable".to_string(),
    };
    GradeResult {
        grade,
        confidence: coverage_confidence(card, player, defense),
        reasoning: format!(
            "Numeric-only assessment for {} ({}) vs {}: blended score {:.1} (matchup {:.1}, weather {:.1}, {}).",
            player.name,
            player.position,
            defense.team_id,
            card.blended,
            card.matchup,
            card.weather,
            advanced,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use startsit_core::model::Position;

    use crate::stats::{DefenseRankings, WeatherConditions};

    fn player() -> StatsBundle {
        StatsBundle {
            player_id: "P1".into(),
            name: "Test Back".into(),
            position: Position::RunningBack,
            team_id: "BUF".into(),
            games_played: 3,
            fantasy_points_per_game: None,
            advanced: None,
            weather: None,
        }
    }

    fn card(blended: f64, advanced: Option<f64>) -> ScoreCard {
        ScoreCard {
            matchup: blended,
            weather: 50.0,
            advanced,
            blended,
        }
    }

    #[test]
    fn band_edges() {
        assert_eq!(grade_for_score(100.0), Grade::APlus);
        assert_eq!(grade_for_score(90.0), Grade::APlus);
        assert_eq!(grade_for_score(89.999), Grade::A);
        assert_eq!(grade_for_score(70.0), Grade::B);
        assert_eq!(grade_for_score(50.0), Grade::CMinus);
        assert_eq!(grade_for_score(40.0), Grade::D);
        assert_eq!(grade_for_score(39.999), Grade::F);
        assert_eq!(grade_for_score(0.0), Grade::F);
    }

    #[test]
    fn sparse_data_gives_low_confidence() {
        let defense = DefenseBundle {
            team_id: "KC".into(),
            ..Default::default()
        };
        let g = fallback_grade(&card(50.0, None), &player(), &defense);
        assert_eq!(g.confidence, 35);
        assert!(g.reasoning.contains("advanced stats unavailable"));
        assert!(g.reasoning.contains("vs KC"));
    }

    #[test]
    fn full_data_raises_confidence() {
        let mut p = player();
        p.weather = Some(WeatherConditions::default());
        let defense = DefenseBundle {
            team_id: "KC".into(),
            rankings: Some(DefenseRankings {
                pass_defense_rank: None,
                run_defense_rank: Some(20),
                total_defense_rank: None,
                team_count: 32,
            }),
            ..Default::default()
        };
        let g = fallback_grade(&card(72.0, Some(64.0)), &p, &defense);
        assert_eq!(g.confidence, 75);
        assert_eq!(g.grade, Grade::B);
    }
}
