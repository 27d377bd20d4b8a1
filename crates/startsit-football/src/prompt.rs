// Prompt templates for start/sit grading.
//
// The grading provider receives the pre-computed scores alongside the raw
// inputs, so it comments on context the numbers miss rather than redoing
// arithmetic. The reply format is fixed so `parse_grade_response` can read it.

use startsit_core::model::{Grade, Position};
use startsit_llm::GradePrompt;

use crate::scoring::ScoreCard;
use crate::stats::{DefenseBundle, StatsBundle};

// ---------------------------------------------------------------------------
// System prompt
// ---------------------------------------------------------------------------

/// Return the static system prompt for all grading calls.
pub fn system_prompt() -> String {
    let grades = Grade::ALL
        .iter()
        .map(|g| g.label())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You are a fantasy football start/sit analyst.\n\
         \n\
         For each player you receive the opponent's defensive profile, game-day weather, \
         and pre-computed 0-100 scores (matchup, weather, advanced stats, blended). \
         Use the numbers as given; do NOT recompute them. Focus on context the numbers \
         don't capture: usage trends, game script, and how the defense schemes against this position.\n\
         \n\
         Reply with exactly one JSON object and nothing else:\n\
         {{\"grade\": \"<one of {grades}>\", \"confidence\": <0-100>, \"reasoning\": \"<two or three sentences>\"}}"
    )
}

// ---------------------------------------------------------------------------
// Player grading prompt
// ---------------------------------------------------------------------------

/// Build the user prompt for grading one player's matchup.
pub fn build_grading_prompt(
    player: &StatsBundle,
    defense: &DefenseBundle,
    card: &ScoreCard,
    week: u8,
    season: u16,
) -> String {
    let mut prompt = String::with_capacity(1024);

    // Section 1: PLAYER
    prompt.push_str(&format!(
        "## PLAYER\n\
         {} ({}, {}) | Week {} {} vs {}\n",
        player.name, player.position, player.team_id, week, season, defense.team_id,
    ));
    match player.fantasy_points_per_game {
        Some(ppg) => prompt.push_str(&format!(
            "Games: {} | Fantasy points/game: {:.1}\n\n",
            player.games_played, ppg
        )),
        None => prompt.push_str(&format!("Games: {}\n\n", player.games_played)),
    }

    // Section 2: SCORES
    prompt.push_str(&format!(
        "## SCORES (0-100)\n\
         Matchup: {:.1} | Weather: {:.1} | Advanced: {} | Blended: {:.1}\n\n",
        card.matchup,
        card.weather,
        card.advanced
            .map(|a| format!("{a:.1}"))
            .unwrap_or_else(|| "n/a".to_string()),
        card.blended,
    ));

    // Section 3: OPPONENT DEFENSE
    prompt.push_str("## OPPONENT DEFENSE\n");
    prompt.push_str(&format_defense(player.position, defense));
    prompt.push('\n');

    // Section 4: WEATHER
    prompt.push_str("## WEATHER\n");
    match &player.weather {
        None => prompt.push_str("Unknown\n"),
        Some(w) if w.dome => prompt.push_str("Dome\n"),
        Some(w) => {
            let temp = w
                .temperature_f
                .map(|t| format!("{t:.0}F"))
                .unwrap_or_else(|| "temp n/a".to_string());
            let wind = w
                .wind_mph
                .map(|v| format!("wind {v:.0} mph"))
                .unwrap_or_else(|| "wind n/a".to_string());
            prompt.push_str(&format!("{temp}, {wind}, {}\n", w.precipitation.label()));
        }
    }
    prompt.push('\n');

    // Section 5: Closing question
    prompt.push_str("## START OR SIT?\nGrade this player for the week.");

    prompt
}

/// Bundle the system and user prompts with a token budget.
pub fn grading_prompt(
    player: &StatsBundle,
    defense: &DefenseBundle,
    card: &ScoreCard,
    week: u8,
    season: u16,
    max_tokens: u32,
) -> GradePrompt {
    GradePrompt {
        system: system_prompt(),
        user: build_grading_prompt(player, defense, card, week, season),
        max_tokens,
    }
}

fn format_defense(position: Position, defense: &DefenseBundle) -> String {
    let mut out = String::new();
    match &defense.rankings {
        Some(r) => {
            let rank = |v: Option<u8>| {
                v.map(|n| format!("{n}/{}", r.team_count))
                    .unwrap_or_else(|| "n/a".to_string())
            };
            out.push_str(&format!(
                "Pass D rank: {} | Run D rank: {} | Total D rank: {} (1 = stingiest)\n",
                rank(r.pass_defense_rank),
                rank(r.run_defense_rank),
                rank(r.total_defense_rank),
            ));
        }
        None => out.push_str("Rankings: n/a\n"),
    }
    if let Some(a) = defense.points_allowed.get(&position) {
        out.push_str(&format!(
            "Fantasy points allowed to {}: {:.1}/game (league avg {:.1})\n",
            position, a.fantasy_points_allowed_per_game, a.league_average,
        ));
    }
    if let Some(adv) = &defense.advanced {
        if let Some(epa) = adv.pass_epa_per_play_allowed {
            out.push_str(&format!("Pass EPA/play allowed: {epa:+.3}\n"));
        }
        if let Some(epa) = adv.rush_epa_per_play_allowed {
            out.push_str(&format!("Rush EPA/play allowed: {epa:+.3}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{DefenseRankings, Precipitation, WeatherConditions};

    fn player() -> StatsBundle {
        StatsBundle {
            player_id: "P1".into(),
            name: "Test Receiver".into(),
            position: Position::WideReceiver,
            team_id: "BUF".into(),
            games_played: 4,
            fantasy_points_per_game: Some(14.25),
            advanced: None,
            weather: Some(WeatherConditions {
                dome: false,
                temperature_f: Some(38.0),
                wind_mph: Some(17.0),
                precipitation: Precipitation::Snow,
            }),
        }
    }

    fn card() -> ScoreCard {
        ScoreCard {
            matchup: 71.0,
            weather: 24.5,
            advanced: None,
            blended: 55.64,
        }
    }

    #[test]
    fn system_prompt_lists_every_grade_and_the_reply_shape() {
        let s = system_prompt();
        for g in Grade::ALL {
            assert!(s.contains(g.label()));
        }
        assert!(s.contains("\"confidence\""));
    }

    #[test]
    fn grading_prompt_contains_all_sections() {
        let defense = DefenseBundle {
            team_id: "KC".into(),
            rankings: Some(DefenseRankings {
                pass_defense_rank: Some(27),
                run_defense_rank: None,
                total_defense_rank: Some(20),
                team_count: 32,
            }),
            ..Default::default()
        };
        let p = build_grading_prompt(&player(), &defense, &card(), 5, 2024);
        assert!(p.contains("## PLAYER"));
        assert!(p.contains("Test Receiver (WR, BUF) | Week 5 2024 vs KC"));
        assert!(p.contains("Fantasy points/game: 14.2") || p.contains("Fantasy points/game: 14.3"));
        assert!(p.contains("Advanced: n/a"));
        assert!(p.contains("Pass D rank: 27/32 | Run D rank: n/a"));
        assert!(p.contains("38F, wind 17 mph, snow"));
        assert!(p.ends_with("Grade this player for the week."));
    }

    #[test]
    fn dome_and_unknown_weather() {
        let defense = DefenseBundle {
            team_id: "KC".into(),
            ..Default::default()
        };
        let mut p = player();
        p.weather = Some(WeatherConditions {
            dome: true,
            ..Default::default()
        });
        assert!(build_grading_prompt(&p, &defense, &card(), 5, 2024).contains("## WEATHER\nDome"));

        p.weather = None;
        let text = build_grading_prompt(&p, &defense, &card(), 5, 2024);
        assert!(text.contains("## WEATHER\nUnknown"));
        assert!(text.contains("Rankings: n/a"));
    }

    #[test]
    fn grading_prompt_carries_token_budget() {
        let defense = DefenseBundle::default();
        let gp = grading_prompt(&player(), &defense, &card(), 5, 2024, 300);
        assert_eq!(gp.max_tokens, 300);
        assert_eq!(gp.system, system_prompt());
    }
}
