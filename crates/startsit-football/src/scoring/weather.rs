// Weather impact score: 50 is neutral, lower hurts the position.
//
// Passing positions lose points to wind above 10 mph and to precipitation.
// Kickers are the most wind-sensitive and also suffer in the cold. Running
// backs get a small bump in heavy rain or snow, when offenses lean on the
// run.

use startsit_core::model::Position;

use crate::scoring::{clamp_score, NEUTRAL_SCORE};
use crate::stats::{Precipitation, WeatherConditions};

const WIND_THRESHOLD_MPH: f64 = 10.0;
const PASSING_WIND_PENALTY_PER_MPH: f64 = 1.5;
const KICKING_WIND_PENALTY_PER_MPH: f64 = 2.0;
const KICKING_COLD_F: f64 = 20.0;
const PASSING_COLD_F: f64 = 10.0;

/// 0-100. Unknown conditions and domes are neutral.
pub fn weather_impact_score(position: Position, conditions: Option<&WeatherConditions>) -> f64 {
    let Some(weather) = conditions else {
        return NEUTRAL_SCORE;
    };
    if weather.dome {
        return NEUTRAL_SCORE;
    }

    let mut score = NEUTRAL_SCORE;

    if let Some(wind) = weather.wind_mph.filter(|w| w.is_finite()) {
        let excess = (wind - WIND_THRESHOLD_MPH).max(0.0);
        if position == Position::Kicker {
            score -= excess * KICKING_WIND_PENALTY_PER_MPH;
        } else if position.is_passing() {
            score -= excess * PASSING_WIND_PENALTY_PER_MPH;
        }
    }

    let precipitation_penalty = match weather.precipitation {
        Precipitation::None => 0.0,
        Precipitation::Light => 5.0,
        Precipitation::Moderate => 10.0,
        Precipitation::Heavy | Precipitation::Snow => 15.0,
    };
    if position.is_passing() || position == Position::Kicker {
        score -= precipitation_penalty;
    } else if position == Position::RunningBack
        && matches!(
            weather.precipitation,
            Precipitation::Heavy | Precipitation::Snow
        )
    {
        score += 5.0;
    }

    if let Some(temp) = weather.temperature_f.filter(|t| t.is_finite()) {
        if position == Position::Kicker && temp < KICKING_COLD_F {
            score -= (KICKING_COLD_F - temp).min(20.0) * 0.5 + 5.0;
        } else if position.is_passing() && temp < PASSING_COLD_F {
            score -= 5.0;
        }
    }

    clamp_score(score)
}
