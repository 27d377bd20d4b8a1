// Statistics provider data shapes and the provider interface.
//
// These mirror the JSON the statistics service returns. Every advanced metric
// is optional: missing data is not an error and flows through scoring as
// `None`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use startsit_core::model::{PlayerId, Position, TeamId};
use startsit_core::UpstreamError;

// ---------------------------------------------------------------------------
// Player side
// ---------------------------------------------------------------------------

/// Everything the pipeline knows about one player for one week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsBundle {
    pub player_id: PlayerId,
    pub name: String,
    pub position: Position,
    pub team_id: TeamId,
    #[serde(default)]
    pub games_played: u32,
    #[serde(default)]
    pub fantasy_points_per_game: Option<f64>,
    #[serde(default)]
    pub advanced: Option<PlayerAdvancedStats>,
    /// Forecast for the game venue; `None` when unknown.
    #[serde(default)]
    pub weather: Option<WeatherConditions>,
}

/// Position-specific efficiency metrics. Each one is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerAdvancedStats {
    /// Expected points added per dropback (QB).
    #[serde(default)]
    pub epa_per_play: Option<f64>,
    /// Completion percentage over expected, in percentage points (QB).
    #[serde(default)]
    pub cpoe: Option<f64>,
    /// Rushing yards over expected per attempt (RB).
    #[serde(default)]
    pub rush_yards_over_expected_per_att: Option<f64>,
    /// Share of carries that gained positive EPA, 0-1 (RB).
    #[serde(default)]
    pub success_rate: Option<f64>,
    /// Average yards of separation at the catch point (WR/TE).
    #[serde(default)]
    pub avg_separation: Option<f64>,
    /// Yards after catch per reception (WR/TE).
    #[serde(default)]
    pub yac_per_reception: Option<f64>,
    /// Share of team targets, 0-1 (WR/TE).
    #[serde(default)]
    pub target_share: Option<f64>,
}

impl PlayerAdvancedStats {
    pub fn is_empty(&self) -> bool {
        *self == PlayerAdvancedStats::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precipitation {
    #[default]
    None,
    Light,
    Moderate,
    Heavy,
    Snow,
}

impl Precipitation {
    pub fn label(&self) -> &'static str {
        match self {
            Precipitation::None => "none",
            Precipitation::Light => "light rain",
            Precipitation::Moderate => "moderate rain",
            Precipitation::Heavy => "heavy rain",
            Precipitation::Snow => "snow",
        }
    }
}

/// Game-time conditions at the venue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherConditions {
    /// Indoor or closed-roof stadium.
    #[serde(default)]
    pub dome: bool,
    #[serde(default)]
    pub temperature_f: Option<f64>,
    #[serde(default)]
    pub wind_mph: Option<f64>,
    #[serde(default)]
    pub precipitation: Precipitation,
}

// ---------------------------------------------------------------------------
// Defense side
// ---------------------------------------------------------------------------

/// The opponent's defensive profile for one week.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefenseBundle {
    pub team_id: TeamId,
    #[serde(default)]
    pub rankings: Option<DefenseRankings>,
    /// Fantasy points this defense allows, keyed by the scoring position.
    #[serde(default)]
    pub points_allowed: BTreeMap<Position, PositionAllowance>,
    #[serde(default)]
    pub advanced: Option<DefenseAdvancedStats>,
}

impl DefenseBundle {
    /// True when the bundle carries nothing scoring can use.
    pub fn is_empty(&self) -> bool {
        self.rankings.is_none() && self.points_allowed.is_empty() && self.advanced.is_none()
    }
}

/// League ranks where 1 is the stingiest defense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefenseRankings {
    #[serde(default)]
    pub pass_defense_rank: Option<u8>,
    #[serde(default)]
    pub run_defense_rank: Option<u8>,
    #[serde(default)]
    pub total_defense_rank: Option<u8>,
    #[serde(default = "default_team_count")]
    pub team_count: u8,
}

fn default_team_count() -> u8 {
    32
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionAllowance {
    pub fantasy_points_allowed_per_game: f64,
    /// League-wide average allowed to the same position.
    pub league_average: f64,
}

/// EPA per play this defense allows. Positive values favour the offense.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefenseAdvancedStats {
    #[serde(default)]
    pub pass_epa_per_play_allowed: Option<f64>,
    #[serde(default)]
    pub rush_epa_per_play_allowed: Option<f64>,
}

// ---------------------------------------------------------------------------
// Provider interface
// ---------------------------------------------------------------------------

/// The statistics service. Implementations bound every call by their own
/// timeout and never retry.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn fetch_player_stats(
        &self,
        player_id: &str,
        season: u16,
        week: u8,
    ) -> Result<StatsBundle, UpstreamError>;

    async fn fetch_defense_stats(
        &self,
        team_id: &str,
        season: u16,
        week: u8,
    ) -> Result<DefenseBundle, UpstreamError>;
}

#[async_trait]
impl<P: StatsProvider + ?Sized> StatsProvider for Arc<P> {
    async fn fetch_player_stats(
        &self,
        player_id: &str,
        season: u16,
        week: u8,
    ) -> Result<StatsBundle, UpstreamError> {
        (**self).fetch_player_stats(player_id, season, week).await
    }

    async fn fetch_defense_stats(
        &self,
        team_id: &str,
        season: u16,
        week: u8,
    ) -> Result<DefenseBundle, UpstreamError> {
        (**self).fetch_defense_stats(team_id, season, week).await
    }
}
