// Data model for matchup-analysis jobs, per-player results, and cache entries.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

pub type PlayerId = String;
pub type TeamId = String;

/// Last week a fantasy-relevant game can be played (18 regular + 4 playoff).
pub const MAX_WEEK: u8 = 22;
pub const MIN_SEASON: u16 = 1920;
pub const MAX_SEASON: u16 = 2100;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque job identifier, generated at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(JobId)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of cacheable analysis work: one player against one opponent in
/// one week of one season.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint {
    pub player_id: PlayerId,
    pub opponent_team_id: TeamId,
    pub week: u8,
    pub season: u16,
}

impl Fingerprint {
    pub fn new(
        player_id: impl Into<PlayerId>,
        opponent_team_id: impl Into<TeamId>,
        week: u8,
        season: u16,
    ) -> Self {
        Fingerprint {
            player_id: player_id.into(),
            opponent_team_id: opponent_team_id.into(),
            week,
            season,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}w{}",
            self.player_id, self.opponent_team_id, self.season, self.week
        )
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Fantasy football roster positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "QB")]
    Quarterback,
    #[serde(rename = "RB")]
    RunningBack,
    #[serde(rename = "WR")]
    WideReceiver,
    #[serde(rename = "TE")]
    TightEnd,
    #[serde(rename = "K")]
    Kicker,
    #[serde(rename = "DST")]
    Defense,
}

impl Position {
    pub fn abbrev(&self) -> &'static str {
        match self {
            Position::Quarterback => "QB",
            Position::RunningBack => "RB",
            Position::WideReceiver => "WR",
            Position::TightEnd => "TE",
            Position::Kicker => "K",
            Position::Defense => "DST",
        }
    }

    /// Positions whose production depends on the passing game.
    pub fn is_passing(&self) -> bool {
        matches!(
            self,
            Position::Quarterback | Position::WideReceiver | Position::TightEnd
        )
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbrev())
    }
}

// ---------------------------------------------------------------------------
// State machines
// ---------------------------------------------------------------------------

/// Job-level state: `queued -> running -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-player state nested inside a job: `pending -> running -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Pending => "pending",
            PlayerStatus::Running => "running",
            PlayerStatus::Completed => "completed",
            PlayerStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PlayerStatus::Pending),
            "running" => Some(PlayerStatus::Running),
            "completed" => Some(PlayerStatus::Completed),
            "failed" => Some(PlayerStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PlayerStatus::Completed | PlayerStatus::Failed)
    }

    pub fn can_transition_to(&self, next: PlayerStatus) -> bool {
        matches!(
            (self, next),
            (PlayerStatus::Pending, PlayerStatus::Running)
                | (PlayerStatus::Running, PlayerStatus::Completed)
                | (PlayerStatus::Running, PlayerStatus::Failed)
        )
    }
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Grades and recommendations
// ---------------------------------------------------------------------------

/// Letter grade attached to a player's weekly outlook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "F")]
    F,
}

impl Grade {
    pub const ALL: [Grade; 11] = [
        Grade::APlus,
        Grade::A,
        Grade::AMinus,
        Grade::BPlus,
        Grade::B,
        Grade::BMinus,
        Grade::CPlus,
        Grade::C,
        Grade::CMinus,
        Grade::D,
        Grade::F,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    /// Parse a grade label, tolerating surrounding whitespace, lowercase,
    /// and trailing punctuation ("b+." -> `BPlus`).
    pub fn parse(s: &str) -> Option<Self> {
        let cleaned = s
            .trim()
            .trim_end_matches(|c: char| c == '.' || c == ',' || c == ';')
            .to_uppercase();
        Grade::ALL.into_iter().find(|g| g.label() == cleaned)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Blended score at or above which a player should start.
pub const START_THRESHOLD: f64 = 70.0;
/// Blended score at or above which a player is worth considering.
pub const CONSIDER_THRESHOLD: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Start,
    Consider,
    Bench,
}

impl Recommendation {
    /// Map a blended score onto a recommendation:
    /// `>= 70` START, `40..70` CONSIDER, `< 40` BENCH. NaN benches.
    pub fn from_score(score: f64) -> Self {
        if score >= START_THRESHOLD {
            Recommendation::Start
        } else if score >= CONSIDER_THRESHOLD {
            Recommendation::Consider
        } else {
            Recommendation::Bench
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Recommendation::Start => "START",
            Recommendation::Consider => "CONSIDER",
            Recommendation::Bench => "BENCH",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Player errors
// ---------------------------------------------------------------------------

/// Machine-readable reason a player result ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UpstreamTimeout,
    UpstreamUnavailable,
    UpstreamRejected,
    InvalidResponse,
    /// Waited on another task's claim longer than the claim timeout.
    ClaimTimeout,
    /// The claim being waited on was dropped without a result.
    ClaimAbandoned,
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UpstreamTimeout => "upstream_timeout",
            ErrorCode::UpstreamUnavailable => "upstream_unavailable",
            ErrorCode::UpstreamRejected => "upstream_rejected",
            ErrorCode::InvalidResponse => "invalid_response",
            ErrorCode::ClaimTimeout => "claim_timeout",
            ErrorCode::ClaimAbandoned => "claim_abandoned",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Internal => "internal",
        }
    }

    /// Codes that point at the orchestration layer rather than a slow or
    /// broken upstream.
    pub fn is_orchestration(&self) -> bool {
        matches!(self, ErrorCode::ClaimTimeout | ErrorCode::ClaimAbandoned)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a failed player result. The message is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerError {
    pub code: ErrorCode,
    pub message: String,
}

impl PlayerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            code.as_str().to_string()
        } else {
            message
        };
        PlayerError { code, message }
    }
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Analysis results
// ---------------------------------------------------------------------------

/// Where the grade, confidence, and reasoning came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeSource {
    Llm,
    /// Derived from the numeric scores because grading was unavailable.
    Fallback,
}

/// The scored outcome of a completed player analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub position: Position,
    /// 0-100, higher is a friendlier matchup.
    pub matchup_score: f64,
    /// 0-100, 50 is neutral.
    pub weather_impact_score: f64,
    /// 0-100, `None` when advanced data was unavailable.
    pub advanced_stats_score: Option<f64>,
    pub blended_score: f64,
    /// 0-100.
    pub confidence: u8,
    pub grade: Grade,
    pub recommendation: Recommendation,
    pub reasoning: String,
    pub grade_source: GradeSource,
}

impl Analysis {
    pub fn advanced_stats_used(&self) -> bool {
        self.advanced_stats_score.is_some()
    }
}

/// One player's outcome within a job. Immutable once `status` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAnalysisResult {
    pub fingerprint: Fingerprint,
    pub status: PlayerStatus,
    pub analysis: Option<Analysis>,
    pub error: Option<PlayerError>,
    pub updated_at: DateTime<Utc>,
}

impl PlayerAnalysisResult {
    pub fn pending(fingerprint: Fingerprint) -> Self {
        PlayerAnalysisResult {
            fingerprint,
            status: PlayerStatus::Pending,
            analysis: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn completed(fingerprint: Fingerprint, analysis: Analysis) -> Self {
        PlayerAnalysisResult {
            fingerprint,
            status: PlayerStatus::Completed,
            analysis: Some(analysis),
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(fingerprint: Fingerprint, error: PlayerError) -> Self {
        PlayerAnalysisResult {
            fingerprint,
            status: PlayerStatus::Failed,
            analysis: None,
            error: Some(error),
            updated_at: Utc::now(),
        }
    }

    pub fn player_id(&self) -> &str {
        &self.fingerprint.player_id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Cache entries
// ---------------------------------------------------------------------------

/// How long a cached result stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// The current (or an upcoming) week: data still moves, expires.
    CurrentWeek,
    /// A finished week: never expires.
    Historical,
}

impl TtlClass {
    /// Classify a fingerprint against the league's current season and week.
    pub fn classify(fingerprint: &Fingerprint, current_season: u16, current_week: u8) -> Self {
        let is_past = fingerprint.season < current_season
            || (fingerprint.season == current_season && fingerprint.week < current_week);
        if is_past {
            TtlClass::Historical
        } else {
            TtlClass::CurrentWeek
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TtlClass::CurrentWeek => "current_week",
            TtlClass::Historical => "historical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "current_week" => Some(TtlClass::CurrentWeek),
            "historical" => Some(TtlClass::Historical),
            _ => None,
        }
    }
}

/// Durable record of a completed analysis, keyed by its fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: PlayerAnalysisResult,
    pub computed_at: DateTime<Utc>,
    pub ttl: TtlClass,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>, current_week_ttl: ChronoDuration) -> bool {
        match self.ttl {
            TtlClass::Historical => true,
            TtlClass::CurrentWeek => now - self.computed_at < current_week_ttl,
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A request to analyze a roster's players against one opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub roster_id: String,
    pub opponent_team_id: TeamId,
    pub week: u8,
    pub season: u16,
    pub player_ids: Vec<PlayerId>,
}

impl JobRequest {
    /// Check the request and return it with player ids trimmed and
    /// deduplicated (first occurrence wins, order preserved).
    pub fn validate(self) -> Result<JobRequest, ValidationError> {
        if self.roster_id.trim().is_empty() {
            return Err(ValidationError::EmptyRosterId);
        }
        if self.opponent_team_id.trim().is_empty() {
            return Err(ValidationError::EmptyOpponentTeamId);
        }
        if self.week == 0 || self.week > MAX_WEEK {
            return Err(ValidationError::InvalidWeek {
                week: self.week,
                max: MAX_WEEK,
            });
        }
        if !(MIN_SEASON..=MAX_SEASON).contains(&self.season) {
            return Err(ValidationError::InvalidSeason {
                season: self.season,
                min: MIN_SEASON,
                max: MAX_SEASON,
            });
        }
        if self.player_ids.is_empty() {
            return Err(ValidationError::EmptyPlayerList);
        }

        let mut seen = HashSet::new();
        let mut player_ids = Vec::with_capacity(self.player_ids.len());
        for (index, raw) in self.player_ids.iter().enumerate() {
            let id = raw.trim();
            if id.is_empty() {
                return Err(ValidationError::EmptyPlayerId { index });
            }
            if seen.insert(id.to_string()) {
                player_ids.push(id.to_string());
            }
        }

        Ok(JobRequest {
            roster_id: self.roster_id.trim().to_string(),
            opponent_team_id: self.opponent_team_id.trim().to_string(),
            week: self.week,
            season: self.season,
            player_ids,
        })
    }
}

/// One matchup-analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: JobId,
    pub roster_id: String,
    pub opponent_team_id: TeamId,
    pub week: u8,
    pub season: u16,
    pub player_ids: Vec<PlayerId>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl AnalysisJob {
    /// Build a queued job from an already validated request.
    pub fn queued(request: JobRequest) -> Self {
        AnalysisJob {
            job_id: JobId::new(),
            roster_id: request.roster_id,
            opponent_team_id: request.opponent_team_id,
            week: request.week,
            season: request.season,
            player_ids: request.player_ids,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn fingerprint_for(&self, player_id: &str) -> Fingerprint {
        Fingerprint::new(player_id, self.opponent_team_id.clone(), self.week, self.season)
    }
}

/// Snapshot returned to pollers: job state plus per-player results keyed by
/// player id. No ordering between players is implied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job: AnalysisJob,
    pub players: BTreeMap<PlayerId, PlayerAnalysisResult>,
}

impl JobStatusReport {
    pub fn count(&self, status: PlayerStatus) -> usize {
        self.players.values().filter(|r| r.status == status).count()
    }

    pub fn all_players_terminal(&self) -> bool {
        self.players.values().all(|r| r.is_terminal())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request(players: &[&str]) -> JobRequest {
        JobRequest {
            roster_id: "R".into(),
            opponent_team_id: "T".into(),
            week: 5,
            season: 2024,
            player_ids: players.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn recommendation_thresholds_are_exact() {
        assert_eq!(Recommendation::from_score(70.0), Recommendation::Start);
        assert_eq!(Recommendation::from_score(69.999), Recommendation::Consider);
        assert_eq!(Recommendation::from_score(40.0), Recommendation::Consider);
        assert_eq!(Recommendation::from_score(39.999), Recommendation::Bench);
        assert_eq!(Recommendation::from_score(100.0), Recommendation::Start);
        assert_eq!(Recommendation::from_score(0.0), Recommendation::Bench);
        assert_eq!(Recommendation::from_score(f64::NAN), Recommendation::Bench);
    }

    #[test]
    fn player_status_never_skips_a_state() {
        use PlayerStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Running));
    }

    #[test]
    fn job_status_transitions() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(Completed.is_terminal() && Failed.is_terminal());
        assert!(!Queued.is_terminal() && !Running.is_terminal());
    }

    #[test]
    fn grade_parse_is_lenient() {
        assert_eq!(Grade::parse("b+"), Some(Grade::BPlus));
        assert_eq!(Grade::parse(" A- "), Some(Grade::AMinus));
        assert_eq!(Grade::parse("C."), Some(Grade::C));
        assert_eq!(Grade::parse("E"), None);
        assert_eq!(Grade::parse(""), None);
    }

    #[test]
    fn grade_serializes_as_label() {
        let json = serde_json::to_string(&Grade::APlus).unwrap();
        assert_eq!(json, "\"A+\"");
        let back: Grade = serde_json::from_str("\"C-\"").unwrap();
        assert_eq!(back, Grade::CMinus);
    }

    #[test]
    fn passing_positions() {
        assert!(Position::WideReceiver.is_passing());
        assert!(!Position::RunningBack.is_passing());
    }

    #[test]
    fn validate_dedupes_preserving_order() {
        let req = request(&["P2", "P1", " P2 ", "P3", "P1"]).validate().unwrap();
        assert_eq!(req.player_ids, vec!["P2", "P1", "P3"]);
    }

    #[test]
    fn validate_rejects_bad_requests() {
        assert_eq!(request(&[]).validate(), Err(ValidationError::EmptyPlayerList));
        assert_eq!(
            request(&["P1", "  "]).validate(),
            Err(ValidationError::EmptyPlayerId { index: 1 })
        );

        let mut r = request(&["P1"]);
        r.week = 0;
        assert!(matches!(r.validate(), Err(ValidationError::InvalidWeek { .. })));

        let mut r = request(&["P1"]);
        r.week = 23;
        assert!(matches!(r.validate(), Err(ValidationError::InvalidWeek { .. })));

        let mut r = request(&["P1"]);
        r.season = 1800;
        assert!(matches!(r.validate(), Err(ValidationError::InvalidSeason { .. })));

        let mut r = request(&["P1"]);
        r.roster_id = " ".into();
        assert_eq!(r.validate(), Err(ValidationError::EmptyRosterId));

        let mut r = request(&["P1"]);
        r.opponent_team_id = String::new();
        assert_eq!(r.validate(), Err(ValidationError::EmptyOpponentTeamId));
    }

    #[test]
    fn ttl_class_by_week() {
        let fp = |week, season| Fingerprint::new("P1", "T", week, season);
        assert_eq!(TtlClass::classify(&fp(4, 2024), 2024, 5), TtlClass::Historical);
        assert_eq!(TtlClass::classify(&fp(17, 2023), 2024, 1), TtlClass::Historical);
        assert_eq!(TtlClass::classify(&fp(5, 2024), 2024, 5), TtlClass::CurrentWeek);
        assert_eq!(TtlClass::classify(&fp(6, 2024), 2024, 5), TtlClass::CurrentWeek);
    }

    #[test]
    fn cache_entry_freshness() {
        let fp = Fingerprint::new("P1", "T", 5, 2024);
        let computed_at = Utc::now() - ChronoDuration::hours(2);
        let mut entry = CacheEntry {
            result: PlayerAnalysisResult::pending(fp),
            computed_at,
            ttl: TtlClass::CurrentWeek,
        };
        assert!(!entry.is_fresh(Utc::now(), ChronoDuration::hours(1)));
        assert!(entry.is_fresh(Utc::now(), ChronoDuration::hours(3)));

        entry.ttl = TtlClass::Historical;
        assert!(entry.is_fresh(Utc::now(), ChronoDuration::seconds(1)));
    }

    #[test]
    fn player_error_message_is_never_empty() {
        let err = PlayerError::new(ErrorCode::Cancelled, "  ");
        assert_eq!(err.message, "cancelled");
        assert!(ErrorCode::ClaimTimeout.is_orchestration());
        assert!(!ErrorCode::UpstreamTimeout.is_orchestration());
    }

    #[test]
    fn fingerprint_display() {
        let fp = Fingerprint::new("P1", "KC", 5, 2024);
        assert_eq!(fp.to_string(), "P1@KC:2024w5");
    }

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&id.to_string()), Some(id));
        assert_eq!(JobId::parse("not-a-uuid"), None);
    }
}
