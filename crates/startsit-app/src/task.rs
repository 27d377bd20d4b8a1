// Player analysis task: one fingerprint in, one terminal result out.
//
//   cache hit        -> return it, no upstream calls
//   claimed          -> spawn the computation, then wait on our own claim
//   claimed by other -> wait on theirs (bounded by claim_wait_timeout)
//
// The computation runs detached from the requesting job, so cancelling a job
// stops its wait but never the shared computation other waiters need.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use startsit_core::config::{Config, ScoringWeights, ATTEMPT_GRACE};
use startsit_core::model::{
    Analysis, ErrorCode, Fingerprint, GradeSource, PlayerAnalysisResult, PlayerError,
    Recommendation,
};
use startsit_football::prompt::grading_prompt;
use startsit_football::scoring::{fallback_grade, score_player, ScoreCard};
use startsit_football::{DefenseBundle, StatsBundle, StatsProvider};
use startsit_llm::{GradeResult, GradingClient};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{ClaimOutcome, ClaimResult, ResultCache, WaitHandle};
use crate::retry::RetryPolicy;

/// Tunables for `PlayerAnalyzer`.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub retry: RetryPolicy,
    pub weights: ScoringWeights,
    pub stats_timeout: Duration,
    pub grading_timeout: Duration,
    pub grading_max_tokens: u32,
    /// Never shorter than the worst-case time a healthy holder needs.
    pub claim_wait_timeout: Duration,
}

impl AnalyzerSettings {
    pub fn from_config(config: &Config) -> Self {
        AnalyzerSettings {
            retry: RetryPolicy::from_config(&config.retry),
            weights: config.scoring,
            stats_timeout: config.stats.timeout(),
            grading_timeout: config.grading.timeout(),
            grading_max_tokens: config.grading.max_tokens,
            claim_wait_timeout: config
                .pipeline
                .claim_wait_timeout()
                .max(config.claim_hold_budget()),
        }
    }
}

enum WaitOutcome {
    Resolved(ClaimOutcome),
    TimedOut,
    Cancelled,
}

pub struct PlayerAnalyzer {
    stats: Arc<dyn StatsProvider>,
    grading: GradingClient,
    cache: Arc<ResultCache>,
    settings: AnalyzerSettings,
}

impl PlayerAnalyzer {
    pub fn new(
        stats: Arc<dyn StatsProvider>,
        grading: GradingClient,
        cache: Arc<ResultCache>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            stats,
            grading,
            cache,
            settings,
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Produce a terminal result for `fp`. Never returns a non-terminal one.
    pub async fn analyze(
        self: &Arc<Self>,
        fp: &Fingerprint,
        cancel: &mut watch::Receiver<bool>,
    ) -> PlayerAnalysisResult {
        // An abandoned claim gets one more pass through the protocol.
        for round in 0..2 {
            let outcome = match self.cache.try_claim(fp) {
                ClaimResult::Hit(result) => return result,
                ClaimResult::Claimed { token, handle } => {
                    let analyzer = Arc::clone(self);
                    let owned_fp = fp.clone();
                    tokio::spawn(async move {
                        let computed = AssertUnwindSafe(analyzer.compute(&owned_fp))
                            .catch_unwind()
                            .await;
                        match computed {
                            Ok(Ok(analysis)) => {
                                let result = PlayerAnalysisResult::completed(owned_fp, analysis);
                                analyzer.cache.complete(token, result)
                            }
                            Ok(Err(error)) => analyzer.cache.fail(token, error),
                            Err(_) => analyzer.cache.fail(
                                token,
                                PlayerError::new(ErrorCode::Internal, "analysis task panicked"),
                            ),
                        }
                    });
                    // Our own computation is bounded by the retry policy.
                    wait_on_claim(handle, None, cancel).await
                }
                ClaimResult::Wait(handle) => {
                    wait_on_claim(handle, Some(self.settings.claim_wait_timeout), cancel).await
                }
            };

            let error = match outcome {
                WaitOutcome::Resolved(ClaimOutcome::Completed(result)) => return result,
                WaitOutcome::Resolved(ClaimOutcome::Failed(error)) => error,
                WaitOutcome::Resolved(ClaimOutcome::Abandoned | ClaimOutcome::Pending) => {
                    if round == 0 {
                        debug!(fingerprint = %fp, "claim abandoned, retrying claim");
                        continue;
                    }
                    PlayerError::new(
                        ErrorCode::ClaimAbandoned,
                        "in-flight computation was abandoned twice",
                    )
                }
                WaitOutcome::TimedOut => PlayerError::new(
                    ErrorCode::ClaimTimeout,
                    format!(
                        "no result from in-flight computation within {:?}",
                        self.settings.claim_wait_timeout
                    ),
                ),
                WaitOutcome::Cancelled => {
                    PlayerError::new(ErrorCode::Cancelled, "job cancelled")
                }
            };
            return PlayerAnalysisResult::failed(fp.clone(), error);
        }

        PlayerAnalysisResult::failed(
            fp.clone(),
            PlayerError::new(ErrorCode::ClaimAbandoned, "in-flight computation was abandoned"),
        )
    }

    /// Fetch, score, grade. Upstream failures after retries become the
    /// player's error; grading failures fall back to numeric grading.
    async fn compute(&self, fp: &Fingerprint) -> Result<Analysis, PlayerError> {
        info!(fingerprint = %fp, "analyzing player");
        let retry = &self.settings.retry;
        let attempt_timeout = self.settings.stats_timeout + ATTEMPT_GRACE;
        let stats = &self.stats;

        let player_fut = retry.run("stats", attempt_timeout, move |attempt| {
            debug!(fingerprint = %fp, attempt, "fetching player stats");
            stats.fetch_player_stats(&fp.player_id, fp.season, fp.week)
        });
        let defense_fut = retry.run("stats", attempt_timeout, move |attempt| {
            debug!(fingerprint = %fp, attempt, "fetching defense stats");
            stats.fetch_defense_stats(&fp.opponent_team_id, fp.season, fp.week)
        });

        let (player, defense) = tokio::try_join!(player_fut, defense_fut).map_err(|e| {
            warn!(fingerprint = %fp, service = e.service(), error = %e, "stats fetch failed");
            PlayerError::from(e)
        })?;

        let card = score_player(&player, &defense, &self.settings.weights);
        let (grade, grade_source) = self.grade(fp, &player, &defense, &card).await;

        Ok(Analysis {
            position: player.position,
            matchup_score: card.matchup,
            weather_impact_score: card.weather,
            advanced_stats_score: card.advanced,
            blended_score: card.blended,
            confidence: grade.confidence,
            grade: grade.grade,
            recommendation: Recommendation::from_score(card.blended),
            reasoning: grade.reasoning,
            grade_source,
        })
    }

    async fn grade(
        &self,
        fp: &Fingerprint,
        player: &StatsBundle,
        defense: &DefenseBundle,
        card: &ScoreCard,
    ) -> (GradeResult, GradeSource) {
        if !self.grading.is_enabled() {
            return (fallback_grade(card, player, defense), GradeSource::Fallback);
        }

        let prompt = grading_prompt(
            player,
            defense,
            card,
            fp.week,
            fp.season,
            self.settings.grading_max_tokens,
        );
        let grading = &self.grading;
        let prompt = &prompt;
        let result = self
            .settings
            .retry
            .run(
                grading.name(),
                self.settings.grading_timeout + ATTEMPT_GRACE,
                move |_| grading.grade(prompt),
            )
            .await;

        match result {
            Ok(grade) => (grade, GradeSource::Llm),
            Err(e) => {
                warn!(
                    fingerprint = %fp,
                    service = e.service(),
                    error = %e,
                    "grading failed, using numeric fallback"
                );
                (fallback_grade(card, player, defense), GradeSource::Fallback)
            }
        }
    }
}

async fn wait_on_claim(
    handle: WaitHandle,
    limit: Option<Duration>,
    cancel: &mut watch::Receiver<bool>,
) -> WaitOutcome {
    let wait = async {
        match limit {
            Some(limit) => match tokio::time::timeout(limit, handle.wait()).await {
                Ok(outcome) => WaitOutcome::Resolved(outcome),
                Err(_) => WaitOutcome::TimedOut,
            },
            None => WaitOutcome::Resolved(handle.wait().await),
        }
    };

    tokio::select! {
        outcome = wait => outcome,
        _ = cancelled(cancel) => WaitOutcome::Cancelled,
    }
}

/// Resolves once the job's cancel flag is raised. A dropped sender means the
/// job can no longer be cancelled.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
