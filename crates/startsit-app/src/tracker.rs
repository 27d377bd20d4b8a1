// Job and per-player state for running jobs.
//
// Active jobs live in memory for cheap polling; every transition is written
// through to SQLite so state survives a restart. Finished jobs are evicted
// from memory and served from the database.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::Utc;
use startsit_core::db::Database;
use startsit_core::model::{
    AnalysisJob, JobId, JobStatus, JobStatusReport, PlayerAnalysisResult, PlayerError, PlayerId,
    PlayerStatus,
};
use tracing::{debug, error, info, warn};

struct TrackedJob {
    job: AnalysisJob,
    players: BTreeMap<PlayerId, PlayerAnalysisResult>,
}

pub struct StatusTracker {
    db: Arc<Database>,
    jobs: Mutex<HashMap<JobId, TrackedJob>>,
}

impl StatusTracker {
    pub fn new(db: Arc<Database>) -> Self {
        StatusTracker {
            db,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, TrackedJob>> {
        self.jobs.lock().expect("tracker mutex poisoned")
    }

    /// Start tracking a job. The job row is written before its player rows.
    pub fn register(&self, job: AnalysisJob, players: Vec<PlayerAnalysisResult>) -> Result<()> {
        self.db.save_job(&job)?;
        for result in &players {
            self.db.save_player_result(job.job_id, result)?;
        }

        let players = players
            .into_iter()
            .map(|r| (r.player_id().to_string(), r))
            .collect();
        debug!(job_id = %job.job_id, status = %job.status, "tracking job");
        self.jobs().insert(job.job_id, TrackedJob { job, players });
        Ok(())
    }

    /// `queued -> running`. A no-op once the job is already running.
    pub fn job_running(&self, job_id: JobId) {
        let mut jobs = self.jobs();
        let Some(tracked) = jobs.get_mut(&job_id) else {
            return;
        };
        if tracked.job.status != JobStatus::Queued {
            return;
        }
        tracked.job.status = JobStatus::Running;
        info!(job_id = %job_id, "job running");
        self.persist_job(&tracked.job);
    }

    /// `pending -> running` for one player.
    pub fn player_running(&self, job_id: JobId, player_id: &str) {
        let mut jobs = self.jobs();
        let Some(result) = jobs
            .get_mut(&job_id)
            .and_then(|t| t.players.get_mut(player_id))
        else {
            warn!(job_id = %job_id, player_id, "player_running for untracked player");
            return;
        };
        if !result.status.can_transition_to(PlayerStatus::Running) {
            warn!(
                job_id = %job_id,
                player_id,
                status = %result.status,
                "ignoring transition to running"
            );
            return;
        }
        result.status = PlayerStatus::Running;
        result.updated_at = Utc::now();
        debug!(job_id = %job_id, player_id, "player running");
        self.persist_player(job_id, result);
    }

    /// Record a player's terminal result. A pending player is stepped
    /// through `running` first; terminal results are never overwritten.
    pub fn player_finished(&self, job_id: JobId, result: PlayerAnalysisResult) {
        if !result.is_terminal() {
            warn!(job_id = %job_id, player_id = result.player_id(), "ignoring non-terminal result");
            return;
        }

        let mut jobs = self.jobs();
        let Some(current) = jobs
            .get_mut(&job_id)
            .and_then(|t| t.players.get_mut(result.player_id()))
        else {
            // A cancelled job can finish while its skipped players still sit
            // in the queue.
            debug!(job_id = %job_id, player_id = result.player_id(), "result for untracked player");
            return;
        };
        if current.is_terminal() {
            debug!(
                job_id = %job_id,
                player_id = result.player_id(),
                status = %current.status,
                "player already terminal, ignoring result"
            );
            return;
        }
        if current.status == PlayerStatus::Pending {
            current.status = PlayerStatus::Running;
        }

        let player_id = result.player_id();
        match &result.error {
            // Orchestration failures point at the pipeline, not upstream.
            Some(e) if e.code.is_orchestration() => warn!(
                job_id = %job_id,
                player_id,
                code = %e.code,
                error = %e.message,
                "player failed"
            ),
            Some(e) => info!(
                job_id = %job_id,
                player_id,
                code = %e.code,
                error = %e.message,
                "player failed"
            ),
            None => info!(job_id = %job_id, player_id, "player completed"),
        }
        *current = result;
        self.persist_player(job_id, current);
    }

    /// Fail every player of `job_id` that has not reached a terminal state.
    /// Returns how many were failed.
    pub fn fail_unfinished(&self, job_id: JobId, error: &PlayerError) -> usize {
        self.fail_where(job_id, error, |r| !r.is_terminal())
    }

    /// Fail the players of `job_id` that no worker has started yet. Running
    /// players are left to report their own result.
    pub fn fail_pending(&self, job_id: JobId, error: &PlayerError) -> usize {
        self.fail_where(job_id, error, |r| r.status == PlayerStatus::Pending)
    }

    fn fail_where(
        &self,
        job_id: JobId,
        error: &PlayerError,
        select: impl Fn(&PlayerAnalysisResult) -> bool,
    ) -> usize {
        let mut jobs = self.jobs();
        let Some(tracked) = jobs.get_mut(&job_id) else {
            return 0;
        };
        let mut failed = 0;
        for result in tracked.players.values_mut().filter(|r| select(r)) {
            *result = PlayerAnalysisResult::failed(result.fingerprint.clone(), error.clone());
            self.persist_player(job_id, result);
            failed += 1;
        }
        if failed > 0 {
            warn!(job_id = %job_id, failed, code = %error.code, "failed unfinished players");
        }
        failed
    }

    /// True once every player of the job is terminal, or the job is no
    /// longer tracked.
    pub fn all_terminal(&self, job_id: JobId) -> bool {
        self.jobs()
            .get(&job_id)
            .map_or(true, |t| t.players.values().all(PlayerAnalysisResult::is_terminal))
    }

    /// Move the job to a terminal status, persist it and stop tracking it
    /// in memory. A job still `queued` passes through `running`.
    pub fn finish_job(&self, job_id: JobId, status: JobStatus, error: Option<String>) {
        if !status.is_terminal() {
            warn!(job_id = %job_id, %status, "finish_job called with non-terminal status");
            return;
        }

        let mut jobs = self.jobs();
        let Some(tracked) = jobs.get_mut(&job_id) else {
            warn!(job_id = %job_id, "finish_job for untracked job");
            return;
        };
        if tracked.job.status == JobStatus::Queued {
            tracked.job.status = JobStatus::Running;
        }
        if !tracked.job.status.can_transition_to(status) {
            warn!(
                job_id = %job_id,
                from = %tracked.job.status,
                to = %status,
                "invalid job transition"
            );
            return;
        }

        tracked.job.status = status;
        tracked.job.error = error;
        tracked.job.completed_at = Some(Utc::now());
        if let Err(e) = self.db.save_job(&tracked.job) {
            // Keep serving it from memory rather than losing the final state.
            error!(job_id = %job_id, "failed to persist finished job: {e:#}");
            return;
        }
        info!(job_id = %job_id, %status, "job finished");
        jobs.remove(&job_id);
    }

    pub fn is_tracked(&self, job_id: JobId) -> bool {
        self.jobs().contains_key(&job_id)
    }

    /// Current view of a job: from memory while it is active, else from disk.
    pub fn snapshot(&self, job_id: JobId) -> Result<Option<JobStatusReport>> {
        if let Some(tracked) = self.jobs().get(&job_id) {
            return Ok(Some(JobStatusReport {
                job: tracked.job.clone(),
                players: tracked.players.clone(),
            }));
        }

        let Some(job) = self.db.load_job(job_id)? else {
            return Ok(None);
        };
        let players = self
            .db
            .load_player_results(job_id)?
            .into_iter()
            .map(|r| (r.player_id().to_string(), r))
            .collect();
        Ok(Some(JobStatusReport { job, players }))
    }

    fn persist_job(&self, job: &AnalysisJob) {
        if let Err(e) = self.db.save_job(job) {
            error!(job_id = %job.job_id, "failed to persist job: {e:#}");
        }
    }

    fn persist_player(&self, job_id: JobId, result: &PlayerAnalysisResult) {
        if let Err(e) = self.db.save_player_result(job_id, result) {
            error!(
                job_id = %job_id,
                player_id = result.player_id(),
                "failed to persist player result: {e:#}"
            );
        }
    }
}
