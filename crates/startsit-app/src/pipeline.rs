// Public entry point for the analysis pipeline: submit, poll, cancel, resume.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use startsit_core::config::Config;
use startsit_core::db::Database;
use startsit_core::model::{
    AnalysisJob, JobId, JobRequest, JobStatusReport, PlayerAnalysisResult,
};
use startsit_core::ValidationError;
use startsit_football::StatsProvider;
use startsit_llm::GradingClient;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::dispatcher::Dispatcher;
use crate::task::{AnalyzerSettings, PlayerAnalyzer};
use crate::tracker::StatusTracker;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid job request: {0}")]
    Validation(#[from] ValidationError),

    #[error("unknown job {0}")]
    UnknownJob(JobId),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

type CancelRegistry = Arc<Mutex<HashMap<JobId, watch::Sender<bool>>>>;

pub struct Pipeline {
    db: Arc<Database>,
    tracker: Arc<StatusTracker>,
    dispatcher: Dispatcher,
    active: CancelRegistry,
}

impl Pipeline {
    /// Wire the cache, analyzer, tracker and worker pool together. Must be
    /// called from within a tokio runtime.
    pub fn start(
        config: &Config,
        stats: Arc<dyn StatsProvider>,
        grading: GradingClient,
        db: Arc<Database>,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(
            Some(Arc::clone(&db)),
            config.season.clone(),
            Duration::from_secs(config.cache.current_week_ttl_secs),
            // A healthy holder must never look orphaned.
            config.pipeline.claim_lease().max(config.claim_hold_budget()),
        ));
        let analyzer = Arc::new(PlayerAnalyzer::new(
            stats,
            grading,
            cache,
            AnalyzerSettings::from_config(config),
        ));
        let tracker = Arc::new(StatusTracker::new(Arc::clone(&db)));
        let dispatcher = Dispatcher::start(
            config.pipeline.workers,
            config.pipeline.queue_capacity,
            analyzer,
            Arc::clone(&tracker),
        );

        Pipeline {
            db,
            tracker,
            dispatcher,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<JobId, watch::Sender<bool>>> {
        self.active.lock().expect("active jobs mutex poisoned")
    }

    /// Validate and enqueue a job. Returns as soon as the job is recorded
    /// as `queued`; analysis happens in the background.
    pub fn submit_job(&self, request: JobRequest) -> Result<JobId, PipelineError> {
        let request = request.validate()?;
        let job = AnalysisJob::queued(request);
        let players = job
            .player_ids
            .iter()
            .map(|p| PlayerAnalysisResult::pending(job.fingerprint_for(p)))
            .collect();

        info!(
            job_id = %job.job_id,
            roster_id = %job.roster_id,
            opponent = %job.opponent_team_id,
            week = job.week,
            season = job.season,
            players = job.player_ids.len(),
            "job submitted"
        );
        self.launch(job, players)
    }

    /// Current status and per-player results, including partial progress.
    pub fn get_job_status(&self, job_id: JobId) -> Result<JobStatusReport, PipelineError> {
        self.tracker
            .snapshot(job_id)?
            .ok_or(PipelineError::UnknownJob(job_id))
    }

    /// Best-effort cancellation. Returns `false` if the job had already
    /// finished. Players that are not yet terminal end as `cancelled`;
    /// computations other jobs are waiting on keep running.
    pub fn cancel_job(&self, job_id: JobId) -> Result<bool, PipelineError> {
        // The tracker drops a job the moment it finishes, slightly before its
        // driver leaves the registry.
        if self.tracker.is_tracked(job_id) {
            if let Some(cancel) = self.active().get(&job_id) {
                cancel.send_replace(true);
                info!(job_id = %job_id, "job cancellation requested");
                return Ok(true);
            }
        }
        match self.tracker.snapshot(job_id)? {
            Some(_) => Ok(false),
            None => Err(PipelineError::UnknownJob(job_id)),
        }
    }

    /// Re-dispatch jobs left `queued` or `running` by a previous process.
    /// Terminal player results are kept; the rest start over as `pending`.
    pub fn resume(&self) -> Result<Vec<JobId>, PipelineError> {
        let mut resumed = Vec::new();
        for job in self.db.load_unfinished_jobs()? {
            if self.tracker.is_tracked(job.job_id) {
                continue;
            }
            let mut previous: HashMap<String, PlayerAnalysisResult> = self
                .db
                .load_player_results(job.job_id)?
                .into_iter()
                .map(|r| (r.player_id().to_string(), r))
                .collect();

            let players: Vec<PlayerAnalysisResult> = job
                .player_ids
                .iter()
                .map(|p| match previous.remove(p) {
                    Some(r) if r.is_terminal() => r,
                    _ => PlayerAnalysisResult::pending(job.fingerprint_for(p)),
                })
                .collect();

            let remaining = players.iter().filter(|r| !r.is_terminal()).count();
            info!(job_id = %job.job_id, status = %job.status, remaining, "resuming job");
            resumed.push(self.launch(job, players)?);
        }
        if resumed.is_empty() {
            info!("no unfinished jobs to resume");
        }
        Ok(resumed)
    }

    /// Poll until the job is terminal.
    pub async fn wait_for_job(
        &self,
        job_id: JobId,
        poll_interval: Duration,
    ) -> Result<JobStatusReport, PipelineError> {
        loop {
            let report = self.get_job_status(job_id)?;
            if report.job.status.is_terminal() {
                return Ok(report);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Stop accepting work and let the workers drain.
    pub async fn shutdown(self) {
        let active = self.active().len();
        if active > 0 {
            warn!(active, "shutting down with jobs still in flight");
        }
        self.dispatcher.shutdown().await;
    }

    fn launch(
        &self,
        job: AnalysisJob,
        players: Vec<PlayerAnalysisResult>,
    ) -> Result<JobId, PipelineError> {
        let job_id = job.job_id;
        let pending = players
            .iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.fingerprint.clone())
            .collect();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active().insert(job_id, cancel_tx);
        if let Err(e) = self.tracker.register(job.clone(), players) {
            self.active().remove(&job_id);
            return Err(e.into());
        }

        let driver = self.dispatcher.dispatch(&job, pending, cancel_rx);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            if let Err(e) = driver.await {
                warn!(job_id = %job_id, "job driver ended abnormally: {e}");
            }
            active
                .lock()
                .expect("active jobs mutex poisoned")
                .remove(&job_id);
        });

        Ok(job_id)
    }
}
