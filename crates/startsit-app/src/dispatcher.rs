// Fixed-size worker pool fed by one bounded queue.
//
// Every job's players go through the same queue, so a large roster waits its
// turn instead of starving other jobs. Each job gets a small driver task that
// enqueues its players, waits for them to report back, and closes the job
// once every player is terminal. Cancelling a job fails its queued players
// on the spot; workers skip them when they come up.

use std::sync::Arc;

use startsit_core::model::{
    AnalysisJob, ErrorCode, Fingerprint, JobId, JobStatus, PlayerAnalysisResult, PlayerError,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::task::{cancelled, PlayerAnalyzer};
use crate::tracker::StatusTracker;

/// One player of one job, waiting for a worker.
pub struct WorkItem {
    pub job_id: JobId,
    pub fingerprint: Fingerprint,
    pub cancel: watch::Receiver<bool>,
    pub done: mpsc::UnboundedSender<()>,
}

pub struct Dispatcher {
    queue: mpsc::Sender<WorkItem>,
    workers: Vec<JoinHandle<()>>,
    tracker: Arc<StatusTracker>,
}

impl Dispatcher {
    /// Spawn `workers` workers sharing a queue of `capacity` items.
    pub fn start(
        workers: usize,
        capacity: usize,
        analyzer: Arc<PlayerAnalyzer>,
        tracker: Arc<StatusTracker>,
    ) -> Self {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&analyzer),
                    Arc::clone(&tracker),
                ))
            })
            .collect::<Vec<_>>();
        info!(workers = workers.len(), capacity, "dispatcher started");

        Dispatcher {
            queue,
            workers,
            tracker,
        }
    }

    /// Spawn the driver for `job`, dispatching the given fingerprints. The
    /// job must already be registered with the tracker.
    pub fn dispatch(
        &self,
        job: &AnalysisJob,
        pending: Vec<Fingerprint>,
        cancel: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(drive_job(
            job.job_id,
            pending,
            self.queue.clone(),
            Arc::clone(&self.tracker),
            cancel,
        ))
    }

    /// Stop accepting work and wait for the workers to drain the queue.
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("dispatcher stopped");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    analyzer: Arc<PlayerAnalyzer>,
    tracker: Arc<StatusTracker>,
) {
    loop {
        // Hold the lock only while waiting for the next item.
        let item = { rx.lock().await.recv().await };
        let Some(mut item) = item else {
            debug!(worker = id, "queue closed, worker exiting");
            return;
        };

        tracker.job_running(item.job_id);
        let player_id = item.fingerprint.player_id.clone();

        let result = if *item.cancel.borrow() {
            debug!(
                worker = id,
                job_id = %item.job_id,
                player_id = %player_id,
                "skipping cancelled player"
            );
            PlayerAnalysisResult::failed(
                item.fingerprint.clone(),
                PlayerError::new(ErrorCode::Cancelled, "job cancelled"),
            )
        } else {
            tracker.player_running(item.job_id, &player_id);
            debug!(worker = id, job_id = %item.job_id, player_id = %player_id, "player started");
            analyzer.analyze(&item.fingerprint, &mut item.cancel).await
        };

        tracker.player_finished(item.job_id, result);
        let _ = item.done.send(());
    }
}

async fn drive_job(
    job_id: JobId,
    pending: Vec<Fingerprint>,
    queue: mpsc::Sender<WorkItem>,
    tracker: Arc<StatusTracker>,
    mut cancel: watch::Receiver<bool>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let total = pending.len();
    let mut enqueued = 0;
    let mut was_cancelled = false;

    for fingerprint in pending {
        let item = WorkItem {
            job_id,
            fingerprint,
            cancel: cancel.clone(),
            done: done_tx.clone(),
        };
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                was_cancelled = true;
                break;
            }
            sent = queue.send(item) => {
                if sent.is_err() {
                    warn!(job_id = %job_id, "dispatcher shut down while enqueueing");
                    break;
                }
                enqueued += 1;
            }
        }
    }
    drop(done_tx);
    drop(queue);
    debug!(job_id = %job_id, enqueued, total, "job enqueued");

    if !was_cancelled {
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    was_cancelled = true;
                    break;
                }
                done = done_rx.recv() => {
                    if done.is_none() {
                        break;
                    }
                }
            }
        }
    }

    if was_cancelled {
        // Players still in the queue fail now; running ones see the flag and
        // report back on their own.
        let skipped = tracker.fail_pending(
            job_id,
            &PlayerError::new(ErrorCode::Cancelled, "job cancelled"),
        );
        debug!(job_id = %job_id, skipped, "cancelled queued players");
        while !tracker.all_terminal(job_id) {
            if done_rx.recv().await.is_none() {
                break;
            }
        }
    }

    // Anything not reported back never ran: shutdown or a lost worker.
    tracker.fail_unfinished(
        job_id,
        &PlayerError::new(ErrorCode::Internal, "pipeline stopped before player ran"),
    );

    if was_cancelled {
        tracker.finish_job(job_id, JobStatus::Failed, Some("job cancelled".to_string()));
    } else {
        tracker.finish_job(job_id, JobStatus::Completed, None);
    }
}
