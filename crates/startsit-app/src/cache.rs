// Result cache with single-flight claims.
//
// A fingerprint is in one of three states: cached (a fresh completed result
// exists), claimed (one task is computing it), or absent. `try_claim` moves
// absent -> claimed in the same critical section that checks the other two,
// so concurrent callers for one fingerprint see exactly one `Claimed`; the
// rest get a `WaitHandle` that resolves when the claimant calls `complete`
// or `fail`.
//
// Claims carry a lease. A claim whose lease has lapsed is orphaned: the next
// `try_claim` replaces it and its waiters resolve to `Abandoned`.
//
// Memory holds at most `MEMORY_CAPACITY` entries. Once that is exceeded,
// stale entries are swept and then the oldest go; SQLite keeps every entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use startsit_core::config::SeasonConfig;
use startsit_core::db::Database;
use startsit_core::model::{
    CacheEntry, ErrorCode, Fingerprint, PlayerAnalysisResult, PlayerError, PlayerStatus, TtlClass,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

const MEMORY_CAPACITY: usize = 4_096;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What a waiter observes when a claim resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Pending,
    Completed(PlayerAnalysisResult),
    Failed(PlayerError),
    /// The claim was dropped without a result (lease expired).
    Abandoned,
}

/// Proof of ownership of a claim. Hand it back to `complete` or `fail`.
#[derive(Debug)]
pub struct ClaimToken {
    fingerprint: Fingerprint,
    id: u64,
}

impl ClaimToken {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// Resolves once the claim it was issued for completes, fails, or is
/// abandoned.
#[derive(Debug)]
pub struct WaitHandle {
    rx: watch::Receiver<ClaimOutcome>,
}

impl WaitHandle {
    pub async fn wait(mut self) -> ClaimOutcome {
        loop {
            {
                let current = self.rx.borrow_and_update();
                if *current != ClaimOutcome::Pending {
                    return current.clone();
                }
            }
            if self.rx.changed().await.is_err() {
                let last = self.rx.borrow().clone();
                return match last {
                    ClaimOutcome::Pending => ClaimOutcome::Abandoned,
                    resolved => resolved,
                };
            }
        }
    }
}

pub enum ClaimResult {
    /// A fresh completed result already exists.
    Hit(PlayerAnalysisResult),
    /// The caller owns the computation. `handle` resolves when the owner
    /// publishes, which lets the owner wait the same way other waiters do.
    Claimed { token: ClaimToken, handle: WaitHandle },
    /// Another task owns the computation.
    Wait(WaitHandle),
}

// ---------------------------------------------------------------------------
// ResultCache
// ---------------------------------------------------------------------------

struct Claim {
    id: u64,
    lease_expires: Instant,
    tx: watch::Sender<ClaimOutcome>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    claims: HashMap<Fingerprint, Claim>,
    next_claim_id: u64,
}

pub struct ResultCache {
    state: Mutex<CacheState>,
    db: Option<Arc<Database>>,
    season: SeasonConfig,
    current_week_ttl: chrono::Duration,
    lease: Duration,
    memory_capacity: usize,
}

impl ResultCache {
    pub fn new(
        db: Option<Arc<Database>>,
        season: SeasonConfig,
        current_week_ttl: Duration,
        lease: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            db,
            season,
            current_week_ttl: chrono::Duration::from_std(current_week_ttl)
                .unwrap_or(chrono::Duration::MAX),
            lease,
            memory_capacity: MEMORY_CAPACITY,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("result cache mutex poisoned")
    }

    fn ttl_class(&self, fp: &Fingerprint) -> TtlClass {
        TtlClass::classify(fp, self.season.current_season, self.season.current_week)
    }

    /// Fresh entry from memory, dropping a stale one.
    fn fresh_in_memory(
        &self,
        state: &mut CacheState,
        fp: &Fingerprint,
    ) -> Option<PlayerAnalysisResult> {
        let fresh = state
            .entries
            .get(fp)
            .map(|entry| entry.is_fresh(Utc::now(), self.current_week_ttl))?;
        if fresh {
            state.entries.get(fp).map(|entry| entry.result.clone())
        } else {
            state.entries.remove(fp);
            None
        }
    }

    /// Insert into memory, trimming back to capacity.
    fn remember(&self, state: &mut CacheState, fp: Fingerprint, entry: CacheEntry) {
        state.entries.insert(fp, entry);
        if state.entries.len() <= self.memory_capacity {
            return;
        }

        let now = Utc::now();
        state
            .entries
            .retain(|_, e| e.is_fresh(now, self.current_week_ttl));
        let excess = state.entries.len().saturating_sub(self.memory_capacity);
        if excess > 0 {
            let mut by_age: Vec<_> = state
                .entries
                .iter()
                .map(|(fp, e)| (e.computed_at, fp.clone()))
                .collect();
            by_age.sort_by_key(|(computed_at, _)| *computed_at);
            for (_, fp) in by_age.into_iter().take(excess) {
                state.entries.remove(&fp);
            }
        }
        debug!(kept = state.entries.len(), "trimmed in-memory cache");
    }

    /// Fresh completed entry from disk. Storage errors count as a miss.
    fn fresh_on_disk(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        let db = self.db.as_ref()?;
        match db.get_cache_entry(fp) {
            Ok(Some(entry))
                if entry.result.status == PlayerStatus::Completed
                    && entry.is_fresh(Utc::now(), self.current_week_ttl) =>
            {
                Some(entry)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "cache lookup on disk failed");
                None
            }
        }
    }

    /// Read-only lookup of a fresh completed result.
    pub fn get(&self, fp: &Fingerprint) -> Option<PlayerAnalysisResult> {
        {
            let state = self.state();
            if let Some(entry) = state.entries.get(fp) {
                if entry.is_fresh(Utc::now(), self.current_week_ttl) {
                    return Some(entry.result.clone());
                }
            }
        }
        self.fresh_on_disk(fp).map(|entry| entry.result)
    }

    /// True while some task holds an unexpired claim on `fp`.
    #[cfg(test)]
    pub fn is_claimed(&self, fp: &Fingerprint) -> bool {
        self.state()
            .claims
            .get(fp)
            .is_some_and(|c| c.lease_expires > Instant::now())
    }

    /// Atomically: return a fresh result, or join the active claim, or take
    /// a new claim.
    pub fn try_claim(&self, fp: &Fingerprint) -> ClaimResult {
        let mut state = self.state();

        if let Some(result) = self.fresh_in_memory(&mut state, fp) {
            debug!(fingerprint = %fp, "cache hit");
            return ClaimResult::Hit(result);
        }

        let now = Instant::now();
        match state.claims.get(fp) {
            Some(claim) if claim.lease_expires > now => {
                debug!(fingerprint = %fp, "joining in-flight claim");
                return ClaimResult::Wait(WaitHandle {
                    rx: claim.tx.subscribe(),
                });
            }
            Some(_) => {
                if let Some(orphan) = state.claims.remove(fp) {
                    warn!(
                        fingerprint = %fp,
                        claim_id = orphan.id,
                        "claim lease expired, reclaiming"
                    );
                    orphan.tx.send_replace(ClaimOutcome::Abandoned);
                }
            }
            None => {}
        }

        // Only consult disk when nobody is computing: a warm entry from a
        // previous run saves the upstream calls entirely.
        if let Some(entry) = self.fresh_on_disk(fp) {
            debug!(fingerprint = %fp, "cache hit (disk)");
            let result = entry.result.clone();
            self.remember(&mut state, fp.clone(), entry);
            return ClaimResult::Hit(result);
        }

        state.next_claim_id += 1;
        let id = state.next_claim_id;
        let (tx, rx) = watch::channel(ClaimOutcome::Pending);
        state.claims.insert(
            fp.clone(),
            Claim {
                id,
                lease_expires: now + self.lease,
                tx,
            },
        );
        debug!(fingerprint = %fp, claim_id = id, "claimed");

        ClaimResult::Claimed {
            token: ClaimToken {
                fingerprint: fp.clone(),
                id,
            },
            handle: WaitHandle { rx },
        }
    }

    /// Store a completed result, wake every waiter, and release the claim.
    ///
    /// A token whose lease was already taken over still stores its result
    /// (it is just as valid) but leaves the newer claim in place.
    pub fn complete(&self, token: ClaimToken, result: PlayerAnalysisResult) {
        if result.status != PlayerStatus::Completed {
            let error = result.error.unwrap_or_else(|| {
                PlayerError::new(ErrorCode::Internal, "non-completed result passed to complete")
            });
            self.fail(token, error);
            return;
        }
        let fp = token.fingerprint;

        let entry = CacheEntry {
            result: result.clone(),
            computed_at: Utc::now(),
            ttl: self.ttl_class(&fp),
        };

        {
            let mut state = self.state();
            self.remember(&mut state, fp.clone(), entry.clone());
            if state.claims.get(&fp).is_some_and(|c| c.id == token.id) {
                if let Some(claim) = state.claims.remove(&fp) {
                    claim.tx.send_replace(ClaimOutcome::Completed(result));
                }
            } else {
                debug!(fingerprint = %fp, claim_id = token.id, "completed after losing claim");
            }
        }

        if let Some(db) = &self.db {
            if let Err(e) = db.put_cache_entry(&entry) {
                warn!(fingerprint = %fp, error = %e, "failed to persist cache entry");
            }
        }
    }

    /// Release the claim without caching anything. Current waiters see the
    /// failure; the next `try_claim` starts over.
    pub fn fail(&self, token: ClaimToken, error: PlayerError) {
        let mut state = self.state();
        if state
            .claims
            .get(&token.fingerprint)
            .is_some_and(|c| c.id == token.id)
        {
            if let Some(claim) = state.claims.remove(&token.fingerprint) {
                claim.tx.send_replace(ClaimOutcome::Failed(error));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
