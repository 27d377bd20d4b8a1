// Short-TTL memo for defensive reference data.
//
// Every player facing the same opponent in the same week needs the same
// defense bundle, so `DefenseCache` wraps any `StatsProvider` and keeps
// successful defense lookups for a bounded window. Player lookups and
// failures pass straight through.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use startsit_core::model::TeamId;
use startsit_core::UpstreamError;
use tokio::time::Instant;
use tracing::debug;

use crate::stats::{DefenseBundle, StatsBundle, StatsProvider};

type DefenseKey = (TeamId, u16, u8);

pub struct DefenseCache<P> {
    inner: P,
    ttl: Duration,
    entries: Mutex<HashMap<DefenseKey, (Instant, DefenseBundle)>>,
}

impl<P: StatsProvider> DefenseCache<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, key: &DefenseKey) -> Option<DefenseBundle> {
        let mut entries = self.entries.lock().expect("defense cache mutex poisoned");
        match entries.get(key) {
            Some((stored_at, bundle)) if stored_at.elapsed() < self.ttl => Some(bundle.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl<P: StatsProvider> StatsProvider for DefenseCache<P> {
    async fn fetch_player_stats(
        &self,
        player_id: &str,
        season: u16,
        week: u8,
    ) -> Result<StatsBundle, UpstreamError> {
        self.inner.fetch_player_stats(player_id, season, week).await
    }

    async fn fetch_defense_stats(
        &self,
        team_id: &str,
        season: u16,
        week: u8,
    ) -> Result<DefenseBundle, UpstreamError> {
        let key = (team_id.to_string(), season, week);
        if let Some(bundle) = self.lookup(&key) {
            debug!(team_id, season, week, "defense cache hit");
            return Ok(bundle);
        }

        let bundle = self.inner.fetch_defense_stats(team_id, season, week).await?;
        self.entries
            .lock()
            .expect("defense cache mutex poisoned")
            .insert(key, (Instant::now(), bundle.clone()));
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        defense_calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl StatsProvider for CountingProvider {
        async fn fetch_player_stats(
            &self,
            _player_id: &str,
            _season: u16,
            _week: u8,
        ) -> Result<StatsBundle, UpstreamError> {
            Err(UpstreamError::rejected("stats", "unused"))
        }

        async fn fetch_defense_stats(
            &self,
            team_id: &str,
            _season: u16,
            _week: u8,
        ) -> Result<DefenseBundle, UpstreamError> {
            self.defense_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(UpstreamError::unavailable("stats", "503"));
            }
            Ok(DefenseBundle {
                team_id: team_id.to_string(),
                ..Default::default()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_lookups_hit_until_ttl() {
        let cache = DefenseCache::new(CountingProvider::default(), Duration::from_secs(60));

        cache.fetch_defense_stats("KC", 2024, 5).await.unwrap();
        cache.fetch_defense_stats("KC", 2024, 5).await.unwrap();
        assert_eq!(cache.inner.defense_calls.load(Ordering::SeqCst), 1);

        // A different week is a different key.
        cache.fetch_defense_stats("KC", 2024, 6).await.unwrap();
        assert_eq!(cache.inner.defense_calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.fetch_defense_stats("KC", 2024, 5).await.unwrap();
        assert_eq!(cache.inner.defense_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = DefenseCache::new(
            CountingProvider {
                fail: true,
                ..Default::default()
            },
            Duration::from_secs(60),
        );

        assert!(cache.fetch_defense_stats("KC", 2024, 5).await.is_err());
        assert!(cache.fetch_defense_stats("KC", 2024, 5).await.is_err());
        assert_eq!(cache.inner.defense_calls.load(Ordering::SeqCst), 2);
    }
}
