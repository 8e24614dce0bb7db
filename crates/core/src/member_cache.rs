use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::types::Member;
use crate::upstream::Upstream;

pub const MEMBER_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const MEMBER_FAIL_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedMember {
    member: Option<Member>,
    fetched_at: Instant,
    failed: bool,
}

impl CachedMember {
    fn is_fresh(&self, now: Instant, success_ttl: Duration, failure_ttl: Duration) -> bool {
        let ttl = if self.failed { failure_ttl } else { success_ttl };
        now.duration_since(self.fetched_at) < ttl
    }
}

/// Memoized guild member lookups. Failed lookups are cached too, on a
/// shorter TTL, so an unresolvable user doesn't hit upstream on every
/// request but a transient failure is retried soon.
pub struct MemberCache {
    entries: Mutex<HashMap<(String, String), CachedMember>>,
    success_ttl: Duration,
    failure_ttl: Duration,
}

impl Default for MemberCache {
    fn default() -> Self {
        Self::new(MEMBER_CACHE_TTL, MEMBER_FAIL_TTL)
    }
}

impl MemberCache {
    pub fn new(success_ttl: Duration, failure_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            success_ttl,
            failure_ttl,
        }
    }

    pub async fn fetch(
        &self,
        upstream: &dyn Upstream,
        guild_id: &str,
        user_id: &str,
    ) -> Option<Member> {
        let key = (guild_id.to_string(), user_id.to_string());
        if let Some(cached) = self.lookup(&key) {
            return cached;
        }

        let entry = match upstream.fetch_member(guild_id, user_id).await {
            Ok(member) => CachedMember {
                member: Some(member),
                fetched_at: Instant::now(),
                failed: false,
            },
            Err(err) => {
                debug!(%guild_id, %user_id, error = %err, "member lookup failed");
                CachedMember {
                    member: None,
                    fetched_at: Instant::now(),
                    failed: true,
                }
            }
        };

        let member = entry.member.clone();
        self.lock().insert(key, entry);
        member
    }

    pub fn invalidate(&self, guild_id: &str, user_id: &str) {
        self.lock()
            .remove(&(guild_id.to_string(), user_id.to_string()));
    }

    /// Drops every entry past its TTL. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now, self.success_ttl, self.failure_ttl));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically prunes expired entries until the returned handle is dropped.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> SweeperHandle {
        let cache = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.prune();
                if removed > 0 {
                    debug!(removed, "member cache sweep");
                }
            }
        });
        SweeperHandle { task }
    }

    // Outer None: no usable entry. Inner None: cached failure.
    fn lookup(&self, key: &(String, String)) -> Option<Option<Member>> {
        let entries = self.lock();
        let cached = entries.get(key)?;
        cached
            .is_fresh(Instant::now(), self.success_ttl, self.failure_ttl)
            .then(|| cached.member.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), CachedMember>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{member, FakeUpstream};

    #[tokio::test(start_paused = true)]
    async fn test_success_not_refetched_within_ttl() {
        let upstream = FakeUpstream::new("bot");
        upstream.add_member("g1", member("u1", &[])).await;
        let cache = MemberCache::default();

        assert!(cache.fetch(&upstream, "g1", "u1").await.is_some());
        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        assert!(cache.fetch(&upstream, "g1", "u1").await.is_some());

        assert_eq!(upstream.member_fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_refetched_after_ttl() {
        let upstream = FakeUpstream::new("bot");
        upstream.add_member("g1", member("u1", &[])).await;
        let cache = MemberCache::default();

        cache.fetch(&upstream, "g1", "u1").await;
        tokio::time::advance(MEMBER_CACHE_TTL + Duration::from_millis(1)).await;
        cache.fetch(&upstream, "g1", "u1").await;

        assert_eq!(upstream.member_fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cached_then_retried_after_short_ttl() {
        let upstream = FakeUpstream::new("bot");
        let cache = MemberCache::default();

        assert!(cache.fetch(&upstream, "g1", "ghost").await.is_none());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.fetch(&upstream, "g1", "ghost").await.is_none());
        assert_eq!(upstream.member_fetches(), 1);

        // member becomes resolvable; the failure entry must not hide it for long
        upstream.add_member("g1", member("ghost", &[])).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.fetch(&upstream, "g1", "ghost").await.is_some());
        assert_eq!(upstream.member_fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_lookup() {
        let upstream = FakeUpstream::new("bot");
        upstream.add_member("g1", member("u1", &[])).await;
        let cache = MemberCache::default();

        cache.fetch(&upstream, "g1", "u1").await;
        cache.invalidate("g1", "u1");
        cache.fetch(&upstream, "g1", "u1").await;

        assert_eq!(upstream.member_fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_expired_entries() {
        let upstream = FakeUpstream::new("bot");
        upstream.add_member("g1", member("u1", &[])).await;
        let cache = MemberCache::default();

        cache.fetch(&upstream, "g1", "u1").await;
        cache.fetch(&upstream, "g1", "missing").await;
        assert_eq!(cache.len(), 2);

        tokio::time::advance(MEMBER_FAIL_TTL + Duration::from_secs(1)).await;
        assert_eq!(cache.prune(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_until_dropped() {
        let upstream = FakeUpstream::new("bot");
        let cache = Arc::new(MemberCache::default());
        cache.fetch(&upstream, "g1", "missing").await;

        let handle = cache.start_sweeper(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(cache.is_empty());
        drop(handle);
    }
}
