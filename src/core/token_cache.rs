use crate::core::error::TokenError;
use crate::core::types::{CacheStats, ConnectionIdentity, Token};
use crate::ports::AuthTokenGenerator;
use aws_smithy_async::time::{SharedTimeSource, TimeSource};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use moka::future::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub type TokenResult = Result<Arc<Token>, Arc<TokenError>>;

type PendingGeneration = Shared<BoxFuture<'static, TokenResult>>;

/// Per-identity state: the last issued token plus the generation in progress, if any.
#[derive(Default)]
struct TokenSlot {
    current: RwLock<Option<Arc<Token>>>,
    in_flight: Mutex<Option<PendingGeneration>>,
}

impl TokenSlot {
    async fn fresh_token(&self, now: DateTime<Utc>, margin: Duration) -> Option<Arc<Token>> {
        let guard = self.current.read().await;
        guard
            .as_ref()
            .filter(|token| token.is_fresh_at(now, margin))
            .cloned()
    }

    async fn valid_token(&self, now: DateTime<Utc>) -> Option<Arc<Token>> {
        let guard = self.current.read().await;
        guard
            .as_ref()
            .filter(|token| token.is_valid_at(now))
            .cloned()
    }

    /// Stores a successful outcome and clears the in-flight cell in one step.
    async fn publish(&self, identity: &ConnectionIdentity, outcome: &TokenResult) {
        let mut in_flight = self.in_flight.lock().await;
        if let Ok(token) = outcome {
            info!(
                %identity,
                issued_at = %token.issued_at(),
                expires_at = %token.expires_at(),
                "Cached new IAM auth token"
            );
            *self.current.write().await = Some(Arc::clone(token));
        }
        *in_flight = None;
    }
}

/// Long-lived identity → token cache with single-flight regeneration per identity.
///
/// Tokens are served until `refresh_margin` before their expiry. Each identity has
/// its own slot, so generation for one identity never waits on another.
pub struct TokenCache {
    slots: Cache<ConnectionIdentity, Arc<TokenSlot>>,
    generator: Arc<dyn AuthTokenGenerator>,
    refresh_margin: Duration,
    time_source: SharedTimeSource,

    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fallbacks: AtomicU64,
    failures: AtomicU64,
}

impl TokenCache {
    pub fn new(generator: Arc<dyn AuthTokenGenerator>, refresh_margin: Duration) -> Self {
        Self {
            slots: Cache::builder().build(),
            generator,
            refresh_margin,
            time_source: SharedTimeSource::default(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn with_time_source(mut self, time_source: impl TimeSource + 'static) -> Self {
        self.time_source = SharedTimeSource::new(time_source);
        self
    }

    pub fn refresh_margin(&self) -> Duration {
        self.refresh_margin
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.time_source.now())
    }

    async fn slot_for(&self, identity: &ConnectionIdentity) -> Arc<TokenSlot> {
        self.slots
            .get_with_by_ref(identity, async { Arc::new(TokenSlot::default()) })
            .await
    }

    pub async fn get_token(&self, identity: &ConnectionIdentity) -> TokenResult {
        let slot = self.slot_for(identity).await;

        if let Some(token) = slot.fresh_token(self.now(), self.refresh_margin).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%identity, expires_at = %token.expires_at(), "Token cache hit.");
            return Ok(token);
        }

        let pending = {
            let mut in_flight = slot.in_flight.lock().await;

            // A generation may have completed while we waited for the lock.
            if let Some(token) = slot.fresh_token(self.now(), self.refresh_margin).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%identity, "Token cache hit after waiting for in-flight generation.");
                return Ok(token);
            }

            // Generations clear the cell before resolving; a resolved one left behind
            // means its task died before publishing.
            let joinable = in_flight
                .as_ref()
                .filter(|pending| pending.peek().is_none())
                .cloned();
            match joinable {
                Some(pending) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(%identity, "Joining in-flight token generation.");
                    pending
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(%identity, "Token cache miss. Starting generation.");
                    let pending = self.start_generation(identity, &slot);
                    *in_flight = Some(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.await;

        match outcome {
            Ok(token) => Ok(token),
            Err(err) => {
                if let Some(previous) = slot.valid_token(self.now()).await {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        %identity,
                        expires_at = %previous.expires_at(),
                        "Token generation failed, reusing still valid token: {}",
                        err
                    );
                    return Ok(previous);
                }
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(%identity, "Token generation failed: {}", err);
                Err(err)
            }
        }
    }

    /// Runs the generation on its own task, which publishes the outcome before the
    /// shared future resolves. Dropping every waiter neither cancels nor loses it.
    fn start_generation(
        &self,
        identity: &ConnectionIdentity,
        slot: &Arc<TokenSlot>,
    ) -> PendingGeneration {
        let generator = Arc::clone(&self.generator);
        let task_identity = identity.clone();
        let slot = Arc::downgrade(slot);
        let task = tokio::spawn(async move {
            let outcome = generator
                .generate_token(&task_identity)
                .await
                .map(Arc::new)
                .map_err(Arc::new);
            if let Some(slot) = slot.upgrade() {
                slot.publish(&task_identity, &outcome).await;
            }
            outcome
        });

        let endpoint = identity.endpoint();
        async move {
            task.await.unwrap_or_else(|join_error| {
                Err(Arc::new(TokenError::generation_aborted(
                    endpoint,
                    join_error.to_string(),
                )))
            })
        }
        .boxed()
        .shared()
    }

    pub async fn invalidate(&self, identity: &ConnectionIdentity) {
        debug!(%identity, "Removing token slot from cache.");
        self.slots.invalidate(identity).await;
    }

    pub async fn stats(&self) -> CacheStats {
        self.slots.run_pending_tasks().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            size: self.slots.entry_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::aws::tests::mock_providers::{MockClock, MockTokenGenerator};
    use crate::core::error::CredentialError;
    use assert_matches::assert_matches;
    use std::time::SystemTime;

    fn identity(host: &str) -> ConnectionIdentity {
        ConnectionIdentity::new(host, 5432, "us-east-1", "app", "postgresql")
    }

    fn cache_with(generator: &Arc<MockTokenGenerator>) -> TokenCache {
        TokenCache::new(
            Arc::clone(generator) as Arc<dyn AuthTokenGenerator>,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_first_request_signs_once() {
        let generator = Arc::new(MockTokenGenerator::new());
        let cache = cache_with(&generator);
        let id = identity("db.example.com");

        let token = cache.get_token(&id).await.unwrap();
        assert_eq!(generator.call_count(), 1);
        assert_eq!(
            token.expires_at() - token.issued_at(),
            chrono::Duration::seconds(900)
        );

        let again = cache.get_token(&id).await.unwrap();
        assert!(Arc::ptr_eq(&token, &again));
        assert_eq!(generator.call_count(), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_generation() {
        let generator = Arc::new(MockTokenGenerator::new().with_delay(Duration::from_millis(100)));
        let cache = Arc::new(cache_with(&generator));
        let id = identity("db.example.com");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let id = id.clone();
                tokio::spawn(async move { cache.get_token(&id).await })
            })
            .collect();

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(generator.call_count(), 1);
        assert!(tokens.iter().all(|t| Arc::ptr_eq(t, &tokens[0])));
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_identities_do_not_block_each_other() {
        let generator = Arc::new(MockTokenGenerator::new());
        generator.block_host("slow.example.com");
        let cache = Arc::new(cache_with(&generator));

        let slow_cache = Arc::clone(&cache);
        let slow = tokio::spawn(async move {
            slow_cache.get_token(&identity("slow.example.com")).await
        });
        generator.wait_for_calls(1).await;

        let fast = tokio::time::timeout(
            Duration::from_secs(2),
            cache.get_token(&identity("fast.example.com")),
        )
        .await
        .expect("unrelated identity must not wait for the slow one");
        assert!(fast.is_ok());
        assert!(!slow.is_finished());

        generator.release_host("slow.example.com");
        assert!(slow.await.unwrap().is_ok());
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_regenerated() {
        // 30 seconds of validity left, margin is 60 seconds
        let generator = Arc::new(MockTokenGenerator::new().with_age(Duration::from_secs(870)));
        let cache = cache_with(&generator);
        let id = identity("db.example.com");

        let first = cache.get_token(&id).await.unwrap();
        let second = cache.get_token(&id).await.unwrap();

        assert_eq!(generator.call_count(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().await.misses, 2);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_still_valid_token() {
        let generator = Arc::new(MockTokenGenerator::new().with_age(Duration::from_secs(870)));
        let cache = cache_with(&generator);
        let id = identity("db.example.com");

        let original = cache.get_token(&id).await.unwrap();
        generator.set_failing(true);

        let served = cache.get_token(&id).await.unwrap();
        assert!(Arc::ptr_eq(&original, &served));
        assert_eq!(generator.call_count(), 2);

        let stats = cache.stats().await;
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn test_failure_without_valid_token_is_returned() {
        let generator = Arc::new(MockTokenGenerator::new());
        generator.set_failing(true);
        let cache = cache_with(&generator);

        let err = cache.get_token(&identity("db.example.com")).await.unwrap_err();
        assert_matches!(
            err.as_ref(),
            TokenError::NoCredentials(CredentialError::NoCredentialsFound { .. })
        );
        assert_eq!(cache.stats().await.failures, 1);

        generator.set_failing(false);
        assert!(cache.get_token(&identity("db.example.com")).await.is_ok());
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_token_is_not_used_as_fallback() {
        let generator = Arc::new(MockTokenGenerator::new().with_age(Duration::from_secs(901)));
        let cache = cache_with(&generator);
        let id = identity("db.example.com");

        cache.get_token(&id).await.unwrap();
        generator.set_failing(true);
        assert!(cache.get_token(&id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_share_the_same_failure() {
        let generator = Arc::new(MockTokenGenerator::new().with_delay(Duration::from_millis(100)));
        generator.set_failing(true);
        let cache = Arc::new(cache_with(&generator));
        let id = identity("db.example.com");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let id = id.clone();
                tokio::spawn(async move { cache.get_token(&id).await })
            })
            .collect();

        let mut errors = Vec::new();
        for handle in handles {
            errors.push(handle.await.unwrap().unwrap_err());
        }
        assert_eq!(generator.call_count(), 1);
        assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_waiter_does_not_cancel_generation() {
        let generator = Arc::new(MockTokenGenerator::new().with_delay(Duration::from_millis(200)));
        let cache = Arc::new(cache_with(&generator));
        let id = identity("db.example.com");

        let abandoned = tokio::time::timeout(Duration::from_millis(20), cache.get_token(&id)).await;
        assert!(abandoned.is_err());

        let token = cache.get_token(&id).await.unwrap();
        assert_eq!(generator.call_count(), 1);
        assert_eq!(cache.stats().await.coalesced, 1);
        assert!(cache.get_token(&id).await.is_ok_and(|t| Arc::ptr_eq(&t, &token)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_waiter_after_generation_never_serves_expired_token() {
        let clock = MockClock::at(SystemTime::now());
        let generator = Arc::new(
            MockTokenGenerator::new()
                .with_delay(Duration::from_millis(100))
                .with_clock(clock.clone()),
        );
        let cache = Arc::new(cache_with(&generator).with_time_source(clock.clone()));
        let id = identity("db.example.com");

        let waiter_cache = Arc::clone(&cache);
        let waiter_id = id.clone();
        let waiter = tokio::spawn(async move { waiter_cache.get_token(&waiter_id).await });
        generator.wait_for_calls(1).await;

        // Keep the generation from publishing until its only waiter is gone.
        let slot = cache.slot_for(&id).await;
        let guard = slot.in_flight.lock().await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        drop(guard);

        clock.advance(Duration::from_secs(20 * 60));
        let token = cache.get_token(&id).await.unwrap();
        let now = DateTime::<Utc>::from(clock.now());
        assert!(token.is_fresh_at(now, cache.refresh_margin()));
        assert!(token.value().ends_with("X-Amz-Signature=mock2"));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_generation_publishes_without_waiters() {
        let generator = Arc::new(MockTokenGenerator::new().with_delay(Duration::from_millis(50)));
        let cache = cache_with(&generator);
        let id = identity("db.example.com");

        let abandoned = tokio::time::timeout(Duration::from_millis(5), cache.get_token(&id)).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;

        let slot = cache.slot_for(&id).await;
        assert!(slot.in_flight.lock().await.is_none());
        let stored = slot.current.read().await.clone().unwrap();
        assert!(stored.value().ends_with("X-Amz-Signature=mock1"));

        let served = cache.get_token(&id).await.unwrap();
        assert!(Arc::ptr_eq(&stored, &served));
        assert_eq!(generator.call_count(), 1);
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_generation() {
        let generator = Arc::new(MockTokenGenerator::new());
        let cache = cache_with(&generator);
        let id = identity("db.example.com");

        cache.get_token(&id).await.unwrap();
        cache.invalidate(&id).await;
        cache.get_token(&id).await.unwrap();
        assert_eq!(generator.call_count(), 2);
    }
}
