//! Proxy pool with per-site reservation, release and ban.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::ProxyConfig;
use super::format::format_proxy;
use super::types::{Ban, BanLevel, ProxyError, ProxyLease, ProxyRecord, ProxySummary, SiteKey};
use crate::metrics::{PROXY_BANS, PROXY_RESERVATIONS};

/// Pool of proxies shared by every runner.
///
/// Records are kept in iteration order; a granted reservation moves the
/// record to the back so consecutive reservations rotate through the pool.
/// Every mutation happens under one write lock, which makes reserve,
/// release and ban atomic per record.
pub struct ProxyPool {
    config: ProxyConfig,
    records: RwLock<Vec<ProxyRecord>>,
}

impl std::fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyPool")
            .field("config", &self.config)
            .field("records", &"<records>")
            .finish()
    }
}

impl ProxyPool {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Normalize a raw proxy string. See [`format_proxy`].
    pub fn format(raw: &str) -> Option<String> {
        format_proxy(raw)
    }

    fn content_hash(raw: &str) -> String {
        format!("{:x}", Sha256::digest(raw.trim().as_bytes()))
    }

    /// Register a proxy and return its id.
    ///
    /// Registering the same raw string twice returns the existing id.
    pub async fn register(&self, raw: &str) -> Result<String, ProxyError> {
        let url = format_proxy(raw).ok_or_else(|| ProxyError::Invalid(raw.to_string()))?;
        let hash = Self::content_hash(raw);

        let mut records = self.records.write().await;
        if let Some(existing) = records.iter().find(|r| r.hash == hash) {
            debug!("Proxy {} already registered", existing.id);
            return Ok(existing.id.clone());
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        records.push(ProxyRecord {
            id: id.clone(),
            hash,
            raw: raw.trim().to_string(),
            url,
            in_use: HashMap::new(),
            bans: HashMap::new(),
        });
        info!("Registered proxy {} ({} total)", id, records.len());
        Ok(id)
    }

    /// Register many proxies, skipping and logging invalid entries.
    pub async fn register_all<S: AsRef<str>>(&self, raws: &[S]) -> usize {
        let mut registered = 0;
        for raw in raws {
            match self.register(raw.as_ref()).await {
                Ok(_) => registered += 1,
                Err(e) => warn!("Skipping proxy: {}", e),
            }
        }
        registered
    }

    /// Remove a proxy by its raw string.
    ///
    /// Leases already handed out stay valid for their holders; releasing
    /// them later is a no-op.
    pub async fn deregister(&self, raw: &str) -> Option<ProxyLease> {
        let hash = Self::content_hash(raw);
        let mut records = self.records.write().await;
        let index = records.iter().position(|r| r.hash == hash)?;
        let record = records.remove(index);
        info!("Deregistered proxy {}", record.id);
        Some(record.lease())
    }

    /// Reserve a proxy for `(site, platform)`.
    ///
    /// With `wait` unset a miss returns `None` immediately. Otherwise the
    /// configured number of retries is spent, one retry interval apart.
    pub async fn reserve(
        &self,
        holder: &str,
        site: &str,
        platform: &str,
        wait: bool,
    ) -> Option<ProxyLease> {
        self.reserve_with_retries(holder, site, platform, wait, self.config.max_retries)
            .await
    }

    /// [`reserve`](Self::reserve) with an explicit retry ceiling.
    pub async fn reserve_with_retries(
        &self,
        holder: &str,
        site: &str,
        platform: &str,
        wait: bool,
        max_retries: u32,
    ) -> Option<ProxyLease> {
        let key = SiteKey::new(site, platform);
        let mut retries = max_retries;

        loop {
            if let Some(lease) = self.try_reserve(holder, &key).await {
                PROXY_RESERVATIONS.with_label_values(&["granted"]).inc();
                return Some(lease);
            }

            if !wait || retries == 0 {
                PROXY_RESERVATIONS.with_label_values(&["exhausted"]).inc();
                debug!("No proxy available for {} ({})", holder, key);
                return None;
            }

            retries -= 1;
            tokio::time::sleep(self.config.retry_interval()).await;
        }
    }

    async fn try_reserve(&self, holder: &str, key: &SiteKey) -> Option<ProxyLease> {
        let soft_ttl = self.config.soft_ban_ttl();
        let mut records = self.records.write().await;

        let index = records.iter_mut().position(|record| {
            record.expire_bans(soft_ttl);
            record.is_available(key)
        })?;

        let mut record = records.remove(index);
        record.in_use.insert(key.clone(), holder.to_string());
        let lease = record.lease();
        records.push(record);

        debug!("Reserved proxy {} for {} ({})", lease.id, holder, key);
        Some(lease)
    }

    /// Clear the in-use flag of `proxy_id` for `(site, platform)`.
    pub async fn release(&self, holder: &str, site: &str, platform: &str, proxy_id: &str) {
        let key = SiteKey::new(site, platform);
        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|r| r.id == proxy_id) {
            record.in_use.remove(&key);
            debug!("Released proxy {} from {} ({})", proxy_id, holder, key);
        }
    }

    /// Ban `proxy_id` for `(site, platform)` and release it.
    ///
    /// `BanLevel::None` lifts an existing ban.
    pub async fn ban(
        &self,
        holder: &str,
        site: &str,
        platform: &str,
        proxy_id: &str,
        level: BanLevel,
    ) {
        let key = SiteKey::new(site, platform);
        let mut records = self.records.write().await;
        let Some(record) = records.iter_mut().find(|r| r.id == proxy_id) else {
            return;
        };

        record.in_use.remove(&key);
        if level == BanLevel::None {
            record.bans.remove(&key);
            return;
        }

        record.bans.insert(
            key.clone(),
            Ban {
                level,
                since: Instant::now(),
            },
        );
        PROXY_BANS.with_label_values(&[level.as_str()]).inc();
        info!(
            "Banned proxy {} for {} at level {} (by {})",
            proxy_id,
            key,
            level.as_str(),
            holder
        );
    }

    /// Swap `old_proxy_id` for a fresh proxy.
    ///
    /// The replacement is reserved before the old proxy is touched. When no
    /// replacement exists the old reservation is left as it is and `None` is
    /// returned, so the caller can retry with the same ban level.
    pub async fn swap(
        &self,
        holder: &str,
        old_proxy_id: Option<&str>,
        site: &str,
        platform: &str,
        ban: BanLevel,
    ) -> Option<ProxyLease> {
        let replacement = self.reserve(holder, site, platform, false).await?;

        if let Some(old) = old_proxy_id {
            if ban > BanLevel::None {
                self.ban(holder, site, platform, old, ban).await;
            } else {
                self.release(holder, site, platform, old).await;
            }
        }

        Some(replacement)
    }

    /// Current lease view of a registered proxy.
    pub async fn lease(&self, proxy_id: &str) -> Option<ProxyLease> {
        let records = self.records.read().await;
        records.iter().find(|r| r.id == proxy_id).map(|r| r.lease())
    }

    /// Current ban level of a proxy for `(site, platform)`.
    pub async fn ban_level(&self, proxy_id: &str, site: &str, platform: &str) -> BanLevel {
        let key = SiteKey::new(site, platform);
        let records = self.records.read().await;
        records
            .iter()
            .find(|r| r.id == proxy_id)
            .map(|r| r.ban_level(&key))
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Summaries in current iteration order.
    pub async fn summaries(&self) -> Vec<ProxySummary> {
        let records = self.records.read().await;
        records.iter().map(ProxySummary::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn pool() -> ProxyPool {
        ProxyPool::new(ProxyConfig {
            retry_interval_ms: 100,
            max_retries: 3,
            soft_ban_ttl_ms: 1_000,
            ..Default::default()
        })
    }

    async fn pool_with(n: usize) -> (ProxyPool, Vec<String>) {
        let pool = pool();
        let mut ids = Vec::new();
        for i in 0..n {
            ids.push(pool.register(&format!("10.0.0.{}:8080", i + 1)).await.unwrap());
        }
        (pool, ids)
    }

    #[tokio::test]
    async fn test_register_dedups_by_content() {
        let pool = pool();
        let a = pool.register("10.0.0.1:8080").await.unwrap();
        let b = pool.register(" 10.0.0.1:8080 ").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid() {
        let pool = pool();
        assert!(matches!(
            pool.register("localhost:8080").await,
            Err(ProxyError::Invalid(_))
        ));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_reserve_release_scenario() {
        let (pool, ids) = pool_with(2).await;

        let a = pool.reserve("taskA", "site1", "shopify", false).await.unwrap();
        let b = pool.reserve("taskB", "site1", "shopify", false).await.unwrap();
        assert_eq!(a.id, ids[0]);
        assert_eq!(b.id, ids[1]);
        assert!(pool.reserve("taskC", "site1", "shopify", false).await.is_none());

        pool.release("taskA", "site1", "shopify", &a.id).await;
        let c = pool.reserve("taskC", "site1", "shopify", false).await.unwrap();
        assert_eq!(c.id, a.id);
    }

    #[tokio::test]
    async fn test_reservation_is_per_site() {
        let (pool, _) = pool_with(1).await;
        let a = pool.reserve("t1", "site1", "shopify", false).await.unwrap();
        let b = pool.reserve("t2", "site2", "shopify", false).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_ban_is_scoped_to_site() {
        let (pool, ids) = pool_with(1).await;
        let lease = pool.reserve("t1", "siteA", "shopify", false).await.unwrap();
        pool.ban("t1", "siteA", "shopify", &lease.id, BanLevel::Hard).await;

        assert!(pool.reserve("t1", "siteA", "shopify", false).await.is_none());
        let other = pool.reserve("t2", "siteB", "shopify", false).await.unwrap();
        assert_eq!(other.id, ids[0]);
        assert_eq!(pool.ban_level(&ids[0], "siteA", "shopify").await, BanLevel::Hard);
        assert_eq!(pool.ban_level(&ids[0], "siteB", "shopify").await, BanLevel::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_ban_expires_hard_ban_does_not() {
        let (pool, ids) = pool_with(2).await;
        pool.ban("t", "s", "p", &ids[0], BanLevel::Soft).await;
        pool.ban("t", "s", "p", &ids[1], BanLevel::Hard).await;
        assert!(pool.reserve("t", "s", "p", false).await.is_none());

        tokio::time::advance(Duration::from_millis(1_001)).await;
        let lease = pool.reserve("t", "s", "p", false).await.unwrap();
        assert_eq!(lease.id, ids[0]);
        assert!(pool.reserve("t2", "s", "p", false).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_retries() {
        let (pool, _) = pool_with(1).await;
        pool.reserve("a", "s", "p", false).await.unwrap();

        let start = Instant::now();
        assert!(pool.reserve("b", "s", "p", true).await.is_none());
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_succeeds_when_released_meanwhile() {
        let (pool, _) = pool_with(1).await;
        let pool = Arc::new(pool);
        let held = pool.reserve("a", "s", "p", false).await.unwrap();

        let releaser = Arc::clone(&pool);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            releaser.release("a", "s", "p", &held.id).await;
        });

        assert!(pool.reserve("b", "s", "p", true).await.is_some());
    }

    #[tokio::test]
    async fn test_swap_bans_old_and_returns_new() {
        let (pool, ids) = pool_with(2).await;
        let old = pool.reserve("t", "s", "p", false).await.unwrap();
        let new = pool
            .swap("t", Some(&old.id), "s", "p", BanLevel::Hard)
            .await
            .unwrap();
        assert_ne!(new.id, old.id);
        assert_eq!(new.id, ids[1]);
        assert_eq!(pool.ban_level(&old.id, "s", "p").await, BanLevel::Hard);
    }

    #[tokio::test]
    async fn test_swap_without_replacement_keeps_old() {
        let (pool, _) = pool_with(1).await;
        let old = pool.reserve("t", "s", "p", false).await.unwrap();
        assert!(pool
            .swap("t", Some(&old.id), "s", "p", BanLevel::Soft)
            .await
            .is_none());
        assert_eq!(pool.ban_level(&old.id, "s", "p").await, BanLevel::None);
        // Still held.
        assert!(pool.reserve("x", "s", "p", false).await.is_none());
    }

    #[tokio::test]
    async fn test_release_unknown_is_noop() {
        let (pool, _) = pool_with(1).await;
        pool.release("t", "s", "p", "does-not-exist").await;
        pool.ban("t", "s", "p", "does-not-exist", BanLevel::Hard).await;
        assert!(pool.reserve("t", "s", "p", false).await.is_some());
    }

    #[tokio::test]
    async fn test_deregister_keeps_granted_lease_usable() {
        let (pool, _) = pool_with(1).await;
        let lease = pool.reserve("t", "s", "p", false).await.unwrap();
        let removed = pool.deregister("10.0.0.1:8080").await.unwrap();
        assert_eq!(removed.id, lease.id);
        assert!(pool.is_empty().await);
        pool.release("t", "s", "p", &lease.id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_share_a_proxy() {
        let (pool, _) = pool_with(5).await;
        let pool = Arc::new(pool);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    pool.reserve(&format!("task{}", i), "site1", "shopify", false)
                        .await
                })
            })
            .collect();

        let mut granted = Vec::new();
        for handle in handles {
            if let Some(lease) = handle.await.unwrap() {
                granted.push(lease.id);
            }
        }

        let unique: HashSet<_> = granted.iter().collect();
        assert_eq!(granted.len(), 5);
        assert_eq!(unique.len(), 5);
    }

    #[tokio::test]
    async fn test_reservation_rotates_through_pool() {
        let (pool, ids) = pool_with(3).await;
        let first = pool.reserve("t", "a", "p", false).await.unwrap();
        pool.release("t", "a", "p", &first.id).await;
        let second = pool.reserve("t", "a", "p", false).await.unwrap();
        assert_eq!(first.id, ids[0]);
        assert_eq!(second.id, ids[1]);
    }
}
