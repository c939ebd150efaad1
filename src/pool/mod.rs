//! Credential pool with per-credential health tracking
//!
//! Backend mode draws upstream credentials from a server-held pool. Each
//! credential carries a health state and a cooldown; the orchestrator
//! reports call outcomes back and the pool decides what is eligible for
//! the next request. The eligibility check and hand-out happen under one
//! lock so concurrent requests can never receive a credential that is
//! still cooling down.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::PoolConfig;

/// Health state of a pooled credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialHealth {
    Healthy,
    RateLimited,
    AuthRejected,
    Exhausted,
}

/// Failure classes the orchestrator reports back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimit,
    AuthError,
    Other,
}

/// A credential handed out for one attempt
#[derive(Debug, Clone)]
pub struct Credential {
    pub secret: String,
    pub provider: String,
}

#[derive(Debug)]
struct CredentialRecord {
    secret: String,
    health: CredentialHealth,
    cooldown_until: Option<Instant>,
    consecutive_failures: u32,
}

impl CredentialRecord {
    fn new(secret: String) -> Self {
        Self {
            secret,
            health: CredentialHealth::Healthy,
            cooldown_until: None,
            consecutive_failures: 0,
        }
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(true, |until| now >= until)
    }
}

#[derive(Debug, Default)]
struct ProviderPool {
    records: Vec<CredentialRecord>,
    cursor: usize,
}

/// Process-wide credential pool, shared across concurrent requests
pub struct CredentialPool {
    pools: DashMap<String, Mutex<ProviderPool>>,
    config: PoolConfig,
}

impl CredentialPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pools: DashMap::new(),
            config,
        }
    }

    /// Add credentials for a provider. Secrets already present are kept
    /// with their current health rather than re-added.
    pub fn add_credentials(&self, provider: &str, secrets: impl IntoIterator<Item = String>) {
        let pool = self
            .pools
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(ProviderPool::default()));
        let mut pool = pool.lock();
        for secret in secrets {
            if pool.records.iter().any(|r| r.secret == secret) {
                continue;
            }
            pool.records.push(CredentialRecord::new(secret));
        }
    }

    /// Select the next eligible credential for a provider, round-robin
    /// among healthy ones. A credential whose cooldown has elapsed reverts
    /// to healthy on selection. Returns None when nothing is eligible.
    pub fn next_available(&self, provider: &str) -> Option<Credential> {
        let pool = self.pools.get(provider)?;
        let mut pool = pool.lock();
        let len = pool.records.len();
        if len == 0 {
            return None;
        }

        let now = Instant::now();
        let start = pool.cursor;

        for offset in 0..len {
            let idx = (start + offset) % len;
            let record = &mut pool.records[idx];

            let eligible = match record.health {
                CredentialHealth::Healthy => true,
                _ => record.cooldown_elapsed(now),
            };

            if eligible {
                if record.health != CredentialHealth::Healthy {
                    debug!(
                        provider = %provider,
                        "Credential cooldown elapsed, reverting to healthy"
                    );
                    record.health = CredentialHealth::Healthy;
                    record.cooldown_until = None;
                }
                let secret = record.secret.clone();
                pool.cursor = (idx + 1) % len;
                return Some(Credential {
                    secret,
                    provider: provider.to_string(),
                });
            }
        }

        None
    }

    /// Reset a credential to healthy after a successful call
    pub fn report_success(&self, provider: &str, secret: &str) {
        self.with_record(provider, secret, |record| {
            record.health = CredentialHealth::Healthy;
            record.cooldown_until = None;
            record.consecutive_failures = 0;
        });
    }

    /// Apply a classified failure to a credential. Repeating the same
    /// report keeps the credential in the same health state; it only
    /// restarts the cooldown window.
    pub fn report_failure(&self, provider: &str, secret: &str, kind: FailureKind) {
        let config = self.config.clone();
        self.with_record(provider, secret, |record| {
            let now = Instant::now();
            match kind {
                FailureKind::RateLimit => {
                    record.health = CredentialHealth::RateLimited;
                    record.cooldown_until = Some(now + config.rate_limit_cooldown());
                }
                FailureKind::AuthError => {
                    // Rejected credentials are more likely genuinely broken
                    record.health = CredentialHealth::AuthRejected;
                    record.cooldown_until = Some(now + config.auth_cooldown());
                }
                FailureKind::Other => {
                    record.consecutive_failures += 1;
                    if record.consecutive_failures >= config.failure_threshold {
                        record.health = CredentialHealth::Exhausted;
                        record.cooldown_until = Some(now + config.exhausted_cooldown());
                    }
                }
            }
            debug!(
                provider = %provider,
                health = ?record.health,
                failures = record.consecutive_failures,
                "Recorded credential failure"
            );
        });
    }

    /// (total, healthy, cooling) for a provider
    pub fn health_summary(&self, provider: &str) -> (usize, usize, usize) {
        let Some(pool) = self.pools.get(provider) else {
            return (0, 0, 0);
        };
        let pool = pool.lock();
        let now = Instant::now();
        let total = pool.records.len();
        let healthy = pool
            .records
            .iter()
            .filter(|r| r.health == CredentialHealth::Healthy || r.cooldown_elapsed(now))
            .count();
        (total, healthy, total - healthy)
    }

    /// Whether any credentials are configured for a provider
    pub fn has_credentials(&self, provider: &str) -> bool {
        self.pools
            .get(provider)
            .map(|p| !p.lock().records.is_empty())
            .unwrap_or(false)
    }

    fn with_record<F: FnOnce(&mut CredentialRecord)>(&self, provider: &str, secret: &str, f: F) {
        let Some(pool) = self.pools.get(provider) else {
            warn!(provider = %provider, "Report for unknown provider pool");
            return;
        };
        let mut pool = pool.lock();
        match pool.records.iter_mut().find(|r| r.secret == secret) {
            Some(record) => f(record),
            None => warn!(provider = %provider, "Report for unknown credential"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> PoolConfig {
        PoolConfig {
            rate_limit_cooldown_secs: 0,
            auth_cooldown_secs: 0,
            exhausted_cooldown_secs: 0,
            failure_threshold: 3,
            max_attempts: 3,
        }
    }

    fn pool_with(config: PoolConfig, secrets: &[&str]) -> CredentialPool {
        let pool = CredentialPool::new(config);
        pool.add_credentials("prov", secrets.iter().map(|s| s.to_string()));
        pool
    }

    #[test]
    fn test_round_robin_selection() {
        let pool = pool_with(test_config(), &["k1", "k2", "k3"]);
        let picks: Vec<String> = (0..4)
            .map(|_| pool.next_available("prov").unwrap().secret)
            .collect();
        assert_eq!(picks, vec!["k1", "k2", "k3", "k1"]);
    }

    #[test]
    fn test_rate_limited_excluded_until_cooldown() {
        let mut config = test_config();
        config.rate_limit_cooldown_secs = 3600;
        let pool = pool_with(config, &["k1", "k2"]);

        pool.report_failure("prov", "k1", FailureKind::RateLimit);
        for _ in 0..3 {
            assert_eq!(pool.next_available("prov").unwrap().secret, "k2");
        }
    }

    #[test]
    fn test_elapsed_cooldown_reverts_to_healthy() {
        // Zero-length cooldown elapses immediately
        let pool = pool_with(test_config(), &["k1"]);
        pool.report_failure("prov", "k1", FailureKind::RateLimit);
        std::thread::sleep(Duration::from_millis(5));
        let credential = pool.next_available("prov").unwrap();
        assert_eq!(credential.secret, "k1");
        let (_, healthy, _) = pool.health_summary("prov");
        assert_eq!(healthy, 1);
    }

    #[test]
    fn test_all_rejected_yields_none() {
        let mut config = test_config();
        config.auth_cooldown_secs = 3600;
        let pool = pool_with(config, &["k1", "k2"]);
        pool.report_failure("prov", "k1", FailureKind::AuthError);
        pool.report_failure("prov", "k2", FailureKind::AuthError);
        assert!(pool.next_available("prov").is_none());
    }

    #[test]
    fn test_other_failures_exhaust_past_threshold() {
        let mut config = test_config();
        config.exhausted_cooldown_secs = 3600;
        let pool = pool_with(config, &["k1"]);

        pool.report_failure("prov", "k1", FailureKind::Other);
        pool.report_failure("prov", "k1", FailureKind::Other);
        assert!(pool.next_available("prov").is_some());

        pool.report_failure("prov", "k1", FailureKind::Other);
        assert!(pool.next_available("prov").is_none());
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let mut config = test_config();
        config.exhausted_cooldown_secs = 3600;
        let pool = pool_with(config, &["k1"]);

        pool.report_failure("prov", "k1", FailureKind::Other);
        pool.report_failure("prov", "k1", FailureKind::Other);
        pool.report_success("prov", "k1");
        pool.report_failure("prov", "k1", FailureKind::Other);
        // Counter restarted, so still below threshold
        assert!(pool.next_available("prov").is_some());
    }

    #[test]
    fn test_duplicate_add_keeps_existing_record() {
        let mut config = test_config();
        config.auth_cooldown_secs = 3600;
        let pool = pool_with(config, &["k1"]);
        pool.report_failure("prov", "k1", FailureKind::AuthError);
        pool.add_credentials("prov", vec!["k1".to_string()]);
        assert!(pool.next_available("prov").is_none());
    }

    #[test]
    fn test_unknown_provider_is_empty() {
        let pool = CredentialPool::new(test_config());
        assert!(pool.next_available("nope").is_none());
        assert!(!pool.has_credentials("nope"));
        assert_eq!(pool.health_summary("nope"), (0, 0, 0));
    }
}
