//! Resolve-result caching with TTL expiry
//!
//! The in-memory tier maps normalized domain keys to entries. An optional
//! disk tier (see [`crate::persist`]) reloads surviving entries at startup
//! and rewrites them in the background as the memory tier changes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::persist::DiskStore;
use crate::types::{parse_ip_strings, ResolveResult, ResolveSource};

/// TTL assigned when a server reports a non-positive one
const FALLBACK_TTL_SECS: i64 = 60;

/// Canonical cache key: trimmed, lowercased, trailing dots removed
pub(crate) fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase().trim_end_matches('.').to_string()
}

/// One cached answer, shared by the memory and disk tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheEntry {
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    pub ttl: i64,
    pub query_time: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(ipv4: Vec<String>, ipv6: Vec<String>, ttl: i64, query_time: DateTime<Utc>) -> Self {
        Self {
            ipv4,
            ipv6,
            ttl,
            query_time,
        }
    }

    /// An entry expires once `now` passes `query_time + ttl`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.query_time.checked_add_signed(TimeDelta::seconds(self.ttl)) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Disk entries get a grace period past TTL before they are dropped
    pub fn is_persist_expired_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let grace = TimeDelta::seconds(self.ttl) + TimeDelta::seconds(threshold.as_secs() as i64);
        match self.query_time.checked_add_signed(grace) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    /// Convert to a caller-facing result, dropping malformed addresses
    pub fn to_result(&self, domain: &str, client_ip: &str) -> ResolveResult {
        ResolveResult {
            domain: domain.to_string(),
            client_ip: client_ip.to_string(),
            ipv4: parse_ip_strings(&self.ipv4),
            ipv6: parse_ip_strings(&self.ipv6),
            ttl: Duration::from_secs(self.ttl.max(0) as u64),
            source: ResolveSource::HttpDns,
            timestamp: self.query_time,
        }
    }
}

/// Two-tier cache of resolve results
pub(crate) struct CacheManager {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    enabled: bool,
    allow_expired: bool,
    threshold: Duration,
    disk: Option<Arc<DiskStore>>,
}

impl CacheManager {
    /// Build the cache from configuration
    ///
    /// A disk tier that fails to open is logged and disabled; the memory
    /// tier keeps working.
    pub fn new(config: &Config) -> Self {
        let disk = if config.enable_persistent_cache {
            match DiskStore::open(&config.account_id) {
                Ok(store) => Some(Arc::new(store)),
                Err(err) => {
                    log::warn!("persistent cache disabled, cannot open cache directory: {err}");
                    None
                }
            }
        } else {
            None
        };

        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            enabled: config.enable_memory_cache,
            allow_expired: config.allow_expired_cache,
            threshold: config.cache_expire_threshold,
            disk,
        }
    }

    /// Look up a domain
    ///
    /// Returns `(entry, hit, needs_refresh)`. A stale entry is only handed
    /// back, with `needs_refresh` set, when expired answers are allowed.
    pub fn get(&self, domain: &str) -> (Option<CacheEntry>, bool, bool) {
        if !self.enabled {
            return (None, false, false);
        }

        let key = normalize_domain(domain);
        let entry = match self.entries.read().unwrap().get(&key) {
            Some(entry) => entry.clone(),
            None => return (None, false, false),
        };

        if entry.is_expired() {
            if self.allow_expired {
                return (Some(entry), true, true);
            }
            return (None, false, false);
        }

        (Some(entry), true, false)
    }

    /// Insert an entry under the normalized key, replacing any prior one
    ///
    /// A non-positive TTL is replaced with 60 seconds.
    pub fn set(&self, domain: &str, mut entry: CacheEntry) {
        if !self.enabled {
            return;
        }

        if entry.ttl <= 0 {
            log::warn!(
                "invalid TTL {} for domain {domain}, using {FALLBACK_TTL_SECS}s",
                entry.ttl
            );
            entry.ttl = FALLBACK_TTL_SECS;
        }

        let key = normalize_domain(domain);
        self.entries.write().unwrap().insert(key, entry);
    }

    /// Load persisted entries into memory, dropping the ones past their
    /// grace period; schedules a rewrite when anything was dropped
    pub fn load_from_disk(&self) {
        let Some(disk) = &self.disk else { return };

        let (records, dropped) = disk.load_resolve_cache(self.threshold);
        let loaded = records.len();
        if loaded > 0 {
            self.entries.write().unwrap().extend(records);
        }
        if dropped > 0 {
            log::info!("loaded {loaded} cached records, dropping {dropped} expired ones from disk");
            disk.schedule_resolve_save(&self.entries);
        }
    }

    /// Queue a background save of the resolve cache
    pub fn schedule_persist(&self) {
        if let Some(disk) = &self.disk {
            disk.schedule_resolve_save(&self.entries);
        }
    }

    /// Load the persisted service IP pool, if present and younger than 24h
    pub fn load_service_ips(&self) -> Option<(Vec<String>, DateTime<Utc>)> {
        self.disk.as_ref()?.load_service_ips()
    }

    /// Queue a background save of the service IP pool
    pub fn persist_service_ips(&self, ips: Vec<String>) {
        if let Some(disk) = &self.disk {
            disk.save_service_ips(ips);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}
