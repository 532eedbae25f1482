//! Service IP pool with failure cool-downs
//!
//! Tracks the rotating pool of HTTPDNS service IPs. A failed IP is skipped
//! for a cool-down window and becomes eligible again afterwards without an
//! explicit un-mark; when every candidate is inside its window the head of
//! the list is retried as a best effort.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// How long a failed IP is skipped before it becomes eligible again
pub(crate) const FAILURE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Pool age beyond which service IPs are considered stale and re-fetched
pub(crate) const POOL_MAX_AGE: Duration = Duration::from_secs(8 * 60 * 60);

#[derive(Debug, Default)]
struct PoolState {
    ips: Vec<String>,
    current: Option<String>,
    /// Last failure instant per IP; entries linger and are checked lazily
    failed: HashMap<String, Instant>,
    last_updated: Option<DateTime<Utc>>,
}

/// Thread-safe service IP pool
///
/// Every operation, including [`pick`](Self::pick), takes the exclusive
/// lock: selection can move the current pointer even on the fast path.
#[derive(Debug)]
pub(crate) struct ServiceIpManager {
    state: Mutex<PoolState>,
    cooldown: Duration,
}

impl ServiceIpManager {
    pub fn new() -> Self {
        Self::with_cooldown(FAILURE_COOLDOWN)
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            cooldown,
        }
    }

    /// Swap in a freshly fetched candidate list
    ///
    /// Clears the current pointer if it no longer appears in the new list.
    pub fn replace(&self, ips: Vec<String>) {
        self.seed(ips, Utc::now());
    }

    /// Install a candidate list with an explicit update instant
    ///
    /// Used when restoring a persisted pool so that staleness is judged
    /// against the original fetch time, not the load time.
    pub fn seed(&self, ips: Vec<String>, updated_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(current) = &state.current {
            if !ips.contains(current) {
                state.current = None;
            }
        }
        state.ips = ips;
        state.last_updated = Some(updated_at);
    }

    /// Select the next service IP to try
    ///
    /// Sticks with the current IP while it is outside the failure window,
    /// otherwise advances to the first eligible candidate. When every
    /// candidate is inside its window the head of the list is returned and
    /// made current, retrying possibly recovered IPs.
    pub fn pick(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.ips.is_empty() {
            return Err(Error::NoServiceIps);
        }

        let now = Instant::now();
        if let Some(current) = &state.current {
            if self.is_eligible(&state.failed, current, now) {
                return Ok(current.clone());
            }
        }

        if let Some(candidate) = state
            .ips
            .iter()
            .find(|ip| self.is_eligible(&state.failed, ip.as_str(), now))
            .cloned()
        {
            state.current = Some(candidate.clone());
            return Ok(candidate);
        }

        let head = state.ips[0].clone();
        state.current = Some(head.clone());
        Ok(head)
    }

    fn is_eligible(&self, failed: &HashMap<String, Instant>, ip: &str, now: Instant) -> bool {
        match failed.get(ip) {
            Some(failed_at) => now.duration_since(*failed_at) > self.cooldown,
            None => true,
        }
    }

    /// Record a failure for `ip`, starting its cool-down window
    pub fn mark_failed(&self, ip: &str) {
        let mut state = self.state.lock().unwrap();
        state.failed.insert(ip.to_string(), Instant::now());
        if state.current.as_deref() == Some(ip) {
            state.current = None;
        }
    }

    /// Copy of the candidate list
    pub fn snapshot(&self) -> Vec<String> {
        self.state.lock().unwrap().ips.clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_updated
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().ips.is_empty()
    }

    /// Check whether the pool is empty or older than `max_age`
    pub fn is_stale(&self, max_age: Duration) -> bool {
        if self.is_empty() {
            return true;
        }
        match self.last_updated() {
            Some(updated_at) => {
                let age = Utc::now().signed_duration_since(updated_at);
                age > chrono::Duration::seconds(max_age.as_secs() as i64)
            }
            None => true,
        }
    }
}
