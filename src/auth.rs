//! Request signing for authenticated resolves
//!
//! A signature covers the host (or comma-joined host list), the shared
//! secret, and an expiry timestamp. The server accepts the request as long
//! as its clock has not passed the timestamp.

use std::time::Duration;

use chrono::Utc;

/// Produces `(timestamp, signature)` pairs for signed endpoints
#[derive(Debug, Clone)]
pub(crate) struct Signer {
    secret: String,
    ttl: Duration,
}

impl Signer {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    /// Sign a single-resolve request for `host`
    pub fn sign(&self, host: &str) -> (String, String) {
        let timestamp = self.expire_timestamp();
        let signature = compute_signature(host, &self.secret, &timestamp);
        (timestamp, signature)
    }

    /// Sign a batch-resolve request
    ///
    /// Hosts are joined with "," in the order supplied by the caller; the
    /// order is part of the signed material.
    pub fn sign_batch(&self, hosts: &[String]) -> (String, String) {
        let joined = hosts.join(",");
        let timestamp = self.expire_timestamp();
        let signature = compute_signature(&joined, &self.secret, &timestamp);
        (timestamp, signature)
    }

    /// Expiry instant as decimal Unix seconds
    fn expire_timestamp(&self) -> String {
        let expire_at = Utc::now() + chrono::Duration::seconds(self.ttl.as_secs() as i64);
        expire_at.timestamp().to_string()
    }
}

/// Canonical string is `<host>-<secret>-<timestamp>`, digested with MD5
fn compute_signature(host: &str, secret: &str, timestamp: &str) -> String {
    let canonical = format!("{host}-{secret}-{timestamp}");
    format!("{:x}", md5::compute(canonical.as_bytes()))
}
