//! Resolve options, results, and wire-format types

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Which address families to request from the server
///
/// Rendered as the `query` URL parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    /// IPv4 only
    Ipv4,
    /// IPv6 only
    Ipv6,
    /// Both IPv4 and IPv6 (default)
    #[default]
    Both,
}

impl QueryType {
    /// Wire form of the `query` parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            QueryType::Ipv4 => "4",
            QueryType::Ipv6 => "6",
            QueryType::Both => "4,6",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_param())
    }
}

/// Per-resolve options
///
/// ```
/// use std::time::Duration;
/// use alicloud_httpdns::{QueryType, ResolveOptions};
///
/// let options = ResolveOptions::default()
///     .with_query_type(QueryType::Ipv4)
///     .with_client_ip("203.0.113.9")
///     .with_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Address families to request
    pub query_type: QueryType,
    /// Client IP hint forwarded to the server; omitted from the URL when empty
    pub client_ip: String,
    /// Per-resolve budget; the configured timeout applies when unset
    pub timeout: Option<Duration>,
}

impl ResolveOptions {
    /// Set the address families to request
    pub fn with_query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = query_type;
        self
    }

    /// Set the client IP hint
    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = client_ip.into();
        self
    }

    /// Override the per-resolve budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Where a resolve result came from
///
/// Only HTTPDNS today; reserved for future expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveSource {
    HttpDns,
}

impl std::fmt::Display for ResolveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveSource::HttpDns => write!(f, "HTTPDNS"),
        }
    }
}

/// The outcome of a resolve, as handed to the caller
#[derive(Debug, Clone)]
pub struct ResolveResult {
    /// Domain exactly as supplied by the caller
    pub domain: String,
    /// Client IP hint that accompanied the request
    pub client_ip: String,
    /// Parsed IPv4 addresses
    pub ipv4: Vec<IpAddr>,
    /// Parsed IPv6 addresses
    pub ipv6: Vec<IpAddr>,
    /// Time-to-live reported by the server
    pub ttl: Duration,
    /// Answer origin
    pub source: ResolveSource,
    /// When the answer was produced
    pub timestamp: DateTime<Utc>,
}

impl ResolveResult {
    /// Check whether the result carries no addresses at all
    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }
}

/// Single-resolve response body
///
/// Unknown fields (including any `type` discriminator) are ignored; IPv4
/// addresses arrive in `ips`, IPv6 in `ipsv6`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DnsResponse {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub ipsv6: Vec<String>,
    #[serde(default)]
    pub ttl: i64,
}

/// Batch-resolve response body
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchDnsResponse {
    #[serde(default)]
    pub dns: Vec<DnsResponse>,
}

/// Bootstrap `/ss` response body
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ServiceIpResponse {
    #[serde(default)]
    pub service_ip: Vec<String>,
}

/// Parse IP address strings, silently dropping malformed entries
pub(crate) fn parse_ip_strings(raw: &[String]) -> Vec<IpAddr> {
    raw.iter().filter_map(|s| s.parse().ok()).collect()
}
