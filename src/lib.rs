//! alicloud-httpdns - HTTPDNS client library
//!
//! Resolves domain names by querying an HTTPDNS service over plain HTTP(S)
//! instead of the DNS wire protocol, bypassing local recursive resolvers to
//! obtain authoritative, client-IP-aware answers with TTL semantics.
//!
//! Features:
//! - Three-tier IP discovery: bootstrap IPs, then service IPs, with
//!   per-request selection and failure cool-downs
//! - Two-tier caching (in-memory plus optional disk persistence) with TTL,
//!   grace periods, and stale-while-revalidate under a single-flight lock
//! - Retry with failover: every attempt rebuilds the URL against a fresh
//!   service IP
//! - Optional MD5-signed resolves for authenticated accounts
//!
//! # Example
//!
//! ```no_run
//! use alicloud_httpdns::{Config, HttpDnsClient, ResolveOptions};
//!
//! # async fn example() -> alicloud_httpdns::Result<()> {
//! let client = HttpDnsClient::new(Config::new("your-account-id"))?;
//!
//! let result = client.resolve("www.aliyun.com", ResolveOptions::default()).await?;
//! for ip in &result.ipv4 {
//!     println!("{ip}");
//! }
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod auth;
mod bootstrap;
mod cache;
mod client;
mod config;
pub mod error;
mod metrics;
mod persist;
mod resolver;
mod service_ip;
mod transport;
mod types;

pub use client::HttpDnsClient;
pub use config::{
    Config, DEFAULT_BOOTSTRAP_DOMAIN, DEFAULT_BOOTSTRAP_IPS, DEFAULT_HTTPS_SNI_HOST,
    DEFAULT_SIGNATURE_TTL, DEFAULT_TIMEOUT,
};
pub use error::{Error, Result};
pub use metrics::MetricsStats;
pub use types::{QueryType, ResolveOptions, ResolveResult, ResolveSource};
