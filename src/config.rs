//! Client configuration and built-in service defaults

use std::time::Duration;

use crate::error::{Error, Result};

/// Built-in bootstrap IPs (mainland China endpoints), reachable without DNS
pub const DEFAULT_BOOTSTRAP_IPS: &[&str] = &[
    "203.107.1.1",
    "203.107.1.97",
    "203.107.1.100",
    "203.119.238.240",
    "106.11.25.239",
    "59.82.99.47",
];

/// Fallback bootstrap domain, tried after every bootstrap IP has failed
pub const DEFAULT_BOOTSTRAP_DOMAIN: &str = "resolvers-cn.httpdns.aliyuncs.com";

/// Default TLS server name for HTTPS resolves
pub const DEFAULT_HTTPS_SNI_HOST: &str = "resolver-cns.aliyuncs.com";

/// Default per-request HTTP timeout and per-resolve budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default signature validity window
pub const DEFAULT_SIGNATURE_TTL: Duration = Duration::from_secs(30);

/// HTTPDNS client configuration
///
/// Only `account_id` is required. Every other field has a usable default,
/// filled in by [`Config::validate`] when left unset.
///
/// # Example
///
/// ```
/// use alicloud_httpdns::Config;
///
/// let config = Config::new("100000");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Tenant identifier, used as a path segment in every request URL
    pub account_id: String,

    /// Shared secret; when non-empty, all resolves use the signed endpoints
    pub secret_key: String,

    /// Ordered bootstrap IPs used to discover service IPs
    pub bootstrap_ips: Vec<String>,

    /// Last-resort bootstrap domain, resolved through the normal name path
    pub bootstrap_domain: String,

    /// Per-request HTTP timeout, also the default per-resolve budget
    pub timeout: Duration,

    /// Additional attempts after the first; 0 means no retry
    pub max_retries: u32,

    /// Use HTTPS instead of HTTP for every request
    pub enable_https: bool,

    /// TLS server name presented when `enable_https` is set
    pub https_sni_host: String,

    /// Validity window for request signatures
    pub signature_ttl: Duration,

    /// In-memory cache of resolve results
    pub enable_memory_cache: bool,

    /// Persist resolve results and service IPs to the user cache directory
    pub enable_persistent_cache: bool,

    /// Serve expired cache entries while refreshing them in the background
    pub allow_expired_cache: bool,

    /// Grace period past TTL within which persisted entries are still loaded
    pub cache_expire_threshold: Duration,

    /// Collect resolve metrics; a no-op collector is used when disabled
    pub enable_metrics: bool,
}

impl Config {
    /// Create a configuration for the given account with all defaults
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration and fill unset fields with defaults
    ///
    /// An empty `account_id` is the only fatal condition. A zero timeout or
    /// signature TTL and an empty bootstrap list are replaced with the
    /// built-in defaults.
    pub fn validate(&self) -> Result<()> {
        if self.account_id.is_empty() {
            return Err(Error::InvalidConfig("account_id is required".into()));
        }
        Ok(())
    }

    /// Return a copy with unset fields replaced by the built-in defaults
    pub(crate) fn normalized(&self) -> Result<Self> {
        self.validate()?;

        let mut config = self.clone();
        if config.timeout.is_zero() {
            config.timeout = DEFAULT_TIMEOUT;
        }
        if config.signature_ttl.is_zero() {
            config.signature_ttl = DEFAULT_SIGNATURE_TTL;
        }
        if config.bootstrap_ips.is_empty() {
            config.bootstrap_ips = DEFAULT_BOOTSTRAP_IPS.iter().map(|s| s.to_string()).collect();
        }
        if config.bootstrap_domain.is_empty() {
            config.bootstrap_domain = DEFAULT_BOOTSTRAP_DOMAIN.to_string();
        }
        if config.https_sni_host.is_empty() {
            config.https_sni_host = DEFAULT_HTTPS_SNI_HOST.to_string();
        }
        Ok(config)
    }

    /// URL scheme selected by `enable_https`
    pub(crate) fn scheme(&self) -> &'static str {
        if self.enable_https {
            "https"
        } else {
            "http"
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            secret_key: String::new(),
            bootstrap_ips: DEFAULT_BOOTSTRAP_IPS.iter().map(|s| s.to_string()).collect(),
            bootstrap_domain: DEFAULT_BOOTSTRAP_DOMAIN.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: 0,
            enable_https: false,
            https_sni_host: DEFAULT_HTTPS_SNI_HOST.to_string(),
            signature_ttl: DEFAULT_SIGNATURE_TTL,
            enable_memory_cache: true,
            enable_persistent_cache: false,
            allow_expired_cache: false,
            cache_expire_threshold: Duration::ZERO,
            enable_metrics: false,
        }
    }
}
