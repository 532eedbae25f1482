//! Service IP discovery through bootstrap endpoints
//!
//! Bootstrap IPs are reachable without any name resolution. Each is asked
//! for the current service IP list in turn; the fallback domain is only
//! consulted after every IP has failed, since resolving it goes through the
//! very system resolver this library exists to bypass.

use reqwest::header::{HeaderValue, HOST};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::ServiceIpResponse;

/// Fetches the service IP list from bootstrap IPs, then the fallback domain
pub(crate) struct BootstrapFetcher {
    http: reqwest::Client,
    account_id: String,
    scheme: &'static str,
    host_override: Option<HeaderValue>,
    bootstrap_ips: Vec<String>,
    fallback_domain: String,
}

impl BootstrapFetcher {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        let host_override = config
            .enable_https
            .then(|| HeaderValue::from_str(&config.https_sni_host).ok())
            .flatten();

        Self {
            http,
            account_id: config.account_id.clone(),
            scheme: config.scheme(),
            host_override,
            bootstrap_ips: config.bootstrap_ips.clone(),
            fallback_domain: config.bootstrap_domain.clone(),
        }
    }

    /// Fetch a non-empty service IP list
    ///
    /// Tries every bootstrap IP in order, accepting the first HTTP 200 with
    /// a non-empty `service_ip` array. When they all fail and a fallback
    /// domain is configured, that domain gets one last try. Exhausting
    /// every option yields [`Error::BootstrapExhausted`].
    pub async fn fetch(&self) -> Result<Vec<String>> {
        for bootstrap_ip in &self.bootstrap_ips {
            let url = self.service_ip_url(bootstrap_ip);
            match self.fetch_one(&url).await {
                Ok(ips) => {
                    log::debug!("bootstrap {bootstrap_ip} returned {} service IPs", ips.len());
                    return Ok(ips);
                }
                Err(err) => {
                    log::debug!("bootstrap {bootstrap_ip} failed: {err}");
                }
            }
        }

        if !self.fallback_domain.is_empty() {
            let url = self.service_ip_url(&self.fallback_domain);
            match self.fetch_one(&url).await {
                Ok(ips) => {
                    log::debug!(
                        "bootstrap domain {} returned {} service IPs",
                        self.fallback_domain,
                        ips.len()
                    );
                    return Ok(ips);
                }
                Err(err) => {
                    log::debug!("bootstrap domain {} failed: {err}", self.fallback_domain);
                }
            }
        }

        Err(Error::BootstrapExhausted)
    }

    fn service_ip_url(&self, authority: &str) -> String {
        format!("{}://{}/{}/ss", self.scheme, authority, self.account_id)
    }

    async fn fetch_one(&self, url: &str) -> Result<Vec<String>> {
        let mut request = self.http.get(url);
        if let Some(host) = &self.host_override {
            request = request.header(HOST, host.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }

        let payload = response.bytes().await?;
        let parsed: ServiceIpResponse = serde_json::from_slice(&payload)?;
        if parsed.service_ip.is_empty() {
            return Err(Error::NoServiceIps);
        }
        Ok(parsed.service_ip)
    }
}
