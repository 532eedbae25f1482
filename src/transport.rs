//! HTTP execution layer: request URLs and the retry/failover loop
//!
//! Every retry attempt rebuilds the target URL, so consecutive attempts
//! land on different service IPs once earlier ones have been marked failed.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, HOST};

use crate::auth::Signer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::service_ip::ServiceIpManager;
use crate::types::QueryType;

/// Build the shared HTTP client from configuration
pub(crate) fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.timeout)
        .pool_max_idle_per_host(10)
        .build()?;
    Ok(client)
}

/// Issues resolve requests against the service IP pool
pub(crate) struct HttpTransport {
    http: reqwest::Client,
    account_id: String,
    scheme: &'static str,
    /// Host header presented on HTTPS requests, where the URL authority is
    /// a bare service IP
    host_override: Option<HeaderValue>,
    max_retries: u32,
    signer: Option<Signer>,
    service_ips: Arc<ServiceIpManager>,
}

impl HttpTransport {
    pub fn new(
        http: reqwest::Client,
        config: &Config,
        signer: Option<Signer>,
        service_ips: Arc<ServiceIpManager>,
    ) -> Result<Self> {
        let host_override = if config.enable_https {
            let value = HeaderValue::from_str(&config.https_sni_host).map_err(|_| {
                Error::InvalidConfig(format!("invalid https_sni_host {:?}", config.https_sni_host))
            })?;
            Some(value)
        } else {
            None
        };

        Ok(Self {
            http,
            account_id: config.account_id.clone(),
            scheme: config.scheme(),
            host_override,
            max_retries: config.max_retries,
            signer,
            service_ips,
        })
    }

    /// URL for a single-domain resolve against `service_ip`
    ///
    /// Signed configurations use the `sign_d` endpoint with `t` and `s`
    /// parameters; the `ip` parameter is omitted when no client IP is set.
    pub fn build_single_url(
        &self,
        service_ip: &str,
        domain: &str,
        client_ip: &str,
        query_type: QueryType,
    ) -> String {
        let base = format!("{}://{}/{}", self.scheme, service_ip, self.account_id);
        let query = query_type.as_param();

        match &self.signer {
            Some(signer) => {
                let (timestamp, signature) = signer.sign(domain);
                if client_ip.is_empty() {
                    format!("{base}/sign_d?host={domain}&query={query}&t={timestamp}&s={signature}")
                } else {
                    format!(
                        "{base}/sign_d?host={domain}&query={query}&ip={client_ip}&t={timestamp}&s={signature}"
                    )
                }
            }
            None => {
                if client_ip.is_empty() {
                    format!("{base}/d?host={domain}&query={query}")
                } else {
                    format!("{base}/d?host={domain}&query={query}&ip={client_ip}")
                }
            }
        }
    }

    /// URL for a batch resolve; hosts are joined with "," without spaces
    pub fn build_batch_url(&self, service_ip: &str, domains: &[String], client_ip: &str) -> String {
        let base = format!("{}://{}/{}", self.scheme, service_ip, self.account_id);
        let hosts = domains.join(",");

        match &self.signer {
            Some(signer) => {
                let (timestamp, signature) = signer.sign_batch(domains);
                if client_ip.is_empty() {
                    format!("{base}/sign_resolve?host={hosts}&t={timestamp}&s={signature}")
                } else {
                    format!(
                        "{base}/sign_resolve?host={hosts}&ip={client_ip}&t={timestamp}&s={signature}"
                    )
                }
            }
            None => {
                if client_ip.is_empty() {
                    format!("{base}/resolve?host={hosts}")
                } else {
                    format!("{base}/resolve?host={hosts}&ip={client_ip}")
                }
            }
        }
    }

    /// Run `build_url` and issue a GET, retrying `max_retries` extra times
    ///
    /// The URL is rebuilt on every attempt so the builder can pick a fresh
    /// service IP. A non-2xx answer or transport failure marks the URL's
    /// host failed and waits `attempt + 1` seconds before the next try.
    /// When all attempts fail the last error is surfaced wrapped in
    /// [`Error::RequestRetryFailed`].
    pub async fn execute_with_retry<F>(&self, mut build_url: F) -> Result<reqwest::Response>
    where
        F: FnMut() -> Result<String>,
    {
        let attempts = self.max_retries.saturating_add(1);
        let mut last_err: Option<Error> = None;

        for attempt in 0..attempts {
            match build_url() {
                Ok(url) => match self.get(&url).await {
                    Ok(response) if response.status().is_success() => return Ok(response),
                    Ok(response) => {
                        let status = response.status().as_u16();
                        drop(response);
                        log::debug!("service answered HTTP {status} for {url}");
                        self.mark_url_failed(&url);
                        last_err = Some(Error::HttpStatus(status));
                    }
                    Err(err) => {
                        log::debug!("request to {url} failed: {err}");
                        self.mark_url_failed(&url);
                        last_err = Some(err);
                    }
                },
                Err(err) => last_err = Some(err),
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(Duration::from_secs(u64::from(attempt) + 1)).await;
            }
        }

        let cause = last_err.expect("at least one attempt was made");
        Err(Error::RequestRetryFailed(Box::new(cause)))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut request = self.http.get(url);
        if let Some(host) = &self.host_override {
            request = request.header(HOST, host.clone());
        }
        Ok(request.send().await?)
    }

    fn mark_url_failed(&self, url: &str) {
        if let Some(host) = host_component(url) {
            self.service_ips.mark_failed(host);
        }
    }
}

/// Host portion of a URL: everything between the scheme and the first "/"
fn host_component(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    Some(rest.split('/').next().unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn transport(config: &Config) -> HttpTransport {
        let http = build_http_client(config).unwrap();
        let signer = (!config.secret_key.is_empty())
            .then(|| Signer::new(config.secret_key.clone(), config.signature_ttl));
        HttpTransport::new(http, config, signer, Arc::new(ServiceIpManager::new())).unwrap()
    }

    #[test]
    fn test_single_url_unauthenticated() {
        let transport = transport(&Config::new("100000"));
        let url = transport.build_single_url("203.0.113.5", "example.com", "", QueryType::Both);
        assert_eq!(url, "http://203.0.113.5/100000/d?host=example.com&query=4,6");
    }

    #[test]
    fn test_single_url_with_client_ip() {
        let transport = transport(&Config::new("100000"));
        let url = transport.build_single_url("203.0.113.5", "example.com", "198.51.100.1", QueryType::Ipv4);
        assert_eq!(
            url,
            "http://203.0.113.5/100000/d?host=example.com&query=4&ip=198.51.100.1"
        );
    }

    #[test]
    fn test_single_url_signed() {
        let mut config = Config::new("100000");
        config.secret_key = "IAmASecret".into();
        let transport = transport(&config);

        let url = transport.build_single_url("203.0.113.5", "example.com", "", QueryType::Both);
        assert!(url.starts_with("http://203.0.113.5/100000/sign_d?host=example.com&query=4,6&t="));
        let signature = url.rsplit("&s=").next().unwrap();
        assert_eq!(signature.len(), 32);
    }

    #[test]
    fn test_batch_url_joins_hosts_with_comma() {
        let transport = transport(&Config::new("100000"));
        let domains = vec!["a.com".to_string(), "b.com".to_string()];
        let url = transport.build_batch_url("203.0.113.5", &domains, "");
        assert_eq!(url, "http://203.0.113.5/100000/resolve?host=a.com,b.com");
    }

    #[test]
    fn test_batch_url_signed_with_client_ip() {
        let mut config = Config::new("100000");
        config.secret_key = "IAmASecret".into();
        let transport = transport(&config);

        let domains = vec!["a.com".to_string(), "b.com".to_string()];
        let url = transport.build_batch_url("203.0.113.5", &domains, "198.51.100.1");
        assert!(url.starts_with(
            "http://203.0.113.5/100000/sign_resolve?host=a.com,b.com&ip=198.51.100.1&t="
        ));
    }

    #[test]
    fn test_https_scheme_in_urls() {
        let mut config = Config::new("100000");
        config.enable_https = true;
        let transport = transport(&config);
        let url = transport.build_single_url("203.0.113.5", "example.com", "", QueryType::Both);
        assert!(url.starts_with("https://203.0.113.5/"));
    }

    #[test]
    fn test_host_component() {
        assert_eq!(
            host_component("http://203.0.113.5/100000/d?host=a.com"),
            Some("203.0.113.5")
        );
        assert_eq!(
            host_component("https://203.0.113.5:8443/100000/ss"),
            Some("203.0.113.5:8443")
        );
        assert_eq!(host_component("http://203.0.113.5"), Some("203.0.113.5"));
        assert_eq!(host_component("ftp://203.0.113.5/x"), None);
    }
}
