//! Resolve orchestration
//!
//! Ties the cache, service IP pool, bootstrap fetcher, and HTTP layer
//! together: consult the cache, fetch over HTTP on a miss, publish the
//! answer back to the cache, and keep stale answers flowing while a
//! single-flight background refresh replaces them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::auth::Signer;
use crate::bootstrap::BootstrapFetcher;
use crate::cache::{normalize_domain, CacheEntry, CacheManager};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::{self, MetricsCollector, MetricsStats};
use crate::service_ip::{ServiceIpManager, POOL_MAX_AGE};
use crate::transport::{build_http_client, HttpTransport};
use crate::types::{
    parse_ip_strings, BatchDnsResponse, DnsResponse, ResolveOptions, ResolveResult, ResolveSource,
};

/// Upper bound on domains per batch request
const MAX_BATCH_DOMAINS: usize = 5;

/// Longest accepted host name, in bytes
const MAX_DOMAIN_LEN: usize = 253;

/// Reject empty and over-length host names; everything else is validated
/// server-side
fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(Error::InvalidDomain);
    }
    Ok(())
}

pub(crate) struct Resolver {
    config: Config,
    transport: HttpTransport,
    service_ips: Arc<ServiceIpManager>,
    bootstrap: BootstrapFetcher,
    cache: CacheManager,
    metrics: Arc<dyn MetricsCollector>,
    /// Domains with an in-flight background refresh
    refreshing: Mutex<HashSet<String>>,
}

impl Resolver {
    /// Build the resolver and, when the disk tier is enabled, warm the
    /// cache and service IP pool from persisted state
    pub fn new(config: Config) -> Result<Self> {
        let http = build_http_client(&config)?;
        let service_ips = Arc::new(ServiceIpManager::new());
        let signer = (!config.secret_key.is_empty())
            .then(|| Signer::new(config.secret_key.clone(), config.signature_ttl));
        let transport = HttpTransport::new(http.clone(), &config, signer, Arc::clone(&service_ips))?;
        let bootstrap = BootstrapFetcher::new(http, &config);
        let cache = CacheManager::new(&config);

        cache.load_from_disk();
        if let Some((ips, updated_at)) = cache.load_service_ips() {
            log::debug!("restored {} service IPs from disk", ips.len());
            service_ips.seed(ips, updated_at);
        }

        Ok(Self {
            metrics: metrics::collector(config.enable_metrics),
            config,
            transport,
            service_ips,
            bootstrap,
            cache,
            refreshing: Mutex::new(HashSet::new()),
        })
    }

    /// Resolve one domain
    pub async fn resolve_single(
        self: &Arc<Self>,
        domain: &str,
        options: &ResolveOptions,
    ) -> Result<ResolveResult> {
        let started = Instant::now();
        if let Err(err) = validate_domain(domain) {
            return Err(Error::resolve("resolve_single", Some(domain), err));
        }

        if let (Some(entry), true, needs_refresh) = self.cache.get(domain) {
            log::debug!("cache hit for {domain}, expired: {needs_refresh}");
            if needs_refresh {
                self.spawn_refresh(domain, options);
            }
            let result = entry.to_result(domain, &options.client_ip);
            self.metrics.record_resolve(true, started.elapsed());
            return Ok(result);
        }

        let outcome = self
            .with_deadline(options, self.fetch_single(domain, options))
            .await;
        self.finish("resolve_single", Some(domain), started, outcome)
    }

    /// Resolve up to five domains with one request
    ///
    /// Results come back in no particular order, keyed by host: the wire
    /// format gives no positional guarantee.
    pub async fn resolve_batch(
        self: &Arc<Self>,
        domains: &[String],
        options: &ResolveOptions,
    ) -> Result<Vec<ResolveResult>> {
        let started = Instant::now();
        if domains.is_empty() {
            return Err(Error::resolve("resolve_batch", None, Error::InvalidDomain));
        }
        if domains.len() > MAX_BATCH_DOMAINS {
            return Err(Error::resolve("resolve_batch", None, Error::TooManyDomains));
        }
        for domain in domains {
            if let Err(err) = validate_domain(domain) {
                return Err(Error::resolve("resolve_batch", Some(domain.as_str()), err));
            }
        }

        let mut cached = Vec::new();
        let mut uncached = Vec::new();
        for domain in domains {
            if let (Some(entry), true, needs_refresh) = self.cache.get(domain) {
                log::debug!("cache hit for {domain}, expired: {needs_refresh}");
                if needs_refresh {
                    self.spawn_refresh(domain, options);
                }
                cached.push(entry.to_result(domain, &options.client_ip));
            } else {
                uncached.push(domain.clone());
            }
        }

        if uncached.is_empty() {
            self.metrics.record_resolve(true, started.elapsed());
            return Ok(cached);
        }

        let outcome = self
            .with_deadline(options, self.fetch_batch(&uncached, options))
            .await;
        let mut fresh = self.finish("resolve_batch", None, started, outcome)?;
        cached.append(&mut fresh);
        Ok(cached)
    }

    /// Resolve on a detached task and hand the outcome to `callback`
    ///
    /// The callback is invoked exactly once, on the worker task; a
    /// long-running callback delays that task's teardown.
    pub fn resolve_async<F>(self: &Arc<Self>, domain: &str, options: ResolveOptions, callback: F)
    where
        F: FnOnce(Result<ResolveResult>) + Send + 'static,
    {
        let resolver = Arc::clone(self);
        let domain = domain.to_string();
        tokio::spawn(async move {
            let outcome = resolver.resolve_single(&domain, &options).await;
            callback(outcome);
        });
    }

    /// Fetch service IPs and publish the new pool
    pub async fn refresh_service_ips(&self) -> Result<()> {
        let ips = self
            .bootstrap
            .fetch()
            .await
            .map_err(|err| Error::resolve("fetch_service_ips", None, err))?;
        self.service_ips.replace(ips.clone());
        self.cache.persist_service_ips(ips);
        Ok(())
    }

    pub fn service_ip_snapshot(&self) -> Vec<String> {
        self.service_ips.snapshot()
    }

    pub fn metrics_stats(&self) -> MetricsStats {
        self.metrics.stats()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Apply the per-resolve budget; an elapsed deadline aborts retry
    /// sleeps and the in-flight request, surfacing as `Cancelled`
    async fn with_deadline<T>(
        &self,
        options: &ResolveOptions,
        work: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let budget = options.timeout.unwrap_or(self.config.timeout);
        if budget.is_zero() {
            return work.await;
        }
        match tokio::time::timeout(budget, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Record metrics for a network fetch and wrap its error
    fn finish<T>(
        &self,
        op: &'static str,
        domain: Option<&str>,
        started: Instant,
        outcome: Result<T>,
    ) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.metrics.record_resolve(true, started.elapsed());
                Ok(value)
            }
            Err(Error::Cancelled) => {
                self.metrics.record_resolve(false, started.elapsed());
                Err(Error::Cancelled)
            }
            Err(err) => {
                self.metrics.record_error(&err);
                self.metrics.record_resolve(false, started.elapsed());
                Err(Error::resolve(op, domain, err))
            }
        }
    }

    /// Full network path for one domain: ensure service IPs, request with
    /// retry, parse, publish to the cache
    async fn fetch_single(&self, domain: &str, options: &ResolveOptions) -> Result<ResolveResult> {
        self.ensure_service_ips().await?;

        let response = self
            .transport
            .execute_with_retry(|| {
                let service_ip = self.service_ips.pick()?;
                Ok(self.transport.build_single_url(
                    &service_ip,
                    domain,
                    &options.client_ip,
                    options.query_type,
                ))
            })
            .await?;

        let payload = response.bytes().await?;
        let parsed: DnsResponse = serde_json::from_slice(&payload)?;

        let result = ResolveResult {
            domain: domain.to_string(),
            client_ip: options.client_ip.clone(),
            ipv4: parse_ip_strings(&parsed.ips),
            ipv6: parse_ip_strings(&parsed.ipsv6),
            ttl: Duration::from_secs(parsed.ttl.max(0) as u64),
            source: ResolveSource::HttpDns,
            timestamp: Utc::now(),
        };
        self.store_result(domain, &result, parsed.ttl);
        Ok(result)
    }

    /// Network path for the uncached part of a batch
    async fn fetch_batch(
        &self,
        domains: &[String],
        options: &ResolveOptions,
    ) -> Result<Vec<ResolveResult>> {
        self.ensure_service_ips().await?;

        let response = self
            .transport
            .execute_with_retry(|| {
                let service_ip = self.service_ips.pick()?;
                Ok(self
                    .transport
                    .build_batch_url(&service_ip, domains, &options.client_ip))
            })
            .await?;

        let payload = response.bytes().await?;
        let parsed: BatchDnsResponse = serde_json::from_slice(&payload)?;

        // The same host may appear in several records; merge them in a
        // local map before anything reaches the cache, so a later parse
        // problem cannot leave a half-merged entry behind.
        let timestamp = Utc::now();
        let mut merged: HashMap<String, (ResolveResult, i64)> = HashMap::new();
        for record in parsed.dns {
            let (result, max_ttl) = merged.entry(record.host.clone()).or_insert_with(|| {
                (
                    ResolveResult {
                        domain: record.host.clone(),
                        client_ip: options.client_ip.clone(),
                        ipv4: Vec::new(),
                        ipv6: Vec::new(),
                        ttl: Duration::ZERO,
                        source: ResolveSource::HttpDns,
                        timestamp,
                    },
                    0,
                )
            });
            result.ipv4.extend(parse_ip_strings(&record.ips));
            result.ipv6.extend(parse_ip_strings(&record.ipsv6));
            if record.ttl > *max_ttl {
                *max_ttl = record.ttl;
                result.ttl = Duration::from_secs(record.ttl as u64);
            }
        }

        let mut results = Vec::with_capacity(merged.len());
        for domain in domains {
            if let Some((result, ttl)) = merged.remove(domain) {
                self.store_result(domain, &result, ttl);
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Re-fetch the pool when it is empty or past its 8-hour lifetime
    async fn ensure_service_ips(&self) -> Result<()> {
        if self.service_ips.is_stale(POOL_MAX_AGE) {
            self.refresh_service_ips().await?;
        }
        Ok(())
    }

    fn store_result(&self, domain: &str, result: &ResolveResult, ttl: i64) {
        let entry = CacheEntry::new(
            result.ipv4.iter().map(|ip| ip.to_string()).collect(),
            result.ipv6.iter().map(|ip| ip.to_string()).collect(),
            ttl,
            result.timestamp,
        );
        self.cache.set(domain, entry);
        self.cache.schedule_persist();
    }

    /// Start a background refresh for `domain` unless one is already
    /// running; at most one refresh task exists per domain key
    fn spawn_refresh(self: &Arc<Self>, domain: &str, options: &ResolveOptions) {
        let key = normalize_domain(domain);
        {
            let mut refreshing = self.refreshing.lock().unwrap();
            if !refreshing.insert(key.clone()) {
                return;
            }
        }

        let resolver = Arc::clone(self);
        let domain = domain.to_string();
        let options = ResolveOptions {
            query_type: options.query_type,
            client_ip: options.client_ip.clone(),
            timeout: None,
        };
        tokio::spawn(async move {
            // The refresh runs on its own budget: the deadline of the
            // caller that observed the stale entry must not cut it short.
            let outcome = tokio::time::timeout(
                resolver.config.timeout,
                resolver.fetch_single(&domain, &options),
            )
            .await;
            match outcome {
                Ok(Ok(_)) => log::debug!("background refresh completed for {domain}"),
                Ok(Err(err)) => log::warn!("background refresh failed for {domain}: {err}"),
                Err(_) => log::warn!("background refresh timed out for {domain}"),
            }
            resolver.refreshing.lock().unwrap().remove(&key);
        });
    }
}
