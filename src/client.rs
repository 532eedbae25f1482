//! Client façade and lifecycle
//!
//! Owns the resolver and the periodic service IP refresh task. The client
//! is cheap to share behind an `Arc` and safe to call from any number of
//! concurrent tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::MetricsStats;
use crate::resolver::Resolver;
use crate::service_ip::POOL_MAX_AGE;
use crate::types::{ResolveOptions, ResolveResult};

/// HTTPDNS client
///
/// Construct with [`HttpDnsClient::new`] inside a Tokio runtime; the
/// client spawns its background refresh task at construction and joins it
/// in [`close`](Self::close).
pub struct HttpDnsClient {
    resolver: Arc<Resolver>,
    shutdown_tx: broadcast::Sender<()>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl HttpDnsClient {
    /// Validate the configuration, build the resolver (loading persisted
    /// caches when enabled), and start the periodic service IP refresh
    pub fn new(config: Config) -> Result<Self> {
        let config = config.normalized()?;
        let resolver = Arc::new(Resolver::new(config)?);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let refresh_task = spawn_periodic_refresh(Arc::clone(&resolver), shutdown_rx);

        Ok(Self {
            resolver,
            shutdown_tx,
            refresh_task: Mutex::new(Some(refresh_task)),
            started: AtomicBool::new(true),
        })
    }

    /// Resolve one domain
    pub async fn resolve(&self, domain: &str, options: ResolveOptions) -> Result<ResolveResult> {
        self.ensure_running(Some(domain))?;
        self.resolver.resolve_single(domain, &options).await
    }

    /// Resolve up to five domains with a single request
    ///
    /// Results are keyed by host and may come back in any order.
    pub async fn resolve_batch(
        &self,
        domains: &[String],
        options: ResolveOptions,
    ) -> Result<Vec<ResolveResult>> {
        self.ensure_running(None)?;
        self.resolver.resolve_batch(domains, &options).await
    }

    /// Resolve on a detached task; `callback` is invoked exactly once with
    /// the outcome and must not block for long
    pub fn resolve_async<F>(&self, domain: &str, options: ResolveOptions, callback: F)
    where
        F: FnOnce(Result<ResolveResult>) + Send + 'static,
    {
        if let Err(err) = self.ensure_running(Some(domain)) {
            callback(Err(err));
            return;
        }
        self.resolver.resolve_async(domain, options, callback);
    }

    /// Force a service IP refresh outside the periodic schedule
    pub async fn update_service_ips(&self) -> Result<()> {
        self.ensure_running(None)?;
        let budget = self.resolver.default_timeout();
        match tokio::time::timeout(budget, self.resolver.refresh_service_ips()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Current service IP pool; empty before the first successful fetch
    pub fn get_service_ips(&self) -> Vec<String> {
        if !self.is_healthy() {
            return Vec::new();
        }
        self.resolver.service_ip_snapshot()
    }

    /// Snapshot of resolve metrics
    pub fn get_metrics(&self) -> MetricsStats {
        self.resolver.metrics_stats()
    }

    /// Zero all resolve metrics
    pub fn reset_metrics(&self) {
        self.resolver.reset_metrics();
    }

    /// True from construction until [`close`](Self::close)
    pub fn is_healthy(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Shut down the client; idempotent
    ///
    /// Signals the periodic refresh task and joins it before returning.
    /// Subsequent resolves fail with [`Error::ServiceUnavailable`] as the
    /// cause.
    pub async fn close(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(());
        let task = self.refresh_task.lock().unwrap().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                log::warn!("service IP refresh task ended abnormally: {err}");
            }
        }
    }

    fn ensure_running(&self, domain: Option<&str>) -> Result<()> {
        if !self.is_healthy() {
            return Err(Error::resolve(
                "client_stopped",
                domain,
                Error::ServiceUnavailable,
            ));
        }
        Ok(())
    }
}

/// Refresh the service IP pool every 8 hours until shutdown
fn spawn_periodic_refresh(
    resolver: Arc<Resolver>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = POOL_MAX_AGE;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let budget = resolver.default_timeout();
                    match tokio::time::timeout(budget, resolver.refresh_service_ips()).await {
                        Ok(Ok(())) => log::debug!("periodic service IP refresh succeeded"),
                        Ok(Err(err)) => log::warn!("periodic service IP refresh failed: {err}"),
                        Err(_) => log::warn!("periodic service IP refresh timed out"),
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    })
}
