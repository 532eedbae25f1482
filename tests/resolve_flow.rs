//! End-to-end resolve flows against local mock HTTPDNS services
//!
//! These tests exercise the full ladder: bootstrap discovery, service IP
//! selection and failover, caching, and stale-while-revalidate, with
//! plain TCP listeners standing in for the HTTPDNS endpoints.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use alicloud_httpdns::{Config, HttpDnsClient, QueryType, ResolveOptions};

type Responder = Arc<dyn Fn(&str, usize) -> (u16, String) + Send + Sync>;

/// A tiny HTTP/1.1 service answering canned JSON
struct MockService {
    /// `host:port` to hand out as a bootstrap or service IP
    authority: String,
    /// Requests served so far
    hits: Arc<AtomicUsize>,
    /// Request paths in arrival order
    paths: Arc<Mutex<Vec<String>>>,
}

impl MockService {
    fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Bind a listener and answer every request through `responder`
///
/// The responder receives the request path and a zero-based hit index.
async fn spawn_service(responder: Responder) -> MockService {
    spawn_service_with_delay(responder, Duration::ZERO).await
}

/// Like [`spawn_service`], but wait `delay` before answering each request
async fn spawn_service_with_delay(responder: Responder, delay: Duration) -> MockService {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = listener.local_addr().unwrap().to_string();
    let hits = Arc::new(AtomicUsize::new(0));
    let paths = Arc::new(Mutex::new(Vec::new()));

    {
        let hits = Arc::clone(&hits);
        let paths = Arc::clone(&paths);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let responder = Arc::clone(&responder);
                let hits = Arc::clone(&hits);
                let paths = Arc::clone(&paths);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    loop {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) => break,
                            Ok(n) => {
                                read += n;
                                if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                                if read == buf.len() {
                                    break;
                                }
                            }
                            Err(_) => return,
                        }
                    }

                    let request = String::from_utf8_lossy(&buf[..read]);
                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    let index = hits.fetch_add(1, Ordering::SeqCst);
                    paths.lock().unwrap().push(path.clone());

                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let (status, body) = responder(&path, index);
                    let reason = if status == 200 { "OK" } else { "Error" };
                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
    }

    MockService {
        authority,
        hits,
        paths,
    }
}

/// Service that always answers the same status and body
async fn fixed_service(status: u16, body: &str) -> MockService {
    let body = body.to_string();
    spawn_service(Arc::new(move |_, _| (status, body.clone()))).await
}

/// Bootstrap endpoint handing out the given service authorities
async fn bootstrap_service(service_authorities: Vec<String>) -> MockService {
    let body = serde_json::json!({ "service_ip": service_authorities }).to_string();
    fixed_service(200, &body).await
}

fn test_config(bootstrap: &MockService) -> Config {
    let mut config = Config::new("100000");
    config.bootstrap_ips = vec![bootstrap.authority.clone()];
    config.bootstrap_domain = String::new();
    config.timeout = Duration::from_secs(10);
    config
}

#[tokio::test]
async fn test_resolve_through_bootstrap_ladder() {
    let dns = fixed_service(
        200,
        r#"{"host":"example.com","ips":["5.6.7.8"],"ipsv6":["2001:db8::1"],"ttl":120}"#,
    )
    .await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    let result = client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(result.domain, "example.com");
    assert_eq!(result.ipv4, vec!["5.6.7.8".parse::<std::net::IpAddr>().unwrap()]);
    assert_eq!(result.ipv6, vec!["2001:db8::1".parse::<std::net::IpAddr>().unwrap()]);
    assert_eq!(result.ttl, Duration::from_secs(120));
    assert_eq!(result.source.to_string(), "HTTPDNS");

    assert_eq!(bootstrap.hit_count(), 1);
    assert_eq!(dns.hit_count(), 1);
    assert_eq!(client.get_service_ips(), vec![dns.authority.clone()]);

    // Second resolve is served from the cache
    let again = client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(again.ipv4, result.ipv4);
    assert_eq!(dns.hit_count(), 1);

    client.close().await;
}

#[tokio::test]
async fn test_retry_rotates_across_service_ips() {
    let bad_a = fixed_service(500, "{}").await;
    let bad_b = fixed_service(500, "{}").await;
    let good_c = fixed_service(200, r#"{"host":"example.com","ips":["5.6.7.8"],"ttl":60}"#).await;
    let bootstrap = bootstrap_service(vec![
        bad_a.authority.clone(),
        bad_b.authority.clone(),
        good_c.authority.clone(),
    ])
    .await;

    let mut config = test_config(&bootstrap);
    config.max_retries = 2;
    let client = HttpDnsClient::new(config).unwrap();

    let result = client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(result.ipv4, vec!["5.6.7.8".parse::<std::net::IpAddr>().unwrap()]);

    // Exactly one attempt per service, in pool order
    assert_eq!(bad_a.hit_count(), 1);
    assert_eq!(bad_b.hit_count(), 1);
    assert_eq!(good_c.hit_count(), 1);

    client.close().await;
}

#[tokio::test]
async fn test_exhausted_retries_surface_failure() {
    let bad = fixed_service(503, "{}").await;
    let bootstrap = bootstrap_service(vec![bad.authority.clone()]).await;

    let mut config = test_config(&bootstrap);
    config.max_retries = 1;
    let client = HttpDnsClient::new(config).unwrap();

    let err = client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_network_error(), "unexpected error: {err:?}");
    assert_eq!(bad.hit_count(), 2);

    client.close().await;
}

#[tokio::test]
async fn test_stale_while_revalidate() {
    // First answer has a one-second TTL, later answers carry new addresses
    let dns = spawn_service(Arc::new(|_, index| {
        if index == 0 {
            (200, r#"{"host":"example.com","ips":["1.2.3.4"],"ttl":1}"#.to_string())
        } else {
            (200, r#"{"host":"example.com","ips":["5.6.7.8"],"ttl":300}"#.to_string())
        }
    }))
    .await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let mut config = test_config(&bootstrap);
    config.allow_expired_cache = true;
    let client = HttpDnsClient::new(config).unwrap();

    let first = client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(first.ipv4, vec!["1.2.3.4".parse::<std::net::IpAddr>().unwrap()]);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // The entry is expired now: the stale addresses come back immediately
    // while a background refresh replaces them
    let stale = client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(stale.ipv4, vec!["1.2.3.4".parse::<std::net::IpAddr>().unwrap()]);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let refreshed = client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(refreshed.ipv4, vec!["5.6.7.8".parse::<std::net::IpAddr>().unwrap()]);

    // Initial fetch plus exactly one refresh
    assert_eq!(dns.hit_count(), 2);

    client.close().await;
}

#[tokio::test]
async fn test_bootstrap_falls_back_to_domain() {
    let dns = fixed_service(200, r#"{"host":"example.com","ips":["9.9.9.9"],"ttl":60}"#).await;
    let fallback = bootstrap_service(vec![dns.authority.clone()]).await;

    let mut config = Config::new("100000");
    // An unreachable bootstrap IP forces the domain path
    config.bootstrap_ips = vec!["127.0.0.1:1".into()];
    config.bootstrap_domain = fallback.authority.clone();
    config.timeout = Duration::from_secs(10);
    let client = HttpDnsClient::new(config).unwrap();

    let result = client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(result.ipv4, vec!["9.9.9.9".parse::<std::net::IpAddr>().unwrap()]);
    assert_eq!(fallback.hit_count(), 1);
    assert_eq!(client.get_service_ips(), vec![dns.authority.clone()]);

    client.close().await;
}

#[tokio::test]
async fn test_batch_merges_records_for_one_host() {
    let dns = fixed_service(
        200,
        r#"{"dns":[
            {"host":"example.com","ips":["1.1.1.1"],"ttl":60},
            {"host":"example.com","ips":["2.2.2.2"],"ttl":120}
        ]}"#,
    )
    .await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    let results = client
        .resolve_batch(&["example.com".to_string()], ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let merged = &results[0];
    assert_eq!(
        merged.ipv4,
        vec![
            "1.1.1.1".parse::<std::net::IpAddr>().unwrap(),
            "2.2.2.2".parse::<std::net::IpAddr>().unwrap(),
        ]
    );
    // Merged TTL is the larger of the two records
    assert_eq!(merged.ttl, Duration::from_secs(120));

    client.close().await;
}

#[tokio::test]
async fn test_batch_resolves_multiple_hosts() {
    let dns = fixed_service(
        200,
        r#"{"dns":[
            {"host":"a.com","ips":["1.1.1.1"],"ttl":60},
            {"host":"b.com","ips":["2.2.2.2"],"ttl":60}
        ]}"#,
    )
    .await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    let results = client
        .resolve_batch(
            &["a.com".to_string(), "b.com".to_string()],
            ResolveOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    // One request covered both hosts; both are now cached
    assert_eq!(dns.hit_count(), 1);
    let cached = client
        .resolve_batch(
            &["a.com".to_string(), "b.com".to_string()],
            ResolveOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(dns.hit_count(), 1);

    client.close().await;
}

#[tokio::test]
async fn test_signed_resolve_uses_sign_endpoint() {
    let dns = fixed_service(200, r#"{"host":"example.com","ips":["5.6.7.8"],"ttl":60}"#).await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let mut config = test_config(&bootstrap);
    config.secret_key = "IAmASecret".into();
    let client = HttpDnsClient::new(config).unwrap();

    client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();

    let paths = dns.paths.lock().unwrap().clone();
    assert_eq!(paths.len(), 1);
    let path = &paths[0];
    assert!(path.starts_with("/100000/sign_d?host=example.com&query=4,6&t="), "path: {path}");
    let signature = path.rsplit("&s=").next().unwrap();
    assert_eq!(signature.len(), 32);

    client.close().await;
}

#[tokio::test]
async fn test_client_ip_forwarded_in_query() {
    let dns = fixed_service(200, r#"{"host":"example.com","ips":["5.6.7.8"],"ttl":60}"#).await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    let result = client
        .resolve(
            "example.com",
            ResolveOptions::default().with_client_ip("203.0.113.9"),
        )
        .await
        .unwrap();
    assert_eq!(result.client_ip, "203.0.113.9");

    let paths = dns.paths.lock().unwrap().clone();
    assert_eq!(
        paths[0],
        "/100000/d?host=example.com&query=4,6&ip=203.0.113.9"
    );

    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_resolve_invokes_callback_once() {
    let dns = fixed_service(200, r#"{"host":"example.com","ips":["5.6.7.8"],"ttl":60}"#).await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    client.resolve_async("example.com", ResolveOptions::default(), move |outcome| {
        tx.send(outcome).unwrap();
    });

    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let result = outcome.unwrap();
    assert_eq!(result.ipv4, vec!["5.6.7.8".parse::<std::net::IpAddr>().unwrap()]);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    client.close().await;
}

#[tokio::test]
async fn test_batch_size_limit_issues_no_request() {
    let dns = fixed_service(200, r#"{"dns":[]}"#).await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    let domains: Vec<String> = (0..6).map(|i| format!("host{i}.com")).collect();
    let err = client
        .resolve_batch(&domains, ResolveOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("resolve_batch"), "error: {err}");

    // Validation failed before anything touched the network
    assert_eq!(bootstrap.hit_count(), 0);
    assert_eq!(dns.hit_count(), 0);

    client.close().await;
}

#[tokio::test]
async fn test_caller_deadline_cancels_resolve() {
    let body = r#"{"host":"example.com","ips":["5.6.7.8"],"ttl":60}"#.to_string();
    let dns = spawn_service_with_delay(
        Arc::new(move |_, _| (200, body.clone())),
        Duration::from_secs(2),
    )
    .await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    let err = client
        .resolve(
            "example.com",
            ResolveOptions::default().with_timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "expected cancellation, got {err:?}");
    assert!(!err.is_network_error());

    client.close().await;
}

#[tokio::test]
async fn test_query_type_parameter() {
    let dns = fixed_service(
        200,
        r#"{"host":"example.com","ipsv6":["2001:db8::2"],"ttl":60}"#,
    )
    .await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    let result = client
        .resolve(
            "example.com",
            ResolveOptions::default().with_query_type(QueryType::Ipv6),
        )
        .await
        .unwrap();
    assert!(result.ipv4.is_empty());
    assert_eq!(result.ipv6, vec!["2001:db8::2".parse::<std::net::IpAddr>().unwrap()]);

    let paths = dns.paths.lock().unwrap().clone();
    assert_eq!(paths[0], "/100000/d?host=example.com&query=6");

    client.close().await;
}

#[tokio::test]
async fn test_manual_service_ip_refresh() {
    let dns = fixed_service(200, r#"{"host":"example.com","ips":["5.6.7.8"],"ttl":60}"#).await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    assert!(client.get_service_ips().is_empty());

    client.update_service_ips().await.unwrap();
    assert_eq!(client.get_service_ips(), vec![dns.authority.clone()]);
    assert_eq!(bootstrap.hit_count(), 1);

    // The pool is fresh now, so a resolve does not bootstrap again
    client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(bootstrap.hit_count(), 1);

    client.close().await;
}

#[tokio::test]
async fn test_malformed_addresses_are_dropped() {
    let dns = fixed_service(
        200,
        r#"{"host":"example.com","ips":["5.6.7.8","not-an-ip"],"ipsv6":["bogus"],"ttl":60}"#,
    )
    .await;
    let bootstrap = bootstrap_service(vec![dns.authority.clone()]).await;

    let client = HttpDnsClient::new(test_config(&bootstrap)).unwrap();
    let result = client
        .resolve("example.com", ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(result.ipv4, vec!["5.6.7.8".parse::<std::net::IpAddr>().unwrap()]);
    assert!(result.ipv6.is_empty());

    client.close().await;
}
