//! Per-client token-bucket rate limiting.
//!
//! Clients are keyed by source IP. Every check runs lookup-or-insert, the
//! last-seen update and the token take under one lock, and a background sweep
//! evicts clients that have gone quiet.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::AppError;

/// Rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Sustained requests per second per client.
    pub rps: f64,
    /// Bucket capacity.
    pub burst: u32,
    pub sweep_interval: Duration,
    /// Clients unseen for longer than this are dropped by the sweep.
    pub idle_timeout: Duration,
    /// Key clients by `X-Forwarded-For` / `X-Real-IP`. Only safe behind a
    /// proxy that overwrites those headers.
    pub trust_forwarded: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rps: 2.0,
            burst: 4,
            sweep_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(3 * 60),
            trust_forwarded: true,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: config.burst as f64,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, config: &RateLimitConfig, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.rps).min(config.burst as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct Client {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Owned rate limiter. Cheap to clone; clones share one client table.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: Arc<Mutex<HashMap<IpAddr, Client>>>,
    created: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Arc::new(Mutex::new(HashMap::new())),
            created: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the periodic sweep. It runs until [`RateLimiter::stop`].
    pub fn start(&self) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.config.sweep_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = limiter.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = limiter.sweep().await;
                        if evicted > 0 {
                            debug!(evicted, "evicted idle rate-limit clients");
                        }
                    }
                }
            }
            debug!("rate limiter sweep stopped");
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Take one token for `ip`. Always allows when the limiter is disabled.
    pub async fn check(&self, ip: IpAddr) -> bool {
        if !self.config.enabled {
            return true;
        }
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        let client = clients.entry(ip).or_insert_with(|| {
            self.created.fetch_add(1, Ordering::SeqCst);
            Client {
                bucket: TokenBucket::full(&self.config, now),
                last_seen: now,
            }
        });
        client.last_seen = now;
        client.bucket.try_acquire(&self.config, now)
    }

    /// Drop clients idle past the timeout. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let mut clients = self.clients.lock().await;
        let before = clients.len();
        let idle_timeout = self.config.idle_timeout;
        clients.retain(|_, c| c.last_seen.elapsed() <= idle_timeout);
        before - clients.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Total client entries ever created.
    pub fn clients_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

/// Axum middleware: rejects with 429 once a client's bucket is empty.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(request.headers(), peer, state.config.limiter.trust_forwarded);

    if state.limiter.check(ip).await {
        next.run(request).await
    } else {
        warn!(client_ip = %ip, "rate limit exceeded");
        AppError::RateLimited.into_response()
    }
}

/// `X-Forwarded-For` first hop, then `X-Real-IP`, then the socket peer.
///
/// With `trust_forwarded` off only the socket peer counts.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded: bool) -> IpAddr {
    let fallback = peer.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    if !trust_forwarded {
        return fallback;
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    let real = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    if let Some(ip) = real {
        return ip;
    }

    fallback
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn config(burst: u32, rps: f64) -> RateLimitConfig {
        RateLimitConfig {
            burst,
            rps,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn burst_then_limited() {
        let limiter = RateLimiter::new(config(4, 2.0));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for i in 0..4 {
            assert!(limiter.check(ip).await, "request {i} should pass");
        }
        assert!(!limiter.check(ip).await);
    }

    #[tokio::test]
    async fn clients_have_separate_buckets() {
        let limiter = RateLimiter::new(config(1, 0.001));
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a).await);
        assert!(!limiter.check(a).await);
        assert!(limiter.check(b).await);
    }

    #[tokio::test]
    async fn bucket_refills_over_time() {
        let limiter = RateLimiter::new(config(1, 100.0));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(limiter.check(ip).await);
        assert!(!limiter.check(ip).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check(ip).await);
    }

    #[tokio::test]
    async fn disabled_limiter_never_limits() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..config(1, 0.001)
        });
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..10 {
            assert!(limiter.check(ip).await);
        }
        assert_eq!(limiter.tracked_clients().await, 0);
    }

    #[tokio::test]
    async fn sweep_evicts_idle_clients() {
        let limiter = RateLimiter::new(RateLimitConfig {
            idle_timeout: Duration::from_millis(10),
            ..Default::default()
        });
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        limiter.check(ip).await;
        assert_eq!(limiter.tracked_clients().await, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(limiter.sweep().await, 1);
        assert_eq!(limiter.tracked_clients().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_arrivals_from_one_ip_share_a_bucket() {
        let limiter = RateLimiter::new(config(4, 0.001));
        let ip: IpAddr = "10.0.0.9".parse().unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.check(ip).await }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 4);
        assert_eq!(limiter.clients_created(), 1);
        assert_eq!(limiter.tracked_clients().await, 1);
    }

    #[tokio::test]
    async fn stop_ends_the_sweep_task() {
        let limiter = RateLimiter::new(RateLimitConfig {
            sweep_interval: Duration::from_millis(5),
            ..Default::default()
        });
        let handle = limiter.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        limiter.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn client_ip_prefers_forwarded_headers() {
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer), true), peer);

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(
            client_ip(&headers, Some(peer), true),
            "198.51.100.7".parse::<IpAddr>().unwrap()
        );

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(
            client_ip(&headers, Some(peer), true),
            "203.0.113.5".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn untrusted_forwarding_headers_are_ignored() {
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));

        assert_eq!(client_ip(&headers, Some(peer), false), peer);
        assert_eq!(
            client_ip(&headers, None, false),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
    }
}
