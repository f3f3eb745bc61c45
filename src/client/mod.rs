//! Proxy-rotating HTTP client
//!
//! [`RotatingClient`] owns the proxy list, the rotation cursor and the
//! active transport. List and cursor sit behind one mutex; the active
//! transport is an [`ArcSwap`] that is only stored while that mutex is held,
//! so requests read it lock-free and always see a complete rotation state.
//!
//! The background loop that rotates on a timer lives in
//! [`crate::services::rotation`].

mod bound;

pub use bound::{BoundClient, FetchedResponse};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::Method;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{Result, RotatifyError};
use crate::models::{ProxyEndpoint, TickReport};
use crate::proxy::rotation::{ActiveTransport, RotationSnapshot, RotationState};

/// Default time between rotations
pub const DEFAULT_ROTATE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Capacity of the tick report channel
const REPORT_CHANNEL_CAPACITY: usize = 1024;

/// Request-level settings shared by every bound client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time allowed to reach the origin (through the proxy, TLS included)
    pub connect_timeout: Duration,
    /// Time allowed for sending the request and reading the whole body
    pub request_timeout: Duration,
    /// Upper bound on one run of the rotation action hook
    pub action_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            action_timeout: Duration::from_secs(60),
            user_agent: concat!("rotatify/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: config.client.connect_timeout,
            request_timeout: config.client.request_timeout,
            action_timeout: config.client.action_timeout,
            ..Self::default()
        }
    }
}

/// HTTP client that rotates its upstream proxy
pub struct RotatingClient {
    pub(crate) state: Mutex<RotationState>,
    pub(crate) active: ArcSwap<ActiveTransport>,
    pub(crate) config: ClientConfig,
    /// Rotation interval in milliseconds
    rotate_interval_ms: AtomicU64,
    /// Sticky stop flag; `true` once stop was requested
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) running: AtomicBool,
    pub(crate) reports: broadcast::Sender<TickReport>,
}

impl RotatingClient {
    /// Empty proxy list, direct connections, 10 minute interval
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        Self {
            state: Mutex::new(RotationState::new()),
            active: ArcSwap::from_pointee(ActiveTransport::Direct),
            config,
            rotate_interval_ms: AtomicU64::new(DEFAULT_ROTATE_INTERVAL.as_millis() as u64),
            shutdown_tx,
            running: AtomicBool::new(false),
            reports,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the current rotation interval
    pub fn rotate_interval(&self) -> Duration {
        Duration::from_millis(self.rotate_interval_ms.load(Ordering::Relaxed))
    }

    /// Update the rotation interval.
    ///
    /// Read once when the rotation loop starts; a running loop keeps the
    /// interval it started with.
    pub fn set_rotate_interval(&self, interval: Duration) -> Result<()> {
        let millis = interval.as_millis();
        if millis == 0 {
            return Err(RotatifyError::InvalidConfig(
                "rotate interval must be at least 1ms".into(),
            ));
        }

        self.rotate_interval_ms
            .store(u64::try_from(millis).unwrap_or(u64::MAX), Ordering::Relaxed);
        Ok(())
    }

    /// Replace the proxy list.
    ///
    /// Every address is parsed before anything changes; on the first bad
    /// entry the error is returned and the live list, cursor and transport
    /// stay as they were. On success the first new proxy is active at once.
    #[instrument(skip(self, raw))]
    pub fn update_proxies<I, S>(&self, raw: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let proxies = ProxyEndpoint::parse_all(raw)?;
        let count = proxies.len();

        let mut state = self.state.lock();
        state.replace(proxies);
        self.rotate_active_proxy(&mut state);
        drop(state);

        info!("Loaded {} proxies", count);
        Ok(())
    }

    /// Bind the transport to the proxy under the cursor and advance.
    ///
    /// Takes the guarded state, so callers must hold the lock.
    pub(crate) fn rotate_active_proxy(&self, state: &mut RotationState) -> Arc<ActiveTransport> {
        let next = Arc::new(state.advance());
        self.active.store(next.clone());
        debug!(transport = %next, cursor = state.cursor(), "Active transport rotated");
        next
    }

    /// Rotate immediately, outside the timer schedule
    pub fn rotate_now(&self) -> Arc<ActiveTransport> {
        let mut state = self.state.lock();
        self.rotate_active_proxy(&mut state)
    }

    /// Transport new requests will use
    pub fn active_transport(&self) -> Arc<ActiveTransport> {
        self.active.load_full()
    }

    /// Consistent view of list, cursor and active transport
    pub fn snapshot(&self) -> RotationSnapshot {
        let state = self.state.lock();
        RotationSnapshot {
            proxies: state.proxies().to_vec(),
            cursor: state.cursor(),
            generation: state.generation(),
            active: self.active.load_full(),
        }
    }

    /// Get the number of proxies in rotation
    pub fn proxy_count(&self) -> usize {
        self.state.lock().len()
    }

    /// Client pinned to the current transport
    pub fn bound(&self) -> BoundClient {
        BoundClient::new(self.active_transport(), self.config.clone())
    }

    /// GET `url` through the current transport.
    ///
    /// The transport is captured once; a rotation during the request does
    /// not affect it.
    pub async fn get(&self, url: &str) -> Result<FetchedResponse> {
        self.bound().get(url).await
    }

    pub async fn send(&self, method: Method, url: &str, body: Bytes) -> Result<FetchedResponse> {
        self.bound().send(method, url, body).await
    }

    /// Receive one [`TickReport`] per rotation tick.
    ///
    /// Slow receivers lose the oldest reports instead of stalling rotation.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<TickReport> {
        self.reports.subscribe()
    }
}

impl Default for RotatingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Forward proxy serving one request: reports the request head, waits
    /// for `release` if given, then answers with `name` as the body.
    async fn spawn_forward_proxy(
        name: &'static str,
        release: Option<oneshot::Receiver<()>>,
    ) -> (SocketAddr, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (head_tx, head_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let _ = head_tx.send(String::from_utf8_lossy(&head).into_owned());

            if let Some(release) = release {
                let _ = release.await;
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                name.len(),
                name
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        (addr, head_rx)
    }

    fn active_port(client: &RotatingClient) -> Option<u16> {
        client.active_transport().proxy().map(|p| p.port())
    }

    #[test]
    fn test_new_client_is_direct() {
        let client = RotatingClient::new();
        assert!(client.active_transport().is_direct());
        assert_eq!(client.proxy_count(), 0);
        assert_eq!(client.rotate_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_update_activates_first_proxy_immediately() {
        let client = RotatingClient::new();
        client
            .update_proxies(["http://10.0.0.1:1", "http://10.0.0.2:2", "http://10.0.0.3:3"])
            .unwrap();

        assert_eq!(active_port(&client), Some(1));
        assert_eq!(client.snapshot().cursor, 1);
    }

    #[test]
    fn test_rotation_visits_every_proxy_in_order() {
        let client = RotatingClient::new();
        client
            .update_proxies(["http://h:1", "http://h:2", "http://h:3"])
            .unwrap();

        let visited: Vec<_> = (0..3)
            .map(|_| client.rotate_now().proxy().map(|p| p.port()))
            .collect();
        assert_eq!(visited, vec![Some(2), Some(3), Some(1)]);
    }

    #[test]
    fn test_single_proxy_rebinds_same_proxy() {
        let client = RotatingClient::new();
        client.update_proxies(["socks5://h:1080"]).unwrap();

        for _ in 0..4 {
            assert_eq!(client.rotate_now().proxy().map(|p| p.port()), Some(1080));
        }
    }

    #[test]
    fn test_empty_list_stays_direct() {
        let client = RotatingClient::new();
        client.update_proxies(["http://h:1"]).unwrap();
        client.update_proxies(Vec::<String>::new()).unwrap();

        for _ in 0..3 {
            assert!(client.rotate_now().is_direct());
        }
        assert!(client.active_transport().is_direct());
    }

    #[test]
    fn test_update_resets_cursor_mid_rotation() {
        let client = RotatingClient::new();
        client
            .update_proxies(["http://old:1", "http://old:2", "http://old:3", "http://old:4"])
            .unwrap();
        client.rotate_now();
        assert_eq!(client.snapshot().cursor, 2);

        client.update_proxies(["http://new:10", "http://new:20"]).unwrap();

        let active = client.active_transport();
        let proxy = active.proxy().unwrap();
        assert_eq!(proxy.host(), "new");
        assert_eq!(proxy.port(), 10);
    }

    #[test]
    fn test_failed_update_leaves_state_untouched() {
        let client = RotatingClient::new();
        client.update_proxies(["http://keep:1", "http://keep:2"]).unwrap();
        client.rotate_now();
        let before = client.snapshot();

        let err = client
            .update_proxies([
                "http://n:1",
                "http://n:2",
                "bad address",
                "http://n:4",
                "http://n:5",
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            RotatifyError::InvalidProxyAddress { index: 2, .. }
        ));

        let after = client.snapshot();
        assert_eq!(after.proxies, before.proxies);
        assert_eq!(after.cursor, before.cursor);
        assert_eq!(after.active, before.active);
        assert_eq!(after.generation, before.generation);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn test_set_rotate_interval_rejects_zero() {
        let client = RotatingClient::new();
        assert!(client.set_rotate_interval(Duration::ZERO).is_err());

        client.set_rotate_interval(Duration::from_millis(250)).unwrap();
        assert_eq!(client.rotate_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_client_config_from_app_config() {
        let mut app = Config::default();
        app.client.request_timeout = Duration::from_secs(5);

        let config = ClientConfig::from(&app);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.user_agent.starts_with("rotatify/"));
    }

    #[tokio::test]
    async fn test_request_keeps_transport_across_rotation() {
        let (release_tx, release_rx) = oneshot::channel();
        let (addr_a, head_a) = spawn_forward_proxy("A", Some(release_rx)).await;
        let (addr_b, head_b) = spawn_forward_proxy("B", None).await;

        let client = Arc::new(RotatingClient::new());
        client
            .update_proxies([format!("http://{}", addr_a), format!("http://{}", addr_b)])
            .unwrap();

        let in_flight = tokio::spawn({
            let client = client.clone();
            async move { client.get("http://origin.invalid/ip").await }
        });

        // Proxy A holds the request; rotate underneath it.
        let head = tokio::time::timeout(Duration::from_secs(2), head_a)
            .await
            .unwrap()
            .unwrap();
        assert!(head.starts_with("GET http://origin.invalid/ip HTTP/1.1"));
        assert_eq!(client.rotate_now().proxy().map(|p| p.port()), Some(addr_b.port()));
        release_tx.send(()).unwrap();

        let response = in_flight.await.unwrap().unwrap();
        assert_eq!(response.text(), "A");
        assert_eq!(response.transport.proxy().map(|p| p.port()), Some(addr_a.port()));

        let next = client.get("http://origin.invalid/ip").await.unwrap();
        assert_eq!(next.text(), "B");
        assert_eq!(next.transport.proxy().map(|p| p.port()), Some(addr_b.port()));
        assert!(head_b.await.unwrap().starts_with("GET http://origin.invalid/ip"));
    }
}
