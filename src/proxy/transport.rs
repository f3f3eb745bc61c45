//! Proxy transport layer for HTTP and SOCKS5 proxies
//!
//! Opens the byte stream a request is written to: straight to the origin,
//! to an HTTP proxy in forward mode, or through a CONNECT / SOCKS5 tunnel.
//! `https` origins get TLS on top of whichever stream was opened.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};
use url::Url;

use super::rotation::ActiveTransport;
use crate::error::{Result, RotatifyError};
use crate::models::proxy::format_tcp_addr;
use crate::models::{ProxyEndpoint, ProxyProtocol};

/// Upper bound on CONNECT response headers
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Trait for proxy connections
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ProxyConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedConnection = Box<dyn ProxyConnection>;

/// Origin a request is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Target {
    /// Parse host and port from an `http`/`https` URL
    pub fn from_url(url: &Url) -> Result<Self> {
        let tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(RotatifyError::InvalidTarget(format!(
                    "unsupported scheme '{}' in {}",
                    other, url
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RotatifyError::InvalidTarget(format!("missing host in {}", url)))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
            .to_string();

        let port = url
            .port_or_known_default()
            .unwrap_or(if tls { 443 } else { 80 });

        Ok(Self { host, port, tls })
    }

    /// Value for the `Host` header; the port is omitted when it is the default
    pub fn authority(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            if self.host.contains(':') {
                format!("[{}]", self.host)
            } else {
                self.host.clone()
            }
        } else {
            format_tcp_addr(&self.host, self.port)
        }
    }

    /// `host:port` for dialing or for a CONNECT request line
    pub fn address(&self) -> String {
        format_tcp_addr(&self.host, self.port)
    }
}

/// How a request reaches its origin for a given transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Straight TCP (plus TLS) to the origin
    Direct,
    /// Plain-http request handed to an HTTP proxy in absolute form
    Forward,
    /// CONNECT or SOCKS5 tunnel to the origin
    Tunnel,
}

impl Route {
    pub fn for_target(transport: &ActiveTransport, target: &Target) -> Self {
        match transport.proxy() {
            None => Route::Direct,
            Some(proxy) if proxy.protocol().is_http() && !target.tls => Route::Forward,
            Some(_) => Route::Tunnel,
        }
    }

    /// Whether the request line must carry the full URL
    pub fn uses_absolute_form(&self) -> bool {
        matches!(self, Route::Forward)
    }
}

/// Proxy transport handler
///
/// Manages connections through the active transport
pub struct ProxyTransport;

impl ProxyTransport {
    /// Connect to `target` over `transport`, bounded by `connect_timeout`.
    ///
    /// For [`Route::Forward`] the returned stream is connected to the proxy
    /// itself.
    #[instrument(skip(transport, target), fields(transport = %transport, target = %target.address()))]
    pub async fn connect(
        transport: &ActiveTransport,
        target: &Target,
        connect_timeout: Duration,
    ) -> Result<BoxedConnection> {
        timeout(connect_timeout, Self::open(transport, target))
            .await
            .map_err(|_| RotatifyError::Timeout)?
    }

    async fn open(transport: &ActiveTransport, target: &Target) -> Result<BoxedConnection> {
        let stream = match transport.proxy() {
            None => Self::connect_tcp(&target.address()).await?,
            Some(proxy) => {
                let upstream = Self::connect_proxy(proxy).await?;
                match Route::for_target(transport, target) {
                    Route::Forward => upstream,
                    _ if proxy.protocol().is_socks() => {
                        Self::connect_socks5(proxy, upstream, target).await?
                    }
                    _ => Self::connect_http(upstream, target).await?,
                }
            }
        };

        if target.tls {
            Self::wrap_tls(stream, &target.host).await
        } else {
            Ok(stream)
        }
    }

    async fn connect_tcp(addr: &str) -> Result<BoxedConnection> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            RotatifyError::ProxyConnectionFailed(format!("TCP connect to {} failed: {}", addr, e))
        })?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    /// Open the hop to the proxy itself (TLS for `https` proxies)
    async fn connect_proxy(proxy: &ProxyEndpoint) -> Result<BoxedConnection> {
        debug!("Connecting to {} proxy at {}", proxy.protocol(), proxy.address());

        let stream = Self::connect_tcp(&proxy.address()).await?;
        if proxy.protocol() == ProxyProtocol::Https {
            Self::wrap_tls(stream, proxy.host()).await
        } else {
            Ok(stream)
        }
    }

    /// Establish a tunnel with the HTTP CONNECT method
    async fn connect_http(mut stream: BoxedConnection, target: &Target) -> Result<BoxedConnection> {
        let request = Self::build_connect_request(target);
        stream.write_all(request.as_bytes()).await.map_err(|e| {
            RotatifyError::ProxyConnectionFailed(format!("Failed to send CONNECT: {}", e))
        })?;

        let response = Self::read_connect_response(&mut stream).await?;
        let status_line = response.lines().next().unwrap_or_default();
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok());

        match status {
            Some(code) if (200..300).contains(&code) => {
                debug!("HTTP CONNECT tunnel established to {}", target.address());
                Ok(stream)
            }
            _ => Err(RotatifyError::ConnectFailed(if status_line.is_empty() {
                "Unknown error".to_string()
            } else {
                status_line.to_string()
            })),
        }
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(target: &Target) -> String {
        let authority = target.address();
        format!(
            "CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n",
            authority, authority
        )
    }

    async fn read_connect_response(stream: &mut BoxedConnection) -> Result<String> {
        let mut response = Vec::with_capacity(256);
        let mut chunk = [0u8; 256];

        loop {
            let n = stream.read(&mut chunk).await.map_err(|e| {
                RotatifyError::ProxyConnectionFailed(format!(
                    "Failed to read CONNECT response: {}",
                    e
                ))
            })?;
            if n == 0 {
                return Err(RotatifyError::ConnectFailed(
                    "proxy closed the connection before answering CONNECT".to_string(),
                ));
            }

            response.extend_from_slice(&chunk[..n]);
            if response.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
            if response.len() > MAX_CONNECT_RESPONSE {
                return Err(RotatifyError::ConnectFailed(
                    "CONNECT response headers too large".to_string(),
                ));
            }
        }

        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    /// Establish a tunnel through a SOCKS5 proxy.
    ///
    /// `socks5` resolves the origin locally, `socks5h` lets the proxy do it.
    async fn connect_socks5(
        proxy: &ProxyEndpoint,
        upstream: BoxedConnection,
        target: &Target,
    ) -> Result<BoxedConnection> {
        let stream = if proxy.protocol() == ProxyProtocol::Socks5h {
            Socks5Stream::connect_with_socket(upstream, (target.host.as_str(), target.port)).await
        } else {
            let addr = tokio::net::lookup_host((target.host.as_str(), target.port))
                .await?
                .next()
                .ok_or_else(|| {
                    RotatifyError::ProxyConnectionFailed(format!(
                        "could not resolve {}",
                        target.host
                    ))
                })?;
            Socks5Stream::connect_with_socket(upstream, addr).await
        }
        .map_err(|e| RotatifyError::ProxyConnectionFailed(format!("SOCKS5 connect failed: {}", e)))?;

        debug!("SOCKS5 tunnel established to {}", target.address());
        Ok(Box::new(stream.into_inner()))
    }

    async fn wrap_tls(stream: BoxedConnection, host: &str) -> Result<BoxedConnection> {
        let server_name = ServerName::try_from(host)
            .map(|name| name.to_owned())
            .map_err(|e| RotatifyError::Tls(format!("invalid server name '{}': {}", host, e)))?;

        let connector = TlsConnector::from(tls_config()?);
        let tls = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| RotatifyError::Tls(format!("handshake with {} failed: {}", host, e)))?;

        Ok(Box::new(tls))
    }
}

static TLS_CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();

/// Shared client TLS configuration backed by the webpki root set
fn tls_config() -> Result<Arc<rustls::ClientConfig>> {
    if let Some(config) = TLS_CONFIG.get() {
        return Ok(config.clone());
    }

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RotatifyError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TLS_CONFIG.get_or_init(|| Arc::new(config)).clone())
}
