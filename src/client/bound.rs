//! HTTP/1.1 requests over one captured transport

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use tokio::time::timeout;
use tracing::{debug, instrument};
use url::{Position, Url};

use super::ClientConfig;
use crate::error::{Result, RotatifyError};
use crate::proxy::rotation::ActiveTransport;
use crate::proxy::transport::{ProxyTransport, Route, Target};

/// Fully read response
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Transport the request went out on
    pub transport: Arc<ActiveTransport>,
}

impl FetchedResponse {
    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client pinned to a single transport.
///
/// Handed to the action hook for the duration of one tick, and used by
/// [`RotatingClient::get`](super::RotatingClient::get) for one request.
/// Rotation never changes the transport of an existing `BoundClient`.
#[derive(Debug, Clone)]
pub struct BoundClient {
    transport: Arc<ActiveTransport>,
    config: ClientConfig,
}

impl BoundClient {
    pub fn new(transport: Arc<ActiveTransport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &ActiveTransport {
        &self.transport
    }

    pub async fn get(&self, url: &str) -> Result<FetchedResponse> {
        self.send(Method::GET, url, Bytes::new()).await
    }

    pub async fn send(&self, method: Method, url: &str, body: Bytes) -> Result<FetchedResponse> {
        let url = Url::parse(url)
            .map_err(|e| RotatifyError::InvalidTarget(format!("{}: {}", url, e)))?;
        self.execute(method, &url, body).await
    }

    #[instrument(skip(self, body), fields(transport = %self.transport, url = %url))]
    async fn execute(&self, method: Method, url: &Url, body: Bytes) -> Result<FetchedResponse> {
        let target = Target::from_url(url)?;
        let route = Route::for_target(&self.transport, &target);
        let stream =
            ProxyTransport::connect(&self.transport, &target, self.config.connect_timeout).await?;

        // Proxies in forward mode expect the absolute URL; everyone else gets
        // the origin form. Fragments are never sent.
        let uri = if route.uses_absolute_form() {
            &url[..Position::AfterQuery]
        } else {
            &url[Position::BeforePath..Position::AfterQuery]
        };

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(HOST, target.authority())
            .header(USER_AGENT, self.config.user_agent.as_str())
            .body(Full::new(body))
            .map_err(|e| RotatifyError::Http(format!("Failed to build request: {}", e)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RotatifyError::Http(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection ended: {}", e);
            }
        });

        let exchange = async {
            let response = sender
                .send_request(request)
                .await
                .map_err(|e| RotatifyError::Http(format!("Request failed: {}", e)))?;

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| RotatifyError::Http(format!("Failed to read response: {}", e)))?
                .to_bytes();

            Ok::<_, RotatifyError>((parts, body))
        };

        let (parts, body) = timeout(self.config.request_timeout, exchange)
            .await
            .map_err(|_| RotatifyError::Timeout)??;

        debug!(status = %parts.status, bytes = body.len(), "Response received");

        Ok(FetchedResponse {
            status: parts.status,
            headers: parts.headers,
            body,
            transport: self.transport.clone(),
        })
    }
}
