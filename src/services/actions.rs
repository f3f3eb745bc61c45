//! Per-tick action hooks

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::client::BoundClient;
use crate::error::Result;

/// Work performed once per rotation tick.
///
/// Runs on the transport that was active before the tick rotates. The client
/// is only borrowed for the call; keep nothing from it afterwards, the next
/// rotation follows right after `run` returns.
#[async_trait]
pub trait TickAction: Send + Sync {
    /// Do one unit of work against `target`; the returned text is reported
    async fn run(&self, client: &BoundClient, target: &Url) -> Result<String>;

    /// Get the action name
    fn name(&self) -> &'static str;
}

/// GET the target and report the response body
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchBodyAction;

#[async_trait]
impl TickAction for FetchBodyAction {
    async fn run(&self, client: &BoundClient, target: &Url) -> Result<String> {
        let response = client.get(target.as_str()).await?;
        debug!(
            status = %response.status,
            transport = %client.transport(),
            "Fetched {}",
            target
        );
        Ok(response.text())
    }

    fn name(&self) -> &'static str {
        "fetch_body"
    }
}

/// Rotate only
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAction;

#[async_trait]
impl TickAction for NoopAction {
    async fn run(&self, _client: &BoundClient, _target: &Url) -> Result<String> {
        Ok(String::new())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::client::ClientConfig;
    use crate::proxy::rotation::ActiveTransport;

    #[tokio::test]
    async fn test_fetch_body_reports_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\nConnection: close\r\n\r\n203.0.113")
                .await
                .unwrap();
        });

        let client = BoundClient::new(Arc::new(ActiveTransport::Direct), ClientConfig::default());
        let target = Url::parse(&format!("http://{}/", addr)).unwrap();

        let body = FetchBodyAction.run(&client, &target).await.unwrap();
        assert_eq!(body, "203.0.113");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_body_surfaces_connect_failure() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let client = BoundClient::new(Arc::new(ActiveTransport::Direct), ClientConfig::default());
        let target = Url::parse(&format!("http://{}/", addr)).unwrap();

        let err = FetchBodyAction.run(&client, &target).await.unwrap_err();
        assert!(err.is_transport_error());
    }

    #[tokio::test]
    async fn test_noop_action() {
        let client = BoundClient::new(Arc::new(ActiveTransport::Direct), ClientConfig::default());
        let target = Url::parse("http://unused.invalid/").unwrap();
        tokio_test::assert_ok!(NoopAction.run(&client, &target).await);
        assert_eq!(NoopAction.name(), "noop");
    }
}
