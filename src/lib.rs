//! Rotatify - Proxy-Rotating HTTP Client
//!
//! An HTTP client that switches its upstream proxy on a fixed interval.
//!
//! ## Features
//!
//! - Strict round-robin over a proxy list that can be replaced at any time
//! - HTTP, HTTPS, SOCKS5 and SOCKS5h proxy support
//! - Background rotation loop with a pluggable per-tick action
//! - Non-blocking, permanent stop
//! - Per-tick reports on a broadcast channel instead of fatal errors

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod services;

pub use client::{BoundClient, ClientConfig, FetchedResponse, RotatingClient};
pub use config::Config;
pub use error::{Result, RotatifyError};
pub use models::{ProxyEndpoint, ProxyProtocol, TickOutcome, TickReport};
pub use proxy::{ActiveTransport, RotationSnapshot};
pub use services::{FetchBodyAction, NoopAction, TickAction};
