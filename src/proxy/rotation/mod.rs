//! Proxy rotation state
//!
//! The proxy list and cursor live in [`RotationState`]; what requests
//! actually dial is described by [`ActiveTransport`].

mod round_robin;

pub use round_robin::RotationState;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::models::ProxyEndpoint;

/// Outbound connection mode currently used for requests
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "mode", content = "proxy", rename_all = "lowercase")]
pub enum ActiveTransport {
    /// No proxy, connect straight to the origin
    #[default]
    Direct,
    Proxy(ProxyEndpoint),
}

impl ActiveTransport {
    pub fn proxy(&self) -> Option<&ProxyEndpoint> {
        match self {
            ActiveTransport::Direct => None,
            ActiveTransport::Proxy(endpoint) => Some(endpoint),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, ActiveTransport::Direct)
    }
}

impl fmt::Display for ActiveTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveTransport::Direct => write!(f, "direct"),
            ActiveTransport::Proxy(endpoint) => write!(f, "{}", endpoint),
        }
    }
}

/// Consistent view of list, cursor and active transport, taken under the lock
#[derive(Debug, Clone, Serialize)]
pub struct RotationSnapshot {
    pub proxies: Vec<ProxyEndpoint>,
    pub cursor: usize,
    /// Changes every time the list is replaced
    pub generation: u64,
    pub active: Arc<ActiveTransport>,
}

impl RotationSnapshot {
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
