//! Proxy plumbing
//!
//! This module provides:
//! - Round-robin rotation state and the active transport
//! - Connections through HTTP (forward and CONNECT) and SOCKS5 proxies

pub mod rotation;
pub mod transport;

pub use rotation::{ActiveTransport, RotationSnapshot, RotationState};
pub use transport::{ProxyTransport, Route, Target};
