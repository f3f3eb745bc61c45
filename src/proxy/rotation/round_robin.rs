//! Round-robin proxy list and cursor

use super::ActiveTransport;
use crate::models::ProxyEndpoint;

/// Proxy list plus the cursor pointing at the next proxy to bind.
///
/// Always lives behind the client's mutex; list and cursor change together.
#[derive(Debug, Default)]
pub struct RotationState {
    proxies: Vec<ProxyEndpoint>,
    cursor: usize,
    /// Bumped on every list replacement
    generation: u64,
}

impl RotationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new list and restart from its first entry
    pub fn replace(&mut self, proxies: Vec<ProxyEndpoint>) {
        self.proxies = proxies;
        self.cursor = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Bind `proxies[cursor]`, then move the cursor on.
    ///
    /// An empty list yields a direct transport.
    pub fn advance(&mut self) -> ActiveTransport {
        if self.proxies.is_empty() {
            self.cursor = 0;
            return ActiveTransport::Direct;
        }

        let bound = self.proxies[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.proxies.len();
        ActiveTransport::Proxy(bound)
    }

    pub fn proxies(&self) -> &[ProxyEndpoint] {
        &self.proxies
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Identifies the current list; changes whenever the list is replaced
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
