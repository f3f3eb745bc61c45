use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::proxy::rotation::ActiveTransport;

/// Result of running the action hook for one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickOutcome {
    Completed { output: String },
    Failed { error: String },
    TimedOut,
}

impl TickOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TickOutcome::Completed { .. })
    }
}

/// Published once per tick on the client's report channel
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// 1-based tick number since the loop started
    pub tick: u64,
    pub at: DateTime<Utc>,
    /// Transport the action ran on (active before this tick's rotation)
    pub transport: Arc<ActiveTransport>,
    pub outcome: TickOutcome,
}

impl TickReport {
    pub fn new(tick: u64, transport: Arc<ActiveTransport>, outcome: TickOutcome) -> Self {
        Self {
            tick,
            at: Utc::now(),
            transport,
            outcome,
        }
    }
}
