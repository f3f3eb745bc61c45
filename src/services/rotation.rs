//! Proxy rotation service
//!
//! Runs the timer loop of a [`RotatingClient`]: on every tick the action hook
//! runs against the current transport, its outcome is published as a
//! [`TickReport`], then the client rotates to the next proxy.
//!
//! - The action runs on a captured transport without holding the state lock,
//!   so `update_proxies` never waits behind slow I/O.
//! - Ticks that would overlap a running action are skipped, not queued.
//! - A tick whose action overlapped a list replacement does not rotate.
//! - Stopping is a sticky flag on a watch channel: it never blocks, and a
//!   stopped client cannot start rotating again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::actions::{FetchBodyAction, TickAction};
use crate::client::{BoundClient, RotatingClient};
use crate::error::{Result, RotatifyError};
use crate::models::{TickOutcome, TickReport};

/// Clears the running flag when the loop exits, however it exits
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RotatingClient {
    /// Rotate proxies every interval, fetching `target` on each tick.
    ///
    /// Runs until [`stop_rotate_proxies`](Self::stop_rotate_proxies) is
    /// called; spawn it on its own task.
    pub async fn start_rotate_proxies(&self, target: &str) -> Result<()> {
        self.start_rotate_proxies_with(target, Arc::new(FetchBodyAction))
            .await
    }

    /// Like [`start_rotate_proxies`](Self::start_rotate_proxies) with a
    /// caller-supplied action hook.
    #[instrument(skip(self, action), fields(action = action.name()))]
    pub async fn start_rotate_proxies_with(
        &self,
        target: &str,
        action: Arc<dyn TickAction>,
    ) -> Result<()> {
        let target = Url::parse(target)
            .map_err(|e| RotatifyError::InvalidTarget(format!("{}: {}", target, e)))?;

        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(RotatifyError::RotationStopped);
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RotatifyError::RotationAlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let period = self.rotate_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Starting proxy rotation every {:?} ({} proxies)",
            period,
            self.proxy_count()
        );

        let mut tick: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut shutdown) => {
                    info!("Proxy rotation stopping");
                    break;
                }
                _ = ticker.tick() => {
                    tick += 1;
                    if !self.run_tick(tick, action.as_ref(), &target, &mut shutdown).await {
                        info!("Proxy rotation stopped during tick {}", tick);
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Run the action for one tick, report it and rotate.
    ///
    /// When `update_proxies` swapped the list while the action ran, the new
    /// list is left on its first proxy instead of being rotated.
    ///
    /// Returns `false` when stop was requested while the action ran; the
    /// action is dropped and no rotation happens.
    async fn run_tick(
        &self,
        tick: u64,
        action: &dyn TickAction,
        target: &Url,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let (transport, generation) = {
            let state = self.state.lock();
            (self.active.load_full(), state.generation())
        };
        let client = BoundClient::new(transport.clone(), self.config.clone());

        let outcome = tokio::select! {
            biased;
            _ = wait_for_stop(shutdown) => return false,
            result = timeout(self.config.action_timeout, action.run(&client, target)) => {
                match result {
                    Ok(Ok(output)) => TickOutcome::Completed { output },
                    Ok(Err(e)) => TickOutcome::Failed { error: e.to_string() },
                    Err(_) => TickOutcome::TimedOut,
                }
            }
        };

        match &outcome {
            TickOutcome::Completed { .. } => {
                debug!(tick, transport = %transport, "Tick action completed");
            }
            TickOutcome::Failed { error } => {
                warn!(tick, transport = %transport, "Tick action failed: {}", error);
            }
            TickOutcome::TimedOut => {
                warn!(
                    tick,
                    transport = %transport,
                    "Tick action timed out after {:?}",
                    self.config.action_timeout
                );
            }
        }

        if self.reports.receiver_count() > 0 {
            if let Err(e) = self.reports.send(TickReport::new(tick, transport, outcome)) {
                debug!("Tick report dropped: {}", e);
            }
        }

        let mut state = self.state.lock();
        if state.generation() != generation {
            // The list was replaced mid-action and its first proxy is already
            // bound; it gets the next tick.
            debug!(tick, "Proxy list replaced during tick, rotation skipped");
        } else {
            self.rotate_active_proxy(&mut state);
        }
        true
    }

    /// Ask the rotation loop to stop.
    ///
    /// Never blocks and may be called any number of times from any task.
    /// Stopping is permanent: a later start returns
    /// [`RotatifyError::RotationStopped`].
    pub fn stop_rotate_proxies(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Whether a rotation loop is currently running
    pub fn is_rotating(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

async fn wait_for_stop(shutdown: &mut watch::Receiver<bool>) {
    // The sender lives as long as the client, so an error never happens while
    // the loop runs; treat it as a stop anyway.
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
