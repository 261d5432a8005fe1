//! Background scheduling of sync cycles.
//!
//! The scheduler runs a cycle on start, then again every `interval_secs` or
//! whenever it is triggered. Network failures are retried with exponential
//! backoff; after `max_retries` consecutive failures the state becomes
//! [`SyncState::Error`] and the normal interval resumes.
//!
//! `run` must be awaited on the caller's task (for example inside
//! `tokio::select!` or `tokio::join!`) since remote futures are not `Send`.

use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::mutation::MutationContext;
use crate::state::SyncState;

use super::reconciler::{CancelHandle, SyncReconciler, SyncReport};
use super::remote::RemoteAuthority;

pub struct SyncScheduler<R> {
    reconciler: SyncReconciler<R>,
    ctx: MutationContext,
    config: SyncConfig,
    state: watch::Sender<SyncState>,
    report: watch::Sender<Option<SyncReport>>,
    trigger: Notify,
    cancel: CancelHandle,
}

impl<R: RemoteAuthority> SyncScheduler<R> {
    pub fn new(reconciler: SyncReconciler<R>, ctx: MutationContext, config: SyncConfig) -> Self {
        Self {
            reconciler,
            ctx,
            config,
            state: watch::Sender::new(SyncState::Offline),
            report: watch::Sender::new(None),
            trigger: Notify::new(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Observe reports of completed cycles
    pub fn reports(&self) -> watch::Receiver<Option<SyncReport>> {
        self.report.subscribe()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.report.borrow().clone()
    }

    /// Start a cycle now instead of waiting for the interval
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Cancel the running cycle and stop `run`
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.trigger.notify_one();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a single cycle and publish the resulting state.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.state.send_replace(SyncState::Syncing);
        let result = self
            .reconciler
            .run_cycle(&self.ctx, &self.config.tables, &self.cancel)
            .await;

        match &result {
            Ok(report) => {
                self.state.send_replace(SyncState::Synced);
                self.report.send_replace(Some(report.clone()));
            }
            Err(Error::NetworkFailure(_) | Error::Cancelled) => {
                self.state.send_replace(SyncState::Offline);
            }
            Err(_) => {
                self.state.send_replace(SyncState::Error);
            }
        }
        result
    }

    /// Schedule cycles until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<()> {
        info!(
            tables = self.config.tables.len(),
            interval_secs = self.config.interval_secs,
            "Sync scheduler started"
        );
        let mut failures = 0_u32;

        while !self.is_shut_down() {
            let delay = match self.sync_now().await {
                Ok(_) => {
                    failures = 0;
                    self.config.interval()
                }
                Err(Error::Cancelled) => break,
                Err(Error::NetworkFailure(message)) => {
                    failures += 1;
                    self.after_network_failure(failures, &message)
                }
                Err(error) => {
                    error!(%error, "Sync cycle failed");
                    self.config.interval()
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.trigger.notified() => {}
            }
        }

        self.state.send_replace(SyncState::Offline);
        info!("Sync scheduler stopped");
        Ok(())
    }

    fn after_network_failure(&self, failures: u32, message: &str) -> Duration {
        if failures > self.config.max_retries {
            error!(failures, "Giving up on retries until the next interval: {message}");
            self.state.send_replace(SyncState::Error);
            return self.config.interval();
        }
        let delay = self.config.retry_delay(failures);
        warn!(
            failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Sync failed, retrying: {message}"
        );
        delay
    }
}
