//! Periodic retention refresh.

use crate::flows::{RetentionOutcome, Services};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs `job` every `period`, starting one period from now, until the task is aborted.
///
/// A run that takes longer than `period` delays the next one rather than causing a burst.
pub fn spawn_periodic<F, Fut>(period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            job().await;
        }
    })
}

/// Spawns a task that refreshes retention data every `period`.
///
/// Runs without stored credentials are skipped, and failures are logged; neither stops the task.
pub fn spawn_retention_refresh_task(services: Arc<Services>, period: Duration) -> JoinHandle<()> {
    tracing::info!(period_secs = period.as_secs(), "scheduling retention refresh");
    spawn_periodic(period, move || {
        let services = Arc::clone(&services);
        async move {
            tracing::debug!("running scheduled retention refresh");
            match services.refresh_retention().await {
                Ok(RetentionOutcome::Updated { rows }) => {
                    tracing::info!(rows, "scheduled retention refresh finished");
                }
                Ok(RetentionOutcome::NotAuthorized) => {
                    tracing::info!("no stored credentials, skipping scheduled retention refresh");
                }
                Err(e) => {
                    tracing::error!("scheduled retention refresh failed: {e:?}");
                }
            }
        }
    })
}
