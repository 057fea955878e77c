use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, trace};

use crate::errors::{InternalError, Result};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Periodic housekeeping run by the scheduler.
#[async_trait]
pub trait Job: Send + Sync {
    /// Used in logs, "{name} failed" on error.
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

/// Runs `job` every `period`, the first time right away when `run_on_init`.
pub fn start_every(job: impl Job + 'static, period: Duration, run_on_init: bool) -> JoinHandle<()> {
    let start = if run_on_init {
        Instant::now()
    } else {
        Instant::now() + period
    };
    start_with_interval(job, interval_at(start, period))
}

/// Runs `job` every day at midnight UTC.
pub fn start_daily(job: impl Job + 'static) -> Result<JoinHandle<()>> {
    let interval = interval_at_next_midnight(Utc::now())?;
    Ok(start_with_interval(job, interval))
}

pub fn start_with_interval(job: impl Job + 'static, mut interval: Interval) -> JoinHandle<()> {
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::task::spawn(async move {
        loop {
            interval.tick().await;
            trace!(job = job.name(), "running scheduled job");
            if let Err(err) = job.run().await {
                error!("{} failed: {err}", job.name());
            }
        }
    })
}

fn until_next_midnight(now: DateTime<Utc>) -> Result<Duration> {
    let midnight = (now + chrono::Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .ok_or(anyhow!("failed to compute midnight"))?
        .and_utc();
    Ok((midnight - now).to_std().map_err(InternalError::from)?)
}

fn interval_at_next_midnight(now: DateTime<Utc>) -> Result<Interval> {
    let start = Instant::now() + until_next_midnight(now)?;
    Ok(interval_at(start, DAY))
}
