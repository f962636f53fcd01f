//! Reset Scheduler
//!
//! Periodically returns completed recurring quests to pending once their
//! cooldown has run out. Daily quests reset on any sweep; weekly quests only
//! when the sweep runs on the anchor weekday (UTC).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::db::{self, Database};
use crate::error::Result;
use crate::quest::Recurrence;

/// Quests reset by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub daily: u64,
    pub weekly: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.daily + self.weekly
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ResetScheduler {
    db: Arc<Database>,
    interval: Duration,
    anchor: Weekday,
    running: Mutex<Option<Running>>,
}

impl ResetScheduler {
    pub fn new(db: Arc<Database>, interval: Duration, anchor: Weekday) -> Self {
        Self {
            db,
            interval,
            anchor,
            running: Mutex::new(None),
        }
    }

    /// Reset every expired quest as of `now` in a single transaction.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        sweep_expired(&self.db, self.anchor, now).await
    }

    /// Spawn the background sweep loop. A second call while running is a no-op.
    pub fn start(&self) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            warn!("Reset scheduler already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let db = Arc::clone(&self.db);
        let anchor = self.anchor;
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // A sweep that overruns a tick delays the next one instead of stacking
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match sweep_expired(&db, anchor, Utc::now()).await {
                            Ok(report) => debug!("Sweep finished: {:?}", report),
                            Err(e) => error!("Quest reset sweep failed: {}", e),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Reset scheduler stopped");
        });

        info!(
            "Reset scheduler started (every {:?}, weekly resets on {:?})",
            period, anchor
        );
        *running = Some(Running { shutdown, handle });
    }

    /// Stop the loop and wait for an in-flight sweep to finish.
    pub async fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(Running { shutdown, handle }) = running {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                error!("Reset scheduler task ended abnormally: {}", e);
            }
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        match self.running.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}

async fn sweep_expired(db: &Database, anchor: Weekday, now: DateTime<Utc>) -> Result<SweepReport> {
    let mut tx = db.begin().await?;

    let daily = db::reset_expired_quests(&mut tx, Recurrence::Daily, now).await?;
    let weekly = if now.weekday() == anchor {
        db::reset_expired_quests(&mut tx, Recurrence::Weekly, now).await?
    } else {
        0
    };

    tx.commit().await?;

    let report = SweepReport { daily, weekly };
    if report.total() > 0 {
        info!("Reset {} daily and {} weekly quest(s)", daily, weekly);
    }
    Ok(report)
}
