//! In-process scheduler.
//!
//! One cooperative task fires `execute_due` at the configured local time
//! each day in the business timezone, DST-aware. A lightweight health tick
//! refreshes a status snapshot every five minutes. Fires are never
//! replayed: when the process wakes past a fire time by more than the grace
//! window (a laptop lid, a VM pause), the tick is skipped and the next
//! day's fire is scheduled instead.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::constants::scheduler::{HEALTH_TICK_SECS, MISSED_FIRE_GRACE_SECS};
use crate::engine::OrderEngine;
use crate::error::{Error, Result};

/// Point-in-time scheduler status for operator surfaces.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    /// Next scheduled fire instant.
    pub next_fire: Option<DateTime<Utc>>,
    /// Instant of the most recent health tick.
    pub last_health_tick: Option<DateTime<Utc>>,
}

/// Daily trigger loop over the order engine.
pub struct Scheduler {
    engine: Arc<OrderEngine>,
    fire_time: NaiveTime,
    tz: Tz,
    status: Arc<Mutex<SchedulerStatus>>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    /// Build a scheduler firing at `fire_time` local to `tz`.
    pub fn new(
        engine: Arc<OrderEngine>,
        fire_time: NaiveTime,
        tz: Tz,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            fire_time,
            tz,
            status: Arc::new(Mutex::new(SchedulerStatus::default())),
            shutdown,
        }
    }

    /// Shared status handle for the HTTP surface and the supervisor.
    pub fn status_handle(&self) -> Arc<Mutex<SchedulerStatus>> {
        self.status.clone()
    }

    /// Run the trigger loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        let mut health = tokio::time::interval(StdDuration::from_secs(HEALTH_TICK_SECS));
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let next = next_fire_after(Utc::now(), self.fire_time, self.tz);
            self.status
                .lock()
                .expect("status lock poisoned")
                .next_fire = Some(next);

            let until_next = (next - Utc::now())
                .to_std()
                .unwrap_or(StdDuration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(until_next) => {
                    let now = Utc::now();
                    if now - next > Duration::seconds(MISSED_FIRE_GRACE_SECS) {
                        tracing::warn!(scheduled = %next, woke = %now, "fire window missed, skipping tick");
                        continue;
                    }
                    tracing::info!(scheduled = %next, "scheduler fire");
                    match self.engine.execute_due(now).await {
                        Ok(report) => {
                            tracing::info!(
                                total = report.total(),
                                placed = report.success_count(),
                                "scheduled run complete"
                            );
                        }
                        Err(Error::Busy) => {
                            tracing::warn!("scheduled run skipped, another run is in flight");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "scheduled run failed");
                            return Err(e);
                        }
                    }
                }
                _ = health.tick() => {
                    self.health_tick();
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("scheduler shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn health_tick(&self) {
        let mut status = self.status.lock().expect("status lock poisoned");
        status.last_health_tick = Some(Utc::now());
        tracing::trace!(next_fire = ?status.next_fire, "health tick");
    }
}

/// The next instant strictly after `now` at which the daily fire occurs.
///
/// Local times that don't exist (spring-forward gap) slide one hour later;
/// ambiguous local times (fall-back) resolve to the earlier instant.
pub fn next_fire_after(now: DateTime<Utc>, fire_time: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();
    if local_now.time() >= fire_time {
        date = date.succ_opt().expect("date out of range");
    }

    loop {
        match tz.from_local_datetime(&date.and_time(fire_time)) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => {
                let shifted = date.and_time(fire_time) + Duration::hours(1);
                if let LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) =
                    tz.from_local_datetime(&shifted)
                {
                    return dt.with_timezone(&Utc);
                }
                date = date.succ_opt().expect("date out of range");
            }
        }
    }
}
