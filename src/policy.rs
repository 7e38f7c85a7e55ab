//! Nightly policy sweeps over account and report state.
//!
//! Two bulk tasks registered with the [`Scheduler`]: a reminder sweep for
//! students who have not filed a report today, and an auto-suspension sweep
//! that reactivates old suspensions and suspends accounts sitting on stale
//! pending reports.
//!
//! Neither sweep carries a de-duplication guard of its own: the scheduler
//! firing at most once per calendar day is the sole idempotence mechanism.
//! A sweep that fails partway is logged at the scheduler boundary and simply
//! waits for tomorrow's run.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Local;
use serde_json::json;

use crate::hub::Hub;
use crate::mlog;
use crate::scheduler::{ScheduleError, Scheduler};
use crate::store::{local_day_bounds, DataStore, StoreError, UserStatus};

/// Default sweep times, overridable at the registration call site.
pub const DEFAULT_REMINDER_AT: &str = "23:00";
pub const DEFAULT_SUSPENSION_AT: &str = "02:00";

/// Default reactivation threshold; overridden by `SUSPEND_DURATION_DAYS`.
pub const DEFAULT_SUSPEND_DURATION_DAYS: i64 = 7;

/// A PENDING report older than this suspends its owner.
pub const STALE_REPORT_DAYS: i64 = 30;

pub const REMINDER_KIND: &str = "REMINDER";
pub const REMINDER_CONTENT: &str =
    "You have not submitted a study report today. Please file one before midnight.";

/// Reports a student may create per local calendar day.  Counted against
/// the durable Report table, not the in-memory governor, so the cap holds
/// across restarts and across multiple server processes.
pub const DAILY_REPORT_LIMIT: u32 = 3;

const SECS_PER_DAY: i64 = 86_400;

/// How many of today's report submissions `student_id` has left.
pub fn reports_remaining_today(
    store: &dyn DataStore,
    student_id: &str,
) -> Result<u32, StoreError> {
    let (start, end) = local_day_bounds(Local::now());
    let used = store.count_reports_between(student_id, start, end)?;
    Ok(DAILY_REPORT_LIMIT.saturating_sub(used))
}

/// Owns the two nightly sweeps.  Constructed once at process start and
/// registered with the scheduler; sweeps run on the scheduler's timer
/// loops, never on a request path.
pub struct PolicyEngine {
    store: Arc<dyn DataStore>,
    hub: Hub,
    suspend_duration_days: i64,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn DataStore>, hub: Hub, suspend_duration_days: i64) -> Self {
        Self {
            store,
            hub,
            suspend_duration_days,
        }
    }

    /// Register both sweeps with `scheduler` at the given times of day.
    pub fn register(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        reminder_at: &str,
        suspension_at: &str,
    ) -> Result<(), ScheduleError> {
        let engine = self.clone();
        scheduler.schedule_daily("reminder-sweep", reminder_at, move || {
            engine.reminder_sweep()?;
            Ok(())
        })?;

        let engine = self.clone();
        scheduler.schedule_daily("suspension-sweep", suspension_at, move || {
            engine.suspension_sweep()?;
            Ok(())
        })?;
        Ok(())
    }

    /// Create one REMINDER notification for every ACTIVE user who has not
    /// created a report inside `[startOfToday, endOfToday)`, and push it to
    /// the user's realtime room.  Returns the number of notifications
    /// created; an empty candidate set performs no writes.
    pub fn reminder_sweep(&self) -> Result<usize, StoreError> {
        let now = Local::now();
        let (start, end) = local_day_bounds(now);

        let active = self.store.active_users()?;
        let reported = self.store.student_ids_with_report_between(start, end)?;

        let mut created = 0;
        for user in active {
            if reported.contains(&user.id) {
                continue;
            }
            let notification = self.store.create_notification(
                &user.id,
                REMINDER_KIND,
                REMINDER_CONTENT,
                now.timestamp(),
            )?;
            self.hub.notify_user(
                &user.id,
                &json!({
                    "type": "notification",
                    "id": notification.id,
                    "kind": notification.kind,
                    "content": notification.content,
                    "created_at": notification.created_at,
                }),
            );
            created += 1;
        }
        mlog!("sweep: created {created} reminder(s)");
        Ok(created)
    }

    /// Evaluate the reactivation and suspension rules against one
    /// pre-sweep snapshot, then apply both as bulk writes.
    ///
    /// Because both rule inputs are read before either write, execution
    /// order cannot change which users each rule selects.  A user matching
    /// both rules (an old suspension plus a still-stale pending report)
    /// ends the sweep SUSPENDED, with a fresh `suspended_at`.
    ///
    /// Returns `(reactivated, suspended)` row counts.
    pub fn suspension_sweep(&self) -> Result<(usize, usize), StoreError> {
        let now = Local::now().timestamp();

        // Consistent snapshot for both rules.
        let users = self.store.all_users()?;
        let stale_cutoff = now - STALE_REPORT_DAYS * SECS_PER_DAY;
        let stale_reporters = self
            .store
            .student_ids_with_pending_report_before(stale_cutoff)?;

        let reactivation_cutoff = now - self.suspend_duration_days * SECS_PER_DAY;
        let to_reactivate: Vec<String> = users
            .iter()
            .filter(|u| matches!(u.suspended_at, Some(at) if at < reactivation_cutoff))
            .map(|u| u.id.clone())
            .collect();

        let to_suspend: Vec<String> = users
            .iter()
            .filter(|u| stale_reporters.contains(&u.id))
            .map(|u| u.id.clone())
            .collect();

        let reactivated = if to_reactivate.is_empty() {
            0
        } else {
            self.store.set_users_active(&to_reactivate)?
        };
        let suspended = if to_suspend.is_empty() {
            0
        } else {
            self.store.set_users_suspended(&to_suspend, now)?
        };

        mlog!("sweep: reactivated {reactivated}, suspended {suspended}");
        Ok((reactivated, suspended))
    }

    pub fn suspend_duration_days(&self) -> i64 {
        self.suspend_duration_days
    }
}
