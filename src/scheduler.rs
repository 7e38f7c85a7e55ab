//! Daily task scheduling: "run this at HH:MM every day, forever".
//!
//! Each registered task gets its own long-lived tokio loop.  The next fire
//! time is always anchored to the *intended* previous fire time plus 24
//! hours, never to when the task actually finished, so a slow run does not
//! drift the schedule.  Task errors are caught here, logged, and never
//! cancel the recurrence.
//!
//! Occurrences that pass while the process is down are skipped outright;
//! after a restart the next fire is computed purely from the current wall
//! clock.  There is deliberately no catch-up logic.

use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveTime, TimeDelta, TimeZone};
use tokio::task::JoinHandle;

use crate::mlog;

/// Result type for scheduled task bodies.
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The time-of-day string was not valid `HH:MM`.
    InvalidTime(String),
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::InvalidTime(s) => write!(f, "invalid time of day: {s:?}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Owns the timer loops for every registered daily task.
///
/// Constructed once at process start and passed by reference to whatever
/// registers tasks.  Tasks are not cancellable at runtime; dropping the
/// scheduler (process shutdown) abandons the pending timers.
pub struct Scheduler {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register `task` to run every day at `time_of_day` (`"HH:MM"`, local
    /// wall clock).  The first run happens today if that time is still
    /// ahead, otherwise tomorrow; a computed delay of zero fires
    /// immediately.
    ///
    /// Independently registered tasks run without mutual exclusion; two
    /// tasks sharing a fire time must not assume any ordering relative to
    /// each other.
    pub fn schedule_daily<F>(
        &self,
        name: &str,
        time_of_day: &str,
        task: F,
    ) -> Result<(), ScheduleError>
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        let time = parse_time_of_day(time_of_day)?;
        let first = next_occurrence(Local::now(), time);
        mlog!(
            "scheduler: registered {name:?} daily at {time_of_day}, first run {}",
            first.format("%Y-%m-%d %H:%M")
        );
        let handle = tokio::spawn(run_recurring(
            name.to_string(),
            first,
            TimeDelta::days(1),
            task,
        ));
        self.push_handle(handle);
        Ok(())
    }

    /// Number of registered task loops.
    pub fn task_count(&self) -> usize {
        match self.handles.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn push_handle(&self, handle: JoinHandle<()>) {
        match self.handles.lock() {
            Ok(mut guard) => guard.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }
}

/// Parse a strict `"HH:MM"` time-of-day string.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ScheduleError> {
    let (hh, mm) = s
        .split_once(':')
        .ok_or_else(|| ScheduleError::InvalidTime(s.to_string()))?;
    if hh.len() != 2 || mm.len() != 2 {
        return Err(ScheduleError::InvalidTime(s.to_string()));
    }
    let hour: u32 = hh
        .parse()
        .map_err(|_| ScheduleError::InvalidTime(s.to_string()))?;
    let minute: u32 = mm
        .parse()
        .map_err(|_| ScheduleError::InvalidTime(s.to_string()))?;
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| ScheduleError::InvalidTime(s.to_string()))
}

/// Next wall-clock occurrence of `time` at or after `now`: today if the
/// time has not passed yet, otherwise the same time tomorrow.
pub fn next_occurrence(now: DateTime<Local>, time: NaiveTime) -> DateTime<Local> {
    let today = now.date_naive().and_time(time);
    let candidate = resolve_local(today, now);
    if candidate < now {
        resolve_local(today + TimeDelta::days(1), now)
    } else {
        candidate
    }
}

/// Resolve a naive local datetime, falling back to `fallback` if the
/// wall-clock time does not exist (DST gap).
fn resolve_local(dt: chrono::NaiveDateTime, fallback: DateTime<Local>) -> DateTime<Local> {
    Local.from_local_datetime(&dt).earliest().unwrap_or(fallback)
}

/// Timer loop shared by all registered tasks.  `target` advances by
/// `period` after every run regardless of how the run went.
async fn run_recurring<F>(name: String, mut target: DateTime<Local>, period: TimeDelta, task: F)
where
    F: Fn() -> TaskResult + Send + Sync + 'static,
{
    loop {
        let wait = (target - Local::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(wait).await;

        match task() {
            Ok(()) => mlog!("scheduler: task {name:?} completed"),
            Err(e) => mlog!("scheduler: task {name:?} failed: {e}"),
        }

        // Anchor the next run to the intended fire time, not to completion.
        target = target + period;
    }
}
