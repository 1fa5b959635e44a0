//! Schedule definitions and next-run math.

use crate::job::JobKind;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Schedule parsing/evaluation errors.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The cron expression did not parse.
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// A day interval must be at least one day.
    #[error("invalid interval: {0} days")]
    InvalidInterval(u32),
}

/// When a schedule fires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Standard cron expression (five fields; a seconds field is accepted).
    Cron(String),
    /// Every N days from the previous fire.
    EveryDays(u32),
}

/// Parses a cron expression.
///
/// The `cron` crate wants a leading seconds field; classic five-field
/// expressions get `0 ` prepended so `"0 2 * * *"` means 02:00:00 daily.
pub fn parse_cron(expression: &str) -> Result<Schedule, ScheduleError> {
    let field_count = expression.split_whitespace().count();
    let normalized = if field_count == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// One scheduled job definition, owned by the scheduler.
#[derive(Clone, Debug)]
pub struct ScheduleDefinition {
    pub id: String,
    pub name: String,
    /// Kind of job the schedule creates.
    pub kind: JobKind,
    pub trigger: Trigger,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    /// When the schedule fires next. `None` means due on the next pass.
    pub next_run: Option<DateTime<Utc>>,
    /// Repositories that each get a job when the schedule fires.
    pub repositories: Vec<String>,
    /// Source paths for backup schedules.
    pub source_paths: Vec<PathBuf>,
    /// Cancel the created job if it runs longer than this.
    pub max_duration: Option<Duration>,
    pub notify_on_success: bool,
    pub notify_on_failure: bool,
}

impl ScheduleDefinition {
    /// Creates an enabled definition that notifies on failure only.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: JobKind,
        trigger: Trigger,
        repositories: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            trigger,
            enabled: true,
            last_run: None,
            next_run: None,
            repositories,
            source_paths: Vec::new(),
            max_duration: None,
            notify_on_success: false,
            notify_on_failure: true,
        }
    }

    /// True when the schedule should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.map_or(true, |next| next <= now)
    }

    /// Computes the fire time following `after`.
    pub fn compute_next_run(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match &self.trigger {
            Trigger::Cron(expression) => {
                let schedule = parse_cron(expression)?;
                Ok(schedule.after(&after).next())
            }
            Trigger::EveryDays(0) => Err(ScheduleError::InvalidInterval(0)),
            Trigger::EveryDays(days) => Ok(Some(after + ChronoDuration::days(i64::from(*days)))),
        }
    }
}

/// The scheduler's set of definitions.
///
/// Mutated only through these update operations; the cron trigger reads due
/// definitions and records fires through the same surface.
#[derive(Clone, Default)]
pub struct ScheduleSet {
    inner: Arc<RwLock<HashMap<String, ScheduleDefinition>>>,
}

impl ScheduleSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a definition.
    pub fn upsert(&self, definition: ScheduleDefinition) {
        self.inner
            .write()
            .insert(definition.id.clone(), definition);
    }

    /// Removes a definition. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.inner.write().remove(id).is_some()
    }

    /// Enables or disables a definition. Returns true if it existed.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.inner.write().get_mut(id) {
            Some(definition) => {
                definition.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Snapshot of one definition.
    pub fn get(&self, id: &str) -> Option<ScheduleDefinition> {
        self.inner.read().get(id).cloned()
    }

    /// Snapshot of all definitions.
    pub fn all(&self) -> Vec<ScheduleDefinition> {
        let mut definitions: Vec<_> = self.inner.read().values().cloned().collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    /// Snapshot of definitions due at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ScheduleDefinition> {
        let mut due: Vec<_> = self
            .inner
            .read()
            .values()
            .filter(|definition| definition.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.id.cmp(&b.id));
        due
    }

    /// Records a fire: sets `last_run` and the recomputed `next_run`.
    pub fn record_fire(
        &self,
        id: &str,
        fired_at: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) {
        if let Some(definition) = self.inner.write().get_mut(id) {
            definition.last_run = Some(fired_at);
            definition.next_run = next_run;
        }
    }
}
