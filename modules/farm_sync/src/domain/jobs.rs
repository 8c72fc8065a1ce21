use std::fmt;

use chrono::{DateTime, Utc};

use crate::contract::{
    error::GatewayError,
    gateway::Entity,
    model::{Job, JobDraft, JobPatch, JobStatus},
};
use crate::domain::store::EntityStore;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

impl Entity for Job {
    type Draft = JobDraft;
    type Patch = JobPatch;

    const KIND: &'static str = "job";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate_draft(draft: &JobDraft) -> Result<(), GatewayError> {
        if draft.title.trim().is_empty() {
            return Err(GatewayError::validation("job title cannot be empty"));
        }
        Ok(())
    }

    fn validate_patch(patch: &JobPatch) -> Result<(), GatewayError> {
        match &patch.title {
            Some(title) if title.trim().is_empty() => {
                Err(GatewayError::validation("job title cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// How a job's end date relates to "now", as shown next to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueLabel {
    Remaining(i64),
    DueToday,
    Overdue(i64),
    Completed,
}

impl fmt::Display for DueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DueLabel::Remaining(days) => write!(f, "{days} days remaining"),
            DueLabel::DueToday => f.write_str("Due today"),
            DueLabel::Overdue(days) => write!(f, "{days} days overdue"),
            DueLabel::Completed => f.write_str("Completed"),
        }
    }
}

impl Job {
    /// Whole days until `end_date`, rounded up; negative once past.
    pub fn days_until_end(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.end_date - now).num_milliseconds() as f64;
        (millis / MILLIS_PER_DAY).ceil() as i64
    }

    pub fn due_label(&self, now: DateTime<Utc>) -> DueLabel {
        let days = self.days_until_end(now);
        match days {
            d if d < 0 && self.status == JobStatus::Completed => DueLabel::Completed,
            d if d < 0 => DueLabel::Overdue(d.abs()),
            0 => DueLabel::DueToday,
            d => DueLabel::Remaining(d),
        }
    }
}

impl EntityStore<Job> {
    /// Jobs currently in `Due` status, in store order.
    pub fn due_jobs(&self) -> Vec<Job> {
        self.snapshot()
            .items
            .into_iter()
            .filter(|job| job.status == JobStatus::Due)
            .collect()
    }
}
