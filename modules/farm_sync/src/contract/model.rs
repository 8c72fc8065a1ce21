use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `[longitude, latitude]`
pub type Position = [f64; 2];

/// Closed sequence of positions; the first ring of a polygon is its outer boundary.
pub type Ring = Vec<Position>;

/// Crop-type tag attached to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Category {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
        }
    }
}

/// An agricultural parcel. `area` is always in square meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    pub label: String,
    pub color: String,
    pub area: f64,
    pub coordinates: Vec<Ring>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Client-only marker while an update is in flight; never sent to the remote.
    #[serde(default)]
    pub is_updating: bool,
}

/// Field payload for creation; the remote assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDraft {
    pub label: String,
    pub color: String,
    pub area: f64,
    pub coordinates: Vec<Ring>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

/// Partial field update; `None` leaves the attribute untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPatch {
    pub label: Option<String>,
    pub color: Option<String>,
    pub area: Option<f64>,
    pub coordinates: Option<Vec<Ring>>,
    pub categories: Option<Vec<Category>>,
}

/// Job status as presented to users. The wire uses lowercase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Ongoing,
    Due,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownJobStatus(pub String);

impl JobStatus {
    pub const ALL: [JobStatus; 3] = [JobStatus::Ongoing, JobStatus::Due, JobStatus::Completed];

    /// Storage representation.
    pub fn as_wire(self) -> &'static str {
        match self {
            JobStatus::Ongoing => "ongoing",
            JobStatus::Due => "due",
            JobStatus::Completed => "completed",
        }
    }

    /// Parse any casing (`ongoing`, `ONGOING`, `Ongoing`).
    pub fn from_wire(raw: &str) -> Result<Self, UnknownJobStatus> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.as_wire().eq_ignore_ascii_case(raw))
            .ok_or_else(|| UnknownJobStatus(raw.to_string()))
    }

    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Ongoing => "Ongoing",
            JobStatus::Due => "Due",
            JobStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownJobStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s)
    }
}

/// Denormalized copy of a user embedded in a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// A scheduled agricultural task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: JobStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub assigned_to_id: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<UserSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    pub title: String,
    pub description: String,
    pub status: JobStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub assigned_to_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<JobStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    /// `Some(None)` removes the assignee; `None` leaves it untouched.
    #[serde(default, deserialize_with = "present_or_null")]
    pub assigned_to_id: Option<Option<String>>,
}

/// Keeps an explicit `null` distinct from an absent key.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Application user; `id` is the identity provider's subject id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<User> for UserSnapshot {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
        }
    }
}

/// Data for creating a user record. Unlike fields and jobs, the id is supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Location used by weather lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherLocation {
    pub lat: f64,
    pub lon: f64,
    pub name: String,
}

impl Default for WeatherLocation {
    fn default() -> Self {
        Self {
            lat: 38.4504,
            lon: 24.0036,
            name: "Athens, Greece".to_string(),
        }
    }
}
