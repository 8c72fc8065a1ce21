use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use runtime::AreaUnit;

use crate::contract::{
    error::GatewayError,
    model::{
        Field, FieldDraft, FieldPatch, Job, JobDraft, JobPatch, JobStatus, NewUser, User,
        UserPatch, UserSnapshot,
    },
};

use super::rows::{
    FieldInsert, FieldRow, FieldUpdate, JobInsert, JobRow, JobUpdate, UserRow, UserUpdate,
};

/// Convert a fields row into the core model, normalizing `area` to square meters.
pub fn field_from_row(row: FieldRow, unit: AreaUnit) -> Field {
    Field {
        id: row.id,
        label: row.label,
        color: row.color,
        area: unit.to_square_meters(row.area),
        coordinates: row.coordinates,
        categories: row.categories.unwrap_or_default(),
        owner_id: row.user_id,
        is_updating: false,
    }
}

pub fn field_insert(owner_id: Option<&str>, draft: FieldDraft, unit: AreaUnit) -> FieldInsert {
    FieldInsert {
        user_id: owner_id.map(str::to_string),
        label: draft.label,
        color: draft.color,
        area: unit.from_square_meters(draft.area),
        coordinates: draft.coordinates,
        categories: draft.categories,
    }
}

pub fn field_update(patch: FieldPatch, unit: AreaUnit, now: DateTime<Utc>) -> FieldUpdate {
    FieldUpdate {
        label: patch.label,
        color: patch.color,
        area: patch.area.map(|a| unit.from_square_meters(a)),
        coordinates: patch.coordinates,
        categories: patch.categories,
        updated_at: format_timestamp(now),
    }
}

pub fn job_from_row(row: JobRow) -> Result<Job, GatewayError> {
    let status = JobStatus::from_wire(&row.status)
        .map_err(|e| GatewayError::transport(format!("job {}: {e}", row.id)))?;

    Ok(Job {
        status,
        start_date: parse_timestamp("start_date", &row.start_date)?,
        end_date: parse_timestamp("end_date", &row.end_date)?,
        created_at: parse_timestamp("created_at", &row.created_at)?,
        updated_at: parse_timestamp("updated_at", &row.updated_at)?,
        title: row.title,
        description: row.description.unwrap_or_default(),
        location: row.location,
        owner_id: row.user_id,
        assigned_to_id: row.assigned_to_id,
        assigned_to: row.assigned_to.map(|u| UserSnapshot::from(user_from_row(u))),
        id: row.id,
    })
}

pub fn job_insert(owner_id: Option<&str>, draft: JobDraft) -> JobInsert {
    JobInsert {
        user_id: owner_id.map(str::to_string),
        title: draft.title,
        description: draft.description,
        status: draft.status.as_wire(),
        start_date: format_timestamp(draft.start_date),
        end_date: format_timestamp(draft.end_date),
        location: draft.location,
        assigned_to_id: draft.assigned_to_id,
    }
}

pub fn job_update(patch: JobPatch, now: DateTime<Utc>) -> JobUpdate {
    JobUpdate {
        title: patch.title,
        description: patch.description,
        status: patch.status.map(JobStatus::as_wire),
        start_date: patch.start_date.map(format_timestamp),
        end_date: patch.end_date.map(format_timestamp),
        location: patch.location,
        assigned_to_id: patch.assigned_to_id,
        updated_at: format_timestamp(now),
    }
}

pub fn user_from_row(row: UserRow) -> User {
    User {
        id: row.id,
        name: row.name,
        email: row.email,
    }
}

pub fn user_insert(new_user: NewUser) -> UserRow {
    UserRow {
        id: new_user.id,
        name: new_user.name,
        email: new_user.email,
    }
}

pub fn user_update(patch: UserPatch) -> UserUpdate {
    UserUpdate {
        name: patch.name,
        email: patch.email,
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339, `timestamp without time zone` (taken as UTC) and plain dates.
pub fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, GatewayError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    // Postgres text form uses a short offset ("+00") that RFC 3339 rejects
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }
    Err(GatewayError::transport(format!(
        "unparseable {column} timestamp '{raw}'"
    )))
}
