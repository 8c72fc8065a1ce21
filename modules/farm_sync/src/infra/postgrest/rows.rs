//! Table rows as the backend stores them (snake_case, lowercase status, ISO timestamps).

use serde::{Deserialize, Serialize};

use crate::contract::model::{Category, Ring};

#[derive(Debug, Clone, Deserialize)]
pub struct FieldRow {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub label: String,
    pub color: String,
    pub area: f64,
    pub coordinates: Vec<Ring>,
    #[serde(default)]
    pub categories: Option<Vec<Category>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldInsert {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub label: String,
    pub color: String,
    pub area: f64,
    pub coordinates: Vec<Ring>,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Vec<Ring>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<Category>>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobRow {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub assigned_to_id: Option<String>,
    /// Present only when the select embeds the assignee.
    #[serde(default)]
    pub assigned_to: Option<UserRow>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInsert {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: &'static str,
    pub start_date: String,
    pub end_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// `Some(None)` is sent as `null` and unassigns the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to_id: Option<Option<String>>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Error body returned by PostgREST alongside non-2xx statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostgrestErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl PostgrestErrorBody {
    /// `message (details; hint: hint)`, skipping whatever the backend left out.
    pub fn describe(&self) -> Option<String> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        };
        let message = present(&self.message)?;

        let mut extra = Vec::new();
        if let Some(details) = present(&self.details) {
            extra.push(details);
        }
        if let Some(hint) = present(&self.hint) {
            extra.push(format!("hint: {hint}"));
        }

        Some(if extra.is_empty() {
            message
        } else {
            format!("{message} ({})", extra.join("; "))
        })
    }
}
