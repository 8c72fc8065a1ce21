//! In-process simulated remote.
//!
//! Behaves like the hosted backend as far as the stores can observe it:
//! ids and timestamps are assigned here, patches merge only the provided
//! attributes, unknown ids on update are `NotFound` and deletes are idempotent.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::contract::{
    error::GatewayError,
    gateway::{AccessTokenSink, Entity, EntityGateway, UsersGateway},
    model::{
        Field, FieldDraft, FieldPatch, Job, JobDraft, JobPatch, NewUser, User, UserPatch,
        UserSnapshot,
    },
};

#[derive(Default)]
struct RemoteState {
    // insertion order; listings return newest first
    fields: Vec<Field>,
    jobs: Vec<Job>,
    users: Vec<User>,
    access_token: Option<String>,
    failures: VecDeque<GatewayError>,
}

impl RemoteState {
    fn take_failure(&mut self) -> Result<(), GatewayError> {
        match self.failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn snapshot_of(&self, user_id: Option<&str>) -> Option<UserSnapshot> {
        let id = user_id?;
        self.users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .map(UserSnapshot::from)
    }
}

#[derive(Default)]
pub struct InMemoryGateway {
    state: Mutex<RemoteState>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next gateway call (of any kind) fail with `error`. Calls queue up in order.
    pub fn fail_next(&self, error: GatewayError) {
        self.state.lock().failures.push_back(error);
    }

    /// Token most recently handed over by the session controller.
    pub fn access_token(&self) -> Option<String> {
        self.state.lock().access_token.clone()
    }

    pub fn field_count(&self) -> usize {
        self.state.lock().fields.len()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn users(&self) -> Vec<User> {
        self.state.lock().users.clone()
    }
}

fn newest_first<E: Clone>(items: &[E], owned: impl Fn(&E) -> bool) -> Vec<E> {
    items.iter().rev().filter(|e| owned(e)).cloned().collect()
}

fn remove_by_id<E: Entity>(items: &mut Vec<E>, id: &str) -> bool {
    let before = items.len();
    items.retain(|e| e.id() != id);
    items.len() != before
}

#[async_trait]
impl EntityGateway<Field> for InMemoryGateway {
    async fn list(&self, owner_id: &str) -> Result<Vec<Field>, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        Ok(newest_first(&s.fields, |f| f.owner_id.as_deref() == Some(owner_id)))
    }

    async fn create(
        &self,
        owner_id: Option<&str>,
        draft: FieldDraft,
    ) -> Result<Field, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let field = Field {
            id: Uuid::new_v4().to_string(),
            label: draft.label,
            color: draft.color,
            area: draft.area,
            coordinates: draft.coordinates,
            categories: draft.categories,
            owner_id: owner_id.map(str::to_string),
            is_updating: false,
        };
        debug!(id = %field.id, "memory: field created");
        s.fields.push(field.clone());
        Ok(field)
    }

    async fn update(&self, id: &str, patch: FieldPatch) -> Result<Field, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let field = s
            .fields
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| GatewayError::not_found(Field::KIND, id))?;

        if let Some(label) = patch.label {
            field.label = label;
        }
        if let Some(color) = patch.color {
            field.color = color;
        }
        if let Some(area) = patch.area {
            field.area = area;
        }
        if let Some(coordinates) = patch.coordinates {
            field.coordinates = coordinates;
        }
        if let Some(categories) = patch.categories {
            field.categories = categories;
        }
        Ok(field.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        if !remove_by_id(&mut s.fields, id) {
            debug!(%id, "memory: field already gone");
        }
        Ok(())
    }
}

#[async_trait]
impl EntityGateway<Job> for InMemoryGateway {
    async fn list(&self, owner_id: &str) -> Result<Vec<Job>, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        Ok(newest_first(&s.jobs, |j| j.owner_id.as_deref() == Some(owner_id)))
    }

    async fn create(&self, owner_id: Option<&str>, draft: JobDraft) -> Result<Job, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let now = Utc::now();
        let assigned_to = s.snapshot_of(draft.assigned_to_id.as_deref());
        let job = Job {
            id: Uuid::new_v4().to_string(),
            title: draft.title,
            description: draft.description,
            status: draft.status,
            start_date: draft.start_date,
            end_date: draft.end_date,
            location: draft.location,
            owner_id: owner_id.map(str::to_string),
            assigned_to_id: draft.assigned_to_id,
            assigned_to,
            created_at: now,
            updated_at: now,
        };
        debug!(id = %job.id, "memory: job created");
        s.jobs.push(job.clone());
        Ok(job)
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Job, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let assigned_to = patch
            .assigned_to_id
            .as_ref()
            .map(|user_id| s.snapshot_of(user_id.as_deref()));
        let job = s
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| GatewayError::not_found(Job::KIND, id))?;

        if let Some(title) = patch.title {
            job.title = title;
        }
        if let Some(description) = patch.description {
            job.description = description;
        }
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(start) = patch.start_date {
            job.start_date = start;
        }
        if let Some(end) = patch.end_date {
            job.end_date = end;
        }
        if let Some(location) = patch.location {
            job.location = Some(location);
        }
        if let Some(assignee) = patch.assigned_to_id {
            job.assigned_to_id = assignee;
            job.assigned_to = assigned_to.flatten();
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        if !remove_by_id(&mut s.jobs, id) {
            debug!(%id, "memory: job already gone");
        }
        Ok(())
    }
}

#[async_trait]
impl UsersGateway for InMemoryGateway {
    async fn list(&self) -> Result<Vec<User>, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        Ok(s.users.iter().rev().cloned().collect())
    }

    async fn find(&self, id: &str) -> Result<Option<User>, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        Ok(s.users.iter().find(|u| u.id == id).cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        if s.users.iter().any(|u| u.id == new_user.id) {
            return Err(GatewayError::validation(format!(
                "duplicate key value violates unique constraint: users.id = {}",
                new_user.id
            )));
        }
        let user = User {
            id: new_user.id,
            name: new_user.name,
            email: new_user.email,
        };
        s.users.push(user.clone());
        Ok(user)
    }

    async fn update(&self, id: &str, patch: UserPatch) -> Result<User, GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        let user = s
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| GatewayError::not_found("user", id))?;
        if let Some(name) = patch.name {
            user.name = name;
        }
        if let Some(email) = patch.email {
            user.email = email;
        }
        Ok(user.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        let mut s = self.state.lock();
        s.take_failure()?;
        s.users.retain(|u| u.id != id);
        Ok(())
    }
}

impl AccessTokenSink for InMemoryGateway {
    fn set_access_token(&self, token: Option<String>) {
        self.state.lock().access_token = token;
    }
}
