#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use farm_sync::contract::{
    error::GatewayError,
    gateway::EntityGateway,
    model::{Category, Field, FieldDraft, FieldPatch, Ring},
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

pub fn square() -> Vec<Ring> {
    vec![vec![
        [23.70, 37.97],
        [23.71, 37.97],
        [23.71, 37.98],
        [23.70, 37.98],
        [23.70, 37.97],
    ]]
}

pub fn field_draft(label: &str) -> FieldDraft {
    FieldDraft {
        label: label.to_string(),
        color: "#4CAF50".to_string(),
        area: 12_000.0,
        coordinates: square(),
        categories: vec![Category::new("Wheat")],
    }
}

pub fn field(id: &str, label: &str) -> Field {
    let draft = field_draft(label);
    Field {
        id: id.to_string(),
        label: draft.label,
        color: draft.color,
        area: draft.area,
        coordinates: draft.coordinates,
        categories: draft.categories,
        owner_id: Some("user_1".to_string()),
        is_updating: false,
    }
}

/// Field gateway whose answers are scripted by the test. When gated, every call
/// parks until the test calls `release`.
pub struct ScriptedFields {
    pub list_response: Mutex<Result<Vec<Field>, GatewayError>>,
    pub next_ids: Mutex<VecDeque<String>>,
    pub update_error: Mutex<Option<GatewayError>>,
    pub delete_error: Mutex<Option<GatewayError>>,
    pub calls: AtomicUsize,
    gated: AtomicBool,
    gate: Semaphore,
}

impl Default for ScriptedFields {
    fn default() -> Self {
        Self {
            list_response: Mutex::new(Ok(Vec::new())),
            next_ids: Mutex::new(VecDeque::new()),
            update_error: Mutex::new(None),
            delete_error: Mutex::new(None),
            calls: AtomicUsize::new(0),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }
}

impl ScriptedFields {
    pub fn listing(items: Vec<Field>) -> Self {
        let s = Self::default();
        *s.list_response.lock() = Ok(items);
        s
    }

    pub fn with_ids(ids: &[&str]) -> Self {
        let s = Self::default();
        s.next_ids
            .lock()
            .extend(ids.iter().map(|id| id.to_string()));
        s
    }

    pub fn gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until the gateway has seen `n` calls.
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.call_count() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("gateway call never arrived");
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .expect("gate closed")
                .forget();
        }
    }
}

#[async_trait]
impl EntityGateway<Field> for ScriptedFields {
    async fn list(&self, _owner_id: &str) -> Result<Vec<Field>, GatewayError> {
        self.enter().await;
        self.list_response.lock().clone()
    }

    async fn create(
        &self,
        owner_id: Option<&str>,
        draft: FieldDraft,
    ) -> Result<Field, GatewayError> {
        self.enter().await;
        let id = self
            .next_ids
            .lock()
            .pop_front()
            .ok_or_else(|| GatewayError::transport("no scripted id left"))?;
        Ok(Field {
            id,
            label: draft.label,
            color: draft.color,
            area: draft.area,
            coordinates: draft.coordinates,
            categories: draft.categories,
            owner_id: owner_id.map(str::to_string),
            is_updating: false,
        })
    }

    async fn update(&self, id: &str, patch: FieldPatch) -> Result<Field, GatewayError> {
        self.enter().await;
        if let Some(e) = self.update_error.lock().clone() {
            return Err(e);
        }
        let mut updated = field(id, patch.label.as_deref().unwrap_or("updated"));
        if let Some(color) = patch.color {
            updated.color = color;
        }
        Ok(updated)
    }

    async fn delete(&self, _id: &str) -> Result<(), GatewayError> {
        self.enter().await;
        match self.delete_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
