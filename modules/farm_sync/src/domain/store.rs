use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::contract::{
    error::GatewayError,
    gateway::{Entity, EntityGateway},
    model::{Field, Job},
};
use crate::domain::ids::LocalId;

pub type FieldStore = EntityStore<Field>;
pub type JobStore = EntityStore<Job>;

/// Message reported when a response arrives after the session it belongs to has ended.
pub const STALE_SESSION: &str = "session changed before the response arrived; result discarded";

/// Result of a store mutation, ready for inline display next to the triggering control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MutationOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl From<&GatewayError> for MutationOutcome {
    fn from(e: &GatewayError) -> Self {
        Self::failed(e.to_string())
    }
}

/// A draft kept on this client under a placeholder id until it is committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDraft<D> {
    pub local_id: String,
    pub draft: D,
}

/// Point-in-time view of a store, published to subscribers on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    rename_all = "camelCase",
    bound(serialize = "E: Serialize, E::Draft: Serialize")
)]
pub struct StoreSnapshot<E: Entity> {
    pub items: Vec<E>,
    pub pending: Vec<PendingDraft<E::Draft>>,
    pub is_loading: bool,
    pub is_initialized: bool,
    /// Set when the last `initialize` failed; distinguishes "failed" from "no data".
    pub load_error: Option<String>,
}

impl<E: Entity> Default for StoreSnapshot<E> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            pending: Vec::new(),
            is_loading: false,
            is_initialized: false,
            load_error: None,
        }
    }
}

struct StoreState<E: Entity> {
    items: Vec<E>,
    pending: Vec<PendingDraft<E::Draft>>,
    is_loading: bool,
    is_initialized: bool,
    load_error: Option<String>,
    owner_id: Option<String>,
    /// Updates still awaiting the remote, per entity id.
    in_flight: HashMap<String, usize>,
    /// Bumped by every `initialize` and `clear`; responses tagged with an older value are dropped.
    epoch: u64,
}

impl<E: Entity> StoreState<E> {
    fn empty(epoch: u64) -> Self {
        Self {
            items: Vec::new(),
            pending: Vec::new(),
            is_loading: false,
            is_initialized: false,
            load_error: None,
            owner_id: None,
            in_flight: HashMap::new(),
            epoch,
        }
    }

    fn start_update(&mut self, id: &str) {
        *self.in_flight.entry(id.to_string()).or_default() += 1;
        if let Some(item) = self.find_mut(id) {
            item.set_updating(true);
        }
    }

    /// One update for `id` settled; the marker stays on while others are outstanding.
    fn finish_update(&mut self, id: &str) {
        let remaining = match self.in_flight.get_mut(id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.in_flight.remove(id);
        }
        if let Some(item) = self.find_mut(id) {
            item.set_updating(remaining > 0);
        }
    }

    fn updates_in_flight(&self, id: &str) -> usize {
        self.in_flight.get(id).copied().unwrap_or(0)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut E> {
        self.items.iter_mut().find(|item| item.id() == id)
    }

    fn snapshot(&self) -> StoreSnapshot<E> {
        StoreSnapshot {
            items: self.items.clone(),
            pending: self.pending.clone(),
            is_loading: self.is_loading,
            is_initialized: self.is_initialized,
            load_error: self.load_error.clone(),
        }
    }
}

/// Runs `cleanup` when dropped, unless the store moved to another epoch meanwhile.
/// Keeps loading/updating markers from getting stuck when a call fails or its future is dropped.
struct EpochGuard<'a, E: Entity, F: FnOnce(&mut StoreState<E>)> {
    store: &'a EntityStore<E>,
    epoch: u64,
    cleanup: Option<F>,
}

impl<'a, E: Entity, F: FnOnce(&mut StoreState<E>)> EpochGuard<'a, E, F> {
    fn new(store: &'a EntityStore<E>, epoch: u64, cleanup: F) -> Self {
        Self {
            store,
            epoch,
            cleanup: Some(cleanup),
        }
    }
}

impl<E: Entity, F: FnOnce(&mut StoreState<E>)> Drop for EpochGuard<'_, E, F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            self.store.mutate_if_current(self.epoch, cleanup);
        }
    }
}

/// Single in-memory source of truth for one entity family.
///
/// Mutations are confirm-then-mutate: `items` changes only after the gateway
/// answered. Concurrent updates to the same entity are not ordered; the
/// response that resolves last wins, and `is_updating` stays set until the
/// last of them settles.
pub struct EntityStore<E: Entity> {
    gateway: Arc<dyn EntityGateway<E>>,
    state: Mutex<StoreState<E>>,
    updates: watch::Sender<StoreSnapshot<E>>,
}

impl<E: Entity> EntityStore<E> {
    pub fn new(gateway: Arc<dyn EntityGateway<E>>) -> Self {
        let (updates, _) = watch::channel(StoreSnapshot::default());
        Self {
            gateway,
            state: Mutex::new(StoreState::empty(0)),
            updates,
        }
    }

    // --- reads ---

    pub fn snapshot(&self) -> StoreSnapshot<E> {
        self.state.lock().snapshot()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot<E>> {
        self.updates.subscribe()
    }

    pub fn items(&self) -> Vec<E> {
        self.state.lock().items.clone()
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.state
            .lock()
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().is_loading
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().is_initialized
    }

    pub fn load_error(&self) -> Option<String> {
        self.state.lock().load_error.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    // --- lifecycle ---

    /// Pull the owner's entities. Never fails: on error the store ends up empty,
    /// initialized, and `load_error` carries the reason.
    pub async fn initialize(&self, owner_id: &str) {
        let epoch = self.begin_initialize(owner_id);
        self.finish_initialize(owner_id, epoch).await
    }

    /// Enter the loading state for `owner_id` and return the epoch the load belongs to.
    pub fn begin_initialize(&self, owner_id: &str) -> u64 {
        self.mutate(|s| {
            s.epoch += 1;
            s.owner_id = Some(owner_id.to_string());
            s.in_flight.clear();
            s.is_loading = true;
            s.epoch
        })
    }

    /// Fetch and apply the list for a load started by `begin_initialize`.
    /// A load whose epoch is already gone never reaches the gateway.
    #[instrument(name = "farm_sync.store.initialize", skip(self), fields(kind = E::KIND))]
    pub async fn finish_initialize(&self, owner_id: &str, epoch: u64) {
        if self.epoch() != epoch {
            debug!("Load cancelled before it started");
            return;
        }
        let _loading = EpochGuard::new(self, epoch, |s: &mut StoreState<E>| s.is_loading = false);

        let result = self.gateway.list(owner_id).await;
        match &result {
            Ok(items) => {
                warn_on_duplicate_ids(items);
                info!(count = items.len(), "Loaded entities");
            }
            Err(e) => warn!(error = %e, "Initial load failed; store degrades to empty"),
        }

        let applied = self.mutate_if_current(epoch, |s| {
            match result {
                Ok(items) => {
                    s.items = items;
                    s.load_error = None;
                }
                Err(e) => {
                    s.items.clear();
                    s.load_error = Some(e.to_string());
                }
            }
            s.is_initialized = true;
            s.is_loading = false;
        });
        if !applied {
            debug!("Discarding list response from a previous session");
        }
    }

    /// Reset to the pristine state. Safe to call at any time; responses still
    /// in flight are discarded when they arrive.
    #[instrument(name = "farm_sync.store.clear", skip(self), fields(kind = E::KIND))]
    pub fn clear(&self) {
        self.mutate(|s| {
            let epoch = s.epoch + 1;
            *s = StoreState::empty(epoch);
        });
        debug!("Store cleared");
    }

    // --- mutations ---

    /// Create through the gateway and append the canonical record.
    #[instrument(name = "farm_sync.store.add", skip_all, fields(kind = E::KIND))]
    pub async fn add(&self, draft: E::Draft) -> MutationOutcome {
        if let Err(e) = E::validate_draft(&draft) {
            debug!(error = %e, "Draft rejected locally");
            return MutationOutcome::from(&e);
        }

        let (epoch, owner_id) = {
            let s = self.state.lock();
            (s.epoch, s.owner_id.clone())
        };

        match self.gateway.create(owner_id.as_deref(), draft).await {
            Ok(record) => self.accept_created(epoch, record),
            Err(e) => {
                warn!(error = %e, "Create failed");
                MutationOutcome::from(&e)
            }
        }
    }

    fn accept_created(&self, epoch: u64, mut record: E) -> MutationOutcome {
        if LocalId::is_local(record.id()) {
            warn!(id = record.id(), "Remote echoed a placeholder id");
            return MutationOutcome::failed(format!(
                "remote returned placeholder id '{}' instead of a canonical one",
                record.id()
            ));
        }

        record.set_updating(false);
        let id = record.id().to_string();
        if !self.mutate_if_current(epoch, |s| s.items.push(record)) {
            debug!(%id, "Discarding create response from a previous session");
            return MutationOutcome::failed(STALE_SESSION);
        }
        info!(%id, "Created");
        MutationOutcome::ok()
    }

    /// Update through the gateway and replace the cached entity with the canonical record.
    /// An id that is not cached is never inserted.
    #[instrument(name = "farm_sync.store.update", skip(self, patch), fields(kind = E::KIND))]
    pub async fn update(&self, id: &str, patch: E::Patch) -> MutationOutcome {
        if let Err(e) = E::validate_patch(&patch) {
            debug!(error = %e, "Patch rejected locally");
            return MutationOutcome::from(&e);
        }

        let epoch = self.mutate(|s| {
            s.start_update(id);
            s.epoch
        });
        let flagged = id.to_string();
        let _updating = EpochGuard::new(self, epoch, move |s: &mut StoreState<E>| {
            s.finish_update(&flagged)
        });

        match self.gateway.update(id, patch).await {
            Ok(mut record) => {
                let mut replaced = false;
                let current = self.mutate_if_current(epoch, |s| {
                    record.set_updating(s.updates_in_flight(id) > 1);
                    if let Some(slot) = s.find_mut(id) {
                        *slot = record;
                        replaced = true;
                    }
                });
                if !current {
                    debug!("Discarding update response from a previous session");
                    return MutationOutcome::failed(STALE_SESSION);
                }
                if !replaced {
                    debug!("Updated entity is not cached locally; nothing to replace");
                }
                MutationOutcome::ok()
            }
            Err(e) => {
                warn!(error = %e, "Update failed");
                MutationOutcome::from(&e)
            }
        }
    }

    /// Delete through the gateway, then drop the entity locally.
    #[instrument(name = "farm_sync.store.delete", skip(self), fields(kind = E::KIND))]
    pub async fn delete(&self, id: &str) -> MutationOutcome {
        let epoch = self.epoch();

        match self.gateway.delete(id).await {
            Ok(()) => {
                if !self.mutate_if_current(epoch, |s| s.items.retain(|item| item.id() != id)) {
                    debug!("Discarding delete response from a previous session");
                    return MutationOutcome::failed(STALE_SESSION);
                }
                info!("Deleted");
                MutationOutcome::ok()
            }
            Err(e) => {
                warn!(error = %e, "Delete failed");
                MutationOutcome::from(&e)
            }
        }
    }

    // --- staged drafts ---

    /// Keep a draft locally under a placeholder id; nothing is sent yet.
    pub fn stage(&self, draft: E::Draft) -> LocalId {
        let local_id = LocalId::generate();
        let pending = PendingDraft {
            local_id: local_id.to_string(),
            draft,
        };
        self.mutate(|s| s.pending.push(pending));
        local_id
    }

    pub fn pending(&self) -> Vec<PendingDraft<E::Draft>> {
        self.state.lock().pending.clone()
    }

    /// Drop a staged draft. Returns false when nothing was staged under `local_id`.
    pub fn discard(&self, local_id: &str) -> bool {
        self.mutate(|s| {
            let before = s.pending.len();
            s.pending.retain(|p| p.local_id != local_id);
            s.pending.len() != before
        })
    }

    /// Send a staged draft. On success the placeholder is gone and the canonical
    /// record (with the remote id) is in `items`; on failure the draft stays staged.
    #[instrument(name = "farm_sync.store.commit", skip(self), fields(kind = E::KIND))]
    pub async fn commit(&self, local_id: &str) -> MutationOutcome {
        let draft = {
            let s = self.state.lock();
            s.pending
                .iter()
                .find(|p| p.local_id == local_id)
                .map(|p| p.draft.clone())
        };
        let Some(draft) = draft else {
            return MutationOutcome::failed(format!("no staged {} '{}'", E::KIND, local_id));
        };

        let outcome = self.add(draft).await;
        if outcome.is_success() {
            self.mutate(|s| s.pending.retain(|p| p.local_id != local_id));
        }
        outcome
    }

    // --- internals ---

    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState<E>) -> R) -> R {
        let mut state = self.state.lock();
        let out = f(&mut state);
        self.updates.send_replace(state.snapshot());
        out
    }

    /// Apply `f` only if no `initialize`/`clear` happened since `epoch` was captured.
    fn mutate_if_current(&self, epoch: u64, f: impl FnOnce(&mut StoreState<E>)) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        f(&mut state);
        self.updates.send_replace(state.snapshot());
        true
    }
}

fn warn_on_duplicate_ids<E: Entity>(items: &[E]) {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id()) {
            warn!(kind = E::KIND, id = item.id(), "Duplicate id in list response");
        }
    }
}

/// Object-safe lifecycle surface used by the session controller.
#[async_trait]
pub trait ManagedStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Synchronous half of a load: mark the store loading and return its epoch.
    fn begin_initialize(&self, owner_id: &str) -> u64;

    async fn finish_initialize(&self, owner_id: &str, epoch: u64);

    async fn initialize(&self, owner_id: &str) {
        let epoch = self.begin_initialize(owner_id);
        self.finish_initialize(owner_id, epoch).await
    }

    fn clear(&self);
}

#[async_trait]
impl<E: Entity> ManagedStore for EntityStore<E> {
    fn name(&self) -> &'static str {
        E::KIND
    }

    fn begin_initialize(&self, owner_id: &str) -> u64 {
        EntityStore::begin_initialize(self, owner_id)
    }

    async fn finish_initialize(&self, owner_id: &str, epoch: u64) {
        EntityStore::finish_initialize(self, owner_id, epoch).await
    }

    fn clear(&self) {
        EntityStore::clear(self)
    }
}
