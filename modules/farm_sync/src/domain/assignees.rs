use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::contract::{gateway::UsersGateway, model::User};
use crate::domain::store::ManagedStore;

/// Users a job can be assigned to, as last loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySnapshot {
    pub users: Vec<User>,
    pub is_loading: bool,
    pub is_initialized: bool,
    pub load_error: Option<String>,
}

struct DirectoryState {
    view: DirectorySnapshot,
    epoch: u64,
}

/// Read-only list of users for assignee pickers. Loaded with the other
/// stores on sign-in and dropped on sign-out.
pub struct AssigneeDirectory {
    users: Arc<dyn UsersGateway>,
    state: Mutex<DirectoryState>,
    updates: watch::Sender<DirectorySnapshot>,
}

impl AssigneeDirectory {
    pub fn new(users: Arc<dyn UsersGateway>) -> Self {
        let (updates, _) = watch::channel(DirectorySnapshot::default());
        Self {
            users,
            state: Mutex::new(DirectoryState {
                view: DirectorySnapshot::default(),
                epoch: 0,
            }),
            updates,
        }
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        self.state.lock().view.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DirectorySnapshot> {
        self.updates.subscribe()
    }

    pub fn users(&self) -> Vec<User> {
        self.state.lock().view.users.clone()
    }

    pub fn find(&self, id: &str) -> Option<User> {
        self.state
            .lock()
            .view
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().view.is_initialized
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut DirectoryState) -> R) -> R {
        let mut state = self.state.lock();
        let out = f(&mut state);
        self.updates.send_replace(state.view.clone());
        out
    }

    fn mutate_if_current(&self, epoch: u64, f: impl FnOnce(&mut DirectorySnapshot)) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        f(&mut state.view);
        self.updates.send_replace(state.view.clone());
        true
    }
}

/// Resets `is_loading` if the load future is dropped before it settles.
struct LoadingGuard<'a> {
    directory: &'a AssigneeDirectory,
    epoch: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.directory
            .mutate_if_current(self.epoch, |v| v.is_loading = false);
    }
}

#[async_trait]
impl ManagedStore for AssigneeDirectory {
    fn name(&self) -> &'static str {
        "user"
    }

    fn begin_initialize(&self, _owner_id: &str) -> u64 {
        self.mutate(|s| {
            s.epoch += 1;
            s.view.is_loading = true;
            s.epoch
        })
    }

    #[instrument(name = "farm_sync.assignees.initialize", skip(self, _owner_id))]
    async fn finish_initialize(&self, _owner_id: &str, epoch: u64) {
        if self.state.lock().epoch != epoch {
            debug!("Load cancelled before it started");
            return;
        }
        let _loading = LoadingGuard {
            directory: self,
            epoch,
        };

        let result = self.users.list().await;
        if let Err(e) = &result {
            warn!(error = %e, "Loading users failed; assignee list stays empty");
        }

        let applied = self.mutate_if_current(epoch, |v| {
            match result {
                Ok(users) => {
                    info!(count = users.len(), "Loaded users");
                    v.users = users;
                    v.load_error = None;
                }
                Err(e) => {
                    v.users.clear();
                    v.load_error = Some(e.to_string());
                }
            }
            v.is_initialized = true;
            v.is_loading = false;
        });
        if !applied {
            debug!("Discarding users response from a previous session");
        }
    }

    fn clear(&self) {
        self.mutate(|s| {
            s.epoch += 1;
            s.view = DirectorySnapshot::default();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{error::GatewayError, model::NewUser};
    use crate::infra::InMemoryGateway;

    async fn with_user(gw: &InMemoryGateway, id: &str, name: &str) {
        UsersGateway::create(
            gw,
            NewUser {
                id: id.into(),
                name: name.into(),
                email: format!("{id}@example.com"),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn initialize_loads_every_user() {
        let gw = Arc::new(InMemoryGateway::new());
        with_user(&gw, "u1", "Maria").await;
        with_user(&gw, "u2", "Eleni").await;
        let directory = AssigneeDirectory::new(gw.clone());

        directory.initialize("u1").await;

        assert!(directory.is_initialized());
        assert_eq!(directory.users().len(), 2);
        assert_eq!(directory.find("u2").unwrap().name, "Eleni");
    }

    #[tokio::test]
    async fn failed_load_is_reported_and_clear_resets() {
        let gw = Arc::new(InMemoryGateway::new());
        gw.fail_next(GatewayError::transport("offline"));
        let directory = AssigneeDirectory::new(gw.clone());

        directory.initialize("u1").await;
        let snapshot = directory.snapshot();
        assert!(snapshot.is_initialized);
        assert!(!snapshot.is_loading);
        assert_eq!(
            snapshot.load_error.as_deref(),
            Some("Transport error: offline")
        );

        directory.clear();
        assert_eq!(directory.snapshot(), DirectorySnapshot::default());
    }

    #[tokio::test]
    async fn load_begun_before_clear_never_lands() {
        let gw = Arc::new(InMemoryGateway::new());
        with_user(&gw, "u1", "Maria").await;
        let directory = AssigneeDirectory::new(gw.clone());

        let epoch = directory.begin_initialize("u1");
        directory.clear();
        directory.finish_initialize("u1", epoch).await;

        assert_eq!(directory.snapshot(), DirectorySnapshot::default());
    }
}
