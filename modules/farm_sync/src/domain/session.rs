use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::contract::{
    error::GatewayError,
    gateway::{AccessTokenSink, UsersGateway},
    model::{NewUser, User},
};
use crate::domain::{error::SessionError, store::ManagedStore};

const UNKNOWN_USER: &str = "Unknown User";

/// Signed-in identity as reported by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_addresses: Vec<String>,
    /// Bearer token for the backend; `None` falls back to the public key.
    pub access_token: Option<String>,
}

impl NewUser {
    /// Build the user record for a first sign-in.
    pub fn from_identity(identity: &Identity) -> Self {
        let full = format!(
            "{} {}",
            identity.first_name.as_deref().unwrap_or(""),
            identity.last_name.as_deref().unwrap_or("")
        );
        let name = match full.trim() {
            "" => UNKNOWN_USER.to_string(),
            trimmed => trimmed.to_string(),
        };

        Self {
            id: identity.id.clone(),
            name,
            email: identity.email_addresses.first().cloned().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing reported by the identity provider yet.
    #[default]
    Unknown,
    SignedOut,
    /// `provisioned` is false when the user record could not be ensured;
    /// stores stay uninitialized until the next sign-in signal.
    SignedIn { user_id: String, provisioned: bool },
}

impl SessionState {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            SessionState::SignedIn { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// Bookkeeping for transitions. Only touched in short synchronous sections.
#[derive(Default)]
struct Transition {
    /// Bumped by every event that starts or cancels a sign-in.
    generation: u64,
    /// User whose provisioning is still awaiting the remote.
    provisioning: Option<String>,
}

/// A sign-in whose remote half has not run yet.
struct PendingSignIn {
    identity: Identity,
    generation: u64,
}

/// Binds store lifecycles to the authentication signal.
///
/// Events are applied in arrival order without waiting on the network:
/// a sign-out clears every store at once, and a sign-in that is overtaken
/// by a later event never publishes its result.
pub struct SessionController {
    users: Arc<dyn UsersGateway>,
    credentials: Option<Arc<dyn AccessTokenSink>>,
    stores: Vec<Arc<dyn ManagedStore>>,
    state: watch::Sender<SessionState>,
    transition: Mutex<Transition>,
}

impl SessionController {
    pub fn new(
        users: Arc<dyn UsersGateway>,
        credentials: Option<Arc<dyn AccessTokenSink>>,
        stores: Vec<Arc<dyn ManagedStore>>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            users,
            credentials,
            stores,
            state,
            transition: Mutex::new(Transition::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Apply one auth event. An error leaves the controller usable; the next
    /// event is handled normally.
    pub async fn handle(&self, event: AuthEvent) -> Result<(), SessionError> {
        match self.apply(event) {
            Some(pending) => self.sign_in(pending).await,
            None => Ok(()),
        }
    }

    /// Drive the controller from an event channel until cancelled or the
    /// sender side is dropped. Sign-ins still provisioning when the channel
    /// closes are allowed to finish.
    pub async fn run(&self, mut events: mpsc::Receiver<AuthEvent>, cancel: CancellationToken) {
        let mut sign_ins = FuturesUnordered::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(in_flight = sign_ins.len(), "Session loop cancelled");
                    return;
                }
                Some(result) = sign_ins.next(), if !sign_ins.is_empty() => {
                    log_failure(result);
                }
                next = events.recv() => {
                    let Some(event) = next else {
                        debug!("Auth event channel closed");
                        break;
                    };
                    if let Some(pending) = self.apply(event) {
                        sign_ins.push(self.sign_in(pending));
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => debug!("Session loop cancelled while draining"),
            _ = async {
                while let Some(result) = sign_ins.next().await {
                    log_failure(result);
                }
            } => {}
        }
    }

    /// Synchronous half of an event. Returns the sign-in that still has to
    /// reach the remote, if any.
    fn apply(&self, event: AuthEvent) -> Option<PendingSignIn> {
        let mut t = self.transition.lock();
        let current = self.state();

        match event {
            AuthEvent::SignedOut => {
                t.generation += 1;
                let cancelled = t.provisioning.take();
                if current.user_id().is_some() || cancelled.is_some() {
                    self.sign_out(cancelled.as_deref());
                } else if current == SessionState::Unknown {
                    self.state.send_replace(SessionState::SignedOut);
                }
                None
            }
            AuthEvent::SignedIn(identity) => {
                let settled = t.provisioning.is_none();
                if let SessionState::SignedIn {
                    user_id,
                    provisioned: true,
                } = &current
                {
                    if settled && *user_id == identity.id {
                        debug!(%user_id, "Already signed in");
                        self.hand_over_token(identity.access_token.clone());
                        return None;
                    }
                }

                if let Some(previous) = current.user_id().filter(|u| *u != identity.id) {
                    info!(from = %previous, to = %identity.id, "Switching user");
                    self.clear_stores();
                }

                t.generation += 1;
                t.provisioning = Some(identity.id.clone());
                self.hand_over_token(identity.access_token.clone());
                Some(PendingSignIn {
                    identity,
                    generation: t.generation,
                })
            }
        }
    }

    #[instrument(
        name = "farm_sync.session.sign_in",
        skip_all,
        fields(user_id = %pending.identity.id)
    )]
    async fn sign_in(&self, pending: PendingSignIn) -> Result<(), SessionError> {
        let PendingSignIn {
            identity,
            generation,
        } = pending;

        let provisioned = self.ensure_user(&identity).await;

        let loads = {
            let mut t = self.transition.lock();
            if t.generation != generation {
                debug!("Sign-in overtaken by a later auth event; result dropped");
                return Ok(());
            }
            t.provisioning = None;

            if let Err(source) = provisioned {
                warn!(error = %source, "User provisioning failed; stores left uninitialized");
                self.state.send_replace(SessionState::SignedIn {
                    user_id: identity.id.clone(),
                    provisioned: false,
                });
                return Err(SessionError::UserProvisioning {
                    user_id: identity.id,
                    source,
                });
            }

            self.state.send_replace(SessionState::SignedIn {
                user_id: identity.id.clone(),
                provisioned: true,
            });
            // epochs are taken under the lock; a later sign-out invalidates them
            self.stores
                .iter()
                .map(|store| (store.clone(), store.begin_initialize(&identity.id)))
                .collect::<Vec<_>>()
        };

        join_all(
            loads
                .iter()
                .map(|(store, epoch)| store.finish_initialize(&identity.id, *epoch)),
        )
        .await;
        info!(stores = loads.len(), "Stores initialized");
        Ok(())
    }

    async fn ensure_user(&self, identity: &Identity) -> Result<User, GatewayError> {
        if let Some(user) = self.users.find(&identity.id).await? {
            debug!("User record exists");
            return Ok(user);
        }
        match self.users.create(NewUser::from_identity(identity)).await {
            Ok(user) => {
                info!(name = %user.name, "User record created");
                Ok(user)
            }
            // a concurrent sign-in for the same user may have created it first
            Err(e @ GatewayError::Validation { .. }) => {
                match self.users.find(&identity.id).await? {
                    Some(user) => Ok(user),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(name = "farm_sync.session.sign_out", skip_all)]
    fn sign_out(&self, cancelled: Option<&str>) {
        if let Some(user_id) = cancelled {
            debug!(%user_id, "Pending sign-in cancelled");
        }
        self.clear_stores();
        self.hand_over_token(None);
        self.state.send_replace(SessionState::SignedOut);
        info!("Signed out");
    }

    fn clear_stores(&self) {
        for store in &self.stores {
            store.clear();
            debug!(store = store.name(), "Store cleared");
        }
    }

    fn hand_over_token(&self, token: Option<String>) {
        if let Some(sink) = &self.credentials {
            sink.set_access_token(token);
        }
    }
}

fn log_failure(result: Result<(), SessionError>) {
    if let Err(e) = result {
        error!(error = %e, "Session transition failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(first: Option<&str>, last: Option<&str>, emails: &[&str]) -> Identity {
        Identity {
            id: "user_1".into(),
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            email_addresses: emails.iter().map(|e| e.to_string()).collect(),
            access_token: None,
        }
    }

    #[test]
    fn new_user_joins_names_and_takes_first_email() {
        let user = NewUser::from_identity(&identity(
            Some("Maria"),
            Some("Papadopoulou"),
            &["maria@example.com", "other@example.com"],
        ));
        assert_eq!(user.id, "user_1");
        assert_eq!(user.name, "Maria Papadopoulou");
        assert_eq!(user.email, "maria@example.com");
    }

    #[test]
    fn new_user_falls_back_when_identity_is_sparse() {
        let user = NewUser::from_identity(&identity(None, Some("Nikos"), &[]));
        assert_eq!(user.name, "Nikos");
        assert_eq!(user.email, "");

        let user = NewUser::from_identity(&identity(Some(" "), None, &[]));
        assert_eq!(user.name, "Unknown User");
    }
}
