use std::fmt::Debug;

use async_trait::async_trait;

use crate::contract::{
    error::GatewayError,
    model::{NewUser, User, UserPatch},
};

/// An entity family that can be cached by an entity store.
pub trait Entity: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Creation payload (no id).
    type Draft: Clone + Debug + PartialEq + Send + Sync + 'static;
    /// Partial update payload.
    type Patch: Clone + Debug + Send + Sync + 'static;

    /// Short lowercase name used in logs and errors ("field", "job").
    const KIND: &'static str;

    fn id(&self) -> &str;

    /// Toggle the client-only in-flight marker. Families without one ignore it.
    fn set_updating(&mut self, _updating: bool) {}

    /// Local pre-check run before a create is sent.
    fn validate_draft(_draft: &Self::Draft) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Local pre-check run before an update is sent.
    fn validate_patch(_patch: &Self::Patch) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Stateless transport for one owner-scoped entity family.
#[async_trait]
pub trait EntityGateway<E: Entity>: Send + Sync {
    /// All entities owned by `owner_id`. An empty result is a success.
    async fn list(&self, owner_id: &str) -> Result<Vec<E>, GatewayError>;

    /// Create an entity; the remote assigns id and timestamps and returns the canonical record.
    async fn create(&self, owner_id: Option<&str>, draft: E::Draft) -> Result<E, GatewayError>;

    /// Merge only the provided attributes and return the full canonical record.
    async fn update(&self, id: &str, patch: E::Patch) -> Result<E, GatewayError>;

    /// Delete by id. Deleting an id that no longer exists is a success.
    async fn delete(&self, id: &str) -> Result<(), GatewayError>;
}

/// Transport for user records, keyed by the identity provider's id.
#[async_trait]
pub trait UsersGateway: Send + Sync {
    async fn list(&self) -> Result<Vec<User>, GatewayError>;

    /// `Ok(None)` when the user has no record yet.
    async fn find(&self, id: &str) -> Result<Option<User>, GatewayError>;

    async fn create(&self, new_user: NewUser) -> Result<User, GatewayError>;

    async fn update(&self, id: &str, patch: UserPatch) -> Result<User, GatewayError>;

    async fn delete(&self, id: &str) -> Result<(), GatewayError>;
}

/// Receives the bearer token of the signed-in session (`None` on sign-out).
pub trait AccessTokenSink: Send + Sync {
    fn set_access_token(&self, token: Option<String>);
}
