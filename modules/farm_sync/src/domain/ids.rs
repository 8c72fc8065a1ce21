//! Placeholder ids for records that exist only on this client.
//!
//! A local id is never treated as canonical: the remote always assigns the
//! real id and the store refuses records that still carry a placeholder.

use uuid::Uuid;

const LOCAL_PREFIX: &str = "local-";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalId(String);

impl LocalId {
    pub fn generate() -> Self {
        Self(format!("{LOCAL_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_local(id: &str) -> bool {
        id.starts_with(LOCAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
