use thiserror::Error;

/// Failures reported by a Remote Data Gateway call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network or HTTP-layer failure, including undecodable responses.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The remote (or the local pre-check) rejected the payload.
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Credentials rejected or expired.
    #[error("Authentication rejected: {message}")]
    Auth { message: String },
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_displayable() {
        assert_eq!(
            GatewayError::not_found("field", "f-1").to_string(),
            "field not found: f-1"
        );
        assert_eq!(
            GatewayError::auth("JWT expired").to_string(),
            "Authentication rejected: JWT expired"
        );
        assert!(GatewayError::not_found("job", "j").is_not_found());
        assert!(!GatewayError::transport("boom").is_not_found());
    }
}
