use thiserror::Error;

use crate::contract::error::GatewayError;

/// Domain-specific errors using thiserror
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Location name cannot be empty")]
    EmptyLocationName,
}

impl DomainError {
    pub fn invalid_coordinates(lat: f64, lon: f64) -> Self {
        Self::InvalidCoordinates { lat, lon }
    }

    pub fn empty_location_name() -> Self {
        Self::EmptyLocationName
    }
}

/// Failure of one sign-in cycle. Never fatal to the process.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("Failed to provision user record for '{user_id}': {source}")]
    UserProvisioning {
        user_id: String,
        #[source]
        source: GatewayError,
    },
}
