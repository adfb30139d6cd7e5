//! Error types for the traffic RL core library

use thiserror::Error;

/// Core error type for environment operations
#[derive(Error, Debug)]
pub enum EnvError {
    /// A required environment parameter is absent from the configuration
    #[error("Environment parameter \"{0}\" not supplied")]
    MissingParameter(String),

    /// A parameter is present but cannot be used
    #[error("Invalid environment parameter \"{name}\": {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// A vehicle was removed by the simulator before it could be queried
    #[error("Vehicle {0} is not in the network")]
    VehicleNotFound(String),

    /// The simulator itself failed; the original context is kept intact
    #[error(transparent)]
    Simulator(anyhow::Error),

    /// Invalid action
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvError {
    /// Whether this is the recoverable "vehicle already gone" case
    #[must_use]
    pub fn is_vehicle_not_found(&self) -> bool {
        matches!(self, Self::VehicleNotFound(_))
    }
}

/// Result type alias for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameter_names_the_key() {
        let err = EnvError::MissingParameter("num_rl".to_string());
        assert_eq!(err.to_string(), "Environment parameter \"num_rl\" not supplied");
    }

    #[test]
    fn simulator_errors_are_transparent() {
        let err = EnvError::Simulator(anyhow::anyhow!("connection reset by peer"));
        assert_eq!(err.to_string(), "connection reset by peer");
        assert!(!err.is_vehicle_not_found());
    }
}
