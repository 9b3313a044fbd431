//! Error types for the coupling spline flows library

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Array shapes do not line up
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A context batch was passed to a network built without a context projection
    #[error("Context was provided but the network has no context layer")]
    MissingContextLayer,

    /// No network factory was supplied to a coupling builder
    #[error("No net create function was passed")]
    MissingNetFactory,

    /// Invalid coupling mask
    #[error("Invalid mask: {0}")]
    InvalidMask(String),

    /// Unknown tail behaviour
    #[error("Unsupported tails: {0}")]
    UnsupportedTails(String),

    /// Unknown base density
    #[error("Unsupported base density: {0}")]
    UnsupportedBaseDensity(String),

    /// Spline input outside the bounded domain
    #[error("Input {value} outside spline domain [{left}, {right}]")]
    InputOutsideDomain { value: f64, left: f64, right: f64 },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Check if the error comes from a bad configuration rather than bad data
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_)
                | Error::MissingNetFactory
                | Error::InvalidMask(_)
                | Error::UnsupportedTails(_)
                | Error::UnsupportedBaseDensity(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ShapeMismatch {
            context: "dense input",
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Shape mismatch in dense input: expected 4, got 3"
        );
    }

    #[test]
    fn test_config_errors() {
        assert!(Error::MissingNetFactory.is_config_error());
        assert!(!Error::MissingContextLayer.is_config_error());
    }
}
