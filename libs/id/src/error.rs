//! Id parsing errors.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("id is empty")]
    Empty,

    #[error("invalid id prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("id missing '{0}' separator")]
    MissingSeparator(char),

    #[error("invalid ULID: {0}")]
    InvalidUlid(String),

    /// A BuildId component is empty or contains a reserved character.
    #[error("invalid {component}: '{value}'")]
    InvalidComponent {
        component: &'static str,
        value: String,
    },

    /// The generation id is not a non-negative integer.
    #[error("invalid generation id: '{0}'")]
    InvalidGeneration(String),

    /// Wrong number of BuildId components.
    #[error("invalid id format: {message}")]
    InvalidFormat { message: String },
}
