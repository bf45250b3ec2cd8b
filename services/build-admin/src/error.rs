//! Request-level errors and the shared RPC error code enumeration.

use buildadmin_id::{BuildId, IdError};
use serde::{Deserialize, Serialize};

use crate::job::JobError;
use crate::store::StoreError;

/// Result type for admin request handling.
pub type AdminResult<T> = Result<T, AdminError>;

/// Error codes shared by every RPC response. `Ok` (0) means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    InvalidParameter = 1,
    NotFound = 2,
    Conflict = 3,
    Ambiguous = 4,
    JobFailure = 5,
    Unavailable = 6,
    Internal = 7,
}

impl ErrorCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code as i32
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ok,
            1 => Self::InvalidParameter,
            2 => Self::NotFound,
            3 => Self::Conflict,
            4 => Self::Ambiguous,
            5 => Self::JobFailure,
            6 => Self::Unavailable,
            7 => Self::Internal,
            other => return Err(format!("unknown error code {other}")),
        })
    }
}

/// Errors returned synchronously to RPC callers.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("invalid build id: {0}")]
    InvalidBuildId(#[from] IdError),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("generation {0} not found")]
    NotFound(String),

    #[error("generation {0} is already starting")]
    AlreadyStarting(BuildId),

    #[error("generation {0} is already active")]
    AlreadyActive(BuildId),

    #[error("job id '{job_id}' matches {count} generations")]
    Ambiguous { job_id: String, count: usize },

    #[error("generation {build_id}: {source}")]
    Job {
        build_id: BuildId,
        #[source]
        source: JobError,
    },

    #[error("coordination store: {0}")]
    Store(#[from] StoreError),

    #[error("service not ready: {0}")]
    NotReady(String),
}

impl AdminError {
    pub fn job(build_id: &BuildId, source: JobError) -> Self {
        Self::Job {
            build_id: build_id.clone(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidBuildId(_) | Self::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AlreadyStarting(_) | Self::AlreadyActive(_) => ErrorCode::Conflict,
            Self::Ambiguous { .. } => ErrorCode::Ambiguous,
            Self::Job { .. } => ErrorCode::JobFailure,
            Self::NotReady(_) => ErrorCode::Unavailable,
            Self::Store(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_value() {
        assert_eq!(serde_json::to_string(&ErrorCode::Ok).unwrap(), "0");
        assert_eq!(serde_json::to_string(&ErrorCode::Conflict).unwrap(), "3");
        let parsed: ErrorCode = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, ErrorCode::NotFound);
        assert!(serde_json::from_str::<ErrorCode>("42").is_err());
    }

    #[test]
    fn test_conflicts_share_a_code() {
        let id = BuildId::parse("app:table:1").unwrap();
        assert_eq!(AdminError::AlreadyStarting(id.clone()).code(), ErrorCode::Conflict);
        assert_eq!(AdminError::AlreadyActive(id).code(), ErrorCode::Conflict);
    }
}
