//! RPC response envelope.
//!
//! Every response carries `error_code` (0 on success) and
//! `error_messages`; the HTTP status mirrors the code.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AdminError, ErrorCode};

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub error_code: ErrorCode,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

impl ResponseStatus {
    pub fn ok() -> Self {
        Self {
            error_code: ErrorCode::Ok,
            error_messages: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ResponseStatus,
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Ok => StatusCode::OK,
        ErrorCode::InvalidParameter | ErrorCode::Ambiguous => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::JobFailure | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: status_for(code),
            body: ResponseStatus {
                error_code: code,
                error_messages: vec![message.into()],
            },
        }
    }

    pub fn not_ready() -> Self {
        Self::new(ErrorCode::Unavailable, "recovery has not finished")
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        let code = err.code();
        let mut messages = vec![err.to_string()];
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            let cause_message = cause.to_string();
            if !messages.iter().any(|m| m.contains(&cause_message)) {
                messages.push(cause_message);
            }
            source = cause.source();
        }
        if code == ErrorCode::Internal {
            tracing::error!(error = %err, "Request failed");
        }
        Self {
            status: status_for(code),
            body: ResponseStatus {
                error_code: code,
                error_messages: messages,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(ErrorCode::InvalidParameter, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(ErrorCode::InvalidParameter, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildadmin_id::BuildId;

    #[test]
    fn test_admin_error_mapping() {
        let id = BuildId::parse("a:t:1").unwrap();
        let err = ApiError::from(AdminError::AlreadyActive(id));
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.body.error_code, ErrorCode::Conflict);
        assert_eq!(err.body.error_messages.len(), 1);

        let err = ApiError::from(AdminError::NotFound("x".to_string()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_body_shape() {
        let body = serde_json::to_value(ResponseStatus::ok()).unwrap();
        assert_eq!(body, serde_json::json!({"error_code": 0, "error_messages": []}));
    }
}
