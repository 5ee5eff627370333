// src/error.rs

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use serde::Serialize;
use thiserror::Error;

/// One field-level problem found while validating a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("validation failed with {} issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("not authorized: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CrmError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        CrmError::Validation(vec![ValidationIssue::new(path, message)])
    }
}

impl From<mongodb::error::Error> for CrmError {
    fn from(e: mongodb::error::Error) -> Self {
        CrmError::Storage(e.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for CrmError {
    fn from(e: mongodb::bson::ser::Error) -> Self {
        CrmError::Storage(format!("bson serialization: {}", e))
    }
}

impl From<mongodb::bson::de::Error> for CrmError {
    fn from(e: mongodb::bson::de::Error) -> Self {
        CrmError::Storage(format!("bson deserialization: {}", e))
    }
}

impl ResponseError for CrmError {
    fn status_code(&self) -> StatusCode {
        match self {
            CrmError::Validation(_) => StatusCode::BAD_REQUEST,
            // Role failures answer 401, same as a missing session.
            CrmError::Unauthenticated | CrmError::Forbidden(_) => StatusCode::UNAUTHORIZED,
            CrmError::NotFound(_) => StatusCode::NOT_FOUND,
            CrmError::Conflict(_) => StatusCode::CONFLICT,
            CrmError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            CrmError::Validation(issues) => serde_json::json!({ "error": issues }),
            CrmError::Unauthenticated | CrmError::Forbidden(_) => {
                serde_json::json!({ "error": "Unauthorized" })
            }
            CrmError::NotFound(what) => serde_json::json!({ "error": format!("{} not found", what) }),
            CrmError::Conflict(msg) => serde_json::json!({ "error": msg }),
            CrmError::Storage(cause) => {
                error!("Storage failure: {}", cause);
                serde_json::json!({ "error": "Internal server error" })
            }
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
