use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lp_core::{Error, JobControlError};
use serde_json::json;

/// `lp_core::Error` rendered as `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::JobControl(JobControlError::AlreadyActive(_)) => StatusCode::CONFLICT,
            Error::JobControl(JobControlError::NotFound(_)) | Error::SourceNotFound(_) => StatusCode::NOT_FOUND,
            Error::JobControl(JobControlError::InvalidConfig(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_core::{JobId, PersistenceError};

    #[test]
    fn test_status_mapping() {
        let id = JobId::new();
        assert_eq!(ApiError::from(JobControlError::AlreadyActive(id)).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::from(JobControlError::NotFound(id)).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(JobControlError::InvalidConfig("no target languages".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(PersistenceError::Backend("down".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
