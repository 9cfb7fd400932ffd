use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ride_tracker_data_management::DataManagerError;
use ride_tracker_lib::log_entry::EntryError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("No image uploaded")]
    MissingImage,

    #[error("Not found")]
    NotFound,

    #[error("Could not read odometer. Please try again.")]
    UnreadableOdometer,

    #[error("AI Service Failed")]
    AiService,

    #[error("Internal error: {0}")]
    InternalError(#[from] DataManagerError),
}

impl From<EntryError> for AppError {
    fn from(err: EntryError) -> Self {
        AppError::MalformedPayload(err.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AppError::MalformedPayload(_) | AppError::MissingImage => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::UnreadableOdometer => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::AiService | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        // Internal details stay in the log
        let message = match &self {
            AppError::InternalError(_) => "Internal error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(AppError::NotAuthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::MissingImage.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::UnreadableOdometer.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(AppError::AiService.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            AppError::InternalError(DataManagerError::Database("locked".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
