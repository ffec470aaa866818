use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::service::ServiceError;

/// HTTP rendering of the service error taxonomy.
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            ServiceError::InvalidInput(message) => {
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            // Unknown tokens answer 400 rather than 404 on this surface.
            ServiceError::NotFound(_) => {
                (StatusCode::BAD_REQUEST, "Bad request!").into_response()
            }
            ServiceError::Gone => StatusCode::GONE.into_response(),
            ServiceError::Forbidden => StatusCode::FORBIDDEN.into_response(),
            ServiceError::Storage(err) => {
                error!(%err, "storage failure");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
