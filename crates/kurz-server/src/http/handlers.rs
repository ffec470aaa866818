use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::net::IpAddr;

use super::auth::AuthUser;
use super::error::ApiError;
use super::model::{BatchShortenRequest, ShortenRequest, ShortenResponse};
use super::AppState;

fn created_or_conflict(duplicate: bool) -> StatusCode {
    if duplicate {
        StatusCode::CONFLICT
    } else {
        StatusCode::CREATED
    }
}

/// `POST /`: plain-text body holding the URL to shorten.
pub async fn shorten_text(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    body: String,
) -> Result<Response, ApiError> {
    let shortened = state.service.shorten(user, &body).await?;
    Ok((created_or_conflict(shortened.duplicate), shortened.short_url).into_response())
}

/// `POST /api/shorten`: JSON `{"url": ...}`, answering `{"result": ...}`.
pub async fn shorten_json(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    body: String,
) -> Result<Response, ApiError> {
    let request: ShortenRequest = parse_json_body(&body)?;
    let shortened = state.service.shorten(user, &request.url).await?;

    Ok((
        created_or_conflict(shortened.duplicate),
        Json(ShortenResponse {
            result: shortened.short_url,
        }),
    )
        .into_response())
}

/// `POST /api/shorten/batch`: array of `{correlation_id, original_url}`.
pub async fn shorten_batch(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    body: String,
) -> Result<Response, ApiError> {
    let request: Vec<BatchShortenRequest> = parse_json_body(&body)?;
    let items = request
        .into_iter()
        .map(|item| (item.correlation_id, item.original_url))
        .collect();

    let results = state.service.shorten_batch(user, items).await?;
    Ok((StatusCode::CREATED, Json(results)).into_response())
}

/// `GET /{token}`: temporary redirect to the original URL.
pub async fn redirect(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let long_url = state.service.resolve(&token).await?;
    Ok((StatusCode::TEMPORARY_REDIRECT, [(LOCATION, long_url)]).into_response())
}

/// `GET /api/user/urls`: every live mapping of the calling user.
pub async fn user_urls(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Response {
    match state.service.user_urls(user).await {
        Ok(urls) if urls.is_empty() => Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("[]"))
            .unwrap_or_else(|_| StatusCode::NO_CONTENT.into_response()),
        Ok(urls) => (StatusCode::OK, Json(urls)).into_response(),
        // This surface reports backend trouble as a client-visible 400.
        Err(_) => (StatusCode::BAD_REQUEST, "Something went wrong!").into_response(),
    }
}

/// `DELETE /api/user/urls`: JSON array of tokens; acknowledged with 202
/// before the deletions are applied.
pub async fn delete_user_urls(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let tokens: Vec<String> = parse_json_body(&body)?;
    state.service.delete_urls(user, tokens).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /ping`: storage liveness probe.
pub async fn ping(State(state): State<AppState>) -> StatusCode {
    match state.service.ping().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `GET /api/internal/stats`: gated by the trusted subnet.
pub async fn internal_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let real_ip: Option<IpAddr> = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok());

    let stats = state.service.internal_stats(real_ip).await?;
    Ok(Json(stats).into_response())
}

fn parse_json_body<'a, T: serde::Deserialize<'a>>(body: &'a str) -> Result<T, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError(crate::service::ServiceError::InvalidInput(
            "empty request body".to_string(),
        )));
    }
    serde_json::from_str(body).map_err(|e| {
        ApiError(crate::service::ServiceError::InvalidInput(format!(
            "malformed request body: {e}"
        )))
    })
}
