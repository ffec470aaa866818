//! Cookie-based identification middleware.
//!
//! Every request is attributed to a user: a valid cookie is decoded, and
//! anything else (no cookie, undecodable, bad signature) is transparently
//! issued a fresh identity with a Set-Cookie on the response. No request is
//! rejected for auth reasons on this surface.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use kurz_core::UserId;

use super::AppState;

/// The authenticated user id, inserted into request extensions.
#[derive(Clone, Copy, Debug)]
pub struct AuthUser(pub UserId);

pub async fn auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let decoded = jar
        .get(&state.cookie_name)
        .and_then(|cookie| state.service.auth().decode(cookie.value()).ok());

    let (user, fresh_token) = match decoded {
        Some(user) => (user, None),
        None => match state.service.auth().generate() {
            Ok((token, user)) => (user, Some(token)),
            Err(err) => {
                return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            }
        },
    };

    request.extensions_mut().insert(AuthUser(user));
    let response = next.run(request).await;

    match fresh_token {
        Some(token) => {
            let jar = jar.add(Cookie::new(state.cookie_name.clone(), token));
            (jar, response).into_response()
        }
        None => response,
    }
}
