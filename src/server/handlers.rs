use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;

use super::AppState;
use crate::models::{PairConfig, User};

/// Body payload, with deserialization failures downgraded from axum's 422
/// to a plain 400 domain error.
type Payload<T> = Result<Json<T>, JsonRejection>;

macro_rules! unwrap_payload {
    ($payload:expr) => {
        match $payload {
            Ok(Json(value)) => value,
            Err(rejection) => return bad_request(rejection.body_text()),
        }
    };
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct TokenBody {
    token: String,
}

/// Username extracted from a validated bearer token.
#[derive(Clone)]
pub struct AuthUser(pub String);

fn bad_request(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Validates the `Authorization: Bearer <jwt>` header and threads the
/// username through to the protected handlers.
pub async fn authorize(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(header) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(token) = header.strip_prefix("Bearer ") else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if token.is_empty() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.users.parse_token(token) {
        Ok(username) => {
            request.extensions_mut().insert(AuthUser(username));
            next.run(request).await
        }
        Err(_) => StatusCode::UNAUTHORIZED.into_response(),
    }
}

pub async fn register(State(state): State<AppState>, payload: Payload<User>) -> Response {
    let user = unwrap_payload!(payload);
    match state.trader.add_user(user) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => bad_request(err),
    }
}

pub async fn login(State(state): State<AppState>, payload: Payload<User>) -> Response {
    let user = unwrap_payload!(payload);
    match state.users.generate_jwt(&user) {
        Ok(token) => (StatusCode::OK, Json(TokenBody { token })).into_response(),
        Err(err) => bad_request(err),
    }
}

pub async fn set_keys(
    State(state): State<AppState>,
    Extension(AuthUser(username)): Extension<AuthUser>,
    payload: Payload<User>,
) -> Response {
    let user = unwrap_payload!(payload);
    match state
        .users
        .set_keys(&username, &user.public_key, &user.private_key)
    {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => bad_request(err),
    }
}

pub async fn start_pair(
    State(state): State<AppState>,
    Extension(AuthUser(username)): Extension<AuthUser>,
    payload: Payload<PairConfig>,
) -> Response {
    let config = unwrap_payload!(payload);
    match state.trader.add_pair(&username, config).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => bad_request(err),
    }
}

pub async fn stop_pair(
    State(state): State<AppState>,
    Extension(AuthUser(username)): Extension<AuthUser>,
    payload: Payload<PairConfig>,
) -> Response {
    let config = unwrap_payload!(payload);
    match state.trader.delete_pair(&username, config).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => bad_request(err),
    }
}
