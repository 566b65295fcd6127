pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{middleware, Router};
use tower_http::timeout::TimeoutLayer;

use crate::trader::AlgoTrader;
use crate::users::UserStorage;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub trader: Arc<AlgoTrader>,
    pub users: Arc<UserStorage>,
}

/// Admin surface: registration and login are open, key and pair management
/// require a bearer token.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/users/set_keys", post(handlers::set_keys))
        .route("/pair/start", post(handlers::start_pair))
        .route("/pair/stop", post(handlers::stop_pair))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::authorize,
        ));

    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .merge(protected)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

/// Serves the admin API until the shutdown future resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(%port, "admin server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
