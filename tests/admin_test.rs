use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

use krakenbot::api::{MarketSocket, OrderApi, OrderApiError, SocketError, SocketFactory};
use krakenbot::db::{OrderStore, OrderStoreError};
use krakenbot::models::{Candle, CandleInterval, MarketEvent, OrderFill, PairError, User};
use krakenbot::server::{router, AppState};
use krakenbot::trader::AlgoTrader;
use krakenbot::users::UserStorage;

struct IdleSocket;

#[async_trait]
impl MarketSocket for IdleSocket {
    async fn subscribe(
        &mut self,
        _symbol: &str,
        _interval: CandleInterval,
        cancel: CancellationToken,
        candles: mpsc::Sender<Candle>,
        _errors: mpsc::Sender<PairError>,
    ) -> Result<(), SocketError> {
        tokio::spawn(async move {
            cancel.cancelled().await;
            drop(candles);
        });
        Ok(())
    }
}

struct IdleFactory;

impl SocketFactory for IdleFactory {
    fn create(&self) -> Box<dyn MarketSocket> {
        Box::new(IdleSocket)
    }
}

struct NullApi;

#[async_trait]
impl OrderApi for NullApi {
    async fn add_order(&self, _event: &MarketEvent, _user: &User) -> Result<OrderFill, OrderApiError> {
        Err(OrderApiError::NotSuccess)
    }
}

struct NullStore;

#[async_trait]
impl OrderStore for NullStore {
    async fn connect(&self) -> Result<(), OrderStoreError> {
        Ok(())
    }

    async fn add_order(&self, _fill: &OrderFill) -> Result<(), OrderStoreError> {
        Ok(())
    }

    async fn get_orders(&self, _limit: i64) -> Result<Vec<OrderFill>, OrderStoreError> {
        Ok(Vec::new())
    }

    async fn shutdown(&self) {}
}

fn admin() -> Router {
    let users = Arc::new(UserStorage::new("admin-test-key", 1).unwrap());
    let trader = Arc::new(AlgoTrader::new(
        users.clone(),
        Arc::new(NullApi),
        Arc::new(NullStore),
        Arc::new(IdleFactory),
        0,
    ));
    router(AppState { trader, users })
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_with_token(uri: &str, token: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

const ALICE: &str =
    r#"{"username":"alice","public_key":"public","private_key":"cHJpdmF0ZQ=="}"#;
const PAIR: &str =
    r#"{"pair_name":"PI_XBTUSD","pair_interval":"1m","indicator_name":"Donchian","limit":0.01}"#;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_register_then_duplicate() {
    let app = admin();

    let response = app.clone().oneshot(post("/auth/register", ALICE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.oneshot(post("/auth/register", ALICE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "the user is already existed");
}

#[tokio::test]
async fn test_register_rejects_missing_keys() {
    let app = admin();
    let response = app
        .oneshot(post("/auth/register", r#"{"username":"keyless"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_returns_token() {
    let app = admin();
    app.clone().oneshot(post("/auth/register", ALICE)).await.unwrap();

    let response = app.clone().oneshot(post("/auth/login", ALICE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["token"].as_str().is_some_and(|token| !token.is_empty()));

    let impostor = r#"{"username":"alice","public_key":"public","private_key":"stolen"}"#;
    let response = app.oneshot(post("/auth/login", impostor)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = admin();

    let response = app.clone().oneshot(post("/pair/start", PAIR)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(post_with_token("/pair/start", "garbage", PAIR))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = post("/pair/stop", PAIR);
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_full_subscription_flow() {
    let app = admin();
    app.clone().oneshot(post("/auth/register", ALICE)).await.unwrap();

    let response = app.clone().oneshot(post("/auth/login", ALICE)).await.unwrap();
    let token = body_json(response).await["token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_with_token("/pair/start", &token, PAIR))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // a second start of the same pair by the same user is a domain error
    let response = app
        .clone()
        .oneshot(post_with_token("/pair/start", &token, PAIR))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "current user is already logged");

    let response = app
        .clone()
        .oneshot(post_with_token("/pair/stop", &token, PAIR))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(post_with_token(
            "/users/set_keys",
            &token,
            r#"{"username":"alice","public_key":"fresh","private_key":"keys"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_pair_start_rejects_unknown_interval() {
    let app = admin();
    app.clone().oneshot(post("/auth/register", ALICE)).await.unwrap();
    let response = app.clone().oneshot(post("/auth/login", ALICE)).await.unwrap();
    let token = body_json(response).await["token"].as_str().unwrap().to_string();

    let bad = r#"{"pair_name":"PI_XBTUSD","pair_interval":"7m","indicator_name":"Donchian"}"#;
    let response = app
        .oneshot(post_with_token("/pair/start", &token, bad))
        .await
        .unwrap();
    // the unknown tag is rejected at the deserialization boundary
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().is_some());
}
