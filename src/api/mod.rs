pub mod kraken_rest;
pub mod kraken_socket;

pub use kraken_rest::KrakenRestClient;
pub use kraken_socket::{KrakenSocket, KrakenSocketFactory};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{Candle, CandleInterval, MarketEvent, OrderFill, PairError, User};

/// Private REST surface of the exchange: signed order placement.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Places an Immediate-Or-Cancel order for `event` with `user`'s
    /// credentials and returns the normalized fill.
    async fn add_order(&self, event: &MarketEvent, user: &User) -> Result<OrderFill, OrderApiError>;
}

/// Streaming surface of the exchange: one candle subscription per session.
///
/// `subscribe` connects, performs the subscription handshake, and leaves a
/// reader task running. Decoded candles arrive on `candles`; the channel is
/// closed when the reader exits. Connection loss is reported on `errors`.
#[async_trait]
pub trait MarketSocket: Send {
    async fn subscribe(
        &mut self,
        symbol: &str,
        interval: CandleInterval,
        cancel: CancellationToken,
        candles: mpsc::Sender<Candle>,
        errors: mpsc::Sender<PairError>,
    ) -> Result<(), SocketError>;
}

/// Builds a fresh socket session per pair; swapped out in tests.
pub trait SocketFactory: Send + Sync {
    fn create(&self) -> Box<dyn MarketSocket>;
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("error in socket connection: <{0}>")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("error in subscription reading: <{0}>")]
    Handshake(&'static str),
    #[error("serialization error: <{0}>")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum OrderApiError {
    #[error("can't send order request: <{0}>")]
    Http(#[from] reqwest::Error),
    #[error("order request is sent, but status code: <{0}>")]
    Status(u16),
    #[error("invalid order url: <{0}>")]
    Url(String),
    #[error("base64 decoding error: <{0}>")]
    KeyDecode(#[from] base64::DecodeError),
    #[error("form encoding error: <{0}>")]
    FormEncode(#[from] serde_urlencoded::ser::Error),
    #[error("mac encoding error")]
    Sign,
    #[error("can't process order cause of stock market side problem")]
    NotSuccess,
    #[error("can't process order because of <{0}>")]
    NotPlaced(String),
    #[error("incorrect received data: {0}")]
    MalformedResponse(&'static str),
}
