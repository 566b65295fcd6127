use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{MarketSocket, SocketError, SocketFactory};
use crate::models::{Candle, CandleInterval, PairError};

pub const DEFAULT_WS_URL: &str = "wss://futures.kraken.com/ws/v1?chart";

const HEARTBEAT_FEED: &str = "heartbeat";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Serialize)]
struct SubscribeRequest {
    event: &'static str,
    feed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_ids: Option<Vec<String>>,
}

impl SubscribeRequest {
    fn heartbeat() -> Self {
        SubscribeRequest {
            event: "subscribe",
            feed: HEARTBEAT_FEED.to_string(),
            product_ids: None,
        }
    }

    fn candles(symbol: &str, interval: CandleInterval) -> Self {
        SubscribeRequest {
            event: "subscribe",
            feed: interval.feed().to_string(),
            product_ids: Some(vec![symbol.to_string()]),
        }
    }
}

/// Control frame of the subscription handshake.
#[derive(Debug, Default, Deserialize)]
struct ControlFrame {
    #[serde(default)]
    event: String,
    #[serde(default)]
    version: i64,
}

/// Steady-state frame: either a heartbeat or a candle update.
#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    feed: String,
    candle: Option<Candle>,
}

/// One streaming session against the exchange's candle feed.
pub struct KrakenSocket {
    url: String,
}

impl KrakenSocket {
    pub fn new(url: impl Into<String>) -> Self {
        KrakenSocket { url: url.into() }
    }

    /// Reads handshake frames until the next text frame, skipping transport
    /// noise (pings and pongs).
    async fn read_control(read: &mut WsSource) -> Result<ControlFrame, SocketError> {
        loop {
            let message = read
                .next()
                .await
                .ok_or(SocketError::Handshake("stream closed during handshake"))??;
            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Ping(_) | Message::Pong(_) => continue,
                _ => return Err(SocketError::Handshake("unexpected frame during handshake")),
            }
        }
    }
}

#[async_trait]
impl MarketSocket for KrakenSocket {
    async fn subscribe(
        &mut self,
        symbol: &str,
        interval: CandleInterval,
        cancel: CancellationToken,
        candles: mpsc::Sender<Candle>,
        errors: mpsc::Sender<PairError>,
    ) -> Result<(), SocketError> {
        let (stream, _) = connect_async(&self.url).await?;
        tracing::info!(url = %self.url, %symbol, %interval, "connection established");
        let (mut write, mut read) = stream.split();

        let heartbeat = serde_json::to_string(&SubscribeRequest::heartbeat())?;
        write.send(Message::Text(heartbeat.into())).await?;
        let subscription = serde_json::to_string(&SubscribeRequest::candles(symbol, interval))?;
        write.send(Message::Text(subscription.into())).await?;

        let info = Self::read_control(&mut read).await?;
        if info.event != "info" || info.version != 1 {
            return Err(SocketError::Handshake("incorrect info response"));
        }
        for _ in 0..2 {
            let ack = Self::read_control(&mut read).await?;
            if ack.event != "subscribed" {
                return Err(SocketError::Handshake("subscription is failed"));
            }
        }

        let symbol = symbol.to_string();
        tokio::spawn(run_reader(
            write, read, symbol, interval, cancel, candles, errors,
        ));
        Ok(())
    }
}

/// Drains the socket until cancellation or a broken frame. Holding the write
/// half keeps the connection open for the lifetime of the task; dropping the
/// candle sender on exit closes the pair's candle channel.
async fn run_reader(
    _write: WsSink,
    mut read: WsSource,
    symbol: String,
    interval: CandleInterval,
    cancel: CancellationToken,
    candles: mpsc::Sender<Candle>,
    errors: mpsc::Sender<PairError>,
) {
    let fail = |message: String| PairError {
        symbol: symbol.clone(),
        interval,
        message,
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(_)) | None => {
                        tracing::warn!(%symbol, %interval, "stream has lost connection");
                        let _ = errors.send(fail("connection is closed".to_string())).await;
                        return;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(%symbol, %interval, error = %err, "stream has lost connection");
                        let _ = errors.send(fail(err.to_string())).await;
                        return;
                    }
                };
                let frame: StreamFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        let _ = errors.send(fail(err.to_string())).await;
                        return;
                    }
                };
                if frame.feed == HEARTBEAT_FEED {
                    continue;
                }
                match frame.candle {
                    Some(candle) => {
                        if candles.send(candle).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        let _ = errors.send(fail("unexpected frame in candle stream".to_string())).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Creates [`KrakenSocket`] sessions for new pairs.
pub struct KrakenSocketFactory {
    url: String,
}

impl KrakenSocketFactory {
    pub fn new(url: impl Into<String>) -> Self {
        KrakenSocketFactory { url: url.into() }
    }
}

impl Default for KrakenSocketFactory {
    fn default() -> Self {
        Self::new(DEFAULT_WS_URL)
    }
}

impl SocketFactory for KrakenSocketFactory {
    fn create(&self) -> Box<dyn MarketSocket> {
        Box::new(KrakenSocket::new(self.url.clone()))
    }
}
