use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::api::{MarketSocket, SocketError};
use crate::indicators::{self, Indicator, IndicatorError};
use crate::models::{CandleInterval, MarketEvent, PairError, SharedUser};

#[derive(Debug, Error, PartialEq)]
pub enum SubscriptionError {
    #[error("current user is already logged")]
    UserIsLogged,
    #[error("current user is not logged")]
    UserIsNotLogged,
}

/// One (symbol, interval) trading pair: a socket session, an indicator and
/// the users subscribed to its signals.
pub struct Pair {
    symbol: String,
    interval: CandleInterval,
    users: Vec<SharedUser>,
    indicator: Arc<Mutex<Box<dyn Indicator>>>,
    socket: Box<dyn MarketSocket>,
    root: CancellationToken,
    run_cancel: CancellationToken,
    quiesced: Option<oneshot::Receiver<()>>,
}

impl Pair {
    pub fn new(
        symbol: impl Into<String>,
        interval: CandleInterval,
        indicator_name: &str,
        socket: Box<dyn MarketSocket>,
        shutdown: &CancellationToken,
    ) -> Result<Self, IndicatorError> {
        let indicator = indicators::build(indicator_name)?;
        Ok(Pair {
            symbol: symbol.into(),
            interval,
            users: Vec::new(),
            indicator: Arc::new(Mutex::new(indicator)),
            socket,
            root: shutdown.clone(),
            run_cancel: CancellationToken::new(),
            quiesced: None,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> CandleInterval {
        self.interval
    }

    pub fn users(&self) -> &[SharedUser] {
        &self.users
    }

    /// Subscribes a user to this pair's signals.
    pub fn add_user(&mut self, user: SharedUser) -> Result<(), SubscriptionError> {
        if self.is_user_logged(&user) {
            return Err(SubscriptionError::UserIsLogged);
        }
        self.users.push(user);
        Ok(())
    }

    /// Unsubscribes a user from this pair's signals.
    pub fn delete_user(&mut self, user: &SharedUser) -> Result<(), SubscriptionError> {
        let username = user.read().unwrap().username.clone();
        let position = self
            .users
            .iter()
            .position(|logged| logged.read().unwrap().username == username)
            .ok_or(SubscriptionError::UserIsNotLogged)?;
        self.users.remove(position);
        tracing::info!(
            %username,
            symbol = %self.symbol,
            interval = %self.interval,
            "user was removed from pair"
        );
        Ok(())
    }

    pub fn is_user_logged(&self, user: &SharedUser) -> bool {
        let username = user.read().unwrap().username.clone();
        self.users
            .iter()
            .any(|logged| logged.read().unwrap().username == username)
    }

    /// Opens the socket session and starts the candle processor.
    ///
    /// The socket's reader task feeds the internal candle channel; the
    /// processor drains it into the indicator and emits Buy/Sell crossings
    /// on the shared `events` channel. A non-duplicate indicator failure is
    /// published as a [`PairError`] and ends the run.
    pub async fn run(
        &mut self,
        events: mpsc::Sender<MarketEvent>,
        errors: mpsc::Sender<PairError>,
    ) -> Result<(), SocketError> {
        let cancel = self.root.child_token();
        self.run_cancel = cancel.clone();

        let (candles_tx, mut candles_rx) = mpsc::channel(1);
        self.socket
            .subscribe(
                &self.symbol,
                self.interval,
                cancel.clone(),
                candles_tx,
                errors.clone(),
            )
            .await?;

        let (quiesced_tx, quiesced_rx) = oneshot::channel();
        self.quiesced = Some(quiesced_rx);

        let indicator = Arc::clone(&self.indicator);
        let symbol = self.symbol.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            while let Some(candle) = candles_rx.recv().await {
                let verdict = indicator.lock().unwrap().update(candle);
                let signal = match verdict {
                    Ok(signal) => signal,
                    Err(IndicatorError::SameTimestamp) => continue,
                    Err(err) => {
                        let _ = errors
                            .send(PairError {
                                symbol: symbol.clone(),
                                interval,
                                message: err.to_string(),
                            })
                            .await;
                        return;
                    }
                };
                tracing::info!(%symbol, %interval, %candle, %signal, "candle processed");
                if signal.is_actionable() {
                    let event = MarketEvent {
                        signal,
                        symbol: symbol.clone(),
                        interval,
                        volume: candle.volume,
                        close: candle.close,
                    };
                    // the send blocks while dispatch is busy (intentional
                    // backpressure) but must still yield to cancellation
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = events.send(event) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            tracing::info!(%symbol, %interval, "pair was interrupted gracefully");
            let _ = quiesced_tx.send(());
        });
        Ok(())
    }

    /// Cancels the running session and awaits its quiescence pulse.
    pub async fn stop(&mut self) {
        self.run_cancel.cancel();
        if let Some(quiesced) = self.quiesced.take() {
            // a processor that died on an error path dropped the sender;
            // either way the session is finished when this resolves
            let _ = quiesced.await;
        }
    }
}

/// Registry of running pairs, indexed by symbol and then interval.
#[derive(Default)]
pub struct Pairs {
    inner: HashMap<String, HashMap<CandleInterval, Pair>>,
}

impl Pairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_exist(&self, symbol: &str, interval: CandleInterval) -> bool {
        self.get(symbol, interval).is_some()
    }

    pub fn get(&self, symbol: &str, interval: CandleInterval) -> Option<&Pair> {
        self.inner.get(symbol).and_then(|bucket| bucket.get(&interval))
    }

    pub fn get_mut(&mut self, symbol: &str, interval: CandleInterval) -> Option<&mut Pair> {
        self.inner
            .get_mut(symbol)
            .and_then(|bucket| bucket.get_mut(&interval))
    }

    pub fn insert(&mut self, pair: Pair) {
        self.inner
            .entry(pair.symbol.clone())
            .or_default()
            .insert(pair.interval, pair);
    }

    /// Removes a pair; an emptied symbol bucket is removed with it.
    pub fn remove(&mut self, symbol: &str, interval: CandleInterval) -> Option<Pair> {
        let bucket = self.inner.get_mut(symbol)?;
        let pair = bucket.remove(&interval);
        if bucket.is_empty() {
            self.inner.remove(symbol);
        }
        pair
    }

    pub fn len(&self) -> usize {
        self.inner.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Stops every running pair, awaiting each quiescence pulse.
    pub async fn shutdown(&mut self) -> usize {
        let mut stopped = 0;
        for bucket in self.inner.values_mut() {
            for pair in bucket.values_mut() {
                pair.stop().await;
                stopped += 1;
            }
        }
        stopped
    }
}
