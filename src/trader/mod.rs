pub mod pair;

pub use pair::{Pair, Pairs, SubscriptionError};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::api::{OrderApi, SocketError, SocketFactory};
use crate::db::{OrderStore, OrderStoreError};
use crate::indicators::IndicatorError;
use crate::models::{DomainError, MarketEvent, PairConfig, PairError, SharedUser, User};
use crate::users::{UserStorage, UserStoreError};
use crate::writers::{MessageWriter, MessageWriters};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TraderError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Indicator(#[from] IndicatorError),
    #[error(transparent)]
    Users(#[from] UserStoreError),
    #[error(transparent)]
    Orders(#[from] OrderStoreError),
    #[error("can't connect <{0}>")]
    Connect(#[from] SocketError),
    #[error("trading engine is shut down")]
    NotRunning,
}

/// Orchestrator of the trading pipeline.
///
/// Owns the pair registry and the shared event and error channels. A single
/// loop consumes market events (dispatching per-user orders) and pair errors
/// (applying the reconnection policy). Subscription management and the event
/// loop serialize on the registry lock.
pub struct AlgoTrader {
    users: Arc<UserStorage>,
    pairs: Mutex<Pairs>,
    api: Arc<dyn OrderApi>,
    orders: Arc<dyn OrderStore>,
    writers: MessageWriters,
    sockets: Arc<dyn SocketFactory>,
    reconnection_times: u32,
    running: AtomicUsize,
    shutdown: CancellationToken,
    events_tx: StdMutex<Option<mpsc::Sender<MarketEvent>>>,
    errors_tx: StdMutex<Option<mpsc::Sender<PairError>>>,
    receivers: StdMutex<Option<(mpsc::Receiver<MarketEvent>, mpsc::Receiver<PairError>)>>,
    loop_done_tx: StdMutex<Option<oneshot::Sender<()>>>,
    loop_done_rx: StdMutex<Option<oneshot::Receiver<()>>>,
}

fn snapshot(user: &SharedUser) -> User {
    user.read().unwrap().clone()
}

impl AlgoTrader {
    pub fn new(
        users: Arc<UserStorage>,
        api: Arc<dyn OrderApi>,
        orders: Arc<dyn OrderStore>,
        sockets: Arc<dyn SocketFactory>,
        reconnection_times: u32,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let (loop_done_tx, loop_done_rx) = oneshot::channel();
        AlgoTrader {
            users,
            pairs: Mutex::new(Pairs::new()),
            api,
            orders,
            writers: MessageWriters::new(),
            sockets,
            reconnection_times,
            running: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            events_tx: StdMutex::new(Some(events_tx)),
            errors_tx: StdMutex::new(Some(errors_tx)),
            receivers: StdMutex::new(Some((events_rx, errors_rx))),
            loop_done_tx: StdMutex::new(Some(loop_done_tx)),
            loop_done_rx: StdMutex::new(Some(loop_done_rx)),
        }
    }

    /// Number of pairs with a live socket session.
    pub fn running_pairs(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Connects the order store and starts the central event loop.
    pub async fn run(self: &Arc<Self>) -> Result<(), TraderError> {
        self.orders.connect().await?;
        let (events_rx, errors_rx) = self
            .receivers
            .lock()
            .unwrap()
            .take()
            .ok_or(TraderError::NotRunning)?;
        let loop_done = self
            .loop_done_tx
            .lock()
            .unwrap()
            .take()
            .ok_or(TraderError::NotRunning)?;
        let trader = Arc::clone(self);
        tokio::spawn(trader.event_loop(events_rx, errors_rx, loop_done));
        Ok(())
    }

    async fn event_loop(
        self: Arc<Self>,
        mut events_rx: mpsc::Receiver<MarketEvent>,
        mut errors_rx: mpsc::Receiver<PairError>,
        loop_done: oneshot::Sender<()>,
    ) {
        let mut errors_open = true;
        loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => self.dispatch_event(event).await,
                    None => break,
                },
                error = errors_rx.recv(), if errors_open => match error {
                    Some(pair_error) => self.handle_pair_error(pair_error).await,
                    None => errors_open = false,
                },
            }
        }
        tracing::info!("all signals were processed gracefully");
        let _ = loop_done.send(());
    }

    /// Places one order per subscribed user. Failures are independent: a
    /// broken order is reported to its user and the loop moves on.
    async fn dispatch_event(&self, event: MarketEvent) {
        let pairs = self.pairs.lock().await;
        let Some(pair) = pairs.get(&event.symbol, event.interval) else {
            return;
        };
        for user in pair.users() {
            let user = snapshot(user);
            match self.api.add_order(&event, &user).await {
                Ok(fill) => {
                    if let Err(err) = self.orders.add_order(&fill).await {
                        tracing::error!(error = %err, "order is placed but not persisted");
                    }
                    self.writers.write_messages(&fill, &user).await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "order is broken");
                    self.writers.write_errors(&err.to_string(), &user).await;
                }
            }
        }
    }

    /// Reacts to a lost pair: re-runs it under the reconnection policy and
    /// evicts it when recovery fails and nobody is subscribed anymore.
    async fn handle_pair_error(&self, pair_error: PairError) {
        let mut pairs = self.pairs.lock().await;
        let previous = self.running.load(Ordering::SeqCst);
        if previous > 0 {
            self.running.store(previous - 1, Ordering::SeqCst);
        }
        let Some(pair) = pairs.get_mut(&pair_error.symbol, pair_error.interval) else {
            return;
        };
        let (Some(events), Some(errors)) = (
            self.events_tx.lock().unwrap().clone(),
            self.errors_tx.lock().unwrap().clone(),
        ) else {
            return;
        };
        if let Err(err) = self.run_pair(pair, events, errors).await {
            let users: Vec<User> = pair.users().iter().map(snapshot).collect();
            if users.is_empty() {
                pairs.remove(&pair_error.symbol, pair_error.interval);
                tracing::warn!(
                    symbol = %pair_error.symbol,
                    interval = %pair_error.interval,
                    error = %pair_error.message,
                    "pair was deleted by error"
                );
            }
            self.writers.write_errors_to_all(&err.to_string(), &users).await;
        }
    }

    /// Runs a pair's session, retrying up to the configured number of times
    /// with a fixed delay. Success on any attempt resumes streaming.
    async fn run_pair(
        &self,
        pair: &mut Pair,
        events: mpsc::Sender<MarketEvent>,
        errors: mpsc::Sender<PairError>,
    ) -> Result<(), SocketError> {
        let mut outcome = pair.run(events.clone(), errors.clone()).await;
        let mut attempt = 0;
        while outcome.is_err() && attempt < self.reconnection_times {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
            attempt += 1;
            tracing::warn!(
                symbol = %pair.symbol(),
                interval = %pair.interval(),
                attempt,
                "reconnecting pair"
            );
            outcome = pair.run(events.clone(), errors.clone()).await;
        }
        outcome?;
        self.running.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Registers a new user.
    pub fn add_user(&self, user: User) -> Result<(), TraderError> {
        let username = user.username.clone();
        self.users.add_user(user)?;
        tracing::info!(%username, "user was added");
        Ok(())
    }

    /// Subscribes a user to a pair, creating and starting the pair when it
    /// does not exist yet.
    pub async fn add_pair(&self, username: &str, config: PairConfig) -> Result<(), TraderError> {
        config.validate()?;
        let user = self.users.get_user(username)?;
        user.write().unwrap().set_limit(&config.symbol, config.limit)?;

        let mut pairs = self.pairs.lock().await;
        if let Some(pair) = pairs.get_mut(&config.symbol, config.interval) {
            pair.add_user(user)?;
            tracing::info!(
                %username,
                symbol = %config.symbol,
                interval = %config.interval,
                "user was added to existing pair"
            );
            return Ok(());
        }
        self.add_and_run_pair(&mut pairs, &config, user).await?;
        tracing::info!(
            %username,
            symbol = %config.symbol,
            interval = %config.interval,
            "pair was created and run"
        );
        Ok(())
    }

    async fn add_and_run_pair(
        &self,
        pairs: &mut Pairs,
        config: &PairConfig,
        user: SharedUser,
    ) -> Result<(), TraderError> {
        let socket = self.sockets.create();
        let mut pair = Pair::new(
            &config.symbol,
            config.interval,
            &config.indicator,
            socket,
            &self.shutdown,
        )?;
        pair.add_user(user)?;

        let (Some(events), Some(errors)) = (
            self.events_tx.lock().unwrap().clone(),
            self.errors_tx.lock().unwrap().clone(),
        ) else {
            return Err(TraderError::NotRunning);
        };
        self.run_pair(&mut pair, events, errors).await?;
        pairs.insert(pair);
        Ok(())
    }

    /// Unsubscribes a user from a pair. The last subscriber leaving stops
    /// the pair and removes it from the registry; an absent pair is a no-op.
    pub async fn delete_pair(&self, username: &str, config: PairConfig) -> Result<(), TraderError> {
        config.validate()?;
        let user = self.users.get_user(username)?;

        let mut pairs = self.pairs.lock().await;
        let Some(pair) = pairs.get_mut(&config.symbol, config.interval) else {
            return Ok(());
        };
        pair.delete_user(&user)?;
        if pair.users().is_empty() {
            pair.stop().await;
            let previous = self.running.load(Ordering::SeqCst);
            if previous > 0 {
                self.running.store(previous - 1, Ordering::SeqCst);
            }
            pairs.remove(&config.symbol, config.interval);
            tracing::info!(
                %username,
                symbol = %config.symbol,
                interval = %config.interval,
                "pair was deleted"
            );
        }
        Ok(())
    }

    /// Adds a writer to the broadcast set.
    pub async fn add_message_writer(&self, writer: Box<dyn MessageWriter>) {
        self.writers.add_writer(writer).await;
    }

    /// Gracefully stops the engine: all pairs, then the event loop, then
    /// the writers and the order store.
    pub async fn shut_down(&self) {
        self.shutdown.cancel();
        {
            let mut pairs = self.pairs.lock().await;
            let stopped = pairs.shutdown().await;
            self.running.store(0, Ordering::SeqCst);
            tracing::info!(stopped, "all pairs were interrupted gracefully");
        }
        // closing the events channel first lets the loop drain pending
        // signals before it exits
        self.events_tx.lock().unwrap().take();
        self.errors_tx.lock().unwrap().take();
        // when run() was never called the sender is still parked here and
        // there is no loop to wait for
        let never_started = self.loop_done_tx.lock().unwrap().take().is_some();
        let receiver = self.loop_done_rx.lock().unwrap().take();
        if let (false, Some(receiver)) = (never_started, receiver) {
            let _ = receiver.await;
        }
        self.writers.shutdown().await;
        self.orders.shutdown().await;
    }
}
