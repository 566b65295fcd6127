use std::sync::Arc;

use krakenbot::api::kraken_rest::DEFAULT_ORDER_URL;
use krakenbot::api::kraken_socket::DEFAULT_WS_URL;
use krakenbot::api::{KrakenRestClient, KrakenSocketFactory};
use krakenbot::config::Config;
use krakenbot::db::PostgresOrderStore;
use krakenbot::server::{self, AppState};
use krakenbot::trader::AlgoTrader;
use krakenbot::users::UserStorage;
use krakenbot::writers::{ConsoleWriter, TelegramWriter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "krakenbot=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    let users = Arc::new(UserStorage::new(config.sign_key.as_str(), config.ttl_hours)?);
    let orders = Arc::new(PostgresOrderStore::new(config.db.dsn()));
    let api = Arc::new(KrakenRestClient::new(DEFAULT_ORDER_URL)?);
    let sockets = Arc::new(KrakenSocketFactory::new(DEFAULT_WS_URL));

    let trader = Arc::new(AlgoTrader::new(
        users.clone(),
        api,
        orders,
        sockets,
        config.reconnection_quantity,
    ));
    trader.add_message_writer(Box::new(ConsoleWriter)).await;
    if let Some(token) = &config.tg_token {
        trader.add_message_writer(Box::new(TelegramWriter::new(token))).await;
    }

    trader.run().await?;
    tracing::info!("trading engine started");

    let state = AppState {
        trader: trader.clone(),
        users,
    };
    server::serve(state, config.srv_port, shutdown_signal()).await?;

    trader.shut_down().await;
    tracing::info!("trading engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "can't listen for shutdown signal");
    }
}
