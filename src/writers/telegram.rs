use async_trait::async_trait;
use serde::Serialize;

use super::{MessageWriter, WriterError};
use crate::models::{OrderFill, User};

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Writer that delivers order outcomes to the user's Telegram chat through
/// the Bot API. Users without a chat id are skipped.
pub struct TelegramWriter {
    client: reqwest::Client,
    send_url: String,
}

impl TelegramWriter {
    pub fn new(token: &str) -> Self {
        TelegramWriter {
            client: reqwest::Client::new(),
            send_url: format!("{TELEGRAM_API}/bot{token}/sendMessage"),
        }
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<(), WriterError> {
        self.client
            .post(&self.send_url)
            .json(&SendMessage { chat_id, text })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl MessageWriter for TelegramWriter {
    async fn write_message(&self, fill: &OrderFill, user: &User) -> Result<(), WriterError> {
        let Some(chat_id) = user.telegram_id else {
            return Ok(());
        };
        self.send(chat_id, &fill.to_string()).await
    }

    async fn write_error(&self, message: &str, user: &User) -> Result<(), WriterError> {
        let Some(chat_id) = user.telegram_id else {
            return Ok(());
        };
        self.send(chat_id, message).await
    }

    async fn shutdown(&self) {
        tracing::info!("telegram writer stopped");
    }
}
