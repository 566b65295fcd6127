pub mod telegram;

pub use telegram::TelegramWriter;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{OrderFill, User};

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("can't deliver message: <{0}>")]
    Delivery(#[from] reqwest::Error),
}

/// Out-of-band notification channel for order outcomes.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    async fn write_message(&self, fill: &OrderFill, user: &User) -> Result<(), WriterError>;

    async fn write_error(&self, message: &str, user: &User) -> Result<(), WriterError>;

    async fn shutdown(&self);
}

/// Dynamic broadcast set of writers. A failing writer is logged and skipped;
/// it never blocks its siblings or the dispatch path.
pub struct MessageWriters {
    writers: Mutex<Vec<Box<dyn MessageWriter>>>,
}

impl MessageWriters {
    pub fn new() -> Self {
        MessageWriters {
            writers: Mutex::new(Vec::new()),
        }
    }

    pub async fn add_writer(&self, writer: Box<dyn MessageWriter>) {
        self.writers.lock().await.push(writer);
    }

    pub async fn write_messages(&self, fill: &OrderFill, user: &User) {
        let writers = self.writers.lock().await;
        for writer in writers.iter() {
            if let Err(err) = writer.write_message(fill, user).await {
                tracing::warn!(error = %err, username = %user.username, "writer failed");
            }
        }
    }

    pub async fn write_errors(&self, message: &str, user: &User) {
        let writers = self.writers.lock().await;
        for writer in writers.iter() {
            if let Err(err) = writer.write_error(message, user).await {
                tracing::warn!(error = %err, username = %user.username, "writer failed");
            }
        }
    }

    pub async fn write_errors_to_all(&self, message: &str, users: &[User]) {
        let writers = self.writers.lock().await;
        for user in users {
            for writer in writers.iter() {
                if let Err(err) = writer.write_error(message, user).await {
                    tracing::warn!(error = %err, username = %user.username, "writer failed");
                }
            }
        }
    }

    /// Invokes every writer's shutdown once.
    pub async fn shutdown(&self) {
        let writers = self.writers.lock().await;
        for writer in writers.iter() {
            writer.shutdown().await;
        }
    }
}

impl Default for MessageWriters {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer that reports through the process log.
pub struct ConsoleWriter;

#[async_trait]
impl MessageWriter for ConsoleWriter {
    async fn write_message(&self, fill: &OrderFill, user: &User) -> Result<(), WriterError> {
        tracing::info!(username = %user.username, %fill, "order placed");
        Ok(())
    }

    async fn write_error(&self, message: &str, user: &User) -> Result<(), WriterError> {
        tracing::warn!(username = %user.username, %message, "order problem");
        Ok(())
    }

    async fn shutdown(&self) {}
}
