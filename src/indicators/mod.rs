pub mod donchian;

pub use donchian::Donchian;

use thiserror::Error;

use crate::models::{Candle, Signal};

pub const DONCHIAN_NAME: &str = "Donchian";

/// Per-pair trading strategy fed one candle at a time.
pub trait Indicator: Send + std::fmt::Debug {
    /// Consumes the next candle and returns the resulting signal.
    fn update(&mut self, candle: Candle) -> Result<Signal, IndicatorError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    /// Benign duplicate: the candle's timestamp is not newer than the last
    /// accepted one. The caller drops the candle and keeps streaming.
    #[error("candle timestamp is not newer than the last seen one")]
    SameTimestamp,
    #[error("incorrect candle parameters")]
    InvalidCandle,
    #[error("such indicator doesn't exist: <{0}>")]
    UnknownIndicator(String),
}

/// Builds the indicator selected by name at pair creation.
pub fn build(name: &str) -> Result<Box<dyn Indicator>, IndicatorError> {
    match name {
        DONCHIAN_NAME => Ok(Box::new(Donchian::new())),
        other => Err(IndicatorError::UnknownIndicator(other.to_string())),
    }
}
