use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Candle time interval supported by the exchange's candle feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "2m")]
    TwoMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "10m")]
    TenMinutes,
}

impl CandleInterval {
    /// Feed name used in subscription frames, e.g. `candles_trade_1m`.
    pub fn feed(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "candles_trade_1m",
            CandleInterval::TwoMinutes => "candles_trade_2m",
            CandleInterval::FiveMinutes => "candles_trade_5m",
            CandleInterval::TenMinutes => "candles_trade_10m",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::TwoMinutes => "2m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::TenMinutes => "10m",
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CandleInterval {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(CandleInterval::OneMinute),
            "2m" => Ok(CandleInterval::TwoMinutes),
            "5m" => Ok(CandleInterval::FiveMinutes),
            "10m" => Ok(CandleInterval::TenMinutes),
            other => Err(DomainError::UnknownInterval(other.to_string())),
        }
    }
}

/// OHLCV aggregate over one interval, as decoded from the candle feed.
///
/// The exchange sends prices as strings; deserialization parses them into
/// finite floats and fails the frame otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub time: i64,
    pub volume: i64,
}

#[derive(Deserialize)]
struct CandleWire {
    open: String,
    close: String,
    high: String,
    low: String,
    time: i64,
    volume: i64,
}

fn parse_price<E: serde::de::Error>(raw: &str) -> Result<f64, E> {
    let value: f64 = raw
        .parse()
        .map_err(|_| E::custom(format!("unparsable price <{raw}>")))?;
    if !value.is_finite() {
        return Err(E::custom(format!("non-finite price <{raw}>")));
    }
    Ok(value)
}

impl<'de> Deserialize<'de> for Candle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = CandleWire::deserialize(deserializer)?;
        Ok(Candle {
            open: parse_price(&wire.open)?,
            close: parse_price(&wire.close)?,
            high: parse_price(&wire.high)?,
            low: parse_price(&wire.low)?,
            time: wire.time,
            volume: wire.volume,
        })
    }
}

impl Candle {
    /// All numeric fields must be non-negative.
    pub fn is_valid(&self) -> bool {
        self.open >= 0.0
            && self.high >= 0.0
            && self.low >= 0.0
            && self.close >= 0.0
            && self.time >= 0
            && self.volume >= 0
    }
}

impl fmt::Display for Candle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Open: {:.2}; High: {:.2}; Low: {:.2}; Close: {:.2}; Volume: {};",
            self.open, self.high, self.low, self.close, self.volume
        )
    }
}

/// Indicator verdict for one candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    WaitToBuy,
    WaitToSell,
    WaitToSet,
}

impl Signal {
    /// Wire literal; Buy/Sell double as the REST order side.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "buy",
            Signal::Sell => "sell",
            Signal::WaitToBuy => "wait to buy",
            Signal::WaitToSell => "wait to sell",
            Signal::WaitToSet => "wait to set",
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, Signal::Buy | Signal::Sell)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Buy/Sell decision carried from a pair to the order dispatch path.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketEvent {
    pub signal: Signal,
    pub symbol: String,
    pub interval: CandleInterval,
    pub volume: i64,
    pub close: f64,
}

impl fmt::Display for MarketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name: {}, Side: {}, Interval: {}, Volume: {}, Price: {:.2}",
            self.symbol, self.signal, self.interval, self.volume, self.close
        )
    }
}

/// Normalized record of a placed order, persisted and sent to writers.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub symbol: String,
    pub order_id: String,
    pub price: f64,
    pub amount: i64,
    pub side: String,
}

impl fmt::Display for OrderFill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name: <{}>, OrderID: <{}>, Price: <{:.2}>, Amount: <{}>, Side: <{}>",
            self.symbol, self.order_id, self.price, self.amount, self.side
        )
    }
}

/// Registered user with exchange credentials and per-symbol slippage limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub telegram_id: Option<i64>,
    #[serde(skip)]
    limits: HashMap<String, f64>,
}

/// Users are owned by the user store and shared with pair subscriber lists.
/// Order dispatch snapshots the record instead of holding the lock across
/// suspension points.
pub type SharedUser = Arc<RwLock<User>>;

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        User {
            username: username.into(),
            public_key: String::new(),
            private_key: String::new(),
            telegram_id: None,
            limits: HashMap::new(),
        }
    }

    /// Sets the slippage limit for a symbol. Limits live in [0, 1].
    pub fn set_limit(&mut self, symbol: &str, limit: f64) -> Result<(), DomainError> {
        if !(0.0..=1.0).contains(&limit) {
            return Err(DomainError::LimitOutOfRange(limit));
        }
        self.limits.insert(symbol.to_string(), limit);
        Ok(())
    }

    /// Slippage limit for a symbol, defaulting to 0 when none was set.
    pub fn limit_for(&self, symbol: &str) -> f64 {
        self.limits.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.public_key.is_empty() && !self.private_key.is_empty()
    }
}

/// Subscription request: which pair to trade, with which indicator and limit.
#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    #[serde(rename = "pair_name")]
    pub symbol: String,
    #[serde(rename = "pair_interval")]
    pub interval: CandleInterval,
    #[serde(rename = "indicator_name")]
    pub indicator: String,
    #[serde(default)]
    pub limit: f64,
}

impl PairConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.symbol.is_empty() {
            return Err(DomainError::EmptySymbol);
        }
        if !(0.0..=1.0).contains(&self.limit) {
            return Err(DomainError::LimitOutOfRange(self.limit));
        }
        Ok(())
    }
}

/// Fatal pair-level error carried from a stream session to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PairError {
    pub symbol: String,
    pub interval: CandleInterval,
    pub message: String,
}

impl fmt::Display for PairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PairError {}

/// Validation failures surfaced to the caller.
#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("unsupported candle interval <{0}>")]
    UnknownInterval(String),
    #[error("pair name is empty")]
    EmptySymbol,
    #[error("limit <{0}> is out of bounds")]
    LimitOutOfRange(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_feed_names() {
        assert_eq!(CandleInterval::OneMinute.feed(), "candles_trade_1m");
        assert_eq!(CandleInterval::TenMinutes.feed(), "candles_trade_10m");
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!(
            "5m".parse::<CandleInterval>().unwrap(),
            CandleInterval::FiveMinutes
        );
        assert!("3m".parse::<CandleInterval>().is_err());
        assert!("".parse::<CandleInterval>().is_err());
    }

    #[test]
    fn test_candle_wire_parse() {
        let raw = r#"{"open":"100.5","close":"101.0","high":"102.25","low":"99.75","time":1636670000,"volume":12}"#;
        let candle: Candle = serde_json::from_str(raw).unwrap();
        assert_eq!(candle.open, 100.5);
        assert_eq!(candle.close, 101.0);
        assert_eq!(candle.high, 102.25);
        assert_eq!(candle.low, 99.75);
        assert_eq!(candle.time, 1636670000);
        assert_eq!(candle.volume, 12);
    }

    #[test]
    fn test_candle_wire_rejects_garbage_price() {
        let raw = r#"{"open":"abc","close":"1","high":"1","low":"1","time":1,"volume":1}"#;
        assert!(serde_json::from_str::<Candle>(raw).is_err());
    }

    #[test]
    fn test_candle_wire_rejects_non_finite() {
        let raw = r#"{"open":"inf","close":"1","high":"1","low":"1","time":1,"volume":1}"#;
        assert!(serde_json::from_str::<Candle>(raw).is_err());
    }

    #[test]
    fn test_candle_validation() {
        let mut candle = Candle {
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            time: 10,
            volume: 3,
        };
        assert!(candle.is_valid());
        candle.low = -0.1;
        assert!(!candle.is_valid());
    }

    #[test]
    fn test_user_limits() {
        let mut user = User::new("alice");
        assert_eq!(user.limit_for("PI_XBTUSD"), 0.0);

        user.set_limit("PI_XBTUSD", 0.01).unwrap();
        assert_eq!(user.limit_for("PI_XBTUSD"), 0.01);

        assert!(user.set_limit("PI_XBTUSD", 1.5).is_err());
        assert!(user.set_limit("PI_XBTUSD", -0.1).is_err());
        assert_eq!(user.limit_for("PI_XBTUSD"), 0.01);
    }

    #[test]
    fn test_pair_config_validate() {
        let config = PairConfig {
            symbol: "PI_XBTUSD".to_string(),
            interval: CandleInterval::OneMinute,
            indicator: "Donchian".to_string(),
            limit: 0.02,
        };
        assert!(config.validate().is_ok());

        let empty = PairConfig {
            symbol: String::new(),
            ..config.clone()
        };
        assert_eq!(empty.validate(), Err(DomainError::EmptySymbol));

        let wild = PairConfig { limit: 7.0, ..config };
        assert!(matches!(wild.validate(), Err(DomainError::LimitOutOfRange(_))));
    }

    #[test]
    fn test_pair_config_json() {
        let raw = r#"{"pair_name":"PI_XBTUSD","pair_interval":"1m","indicator_name":"Donchian","limit":0.01}"#;
        let config: PairConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.symbol, "PI_XBTUSD");
        assert_eq!(config.interval, CandleInterval::OneMinute);

        let unknown = r#"{"pair_name":"PI_XBTUSD","pair_interval":"7m","indicator_name":"Donchian"}"#;
        assert!(serde_json::from_str::<PairConfig>(unknown).is_err());
    }

    #[test]
    fn test_signal_sides() {
        assert_eq!(Signal::Buy.as_str(), "buy");
        assert_eq!(Signal::Sell.as_str(), "sell");
        assert!(Signal::Buy.is_actionable());
        assert!(!Signal::WaitToSet.is_actionable());
    }
}
