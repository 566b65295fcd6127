use std::collections::VecDeque;

use super::{Indicator, IndicatorError, DONCHIAN_NAME};
use crate::models::{Candle, Signal};

pub const DEFAULT_CHANNEL_SIZE: usize = 2;

/// Donchian channel breakout strategy.
///
/// Keeps a sliding window of the last `channel_size` candles. A close of the
/// current candle above the channel high opens a position (Buy); a low below
/// the channel low closes it (Sell). The channel is always computed over the
/// window as it stood *before* the current candle, so the breakout candle
/// itself never widens the channel it breaks out of.
#[derive(Debug)]
pub struct Donchian {
    window: VecDeque<Candle>,
    channel_size: usize,
    high: f64,
    low: f64,
    medium: f64,
    in_position: bool,
    last_seen: i64,
}

impl Donchian {
    pub fn new() -> Self {
        Self::with_channel_size(DEFAULT_CHANNEL_SIZE)
    }

    pub fn with_channel_size(channel_size: usize) -> Self {
        Donchian {
            window: VecDeque::with_capacity(channel_size.max(1)),
            channel_size: channel_size.max(1),
            high: 0.0,
            low: 0.0,
            medium: 0.0,
            in_position: false,
            last_seen: -1,
        }
    }

    pub fn in_position(&self) -> bool {
        self.in_position
    }

    pub fn channel_high(&self) -> f64 {
        self.high
    }

    pub fn channel_low(&self) -> f64 {
        self.low
    }

    pub fn channel_medium(&self) -> f64 {
        self.medium
    }

    fn window_high(&self) -> f64 {
        self.window
            .iter()
            .map(|candle| candle.high)
            .fold(f64::MIN, f64::max)
    }

    fn window_low(&self) -> f64 {
        self.window
            .iter()
            .map(|candle| candle.low)
            .fold(f64::MAX, f64::min)
    }

    fn rotate(&mut self, candle: Candle) {
        self.window.pop_front();
        self.window.push_back(candle);
    }
}

impl Default for Donchian {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator for Donchian {
    fn update(&mut self, candle: Candle) -> Result<Signal, IndicatorError> {
        if !candle.is_valid() {
            return Err(IndicatorError::InvalidCandle);
        }
        if candle.time <= self.last_seen {
            return Err(IndicatorError::SameTimestamp);
        }
        self.last_seen = candle.time;

        if self.window.len() < self.channel_size {
            self.window.push_back(candle);
            return Ok(Signal::WaitToSet);
        }

        self.low = self.window_low();
        self.high = self.window_high();
        self.medium = (self.high + self.low) / 2.0;

        let signal = if self.in_position {
            if candle.low < self.low {
                self.in_position = false;
                Signal::Sell
            } else {
                Signal::WaitToSell
            }
        } else if candle.high > self.high {
            self.in_position = true;
            Signal::Buy
        } else {
            Signal::WaitToBuy
        };

        self.rotate(candle);
        Ok(signal)
    }

    fn name(&self) -> &'static str {
        DONCHIAN_NAME
    }
}
