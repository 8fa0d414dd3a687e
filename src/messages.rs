//! Bus message contracts
//!
//! Both topics carry UTF-8 JSON with a `messageType` discriminator:
//!
//! ```text
//! trades: {"messageType":"trades","tradeType":"BUY","volume":"100","time":"..."}
//! market: {"messageType":"market","buyPrice":"50","sellPrice":"55",
//!          "startTime":"...","endTime":"..."}
//! ```
//!
//! Parsing is strict: a payload that fails to decode or violates a field
//! constraint is a [`MessageError`], logged with a `[DLQ]` prefix at the
//! consume site and dropped. Valid events are stamped with the delivery's
//! `(partition, offset)` to become domain records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{MarketInterval, Side, Trade};

pub const TRADES_MESSAGE_TYPE: &str = "trades";
pub const MARKET_MESSAGE_TYPE: &str = "market";

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected messageType {got:?}, expected {expected:?}")]
    WrongType { expected: &'static str, got: String },

    #[error("volume must be positive, got {0}")]
    NonPositiveVolume(Decimal),

    #[error("interval end {end} precedes start {start}")]
    InvertedInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

// ============================================================
// TRADE MESSAGE
// ============================================================

/// Payload of the `trades` topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeMessage {
    pub message_type: String,
    pub trade_type: Side,
    pub volume: Decimal,
    pub time: DateTime<Utc>,
}

impl TradeMessage {
    /// Decode and validate a raw bus payload.
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let msg: TradeMessage = serde_json::from_slice(payload)?;
        if msg.message_type != TRADES_MESSAGE_TYPE {
            return Err(MessageError::WrongType {
                expected: TRADES_MESSAGE_TYPE,
                got: msg.message_type,
            });
        }
        if msg.volume <= Decimal::ZERO {
            return Err(MessageError::NonPositiveVolume(msg.volume));
        }
        Ok(msg)
    }

    /// Stamp the message with its bus coordinates.
    pub fn into_trade(self, partition: i32, offset: i64) -> Trade {
        Trade::new(self.trade_type, self.volume, self.time, partition, offset)
    }
}

// ============================================================
// MARKET MESSAGE
// ============================================================

/// Payload of the `market` topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMessage {
    pub message_type: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl MarketMessage {
    /// Decode and validate a raw bus payload.
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let msg: MarketMessage = serde_json::from_slice(payload)?;
        if msg.message_type != MARKET_MESSAGE_TYPE {
            return Err(MessageError::WrongType {
                expected: MARKET_MESSAGE_TYPE,
                got: msg.message_type,
            });
        }
        if msg.end_time < msg.start_time {
            return Err(MessageError::InvertedInterval {
                start: msg.start_time,
                end: msg.end_time,
            });
        }
        Ok(msg)
    }

    /// Stamp the message with its bus coordinates.
    pub fn into_interval(self, partition: i32, offset: i64) -> MarketInterval {
        MarketInterval {
            buy_price: self.buy_price,
            sell_price: self.sell_price,
            start_time: self.start_time,
            end_time: self.end_time,
            partition,
            offset,
        }
    }
}
