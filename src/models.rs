//! Domain records shared by every pipeline component
//!
//! A [`Trade`] or [`MarketInterval`] always carries the `(partition, offset)`
//! pair assigned by the bus. That pair is globally unique per event and is
//! the idempotency key for every durable write.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================
// SIDE
// ============================================================

/// Trade direction. BUY adds volume to the position, SELL subtracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown trade side: {other}")),
        }
    }
}

// ============================================================
// TRADE
// ============================================================

/// A single trade event as consumed from the bus.
///
/// Volume is a [`Decimal`] end-to-end; the wire and store forms are decimal
/// strings so no precision is lost between components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub side: Side,
    /// Traded volume in MWh, strictly positive.
    pub volume: Decimal,
    pub time: DateTime<Utc>,
    /// Bus partition the event was delivered on.
    pub partition: i32,
    /// Bus offset within the partition.
    pub offset: i64,
}

impl Trade {
    pub fn new(
        side: Side,
        volume: Decimal,
        time: DateTime<Utc>,
        partition: i32,
        offset: i64,
    ) -> Self {
        Self {
            side,
            volume,
            time,
            partition,
            offset,
        }
    }

    /// The wire view of this trade (no bus coordinates).
    pub fn fill(&self) -> TradeFill {
        TradeFill {
            trade_type: self.side,
            volume: self.volume,
            time: self.time,
        }
    }
}

/// Trade view exchanged over the trades RPC and fed into the PnL math.
///
/// Serializes as `{"tradeType": "BUY", "volume": "100", "time": "<RFC 3339>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFill {
    pub trade_type: Side,
    pub volume: Decimal,
    pub time: DateTime<Utc>,
}

impl From<&Trade> for TradeFill {
    fn from(trade: &Trade) -> Self {
        trade.fill()
    }
}

// ============================================================
// MARKET INTERVAL
// ============================================================

/// A market interval: buy/sell prices valid for `[start_time, end_time]`
/// (inclusive on both ends).
///
/// `(start_time, end_time)` is unique in the store; so is `(partition, offset)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketInterval {
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub partition: i32,
    pub offset: i64,
}

impl MarketInterval {
    /// Store key of the interval.
    pub fn interval_key(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start_time, self.end_time)
    }
}

// ============================================================
// PNL RECORD
// ============================================================

/// Profit-and-loss derived from one market interval and the trades whose
/// timestamps fall inside it. All monetary fields are decimals; nothing is
/// rounded until the aggregated report formats its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PnlRecord {
    pub market_start_time: DateTime<Utc>,
    pub market_end_time: DateTime<Utc>,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub total_buy_volume: Decimal,
    pub total_sell_volume: Decimal,
    pub total_buy_cost: Decimal,
    pub total_sell_revenue: Decimal,
    pub total_fees: Decimal,
    pub pnl: Decimal,
    pub created_at: DateTime<Utc>,
}
