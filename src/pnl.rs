//! PnL math for one market interval
//!
//! All arithmetic is [`Decimal`]; binary floating point never touches a
//! monetary field. The fee is charged per MWh on both sides:
//!
//! ```text
//! total_buy_cost     = buy_volume  * buy_price  + buy_volume  * fee
//! total_sell_revenue = sell_volume * sell_price - sell_volume * fee
//! total_fees         = (buy_volume + sell_volume) * fee
//! pnl                = total_sell_revenue - total_buy_cost
//! ```

use chrono::Utc;
use rust_decimal::Decimal;

use crate::models::{MarketInterval, PnlRecord, Side, TradeFill};

/// Compute the PnL record for `market` from the trades that settled inside
/// the interval. An empty `fills` slice yields an all-zero record.
pub fn compute_pnl(market: &MarketInterval, fills: &[TradeFill], fee: Decimal) -> PnlRecord {
    let mut buy_volume = Decimal::ZERO;
    let mut sell_volume = Decimal::ZERO;

    for fill in fills {
        match fill.trade_type {
            Side::Buy => buy_volume += fill.volume,
            Side::Sell => sell_volume += fill.volume,
        }
    }

    let total_buy_cost = buy_volume * market.buy_price + buy_volume * fee;
    let total_sell_revenue = sell_volume * market.sell_price - sell_volume * fee;
    let total_fees = (buy_volume + sell_volume) * fee;

    PnlRecord {
        market_start_time: market.start_time,
        market_end_time: market.end_time,
        buy_price: market.buy_price,
        sell_price: market.sell_price,
        total_buy_volume: buy_volume,
        total_sell_volume: sell_volume,
        total_buy_cost,
        total_sell_revenue,
        total_fees,
        pnl: total_sell_revenue - total_buy_cost,
        created_at: Utc::now(),
    }
}
