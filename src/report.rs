//! Aggregated PnL view
//!
//! Three windows anchored at the newest PnL record: the last interval by
//! itself, the trailing minute and the trailing five minutes. Times are
//! formatted for humans and sums are rounded to two decimal places here,
//! and only here; everything upstream stays exact.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::store::{PnlStore, StoreError};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PnlWindow {
    pub label: &'static str,
    pub start_time: String,
    pub end_time: String,
    pub pnl: Decimal,
}

/// Build the three-window summary, or an empty list when no PnL exists yet.
pub async fn pnl_summary<S: PnlStore>(store: &S) -> Result<Vec<PnlWindow>, StoreError> {
    let Some(latest) = store.latest_pnl().await? else {
        return Ok(Vec::new());
    };
    let reference = latest.market_end_time;

    let mut windows = vec![PnlWindow {
        label: "last interval",
        start_time: human(latest.market_start_time),
        end_time: human(reference),
        pnl: (latest.total_sell_revenue - latest.total_buy_cost).round_dp(2),
    }];

    for (label, seconds) in [("1 minute", 60), ("5 minutes", 300)] {
        let cutoff = reference - Duration::seconds(seconds);
        let total: Decimal = store
            .pnls_since(cutoff)
            .await?
            .iter()
            .map(|p| p.pnl)
            .sum();
        windows.push(PnlWindow {
            label,
            start_time: human(cutoff),
            end_time: human(reference),
            pnl: total.round_dp(2),
        });
    }

    Ok(windows)
}

fn human(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}
