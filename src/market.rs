//! Market data access.
//!
//! The engine only needs the latest price plus the current candle's high and
//! low for the SL/TP sweep; everything else stays with upstream collaborators.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, TraderError};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Latest market observation for one coin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSnapshot {
    pub price: Decimal,
    pub high: Decimal,
    pub low: Decimal,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Current price plus intrabar high/low for the active candle.
    async fn snapshot(&self, coin: &str) -> Result<MarketSnapshot>;
}

/// Binance public futures REST market data. No credentials required.
pub struct BinanceMarketData {
    http: Client,
    base_url: String,
    interval: String,
}

impl BinanceMarketData {
    pub fn new(base_url: Option<String>, interval: &str) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            interval: interval.to_string(),
        })
    }

    fn parse_kline(kline: &Value) -> Option<MarketSnapshot> {
        let fields = kline.as_array()?;
        let field = |idx: usize| {
            fields
                .get(idx)?
                .as_str()
                .and_then(|s| s.parse::<Decimal>().ok())
        };
        // kline layout: [open_time, open, high, low, close, ...]
        Some(MarketSnapshot {
            high: field(2)?,
            low: field(3)?,
            price: field(4)?,
        })
    }
}

#[async_trait]
impl MarketData for BinanceMarketData {
    async fn snapshot(&self, coin: &str) -> Result<MarketSnapshot> {
        let symbol = format!("{}USDT", coin.to_ascii_uppercase());
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit=1",
            self.base_url, symbol, self.interval
        );
        let body: Value = self.http.get(&url).send().await?.json().await?;

        body.as_array()
            .and_then(|klines| klines.last())
            .and_then(Self::parse_kline)
            .ok_or_else(|| {
                TraderError::MarketDataUnavailable(format!(
                    "no kline data returned for {}",
                    symbol
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn kline_parses_price_high_low() {
        let kline = json!([
            1700000000000i64,
            "50000.0",
            "50500.5",
            "49800.25",
            "50200.0",
            "123.4",
        ]);
        let snapshot = BinanceMarketData::parse_kline(&kline).unwrap();
        assert_eq!(snapshot.high, dec!(50500.5));
        assert_eq!(snapshot.low, dec!(49800.25));
        assert_eq!(snapshot.price, dec!(50200.0));
    }

    #[test]
    fn malformed_kline_is_rejected() {
        assert!(BinanceMarketData::parse_kline(&json!(["only_time"])).is_none());
        assert!(BinanceMarketData::parse_kline(&json!({"high": "1"})).is_none());
    }
}
