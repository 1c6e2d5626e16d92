use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::{AccountSnapshot, Liquidity, Side};
use crate::error::{Result, TraderError};

/// Configured trading backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingBackend {
    Paper,
    BinanceFutures,
    BackpackFutures,
    Hyperliquid,
}

impl Default for TradingBackend {
    fn default() -> Self {
        Self::Paper
    }
}

impl TradingBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::BinanceFutures => "binance_futures",
            Self::BackpackFutures => "backpack_futures",
            Self::Hyperliquid => "hyperliquid",
        }
    }
}

impl fmt::Display for TradingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TradingBackend {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "binance_futures" | "binance" => Ok(Self::BinanceFutures),
            "backpack_futures" | "backpack" => Ok(Self::BackpackFutures),
            "hyperliquid" => Ok(Self::Hyperliquid),
            _ => Err("invalid backend; expected paper|binance_futures|backpack_futures|hyperliquid"),
        }
    }
}

pub fn parse_trading_backend(raw: &str) -> Result<TradingBackend> {
    TradingBackend::from_str(raw).map_err(|e| TraderError::Validation(e.to_string()))
}

/// Entry order request handed to an exchange client.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub coin: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub leverage: Decimal,
    pub liquidity: Liquidity,
}

/// 统一的开仓结果结构，抽象不同交易所返回的数据。
///
/// `errors` is empty iff `success`: a result that filled but carries
/// non-fatal errors is not allowed, callers rely on the flag alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryResult {
    pub success: bool,
    pub backend: TradingBackend,
    pub errors: Vec<String>,
    #[serde(default)]
    pub entry_oid: Option<String>,
    #[serde(default)]
    pub tp_oid: Option<String>,
    #[serde(default)]
    pub sl_oid: Option<String>,
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
    /// Backend-specific diagnostics outside the unified schema.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl EntryResult {
    pub fn failed(backend: TradingBackend, errors: Vec<String>) -> Self {
        Self {
            success: false,
            backend,
            errors,
            entry_oid: None,
            tp_oid: None,
            sl_oid: None,
            raw: None,
            extra: HashMap::new(),
        }
    }

    pub fn joined_errors(&self) -> String {
        self.errors.join("; ")
    }
}

/// 统一的平仓结果结构，与 EntryResult 保持语义一致。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseResult {
    pub success: bool,
    pub backend: TradingBackend,
    pub errors: Vec<String>,
    #[serde(default)]
    pub close_oid: Option<String>,
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CloseResult {
    pub fn failed(backend: TradingBackend, errors: Vec<String>) -> Self {
        Self {
            success: false,
            backend,
            errors,
            close_oid: None,
            raw: None,
            extra: HashMap::new(),
        }
    }

    pub fn joined_errors(&self) -> String {
        self.errors.join("; ")
    }
}

/// Result of a TP/SL amendment. A partially-placed amendment (one leg
/// accepted, one rejected) reports `success=false` with the rejected leg's
/// error aggregated here; the already-placed leg is not rolled back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpSlResult {
    pub success: bool,
    pub backend: TradingBackend,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub sl_order_id: Option<String>,
    #[serde(default)]
    pub tp_order_id: Option<String>,
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

fn unsupported(feature: &str, backend: TradingBackend) -> TraderError {
    TraderError::Validation(format!(
        "{} is not implemented for backend '{}'",
        feature, backend
    ))
}

/// Exchange-agnostic execution interface.
///
/// The executor and router only ever talk to this trait; each backend is a
/// distinct struct behind it. Implementations must convert exchange
/// rejections into `success=false` results rather than errors: an `Err`
/// from these methods means transport/initialization failure only.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn backend(&self) -> TradingBackend;

    /// Whether orders reach a real exchange. Paper trading returns false.
    fn is_live(&self) -> bool;

    /// Submit an entry order, attaching stop-loss/take-profit legs where the
    /// backend supports them.
    async fn place_entry(&self, request: &EntryRequest) -> Result<EntryResult>;

    /// Close a position. `size=None` means close the whole position held at
    /// this backend; `fallback_price` is a hint for backends that cannot
    /// derive a sensible price from the book.
    async fn close_position(
        &self,
        coin: &str,
        side: Side,
        size: Option<Decimal>,
        fallback_price: Option<Decimal>,
    ) -> Result<CloseResult>;

    async fn update_tpsl(
        &self,
        _coin: &str,
        _side: Side,
        _quantity: Decimal,
        _new_sl: Option<Decimal>,
        _new_tp: Option<Decimal>,
    ) -> Result<TpSlResult> {
        Err(unsupported("update_tpsl", self.backend()))
    }

    async fn account_snapshot(&self) -> Result<Option<AccountSnapshot>> {
        Ok(None)
    }

    async fn current_price(&self, _coin: &str) -> Result<Option<Decimal>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trading_backend_accepts_aliases() {
        assert_eq!(
            parse_trading_backend("binance_futures").expect("should parse"),
            TradingBackend::BinanceFutures
        );
        assert_eq!(
            parse_trading_backend("backpack").expect("alias should parse"),
            TradingBackend::BackpackFutures
        );
        assert_eq!(
            parse_trading_backend(" Hyperliquid ").expect("should parse"),
            TradingBackend::Hyperliquid
        );
    }

    #[test]
    fn parse_trading_backend_rejects_unknown_value() {
        assert!(parse_trading_backend("kraken").is_err());
    }

    #[test]
    fn failed_results_join_errors() {
        let result = EntryResult::failed(
            TradingBackend::BinanceFutures,
            vec!["entry: rejected".to_string(), "sl: timeout".to_string()],
        );
        assert!(!result.success);
        assert_eq!(result.joined_errors(), "entry: rejected; sl: timeout");

        let close = CloseResult::failed(
            TradingBackend::BackpackFutures,
            vec!["close: insufficient margin".to_string()],
        );
        assert!(!close.success);
        assert!(close.close_oid.is_none());
        assert_eq!(close.joined_errors(), "close: insufficient margin");
    }
}
