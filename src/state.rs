//! Trading state and JSON persistence.
//!
//! One `TradingState` per process, owned by the executor. The persisted
//! document keeps the `risk_control` block default-tolerant so state files
//! written before the risk fields existed still load.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::domain::Position;
use crate::error::Result;
use crate::risk::RiskControlState;

/// The JSON document written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub balance: Decimal,
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub iteration: u64,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub risk_control: RiskControlState,
}

/// In-memory trading state: balance, open positions keyed by coin, risk
/// control block, iteration counter.
#[derive(Debug)]
pub struct TradingState {
    pub balance: Decimal,
    pub positions: BTreeMap<String, Position>,
    pub iteration: u64,
    pub risk_control: RiskControlState,
    state_file: PathBuf,
}

impl TradingState {
    pub fn new(start_capital: Decimal, state_file: impl Into<PathBuf>) -> Self {
        Self {
            balance: start_capital,
            positions: BTreeMap::new(),
            iteration: 0,
            risk_control: RiskControlState::default(),
            state_file: state_file.into(),
        }
    }

    /// Load persisted state, falling back to a fresh state on any failure.
    /// A corrupt or missing state file is never fatal.
    pub fn load_or_new(start_capital: Decimal, state_file: impl Into<PathBuf>) -> Self {
        let state_file = state_file.into();
        if !state_file.exists() {
            info!(path = %state_file.display(), "no existing state file; starting fresh");
            return Self::new(start_capital, state_file);
        }

        match Self::load_document(&state_file) {
            Ok(doc) => {
                info!(
                    path = %state_file.display(),
                    balance = %doc.balance,
                    positions = doc.positions.len(),
                    iteration = doc.iteration,
                    "loaded portfolio state"
                );
                Self {
                    balance: doc.balance,
                    positions: doc.positions,
                    iteration: doc.iteration,
                    risk_control: doc.risk_control,
                    state_file,
                }
            }
            Err(e) => {
                error!(
                    path = %state_file.display(),
                    error = %e,
                    "failed to load state file; starting fresh"
                );
                Self::new(start_capital, state_file)
            }
        }
    }

    fn load_document(path: &Path) -> Result<PortfolioState> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist the current state. IO errors are logged, not propagated: a
    /// failed save must not interrupt the trading loop.
    pub fn save(&self) {
        let doc = PortfolioState {
            balance: self.balance,
            positions: self.positions.clone(),
            iteration: self.iteration,
            updated_at: Some(chrono::Utc::now().to_rfc3339()),
            risk_control: self.risk_control.clone(),
        };
        if let Err(e) = self.write_document(&doc) {
            error!(path = %self.state_file.display(), error = %e, "failed to save state");
        }
    }

    fn write_document(&self, doc: &PortfolioState) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(doc)?;
        std::fs::write(&self.state_file, json)?;
        Ok(())
    }

    /// Total account equity: free balance plus, for each open position, its
    /// margin and unrealized PnL at the marked price (entry price when no
    /// mark is available).
    pub fn total_equity(&self, mark_prices: &HashMap<String, Decimal>) -> Decimal {
        let mut equity = self.balance;
        for (coin, position) in &self.positions {
            let mark = mark_prices
                .get(coin)
                .copied()
                .unwrap_or(position.entry_price);
            equity += position.margin + position.gross_pnl_at(mark);
        }
        equity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Liquidity, Side};
    use rust_decimal_macros::dec;

    fn sample_position() -> Position {
        Position {
            side: Side::Long,
            quantity: dec!(0.1),
            entry_price: dec!(50000),
            stop_loss: dec!(49000),
            profit_target: dec!(52000),
            leverage: dec!(10),
            margin: dec!(500),
            fees_paid: dec!(1.375),
            fee_rate: dec!(0.000275),
            liquidity: Liquidity::Taker,
            risk_usd: dec!(100),
            live_backend: None,
            entry_oid: None,
            tp_oid: None,
            sl_oid: None,
            entry_justification: "breakout".to_string(),
            last_justification: "breakout".to_string(),
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("llm-trader-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let path = temp_path("roundtrip.json");
        let mut state = TradingState::new(dec!(10000), &path);
        state.balance = dec!(9500);
        state.iteration = 7;
        state.positions.insert("BTC".to_string(), sample_position());
        state.risk_control.kill_switch_active = true;
        state.risk_control.kill_switch_reason = Some("Manual trigger".to_string());
        state.save();

        let reloaded = TradingState::load_or_new(dec!(10000), &path);
        assert_eq!(reloaded.balance, dec!(9500));
        assert_eq!(reloaded.iteration, 7);
        assert_eq!(reloaded.positions.len(), 1);
        assert!(reloaded.risk_control.kill_switch_active);
        assert_eq!(
            reloaded.risk_control.kill_switch_reason.as_deref(),
            Some("Manual trigger")
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_falls_back_to_fresh_state() {
        let path = temp_path("corrupt.json");
        std::fs::write(&path, "{not valid json").unwrap();

        let state = TradingState::load_or_new(dec!(10000), &path);
        assert_eq!(state.balance, dec!(10000));
        assert!(state.positions.is_empty());
        assert!(!state.risk_control.kill_switch_active);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_risk_control_block_defaults() {
        let doc: PortfolioState = serde_json::from_str(
            r#"{"balance": "5000", "positions": {}, "iteration": 3}"#,
        )
        .unwrap();
        assert_eq!(doc.balance, dec!(5000));
        assert_eq!(doc.risk_control, RiskControlState::default());
    }

    #[test]
    fn total_equity_includes_margin_and_unrealized_pnl() {
        let mut state = TradingState::new(dec!(9000), temp_path("equity.json"));
        state.positions.insert("BTC".to_string(), sample_position());

        let mut marks = HashMap::new();
        marks.insert("BTC".to_string(), dec!(51000));
        // 9000 balance + 500 margin + 100 unrealized
        assert_eq!(state.total_equity(&marks), dec!(9600));

        // no mark price: marked at entry, zero unrealized
        assert_eq!(state.total_equity(&HashMap::new()), dec!(9500));
    }
}
