use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use crate::exchange::TradingBackend;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub fees: FeeConfig,
    pub live: LiveCapsConfig,
    pub binance: BinanceConfig,
    pub backpack: BackpackConfig,
    pub hyperliquid: HyperliquidConfig,
    pub market: MarketConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Trading backend: paper | binance_futures | backpack_futures | hyperliquid
    pub backend: String,
    /// Coin universe the bot trades (base asset names, e.g. "BTC")
    pub coins: Vec<String>,
    /// Starting balance for paper trading
    pub paper_start_capital: Decimal,
    /// Starting balance recorded when a live backend is active
    pub live_start_capital: Decimal,
    /// Seconds between iterations
    pub interval_secs: u64,
    /// Portfolio state file path
    pub state_file: String,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            backend: "paper".to_string(),
            coins: vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
            paper_start_capital: dec!(10000),
            live_start_capital: dec!(500),
            interval_secs: 900,
            state_file: "data/portfolio_state.json".to_string(),
        }
    }
}

impl TradingConfig {
    pub fn backend_kind(&self) -> Option<TradingBackend> {
        TradingBackend::from_str(&self.backend).ok()
    }

    pub fn start_capital(&self, live: bool) -> Decimal {
        if live {
            self.live_start_capital
        } else {
            self.paper_start_capital
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Master switch for risk checks; when false the kill-switch never blocks
    pub enabled: bool,
    pub daily_loss_limit_enabled: bool,
    /// Daily loss limit as a positive percentage of the daily start equity
    pub daily_loss_limit_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_loss_limit_enabled: true,
            daily_loss_limit_pct: dec!(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub maker_rate: Decimal,
    pub taker_rate: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            maker_rate: Decimal::ZERO,
            taker_rate: dec!(0.000275),
        }
    }
}

impl FeeConfig {
    pub fn rate_for(&self, liquidity: crate::domain::Liquidity) -> Decimal {
        match liquidity {
            crate::domain::Liquidity::Maker => self.maker_rate,
            crate::domain::Liquidity::Taker => self.taker_rate,
        }
    }
}

/// Hard caps applied to entry plans when a live backend is configured.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveCapsConfig {
    pub max_risk_usd: Decimal,
    pub max_leverage: Decimal,
    /// Margin cap in USD; zero disables the cap
    pub max_margin_usd: Decimal,
}

impl Default for LiveCapsConfig {
    fn default() -> Self {
        Self {
            max_risk_usd: dec!(100),
            max_leverage: dec!(10),
            max_margin_usd: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BinanceConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub base_url: Option<String>,
    /// Whether orders should actually reach Binance
    pub live: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackpackConfig {
    pub api_public_key: Option<String>,
    pub api_secret_seed: Option<String>,
    pub base_url: Option<String>,
    pub window_ms: Option<u64>,
    pub live: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HyperliquidConfig {
    pub live_trading: bool,
    pub private_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MarketConfig {
    /// Market data REST endpoint; defaults to Binance public futures API
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("LLMT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (LLMT_TRADING__BACKEND, etc.)
            .add_source(
                Environment::with_prefix("LLMT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Whether the configured backend places real orders.
    pub fn is_live_backend(&self) -> bool {
        match self.trading.backend_kind() {
            Some(TradingBackend::BinanceFutures) => self.binance.live,
            Some(TradingBackend::BackpackFutures) => self.backpack.live,
            Some(TradingBackend::Hyperliquid) => self.hyperliquid.live_trading,
            _ => false,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trading.backend_kind().is_none() {
            errors.push(format!(
                "unknown trading backend '{}'; expected paper|binance_futures|backpack_futures|hyperliquid",
                self.trading.backend
            ));
        }

        if self.trading.coins.is_empty() {
            errors.push("trading.coins must not be empty".to_string());
        }

        if self.trading.paper_start_capital <= Decimal::ZERO {
            errors.push("trading.paper_start_capital must be positive".to_string());
        }

        if self.risk.daily_loss_limit_pct <= Decimal::ZERO
            || self.risk.daily_loss_limit_pct > dec!(100)
        {
            errors.push("risk.daily_loss_limit_pct must be in (0, 100]".to_string());
        }

        if self.fees.maker_rate < Decimal::ZERO || self.fees.taker_rate < Decimal::ZERO {
            errors.push("fee rates must not be negative".to_string());
        }

        if self.live.max_leverage < Decimal::ONE {
            errors.push("live.max_leverage must be at least 1".to_string());
        }

        if self.live.max_risk_usd <= Decimal::ZERO {
            errors.push("live.max_risk_usd must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Liquidity;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading.backend_kind(), Some(TradingBackend::Paper));
        assert!(!config.is_live_backend());
    }

    #[test]
    fn fee_rate_selected_by_liquidity() {
        let fees = FeeConfig::default();
        assert_eq!(fees.rate_for(Liquidity::Maker), Decimal::ZERO);
        assert_eq!(fees.rate_for(Liquidity::Taker), dec!(0.000275));
    }

    #[test]
    fn invalid_backend_fails_validation() {
        let mut config = AppConfig::default();
        config.trading.backend = "kraken".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unknown trading backend")));
    }

    #[test]
    fn live_flag_follows_backend_section() {
        let mut config = AppConfig::default();
        config.trading.backend = "binance_futures".to_string();
        assert!(!config.is_live_backend());
        config.binance.live = true;
        assert!(config.is_live_backend());
    }

    #[test]
    fn start_capital_depends_on_live_flag() {
        let trading = TradingConfig::default();
        assert_eq!(trading.start_capital(false), dec!(10000));
        assert_eq!(trading.start_capital(true), dec!(500));
    }
}
