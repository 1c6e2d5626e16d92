use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Result;

use super::backpack::BackpackFuturesClient;
use super::binance::BinanceFuturesClient;
use super::hyperliquid::HyperliquidClient;
use super::paper::PaperClient;
use super::traits::{parse_trading_backend, ExchangeClient, TradingBackend};

/// Create the runtime exchange client from `AppConfig`.
pub fn build_exchange_client(app_config: &AppConfig) -> Result<Arc<dyn ExchangeClient>> {
    let backend = parse_trading_backend(&app_config.trading.backend)?;
    build_exchange_client_for(backend, app_config)
}

/// Create an exchange client for an explicit backend.
///
/// Missing credentials are a construction error; the router treats that as a
/// soft failure, while startup treats a required live backend failing to
/// build as fatal.
pub fn build_exchange_client_for(
    backend: TradingBackend,
    app_config: &AppConfig,
) -> Result<Arc<dyn ExchangeClient>> {
    match backend {
        TradingBackend::Paper => Ok(Arc::new(PaperClient::new())),
        TradingBackend::BinanceFutures => {
            let api_key = app_config
                .binance
                .api_key
                .clone()
                .or_else(|| std::env::var("BINANCE_API_KEY").ok())
                .unwrap_or_default();
            let api_secret = app_config
                .binance
                .api_secret
                .clone()
                .or_else(|| std::env::var("BINANCE_API_SECRET").ok())
                .unwrap_or_default();
            let client =
                BinanceFuturesClient::new(api_key, api_secret, app_config.binance.base_url.clone())?;
            Ok(Arc::new(client))
        }
        TradingBackend::BackpackFutures => {
            let api_public_key = app_config
                .backpack
                .api_public_key
                .clone()
                .or_else(|| std::env::var("BACKPACK_API_PUBLIC_KEY").ok())
                .unwrap_or_default();
            let api_secret_seed = app_config
                .backpack
                .api_secret_seed
                .clone()
                .or_else(|| std::env::var("BACKPACK_API_SECRET_SEED").ok())
                .unwrap_or_default();
            let client = BackpackFuturesClient::new(
                api_public_key,
                api_secret_seed,
                app_config.backpack.base_url.clone(),
                app_config.backpack.window_ms,
            )?;
            Ok(Arc::new(client))
        }
        TradingBackend::Hyperliquid => {
            let private_key = app_config
                .hyperliquid
                .private_key
                .clone()
                .or_else(|| std::env::var("HYPERLIQUID_PRIVATE_KEY").ok());
            let client = HyperliquidClient::new(
                app_config.hyperliquid.live_trading,
                private_key,
                app_config.hyperliquid.base_url.clone(),
            )?;
            Ok(Arc::new(client))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn paper_backend_always_builds() {
        let config = AppConfig::default();
        let client = build_exchange_client_for(TradingBackend::Paper, &config).unwrap();
        assert_eq!(client.backend(), TradingBackend::Paper);
        assert!(!client.is_live());
    }

    #[test]
    fn dry_run_hyperliquid_builds_without_keys() {
        let mut config = AppConfig::default();
        config.hyperliquid.live_trading = false;
        config.hyperliquid.private_key = None;
        let client = build_exchange_client_for(TradingBackend::Hyperliquid, &config).unwrap();
        assert_eq!(client.backend(), TradingBackend::Hyperliquid);
        assert!(!client.is_live());
    }
}
