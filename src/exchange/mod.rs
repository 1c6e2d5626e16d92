mod backpack;
mod binance;
mod factory;
mod hyperliquid;
mod paper;
mod traits;

pub use backpack::BackpackFuturesClient;
pub use binance::BinanceFuturesClient;
pub use factory::{build_exchange_client, build_exchange_client_for};
pub use hyperliquid::HyperliquidClient;
pub use paper::PaperClient;
pub use traits::{
    parse_trading_backend, CloseResult, EntryRequest, EntryResult, ExchangeClient, TpSlResult,
    TradingBackend,
};
