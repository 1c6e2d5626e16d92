//! Paper trading client. Every order fills immediately at the requested
//! price; nothing leaves the process.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::domain::Side;
use crate::error::Result;

use super::traits::{CloseResult, EntryRequest, EntryResult, ExchangeClient, TradingBackend};

#[derive(Default)]
pub struct PaperClient {
    order_seq: AtomicU64,
}

impl PaperClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_oid(&self) -> String {
        format!("paper-{}", self.order_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    fn backend(&self) -> TradingBackend {
        TradingBackend::Paper
    }

    fn is_live(&self) -> bool {
        false
    }

    async fn place_entry(&self, request: &EntryRequest) -> Result<EntryResult> {
        let oid = self.next_oid();
        debug!(
            coin = %request.coin,
            side = %request.side,
            size = %request.size,
            price = %request.entry_price,
            oid,
            "paper entry filled"
        );
        let mut extra = HashMap::new();
        extra.insert(
            "fill_price".to_string(),
            Value::String(request.entry_price.to_string()),
        );
        Ok(EntryResult {
            success: true,
            backend: TradingBackend::Paper,
            errors: Vec::new(),
            entry_oid: Some(oid),
            tp_oid: None,
            sl_oid: None,
            raw: None,
            extra,
        })
    }

    async fn close_position(
        &self,
        coin: &str,
        side: Side,
        size: Option<Decimal>,
        fallback_price: Option<Decimal>,
    ) -> Result<CloseResult> {
        let oid = self.next_oid();
        debug!(
            coin,
            side = %side,
            size = ?size,
            price = ?fallback_price,
            oid,
            "paper close filled"
        );
        Ok(CloseResult {
            success: true,
            backend: TradingBackend::Paper,
            errors: Vec::new(),
            close_oid: Some(oid),
            raw: None,
            extra: HashMap::new(),
        })
    }
}
