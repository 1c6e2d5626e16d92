//! Hyperliquid perpetuals client.
//!
//! Orders are signed actions POSTed to `/exchange`: the action is
//! msgpack-encoded, hashed together with the nonce into a connection id, and
//! the wallet signs the EIP-712 "phantom agent" struct over that id. Entries
//! carry trigger TP/SL legs in the same action (`normalTpsl` grouping), which
//! is why locally-held positions on this backend skip the software SL/TP
//! sweep: the exchange holds the protective legs.

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::H256;
use ethers::utils::keccak256;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::domain::Side;
use crate::error::{Result, TraderError};

use super::traits::{CloseResult, EntryRequest, EntryResult, ExchangeClient, TradingBackend};

const DEFAULT_BASE_URL: &str = "https://api.hyperliquid.xyz";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Aggressive limit slippage used to emulate market orders.
const MARKET_SLIPPAGE_PCT: &str = "0.05";
/// Hyperliquid prices are capped at 5 significant figures.
const MAX_PRICE_SIG_FIGS: u32 = 5;

pub struct HyperliquidClient {
    http: Client,
    base_url: String,
    live: bool,
    wallet: Option<LocalWallet>,
    // coin -> (asset index, szDecimals), from the /info meta endpoint
    asset_cache: Mutex<HashMap<String, (u32, u32)>>,
}

fn extract_statuses(payload: &Value) -> Vec<Value> {
    let nested = payload
        .get("response")
        .and_then(|r| r.get("data"))
        .and_then(|d| d.get("statuses"))
        .and_then(Value::as_array);
    if let Some(statuses) = nested {
        return statuses.clone();
    }
    payload
        .get("statuses")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn collect_action_errors(payload: &Value, label: &str) -> Vec<String> {
    let mut errors = Vec::new();
    for status in extract_statuses(payload) {
        if let Some(message) = status.get("error").and_then(Value::as_str) {
            if !message.is_empty() {
                errors.push(format!("{}: {}", label, message));
            }
        }
    }
    if let Some(status) = payload.get("status").and_then(Value::as_str) {
        let lower = status.to_ascii_lowercase();
        if lower != "ok" && lower != "success" {
            errors.push(format!("{}: status={}", label, status));
        }
    }
    let mut seen = Vec::new();
    for item in errors {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

fn extract_oid(payload: &Value) -> Option<String> {
    for status in extract_statuses(payload) {
        for key in ["resting", "filled"] {
            if let Some(oid) = status.get(key).and_then(|s| s.get("oid")) {
                match oid {
                    Value::Number(n) => return Some(n.to_string()),
                    Value::String(s) => return Some(s.clone()),
                    _ => {}
                }
            }
        }
    }
    None
}

/// EIP-712 digest of the phantom agent `{source: "a", connectionId}`.
fn phantom_agent_digest(connection_id: [u8; 32]) -> [u8; 32] {
    let domain_typehash = keccak256(
        b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    );
    let mut chain_id = [0u8; 32];
    chain_id[30] = 0x05;
    chain_id[31] = 0x39; // 1337

    let mut domain_enc = Vec::with_capacity(160);
    domain_enc.extend_from_slice(&domain_typehash);
    domain_enc.extend_from_slice(&keccak256(b"Exchange"));
    domain_enc.extend_from_slice(&keccak256(b"1"));
    domain_enc.extend_from_slice(&chain_id);
    domain_enc.extend_from_slice(&[0u8; 32]);
    let domain_separator = keccak256(&domain_enc);

    let agent_typehash = keccak256(b"Agent(string source,bytes32 connectionId)");
    let mut struct_enc = Vec::with_capacity(96);
    struct_enc.extend_from_slice(&agent_typehash);
    struct_enc.extend_from_slice(&keccak256(b"a"));
    struct_enc.extend_from_slice(&connection_id);
    let struct_hash = keccak256(&struct_enc);

    let mut digest_enc = Vec::with_capacity(66);
    digest_enc.extend_from_slice(&[0x19, 0x01]);
    digest_enc.extend_from_slice(&domain_separator);
    digest_enc.extend_from_slice(&struct_hash);
    keccak256(&digest_enc)
}

fn format_price(price: Decimal) -> String {
    price
        .round_sf(MAX_PRICE_SIG_FIGS)
        .unwrap_or(price)
        .normalize()
        .to_string()
}

impl HyperliquidClient {
    pub fn new(live: bool, private_key: Option<String>, base_url: Option<String>) -> Result<Self> {
        let wallet = if live {
            let key = private_key
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    TraderError::MissingCredentials(
                        "HYPERLIQUID_PRIVATE_KEY is required for live Hyperliquid trading"
                            .to_string(),
                    )
                })?;
            let wallet = key
                .trim()
                .trim_start_matches("0x")
                .parse::<LocalWallet>()
                .map_err(|e| {
                    TraderError::Signature(format!("invalid HYPERLIQUID_PRIVATE_KEY: {}", e))
                })?;
            Some(wallet)
        } else {
            None
        };

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            live,
            wallet,
            asset_cache: Mutex::new(HashMap::new()),
        })
    }

    async fn info_request(&self, body: Value) -> Result<Value> {
        let url = format!("{}/info", self.base_url);
        let response = self.http.post(&url).json(&body).send().await?;
        Ok(response.json().await?)
    }

    /// Asset index and size precision for a coin, from the perp universe.
    async fn asset_meta(&self, coin: &str) -> Result<(u32, u32)> {
        let coin = coin.to_ascii_uppercase();
        {
            let cache = self.asset_cache.lock().await;
            if let Some(meta) = cache.get(&coin) {
                return Ok(*meta);
            }
        }

        let meta = self.info_request(json!({"type": "meta"})).await?;
        let universe = meta
            .get("universe")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                TraderError::Exchange("hyperliquid meta response missing universe".to_string())
            })?;

        let mut cache = self.asset_cache.lock().await;
        for (index, entry) in universe.iter().enumerate() {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            let sz_decimals = entry
                .get("szDecimals")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            cache.insert(name.to_ascii_uppercase(), (index as u32, sz_decimals));
        }
        cache.get(&coin).copied().ok_or_else(|| {
            TraderError::Exchange(format!("coin {} not listed on hyperliquid", coin))
        })
    }

    fn sign_action(&self, action: &Value, nonce: u64) -> Result<Value> {
        let wallet = self.wallet.as_ref().ok_or_else(|| {
            TraderError::MissingCredentials("hyperliquid wallet not configured".to_string())
        })?;

        let action_bytes = rmp_serde::to_vec_named(action)
            .map_err(|e| TraderError::Signature(format!("failed to encode action: {}", e)))?;
        let mut data = action_bytes;
        data.extend_from_slice(&nonce.to_be_bytes());
        data.push(0x00); // no vault address
        let connection_id = keccak256(&data);

        let digest = phantom_agent_digest(connection_id);
        let signature = wallet
            .sign_hash(H256::from(digest))
            .map_err(|e| TraderError::Signature(format!("failed to sign action: {}", e)))?;

        Ok(json!({
            "r": format!("0x{:064x}", signature.r),
            "s": format!("0x{:064x}", signature.s),
            "v": signature.v,
        }))
    }

    async fn post_action(&self, action: Value) -> Value {
        let nonce = chrono::Utc::now().timestamp_millis() as u64;
        let signature = match self.sign_action(&action, nonce) {
            Ok(sig) => sig,
            Err(e) => {
                return json!({"status": "error", "exception": e.to_string()});
            }
        };
        let payload = json!({
            "action": action,
            "nonce": nonce,
            "signature": signature,
            "vaultAddress": null,
        });

        let url = format!("{}/exchange", self.base_url);
        match self.http.post(&url).json(&payload).send().await {
            Ok(response) => response
                .json()
                .await
                .unwrap_or_else(|e| json!({"status": "error", "exception": e.to_string()})),
            Err(e) => {
                error!(error = %e, "hyperliquid exchange request failed");
                json!({"status": "error", "exception": e.to_string()})
            }
        }
    }

    /// Aggressive IOC limit price emulating a market order.
    fn aggressive_price(reference: Decimal, side: Side) -> Decimal {
        let slippage: Decimal = MARKET_SLIPPAGE_PCT.parse().unwrap_or(Decimal::ZERO);
        match side {
            Side::Long => reference * (Decimal::ONE + slippage),
            Side::Short => reference * (Decimal::ONE - slippage),
        }
    }
}

#[async_trait]
impl ExchangeClient for HyperliquidClient {
    fn backend(&self) -> TradingBackend {
        TradingBackend::Hyperliquid
    }

    fn is_live(&self) -> bool {
        self.live
    }

    async fn place_entry(&self, request: &EntryRequest) -> Result<EntryResult> {
        if !self.live {
            let mut extra = HashMap::new();
            extra.insert("dry_run".to_string(), Value::Bool(true));
            info!(coin = %request.coin, "hyperliquid dry-run entry; no order sent");
            return Ok(EntryResult {
                success: true,
                backend: TradingBackend::Hyperliquid,
                errors: Vec::new(),
                entry_oid: None,
                tp_oid: None,
                sl_oid: None,
                raw: None,
                extra,
            });
        }

        let (asset, sz_decimals) = self.asset_meta(&request.coin).await?;
        let is_buy = request.side == Side::Long;
        let size = request.size.round_dp(sz_decimals).normalize().to_string();
        let entry_px = format_price(Self::aggressive_price(request.entry_price, request.side));

        let entry_order = json!({
            "a": asset,
            "b": is_buy,
            "p": entry_px,
            "s": size,
            "r": false,
            "t": {"limit": {"tif": "Ioc"}},
        });
        let sl_order = json!({
            "a": asset,
            "b": !is_buy,
            "p": format_price(request.stop_loss_price),
            "s": size,
            "r": true,
            "t": {"trigger": {
                "isMarket": true,
                "triggerPx": format_price(request.stop_loss_price),
                "tpsl": "sl",
            }},
        });
        let tp_order = json!({
            "a": asset,
            "b": !is_buy,
            "p": format_price(request.take_profit_price),
            "s": size,
            "r": true,
            "t": {"trigger": {
                "isMarket": true,
                "triggerPx": format_price(request.take_profit_price),
                "tpsl": "tp",
            }},
        });

        let action = json!({
            "type": "order",
            "orders": [entry_order, sl_order, tp_order],
            "grouping": "normalTpsl",
        });
        let raw = self.post_action(action).await;

        let errors = collect_action_errors(&raw, "entry");
        let success = errors.is_empty()
            && raw.get("status").and_then(Value::as_str) == Some("ok");
        let mut errors = errors;
        if !success && errors.is_empty() {
            errors.push("entry order was not accepted; see raw payload for details".to_string());
        }

        Ok(EntryResult {
            success,
            backend: TradingBackend::Hyperliquid,
            errors,
            entry_oid: extract_oid(&raw),
            tp_oid: None,
            sl_oid: None,
            raw: Some(raw),
            extra: HashMap::new(),
        })
    }

    async fn close_position(
        &self,
        coin: &str,
        side: Side,
        size: Option<Decimal>,
        fallback_price: Option<Decimal>,
    ) -> Result<CloseResult> {
        if !self.live {
            let mut extra = HashMap::new();
            extra.insert("dry_run".to_string(), Value::Bool(true));
            return Ok(CloseResult {
                success: true,
                backend: TradingBackend::Hyperliquid,
                errors: Vec::new(),
                close_oid: None,
                raw: None,
                extra,
            });
        }

        let quantity = size.unwrap_or(Decimal::ZERO);
        if quantity <= Decimal::ZERO {
            let mut extra = HashMap::new();
            extra.insert(
                "reason".to_string(),
                Value::String("no position size to close".to_string()),
            );
            return Ok(CloseResult {
                success: true,
                backend: TradingBackend::Hyperliquid,
                errors: Vec::new(),
                close_oid: None,
                raw: None,
                extra,
            });
        }

        let (asset, sz_decimals) = self.asset_meta(coin).await?;

        // Mid price, falling back to the caller's hint.
        let mids = self.info_request(json!({"type": "allMids"})).await;
        let reference = mids
            .ok()
            .and_then(|m| {
                m.get(coin.to_ascii_uppercase())
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Decimal>().ok())
            })
            .or(fallback_price)
            .ok_or_else(|| {
                TraderError::MarketDataUnavailable(format!(
                    "no reference price available to close {} on hyperliquid",
                    coin
                ))
            })?;

        // Closing trades against the position side.
        let close_side = match side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        };
        let close_px = format_price(Self::aggressive_price(reference, close_side));

        let action = json!({
            "type": "order",
            "orders": [{
                "a": asset,
                "b": close_side == Side::Long,
                "p": close_px,
                "s": quantity.round_dp(sz_decimals).normalize().to_string(),
                "r": true,
                "t": {"limit": {"tif": "Ioc"}},
            }],
            "grouping": "na",
        });
        let raw = self.post_action(action).await;

        let mut errors = collect_action_errors(&raw, "close");
        let success = errors.is_empty()
            && raw.get("status").and_then(Value::as_str) == Some("ok");
        if !success && errors.is_empty() {
            errors.push("close order was not accepted; see raw payload for details".to_string());
        }

        Ok(CloseResult {
            success,
            backend: TradingBackend::Hyperliquid,
            errors,
            close_oid: extract_oid(&raw),
            raw: Some(raw),
            extra: HashMap::new(),
        })
    }

    async fn current_price(&self, coin: &str) -> Result<Option<Decimal>> {
        let mids = match self.info_request(json!({"type": "allMids"})).await {
            Ok(m) => m,
            Err(e) => {
                warn!(coin, error = %e, "failed to fetch hyperliquid mids");
                return Ok(None);
            }
        };
        Ok(mids
            .get(coin.to_ascii_uppercase())
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Decimal>().ok()))
    }
}
