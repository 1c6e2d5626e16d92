//! Backpack USDC perpetual futures client.
//!
//! Market orders over the Backpack REST API with ED25519-signed requests.
//! The signing string is `instruction=<name>&<sorted params>&timestamp=<ms>&window=<ms>`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::domain::Side;
use crate::error::{Result, TraderError};

use super::traits::{CloseResult, EntryRequest, EntryResult, ExchangeClient, TradingBackend};

const DEFAULT_BASE_URL: &str = "https://api.backpack.exchange";
const DEFAULT_WINDOW_MS: u64 = 5000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_QUANTITY_DECIMALS: u32 = 8;

pub struct BackpackFuturesClient {
    http: Client,
    base_url: String,
    api_public_key: String,
    signing_key: SigningKey,
    window_ms: u64,
    // symbol -> quantity filters, populated lazily from /api/v1/markets
    markets_cache: Mutex<HashMap<String, QuantityFilter>>,
}

#[derive(Debug, Clone, Default)]
struct QuantityFilter {
    step_size: Option<Decimal>,
    min_quantity: Option<Decimal>,
}

fn symbol_for(coin: &str) -> String {
    format!("{}_USDC_PERP", coin.to_ascii_uppercase())
}

fn dedup_errors(errors: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    for item in errors {
        if !item.is_empty() && !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

fn collect_order_errors(payload: &Value, label: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(status) = payload.get("status").and_then(Value::as_str) {
        let lower = status.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "cancelled" | "canceled" | "rejected" | "expired" | "error"
        ) {
            errors.push(format!("{}: status={}", label, status));
        }
    }
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str));
    if let Some(msg) = message.filter(|m| !m.is_empty()) {
        errors.push(format!("{}: {}", label, msg));
    }
    dedup_errors(errors)
}

impl BackpackFuturesClient {
    pub fn new(
        api_public_key: String,
        api_secret_seed: String,
        base_url: Option<String>,
        window_ms: Option<u64>,
    ) -> Result<Self> {
        let api_public_key = api_public_key.trim().to_string();
        let api_secret_seed = api_secret_seed.trim().to_string();
        if api_public_key.is_empty() || api_secret_seed.is_empty() {
            return Err(TraderError::MissingCredentials(
                "BACKPACK_API_PUBLIC_KEY and BACKPACK_API_SECRET_SEED are required".to_string(),
            ));
        }

        let seed_bytes = BASE64.decode(&api_secret_seed).map_err(|e| {
            TraderError::Signature(format!(
                "invalid BACKPACK_API_SECRET_SEED; expected base64-encoded ED25519 seed: {}",
                e
            ))
        })?;
        let seed: [u8; 32] = seed_bytes.as_slice().try_into().map_err(|_| {
            TraderError::Signature(
                "invalid BACKPACK_API_SECRET_SEED; seed must decode to 32 bytes".to_string(),
            )
        })?;
        let signing_key = SigningKey::from_bytes(&seed);

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_public_key,
            signing_key,
            window_ms: window_ms.filter(|w| *w > 0).unwrap_or(DEFAULT_WINDOW_MS),
            markets_cache: Mutex::new(HashMap::new()),
        })
    }

    fn build_signing_string(
        instruction: &str,
        params: &BTreeMap<String, String>,
        timestamp_ms: i64,
        window_ms: u64,
    ) -> String {
        let mut base = format!("instruction={}", instruction);
        for (key, value) in params {
            base.push('&');
            base.push_str(key);
            base.push('=');
            base.push_str(value);
        }
        format!("{}&timestamp={}&window={}", base, timestamp_ms, window_ms)
    }

    fn sign_headers(
        &self,
        instruction: &str,
        params: &BTreeMap<String, String>,
    ) -> Vec<(&'static str, String)> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let signing_string =
            Self::build_signing_string(instruction, params, timestamp_ms, self.window_ms);
        let signature = self.signing_key.sign(signing_string.as_bytes());
        vec![
            ("X-API-Key", self.api_public_key.clone()),
            ("X-Signature", BASE64.encode(signature.to_bytes())),
            ("X-Timestamp", timestamp_ms.to_string()),
            ("X-Window", self.window_ms.to_string()),
        ]
    }

    async fn market_filters(&self, symbol: &str) -> Option<QuantityFilter> {
        {
            let cache = self.markets_cache.lock().await;
            if let Some(filter) = cache.get(symbol) {
                return Some(filter.clone());
            }
        }

        let url = format!("{}/api/v1/markets", self.base_url);
        let data: Value = match self.http.get(&url).send().await {
            Ok(response) => response.json().await.unwrap_or(Value::Null),
            Err(e) => {
                warn!(error = %e, "backpack markets request failed");
                return None;
            }
        };

        let markets = data.as_array()?;
        let entry = markets
            .iter()
            .find(|m| m.get("symbol").and_then(Value::as_str) == Some(symbol))?;
        let quantity = entry.get("filters")?.get("quantity")?;

        let parse = |key: &str| {
            quantity
                .get(key)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Decimal>().ok())
        };
        let filter = QuantityFilter {
            step_size: parse("stepSize"),
            min_quantity: parse("minQuantity"),
        };

        self.markets_cache
            .lock()
            .await
            .insert(symbol.to_string(), filter.clone());
        Some(filter)
    }

    /// Round the quantity down to the market's step size. Backpack rejects
    /// orders whose quantity carries too many decimal places.
    async fn format_quantity(&self, symbol: &str, size: Decimal) -> Result<String> {
        if size <= Decimal::ZERO {
            return Err(TraderError::Validation(
                "order quantity must be positive".to_string(),
            ));
        }

        let filter = self.market_filters(symbol).await.unwrap_or_default();
        let quantity = match filter.step_size.filter(|s| *s > Decimal::ZERO) {
            Some(step) => {
                let units = (size / step).trunc();
                let mut rounded = units * step;
                if rounded <= Decimal::ZERO {
                    rounded = filter
                        .min_quantity
                        .filter(|m| *m > Decimal::ZERO)
                        .unwrap_or(step);
                }
                rounded.normalize()
            }
            None => size.round_dp(MAX_QUANTITY_DECIMALS).normalize(),
        };

        if quantity <= Decimal::ZERO {
            return Err(TraderError::Validation(format!(
                "quantity {} rounds to zero for {}",
                size, symbol
            )));
        }
        Ok(quantity.to_string())
    }

    async fn post_order(&self, body: &BTreeMap<String, String>) -> Value {
        let headers = self.sign_headers("orderExecute", body);
        let url = format!("{}/api/v1/order", self.base_url);

        // reduceOnly must be a JSON bool, everything else a string.
        let mut json_body = serde_json::Map::new();
        for (key, value) in body {
            if key == "reduceOnly" {
                json_body.insert(key.clone(), Value::Bool(value == "true"));
            } else {
                json_body.insert(key.clone(), Value::String(value.clone()));
            }
        }

        let mut request = self.http.post(&url).json(&Value::Object(json_body));
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "backpack order request failed");
                return serde_json::json!({"status": "error", "exception": e.to_string()});
            }
        };

        let status_code = response.status();
        let mut data: Value = response.json().await.unwrap_or_else(|_| {
            serde_json::json!({
                "status": "error",
                "message": format!("non-JSON response: HTTP {}", status_code),
            })
        });

        if !status_code.is_success() {
            let obj = data.as_object_mut();
            if let Some(obj) = obj {
                obj.entry("status".to_string())
                    .or_insert_with(|| Value::String("error".to_string()));
                obj.entry("message".to_string()).or_insert_with(|| {
                    Value::String(format!(
                        "HTTP {} while executing Backpack order",
                        status_code
                    ))
                });
            }
        }
        data
    }
}

#[async_trait]
impl ExchangeClient for BackpackFuturesClient {
    fn backend(&self) -> TradingBackend {
        TradingBackend::BackpackFutures
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn place_entry(&self, request: &EntryRequest) -> Result<EntryResult> {
        let symbol = symbol_for(&request.coin);
        let order_side = match request.side {
            Side::Long => "Bid",
            Side::Short => "Ask",
        };
        let quantity = self.format_quantity(&symbol, request.size).await?;

        let mut body = BTreeMap::new();
        body.insert("symbol".to_string(), symbol.clone());
        body.insert("side".to_string(), order_side.to_string());
        body.insert("orderType".to_string(), "Market".to_string());
        body.insert("quantity".to_string(), quantity);
        body.insert("reduceOnly".to_string(), "false".to_string());

        let raw = self.post_order(&body).await;
        let mut errors = collect_order_errors(&raw, "entry");
        let mut success = errors.is_empty();
        if let Some(status) = raw.get("status").and_then(Value::as_str) {
            let lower = status.to_ascii_lowercase();
            if matches!(
                lower.as_str(),
                "cancelled" | "canceled" | "rejected" | "expired" | "error"
            ) {
                success = false;
            }
        }
        if !success && errors.is_empty() {
            errors.push("entry order was not accepted; see raw payload for details".to_string());
        }

        let mut extra = HashMap::new();
        extra.insert("symbol".to_string(), Value::String(symbol));
        extra.insert("side".to_string(), Value::String(order_side.to_string()));

        Ok(EntryResult {
            success,
            backend: TradingBackend::BackpackFutures,
            errors: dedup_errors(errors),
            entry_oid: raw
                .get("id")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            tp_oid: None,
            sl_oid: None,
            raw: Some(raw),
            extra,
        })
    }

    async fn close_position(
        &self,
        coin: &str,
        side: Side,
        size: Option<Decimal>,
        _fallback_price: Option<Decimal>,
    ) -> Result<CloseResult> {
        let quantity = size.unwrap_or(Decimal::ZERO);
        if quantity <= Decimal::ZERO {
            let mut extra = HashMap::new();
            extra.insert(
                "reason".to_string(),
                Value::String("no position size to close".to_string()),
            );
            return Ok(CloseResult {
                success: true,
                backend: TradingBackend::BackpackFutures,
                errors: Vec::new(),
                close_oid: None,
                raw: None,
                extra,
            });
        }

        let symbol = symbol_for(coin);
        let order_side = match side {
            Side::Long => "Ask",
            Side::Short => "Bid",
        };
        let quantity_str = self.format_quantity(&symbol, quantity).await?;

        let mut body = BTreeMap::new();
        body.insert("symbol".to_string(), symbol.clone());
        body.insert("side".to_string(), order_side.to_string());
        body.insert("orderType".to_string(), "Market".to_string());
        body.insert("quantity".to_string(), quantity_str);
        body.insert("reduceOnly".to_string(), "true".to_string());

        let raw = self.post_order(&body).await;
        let mut errors = collect_order_errors(&raw, "close");
        let mut success = errors.is_empty();
        if let Some(status) = raw.get("status").and_then(Value::as_str) {
            let lower = status.to_ascii_lowercase();
            if matches!(
                lower.as_str(),
                "cancelled" | "canceled" | "rejected" | "expired" | "error"
            ) {
                success = false;
            }
        }

        // The exchange already flattened the position; treat as closed.
        let mut already_closed_reason = None;
        let message = raw
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| raw.get("error").and_then(Value::as_str));
        if !success {
            if let Some(msg) = message {
                if msg.to_ascii_lowercase().contains("reduce only order not reduced") {
                    success = true;
                    errors.clear();
                    already_closed_reason = Some(
                        "position already closed on exchange (reduce-only order not reduced)"
                            .to_string(),
                    );
                }
            }
        }

        if !success && errors.is_empty() {
            errors.push("close order was not accepted; see raw payload for details".to_string());
        }

        let mut extra = HashMap::new();
        extra.insert("symbol".to_string(), Value::String(symbol));
        if let Some(reason) = already_closed_reason {
            extra.insert("reason".to_string(), Value::String(reason));
        }

        Ok(CloseResult {
            success,
            backend: TradingBackend::BackpackFutures,
            errors: dedup_errors(errors),
            close_oid: raw
                .get("id")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            raw: Some(raw),
            extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_non_base64_seed() {
        let result = BackpackFuturesClient::new(
            "pubkey".to_string(),
            "not-base64!!!".to_string(),
            None,
            None,
        );
        assert!(matches!(result, Err(TraderError::Signature(_))));
    }

    #[test]
    fn rejects_missing_credentials() {
        let result = BackpackFuturesClient::new("".to_string(), "".to_string(), None, None);
        assert!(matches!(result, Err(TraderError::MissingCredentials(_))));
    }

    #[test]
    fn accepts_valid_seed() {
        let seed = BASE64.encode([7u8; 32]);
        let client = BackpackFuturesClient::new("pubkey".to_string(), seed, None, None);
        assert!(client.is_ok());
    }

    #[test]
    fn signing_string_sorts_params() {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), "BTC_USDC_PERP".to_string());
        params.insert("quantity".to_string(), "0.5".to_string());
        params.insert("orderType".to_string(), "Market".to_string());
        let s = BackpackFuturesClient::build_signing_string("orderExecute", &params, 1700000000000, 5000);
        assert_eq!(
            s,
            "instruction=orderExecute&orderType=Market&quantity=0.5&symbol=BTC_USDC_PERP&timestamp=1700000000000&window=5000"
        );
    }

    #[test]
    fn order_errors_include_status_and_message() {
        let payload = json!({"status": "Rejected", "message": "Insufficient margin"});
        let errors = collect_order_errors(&payload, "entry");
        assert_eq!(
            errors,
            vec![
                "entry: status=Rejected".to_string(),
                "entry: Insufficient margin".to_string(),
            ]
        );
    }

    #[test]
    fn coin_maps_to_usdc_perp_symbol() {
        assert_eq!(symbol_for("sol"), "SOL_USDC_PERP");
    }
}
