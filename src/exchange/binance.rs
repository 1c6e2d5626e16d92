//! Binance USDⓈ-M futures execution client.
//!
//! Signed REST against `fapi`. Exchange rejections are folded into
//! `success=false` results; only transport and signing failures surface as
//! errors so the caller can distinguish "order refused" from "never sent".

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::{AccountSnapshot, ExchangePosition, Side};
use crate::error::{Result, TraderError};

use super::traits::{
    CloseResult, EntryRequest, EntryResult, ExchangeClient, TpSlResult, TradingBackend,
};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceFuturesClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

fn symbol_for(coin: &str) -> String {
    format!("{}USDT", coin.to_ascii_uppercase())
}

fn coin_from_symbol(symbol: &str) -> String {
    let upper = symbol.to_ascii_uppercase();
    for quote in ["USDT", "USDC", "USD"] {
        if let Some(stripped) = upper.strip_suffix(quote) {
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    upper
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

/// Pull human-readable errors out of a Binance order payload.
fn collect_payload_errors(payload: &Value, label: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(status) = payload.get("status").and_then(Value::as_str) {
        let lower = status.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "rejected" | "expired" | "canceled" | "cancelled" | "error"
        ) {
            errors.push(format!("{}: status={}", label, status));
        }
    }
    let code = payload.get("code").and_then(Value::as_i64);
    if let Some(msg) = payload.get("msg").and_then(Value::as_str) {
        match code {
            Some(c) if c != 0 && c != 200 => errors.push(format!("{}: {} {}", label, c, msg)),
            _ => errors.push(format!("{}: {}", label, msg)),
        }
    }
    dedup_errors(errors)
}

fn extract_order_id(payload: &Value) -> Option<String> {
    for key in ["orderId", "order_id", "id"] {
        match payload.get(key) {
            Some(Value::Number(n)) => return Some(n.to_string()),
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            _ => {}
        }
    }
    None
}

/// Fold one protective-leg payload into its order id and errors. A leg with
/// any payload error yields no order id.
fn tpsl_leg_outcome(payload: &Value, label: &str) -> (Option<String>, Vec<String>) {
    let errors = collect_payload_errors(payload, label);
    if errors.is_empty() {
        (extract_order_id(payload), Vec::new())
    } else {
        (None, errors)
    }
}

/// A TP/SL amendment succeeds only when every requested leg got an order id.
/// A partially-placed amendment is a failure; the accepted leg stays on the
/// exchange and is reported through the order-id fields.
fn tpsl_success(
    sl_requested: bool,
    sl_order_id: Option<&str>,
    tp_requested: bool,
    tp_order_id: Option<&str>,
) -> bool {
    (!sl_requested || sl_order_id.is_some()) && (!tp_requested || tp_order_id.is_some())
}

fn decimal_field(payload: &Value, key: &str) -> Decimal {
    payload
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Decimal>().ok())
        .unwrap_or(Decimal::ZERO)
}

impl BinanceFuturesClient {
    pub fn new(api_key: String, api_secret: String, base_url: Option<String>) -> Result<Self> {
        if api_key.trim().is_empty() || api_secret.trim().is_empty() {
            return Err(TraderError::MissingCredentials(
                "BINANCE_API_KEY and BINANCE_API_SECRET are required for live Binance futures"
                    .to_string(),
            ));
        }
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            api_secret,
        })
    }

    fn sign_query(&self, params: &[(&str, String)]) -> Result<String> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        query.push(format!("timestamp={}", timestamp));
        let query = query.join("&");

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| TraderError::Signature(format!("invalid Binance secret: {}", e)))?;
        mac.update(query.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn signed_post(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let query = self.sign_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            debug!(%status, %path, "binance request returned non-2xx");
        }
        Ok(body)
    }

    async fn signed_get(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let query = self.sign_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Ok(response.json().await.unwrap_or(Value::Null))
    }

    async fn signed_delete(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let query = self.sign_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Ok(response.json().await.unwrap_or(Value::Null))
    }

    /// Best-effort leverage change; a failure here must not abort the entry.
    async fn set_leverage(&self, symbol: &str, leverage: Decimal) {
        let leverage_int = leverage.trunc().to_string();
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage_int.clone()),
        ];
        match self.signed_post("/fapi/v1/leverage", &params).await {
            Ok(body) => {
                if body.get("leverage").is_none() {
                    warn!(symbol, leverage = %leverage_int, ?body, "leverage change not confirmed");
                }
            }
            Err(e) => warn!(symbol, leverage = %leverage_int, error = %e, "failed to set leverage"),
        }
    }

    /// Cancel any resting STOP_MARKET / TAKE_PROFIT_MARKET orders for the
    /// position side before placing replacements.
    async fn cancel_existing_tpsl(&self, symbol: &str, position_side: &str) {
        let params = [("symbol", symbol.to_string())];
        let open_orders = match self.signed_get("/fapi/v1/openOrders", &params).await {
            Ok(Value::Array(orders)) => orders,
            Ok(_) => return,
            Err(e) => {
                warn!(symbol, error = %e, "failed to list open orders for TP/SL cancel");
                return;
            }
        };

        for order in open_orders {
            let order_type = order
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_ascii_uppercase();
            if order_type != "STOP_MARKET" && order_type != "TAKE_PROFIT_MARKET" {
                continue;
            }
            if order.get("positionSide").and_then(Value::as_str) != Some(position_side) {
                continue;
            }
            let Some(order_id) = extract_order_id(&order) else {
                continue;
            };
            let cancel_params = [
                ("symbol", symbol.to_string()),
                ("orderId", order_id.clone()),
            ];
            match self.signed_delete("/fapi/v1/order", &cancel_params).await {
                Ok(_) => debug!(symbol, order_id, order_type, "cancelled resting TP/SL order"),
                Err(e) => warn!(symbol, order_id, error = %e, "failed to cancel TP/SL order"),
            }
        }
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        order_side: &str,
        position_side: &str,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<Value> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", order_side.to_ascii_uppercase()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("positionSide", position_side.to_string()),
        ];
        if reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        self.signed_post("/fapi/v1/order", &params).await
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    fn backend(&self) -> TradingBackend {
        TradingBackend::BinanceFutures
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn place_entry(&self, request: &EntryRequest) -> Result<EntryResult> {
        let symbol = symbol_for(&request.coin);
        let position_side = match request.side {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        };

        self.set_leverage(&symbol, request.leverage).await;

        let mut errors: Vec<String> = Vec::new();
        let raw = match self
            .place_market_order(
                &symbol,
                request.side.open_order_side(),
                position_side,
                request.size,
                false,
            )
            .await
        {
            Ok(body) => body,
            Err(e) => {
                error!(coin = %request.coin, error = %e, "binance entry request failed");
                errors.push(format!("entry: {}", e));
                Value::Null
            }
        };

        if errors.is_empty() {
            errors.extend(collect_payload_errors(&raw, "entry"));
        }
        let mut success = errors.is_empty();
        if let Some(status) = raw.get("status").and_then(Value::as_str) {
            let lower = status.to_ascii_lowercase();
            if matches!(
                lower.as_str(),
                "rejected" | "expired" | "canceled" | "cancelled" | "error"
            ) {
                success = false;
            }
        }
        if !success && errors.is_empty() {
            errors.push("entry order was not accepted; see raw payload for details".to_string());
        }

        let entry_oid = extract_order_id(&raw);
        let mut extra = HashMap::new();
        extra.insert("symbol".to_string(), Value::String(symbol.clone()));
        extra.insert(
            "stop_loss_price".to_string(),
            Value::String(request.stop_loss_price.to_string()),
        );
        extra.insert(
            "take_profit_price".to_string(),
            Value::String(request.take_profit_price.to_string()),
        );

        if success {
            info!(
                coin = %request.coin,
                side = %request.side,
                size = %request.size,
                order_id = entry_oid.as_deref().unwrap_or("?"),
                "binance entry order accepted"
            );
        }

        Ok(EntryResult {
            success,
            backend: TradingBackend::BinanceFutures,
            errors: dedup_errors(errors),
            entry_oid,
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
        fallback_price: Option<Decimal>,
    ) -> Result<CloseResult> {
        let symbol = symbol_for(coin);
        let amount = size.unwrap_or(Decimal::ZERO);
        if amount <= Decimal::ZERO {
            let mut extra = HashMap::new();
            extra.insert(
                "reason".to_string(),
                Value::String("no position size to close".to_string()),
            );
            return Ok(CloseResult {
                success: true,
                backend: TradingBackend::BinanceFutures,
                errors: Vec::new(),
                close_oid: None,
                raw: None,
                extra,
            });
        }

        let position_side = match side {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        };

        let mut errors: Vec<String> = Vec::new();
        let raw = match self
            .place_market_order(&symbol, side.close_order_side(), position_side, amount, true)
            .await
        {
            Ok(body) => {
                // Error -1106: reduceOnly not accepted in one-way mode. Retry
                // the close as a plain market order.
                let needs_retry = body.get("code").and_then(Value::as_i64) == Some(-1106);
                if needs_retry {
                    warn!(coin, "reduceOnly rejected; retrying close without it");
                    match self
                        .place_market_order(
                            &symbol,
                            side.close_order_side(),
                            position_side,
                            amount,
                            false,
                        )
                        .await
                    {
                        Ok(retry_body) => retry_body,
                        Err(e) => {
                            errors.push(format!("close: {}", e));
                            Value::Null
                        }
                    }
                } else {
                    body
                }
            }
            Err(e) => {
                error!(coin, error = %e, "binance close request failed");
                errors.push(format!("close: {}", e));
                Value::Null
            }
        };

        if errors.is_empty() {
            errors.extend(collect_payload_errors(&raw, "close"));
        }
        let mut success = errors.is_empty();
        if let Some(status) = raw.get("status").and_then(Value::as_str) {
            let lower = status.to_ascii_lowercase();
            if matches!(
                lower.as_str(),
                "rejected" | "expired" | "canceled" | "cancelled" | "error"
            ) {
                success = false;
            }
        }
        if !success && errors.is_empty() {
            errors.push("close order was not accepted; see raw payload for details".to_string());
        }

        let mut extra = HashMap::new();
        extra.insert("symbol".to_string(), Value::String(symbol));
        if let Some(price) = fallback_price {
            extra.insert(
                "fallback_price".to_string(),
                Value::String(price.to_string()),
            );
        }

        Ok(CloseResult {
            success,
            backend: TradingBackend::BinanceFutures,
            errors: dedup_errors(errors),
            close_oid: extract_order_id(&raw),
            raw: Some(raw),
            extra,
        })
    }

    async fn update_tpsl(
        &self,
        coin: &str,
        side: Side,
        quantity: Decimal,
        new_sl: Option<Decimal>,
        new_tp: Option<Decimal>,
    ) -> Result<TpSlResult> {
        let symbol = symbol_for(coin);
        if new_sl.is_none() && new_tp.is_none() {
            return Ok(TpSlResult {
                success: true,
                backend: TradingBackend::BinanceFutures,
                errors: Vec::new(),
                sl_order_id: None,
                tp_order_id: None,
                raw: None,
            });
        }

        let position_side = match side {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        };
        let close_side = side.close_order_side().to_ascii_uppercase();

        self.cancel_existing_tpsl(&symbol, position_side).await;

        let mut errors: Vec<String> = Vec::new();
        let mut raw_results = serde_json::Map::new();

        let mut sl_order_id = None;
        if let Some(stop) = new_sl.filter(|p| *p > Decimal::ZERO) {
            let params = [
                ("symbol", symbol.clone()),
                ("side", close_side.clone()),
                ("type", "STOP_MARKET".to_string()),
                ("stopPrice", stop.normalize().to_string()),
                ("quantity", quantity.normalize().to_string()),
                ("positionSide", position_side.to_string()),
            ];
            match self.signed_post("/fapi/v1/order", &params).await {
                Ok(body) => {
                    let (order_id, leg_errors) = tpsl_leg_outcome(&body, "SL");
                    if let Some(id) = order_id.as_deref() {
                        info!(coin, stop = %stop, order_id = id, "stop-loss order placed");
                    }
                    sl_order_id = order_id;
                    errors.extend(leg_errors);
                    raw_results.insert("sl_order".to_string(), body);
                }
                Err(e) => errors.push(format!("SL order failed: {}", e)),
            }
        }

        let mut tp_order_id = None;
        if let Some(target) = new_tp.filter(|p| *p > Decimal::ZERO) {
            let params = [
                ("symbol", symbol.clone()),
                ("side", close_side.clone()),
                ("type", "TAKE_PROFIT_MARKET".to_string()),
                ("stopPrice", target.normalize().to_string()),
                ("quantity", quantity.normalize().to_string()),
                ("positionSide", position_side.to_string()),
            ];
            match self.signed_post("/fapi/v1/order", &params).await {
                Ok(body) => {
                    let (order_id, leg_errors) = tpsl_leg_outcome(&body, "TP");
                    if let Some(id) = order_id.as_deref() {
                        info!(coin, target = %target, order_id = id, "take-profit order placed");
                    }
                    tp_order_id = order_id;
                    errors.extend(leg_errors);
                    raw_results.insert("tp_order".to_string(), body);
                }
                Err(e) => errors.push(format!("TP order failed: {}", e)),
            }
        }

        let success = tpsl_success(
            new_sl.is_some(),
            sl_order_id.as_deref(),
            new_tp.is_some(),
            tp_order_id.as_deref(),
        );

        Ok(TpSlResult {
            success,
            backend: TradingBackend::BinanceFutures,
            errors: dedup_errors(errors),
            sl_order_id,
            tp_order_id,
            raw: Some(Value::Object(raw_results)),
        })
    }

    async fn account_snapshot(&self) -> Result<Option<AccountSnapshot>> {
        let balance_body = match self.signed_get("/fapi/v2/account", &[]).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to fetch binance account");
                return Ok(None);
            }
        };

        let balance = decimal_field(&balance_body, "availableBalance");
        let mut total_equity = decimal_field(&balance_body, "totalWalletBalance");
        let total_margin = decimal_field(&balance_body, "totalPositionInitialMargin");
        if total_equity == Decimal::ZERO {
            total_equity = balance;
        }

        let mut positions = Vec::new();
        if let Some(raw_positions) = balance_body.get("positions").and_then(Value::as_array) {
            for pos in raw_positions {
                let quantity_signed = decimal_field(pos, "positionAmt");
                if quantity_signed == Decimal::ZERO {
                    continue;
                }
                let side = match pos.get("positionSide").and_then(Value::as_str) {
                    Some("LONG") => Side::Long,
                    Some("SHORT") => Side::Short,
                    _ if quantity_signed > Decimal::ZERO => Side::Long,
                    _ => Side::Short,
                };
                let quantity = quantity_signed.abs();
                let entry_price = decimal_field(pos, "entryPrice");
                let mut notional = decimal_field(pos, "notional").abs();
                if notional == Decimal::ZERO && entry_price > Decimal::ZERO {
                    notional = quantity * entry_price;
                }
                let margin = decimal_field(pos, "initialMargin");
                let mut leverage = decimal_field(pos, "leverage");
                if leverage == Decimal::ZERO && margin > Decimal::ZERO && notional > Decimal::ZERO {
                    leverage = notional / margin;
                }
                if leverage == Decimal::ZERO {
                    leverage = Decimal::ONE;
                }
                let symbol = pos
                    .get("symbol")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                positions.push(ExchangePosition {
                    coin: coin_from_symbol(symbol),
                    side,
                    quantity,
                    entry_price,
                    mark_price: None,
                    leverage,
                    margin,
                    notional,
                    unrealized_pnl: decimal_field(pos, "unrealizedProfit"),
                    liquidation_price: None,
                    take_profit: None,
                    stop_loss: None,
                });
            }
        }

        Ok(Some(AccountSnapshot {
            balance,
            total_equity,
            total_margin,
            positions,
            raw: Some(balance_body),
        }))
    }

    async fn current_price(&self, coin: &str) -> Result<Option<Decimal>> {
        let symbol = symbol_for(coin);
        let url = format!("{}/fapi/v1/ticker/price?symbol={}", self.base_url, symbol);
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(symbol, error = %e, "failed to fetch ticker price");
                return Ok(None);
            }
        };
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok(body
            .get("price")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Decimal>().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn rejects_missing_credentials() {
        let result = BinanceFuturesClient::new("".to_string(), "secret".to_string(), None);
        assert!(matches!(result, Err(TraderError::MissingCredentials(_))));
    }

    #[test]
    fn collects_status_and_message_errors() {
        let payload = json!({"status": "REJECTED", "code": -2019, "msg": "Margin is insufficient."});
        let errors = collect_payload_errors(&payload, "entry");
        assert_eq!(
            errors,
            vec![
                "entry: status=REJECTED".to_string(),
                "entry: -2019 Margin is insufficient.".to_string(),
            ]
        );
    }

    #[test]
    fn successful_payload_yields_no_errors() {
        let payload = json!({"orderId": 123456, "status": "FILLED"});
        assert!(collect_payload_errors(&payload, "entry").is_empty());
        assert_eq!(extract_order_id(&payload).as_deref(), Some("123456"));
    }

    #[test]
    fn accepted_leg_yields_order_id_without_errors() {
        let payload = json!({"orderId": 777, "status": "NEW"});
        let (order_id, errors) = tpsl_leg_outcome(&payload, "SL");
        assert_eq!(order_id.as_deref(), Some("777"));
        assert!(errors.is_empty());
    }

    #[test]
    fn rejected_leg_yields_errors_and_no_order_id() {
        let payload =
            json!({"status": "REJECTED", "code": -2021, "msg": "Order would immediately trigger."});
        let (order_id, errors) = tpsl_leg_outcome(&payload, "TP");
        assert!(order_id.is_none());
        assert_eq!(
            errors,
            vec![
                "TP: status=REJECTED".to_string(),
                "TP: -2021 Order would immediately trigger.".to_string(),
            ]
        );
    }

    #[test]
    fn partially_placed_tpsl_fails_and_keeps_accepted_leg() {
        let (sl_order_id, sl_errors) =
            tpsl_leg_outcome(&json!({"orderId": 111, "status": "NEW"}), "SL");
        let (tp_order_id, tp_errors) = tpsl_leg_outcome(
            &json!({"status": "REJECTED", "code": -2021, "msg": "Order would immediately trigger."}),
            "TP",
        );

        let mut errors = sl_errors;
        errors.extend(tp_errors);
        let success = tpsl_success(
            true,
            sl_order_id.as_deref(),
            true,
            tp_order_id.as_deref(),
        );

        assert!(!success);
        assert_eq!(sl_order_id.as_deref(), Some("111"));
        assert!(tp_order_id.is_none());
        assert!(errors.iter().any(|e| e.contains("-2021")));
    }

    #[test]
    fn tpsl_success_requires_every_requested_leg() {
        assert!(tpsl_success(true, Some("1"), true, Some("2")));
        assert!(tpsl_success(false, None, true, Some("2")));
        assert!(tpsl_success(false, None, false, None));
        assert!(!tpsl_success(true, None, true, Some("2")));
        assert!(!tpsl_success(true, Some("1"), true, None));
    }

    #[test]
    fn symbol_mapping_roundtrips() {
        assert_eq!(symbol_for("btc"), "BTCUSDT");
        assert_eq!(coin_from_symbol("BTCUSDT"), "BTC");
        assert_eq!(coin_from_symbol("ETHUSDC"), "ETH");
    }

    #[test]
    fn decimal_field_parses_string_numbers() {
        let payload = json!({"availableBalance": "1234.56"});
        assert_eq!(decimal_field(&payload, "availableBalance"), dec!(1234.56));
        assert_eq!(decimal_field(&payload, "missing"), Decimal::ZERO);
    }
}
