//! End-to-end persistence checks: the state file written by one process
//! must reload into an equivalent portfolio, including the risk control
//! block, and older files without that block must still load.

use llm_trader::domain::{Liquidity, Position, Side};
use llm_trader::risk::RiskControlState;
use llm_trader::state::TradingState;
use rust_decimal_macros::dec;
use std::path::PathBuf;

fn temp_state_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "llm-trader-integration-{}-{}.json",
        std::process::id(),
        name
    ))
}

fn open_position() -> Position {
    Position {
        side: Side::Short,
        quantity: dec!(2.5),
        entry_price: dec!(3200),
        stop_loss: dec!(3350),
        profit_target: dec!(2900),
        leverage: dec!(5),
        margin: dec!(1600),
        fees_paid: dec!(2.2),
        fee_rate: dec!(0.000275),
        liquidity: Liquidity::Taker,
        risk_usd: dec!(375),
        live_backend: None,
        entry_oid: Some("12345".to_string()),
        tp_oid: None,
        sl_oid: Some("12347".to_string()),
        entry_justification: "lower high rejection".to_string(),
        last_justification: "lower high rejection".to_string(),
    }
}

#[test]
fn portfolio_survives_save_and_reload() {
    let path = temp_state_file("portfolio");
    let mut state = TradingState::new(dec!(10000), &path);
    state.balance = dec!(8397.8);
    state.iteration = 42;
    state.positions.insert("ETH".to_string(), open_position());
    state.risk_control.daily_start_equity = Some(dec!(10000));
    state.risk_control.daily_start_date = Some("2026-08-29".to_string());
    state.risk_control.daily_loss_pct = dec!(-1.6);
    state.save();

    let reloaded = TradingState::load_or_new(dec!(10000), &path);
    assert_eq!(reloaded.balance, dec!(8397.8));
    assert_eq!(reloaded.iteration, 42);

    let pos = &reloaded.positions["ETH"];
    assert_eq!(pos.side, Side::Short);
    assert_eq!(pos.quantity, dec!(2.5));
    assert_eq!(pos.entry_oid.as_deref(), Some("12345"));
    assert!(pos.tp_oid.is_none());

    assert_eq!(reloaded.risk_control.daily_start_equity, Some(dec!(10000)));
    assert_eq!(
        reloaded.risk_control.daily_start_date.as_deref(),
        Some("2026-08-29")
    );
    assert_eq!(reloaded.risk_control.daily_loss_pct, dec!(-1.6));
    assert!(!reloaded.risk_control.kill_switch_active);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn state_file_without_risk_control_block_loads_with_defaults() {
    let path = temp_state_file("legacy");
    std::fs::write(
        &path,
        r#"{
            "balance": "7250.50",
            "positions": {},
            "iteration": 12
        }"#,
    )
    .unwrap();

    let state = TradingState::load_or_new(dec!(10000), &path);
    assert_eq!(state.balance, dec!(7250.50));
    assert_eq!(state.iteration, 12);
    assert_eq!(state.risk_control, RiskControlState::default());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn kill_switch_audit_trail_survives_reload() {
    let path = temp_state_file("audit");
    let mut state = TradingState::new(dec!(10000), &path);
    state.risk_control.kill_switch_active = false;
    state.risk_control.kill_switch_reason = Some("Daily loss limit reached: -5.20%".to_string());
    state.risk_control.kill_switch_triggered_at = Some("2026-08-28T14:05:00Z".to_string());
    state.save();

    // deactivation keeps reason and trigger time for the audit trail
    let reloaded = TradingState::load_or_new(dec!(10000), &path);
    assert!(!reloaded.risk_control.kill_switch_active);
    assert_eq!(
        reloaded.risk_control.kill_switch_reason.as_deref(),
        Some("Daily loss limit reached: -5.20%")
    );
    assert_eq!(
        reloaded.risk_control.kill_switch_triggered_at.as_deref(),
        Some("2026-08-28T14:05:00Z")
    );

    let _ = std::fs::remove_file(&path);
}
