use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use super::state::{activate_kill_switch, RiskControlState};

/// Reset the daily equity baseline when a new UTC day starts.
///
/// Same-day calls leave the baseline untouched, so intraday equity swings
/// never move the reference point.
pub fn update_daily_baseline(
    state: &mut RiskControlState,
    current_equity: Decimal,
    now: DateTime<Utc>,
) {
    let today = now.format("%Y-%m-%d").to_string();
    if state.daily_start_date.as_deref() == Some(today.as_str()) {
        return;
    }

    info!(
        date = %today,
        equity = %current_equity,
        "new UTC day; resetting daily loss baseline"
    );
    state.daily_start_equity = Some(current_equity);
    state.daily_start_date = Some(today);
    state.daily_loss_pct = Decimal::ZERO;
    state.daily_loss_triggered = false;
}

/// Check the daily loss limit and trip the kill-switch on first breach.
///
/// Updates `daily_loss_pct` on every call. Returns `true` only when this
/// call newly triggered the kill-switch; once `daily_loss_triggered` is set,
/// further breaches (even deeper ones) return `false`.
pub fn check_daily_loss_limit(
    state: &mut RiskControlState,
    current_equity: Decimal,
    daily_loss_limit_pct: Decimal,
    daily_loss_limit_enabled: bool,
    risk_control_enabled: bool,
) -> bool {
    if !risk_control_enabled || !daily_loss_limit_enabled {
        return false;
    }

    let Some(start_equity) = state.daily_start_equity else {
        return false;
    };
    if start_equity <= Decimal::ZERO {
        return false;
    }

    let loss_pct = (current_equity - start_equity) / start_equity * dec!(100);
    state.daily_loss_pct = loss_pct;

    if loss_pct > -daily_loss_limit_pct {
        return false;
    }
    if state.daily_loss_triggered {
        return false;
    }

    let reason = format!("Daily loss limit reached: {:.2}%", loss_pct);
    warn!(
        loss_pct = %loss_pct,
        limit_pct = %daily_loss_limit_pct,
        start_equity = %start_equity,
        current_equity = %current_equity,
        "daily loss limit breached; tripping kill-switch"
    );
    state.daily_loss_triggered = true;
    activate_kill_switch(state, &reason, None);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(date: (i32, u32, u32)) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(date.0, date.1, date.2, 10, 0, 0).unwrap()
    }

    #[test]
    fn baseline_set_on_first_call() {
        let mut state = RiskControlState::default();
        update_daily_baseline(&mut state, dec!(10000), at((2025, 11, 30)));

        assert_eq!(state.daily_start_equity, Some(dec!(10000)));
        assert_eq!(state.daily_start_date.as_deref(), Some("2025-11-30"));
    }

    #[test]
    fn baseline_not_reset_same_day() {
        let mut state = RiskControlState::default();
        update_daily_baseline(&mut state, dec!(10000), at((2025, 11, 30)));
        update_daily_baseline(&mut state, dec!(9500), at((2025, 11, 30)));

        assert_eq!(state.daily_start_equity, Some(dec!(10000)));
    }

    #[test]
    fn baseline_resets_on_new_day_and_clears_trigger() {
        let mut state = RiskControlState::default();
        update_daily_baseline(&mut state, dec!(10000), at((2025, 11, 30)));
        state.daily_loss_pct = dec!(-6);
        state.daily_loss_triggered = true;

        update_daily_baseline(&mut state, dec!(9400), at((2025, 12, 1)));

        assert_eq!(state.daily_start_equity, Some(dec!(9400)));
        assert_eq!(state.daily_start_date.as_deref(), Some("2025-12-01"));
        assert_eq!(state.daily_loss_pct, Decimal::ZERO);
        assert!(!state.daily_loss_triggered);
    }

    #[test]
    fn first_breach_trips_kill_switch() {
        let mut state = RiskControlState::default();
        update_daily_baseline(&mut state, dec!(10000), at((2025, 11, 30)));

        // -6% loss against a 5% limit
        let triggered =
            check_daily_loss_limit(&mut state, dec!(9400), dec!(5), true, true);

        assert!(triggered);
        assert!(state.kill_switch_active);
        assert!(state.daily_loss_triggered);
        assert_eq!(state.daily_loss_pct, dec!(-6));
        assert_eq!(
            state.kill_switch_reason.as_deref(),
            Some("Daily loss limit reached: -6.00%")
        );
    }

    #[test]
    fn subsequent_breaches_do_not_retrigger() {
        let mut state = RiskControlState::default();
        update_daily_baseline(&mut state, dec!(10000), at((2025, 11, 30)));
        assert!(check_daily_loss_limit(&mut state, dec!(9400), dec!(5), true, true));

        // deeper loss, but already triggered
        let triggered =
            check_daily_loss_limit(&mut state, dec!(9300), dec!(5), true, true);
        assert!(!triggered);
        assert_eq!(state.daily_loss_pct, dec!(-7));
    }

    #[test]
    fn loss_within_limit_does_not_trigger() {
        let mut state = RiskControlState::default();
        update_daily_baseline(&mut state, dec!(10000), at((2025, 11, 30)));

        let triggered =
            check_daily_loss_limit(&mut state, dec!(9700), dec!(5), true, true);
        assert!(!triggered);
        assert!(!state.kill_switch_active);
        assert_eq!(state.daily_loss_pct, dec!(-3));
    }

    #[test]
    fn disabled_flags_skip_the_check() {
        let mut state = RiskControlState::default();
        update_daily_baseline(&mut state, dec!(10000), at((2025, 11, 30)));

        assert!(!check_daily_loss_limit(&mut state, dec!(9000), dec!(5), false, true));
        assert!(!check_daily_loss_limit(&mut state, dec!(9000), dec!(5), true, false));
        assert!(!state.kill_switch_active);
    }

    #[test]
    fn missing_baseline_is_a_noop() {
        let mut state = RiskControlState::default();
        assert!(!check_daily_loss_limit(&mut state, dec!(9000), dec!(5), true, true));
    }
}
