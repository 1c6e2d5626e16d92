use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Reason recorded when the kill-switch is driven by the `KILL_SWITCH`
/// environment variable rather than an operator command.
pub const ENV_OVERRIDE_REASON: &str = "env:KILL_SWITCH";

/// Default reason used when the kill-switch is released at runtime.
pub const RUNTIME_RESUME_REASON: &str = "runtime:resume";

/// Risk control state, persisted as the `risk_control` block of the
/// portfolio JSON document.
///
/// Every field defaults so that documents written by older versions (or with
/// the block missing entirely) deserialize cleanly instead of erroring.
///
/// Invariant: `kill_switch_reason` and `kill_switch_triggered_at` may be
/// non-null while `kill_switch_active` is false. Deactivation keeps the
/// trigger timestamp as an audit trail, so callers must check the `active`
/// flag and never infer activity from reason presence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskControlState {
    pub kill_switch_active: bool,
    pub kill_switch_reason: Option<String>,
    /// ISO-8601 timestamp of the most recent activation. Preserved across
    /// deactivation.
    pub kill_switch_triggered_at: Option<String>,
    pub daily_start_equity: Option<Decimal>,
    /// UTC date string (YYYY-MM-DD) the daily baseline belongs to.
    pub daily_start_date: Option<String>,
    /// Current daily loss percentage (negative = loss).
    pub daily_loss_pct: Decimal,
    /// Whether the kill-switch was triggered by the daily loss limit.
    pub daily_loss_triggered: bool,
}

/// Activate the kill-switch. New entries are blocked until deactivation;
/// closes and SL/TP exits keep running.
///
/// Does not touch the daily-loss fields.
pub fn activate_kill_switch(
    state: &mut RiskControlState,
    reason: &str,
    triggered_at: Option<DateTime<Utc>>,
) {
    let triggered_at = triggered_at.unwrap_or_else(Utc::now);
    state.kill_switch_active = true;
    state.kill_switch_reason = Some(reason.to_string());
    state.kill_switch_triggered_at = Some(triggered_at.to_rfc3339());
    warn!(reason, triggered_at = %triggered_at, "kill-switch activated");
}

/// Release the kill-switch. The original trigger timestamp is kept so that
/// the audit trail survives the resume; only the reason is overwritten.
///
/// Does not touch the daily-loss fields.
pub fn deactivate_kill_switch(state: &mut RiskControlState, reason: &str) {
    state.kill_switch_active = false;
    state.kill_switch_reason = Some(reason.to_string());
    info!(reason, "kill-switch deactivated");
}

/// Tri-state parse of a boolean-ish environment value.
pub fn parse_env_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply the `KILL_SWITCH` environment variable on top of persisted state.
///
/// Priority is three-way:
/// - unset: state unchanged, returns `false`.
/// - truthy: activates with reason [`ENV_OVERRIDE_REASON`] unless already
///   active with that same reason (idempotent no-op).
/// - falsy: deactivates with reason [`ENV_OVERRIDE_REASON`] if currently
///   active, otherwise no-op.
/// - anything else: warn and leave the state alone.
///
/// Returns whether the state was changed by the override.
pub fn apply_env_override(state: &mut RiskControlState, env_value: Option<&str>) -> bool {
    let Some(raw) = env_value else {
        return false;
    };

    match parse_env_flag(raw) {
        Some(true) => {
            if state.kill_switch_active
                && state.kill_switch_reason.as_deref() == Some(ENV_OVERRIDE_REASON)
            {
                return false;
            }
            activate_kill_switch(state, ENV_OVERRIDE_REASON, None);
            true
        }
        Some(false) => {
            if state.kill_switch_active {
                deactivate_kill_switch(state, ENV_OVERRIDE_REASON);
                true
            } else {
                false
            }
        }
        None => {
            warn!(value = raw, "unrecognized KILL_SWITCH value; state unchanged");
            false
        }
    }
}

/// Gate for new entry orders.
///
/// Returns `true` (entries allowed) when risk control is disabled via the
/// feature flag, or when the kill-switch is inactive. This gate applies to
/// new entries only: closes and SL/TP exits must always run.
pub fn check_risk_limits(state: &RiskControlState, risk_control_enabled: bool) -> bool {
    if !risk_control_enabled {
        info!("RISK_CONTROL_ENABLED=false; skipping risk checks");
        return true;
    }
    if state.kill_switch_active {
        warn!(
            reason = state.kill_switch_reason.as_deref().unwrap_or("unknown"),
            "kill-switch active; new entries blocked"
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn default_state_is_inactive() {
        let state = RiskControlState::default();
        assert!(!state.kill_switch_active);
        assert!(state.kill_switch_reason.is_none());
        assert!(state.kill_switch_triggered_at.is_none());
        assert_eq!(state.daily_loss_pct, Decimal::ZERO);
        assert!(!state.daily_loss_triggered);
    }

    #[test]
    fn activate_sets_reason_and_timestamp() {
        let mut state = RiskControlState::default();
        let at = Utc.with_ymd_and_hms(2025, 11, 30, 12, 0, 0).unwrap();
        activate_kill_switch(&mut state, "Manual trigger", Some(at));

        assert!(state.kill_switch_active);
        assert_eq!(state.kill_switch_reason.as_deref(), Some("Manual trigger"));
        assert_eq!(
            state.kill_switch_triggered_at.as_deref(),
            Some("2025-11-30T12:00:00+00:00")
        );
    }

    #[test]
    fn activate_defaults_triggered_at_to_now() {
        let mut state = RiskControlState::default();
        activate_kill_switch(&mut state, "test", None);
        assert!(state.kill_switch_triggered_at.is_some());
    }

    #[test]
    fn deactivate_preserves_triggered_at() {
        let mut state = RiskControlState::default();
        let at = Utc.with_ymd_and_hms(2025, 11, 30, 8, 30, 0).unwrap();
        activate_kill_switch(&mut state, "Daily loss limit", Some(at));
        let triggered_at = state.kill_switch_triggered_at.clone();

        deactivate_kill_switch(&mut state, RUNTIME_RESUME_REASON);

        assert!(!state.kill_switch_active);
        assert_eq!(
            state.kill_switch_reason.as_deref(),
            Some(RUNTIME_RESUME_REASON)
        );
        assert_eq!(state.kill_switch_triggered_at, triggered_at);
    }

    #[test]
    fn parse_env_flag_is_tri_state() {
        for raw in ["1", "true", " YES ", "On"] {
            assert_eq!(parse_env_flag(raw), Some(true), "value {raw}");
        }
        for raw in ["0", "false", "No", " OFF"] {
            assert_eq!(parse_env_flag(raw), Some(false), "value {raw}");
        }
        for raw in ["", "maybe", "2", "enabled"] {
            assert_eq!(parse_env_flag(raw), None, "value {raw}");
        }
    }

    #[test]
    fn env_override_unset_is_noop() {
        let mut state = RiskControlState::default();
        assert!(!apply_env_override(&mut state, None));
        assert!(!state.kill_switch_active);
    }

    #[test]
    fn env_override_truthy_activates() {
        for raw in ["1", "true", "YES", "On"] {
            let mut state = RiskControlState::default();
            assert!(apply_env_override(&mut state, Some(raw)), "value {raw}");
            assert!(state.kill_switch_active);
            assert_eq!(
                state.kill_switch_reason.as_deref(),
                Some(ENV_OVERRIDE_REASON)
            );
        }
    }

    #[test]
    fn env_override_truthy_is_idempotent_for_env_reason() {
        let mut state = RiskControlState::default();
        assert!(apply_env_override(&mut state, Some("true")));
        let triggered_at = state.kill_switch_triggered_at.clone();

        assert!(!apply_env_override(&mut state, Some("true")));
        assert_eq!(state.kill_switch_triggered_at, triggered_at);
    }

    #[test]
    fn env_override_truthy_reactivates_over_other_reason() {
        let mut state = RiskControlState::default();
        activate_kill_switch(&mut state, "Manual trigger", None);
        assert!(apply_env_override(&mut state, Some("true")));
        assert_eq!(
            state.kill_switch_reason.as_deref(),
            Some(ENV_OVERRIDE_REASON)
        );
    }

    #[test]
    fn env_override_falsy_deactivates_active_state() {
        for raw in ["0", "false", "NO", "off"] {
            let mut state = RiskControlState::default();
            activate_kill_switch(&mut state, "Manual trigger", None);
            assert!(apply_env_override(&mut state, Some(raw)), "value {raw}");
            assert!(!state.kill_switch_active);
            assert_eq!(
                state.kill_switch_reason.as_deref(),
                Some(ENV_OVERRIDE_REASON)
            );
        }
    }

    #[test]
    fn env_override_falsy_on_inactive_is_noop() {
        let mut state = RiskControlState::default();
        assert!(!apply_env_override(&mut state, Some("0")));
        assert!(state.kill_switch_reason.is_none());
    }

    #[test]
    fn env_override_invalid_value_leaves_state_alone() {
        let mut state = RiskControlState::default();
        activate_kill_switch(&mut state, "Manual trigger", None);
        assert!(!apply_env_override(&mut state, Some("maybe")));
        assert!(state.kill_switch_active);
        assert_eq!(state.kill_switch_reason.as_deref(), Some("Manual trigger"));
    }

    #[test]
    fn check_risk_limits_true_when_disabled_regardless_of_kill_switch() {
        let mut state = RiskControlState::default();
        activate_kill_switch(&mut state, "Manual trigger", None);
        assert!(check_risk_limits(&state, false));
    }

    #[test]
    fn check_risk_limits_blocks_when_kill_switch_active() {
        let mut state = RiskControlState::default();
        assert!(check_risk_limits(&state, true));
        activate_kill_switch(&mut state, "Manual trigger", None);
        assert!(!check_risk_limits(&state, true));
    }

    #[test]
    fn serde_roundtrip_is_identity() {
        let state = RiskControlState {
            kill_switch_active: true,
            kill_switch_reason: Some("Daily loss limit reached: -5.50%".to_string()),
            kill_switch_triggered_at: Some("2025-11-30T14:30:00+00:00".to_string()),
            daily_start_equity: Some(dec!(12500)),
            daily_start_date: Some("2025-11-30".to_string()),
            daily_loss_pct: dec!(-5.5),
            daily_loss_triggered: true,
        };
        let json = serde_json::to_string(&state).unwrap();
        let restored: RiskControlState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn missing_and_unknown_fields_deserialize_to_defaults() {
        let restored: RiskControlState = serde_json::from_str(
            r#"{"kill_switch_active": true, "unknown_field": "ignored"}"#,
        )
        .unwrap();
        assert!(restored.kill_switch_active);
        assert!(restored.kill_switch_triggered_at.is_none());
        assert_eq!(restored.daily_loss_pct, Decimal::ZERO);

        let empty: RiskControlState = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, RiskControlState::default());
    }
}
