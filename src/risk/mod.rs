mod daily_loss;
mod state;

pub use daily_loss::{check_daily_loss_limit, update_daily_baseline};
pub use state::{
    activate_kill_switch, apply_env_override, check_risk_limits, deactivate_kill_switch,
    parse_env_flag, RiskControlState, ENV_OVERRIDE_REASON, RUNTIME_RESUME_REASON,
};
