//! Execution pipeline: plan, route, monitor, execute.

mod executor;
mod monitor;
mod planner;
mod router;

pub use executor::TradeExecutor;
pub use monitor::{scan_protective_exits, ProtectiveExit, STOP_LOSS_REASON, TAKE_PROFIT_REASON};
pub use planner::{
    compute_close_plan, compute_entry_plan, ClosePlan, EntryPlan, MIN_EXPECTED_REWARD_USD,
    MIN_REWARD_FEE_RATIO,
};
pub use router::{position_needs_live_close, route_live_close, route_live_entry};
