use clap::Parser;
use llm_trader::config::AppConfig;
use llm_trader::domain::Decision;
use llm_trader::error::{Result, TraderError};
use llm_trader::exchange::{build_exchange_client, ExchangeClient};
use llm_trader::execution::TradeExecutor;
use llm_trader::market::{BinanceMarketData, MarketData};
use llm_trader::risk::{
    apply_env_override, check_daily_loss_limit, check_risk_limits, parse_env_flag,
    update_daily_baseline,
};
use llm_trader::state::TradingState;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "llm-trader", about = "Execution planning and risk control engine")]
struct Cli {
    /// Directory containing default.toml
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Force the paper backend regardless of configuration
    #[arg(long)]
    paper: bool,

    /// Run a single iteration and exit
    #[arg(long)]
    once: bool,

    /// JSON file of per-coin decisions, re-read every iteration
    #[arg(long)]
    decisions: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config_dir)?;
    if cli.paper {
        config.trading.backend = "paper".to_string();
    }
    init_logging(&config.logging.level);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(error = %e, "invalid configuration");
        }
        return Err(TraderError::Validation(errors.join("; ")));
    }

    // A live backend that cannot be constructed at startup is a fatal
    // misconfiguration; per-iteration failures later are soft.
    if config.is_live_backend() {
        let client = build_exchange_client(&config)?;
        info!(backend = %client.backend(), "live backend ready");
        match client.account_snapshot().await {
            Ok(Some(snapshot)) => info!(
                balance = %snapshot.balance,
                equity = %snapshot.total_equity,
                positions = snapshot.positions_count(),
                "exchange account snapshot"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not fetch exchange account snapshot"),
        }
    }

    let live = config.is_live_backend();
    let state = TradingState::load_or_new(
        config.trading.start_capital(live),
        &config.trading.state_file,
    );
    info!(
        backend = %config.trading.backend,
        live,
        balance = %state.balance,
        positions = state.positions.len(),
        "engine starting"
    );

    let market: Arc<dyn MarketData> = Arc::new(BinanceMarketData::new(
        config.market.base_url.clone(),
        kline_interval(config.trading.interval_secs),
    )?);
    let interval = Duration::from_secs(config.trading.interval_secs);
    let mut executor = TradeExecutor::new(state, config, market);

    loop {
        run_iteration(&mut executor, cli.decisions.as_deref()).await;

        if cli.once {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    executor.state.save();
    info!(balance = %executor.state.balance, "engine stopped");
    Ok(())
}

async fn run_iteration(executor: &mut TradeExecutor, decisions_file: Option<&std::path::Path>) {
    executor.state.iteration += 1;
    info!(iteration = executor.state.iteration, "iteration start");

    // Runtime flags are read from the process env every iteration so an
    // operator can flip them without a restart.
    if let Some(enabled) = env_flag("RISK_CONTROL_ENABLED") {
        executor.set_risk_control_enabled(enabled);
    }
    let kill_switch_env = std::env::var("KILL_SWITCH").ok();
    if apply_env_override(&mut executor.state.risk_control, kill_switch_env.as_deref()) {
        executor.state.save();
    }

    // One candle fetch per position feeds both the equity mark and the
    // SL/TP sweep below, so they cannot disagree on the candle.
    let snapshots = executor.position_snapshots().await;
    let marks: HashMap<String, Decimal> = snapshots
        .iter()
        .map(|(coin, snapshot)| (coin.clone(), snapshot.price))
        .collect();
    let equity = executor.state.total_equity(&marks);
    update_daily_baseline(
        &mut executor.state.risk_control,
        equity,
        chrono::Utc::now(),
    );
    let (limit_pct, limit_enabled, risk_enabled) = {
        let cfg = executor.risk_config();
        (cfg.daily_loss_limit_pct, cfg.daily_loss_limit_enabled, cfg.enabled)
    };
    if check_daily_loss_limit(
        &mut executor.state.risk_control,
        equity,
        limit_pct,
        limit_enabled,
        risk_enabled,
    ) {
        executor.state.save();
    }

    executor.check_stop_loss_take_profit(&snapshots).await;

    if let Some(path) = decisions_file {
        match load_decisions(path) {
            Ok(decisions) if !decisions.is_empty() => {
                let decisions = if check_risk_limits(
                    &executor.state.risk_control,
                    executor.risk_control_enabled(),
                ) {
                    decisions
                } else {
                    // entries are gated; closes and holds still run
                    decisions
                        .into_iter()
                        .filter(|(_, d)| d.signal != llm_trader::domain::Signal::Entry)
                        .collect()
                };
                executor.process_decisions(&decisions).await;
            }
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read decisions"),
        }
    }

    executor.state.save();
}

fn load_decisions(path: &std::path::Path) -> Result<HashMap<String, Decision>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse_env_flag(&raw);
    if parsed.is_none() {
        warn!(name, value = %raw, "unrecognized boolean env value; flag ignored");
    }
    parsed
}

fn kline_interval(secs: u64) -> &'static str {
    match secs {
        0..=60 => "1m",
        61..=300 => "5m",
        301..=900 => "15m",
        901..=3600 => "1h",
        3601..=14400 => "4h",
        _ => "1d",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_parses_set_values_and_drops_garbage() {
        std::env::set_var("LLMT_TEST_FLAG_TRUTHY", "on");
        std::env::set_var("LLMT_TEST_FLAG_FALSY", "0");
        std::env::set_var("LLMT_TEST_FLAG_GARBAGE", "maybe");

        assert_eq!(env_flag("LLMT_TEST_FLAG_TRUTHY"), Some(true));
        assert_eq!(env_flag("LLMT_TEST_FLAG_FALSY"), Some(false));
        assert_eq!(env_flag("LLMT_TEST_FLAG_GARBAGE"), None);
        assert_eq!(env_flag("LLMT_TEST_FLAG_UNSET"), None);

        std::env::remove_var("LLMT_TEST_FLAG_TRUTHY");
        std::env::remove_var("LLMT_TEST_FLAG_FALSY");
        std::env::remove_var("LLMT_TEST_FLAG_GARBAGE");
    }

    #[test]
    fn kline_interval_buckets_by_iteration_length() {
        assert_eq!(kline_interval(60), "1m");
        assert_eq!(kline_interval(900), "15m");
        assert_eq!(kline_interval(3600), "1h");
        assert_eq!(kline_interval(86400), "1d");
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
