//! Execution planning and risk control engine for an LLM-driven
//! perpetual-futures trading bot.
//!
//! The library turns per-coin model decisions into sized, fee-aware orders,
//! routes them to the configured backend (paper by default), monitors
//! protective levels, and enforces account-level risk limits.

pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod market;
pub mod risk;
pub mod state;
