mod decision;
mod position;

pub use decision::{Decision, Liquidity, Side, Signal};
pub use position::{AccountSnapshot, ExchangePosition, Position};
