use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// The order side that closes a position in this direction.
    pub fn close_order_side(&self) -> &'static str {
        match self {
            Side::Long => "sell",
            Side::Short => "buy",
        }
    }

    /// The order side that opens a position in this direction.
    pub fn open_order_side(&self) -> &'static str {
        match self {
            Side::Long => "buy",
            Side::Short => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Side {
    type Err = &'static str;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            _ => Err("invalid side; expected long|short"),
        }
    }
}

/// Fee-tier selector. Maker and taker orders settle at different fee rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liquidity {
    Maker,
    Taker,
}

impl Default for Liquidity {
    fn default() -> Self {
        Liquidity::Taker
    }
}

impl Liquidity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liquidity::Maker => "maker",
            Liquidity::Taker => "taker",
        }
    }
}

impl fmt::Display for Liquidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-coin signal emitted by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Entry,
    Close,
    Hold,
}

impl Default for Signal {
    fn default() -> Self {
        Signal::Hold
    }
}

/// One trading decision for one coin, as parsed from the model response.
///
/// Numeric fields are optional: the entry planner applies defaults and
/// clamps, so a sparse decision is still actionable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub signal: Signal,
    #[serde(default = "default_side")]
    pub side: Side,
    #[serde(default)]
    pub leverage: Option<Decimal>,
    #[serde(default)]
    pub risk_usd: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub profit_target: Option<Decimal>,
    #[serde(default)]
    pub liquidity: Liquidity,
    #[serde(default)]
    pub fee_rate: Option<Decimal>,
    #[serde(default)]
    pub justification: String,
}

fn default_side() -> Side {
    Side::Long
}

impl Decision {
    /// Synthetic decision used by the SL/TP monitor when a level is breached.
    pub fn synthetic_close(reason: &str) -> Self {
        Self {
            signal: Signal::Close,
            side: Side::Long,
            leverage: None,
            risk_usd: None,
            stop_loss: None,
            profit_target: None,
            liquidity: Liquidity::Taker,
            fee_rate: None,
            justification: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parses_case_insensitively() {
        assert_eq!(Side::from_str("LONG").unwrap(), Side::Long);
        assert_eq!(Side::from_str(" short ").unwrap(), Side::Short);
        assert!(Side::from_str("sideways").is_err());
    }

    #[test]
    fn sparse_decision_deserializes_with_defaults() {
        let decision: Decision =
            serde_json::from_str(r#"{"signal": "entry", "side": "short"}"#).unwrap();
        assert_eq!(decision.signal, Signal::Entry);
        assert_eq!(decision.side, Side::Short);
        assert_eq!(decision.liquidity, Liquidity::Taker);
        assert!(decision.leverage.is_none());
        assert!(decision.justification.is_empty());
    }

    #[test]
    fn close_order_side_is_opposite_of_open() {
        assert_eq!(Side::Long.open_order_side(), "buy");
        assert_eq!(Side::Long.close_order_side(), "sell");
        assert_eq!(Side::Short.open_order_side(), "sell");
        assert_eq!(Side::Short.close_order_side(), "buy");
    }
}
