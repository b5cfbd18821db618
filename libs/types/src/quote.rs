//! Venue quotes and routing decisions

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulated liquidity venue
///
/// Declaration order is the fixed tie-break priority used when two quotes
/// are identical in both total cost and liquidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Raydium,
    Meteora,
}

impl Venue {
    pub const ALL: [Venue; 2] = [Venue::Raydium, Venue::Meteora];

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Raydium => "raydium",
            Venue::Meteora => "meteora",
        }
    }

    /// Lower value wins a full tie.
    pub fn priority(&self) -> u8 {
        match self {
            Venue::Raydium => 0,
            Venue::Meteora => 1,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priced quote from one venue for one routing attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub venue: Venue,
    pub price: Decimal,
    /// Fee fraction, e.g. 0.003 for 30 bps
    pub fee: Decimal,
    /// Available liquidity reported by the venue
    pub liquidity: Decimal,
    /// Estimated settlement cost in output token units
    pub settlement_cost: Decimal,
    /// `amount * price * (1 - fee)`
    pub amount_out: Decimal,
    pub price_impact: Decimal,
    pub quoted_at: i64, // Unix nanos
}

impl Quote {
    /// Input amount valued at this venue's price, net of fee, plus the
    /// estimated settlement cost.
    pub fn total_cost(&self, amount: Decimal) -> Decimal {
        amount * self.price * (Decimal::ONE - self.fee) + self.settlement_cost
    }
}

/// Outcome of the routing phase, persisted once per order for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub venue: Venue,
    pub price: Decimal,
    pub fee: Decimal,
    pub total_cost: Decimal,
    /// Human-readable justification
    pub reason: String,
    /// Every quote considered, chosen one included
    pub alternatives: Vec<Quote>,
    pub decided_at: i64,
}

impl RoutingDecision {
    /// The quote the decision was made on.
    pub fn chosen_quote(&self) -> Option<&Quote> {
        self.alternatives.iter().find(|q| q.venue == self.venue)
    }
}
