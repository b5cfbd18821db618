//! Venue selection
//!
//! Picks the venue with the lower total cost for the order amount. Equal
//! costs go to the deeper venue; a full tie goes to the venue with the
//! better fixed priority, so the result never depends on argument order.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use types::clock::now_nanos;
use types::quote::{Quote, RoutingDecision};

/// Choose between two quotes for `amount` units of input.
pub fn select(a: &Quote, b: &Quote, amount: Decimal) -> RoutingDecision {
    let cost_a = a.total_cost(amount);
    let cost_b = b.total_cost(amount);

    let ordering = cost_a
        .cmp(&cost_b)
        .then_with(|| b.liquidity.cmp(&a.liquidity))
        .then_with(|| a.venue.priority().cmp(&b.venue.priority()));

    let (chosen, chosen_cost, other, other_cost) = match ordering {
        Ordering::Greater => (b, cost_b, a, cost_a),
        _ => (a, cost_a, b, cost_b),
    };

    let reason = if chosen_cost != other_cost {
        format!(
            "{} total cost {} beats {} total cost {}",
            chosen.venue, chosen_cost, other.venue, other_cost
        )
    } else if chosen.liquidity != other.liquidity {
        format!(
            "equal total cost {}; {} has deeper liquidity ({} vs {})",
            chosen_cost, chosen.venue, chosen.liquidity, other.liquidity
        )
    } else {
        format!(
            "equal total cost {} and liquidity {}; {} wins on venue priority",
            chosen_cost, chosen.liquidity, chosen.venue
        )
    };

    RoutingDecision {
        venue: chosen.venue,
        price: chosen.price,
        fee: chosen.fee,
        total_cost: chosen_cost,
        reason,
        alternatives: vec![a.clone(), b.clone()],
        decided_at: now_nanos(),
    }
}
