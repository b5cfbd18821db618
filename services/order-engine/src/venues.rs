//! Simulated liquidity venues
//!
//! Each venue quotes around a shared base price with its own variance, fee
//! and liquidity profile, and settles trades after a simulated delay.
//! Randomness and delays are injected so tests run deterministically and
//! without sleeping.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use types::clock::now_nanos;
use types::execution::ExecutionOutcome;
use types::ids::{OrderId, SettlementRef};
use types::quote::{Quote, Venue};

use crate::config::{VenueConfig, VenuesConfig};

/// Decimal places kept from a random draw.
const DRAW_SCALE: u32 = 6;
/// Decimal places of quoted and realized prices.
const PRICE_DP: u32 = 6;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VenueError {
    #[error("{venue}: insufficient liquidity (requested {requested}, available {available})")]
    InsufficientLiquidity {
        venue: Venue,
        requested: Decimal,
        available: Decimal,
    },

    #[error("{venue}: settlement failed: {reason}")]
    SettlementFailed { venue: Venue, reason: String },

    #[error("{venue}: invalid request: {reason}")]
    InvalidRequest { venue: Venue, reason: String },
}

// ── Entropy ─────────────────────────────────────────────────────────

/// Source of uniform draws in `[0, 1)`.
pub trait Entropy: Send + Sync {
    fn next_unit(&self) -> f64;
}

/// Non-seeded production source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadEntropy;

impl Entropy for ThreadEntropy {
    fn next_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Reproducible source for simulations and tests.
#[derive(Debug)]
pub struct SeededEntropy {
    rng: Mutex<ChaCha8Rng>,
}

impl SeededEntropy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl Entropy for SeededEntropy {
    fn next_unit(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen::<f64>()
    }
}

/// Always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedEntropy(pub f64);

impl Entropy for FixedEntropy {
    fn next_unit(&self) -> f64 {
        self.0.clamp(0.0, 0.999_999)
    }
}

fn draw(entropy: &dyn Entropy) -> Decimal {
    let unit = entropy.next_unit().clamp(0.0, 0.999_999);
    Decimal::new((unit * 10f64.powi(DRAW_SCALE as i32)) as i64, DRAW_SCALE)
}

// ── Pacing ──────────────────────────────────────────────────────────

/// Whether simulated latency actually sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    #[default]
    Realtime,
    Instant,
}

impl Pacing {
    async fn pause(&self, entropy: &dyn Entropy, (min_ms, max_ms): (u64, u64)) {
        if *self == Pacing::Instant {
            return;
        }
        let span = max_ms.saturating_sub(min_ms) as f64;
        let ms = min_ms + (entropy.next_unit() * span) as u64;
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

// ── Venue Trait ─────────────────────────────────────────────────────

/// Parameters of one settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub order_id: OrderId,
    pub amount_in: Decimal,
    /// Maximum tolerated adverse move as a fraction
    pub slippage: Decimal,
    /// Price the routing decision was made on
    pub quoted_price: Decimal,
}

#[async_trait]
pub trait LiquidityVenue: Send + Sync {
    fn venue(&self) -> Venue;

    async fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount: Decimal,
    ) -> Result<Quote, VenueError>;

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, VenueError>;
}

// ── Simulated Venue ─────────────────────────────────────────────────

pub struct SimulatedVenue {
    venue: Venue,
    base_price: Decimal,
    config: VenueConfig,
    entropy: Arc<dyn Entropy>,
    pacing: Pacing,
}

impl SimulatedVenue {
    pub fn new(
        venue: Venue,
        base_price: Decimal,
        config: VenueConfig,
        entropy: Arc<dyn Entropy>,
        pacing: Pacing,
    ) -> Self {
        Self {
            venue,
            base_price,
            config,
            entropy,
            pacing,
        }
    }

    /// Both simulated venues, sharing `entropy`.
    pub fn pair(
        config: &VenuesConfig,
        entropy: Arc<dyn Entropy>,
        pacing: Pacing,
    ) -> [Arc<dyn LiquidityVenue>; 2] {
        Venue::ALL.map(|venue| {
            Arc::new(Self::new(
                venue,
                config.base_price,
                config.get(venue).clone(),
                entropy.clone(),
                pacing,
            )) as Arc<dyn LiquidityVenue>
        })
    }
}

#[async_trait]
impl LiquidityVenue for SimulatedVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount: Decimal,
    ) -> Result<Quote, VenueError> {
        if amount <= Decimal::ZERO {
            return Err(VenueError::InvalidRequest {
                venue: self.venue,
                reason: format!("amount must be positive, got {}", amount),
            });
        }
        if amount > self.config.liquidity {
            return Err(VenueError::InsufficientLiquidity {
                venue: self.venue,
                requested: amount,
                available: self.config.liquidity,
            });
        }

        self.pacing
            .pause(self.entropy.as_ref(), self.config.quote_latency_ms)
            .await;

        // price = base * (1 + variance * (2u - 1))
        let u = draw(self.entropy.as_ref());
        let swing = self.config.price_variance * (Decimal::TWO * u - Decimal::ONE);
        let price = (self.base_price * (Decimal::ONE + swing)).round_dp(PRICE_DP);
        let fee = self.config.fee;

        let quote = Quote {
            venue: self.venue,
            price,
            fee,
            liquidity: self.config.liquidity,
            settlement_cost: self.config.settlement_cost,
            amount_out: amount * price * (Decimal::ONE - fee),
            price_impact: self.config.impact_coefficient * amount / self.config.liquidity_scale,
            quoted_at: now_nanos(),
        };
        debug!(
            venue = %self.venue,
            token_in,
            token_out,
            %amount,
            %price,
            "Quote generated"
        );
        Ok(quote)
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, VenueError> {
        self.pacing
            .pause(self.entropy.as_ref(), self.config.execution_latency_ms)
            .await;

        if self.config.failure_rate > 0.0 && self.entropy.next_unit() < self.config.failure_rate {
            return Err(VenueError::SettlementFailed {
                venue: self.venue,
                reason: "transaction reverted".into(),
            });
        }

        // realized = quoted * (1 - U(0, slippage))
        let realized_slippage = draw(self.entropy.as_ref()) * request.slippage;
        let executed_price =
            (request.quoted_price * (Decimal::ONE - realized_slippage)).round_dp(PRICE_DP);
        let gross = request.amount_in * executed_price;
        let fee_paid = gross * self.config.fee;

        let outcome = ExecutionOutcome {
            settlement_ref: SettlementRef::generate(),
            venue: self.venue,
            executed_price,
            amount_out: gross - fee_paid,
            cost_paid: fee_paid + self.config.settlement_cost,
            realized_slippage,
            executed_at: now_nanos(),
        };
        debug!(
            order_id = %request.order_id,
            venue = %self.venue,
            %executed_price,
            settlement_ref = %outcome.settlement_ref,
            "Settlement simulated"
        );
        Ok(outcome)
    }
}
