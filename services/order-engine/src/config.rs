//! Engine configuration
//!
//! Plain deserializable structs with working defaults. Durations are kept
//! in milliseconds so they read naturally from TOML and environment
//! variables.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use types::quote::Venue;

/// Lifecycle engine timing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for a single venue quote
    pub quote_timeout_ms: u64,
    /// Upper bound for settlement simulation
    pub execution_timeout_ms: u64,
    /// Simulated transaction preparation while `building`
    pub building_pause_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quote_timeout_ms: 5_000,
            execution_timeout_ms: 30_000,
            building_pause_ms: 500,
        }
    }
}

impl EngineConfig {
    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn building_pause(&self) -> Duration {
        Duration::from_millis(self.building_pause_ms)
    }
}

/// Job runner limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Jobs processed in parallel
    pub concurrency: usize,
    /// Job starts allowed per `rate_window_ms`
    pub rate_limit: u32,
    pub rate_window_ms: u64,
    /// Attempts per job, first run included
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Pending jobs held before `enqueue` refuses
    pub queue_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            rate_limit: 100,
            rate_window_ms: 60_000,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            queue_capacity: 1_024,
        }
    }
}

impl RunnerConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Characteristics of one simulated venue.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueConfig {
    pub fee: Decimal,
    pub liquidity: Decimal,
    /// Denominator of the price-impact estimate
    pub liquidity_scale: Decimal,
    pub impact_coefficient: Decimal,
    /// Estimated settlement cost in output units
    pub settlement_cost: Decimal,
    /// Maximum relative deviation from the base price, e.g. 0.02 for ±2%
    pub price_variance: Decimal,
    pub quote_latency_ms: (u64, u64),
    pub execution_latency_ms: (u64, u64),
    /// Probability in [0, 1) that a settlement fails
    pub failure_rate: f64,
}

impl VenueConfig {
    /// Built-in profile of each venue.
    pub fn for_venue(venue: Venue) -> Self {
        match venue {
            Venue::Raydium => Self {
                fee: Decimal::new(3, 3),
                liquidity: Decimal::from(1_200_000),
                liquidity_scale: Decimal::from(1_000_000),
                impact_coefficient: Decimal::new(5, 1),
                settlement_cost: Decimal::new(5, 3),
                price_variance: Decimal::new(2, 2),
                quote_latency_ms: (150, 250),
                execution_latency_ms: (2_000, 3_000),
                failure_rate: 0.0,
            },
            Venue::Meteora => Self {
                fee: Decimal::new(2, 3),
                liquidity: Decimal::from(800_000),
                liquidity_scale: Decimal::from(500_000),
                impact_coefficient: Decimal::new(8, 1),
                settlement_cost: Decimal::new(4, 3),
                price_variance: Decimal::new(3, 2),
                quote_latency_ms: (180, 300),
                execution_latency_ms: (2_000, 3_000),
                failure_rate: 0.0,
            },
        }
    }
}

/// Both venues plus the shared reference price they quote around.
///
/// Deserialized as overrides: a field left out of `[venues.meteora]` keeps
/// Meteora's built-in value, never another venue's.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "VenuesOverrides")]
pub struct VenuesConfig {
    pub base_price: Decimal,
    pub raydium: VenueConfig,
    pub meteora: VenueConfig,
}

const DEFAULT_BASE_PRICE: i64 = 100;

impl Default for VenuesConfig {
    fn default() -> Self {
        VenuesOverrides::default().into()
    }
}

impl VenuesConfig {
    pub fn get(&self, venue: Venue) -> &VenueConfig {
        match venue {
            Venue::Raydium => &self.raydium,
            Venue::Meteora => &self.meteora,
        }
    }
}

// ── Overrides ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VenueOverrides {
    fee: Option<Decimal>,
    liquidity: Option<Decimal>,
    liquidity_scale: Option<Decimal>,
    impact_coefficient: Option<Decimal>,
    settlement_cost: Option<Decimal>,
    price_variance: Option<Decimal>,
    quote_latency_ms: Option<(u64, u64)>,
    execution_latency_ms: Option<(u64, u64)>,
    failure_rate: Option<f64>,
}

impl VenueOverrides {
    fn apply(self, venue: Venue) -> VenueConfig {
        let base = VenueConfig::for_venue(venue);
        VenueConfig {
            fee: self.fee.unwrap_or(base.fee),
            liquidity: self.liquidity.unwrap_or(base.liquidity),
            liquidity_scale: self.liquidity_scale.unwrap_or(base.liquidity_scale),
            impact_coefficient: self.impact_coefficient.unwrap_or(base.impact_coefficient),
            settlement_cost: self.settlement_cost.unwrap_or(base.settlement_cost),
            price_variance: self.price_variance.unwrap_or(base.price_variance),
            quote_latency_ms: self.quote_latency_ms.unwrap_or(base.quote_latency_ms),
            execution_latency_ms: self.execution_latency_ms.unwrap_or(base.execution_latency_ms),
            failure_rate: self.failure_rate.unwrap_or(base.failure_rate),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VenuesOverrides {
    base_price: Option<Decimal>,
    raydium: VenueOverrides,
    meteora: VenueOverrides,
}

impl From<VenuesOverrides> for VenuesConfig {
    fn from(overrides: VenuesOverrides) -> Self {
        Self {
            base_price: overrides
                .base_price
                .unwrap_or(Decimal::from(DEFAULT_BASE_PRICE)),
            raydium: overrides.raydium.apply(Venue::Raydium),
            meteora: overrides.meteora.apply(Venue::Meteora),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RunnerConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(5), Duration::from_millis(1_000));
        assert_eq!(config.backoff(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_venue_profiles_differ() {
        let venues = VenuesConfig::default();
        assert_ne!(venues.get(Venue::Raydium).fee, venues.get(Venue::Meteora).fee);
        assert!(venues.get(Venue::Raydium).liquidity > venues.get(Venue::Meteora).liquidity);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"quote_timeout_ms": 10}"#).unwrap();
        assert_eq!(config.quote_timeout(), Duration::from_millis(10));
        assert_eq!(config.execution_timeout_ms, 30_000);
    }

    #[test]
    fn test_partial_venue_override_keeps_own_profile() {
        let venues: VenuesConfig =
            serde_json::from_str(r#"{"meteora": {"fee": "0.001"}}"#).unwrap();
        let meteora = VenueConfig::for_venue(Venue::Meteora);

        assert_eq!(venues.meteora.fee, Decimal::new(1, 3));
        assert_eq!(venues.meteora.liquidity, Decimal::from(800_000));
        assert_eq!(venues.meteora.liquidity_scale, meteora.liquidity_scale);
        assert_eq!(venues.meteora.impact_coefficient, meteora.impact_coefficient);
        assert_eq!(venues.meteora.quote_latency_ms, meteora.quote_latency_ms);
        assert_eq!(venues.raydium, VenueConfig::for_venue(Venue::Raydium));
        assert_eq!(venues.base_price, Decimal::from(100));
    }

    #[test]
    fn test_empty_venues_section_matches_defaults() {
        let venues: VenuesConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(venues, VenuesConfig::default());
    }
}
