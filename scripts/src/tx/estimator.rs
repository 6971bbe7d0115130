//! Cost estimation with a static safety margin.

use std::{fmt, str::FromStr};

use alloy::primitives::Bytes;
use tracing::{debug, info};

use crate::{
    errors::EstimationError,
    tx::{Chain, EncodedAction},
};

/// Multiplier applied to raw estimates, as a fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Margin {
    pub numerator: u128,
    pub denominator: u128,
}

impl Default for Margin {
    fn default() -> Self {
        Self {
            numerator: 120,
            denominator: 100,
        }
    }
}

impl Margin {
    /// `raw * numerator / denominator`, rounded up. None on overflow.
    pub fn apply(&self, raw: u128) -> Option<u128> {
        if self.denominator == 0 {
            return None;
        }
        raw.checked_mul(self.numerator)?
            .checked_add(self.denominator - 1)
            .map(|scaled| scaled / self.denominator)
    }
}

impl FromStr for Margin {
    type Err = String;

    /// Parses `N/D`, e.g. `120/100`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (numerator, denominator) = s
            .split_once('/')
            .ok_or_else(|| format!("expected N/D, got '{s}'"))?;
        let numerator: u128 = numerator.trim().parse().map_err(|e| format!("{e}"))?;
        let denominator: u128 = denominator.trim().parse().map_err(|e| format!("{e}"))?;
        if denominator == 0 {
            return Err("margin denominator must be non zero".into());
        }
        if numerator < denominator {
            return Err(format!("margin {s} would lower the estimate"));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }
}

impl fmt::Display for Margin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Raw estimate and the limit actually submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostEstimate {
    pub raw: u128,
    pub limit: u128,
}

/// Queries the chain for the cost of an action and bounds it with a margin.
///
/// A failed estimate is final for the action: nothing is sent with an unknown cost.
#[derive(Debug, Clone, Default)]
pub struct ResourceEstimator {
    margin: Margin,
}

impl ResourceEstimator {
    pub fn new(margin: Margin) -> Self {
        Self { margin }
    }

    pub fn margin(&self) -> Margin {
        self.margin
    }

    pub async fn estimate<C: Chain + ?Sized>(
        &self,
        chain: &C,
        tx: &EncodedAction,
    ) -> Result<CostEstimate, EstimationError> {
        let raw = chain
            .estimate_cost(tx)
            .await
            .map_err(EstimationError::Query)?;
        let limit = self
            .margin
            .apply(raw)
            .ok_or(EstimationError::Overflow { raw })?;
        info!("Estimated gas: {raw}, limit with {} margin: {limit}", self.margin);
        Ok(CostEstimate { raw, limit })
    }

    /// Dry-run an invoke to capture its return payload before it is sent
    pub async fn simulate<C: Chain + ?Sized>(
        &self,
        chain: &C,
        tx: &EncodedAction,
    ) -> Result<Bytes, EstimationError> {
        let output = chain.call(tx).await.map_err(EstimationError::Query)?;
        debug!("Simulated call returned {} byte(s)", output.len());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_margin_adds_twenty_percent() {
        assert_eq!(Margin::default().apply(100), Some(120));
        assert_eq!(Margin::default().apply(21_000), Some(25_200));
    }

    #[test]
    fn fractional_results_round_up() {
        // 101 * 1.2 = 121.2
        assert_eq!(Margin::default().apply(101), Some(122));
        assert_eq!(Margin::default().apply(1), Some(2));
        assert_eq!(Margin::default().apply(0), Some(0));
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(Margin::default().apply(u128::MAX), None);
    }

    #[test]
    fn parses_margin() {
        assert_eq!("150/100".parse::<Margin>().unwrap().apply(100), Some(150));
        assert_eq!(" 5 / 4 ".parse::<Margin>().unwrap().to_string(), "5/4");
        assert!("120".parse::<Margin>().is_err());
        assert!("1/0".parse::<Margin>().is_err());
        assert!("90/100".parse::<Margin>().is_err());
    }
}
