//! Rebalancer
//!
//! Assigns every item of a universe to a capacity-bounded container while
//! keeping container membership stable between runs. Each container maps to
//! one externally visible share, so churn is what we minimize.
//!
//! Two strategies sit behind the [`Rebalance`] trait:
//!
//! - [`LinearScan`] - Keeps previous placements, fills gaps first-fit
//! - [`BitTree`] - Places by hash prefix, ignores the previous grouping

mod bit_tree;
mod linear;

pub use bit_tree::{bit_path, item_hash, BitTree};
pub use linear::LinearScan;

use crate::error::RebalanceError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Container id -> members (sorted)
pub type Grouping = BTreeMap<u64, Vec<String>>;

/// A grouping strategy
pub trait Rebalance: Send + Sync {
    /// Compute a new grouping of `universe`.
    ///
    /// `previous` is a hint: members no longer in `universe` are dropped and
    /// unknown container ids are kept.
    fn rebalance(
        &self,
        previous: &Grouping,
        universe: &BTreeSet<String>,
        capacity: usize,
    ) -> Result<Grouping, RebalanceError>;
}

/// Selectable rebalancing strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    Linear,
    BitTree,
}

impl Strategy {
    pub fn rebalancer(self) -> Box<dyn Rebalance> {
        match self {
            Strategy::Linear => Box::new(LinearScan),
            Strategy::BitTree => Box::new(BitTree),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Linear => write!(f, "linear"),
            Strategy::BitTree => write!(f, "bit-tree"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Strategy::Linear),
            "bit-tree" | "bittree" | "tree" => Ok(Strategy::BitTree),
            other => Err(format!(
                "unknown strategy '{}' (expected linear or bit-tree)",
                other
            )),
        }
    }
}

/// Number of placed items across all containers
pub fn placed(grouping: &Grouping) -> usize {
    grouping.values().map(Vec::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!("linear".parse::<Strategy>(), Ok(Strategy::Linear));
        assert_eq!("Bit-Tree".parse::<Strategy>(), Ok(Strategy::BitTree));
        assert!("random".parse::<Strategy>().is_err());
        assert_eq!(Strategy::BitTree.to_string(), "bit-tree");
        assert_eq!(Strategy::default(), Strategy::Linear);
    }

    #[test]
    fn test_strategy_serde_kebab_case() {
        let s: Strategy = serde_json::from_str("\"bit-tree\"").unwrap();
        assert_eq!(s, Strategy::BitTree);
    }

    #[test]
    fn test_both_strategies_reject_zero_capacity() {
        let universe: BTreeSet<String> = ["a".to_string()].into();
        for strategy in [Strategy::Linear, Strategy::BitTree] {
            assert_eq!(
                strategy
                    .rebalancer()
                    .rebalance(&Grouping::new(), &universe, 0),
                Err(RebalanceError::ZeroCapacity)
            );
        }
    }
}
