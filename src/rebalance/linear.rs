//! First-fit rebalancing that preserves previous placements

use super::{Grouping, Rebalance};
use crate::error::RebalanceError;
use std::collections::BTreeSet;

/// Linear-scan strategy.
///
/// Previous containers keep their ids (even when they end up empty) and as
/// many of their surviving members as fit. Remaining items go to the first
/// container with room, in id order; when every container is full the
/// smallest unused id is allocated.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScan;

impl Rebalance for LinearScan {
    fn rebalance(
        &self,
        previous: &Grouping,
        universe: &BTreeSet<String>,
        capacity: usize,
    ) -> Result<Grouping, RebalanceError> {
        if capacity == 0 {
            return Err(RebalanceError::ZeroCapacity);
        }

        let mut remaining = universe.clone();
        let mut grouping = Grouping::new();

        for (&id, members) in previous {
            let mut sorted: Vec<&String> = members.iter().collect();
            sorted.sort();

            let mut kept = Vec::new();
            for item in sorted {
                if kept.len() >= capacity {
                    break;
                }
                if remaining.remove(item) {
                    kept.push(item.clone());
                }
            }
            grouping.insert(id, kept);
        }

        for item in remaining {
            let slot = grouping
                .iter_mut()
                .find(|(_, members)| members.len() < capacity)
                .map(|(_, members)| members);

            match slot {
                Some(members) => members.push(item),
                None => {
                    let id = smallest_unused(&grouping);
                    grouping.insert(id, vec![item]);
                }
            }
        }

        for members in grouping.values_mut() {
            members.sort();
        }
        Ok(grouping)
    }
}

fn smallest_unused(grouping: &Grouping) -> u64 {
    (0..)
        .find(|id| !grouping.contains_key(id))
        .unwrap_or(grouping.len() as u64)
}
