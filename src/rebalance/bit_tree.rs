//! Hash-prefix rebalancing
//!
//! Each item's place is a path in a binary tree read from the high bits of a
//! SHA-256 digest of its name. A bucket holding more than `capacity` items is
//! split on the next bit. Adding or removing an item only disturbs the
//! buckets along its own path.

use super::{Grouping, Rebalance};
use crate::error::RebalanceError;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Deepest node that can still be split without overflowing a heap index
const MAX_DEPTH: u32 = 63;

/// Balanced-bit-tree strategy.
///
/// Container ids are heap indices: the root is 1 and the children of `n`
/// are `2n` (bit 0) and `2n + 1` (bit 1). The root is always split once;
/// empty leaves are omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitTree;

/// First 64 bits of SHA-256 over the item, big-endian
pub fn item_hash(item: &str) -> u64 {
    let digest = Sha256::digest(item.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Bit pattern a container id stands for, e.g. `5` -> `"01"`
pub fn bit_path(id: u64) -> String {
    if id <= 1 {
        return String::new();
    }
    let depth = 63 - id.leading_zeros();
    (0..depth)
        .rev()
        .map(|i| if (id >> i) & 1 == 1 { '1' } else { '0' })
        .collect()
}

fn bit_at(hash: u64, depth: u32) -> u64 {
    (hash >> (63 - depth)) & 1
}

impl Rebalance for BitTree {
    fn rebalance(
        &self,
        _previous: &Grouping,
        universe: &BTreeSet<String>,
        capacity: usize,
    ) -> Result<Grouping, RebalanceError> {
        if capacity == 0 {
            return Err(RebalanceError::ZeroCapacity);
        }

        let hashed: Vec<(u64, &String)> = universe.iter().map(|i| (item_hash(i), i)).collect();
        let mut grouping = Grouping::new();
        split(1, 0, hashed, capacity, &mut grouping)?;
        Ok(grouping)
    }
}

fn split(
    id: u64,
    depth: u32,
    members: Vec<(u64, &String)>,
    capacity: usize,
    out: &mut Grouping,
) -> Result<(), RebalanceError> {
    if members.is_empty() {
        return Ok(());
    }

    if depth > 0 && members.len() <= capacity {
        // universe is sorted, so members already are
        out.insert(id, members.into_iter().map(|(_, m)| m.clone()).collect());
        return Ok(());
    }

    if depth >= MAX_DEPTH {
        return Err(RebalanceError::HashExhausted {
            items: members.len(),
        });
    }

    let (zeros, ones): (Vec<_>, Vec<_>) = members
        .into_iter()
        .partition(|(hash, _)| bit_at(*hash, depth) == 0);

    split(id * 2, depth + 1, zeros, capacity, out)?;
    split(id * 2 + 1, depth + 1, ones, capacity, out)
}
