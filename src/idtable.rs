//! Dense node-id usage tables.
//!
//! One bit per source node id. Two of these back the build: one marks ids
//! referenced by any routable way, the other marks intersection candidates.
//! Bits are only ever set, never cleared, so a frozen table can be read from
//! multiple threads without synchronization.

use bit_vec::BitVec;

use crate::error::BuildError;

/// Largest source node id a default build accepts. Exceeding ids abort the
/// build; bump this and rebuild when the planet outgrows it.
pub const MAX_OSM_NODE_ID: u64 = 4_000_000_000;

pub struct NodeIdTable {
    max_id: u64,
    bits: BitVec,
}

impl NodeIdTable {
    /// Allocate a zeroed table covering ids `0..=max_id`.
    pub fn new(max_id: u64) -> Self {
        Self {
            max_id,
            bits: BitVec::from_elem(max_id as usize + 1, false),
        }
    }

    pub fn set(&mut self, id: u64) -> Result<(), BuildError> {
        if id > self.max_id {
            return Err(BuildError::IdOutOfRange {
                id,
                max: self.max_id,
            });
        }
        self.bits.set(id as usize, true);
        Ok(())
    }

    /// Out-of-range ids read as unused rather than panicking.
    pub fn is_used(&self, id: u64) -> bool {
        id <= self.max_id && self.bits.get(id as usize).unwrap_or(false)
    }

    pub fn max_id(&self) -> u64 {
        self.max_id
    }
}
