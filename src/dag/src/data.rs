//! External collaborators of the DAG core
//!
//! The DAG never owns block bodies. It sees them through [`BlockData`],
//! reloads evicted ones through a [`BlockDataProvider`] and asks a
//! [`WorkCalculator`] for proof-of-work weight.

use crate::hash::Hash;
use dashmap::DashMap;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Proof-of-work family of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowType {
    /// Hash based: `bits` is a compact target
    #[default]
    Blake2bd,
    Keccak256,
    /// Graph based: `bits` is a compact difficulty
    Cuckaroom,
}

/// Header view of an externally owned block body
pub trait BlockData: Send + Sync + fmt::Debug {
    fn hash(&self) -> Hash;
    fn parents(&self) -> &[Hash];
    /// Main parent declared by the block producer
    fn main_parent(&self) -> Option<Hash>;
    fn priority(&self) -> u32;
    /// Unix seconds
    fn timestamp(&self) -> i64;
    /// Compact difficulty bits
    fn difficulty(&self) -> u32;
    fn pow_type(&self) -> PowType;
}

/// Supplies block bodies whose cached copy was evicted
pub trait BlockDataProvider: Send + Sync {
    fn get_block_data(&self, hash: &Hash) -> Option<Arc<dyn BlockData>>;
}

pub trait WorkCalculator: Send + Sync {
    fn calc_work(&self, bits: u32, pow_type: PowType) -> BigUint;
}

/// Plain block header used by the node, tests and benches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBlock {
    pub hash: Hash,
    pub parents: Vec<Hash>,
    pub main_parent: Option<Hash>,
    pub priority: u32,
    pub timestamp: i64,
    pub difficulty: u32,
    pub pow_type: PowType,
}

/// Priority of a freshly produced block; parents at or below 1 count as low
pub const DEFAULT_PRIORITY: u32 = 100;
pub const DEFAULT_DIFFICULTY: u32 = 0x207fffff;

impl CandidateBlock {
    pub fn new(hash: Hash, parents: Vec<Hash>) -> Self {
        CandidateBlock {
            hash,
            parents,
            main_parent: None,
            priority: DEFAULT_PRIORITY,
            timestamp: 0,
            difficulty: DEFAULT_DIFFICULTY,
            pow_type: PowType::default(),
        }
    }

    pub fn genesis(hash: Hash) -> Self {
        Self::new(hash, Vec::new())
    }

    pub fn main_parent(mut self, main_parent: Hash) -> Self {
        self.main_parent = Some(main_parent);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn difficulty(mut self, bits: u32) -> Self {
        self.difficulty = bits;
        self
    }
}

impl BlockData for CandidateBlock {
    fn hash(&self) -> Hash {
        self.hash
    }

    fn parents(&self) -> &[Hash] {
        &self.parents
    }

    fn main_parent(&self) -> Option<Hash> {
        self.main_parent
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn difficulty(&self) -> u32 {
        self.difficulty
    }

    fn pow_type(&self) -> PowType {
        self.pow_type
    }
}

/// In-memory provider backed by a concurrent map
#[derive(Default)]
pub struct MemoryProvider {
    blocks: DashMap<Hash, Arc<dyn BlockData>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, data: Arc<dyn BlockData>) {
        self.blocks.insert(data.hash(), data);
    }

    pub fn remove(&self, hash: &Hash) {
        self.blocks.remove(hash);
    }
}

impl BlockDataProvider for MemoryProvider {
    fn get_block_data(&self, hash: &Hash) -> Option<Arc<dyn BlockData>> {
        self.blocks.get(hash).map(|e| Arc::clone(e.value()))
    }
}

/// Expand compact bits into the full 256-bit number
pub fn compact_to_big(bits: u32) -> BigUint {
    // Negative compact values have no meaning for targets.
    if bits & 0x0080_0000 != 0 {
        return BigUint::zero();
    }
    let mantissa = BigUint::from(bits & 0x007f_ffff);
    let exponent = bits >> 24;
    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        mantissa << (8 * (exponent - 3))
    }
}

/// Inverse of [`compact_to_big`], truncating to three mantissa bytes
pub fn big_to_compact(n: &BigUint) -> u32 {
    if n.is_zero() {
        return 0;
    }
    let bytes = n.to_bytes_be();
    let mut exponent = bytes.len() as u32;
    let mut mantissa = if exponent <= 3 {
        let mut m = 0u32;
        for b in &bytes {
            m = (m << 8) | u32::from(*b);
        }
        m << (8 * (3 - exponent))
    } else {
        (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
    };
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }
    (exponent << 24) | mantissa
}

/// Default work function: `2^256 / (target + 1)` for hash based pow, the
/// expanded difficulty itself for graph based pow.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactWork;

impl WorkCalculator for CompactWork {
    fn calc_work(&self, bits: u32, pow_type: PowType) -> BigUint {
        let value = compact_to_big(bits);
        match pow_type {
            PowType::Cuckaroom => value,
            PowType::Blake2bd | PowType::Keccak256 => {
                if value.is_zero() {
                    return BigUint::zero();
                }
                (BigUint::one() << 256u32) / (value + BigUint::one())
            }
        }
    }
}
