//! DAG block node
//!
//! A `Block` carries identity, adjacency (as id sets) and the
//! consensus-derived fields. The block body lives outside the arena and is
//! reached through the payload cache.

use crate::error::Result;
use crate::hash::{BlockId, Hash, MAX_ID};
use crate::idset::IdSet;
use crate::storage::codec::{ByteReader, ByteWriter};

/// Block status bit flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockStatus(u8);

impl BlockStatus {
    pub const VALID: BlockStatus = BlockStatus(0);
    pub const INVALID: BlockStatus = BlockStatus(1);

    pub fn from_bits(bits: u8) -> Self {
        BlockStatus(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 & Self::INVALID.0 == 0
    }

    pub fn set(&mut self, flag: BlockStatus) {
        self.0 |= flag.0;
    }

    pub fn clear(&mut self, flag: BlockStatus) {
        self.0 &= !flag.0;
    }
}

/// PHANTOM bookkeeping carried by every block under the PHANTOM strategy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhantomExt {
    /// Blue blocks in this block's past
    pub blue_num: u32,

    /// Blue members of the diff anticone, tagged with discovery index
    pub blue_diff_anticone: IdSet<u32>,

    /// Red members of the diff anticone, tagged with discovery index
    pub red_diff_anticone: IdSet<u32>,
}

impl PhantomExt {
    pub fn diff_anticone_len(&self) -> usize {
        self.blue_diff_anticone.len() + self.red_diff_anticone.len()
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.u32(self.blue_num);
        for set in [&self.blue_diff_anticone, &self.red_diff_anticone] {
            w.u32(set.len() as u32);
            for (id, order) in set.iter() {
                w.u32(id).u32(*order);
            }
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let blue_num = r.u32()?;
        let mut sets = [IdSet::new(), IdSet::new()];
        for set in sets.iter_mut() {
            let n = r.len_prefix(8)?;
            for _ in 0..n {
                let id = r.u32()?;
                let order = r.u32()?;
                set.add_pair(id, order);
            }
        }
        let [blue_diff_anticone, red_diff_anticone] = sets;
        Ok(PhantomExt { blue_num, blue_diff_anticone, red_diff_anticone })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub hash: Hash,
    pub parents: IdSet,
    pub children: IdSet,
    /// `MAX_ID` when the block has no main parent (genesis)
    pub main_parent: BlockId,
    pub weight: u64,
    /// Position in the total order, `MAX_ID` while unordered
    pub order: u32,
    pub layer: u32,
    pub height: u32,
    pub status: BlockStatus,
    pub phantom: Option<PhantomExt>,
}

impl Block {
    pub fn new(id: BlockId, hash: Hash) -> Self {
        Block {
            id,
            hash,
            parents: IdSet::new(),
            children: IdSet::new(),
            main_parent: MAX_ID,
            weight: 0,
            order: MAX_ID,
            layer: 0,
            height: 0,
            status: BlockStatus::VALID,
            phantom: None,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn main_parent(&self) -> Option<BlockId> {
        (self.main_parent != MAX_ID).then_some(self.main_parent)
    }

    pub fn is_ordered(&self) -> bool {
        self.order != MAX_ID
    }

    /// Serialize to the fixed storage layout
    pub fn encode(&self) -> Vec<u8> {
        let extra = self.phantom.as_ref().map_or(0, |p| 12 + 8 * p.diff_anticone_len());
        let mut w = ByteWriter::with_capacity(
            69 + 4 * (self.parents.len() + self.children.len()) + extra,
        );
        w.u32(self.id).hash(&self.hash);
        for set in [&self.parents, &self.children] {
            w.u32(set.len() as u32);
            for id in set.ids() {
                w.u32(id);
            }
        }
        w.u32(self.main_parent)
            .u64(self.weight)
            .u32(self.order)
            .u32(self.layer)
            .u32(self.height)
            .u8(self.status.bits());
        if let Some(ext) = &self.phantom {
            ext.encode(&mut w);
        }
        w.into_inner()
    }

    /// Parse a record; `phantom` selects the PHANTOM flavored layout
    pub fn decode(bytes: &[u8], phantom: bool) -> Result<Self> {
        let mut r = ByteReader::new(bytes, "block");
        let id = r.u32()?;
        let hash = r.hash()?;
        let mut adjacency = [IdSet::new(), IdSet::new()];
        for set in adjacency.iter_mut() {
            let n = r.len_prefix(4)?;
            for _ in 0..n {
                set.add(r.u32()?);
            }
        }
        let [parents, children] = adjacency;
        let mut block = Block {
            id,
            hash,
            parents,
            children,
            main_parent: r.u32()?,
            weight: r.u64()?,
            order: r.u32()?,
            layer: r.u32()?,
            height: r.u32()?,
            status: BlockStatus::from_bits(r.u8()?),
            phantom: None,
        };
        if phantom {
            block.phantom = Some(PhantomExt::decode(&mut r)?);
        }
        r.finish()?;
        Ok(block)
    }
}
