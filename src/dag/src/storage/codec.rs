//! Fixed-width record codec helpers
//!
//! Record fields are little-endian; bucket keys are big-endian so that
//! iteration order follows numeric order.

use crate::error::{DagError, Result};
use crate::hash::Hash;

/// Big-endian 4-byte key
pub fn id_key(id: u32) -> [u8; 4] {
    id.to_be_bytes()
}

pub fn decode_id_key(key: &[u8]) -> Result<u32> {
    let arr: [u8; 4] = key
        .try_into()
        .map_err(|_| DagError::Corruption(format!("key of {} bytes, expected 4", key.len())))?;
    Ok(u32::from_be_bytes(arr))
}

pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        ByteWriter { buf: Vec::with_capacity(capacity) }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn hash(&mut self, h: &Hash) -> &mut Self {
        self.buf.extend_from_slice(h.as_bytes());
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        ByteReader { buf, pos: 0, what }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < self.pos + n {
            return Err(DagError::Corruption(format!(
                "{} record truncated at byte {} (len {})",
                self.what,
                self.pos,
                self.buf.len()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(arr))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn hash(&mut self) -> Result<Hash> {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(self.take(Hash::SIZE)?);
        Ok(Hash(arr))
    }

    /// Collection length, bounded by the bytes actually left
    pub fn len_prefix(&mut self, entry_size: usize) -> Result<usize> {
        let n = self.u32()? as usize;
        if n.saturating_mul(entry_size) > self.remaining() {
            return Err(DagError::Corruption(format!(
                "{} record claims {} entries with {} bytes left",
                self.what,
                n,
                self.remaining()
            )));
        }
        Ok(n)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fails if trailing bytes are left over
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(DagError::Corruption(format!(
                "{} record has {} trailing bytes",
                self.what,
                self.remaining()
            )));
        }
        Ok(())
    }
}
