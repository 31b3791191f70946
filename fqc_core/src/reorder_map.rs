//! Bidirectional permutation between original read order and archive order.
//!
//! # Serialized layout
//! ```text
//! [header_size:u32][version:u32][total_reads:u64][forward_size:u64][reverse_size:u64]
//! [forward map: delta + zigzag varint]
//! [reverse map: delta + zigzag varint]
//! ```
//! The first id of each map is written as a plain varint, every following id
//! as the zigzag varint of its difference to the predecessor. Clustered
//! orderings produce long runs of small deltas, so both maps together
//! typically cost a few bytes per read.

use crate::error::{Error, Result};
use crate::types::ReadId;
use crate::varint::{put_signed, put_varint, ByteCursor, MAX_VARINT_LEN};

pub const REORDER_MAP_HEADER_SIZE: usize = 32;
pub const REORDER_MAP_VERSION: u32 = 1;

/// Validated bijection over `[0, N)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderMapData {
    /// original id -> archive id
    forward: Vec<ReadId>,
    /// archive id -> original id
    reverse: Vec<ReadId>,
}

/// Size breakdown of a serialized map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReorderMapStats {
    pub total_reads: u64,
    pub forward_bytes: usize,
    pub reverse_bytes: usize,
    pub total_bytes: usize,
    pub bytes_per_read: f64,
    /// Versus two plain `u32` arrays.
    pub compression_ratio: f64,
}

impl ReorderMapData {
    /// Builds a map from both directions, rejecting anything that is not an
    /// exact inverse pair.
    pub fn new(forward: Vec<ReadId>, reverse: Vec<ReadId>) -> Result<Self> {
        if !verify_map_consistency(&forward, &reverse) {
            return Err(Error::format(format!(
                "reorder map is not a bijection ({} forward / {} reverse entries)",
                forward.len(),
                reverse.len()
            )));
        }
        Ok(Self { forward, reverse })
    }

    /// Builds a map from the forward direction alone.
    pub fn from_forward(forward: Vec<ReadId>) -> Result<Self> {
        let n = forward.len();
        let mut reverse = vec![ReadId::MAX; n];
        for (original, &archive) in forward.iter().enumerate() {
            let slot = reverse.get_mut(archive as usize).ok_or_else(|| {
                Error::format(format!("archive id {archive} out of range for {n} reads"))
            })?;
            if *slot != ReadId::MAX {
                return Err(Error::format(format!("archive id {archive} assigned twice")));
            }
            *slot = original as ReadId;
        }
        Ok(Self { forward, reverse })
    }

    /// Builds a map from an archive ordering: `order[archive] = original`.
    pub fn from_archive_order(order: Vec<ReadId>) -> Result<Self> {
        let inverse = Self::from_forward(order)?;
        Ok(Self {
            forward: inverse.reverse,
            reverse: inverse.forward,
        })
    }

    pub fn identity(n: usize) -> Self {
        let ids: Vec<ReadId> = (0..n as ReadId).collect();
        Self {
            forward: ids.clone(),
            reverse: ids,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Archive position of `original_id`; out-of-range ids come back unchanged.
    #[inline]
    pub fn archive_id(&self, original_id: ReadId) -> ReadId {
        self.forward
            .get(original_id as usize)
            .copied()
            .unwrap_or(original_id)
    }

    /// Original position of `archive_id`; out-of-range ids come back unchanged.
    #[inline]
    pub fn original_id(&self, archive_id: ReadId) -> ReadId {
        self.reverse
            .get(archive_id as usize)
            .copied()
            .unwrap_or(archive_id)
    }

    pub fn forward_map(&self) -> &[ReadId] {
        &self.forward
    }

    pub fn reverse_map(&self) -> &[ReadId] {
        &self.reverse
    }

    pub fn serialize(&self) -> Vec<u8> {
        let forward = delta_encode(&self.forward);
        let reverse = delta_encode(&self.reverse);
        let mut out = Vec::with_capacity(REORDER_MAP_HEADER_SIZE + forward.len() + reverse.len());
        out.extend_from_slice(&(REORDER_MAP_HEADER_SIZE as u32).to_le_bytes());
        out.extend_from_slice(&REORDER_MAP_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.forward.len() as u64).to_le_bytes());
        out.extend_from_slice(&(forward.len() as u64).to_le_bytes());
        out.extend_from_slice(&(reverse.len() as u64).to_le_bytes());
        out.extend_from_slice(&forward);
        out.extend_from_slice(&reverse);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header = ReorderMapHeader::parse(bytes)?;
        header.validate()?;

        let body = bytes.get(header.header_size as usize..).ok_or_else(|| {
            Error::format(format!(
                "reorder map header claims {} bytes, map holds {}",
                header.header_size,
                bytes.len()
            ))
        })?;
        let needed = header
            .forward_size
            .checked_add(header.reverse_size)
            .ok_or_else(|| Error::format("reorder map stream sizes overflow"))?;
        if (body.len() as u64) < needed {
            return Err(Error::format(format!(
                "reorder map body is {} bytes, header declares {}",
                body.len(),
                needed
            )));
        }
        let (fwd_bytes, rest) = body.split_at(header.forward_size as usize);
        let rev_bytes = &rest[..header.reverse_size as usize];

        let count = header.total_reads as usize;
        let forward = delta_decode(fwd_bytes, count)?;
        let reverse = delta_decode(rev_bytes, count)?;
        Self::new(forward, reverse)
    }

    /// Concatenates per-chunk maps into one file-global map.
    ///
    /// Chunk `i` covers original ids and archive ids starting at the sum of
    /// the preceding `sizes`, so both directions are shifted by that offset.
    pub fn combine_chunks(chunks: &[ReorderMapData], sizes: &[u64]) -> Result<Self> {
        if chunks.len() != sizes.len() {
            return Err(Error::argument(format!(
                "{} chunk maps but {} chunk sizes",
                chunks.len(),
                sizes.len()
            )));
        }
        let total: u64 = sizes.iter().sum();
        let mut forward = Vec::with_capacity(total as usize);
        let mut reverse = Vec::with_capacity(total as usize);
        let mut offset = 0u64;
        for (i, (chunk, &size)) in chunks.iter().zip(sizes).enumerate() {
            if chunk.len() as u64 != size {
                return Err(Error::argument(format!(
                    "chunk {i} map holds {} reads, size says {size}",
                    chunk.len()
                )));
            }
            forward.extend(chunk.forward.iter().map(|&id| id + offset));
            reverse.extend(chunk.reverse.iter().map(|&id| id + offset));
            offset += size;
        }
        Self::new(forward, reverse)
    }

    pub fn stats(&self) -> ReorderMapStats {
        let forward_bytes = delta_encode(&self.forward).len();
        let reverse_bytes = delta_encode(&self.reverse).len();
        let total_bytes = REORDER_MAP_HEADER_SIZE + forward_bytes + reverse_bytes;
        let n = self.forward.len();
        let (bytes_per_read, compression_ratio) = if n == 0 {
            (0.0, 1.0)
        } else {
            (
                total_bytes as f64 / n as f64,
                (n * 8) as f64 / total_bytes as f64,
            )
        };
        ReorderMapStats {
            total_reads: n as u64,
            forward_bytes,
            reverse_bytes,
            total_bytes,
            bytes_per_read,
            compression_ratio,
        }
    }
}

// ── Header ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ReorderMapHeader {
    header_size: u32,
    version: u32,
    total_reads: u64,
    forward_size: u64,
    reverse_size: u64,
}

impl ReorderMapHeader {
    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < REORDER_MAP_HEADER_SIZE {
            return Err(Error::format(format!(
                "reorder map is {} bytes, shorter than its {}-byte header",
                bytes.len(),
                REORDER_MAP_HEADER_SIZE
            )));
        }
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(b)
        };
        Ok(Self {
            header_size: u32_at(0),
            version: u32_at(4),
            total_reads: u64_at(8),
            forward_size: u64_at(16),
            reverse_size: u64_at(24),
        })
    }

    fn validate(&self) -> Result<()> {
        if (self.header_size as usize) < REORDER_MAP_HEADER_SIZE {
            return Err(Error::format(format!(
                "reorder map header size {} below minimum {}",
                self.header_size, REORDER_MAP_HEADER_SIZE
            )));
        }
        if self.version > REORDER_MAP_VERSION {
            return Err(Error::format(format!(
                "unsupported reorder map version {}",
                self.version
            )));
        }
        if self.total_reads > 0 {
            let max = self.total_reads.saturating_mul(MAX_VARINT_LEN as u64);
            for (name, size) in [("forward", self.forward_size), ("reverse", self.reverse_size)] {
                // Every id takes at least one byte.
                if size < self.total_reads || size > max {
                    return Err(Error::format(format!(
                        "{name} map size {size} invalid for {} reads",
                        self.total_reads
                    )));
                }
            }
        }
        Ok(())
    }
}

// ── Encoding helpers ───────────────────────────────────────────────────────

/// `reverse[forward[i]] == i` and `forward[reverse[j]] == j` for every id.
pub fn verify_map_consistency(forward: &[ReadId], reverse: &[ReadId]) -> bool {
    if forward.len() != reverse.len() {
        return false;
    }
    let n = forward.len() as ReadId;
    forward
        .iter()
        .enumerate()
        .all(|(i, &a)| a < n && reverse[a as usize] == i as ReadId)
        && reverse
            .iter()
            .enumerate()
            .all(|(j, &o)| o < n && forward[o as usize] == j as ReadId)
}

pub fn delta_encode(ids: &[ReadId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ids.len() * 2);
    let mut prev: Option<ReadId> = None;
    for &id in ids {
        match prev {
            None => put_varint(&mut out, id),
            Some(p) => put_signed(&mut out, id as i64 - p as i64),
        }
        prev = Some(id);
    }
    out
}

pub fn delta_decode(bytes: &[u8], count: usize) -> Result<Vec<ReadId>> {
    let mut cur = ByteCursor::new(bytes, "reorder map");
    let mut ids = Vec::with_capacity(count.min(bytes.len()));
    let mut prev = 0i64;
    for i in 0..count {
        let value = if i == 0 {
            i64::try_from(cur.varint()?).ok()
        } else {
            prev.checked_add(cur.signed()?)
        };
        let value = match value {
            Some(v) if v >= 0 => v,
            _ => return Err(Error::format(format!("reorder map entry {i} decodes to an invalid id"))),
        };
        ids.push(value as ReadId);
        prev = value;
    }
    if !cur.is_empty() {
        return Err(Error::format(format!(
            "reorder map has {} trailing bytes after {count} ids",
            cur.remaining()
        )));
    }
    Ok(ids)
}
