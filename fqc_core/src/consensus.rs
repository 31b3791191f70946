//! Consensus/delta codec.
//!
//! Reads that fall into one similarity cluster are aligned against an
//! evolving majority-vote reference. Each read is then stored as a [`Delta`]:
//! its offset and orientation relative to the reference, the positions where
//! it disagrees (as small noise codes), and literal bases for whatever
//! overhangs the reference on either side.
//!
//! Coordinates: a read is first oriented (reverse-complemented when its
//! strand is [`Strand::Reverse`]); oriented position `p` then sits over
//! consensus position `shift + p`.

use crate::error::{Error, Result};

const BASES: &[u8; 4] = b"ACGT";

/// Noise code for a read `N` over an `A/C/G/T` reference.
pub const NOISE_N: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strand {
    #[default]
    Forward,
    Reverse,
}

impl Strand {
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Forward => 0,
            Self::Reverse => 1,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Forward),
            1 => Ok(Self::Reverse),
            other => Err(Error::format(format!("invalid strand byte {other}"))),
        }
    }
}

#[inline]
fn base_index(b: u8) -> Option<usize> {
    match b {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

#[inline]
fn complement(b: u8) -> u8 {
    match b {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        b'a' => b't',
        b'c' => b'g',
        b'g' => b'c',
        b't' => b'a',
        other => other,
    }
}

pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

/// True when every base is one the delta path can reproduce exactly.
pub fn is_delta_alphabet(seq: &[u8]) -> bool {
    seq.iter().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N'))
}

fn oriented(seq: &[u8], strand: Strand) -> std::borrow::Cow<'_, [u8]> {
    match strand {
        Strand::Forward => std::borrow::Cow::Borrowed(seq),
        Strand::Reverse => std::borrow::Cow::Owned(reverse_complement(seq)),
    }
}

// ── Noise codes ────────────────────────────────────────────────────────────

/// Encodes `read_base` relative to `ref_base`.
///
/// `0` means equal. Over an `A/C/G/T` reference, codes `1..=3` walk the
/// cyclic order `A, C, G, T` starting after the reference base, and
/// [`NOISE_N`] marks a read `N`. Over an `N` reference, `A/C/G/T` map to
/// `1..=4`.
pub fn encode_noise(ref_base: u8, read_base: u8) -> u8 {
    if ref_base == read_base {
        return 0;
    }
    match (base_index(ref_base), base_index(read_base)) {
        (Some(r), Some(q)) => ((q + 4 - r) % 4) as u8,
        (Some(_), None) => NOISE_N,
        (None, Some(q)) => q as u8 + 1,
        (None, None) => 0,
    }
}

/// Inverse of [`encode_noise`]; `None` for codes that cannot occur.
pub fn decode_noise(ref_base: u8, code: u8) -> Option<u8> {
    if code == 0 {
        return Some(ref_base);
    }
    match base_index(ref_base) {
        Some(r) if code < 4 => Some(BASES[(r + code as usize) % 4]),
        Some(_) if code == NOISE_N => Some(b'N'),
        None if (1..=4).contains(&code) => Some(BASES[code as usize - 1]),
        _ => None,
    }
}

// ── Consensus ──────────────────────────────────────────────────────────────

/// Majority-vote reference for one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusSequence {
    sequence: Vec<u8>,
    counts: Vec<[u32; 4]>,
    contributing_reads: u32,
}

impl ConsensusSequence {
    /// Seeds a consensus from the first member of a cluster.
    pub fn init_from_read(seq: &[u8]) -> Self {
        let mut consensus = Self::default();
        consensus.add_read(seq, 0, Strand::Forward);
        consensus.recompute_consensus();
        consensus
    }

    /// Adds `seq` at `shift`/`strand`, growing the column set on either side
    /// as needed.
    ///
    /// Returns how many columns were prepended (non-zero only for negative
    /// shifts). Callers tracking member offsets must add it to every offset
    /// recorded before this call. `sequence()` is stale until
    /// [`recompute_consensus`](Self::recompute_consensus) runs.
    pub fn add_read(&mut self, seq: &[u8], shift: i64, strand: Strand) -> usize {
        let read = oriented(seq, strand);
        let mut start = shift;
        let mut prepended = 0;
        if start < 0 {
            prepended = start.unsigned_abs() as usize;
            let mut grown = vec![[0u32; 4]; prepended + self.counts.len()];
            grown[prepended..].copy_from_slice(&self.counts);
            self.counts = grown;
            start = 0;
        }
        let start = start as usize;
        let end = start + read.len();
        if end > self.counts.len() {
            self.counts.resize(end, [0; 4]);
        }
        for (column, &b) in self.counts[start..end].iter_mut().zip(read.iter()) {
            if let Some(i) = base_index(b) {
                column[i] += 1;
            }
        }
        self.contributing_reads += 1;
        prepended
    }

    /// Rebuilds `sequence` from the counts. Ties go to the earlier base in
    /// `A < C < G < T`; columns with no votes become `N`.
    pub fn recompute_consensus(&mut self) {
        self.sequence.clear();
        self.sequence.extend(self.counts.iter().map(|column| {
            let mut best = 0;
            for i in 1..4 {
                if column[i] > column[best] {
                    best = i;
                }
            }
            if column[best] == 0 {
                b'N'
            } else {
                BASES[best]
            }
        }));
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn base_counts(&self) -> &[[u32; 4]] {
        &self.counts
    }

    pub fn contributing_reads(&self) -> u32 {
        self.contributing_reads
    }

    /// Column count, which may run ahead of `sequence()` until recompute.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Stable handle into a [`ClusterArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(pub u32);

/// Owns the consensus of every cluster opened while encoding one block.
///
/// Members refer to clusters by [`ClusterId`], never by reference, so the
/// arena can be reset wholesale between blocks.
#[derive(Debug, Default)]
pub struct ClusterArena {
    clusters: Vec<ConsensusSequence>,
}

impl ClusterArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, seed: &[u8]) -> ClusterId {
        self.clusters.push(ConsensusSequence::init_from_read(seed));
        ClusterId(self.clusters.len() as u32 - 1)
    }

    pub fn get(&self, id: ClusterId) -> &ConsensusSequence {
        &self.clusters[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ClusterId) -> &mut ConsensusSequence {
        &mut self.clusters[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn clear(&mut self) {
        self.clusters.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClusterId, &ConsensusSequence)> {
        self.clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (ClusterId(i as u32), c))
    }
}

// ── Delta ──────────────────────────────────────────────────────────────────

/// Edit-list representation of one read against a consensus.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delta {
    pub shift: i64,
    pub strand: Strand,
    /// Read length in bases.
    pub length: usize,
    /// `(window position, noise code)` for every differing base, ascending.
    pub mismatches: Vec<(u32, u8)>,
    /// Oriented bases before consensus position 0.
    pub head: Vec<u8>,
    /// Oriented bases past the end of the consensus.
    pub tail: Vec<u8>,
}

/// How an oriented read of `length` bases at `shift` splits into a literal
/// head, a window over the consensus, and a literal tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub head_len: usize,
    /// First consensus position covered by the window.
    pub start: usize,
    pub window_len: usize,
    pub tail_len: usize,
}

impl WindowGeometry {
    pub fn new(shift: i64, length: usize, consensus_len: usize) -> Self {
        let head_len = if shift < 0 {
            (shift.unsigned_abs() as usize).min(length)
        } else {
            0
        };
        let start = shift.max(0) as usize;
        let window_len = (length - head_len).min(consensus_len.saturating_sub(start));
        Self {
            head_len,
            start,
            window_len,
            tail_len: length - head_len - window_len,
        }
    }
}

/// Describes `read` against `consensus` at `shift`/`strand`.
///
/// `read` should use the `ACGTN` alphabet; any other byte in the window is
/// recorded as `N`.
pub fn compute_delta(read: &[u8], consensus: &[u8], shift: i64, strand: Strand) -> Delta {
    let read = oriented(read, strand);
    let geo = WindowGeometry::new(shift, read.len(), consensus.len());
    let window = &read[geo.head_len..geo.head_len + geo.window_len];
    let reference = consensus.get(geo.start..geo.start + geo.window_len).unwrap_or_default();
    let mismatches = window
        .iter()
        .zip(reference)
        .enumerate()
        .filter(|(_, (r, c))| r != c)
        .map(|(p, (&r, &c))| (p as u32, encode_noise(c, r)))
        .collect();
    Delta {
        shift,
        strand,
        length: read.len(),
        mismatches,
        head: read[..geo.head_len].to_vec(),
        tail: read[geo.head_len + geo.window_len..].to_vec(),
    }
}

/// Rebuilds the read described by `delta`.
pub fn reconstruct_from_delta(delta: &Delta, consensus: &[u8]) -> Result<Vec<u8>> {
    let geo = WindowGeometry::new(delta.shift, delta.length, consensus.len());
    if delta.head.len() != geo.head_len || delta.tail.len() != geo.tail_len {
        return Err(Error::format(format!(
            "delta literals ({} head, {} tail) do not fit a {}-base read at shift {}",
            delta.head.len(),
            delta.tail.len(),
            delta.length,
            delta.shift
        )));
    }
    let mut read = Vec::with_capacity(delta.length);
    read.extend_from_slice(&delta.head);
    read.extend_from_slice(consensus.get(geo.start..geo.start + geo.window_len).unwrap_or_default());
    for &(pos, code) in &delta.mismatches {
        let pos = pos as usize;
        if pos >= geo.window_len {
            return Err(Error::format(format!(
                "mismatch position {pos} outside {}-base window",
                geo.window_len
            )));
        }
        let at = geo.head_len + pos;
        read[at] = decode_noise(read[at], code)
            .ok_or_else(|| Error::format(format!("invalid noise code {code} at position {pos}")))?;
    }
    read.extend_from_slice(&delta.tail);
    Ok(match delta.strand {
        Strand::Forward => read,
        Strand::Reverse => reverse_complement(&read),
    })
}

// ── Alignment search ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct AlignConfig {
    /// Shifts are searched within this distance of the caller's anchor.
    pub max_shift: i64,
    pub max_mismatches: usize,
    /// Minimum bases that must overlap the consensus.
    pub min_overlap: usize,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            max_shift: 32,
            max_mismatches: 4,
            min_overlap: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    pub shift: i64,
    pub strand: Strand,
    pub mismatches: usize,
}

/// Finds the cheapest placement of `read` on `consensus` within
/// `anchor ± max_shift` on either strand.
///
/// Cost is two per mismatch plus one per overhanging base. At least half the
/// read (and `min_overlap` bases) must overlap. Ties keep the forward strand
/// and the lower shift.
pub fn find_best_alignment(
    read: &[u8],
    consensus: &[u8],
    anchor: i64,
    cfg: &AlignConfig,
) -> Option<Alignment> {
    if read.is_empty() || consensus.is_empty() {
        return None;
    }
    let min_overlap = cfg.min_overlap.max(read.len() / 2).min(read.len());
    let mut best: Option<(usize, Alignment)> = None;

    for strand in [Strand::Forward, Strand::Reverse] {
        let oriented = oriented(read, strand);
        for shift in anchor - cfg.max_shift..=anchor + cfg.max_shift {
            let geo = WindowGeometry::new(shift, oriented.len(), consensus.len());
            if geo.window_len < min_overlap {
                continue;
            }
            let window = &oriented[geo.head_len..geo.head_len + geo.window_len];
            let reference = &consensus[geo.start..geo.start + geo.window_len];
            let mut mismatches = 0;
            for (r, c) in window.iter().zip(reference) {
                if r != c {
                    mismatches += 1;
                    if mismatches > cfg.max_mismatches {
                        break;
                    }
                }
            }
            if mismatches > cfg.max_mismatches {
                continue;
            }
            let cost = 2 * mismatches + geo.head_len + geo.tail_len;
            if best.map_or(true, |(c, _)| cost < c) {
                best = Some((cost, Alignment { shift, strand, mismatches }));
                if cost == 0 {
                    return best.map(|(_, a)| a);
                }
            }
        }
    }
    best.map(|(_, a)| a)
}
