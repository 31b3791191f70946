//! Phase 1: similarity-driven global reordering.
//!
//! The analyzer looks at every read of a chunk once and decides an archive
//! order that places similar reads next to each other, so the per-block
//! consensus/delta codec in phase 2 sees long runs of near-identical reads.
//! The similarity metric is a [`SimilarityStrategy`]; [`MinimizerStrategy`]
//! is the default.

use std::ops::Range;

use tracing::debug;

use crate::error::{Error, Result};
use crate::reorder_map::ReorderMapData;
use crate::types::ReadId;

pub const DEFAULT_MINIMIZER_K: usize = 23;
pub const DEFAULT_MINIMIZER_W: usize = 12;
pub const DEFAULT_MAX_SEARCH: usize = 1000;

/// Result of one analyzer pass over a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssignmentPlan {
    /// `archive_order[archive] = original` (chunk-local ids).
    pub archive_order: Vec<ReadId>,
    /// Ascending archive positions where a new cluster begins. Empty means
    /// the plan carries no cluster information and the block codec decides
    /// on its own.
    pub cluster_boundaries: Vec<u64>,
}

impl AssignmentPlan {
    pub fn identity(n: usize) -> Self {
        Self {
            archive_order: (0..n as ReadId).collect(),
            cluster_boundaries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.archive_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive_order.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.archive_order
            .iter()
            .enumerate()
            .all(|(i, &o)| o == i as ReadId)
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_boundaries.len()
    }

    /// Forward/reverse map for this plan.
    pub fn reorder_map(&self) -> Result<ReorderMapData> {
        ReorderMapData::from_archive_order(self.archive_order.clone())
    }

    /// Archive-position ranges of consecutive blocks of `reads_per_block`.
    pub fn block_boundaries(&self, reads_per_block: usize) -> Vec<Range<u64>> {
        let n = self.len() as u64;
        let step = reads_per_block.max(1) as u64;
        (0..n)
            .step_by(step as usize)
            .map(|start| start..(start + step).min(n))
            .collect()
    }

    /// Cluster starts inside `range`, relative to `range.start`.
    pub fn boundaries_within(&self, range: Range<u64>) -> Vec<usize> {
        let lo = self.cluster_boundaries.partition_point(|&b| b < range.start);
        self.cluster_boundaries[lo..]
            .iter()
            .take_while(|&&b| b < range.end)
            .map(|&b| (b - range.start) as usize)
            .collect()
    }
}

/// Pluggable similarity metric behind the analyzer.
pub trait SimilarityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Orders `reads` (chunk-local). Must be deterministic and must return a
    /// permutation of `0..reads.len()`.
    fn order(&self, reads: &[&[u8]]) -> AssignmentPlan;
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// When false the analyzer is a pass-through returning the identity.
    pub enable_reorder: bool,
    pub minimizer_k: usize,
    pub minimizer_w: usize,
    /// Bucket entries inspected per minimizer when chaining.
    pub max_search: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enable_reorder: true,
            minimizer_k: DEFAULT_MINIMIZER_K,
            minimizer_w: DEFAULT_MINIMIZER_W,
            max_search: DEFAULT_MAX_SEARCH,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=31).contains(&self.minimizer_k) {
            return Err(Error::argument(format!(
                "minimizer k must be in [1, 31], got {}",
                self.minimizer_k
            )));
        }
        if self.minimizer_w == 0 {
            return Err(Error::argument("minimizer window must be > 0"));
        }
        if self.max_search == 0 {
            return Err(Error::argument("max search must be > 0"));
        }
        Ok(())
    }
}

pub struct GlobalAnalyzer {
    config: AnalyzerConfig,
    strategy: Box<dyn SimilarityStrategy>,
}

impl GlobalAnalyzer {
    /// Analyzer using [`MinimizerStrategy`] built from `config`.
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;
        let strategy = MinimizerStrategy {
            k: config.minimizer_k,
            w: config.minimizer_w,
            max_search: config.max_search,
        };
        Ok(Self {
            config,
            strategy: Box::new(strategy),
        })
    }

    pub fn with_strategy(config: AnalyzerConfig, strategy: Box<dyn SimilarityStrategy>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, strategy })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn analyze(&self, reads: &[&[u8]]) -> Result<AssignmentPlan> {
        if !self.config.enable_reorder || reads.len() < 2 {
            return Ok(AssignmentPlan::identity(reads.len()));
        }
        let plan = self.strategy.order(reads);
        if plan.len() != reads.len() {
            return Err(Error::Internal(format!(
                "{} strategy ordered {} of {} reads",
                self.strategy.name(),
                plan.len(),
                reads.len()
            )));
        }
        debug!(
            strategy = self.strategy.name(),
            reads = reads.len(),
            clusters = plan.cluster_count(),
            "analyzed chunk"
        );
        Ok(plan)
    }
}

// ── Minimizer strategy ─────────────────────────────────────────────────────

/// Greedy chaining over shared canonical `(k, w)` minimizers.
///
/// Starting from the first read, the next read is the unused read sharing a
/// minimizer with the current one whose length is closest (lowest index on
/// ties). When no candidate remains a new cluster starts at the first unused
/// read in input order.
#[derive(Debug, Clone)]
pub struct MinimizerStrategy {
    pub k: usize,
    pub w: usize,
    pub max_search: usize,
}

impl Default for MinimizerStrategy {
    fn default() -> Self {
        Self {
            k: DEFAULT_MINIMIZER_K,
            w: DEFAULT_MINIMIZER_W,
            max_search: DEFAULT_MAX_SEARCH,
        }
    }
}

impl SimilarityStrategy for MinimizerStrategy {
    fn name(&self) -> &'static str {
        "minimizer"
    }

    fn order(&self, reads: &[&[u8]]) -> AssignmentPlan {
        let n = reads.len();
        if n == 0 {
            return AssignmentPlan::default();
        }
        let minimizers: Vec<Vec<u64>> = reads
            .iter()
            .map(|r| read_minimizers(r, self.k, self.w))
            .collect();

        let mut buckets: Vec<(u64, u32)> = minimizers
            .iter()
            .enumerate()
            .flat_map(|(i, ms)| ms.iter().map(move |&m| (m, i as u32)))
            .collect();
        buckets.sort_unstable();

        let mut used = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut boundaries = vec![0u64];
        let mut next_unused = 0usize;
        let mut current = 0usize;
        used[0] = true;
        order.push(0 as ReadId);

        while order.len() < n {
            let cur_len = reads[current].len();
            let mut best: Option<(usize, usize)> = None;
            for &m in &minimizers[current] {
                let lo = buckets.partition_point(|e| e.0 < m);
                for &(_, idx) in buckets[lo..]
                    .iter()
                    .take_while(|e| e.0 == m)
                    .take(self.max_search)
                {
                    let idx = idx as usize;
                    if used[idx] {
                        continue;
                    }
                    let candidate = (reads[idx].len().abs_diff(cur_len), idx);
                    if best.map_or(true, |b| candidate < b) {
                        best = Some(candidate);
                    }
                }
            }
            current = match best {
                Some((_, idx)) => idx,
                None => {
                    while used[next_unused] {
                        next_unused += 1;
                    }
                    boundaries.push(order.len() as u64);
                    next_unused
                }
            };
            used[current] = true;
            order.push(current as ReadId);
        }

        AssignmentPlan {
            archive_order: order,
            cluster_boundaries: boundaries,
        }
    }
}

#[inline]
fn base_code(b: u8) -> Option<u64> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

#[inline]
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Sorted, distinct canonical minimizer hashes of `seq`. k-mers spanning a
/// non-ACGT base are skipped.
pub fn read_minimizers(seq: &[u8], k: usize, w: usize) -> Vec<u64> {
    if k == 0 || seq.len() < k {
        return Vec::new();
    }
    let mask = if k == 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
    let rc_shift = 2 * (k as u64 - 1);
    let mut fwd = 0u64;
    let mut rev = 0u64;
    let mut valid = 0usize;
    let mut kmers: Vec<u64> = Vec::with_capacity(seq.len());

    for &b in seq {
        match base_code(b) {
            Some(c) => {
                fwd = ((fwd << 2) | c) & mask;
                rev = (rev >> 2) | ((3 - c) << rc_shift);
                valid += 1;
                if valid >= k {
                    kmers.push(mix64(fwd.min(rev)));
                }
            }
            None => {
                valid = 0;
                fwd = 0;
                rev = 0;
            }
        }
    }

    let mut out: Vec<u64> = Vec::new();
    if kmers.is_empty() {
        return out;
    }
    let window = w.min(kmers.len());
    for win in kmers.windows(window) {
        let m = win.iter().copied().min().unwrap_or(u64::MAX);
        if out.last() != Some(&m) {
            out.push(m);
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}
