//! Memory budget, estimator, and chunk planner.
//!
//! Phase 1 needs per-read state for a whole chunk at once, so inputs larger
//! than the phase-1 reserve are split into contiguous chunks that are
//! analyzed independently and stitched together through
//! [`ReorderMapData::combine_chunks`](crate::reorder_map::ReorderMapData::combine_chunks).

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

pub const MEMORY_PER_READ_PHASE1: u64 = 24;
pub const MEMORY_PER_READ_PHASE2: u64 = 50;
pub const MEMORY_SAFETY_MARGIN: f64 = 1.1;

pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 8192;
pub const DEFAULT_PHASE1_RESERVE_MB: u64 = 2048;
pub const DEFAULT_BLOCK_BUFFER_MB: u64 = 512;
pub const DEFAULT_WORKER_STACK_MB: u64 = 64;
pub const MIN_MEMORY_LIMIT_MB: u64 = 256;

/// Chunks are never planned smaller than this, however tight the budget.
pub const MIN_CHUNK_READS: u64 = 100_000;

pub const MIN_OPTIMAL_BLOCK_SIZE: usize = 10_000;
pub const MAX_OPTIMAL_BLOCK_SIZE: usize = 500_000;

// ── Budget ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    pub max_total_mb: u64,
    pub phase1_reserve_mb: u64,
    pub block_buffer_mb: u64,
    pub worker_stack_mb: u64,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            max_total_mb: DEFAULT_MEMORY_LIMIT_MB,
            phase1_reserve_mb: DEFAULT_PHASE1_RESERVE_MB,
            block_buffer_mb: DEFAULT_BLOCK_BUFFER_MB,
            worker_stack_mb: DEFAULT_WORKER_STACK_MB,
        }
    }
}

impl MemoryBudget {
    /// Derives a budget from a total limit, clamping it up to
    /// [`MIN_MEMORY_LIMIT_MB`].
    pub fn from_memory_limit(limit_mb: u64) -> Self {
        let total = limit_mb.max(MIN_MEMORY_LIMIT_MB);
        Self {
            max_total_mb: total,
            phase1_reserve_mb: (total / 4).min(DEFAULT_PHASE1_RESERVE_MB),
            block_buffer_mb: (total / 16).min(DEFAULT_BLOCK_BUFFER_MB),
            worker_stack_mb: DEFAULT_WORKER_STACK_MB,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_total_mb < MIN_MEMORY_LIMIT_MB {
            return Err(Error::argument(format!(
                "memory limit must be at least {MIN_MEMORY_LIMIT_MB} MB, got {}",
                self.max_total_mb
            )));
        }
        if self.phase1_reserve_mb >= self.max_total_mb {
            return Err(Error::argument(format!(
                "phase 1 reserve ({} MB) must be less than total limit ({} MB)",
                self.phase1_reserve_mb, self.max_total_mb
            )));
        }
        if self.phase1_reserve_mb + self.block_buffer_mb >= self.max_total_mb {
            return Err(Error::argument(
                "phase 1 reserve plus block buffer exceeds total memory limit",
            ));
        }
        Ok(())
    }

    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_mb * MIB
    }

    pub fn phase1_reserve_bytes(&self) -> u64 {
        self.phase1_reserve_mb * MIB
    }

    pub fn block_buffer_bytes(&self) -> u64 {
        self.block_buffer_mb * MIB
    }

    /// What remains for in-flight phase-2 blocks.
    pub fn phase2_available_bytes(&self) -> u64 {
        self.max_total_mb
            .saturating_sub(self.phase1_reserve_mb)
            .saturating_sub(self.block_buffer_mb)
            .saturating_sub(self.worker_stack_mb)
            * MIB
    }
}

// ── Estimator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryEstimate {
    pub phase1_bytes: u64,
    pub phase2_bytes_per_block: u64,
    pub peak_bytes: u64,
    pub max_reads_phase1: u64,
    pub reads_per_block: usize,
    pub requires_chunking: bool,
    pub recommended_chunks: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryEstimator {
    budget: MemoryBudget,
}

fn with_margin(bytes: u64) -> u64 {
    (bytes as f64 * MEMORY_SAFETY_MARGIN) as u64
}

impl MemoryEstimator {
    pub fn new(budget: MemoryBudget) -> Self {
        Self { budget }
    }

    pub fn estimate_phase1(&self, read_count: u64) -> u64 {
        with_margin(read_count * MEMORY_PER_READ_PHASE1)
    }

    pub fn estimate_phase2(&self, reads_per_block: usize, threads: usize) -> u64 {
        with_margin(reads_per_block as u64 * MEMORY_PER_READ_PHASE2) * threads as u64
    }

    pub fn max_reads_for_phase1(&self) -> u64 {
        let effective = (self.budget.phase1_reserve_bytes() as f64 / MEMORY_SAFETY_MARGIN) as u64;
        effective / MEMORY_PER_READ_PHASE1
    }

    /// Reads per block that keep `threads` concurrent blocks inside the
    /// phase-2 share, clamped to `[10_000, 500_000]`.
    pub fn optimal_block_size(&self, threads: usize) -> usize {
        let per_thread =
            (self.budget.phase2_available_bytes() as f64 / (threads.max(1) as f64 * MEMORY_SAFETY_MARGIN)) as u64;
        ((per_thread / MEMORY_PER_READ_PHASE2) as usize).clamp(MIN_OPTIMAL_BLOCK_SIZE, MAX_OPTIMAL_BLOCK_SIZE)
    }

    pub fn estimate(&self, total_reads: u64, reads_per_block: usize, threads: usize) -> MemoryEstimate {
        let phase1_bytes = self.estimate_phase1(total_reads);
        let phase2_total = self.estimate_phase2(reads_per_block, threads);
        let max_reads_phase1 = self.max_reads_for_phase1();
        let requires_chunking = total_reads > max_reads_phase1;
        let recommended_chunks = if requires_chunking {
            total_reads.div_ceil(max_reads_phase1.max(1)).max(2)
        } else {
            1
        };
        MemoryEstimate {
            phase1_bytes,
            phase2_bytes_per_block: self.estimate_phase2(reads_per_block, 1),
            peak_bytes: with_margin(phase1_bytes.max(phase2_total)) + self.budget.block_buffer_bytes(),
            max_reads_phase1,
            reads_per_block,
            requires_chunking,
            recommended_chunks,
        }
    }
}

// ── Chunk plan ─────────────────────────────────────────────────────────────

/// One contiguous slice `[start_read_index, end_read_index)` of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub chunk_index: usize,
    pub start_read_index: u64,
    pub end_read_index: u64,
    /// Archive id of the chunk's first read: the read count of all prior chunks.
    pub archive_id_offset: u64,
    pub block_id_offset: u32,
    pub estimated_memory: u64,
}

impl ChunkInfo {
    pub fn read_count(&self) -> u64 {
        self.end_read_index - self.start_read_index
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkPlan {
    pub total_reads: u64,
    pub num_chunks: usize,
    pub chunks: Vec<ChunkInfo>,
}

impl ChunkPlan {
    /// Single chunk covering everything.
    pub fn single(total_reads: u64) -> Self {
        Self {
            total_reads,
            num_chunks: 1,
            chunks: vec![ChunkInfo {
                chunk_index: 0,
                start_read_index: 0,
                end_read_index: total_reads,
                archive_id_offset: 0,
                block_id_offset: 0,
                estimated_memory: 0,
            }],
        }
    }

    pub fn requires_chunking(&self) -> bool {
        self.chunks.len() > 1
    }

    /// Index of the chunk holding `read_index`, if any.
    pub fn find_chunk(&self, read_index: u64) -> Option<usize> {
        let i = self
            .chunks
            .partition_point(|c| c.end_read_index <= read_index);
        self.chunks
            .get(i)
            .filter(|c| c.start_read_index <= read_index && read_index < c.end_read_index)
            .map(|_| i)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunks.is_empty() {
            return Err(Error::argument("chunk plan has no chunks"));
        }
        if self.chunks.len() != self.num_chunks {
            return Err(Error::argument(format!(
                "chunk count mismatch: expected {}, got {}",
                self.num_chunks,
                self.chunks.len()
            )));
        }
        let mut expected = 0u64;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.start_read_index != expected {
                return Err(Error::argument(format!(
                    "chunk {i} starts at {} but the previous chunk ended at {expected}",
                    chunk.start_read_index
                )));
            }
            // An empty input is planned as one empty chunk.
            if chunk.end_read_index <= chunk.start_read_index && self.total_reads > 0 {
                return Err(Error::argument(format!("chunk {i} has an empty range")));
            }
            if chunk.archive_id_offset != chunk.start_read_index {
                return Err(Error::argument(format!(
                    "chunk {i} archive offset {} does not match its start {}",
                    chunk.archive_id_offset, chunk.start_read_index
                )));
            }
            expected = chunk.end_read_index;
        }
        if expected != self.total_reads {
            return Err(Error::argument(format!(
                "chunks cover {expected} of {} reads",
                self.total_reads
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    budget: MemoryBudget,
    estimator: MemoryEstimator,
    min_chunk_reads: u64,
    max_chunk_reads: Option<u64>,
}

impl ChunkPlanner {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            budget,
            estimator: MemoryEstimator::new(budget),
            min_chunk_reads: MIN_CHUNK_READS,
            max_chunk_reads: None,
        }
    }

    /// Caps chunk size regardless of the budget (and lifts the
    /// [`MIN_CHUNK_READS`] floor to match).
    pub fn with_max_chunk_reads(mut self, reads: u64) -> Self {
        self.max_chunk_reads = Some(reads.max(1));
        self.min_chunk_reads = self.min_chunk_reads.min(reads.max(1));
        self
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn estimator(&self) -> &MemoryEstimator {
        &self.estimator
    }

    pub fn plan(&self, total_reads: u64, reads_per_block: usize, threads: usize) -> ChunkPlan {
        let reads_per_block = reads_per_block.max(1);
        let mut max_per_chunk = self
            .estimator
            .max_reads_for_phase1()
            .max(self.min_chunk_reads);
        if let Some(cap) = self.max_chunk_reads {
            max_per_chunk = max_per_chunk.min(cap);
        }
        if total_reads <= max_per_chunk {
            let mut plan = ChunkPlan::single(total_reads);
            plan.chunks[0].estimated_memory = self
                .estimator
                .estimate(total_reads, reads_per_block, threads)
                .peak_bytes;
            return plan;
        }

        let num_chunks = total_reads.div_ceil(max_per_chunk);
        let base = total_reads / num_chunks;
        let remainder = total_reads % num_chunks;
        let mut chunks = Vec::with_capacity(num_chunks as usize);
        let mut start = 0u64;
        let mut block_id_offset = 0u32;
        for i in 0..num_chunks {
            let reads = base + u64::from(i < remainder);
            chunks.push(ChunkInfo {
                chunk_index: i as usize,
                start_read_index: start,
                end_read_index: start + reads,
                archive_id_offset: start,
                block_id_offset,
                estimated_memory: self.estimator.estimate(reads, reads_per_block, threads).peak_bytes,
            });
            start += reads;
            block_id_offset += reads.div_ceil(reads_per_block as u64) as u32;
        }
        ChunkPlan {
            total_reads,
            num_chunks: chunks.len(),
            chunks,
        }
    }

    /// Like [`plan`](Self::plan) but shrinks the phase-1 reserve for reads
    /// longer than 150 bases (by up to 3x).
    pub fn plan_with_read_length(
        &self,
        total_reads: u64,
        avg_read_length: usize,
        reads_per_block: usize,
        threads: usize,
    ) -> ChunkPlan {
        let factor = if avg_read_length > 150 {
            (1.0 + (avg_read_length as f64 - 150.0) / 1000.0).min(3.0)
        } else {
            1.0
        };
        let mut budget = self.budget;
        budget.phase1_reserve_mb = (budget.phase1_reserve_mb as f64 / factor) as u64;
        let mut adjusted = ChunkPlanner::new(budget);
        adjusted.min_chunk_reads = self.min_chunk_reads;
        adjusted.max_chunk_reads = self.max_chunk_reads;
        adjusted.plan(total_reads, reads_per_block, threads)
    }
}

// ── Size strings ───────────────────────────────────────────────────────────

/// Parses `"512M"`, `"8G"`, `"2T"`, `"4096"` (megabytes) into megabytes.
pub fn parse_memory_size(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::argument(format!("invalid memory size '{text}'")))?;
    let factor = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "M" | "MB" | "MIB" => 1,
        "G" | "GB" | "GIB" => 1024,
        "T" | "TB" | "TIB" => 1024 * 1024,
        other => return Err(Error::argument(format!("unknown memory unit '{other}' in '{text}'"))),
    };
    value
        .checked_mul(factor)
        .ok_or_else(|| Error::argument(format!("memory size '{text}' overflows")))
}

pub fn format_memory_size(mb: u64) -> String {
    if mb >= 1024 * 1024 && mb % (1024 * 1024) == 0 {
        format!("{}T", mb / (1024 * 1024))
    } else if mb >= 1024 && mb % 1024 == 0 {
        format!("{}G", mb / 1024)
    } else {
        format!("{mb}M")
    }
}
