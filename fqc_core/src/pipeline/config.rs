use crate::consensus::AlignConfig;
use crate::error::{Error, Result};
use crate::memory::{DEFAULT_MEMORY_LIMIT_MB, MIN_MEMORY_LIMIT_MB};
use crate::types::{
    IdMode, QualityMode, ReadLengthClass, DEFAULT_COMPRESSION_LEVEL, DEFAULT_MAX_BLOCK_BASES,
    DEFAULT_PLACEHOLDER_QUALITY, MAX_BLOCK_SIZE, MAX_COMPRESSION_LEVEL, MIN_BLOCK_SIZE,
    MIN_COMPRESSION_LEVEL,
};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;
pub const MAX_THREADS: usize = 32;
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

fn resolve_threads(threads: usize) -> usize {
    if threads == 0 {
        num_cpus::get().clamp(1, MAX_THREADS)
    } else {
        threads.min(MAX_THREADS)
    }
}

#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Worker threads; 0 picks the number of CPUs.
    pub threads: usize,
    /// Chunks and blocks alive between reader and writer.
    pub max_in_flight: usize,
    pub memory_limit_mb: u64,
    /// Reads per block; 0 uses the read-length class default.
    pub block_size: usize,
    /// Caps the bases held by one block of medium or long reads.
    pub max_block_bases: usize,
    /// `None` detects the class from the input.
    pub read_length_class: Option<ReadLengthClass>,
    pub quality_mode: QualityMode,
    pub id_mode: IdMode,
    /// Entropy level, 1 (fast) to 9 (small).
    pub level: u8,
    pub enable_reorder: bool,
    pub save_reorder_map: bool,
    /// Single pass over the input, no analysis and no reordering.
    pub streaming: bool,
    /// Upper bound on reads per analysis chunk, below what the memory budget
    /// allows; 0 leaves it to the budget.
    pub analysis_chunk_reads: u64,
    pub align: AlignConfig,
    pub progress_interval_ms: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            block_size: 0,
            max_block_bases: DEFAULT_MAX_BLOCK_BASES,
            read_length_class: None,
            quality_mode: QualityMode::Lossless,
            id_mode: IdMode::Exact,
            level: DEFAULT_COMPRESSION_LEVEL,
            enable_reorder: true,
            save_reorder_map: true,
            streaming: false,
            analysis_chunk_reads: 0,
            align: AlignConfig::default(),
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size != 0 && !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(Error::argument(format!(
                "block size must be in [{MIN_BLOCK_SIZE}, {MAX_BLOCK_SIZE}], got {}",
                self.block_size
            )));
        }
        if !(MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&self.level) {
            return Err(Error::argument(format!(
                "compression level must be in [{MIN_COMPRESSION_LEVEL}, {MAX_COMPRESSION_LEVEL}], got {}",
                self.level
            )));
        }
        if self.max_in_flight == 0 {
            return Err(Error::argument("max in-flight blocks must be positive"));
        }
        if self.memory_limit_mb < MIN_MEMORY_LIMIT_MB {
            return Err(Error::argument(format!(
                "memory limit must be at least {MIN_MEMORY_LIMIT_MB} MB, got {}",
                self.memory_limit_mb
            )));
        }
        if self.max_block_bases == 0 {
            return Err(Error::argument("max block bases must be positive"));
        }
        Ok(())
    }

    pub fn effective_threads(&self) -> usize {
        resolve_threads(self.threads)
    }

    pub fn effective_block_size(&self, class: ReadLengthClass) -> usize {
        if self.block_size == 0 {
            class.default_block_size()
        } else {
            self.block_size
        }
    }

    /// Reordering needs a full pass over the input and only pays off for
    /// short reads.
    pub fn reorder_enabled(&self, class: ReadLengthClass) -> bool {
        self.enable_reorder && !self.streaming && class == ReadLengthClass::Short
    }
}

#[derive(Debug, Clone)]
pub struct DecompressionConfig {
    pub threads: usize,
    pub max_in_flight: usize,
    /// 1-based inclusive archive read range.
    pub range: Option<(u64, u64)>,
    /// Emit reads in their pre-reordering order.
    pub original_order: bool,
    pub verify_checksums: bool,
    /// Replace undecodable blocks with nothing instead of failing.
    pub skip_corrupted: bool,
    pub placeholder_quality: u8,
    /// Prefix for generated ids when the archive discarded them.
    pub id_prefix: String,
    /// Write only the `@id` line of each read.
    pub header_only: bool,
    pub progress_interval_ms: u64,
}

impl Default for DecompressionConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            range: None,
            original_order: false,
            verify_checksums: true,
            skip_corrupted: false,
            placeholder_quality: DEFAULT_PLACEHOLDER_QUALITY,
            id_prefix: String::new(),
            header_only: false,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl DecompressionConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some((start, end)) = self.range {
            if start == 0 || start > end {
                return Err(Error::argument(format!(
                    "read range {start}:{end} must satisfy 1 <= start <= end"
                )));
            }
            if self.original_order {
                return Err(Error::argument(
                    "read ranges address archive order and cannot be combined with original order",
                ));
            }
        }
        if self.max_in_flight == 0 {
            return Err(Error::argument("max in-flight blocks must be positive"));
        }
        if !self.placeholder_quality.is_ascii_graphic() {
            return Err(Error::argument(format!(
                "placeholder quality {:#04x} is not a printable character",
                self.placeholder_quality
            )));
        }
        Ok(())
    }

    pub fn effective_threads(&self) -> usize {
        resolve_threads(self.threads)
    }

    /// 0-based, end-exclusive form of `range`.
    pub fn read_range(&self) -> Option<std::ops::Range<u64>> {
        self.range.map(|(start, end)| start - 1..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_validation() {
        assert!(CompressionConfig::default().validate().is_ok());
        let bad_block = CompressionConfig {
            block_size: 50,
            ..Default::default()
        };
        assert!(bad_block.validate().is_err());
        let bad_level = CompressionConfig {
            level: 10,
            ..Default::default()
        };
        assert!(bad_level.validate().is_err());
        let cfg = CompressionConfig::default();
        assert_eq!(cfg.effective_block_size(ReadLengthClass::Medium), 50_000);
        assert!(cfg.effective_threads() >= 1);
        assert!(!cfg.reorder_enabled(ReadLengthClass::Long));
    }

    #[test]
    fn test_range_and_original_order_exclusive() {
        let cfg = DecompressionConfig {
            range: Some((1, 10)),
            original_order: true,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = DecompressionConfig {
            range: Some((5, 4)),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = DecompressionConfig {
            range: Some((2, 4)),
            ..Default::default()
        };
        assert_eq!(cfg.read_range(), Some(1..4));
    }
}
