use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Archive-order or original-order read index.
pub type ReadId = u64;
pub type BlockId = u32;

// ── Limits and defaults ────────────────────────────────────────────────────

pub const DEFAULT_COMPRESSION_LEVEL: u8 = 5;
pub const MIN_COMPRESSION_LEVEL: u8 = 1;
pub const MAX_COMPRESSION_LEVEL: u8 = 9;

pub const DEFAULT_BLOCK_SIZE_SHORT: usize = 100_000;
pub const DEFAULT_BLOCK_SIZE_MEDIUM: usize = 50_000;
pub const DEFAULT_BLOCK_SIZE_LONG: usize = 10_000;
pub const MIN_BLOCK_SIZE: usize = 100;
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Long-read blocks are also cut once they hold this many bases.
pub const DEFAULT_MAX_BLOCK_BASES: usize = 200 * 1024 * 1024;

/// Longest read the consensus/delta sequence path accepts.
pub const SHORT_READ_MAX_LENGTH: usize = 511;
pub const MEDIUM_READ_THRESHOLD: usize = 1_024;
pub const LONG_READ_THRESHOLD: usize = 10_240;

pub const DEFAULT_PLACEHOLDER_QUALITY: u8 = b'!';

// ── Read record ────────────────────────────────────────────────────────────

/// One FASTQ record. `id` excludes the leading `@`; `quality` is Phred+33 and
/// empty only when qualities were discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRecord {
    pub id: String,
    pub sequence: Vec<u8>,
    pub quality: Vec<u8>,
}

impl ReadRecord {
    pub fn new(id: impl Into<String>, sequence: impl Into<Vec<u8>>, quality: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            sequence: sequence.into(),
            quality: quality.into(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

// ── Modes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityMode {
    #[default]
    Lossless,
    /// Illumina 8-level binning (lossy).
    Illumina8,
    /// Qualities are dropped and regenerated from a placeholder character.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdMode {
    #[default]
    Exact,
    /// Token-wise delta coding of numeric fields; still lossless.
    Tokenize,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadLengthClass {
    #[default]
    Short,
    Medium,
    Long,
}

impl QualityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lossless => "lossless",
            Self::Illumina8 => "illumina8",
            Self::Discard => "discard",
        }
    }

    pub(crate) fn to_bits(self) -> u32 {
        match self {
            Self::Lossless => 0,
            Self::Illumina8 => 1,
            Self::Discard => 3,
        }
    }

    pub(crate) fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            0 => Ok(Self::Lossless),
            1 => Ok(Self::Illumina8),
            3 => Ok(Self::Discard),
            other => Err(Error::format(format!("unsupported quality mode bits {other}"))),
        }
    }
}

impl IdMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Tokenize => "tokenize",
            Self::Discard => "discard",
        }
    }

    pub(crate) fn to_bits(self) -> u32 {
        match self {
            Self::Exact => 0,
            Self::Tokenize => 1,
            Self::Discard => 2,
        }
    }

    pub(crate) fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            0 => Ok(Self::Exact),
            1 => Ok(Self::Tokenize),
            2 => Ok(Self::Discard),
            other => Err(Error::format(format!("unsupported id mode bits {other}"))),
        }
    }
}

impl ReadLengthClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }

    /// Default reads per block for this class.
    pub fn default_block_size(self) -> usize {
        match self {
            Self::Short => DEFAULT_BLOCK_SIZE_SHORT,
            Self::Medium => DEFAULT_BLOCK_SIZE_MEDIUM,
            Self::Long => DEFAULT_BLOCK_SIZE_LONG,
        }
    }

    pub(crate) fn to_bits(self) -> u32 {
        match self {
            Self::Short => 0,
            Self::Medium => 1,
            Self::Long => 2,
        }
    }

    pub(crate) fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            0 => Ok(Self::Short),
            1 => Ok(Self::Medium),
            2 => Ok(Self::Long),
            other => Err(Error::format(format!("unsupported read length class bits {other}"))),
        }
    }
}

/// Picks a length class from a sample's median and maximum read length.
///
/// Any read past [`SHORT_READ_MAX_LENGTH`] disqualifies the short-read path,
/// even when the median is small.
pub fn classify_read_length(median: usize, max: usize) -> ReadLengthClass {
    if max >= LONG_READ_THRESHOLD {
        ReadLengthClass::Long
    } else if max > SHORT_READ_MAX_LENGTH || median >= MEDIUM_READ_THRESHOLD {
        ReadLengthClass::Medium
    } else {
        ReadLengthClass::Short
    }
}

macro_rules! impl_mode_text {
    ($ty:ty, $what:literal, [$($name:literal => $variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err(Error::argument(format!("unknown {} '{}'", $what, other))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_mode_text!(QualityMode, "quality mode", [
    "lossless" => QualityMode::Lossless,
    "none" => QualityMode::Lossless,
    "illumina8" => QualityMode::Illumina8,
    "discard" => QualityMode::Discard,
]);

impl_mode_text!(IdMode, "id mode", [
    "exact" => IdMode::Exact,
    "tokenize" => IdMode::Tokenize,
    "discard" => IdMode::Discard,
]);

impl_mode_text!(ReadLengthClass, "read length class", [
    "short" => ReadLengthClass::Short,
    "medium" => ReadLengthClass::Medium,
    "long" => ReadLengthClass::Long,
]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_read_length() {
        assert_eq!(classify_read_length(150, 151), ReadLengthClass::Short);
        assert_eq!(classify_read_length(150, 600), ReadLengthClass::Medium);
        assert_eq!(classify_read_length(2_000, 2_000), ReadLengthClass::Medium);
        assert_eq!(classify_read_length(300, 50_000), ReadLengthClass::Long);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Illumina8".parse::<QualityMode>().unwrap(), QualityMode::Illumina8);
        assert_eq!("tokenize".parse::<IdMode>().unwrap(), IdMode::Tokenize);
        assert!("qvz".parse::<QualityMode>().is_err());
    }
}
