//! FASTQ archive engine.
//!
//! Compression runs in two phases. Phase 1 ([`analyzer`]) reorders reads so
//! similar ones sit together and records the permutation in a
//! [`ReorderMapData`]. Phase 2 ([`block`]) encodes each block of reads
//! against per-cluster consensus sequences ([`consensus`]). The
//! [`pipeline`] streams both phases through a bounded worker pool and
//! writes blocks in order through [`ArchiveWriter`].

pub mod analyzer;
pub mod block;
pub mod codec;
pub mod consensus;
pub mod error;
pub mod fastq;
pub mod format;
pub mod id_codec;
pub mod memory;
pub mod pipeline;
pub mod quality;
pub mod reader;
pub mod reorder_map;
pub mod types;
pub mod varint;
pub mod writer;

pub use analyzer::{AnalyzerConfig, AssignmentPlan, GlobalAnalyzer, MinimizerStrategy, SimilarityStrategy};
pub use block::{BlockCodecConfig, BlockCompressor, CompressedBlock, ReadChunk};
pub use codec::Codec;
pub use consensus::{ClusterArena, ClusterId, ConsensusSequence, Delta, Strand};
pub use error::{Error, ErrorKind, Result};
pub use fastq::{scan_fastq, FastqReader, InputProfile};
pub use format::{ArchiveFlags, GlobalHeader, HEADER_SIZE, MAGIC};
pub use memory::{ChunkPlan, ChunkPlanner, MemoryBudget, MemoryEstimator};
pub use pipeline::{
    CancelHandle, CompressionConfig, CompressionPipeline, DecompressionConfig, DecompressionPipeline,
    NodeState, PipelineStats, ProgressCallback, ProgressInfo,
};
pub use reader::ArchiveReader;
pub use reorder_map::ReorderMapData;
pub use types::{IdMode, QualityMode, ReadId, ReadLengthClass, ReadRecord};
pub use writer::{ArchiveOptions, ArchiveWriter};
