//! Reader-stage sources: turn FASTQ input into [`ReadChunk`]s in archive
//! order.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::analyzer::GlobalAnalyzer;
use crate::block::ReadChunk;
use crate::error::{Error, Result};
use crate::fastq::FastqReader;
use crate::memory::ChunkPlan;
use crate::reorder_map::ReorderMapData;
use crate::types::{BlockId, ReadId, ReadRecord};

pub type BoxedFastqReader = FastqReader<Box<dyn BufRead + Send>>;

/// Opens `path` for reading; `-` reads standard input.
pub fn open_input(path: &Path) -> Result<BoxedFastqReader> {
    if path.as_os_str() == "-" {
        let stdin: Box<dyn BufRead + Send> = Box::new(BufReader::with_capacity(1 << 20, io::stdin()));
        Ok(FastqReader::new(stdin))
    } else {
        FastqReader::open(path)
    }
}

/// Produces chunks with consecutive ids and contiguous archive read ids.
pub trait ChunkSource: Send {
    fn next_chunk(&mut self) -> Result<Option<ReadChunk>>;

    /// Known up front only when the input was scanned.
    fn total_reads(&self) -> Option<u64>;

    /// Uncompressed input bytes consumed so far.
    fn bytes_read(&self) -> u64;

    /// The archive-order permutation once every chunk has been produced.
    fn into_reorder_map(self: Box<Self>) -> Result<Option<ReorderMapData>>;
}

// ── Streaming ──────────────────────────────────────────────────────────────

/// Single pass in input order; archive order equals original order.
pub struct StreamingSource<R> {
    reader: FastqReader<R>,
    lookahead: VecDeque<ReadRecord>,
    block_size: usize,
    max_block_bases: usize,
    next_chunk_id: BlockId,
    next_read_id: ReadId,
    exhausted: bool,
}

impl<R: BufRead> StreamingSource<R> {
    pub fn new(reader: FastqReader<R>, block_size: usize, max_block_bases: usize) -> Self {
        Self {
            reader,
            lookahead: VecDeque::new(),
            block_size: block_size.max(1),
            max_block_bases: max_block_bases.max(1),
            next_chunk_id: 0,
            next_read_id: 0,
            exhausted: false,
        }
    }

    /// Lengths of up to `n` leading reads, buffered for later chunks.
    pub fn sample_lengths(&mut self, n: usize) -> Result<Vec<usize>> {
        while self.lookahead.len() < n && self.fill_one()? {}
        Ok(self.lookahead.iter().take(n).map(ReadRecord::len).collect())
    }

    /// Block size applies to chunks not yet produced.
    pub fn set_block_size(&mut self, block_size: usize) {
        self.block_size = block_size.max(1);
    }

    fn fill_one(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        match self.reader.read_record()? {
            Some(record) => {
                self.lookahead.push_back(record);
                Ok(true)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    fn next_record(&mut self) -> Result<Option<ReadRecord>> {
        if self.lookahead.is_empty() && !self.fill_one()? {
            return Ok(None);
        }
        Ok(self.lookahead.pop_front())
    }
}

impl<R: BufRead + Send> ChunkSource for StreamingSource<R> {
    fn next_chunk(&mut self) -> Result<Option<ReadChunk>> {
        let mut reads = Vec::with_capacity(self.block_size.min(1 << 16));
        let mut bases = 0usize;
        while reads.len() < self.block_size && bases < self.max_block_bases {
            match self.next_record()? {
                Some(record) => {
                    bases += record.len();
                    reads.push(record);
                }
                None => break,
            }
        }
        if reads.is_empty() {
            return Ok(None);
        }
        let is_last = self.lookahead.is_empty() && !self.fill_one()?;
        let chunk = ReadChunk {
            chunk_id: self.next_chunk_id,
            start_read_id: self.next_read_id,
            is_last,
            cluster_starts: Vec::new(),
            reads,
        };
        self.next_chunk_id += 1;
        self.next_read_id += chunk.reads.len() as u64;
        Ok(Some(chunk))
    }

    fn total_reads(&self) -> Option<u64> {
        None
    }

    fn bytes_read(&self) -> u64 {
        self.reader.bytes_read()
    }

    fn into_reorder_map(self: Box<Self>) -> Result<Option<ReorderMapData>> {
        Ok(None)
    }
}

// ── Reordered ──────────────────────────────────────────────────────────────

/// Analyzes each planned chunk in full, permutes it into archive order and
/// cuts it into blocks. Blocks never straddle analysis chunks.
pub struct ReorderedSource {
    reader: BoxedFastqReader,
    analyzer: GlobalAnalyzer,
    plan: ChunkPlan,
    block_size: usize,
    next_plan_chunk: usize,
    next_chunk_id: BlockId,
    queue: VecDeque<ReadChunk>,
    maps: Vec<ReorderMapData>,
    sizes: Vec<u64>,
}

impl ReorderedSource {
    pub fn new(reader: BoxedFastqReader, analyzer: GlobalAnalyzer, plan: ChunkPlan, block_size: usize) -> Result<Self> {
        plan.validate()?;
        Ok(Self {
            reader,
            analyzer,
            block_size: block_size.max(1),
            next_plan_chunk: 0,
            next_chunk_id: 0,
            queue: VecDeque::new(),
            maps: Vec::with_capacity(plan.num_chunks),
            sizes: Vec::with_capacity(plan.num_chunks),
            plan,
        })
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    fn load_next(&mut self) -> Result<()> {
        let info = self.plan.chunks[self.next_plan_chunk];
        if info.block_id_offset != self.next_chunk_id {
            return Err(Error::Internal(format!(
                "analysis chunk {} planned to start at block {}, but {} blocks precede it",
                info.chunk_index, info.block_id_offset, self.next_chunk_id
            )));
        }
        let is_final_chunk = self.next_plan_chunk + 1 == self.plan.num_chunks;
        self.next_plan_chunk += 1;

        let count = info.read_count() as usize;
        let mut reads = Vec::with_capacity(count);
        for _ in 0..count {
            let record = self.reader.read_record()?.ok_or_else(|| {
                Error::format(format!(
                    "input ended after {} reads, the scan counted {}",
                    self.reader.records_read(),
                    self.plan.total_reads
                ))
            })?;
            reads.push(record);
        }
        if is_final_chunk && self.reader.read_record()?.is_some() {
            return Err(Error::format("input grew between the scan and the compression pass"));
        }

        let assignment = {
            let sequences: Vec<&[u8]> = reads.iter().map(|r| r.sequence.as_slice()).collect();
            self.analyzer.analyze(&sequences)?
        };
        info!(
            chunk = info.chunk_index,
            reads = count,
            clusters = assignment.cluster_count(),
            "analysis chunk ready"
        );

        let mut slots: Vec<Option<ReadRecord>> = reads.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(count);
        for &original in &assignment.archive_order {
            let record = slots
                .get_mut(original as usize)
                .and_then(Option::take)
                .ok_or_else(|| Error::Internal(format!("analyzer placed read {original} twice")))?;
            ordered.push(record);
        }

        let ranges = assignment.block_boundaries(self.block_size);
        let last_range = ranges.len().saturating_sub(1);
        let mut rest = ordered.into_iter();
        for (i, range) in ranges.into_iter().enumerate() {
            let reads: Vec<ReadRecord> = rest.by_ref().take((range.end - range.start) as usize).collect();
            self.queue.push_back(ReadChunk {
                chunk_id: self.next_chunk_id,
                start_read_id: info.archive_id_offset + range.start,
                is_last: is_final_chunk && i == last_range,
                cluster_starts: assignment.boundaries_within(range),
                reads,
            });
            self.next_chunk_id += 1;
        }

        self.maps.push(assignment.reorder_map()?);
        self.sizes.push(count as u64);
        Ok(())
    }
}

impl ChunkSource for ReorderedSource {
    fn next_chunk(&mut self) -> Result<Option<ReadChunk>> {
        while self.queue.is_empty() && self.next_plan_chunk < self.plan.num_chunks {
            self.load_next()?;
        }
        Ok(self.queue.pop_front())
    }

    fn total_reads(&self) -> Option<u64> {
        Some(self.plan.total_reads)
    }

    fn bytes_read(&self) -> u64 {
        self.reader.bytes_read()
    }

    fn into_reorder_map(self: Box<Self>) -> Result<Option<ReorderMapData>> {
        let mut maps = self.maps;
        let map = if maps.len() == 1 {
            maps.pop()
        } else {
            Some(ReorderMapData::combine_chunks(&maps, &self.sizes)?)
        };
        Ok(map)
    }
}
