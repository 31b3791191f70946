//! Writer-stage sinks for decoded reads.

use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Range;

use tracing::warn;

use crate::error::Result;
use crate::fastq::{record_text_len, write_record};
use crate::pipeline::ordered::{BlockSink, Sequenced};
use crate::reorder_map::ReorderMapData;
use crate::types::{BlockId, ReadId, ReadRecord};

/// Reads of one block after decoding, in archive order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBlock {
    pub block_id: BlockId,
    pub start_read_id: ReadId,
    pub reads: Vec<ReadRecord>,
}

impl Sequenced for DecodedBlock {
    fn sequence_id(&self) -> BlockId {
        self.block_id
    }
}

/// Holds reads that arrive ahead of their original position.
#[derive(Debug)]
struct OriginalOrderBuffer {
    reverse: Vec<ReadId>,
    next: ReadId,
    pending: BTreeMap<ReadId, ReadRecord>,
}

/// Writes decoded reads as FASTQ.
///
/// Depending on how it is configured it keeps only an archive-order read
/// range, restores the original order through a reorder map, numbers reads
/// whose ids were discarded, or writes header lines alone.
pub struct FastqSink<W> {
    out: W,
    id_prefix: Option<String>,
    header_only: bool,
    range: Option<Range<ReadId>>,
    reorder: Option<OriginalOrderBuffer>,
    reads_written: u64,
    bytes_written: u64,
}

impl<W: Write> FastqSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            id_prefix: None,
            header_only: false,
            range: None,
            reorder: None,
            reads_written: 0,
            bytes_written: 0,
        }
    }

    /// Ids become `{prefix}{n}`, `n` counting output reads from 1.
    pub fn with_generated_ids(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    /// Writes only the `@id` line of each read.
    pub fn with_header_only(mut self) -> Self {
        self.header_only = true;
        self
    }

    /// Keeps archive reads in `range` (0-based, end exclusive).
    pub fn with_range(mut self, range: Range<ReadId>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_original_order(mut self, map: &ReorderMapData) -> Self {
        self.reorder = Some(OriginalOrderBuffer {
            reverse: map.reverse_map().to_vec(),
            next: 0,
            pending: BTreeMap::new(),
        });
        self
    }

    pub fn reads_written(&self) -> u64 {
        self.reads_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Reads parked while waiting for an earlier original id.
    pub fn buffered_reads(&self) -> usize {
        self.reorder.as_ref().map_or(0, |r| r.pending.len())
    }

    fn emit(&mut self, mut record: ReadRecord) -> Result<()> {
        if let Some(prefix) = &self.id_prefix {
            record.id = format!("{prefix}{}", self.reads_written + 1);
        }
        if self.header_only {
            self.out.write_all(b"@")?;
            self.out.write_all(record.id.as_bytes())?;
            self.out.write_all(b"\n")?;
            self.bytes_written += record.id.len() as u64 + 2;
        } else {
            write_record(&mut self.out, &record)?;
            self.bytes_written += record_text_len(&record);
        }
        self.reads_written += 1;
        Ok(())
    }

    fn accept(&mut self, archive_id: ReadId, record: ReadRecord) -> Result<()> {
        if let Some(range) = &self.range {
            if !range.contains(&archive_id) {
                return Ok(());
            }
        }
        let Some(buffer) = self.reorder.as_mut() else {
            return self.emit(record);
        };
        let original = buffer
            .reverse
            .get(archive_id as usize)
            .copied()
            .unwrap_or(archive_id);
        buffer.pending.insert(original, record);
        let mut ready = Vec::new();
        while let Some(next) = buffer.pending.remove(&buffer.next) {
            ready.push(next);
            buffer.next += 1;
        }
        for record in ready {
            self.emit(record)?;
        }
        Ok(())
    }

    /// Flushes anything still buffered and returns the writer.
    pub fn finish(mut self) -> Result<W> {
        if let Some(mut buffer) = self.reorder.take() {
            if !buffer.pending.is_empty() {
                warn!(
                    reads = buffer.pending.len(),
                    next_original = buffer.next,
                    "original order has gaps, writing the remaining reads in order"
                );
            }
            for (_, record) in std::mem::take(&mut buffer.pending) {
                self.emit(record)?;
            }
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> BlockSink<DecodedBlock> for FastqSink<W> {
    fn write_block(&mut self, block: DecodedBlock) -> Result<()> {
        let start = block.start_read_id;
        for (i, record) in block.reads.into_iter().enumerate() {
            self.accept(start + i as u64, record)?;
        }
        Ok(())
    }
}
