use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use xxhash_rust::xxh3::xxh3_64;

use crate::block::CompressedBlock;
use crate::error::{Error, Result};
use crate::format::{
    BlockHeader, Footer, GlobalHeader, IndexEntry, BLOCK_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE,
    INDEX_ENTRY_SIZE,
};
use crate::reorder_map::ReorderMapData;
use crate::types::ReadId;

/// Random-access reader for FQC archives.
///
/// # Open sequence
/// 1. Read the 64-byte header (magic, version, codec id, counts) and the
///    original file name.
/// 2. Read the 32-byte footer from the end of the file; the end magic proves
///    the writer finalized it.
/// 3. Load the block index and check every entry lies between the name and
///    the index, and that entries tile the archive read ids.
/// 4. Load the reorder map when the header flags one.
///
/// [`read_block`](Self::read_block) seeks straight to one block record; no
/// other block is touched.
#[derive(Debug)]
pub struct ArchiveReader {
    file: BufReader<File>,
    header: GlobalHeader,
    original_name: String,
    footer: Footer,
    entries: Vec<IndexEntry>,
    reorder_map: Option<ReorderMapData>,
    file_size: u64,
}

impl ArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        let file_size = file.seek(SeekFrom::End(0))?;
        if file_size < HEADER_SIZE + 2 + FOOTER_SIZE {
            return Err(Error::format(format!(
                "{file_size} bytes is too small for an FQC archive"
            )));
        }

        // ── Header and name ────────────────────────────────────────────────
        file.seek(SeekFrom::Start(0))?;
        let mut header_buf = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header_buf)?;
        let header = GlobalHeader::from_bytes(&header_buf)?;

        let mut len_buf = [0u8; 2];
        file.read_exact(&mut len_buf)?;
        let name_len = u16::from_le_bytes(len_buf) as u64;
        let blocks_start = HEADER_SIZE + 2 + name_len;
        if blocks_start + FOOTER_SIZE > file_size {
            return Err(Error::format("original name runs past the end of the archive"));
        }
        let mut name = vec![0u8; name_len as usize];
        file.read_exact(&mut name)?;
        let original_name = String::from_utf8_lossy(&name).into_owned();

        // ── Footer ─────────────────────────────────────────────────────────
        let footer_at = file_size - FOOTER_SIZE;
        file.seek(SeekFrom::Start(footer_at))?;
        let mut footer_buf = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::from_bytes(&footer_buf)?;

        // ── Block index ────────────────────────────────────────────────────
        let index_end = u64::from(header.block_count)
            .checked_mul(INDEX_ENTRY_SIZE)
            .and_then(|len| footer.index_offset.checked_add(len))
            .ok_or_else(|| Error::format("block index offset overflows"))?;
        let trailer_end = if footer.reorder_map_offset != 0 {
            footer.reorder_map_offset
        } else {
            footer_at
        };
        if footer.index_offset < blocks_start || index_end > trailer_end || trailer_end > footer_at {
            return Err(Error::format(format!(
                "block index [{}..{index_end}) out of bounds",
                footer.index_offset
            )));
        }
        file.seek(SeekFrom::Start(footer.index_offset))?;
        let mut entries = Vec::with_capacity(header.block_count as usize);
        let mut entry_buf = [0u8; INDEX_ENTRY_SIZE as usize];
        let mut next_read: ReadId = 0;
        for i in 0..header.block_count {
            file.read_exact(&mut entry_buf)?;
            let entry = IndexEntry::from_bytes(&entry_buf);
            let record_end = entry.offset.checked_add(u64::from(entry.record_size));
            if entry.offset < blocks_start
                || record_end.map_or(true, |end| end > footer.index_offset)
                || u64::from(entry.record_size) < BLOCK_HEADER_SIZE
            {
                return Err(Error::format(format!("index entry {i} points outside the block area")));
            }
            if entry.archive_start != next_read {
                return Err(Error::format(format!(
                    "index entry {i} starts at read {} but {next_read} reads precede it",
                    entry.archive_start
                )));
            }
            next_read += u64::from(entry.read_count);
            entries.push(entry);
        }
        if next_read != header.total_reads {
            return Err(Error::format(format!(
                "blocks hold {next_read} reads but the header claims {}",
                header.total_reads
            )));
        }

        // ── Reorder map ────────────────────────────────────────────────────
        let reorder_map = if header.flags.has_reorder_map {
            if footer.reorder_map_offset == 0 {
                return Err(Error::format("header flags a reorder map but the footer has none"));
            }
            file.seek(SeekFrom::Start(footer.reorder_map_offset))?;
            let mut bytes = vec![0u8; (footer_at - footer.reorder_map_offset) as usize];
            file.read_exact(&mut bytes)?;
            let map = ReorderMapData::deserialize(&bytes)?;
            if map.len() as u64 != header.total_reads {
                return Err(Error::format(format!(
                    "reorder map covers {} reads, archive holds {}",
                    map.len(),
                    header.total_reads
                )));
            }
            Some(map)
        } else {
            None
        };

        Ok(Self {
            file,
            header,
            original_name,
            footer,
            entries,
            reorder_map,
            file_size,
        })
    }

    pub fn header(&self) -> &GlobalHeader {
        &self.header
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn total_reads(&self) -> u64 {
        self.header.total_reads
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn reorder_map(&self) -> Option<&ReorderMapData> {
        self.reorder_map.as_ref()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes spent on block records (headers plus payloads).
    pub fn block_bytes(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.record_size)).sum()
    }

    /// Size of the serialized reorder map, zero when absent.
    pub fn reorder_map_bytes(&self) -> u64 {
        if self.footer.reorder_map_offset == 0 {
            0
        } else {
            self.file_size - FOOTER_SIZE - self.footer.reorder_map_offset
        }
    }

    /// Index of the block holding archive read `read_id` (0-based).
    pub fn block_for_read(&self, read_id: ReadId) -> Option<usize> {
        if read_id >= self.header.total_reads {
            return None;
        }
        let idx = self
            .entries
            .partition_point(|e| e.archive_start <= read_id)
            .checked_sub(1)?;
        Some(idx)
    }

    /// Blocks covering archive reads `range` (0-based, end exclusive).
    pub fn blocks_for_range(&self, range: Range<ReadId>) -> Range<usize> {
        if range.start >= range.end {
            return 0..0;
        }
        let first = self.block_for_read(range.start).unwrap_or(self.entries.len());
        let last = self
            .block_for_read(range.end - 1)
            .unwrap_or_else(|| self.entries.len().saturating_sub(1));
        first..(last + 1).max(first)
    }

    /// Reads block record `idx`.
    pub fn read_block(&mut self, idx: usize) -> Result<CompressedBlock> {
        let entry = self
            .entries
            .get(idx)
            .copied()
            .ok_or_else(|| {
                Error::argument(format!(
                    "block index {idx} out of range (total {})",
                    self.entries.len()
                ))
            })?;

        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut header_buf = [0u8; BLOCK_HEADER_SIZE as usize];
        self.file.read_exact(&mut header_buf)?;
        let header = BlockHeader::from_bytes(&header_buf);
        if header.block_id as usize != idx {
            return Err(Error::format(format!(
                "block record at {} carries id {} instead of {idx}",
                entry.offset, header.block_id
            )));
        }
        if header.read_count != entry.read_count || header.start_read_id != entry.archive_start {
            return Err(Error::format(format!("block {idx} header disagrees with the index")));
        }
        let payload_len = u64::from(entry.record_size) - BLOCK_HEADER_SIZE;
        if header.payload_size() != payload_len {
            return Err(Error::format(format!(
                "block {idx} streams span {} bytes, record holds {payload_len}",
                header.payload_size()
            )));
        }
        let mut payload = vec![0u8; payload_len as usize];
        self.file.read_exact(&mut payload)?;
        CompressedBlock::from_parts(&header, &payload, idx + 1 == self.entries.len())
    }

    /// Recomputes the footer's global checksum from the block headers.
    pub fn global_checksum_matches(&mut self) -> Result<bool> {
        let mut checksums = Vec::with_capacity(self.entries.len() * 8);
        let mut header_buf = [0u8; BLOCK_HEADER_SIZE as usize];
        for entry in &self.entries {
            self.file.seek(SeekFrom::Start(entry.offset))?;
            self.file.read_exact(&mut header_buf)?;
            let header = BlockHeader::from_bytes(&header_buf);
            checksums.extend_from_slice(&header.checksum.to_le_bytes());
        }
        Ok(xxh3_64(&checksums) == self.footer.global_checksum)
    }
}
