use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::block::CompressedBlock;
use crate::error::{Error, Result};
use crate::format::{
    ArchiveFlags, Footer, GlobalHeader, IndexEntry, BLOCK_HEADER_SIZE, CHECKSUM_XXH64,
    FORMAT_VERSION, HEADER_SIZE, INDEX_ENTRY_SIZE,
};
use crate::pipeline::ordered::BlockSink;
use crate::reorder_map::ReorderMapData;

/// Archive-wide settings fixed before the first block is written.
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub entropy_codec: u16,
    pub flags: ArchiveFlags,
    /// Nominal reads per block.
    pub block_size: u32,
    /// Stored after the header; usually the input file name.
    pub original_name: String,
}

/// What [`ArchiveWriter::finalize`] produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub block_count: u32,
    pub total_reads: u64,
    pub file_size: u64,
    pub reorder_map_bytes: u64,
}

/// Streaming writer for FQC archives.
///
/// # Layout written
/// ```text
/// [HEADER: 64 bytes placeholder] [name_len:u16][name]
/// [BLOCK 0] [BLOCK 1] ... [BLOCK N-1]      ← 64-byte header + payload each
/// [BLOCK INDEX: 24 bytes × N]
/// [REORDER MAP]                            ← optional
/// [FOOTER: 32 bytes]
/// ← seek back to 0, overwrite header with real values, rename into place
/// ```
///
/// Everything goes to `<output>.tmp`; the final path only appears after a
/// successful [`finalize`](Self::finalize). Dropping an unfinished writer
/// removes the temporary file.
pub struct ArchiveWriter {
    file: Option<BufWriter<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    options: ArchiveOptions,
    entries: Vec<IndexEntry>,
    block_checksums: Vec<u8>,
    total_reads: u64,
    /// Current write position (mirrors the file cursor).
    current_offset: u64,
}

pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

impl ArchiveWriter {
    pub fn create(path: impl AsRef<Path>, options: ArchiveOptions) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        let tmp_path = temp_path_for(&final_path);
        let name = options.original_name.as_bytes();
        if name.len() > u16::MAX as usize {
            return Err(Error::argument(format!(
                "original file name is {} bytes, at most {} fit",
                name.len(),
                u16::MAX
            )));
        }

        let mut file = BufWriter::with_capacity(1 << 20, File::create(&tmp_path)?);
        // Placeholder header, overwritten in finalize().
        file.write_all(&[0u8; HEADER_SIZE as usize])?;
        file.write_all(&(name.len() as u16).to_le_bytes())?;
        file.write_all(name)?;

        Ok(Self {
            file: Some(file),
            tmp_path,
            final_path,
            current_offset: HEADER_SIZE + 2 + name.len() as u64,
            options,
            entries: Vec::new(),
            block_checksums: Vec::new(),
            total_reads: 0,
        })
    }

    pub fn blocks_written(&self) -> usize {
        self.entries.len()
    }

    pub fn reads_written(&self) -> u64 {
        self.total_reads
    }

    pub fn bytes_written(&self) -> u64 {
        self.current_offset
    }

    pub fn temp_path(&self) -> &Path {
        &self.tmp_path
    }

    fn file(&mut self) -> Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::Internal("archive writer already closed".into()))
    }

    /// Appends one block record. Blocks must arrive with consecutive ids
    /// starting at 0, each starting where the previous one ended.
    pub fn append(&mut self, block: &CompressedBlock) -> Result<()> {
        let expected = self.entries.len() as u32;
        if block.block_id != expected {
            return Err(Error::Internal(format!(
                "block {} written out of order, expected {expected}",
                block.block_id
            )));
        }
        if block.start_read_id != self.total_reads {
            return Err(Error::Internal(format!(
                "block {} starts at read {} but {} reads precede it",
                block.block_id, block.start_read_id, self.total_reads
            )));
        }

        let header = block.header();
        let offset = self.current_offset;
        let file = self.file()?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&block.id_stream)?;
        file.write_all(&block.seq_stream)?;
        file.write_all(&block.qual_stream)?;
        file.write_all(&block.aux_stream)?;

        let record_size = BLOCK_HEADER_SIZE + header.payload_size();
        self.current_offset += record_size;
        self.entries.push(IndexEntry {
            offset,
            record_size: record_size as u32,
            read_count: block.read_count,
            archive_start: block.start_read_id,
        });
        self.block_checksums
            .extend_from_slice(&block.checksum.to_le_bytes());
        self.total_reads += u64::from(block.read_count);
        debug!(
            block = block.block_id,
            reads = block.read_count,
            bytes = record_size,
            "block written"
        );
        Ok(())
    }

    /// Writes the index, the optional reorder map and the footer, seals the
    /// header and renames the archive into place.
    pub fn finalize(mut self, reorder_map: Option<&ReorderMapData>) -> Result<ArchiveSummary> {
        if let Some(map) = reorder_map {
            if map.len() as u64 != self.total_reads {
                return Err(Error::Internal(format!(
                    "reorder map covers {} reads but {} were written",
                    map.len(),
                    self.total_reads
                )));
            }
        }

        // ── Block index ────────────────────────────────────────────────────
        let index_offset = self.current_offset;
        let entries = std::mem::take(&mut self.entries);
        let file = self.file()?;
        for entry in &entries {
            file.write_all(&entry.to_bytes())?;
        }
        self.current_offset += entries.len() as u64 * INDEX_ENTRY_SIZE;

        // ── Reorder map ────────────────────────────────────────────────────
        let (reorder_map_offset, reorder_map_bytes) = match reorder_map {
            Some(map) => {
                let bytes = map.serialize();
                let offset = self.current_offset;
                self.file()?.write_all(&bytes)?;
                self.current_offset += bytes.len() as u64;
                (offset, bytes.len() as u64)
            }
            None => (0, 0),
        };

        // ── Footer ─────────────────────────────────────────────────────────
        let footer = Footer {
            index_offset,
            reorder_map_offset,
            global_checksum: xxh3_64(&self.block_checksums),
        };
        self.file()?.write_all(&footer.to_bytes())?;
        self.current_offset += footer.to_bytes().len() as u64;

        // ── Seek back to 0 and write the real header ───────────────────────
        let mut flags = self.options.flags;
        flags.has_reorder_map = reorder_map.is_some();
        let header = GlobalHeader {
            version: FORMAT_VERSION,
            checksum_type: CHECKSUM_XXH64,
            entropy_codec: self.options.entropy_codec,
            flags,
            total_reads: self.total_reads,
            block_count: entries.len() as u32,
            block_size: self.options.block_size,
            timestamp: unix_now(),
        };
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::Internal("archive writer already closed".into()))?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_bytes())?;
        file.flush()?;
        let file = file
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.final_path)?;
        debug!(path = %self.final_path.display(), "archive finalized");

        Ok(ArchiveSummary {
            block_count: entries.len() as u32,
            total_reads: self.total_reads,
            file_size: self.current_offset,
            reorder_map_bytes,
        })
    }

    /// Discards everything written so far.
    pub fn abort(mut self) {
        self.discard_temp();
    }

    fn discard_temp(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

impl BlockSink<CompressedBlock> for ArchiveWriter {
    fn write_block(&mut self, block: CompressedBlock) -> Result<()> {
        self.append(&block)
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        self.discard_temp();
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
