use crate::error::{Error, Result};
use crate::types::{IdMode, QualityMode, ReadLengthClass};

/// Magic bytes opening every FQC archive (PNG-style: high bit, name, CRLF, EOF, LF).
pub const MAGIC: &[u8; 8] = b"\x89FQC\r\n\x1a\n";

/// Closes the footer; a missing end magic means a truncated archive.
pub const MAGIC_END: &[u8; 8] = b"FQC_EOF\0";

/// `(major << 4) | minor`.
pub const FORMAT_VERSION: u8 = 1 << 4;

pub const CHECKSUM_XXH64: u8 = 1;

// ── Entropy codec ids ──────────────────────────────────────────────────────

pub const CODEC_PASSTHROUGH: u16 = 0;
pub const CODEC_ZSTD: u16 = 1;
pub const CODEC_LZ4: u16 = 2;

/// Fixed size of the global header in bytes.
///   magic[8] + version:u8 + checksum_type:u8 + entropy_codec:u16 + flags:u32
///   + total_reads:u64 + block_count:u32 + block_size:u32 + timestamp:u64
///   + reserved[24]
///   = 8 + 1 + 1 + 2 + 4 + 8 + 4 + 4 + 8 + 24 = 64
pub const HEADER_SIZE: u64 = 64;

/// Fixed size of each block record header.
///   block_id:u32 + codec tags[4] + checksum:u64 + read_count:u32
///   + uniform_read_length:u32 + start_read_id:u64 + 4 × (offset:u32, len:u32)
///   = 4 + 4 + 8 + 4 + 4 + 8 + 32 = 64
pub const BLOCK_HEADER_SIZE: u64 = 64;

/// Size of each block index entry.
///   offset:u64 + record_size:u32 + read_count:u32 + archive_start:u64 = 24
pub const INDEX_ENTRY_SIZE: u64 = 24;

/// index_offset:u64 + reorder_map_offset:u64 + global_checksum:u64 + magic_end[8]
pub const FOOTER_SIZE: u64 = 32;

// ── Flags ──────────────────────────────────────────────────────────────────

pub const FLAG_PRESERVE_ORDER: u32 = 1 << 1;
pub const FLAG_HAS_REORDER_MAP: u32 = 1 << 7;
pub const FLAG_STREAMING: u32 = 1 << 12;

const QUALITY_SHIFT: u32 = 3;
const ID_SHIFT: u32 = 5;
const LENGTH_CLASS_SHIFT: u32 = 10;
const TWO_BITS: u32 = 0b11;

/// Decoded view of the header flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchiveFlags {
    pub preserve_order: bool,
    pub quality_mode: QualityMode,
    pub id_mode: IdMode,
    pub has_reorder_map: bool,
    pub length_class: ReadLengthClass,
    pub streaming: bool,
}

impl ArchiveFlags {
    pub fn to_bits(&self) -> u32 {
        let mut bits = 0;
        if self.preserve_order {
            bits |= FLAG_PRESERVE_ORDER;
        }
        if self.has_reorder_map {
            bits |= FLAG_HAS_REORDER_MAP;
        }
        if self.streaming {
            bits |= FLAG_STREAMING;
        }
        bits |= self.quality_mode.to_bits() << QUALITY_SHIFT;
        bits |= self.id_mode.to_bits() << ID_SHIFT;
        bits |= self.length_class.to_bits() << LENGTH_CLASS_SHIFT;
        bits
    }

    pub fn from_bits(bits: u32) -> Result<Self> {
        Ok(Self {
            preserve_order: bits & FLAG_PRESERVE_ORDER != 0,
            has_reorder_map: bits & FLAG_HAS_REORDER_MAP != 0,
            streaming: bits & FLAG_STREAMING != 0,
            quality_mode: QualityMode::from_bits((bits >> QUALITY_SHIFT) & TWO_BITS)?,
            id_mode: IdMode::from_bits((bits >> ID_SHIFT) & TWO_BITS)?,
            length_class: ReadLengthClass::from_bits((bits >> LENGTH_CLASS_SHIFT) & TWO_BITS)?,
        })
    }
}

// ── Stream codec tags ──────────────────────────────────────────────────────

/// High nibble of a stream codec tag; the low nibble is the family version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecFamily {
    Raw = 0x0,
    ConsensusDelta = 0x1,
    PlainSequence = 0x2,
    Tokenized = 0x3,
    Binned = 0x4,
    LengthVarint = 0x5,
    Discarded = 0xF,
}

impl CodecFamily {
    #[inline]
    pub fn tag(self, version: u8) -> u8 {
        ((self as u8) << 4) | (version & 0x0f)
    }

    pub fn from_tag(tag: u8) -> Result<(Self, u8)> {
        let family = match tag >> 4 {
            0x0 => Self::Raw,
            0x1 => Self::ConsensusDelta,
            0x2 => Self::PlainSequence,
            0x3 => Self::Tokenized,
            0x4 => Self::Binned,
            0x5 => Self::LengthVarint,
            0xF => Self::Discarded,
            other => return Err(Error::format(format!("unknown codec family {other:#x}"))),
        };
        Ok((family, tag & 0x0f))
    }
}

// ── Global header ──────────────────────────────────────────────────────────

/// Decoded representation of the 64-byte global header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeader {
    pub version: u8,
    pub checksum_type: u8,
    /// Id of the entropy backend applied to every stream.
    pub entropy_codec: u16,
    pub flags: ArchiveFlags,
    pub total_reads: u64,
    pub block_count: u32,
    /// Nominal reads per block (the last block may hold fewer).
    pub block_size: u32,
    /// Unix seconds at compression time.
    pub timestamp: u64,
}

impl GlobalHeader {
    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..8].copy_from_slice(MAGIC);
        buf[8] = self.version;
        buf[9] = self.checksum_type;
        buf[10..12].copy_from_slice(&self.entropy_codec.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_bits().to_le_bytes());
        buf[16..24].copy_from_slice(&self.total_reads.to_le_bytes());
        buf[24..28].copy_from_slice(&self.block_count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.block_size.to_le_bytes());
        buf[32..40].copy_from_slice(&self.timestamp.to_le_bytes());
        // reserved[24] stays zero
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes, checking magic and version.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        if &buf[..8] != MAGIC {
            return Err(Error::format("invalid magic bytes, not an FQC archive"));
        }
        let version = buf[8];
        if version >> 4 != FORMAT_VERSION >> 4 {
            return Err(Error::format(format!(
                "unsupported archive version {}.{}",
                version >> 4,
                version & 0x0f
            )));
        }
        Ok(Self {
            version,
            checksum_type: buf[9],
            entropy_codec: u16::from_le_bytes([buf[10], buf[11]]),
            flags: ArchiveFlags::from_bits(le_u32(&buf[12..16]))?,
            total_reads: le_u64(&buf[16..24]),
            block_count: le_u32(&buf[24..28]),
            block_size: le_u32(&buf[28..32]),
            timestamp: le_u64(&buf[32..40]),
        })
    }
}

// ── Block header ───────────────────────────────────────────────────────────

/// Byte span of one stream relative to the start of the block payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSpan {
    pub offset: u32,
    pub len: u32,
}

impl StreamSpan {
    #[inline]
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.len)
    }
}

/// Header preceding every block payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_id: u32,
    pub codec_ids: u8,
    pub codec_seq: u8,
    pub codec_qual: u8,
    pub codec_aux: u8,
    /// XXH64 over the logical uncompressed streams.
    pub checksum: u64,
    pub read_count: u32,
    /// Shared read length, or 0 when lengths vary and live in the aux stream.
    pub uniform_read_length: u32,
    pub start_read_id: u64,
    pub ids: StreamSpan,
    pub seq: StreamSpan,
    pub qual: StreamSpan,
    pub aux: StreamSpan,
}

impl BlockHeader {
    pub fn payload_size(&self) -> u64 {
        [self.ids, self.seq, self.qual, self.aux]
            .iter()
            .map(StreamSpan::end)
            .max()
            .unwrap_or(0)
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE as usize] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.block_id.to_le_bytes());
        buf[4] = self.codec_ids;
        buf[5] = self.codec_seq;
        buf[6] = self.codec_qual;
        buf[7] = self.codec_aux;
        buf[8..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf[16..20].copy_from_slice(&self.read_count.to_le_bytes());
        buf[20..24].copy_from_slice(&self.uniform_read_length.to_le_bytes());
        buf[24..32].copy_from_slice(&self.start_read_id.to_le_bytes());
        for (i, span) in [self.ids, self.seq, self.qual, self.aux].iter().enumerate() {
            let at = 32 + i * 8;
            buf[at..at + 4].copy_from_slice(&span.offset.to_le_bytes());
            buf[at + 4..at + 8].copy_from_slice(&span.len.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(buf: &[u8; BLOCK_HEADER_SIZE as usize]) -> Self {
        let span = |i: usize| {
            let at = 32 + i * 8;
            StreamSpan {
                offset: le_u32(&buf[at..at + 4]),
                len: le_u32(&buf[at + 4..at + 8]),
            }
        };
        Self {
            block_id: le_u32(&buf[0..4]),
            codec_ids: buf[4],
            codec_seq: buf[5],
            codec_qual: buf[6],
            codec_aux: buf[7],
            checksum: le_u64(&buf[8..16]),
            read_count: le_u32(&buf[16..20]),
            uniform_read_length: le_u32(&buf[20..24]),
            start_read_id: le_u64(&buf[24..32]),
            ids: span(0),
            seq: span(1),
            qual: span(2),
            aux: span(3),
        }
    }
}

// ── Block index entry ──────────────────────────────────────────────────────

/// One entry in the block index: locates a block record and the reads it holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of the block header from the start of the file.
    pub offset: u64,
    /// Block header plus payload, in bytes.
    pub record_size: u32,
    pub read_count: u32,
    /// Archive id of the block's first read.
    pub archive_start: u64,
}

impl IndexEntry {
    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE as usize] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.record_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.read_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.archive_start.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; INDEX_ENTRY_SIZE as usize]) -> Self {
        Self {
            offset: le_u64(&buf[0..8]),
            record_size: le_u32(&buf[8..12]),
            read_count: le_u32(&buf[12..16]),
            archive_start: le_u64(&buf[16..24]),
        }
    }
}

// ── Footer ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footer {
    pub index_offset: u64,
    /// Zero when the archive carries no reorder map.
    pub reorder_map_offset: u64,
    /// xxh3-64 over the concatenated little-endian block checksums.
    pub global_checksum: u64,
}

impl Footer {
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE as usize] {
        let mut buf = [0u8; FOOTER_SIZE as usize];
        buf[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.reorder_map_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.global_checksum.to_le_bytes());
        buf[24..32].copy_from_slice(MAGIC_END);
        buf
    }

    pub fn from_bytes(buf: &[u8; FOOTER_SIZE as usize]) -> Result<Self> {
        if &buf[24..32] != MAGIC_END {
            return Err(Error::format("missing end magic, archive is truncated or was never finalized"));
        }
        Ok(Self {
            index_offset: le_u64(&buf[0..8]),
            reorder_map_offset: le_u64(&buf[8..16]),
            global_checksum: le_u64(&buf[16..24]),
        })
    }
}

#[inline]
fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
