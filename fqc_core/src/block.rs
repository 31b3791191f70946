//! Phase 2: turning a chunk of reads into one self-contained block and back.
//!
//! A block holds four streams (ids, sequences, qualities, read lengths), each
//! produced by a stream codec picked once per block and then passed through
//! the archive's entropy [`Codec`]. Sequences of short reads use the
//! consensus/delta path: consecutive reads are grouped into clusters, each
//! cluster keeps a [`ConsensusSequence`] in a per-block [`ClusterArena`],
//! and once the block is fully scanned every read is written as a [`Delta`]
//! against its cluster's final consensus. Clusters never outlive the block.

use std::sync::Arc;

use xxhash_rust::xxh64::Xxh64;

use crate::codec::Codec;
use crate::consensus::{
    compute_delta, find_best_alignment, is_delta_alphabet, reconstruct_from_delta, AlignConfig,
    ClusterArena, ClusterId, Delta, Strand, WindowGeometry,
};
use crate::error::{Error, Result};
use crate::format::{BlockHeader, CodecFamily, StreamSpan};
use crate::id_codec::{decode_ids, encode_ids};
use crate::pipeline::ordered::Sequenced;
use crate::quality::{decode_qualities, encode_qualities, logical_quality};
use crate::types::{
    BlockId, IdMode, QualityMode, ReadId, ReadLengthClass, ReadRecord,
    DEFAULT_PLACEHOLDER_QUALITY, SHORT_READ_MAX_LENGTH,
};
use crate::varint::{put_signed, put_varint, ByteCursor};

const SEQ_VERSION: u8 = 1;
const AUX_VERSION: u8 = 1;

/// Clusters stop growing once their consensus reaches this many columns.
pub const MAX_CONSENSUS_LEN: usize = 4096;

/// Reads handed from the reader stage to a compressor worker.
#[derive(Debug, Clone, Default)]
pub struct ReadChunk {
    pub chunk_id: BlockId,
    /// Archive id of `reads[0]`.
    pub start_read_id: ReadId,
    pub reads: Vec<ReadRecord>,
    pub is_last: bool,
    /// Chunk-local indices where the analyzer started a new cluster.
    pub cluster_starts: Vec<usize>,
}

/// One encoded block, immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressedBlock {
    pub block_id: BlockId,
    pub read_count: u32,
    pub start_read_id: ReadId,
    pub is_last: bool,
    pub uniform_read_length: u32,
    pub id_stream: Vec<u8>,
    pub seq_stream: Vec<u8>,
    pub qual_stream: Vec<u8>,
    pub aux_stream: Vec<u8>,
    pub codec_ids: u8,
    pub codec_seq: u8,
    pub codec_qual: u8,
    pub codec_aux: u8,
    pub checksum: u64,
}

impl CompressedBlock {
    /// On-disk header with streams laid out ids, seq, qual, aux.
    pub fn header(&self) -> BlockHeader {
        let mut offset = 0u32;
        let mut span = |len: usize| {
            let s = StreamSpan {
                offset,
                len: len as u32,
            };
            offset += len as u32;
            s
        };
        BlockHeader {
            block_id: self.block_id,
            codec_ids: self.codec_ids,
            codec_seq: self.codec_seq,
            codec_qual: self.codec_qual,
            codec_aux: self.codec_aux,
            checksum: self.checksum,
            read_count: self.read_count,
            uniform_read_length: self.uniform_read_length,
            start_read_id: self.start_read_id,
            ids: span(self.id_stream.len()),
            seq: span(self.seq_stream.len()),
            qual: span(self.qual_stream.len()),
            aux: span(self.aux_stream.len()),
        }
    }

    pub fn payload_len(&self) -> usize {
        self.id_stream.len() + self.seq_stream.len() + self.qual_stream.len() + self.aux_stream.len()
    }

    /// Rebuilds a block from its header and payload as read from disk.
    pub fn from_parts(header: &BlockHeader, payload: &[u8], is_last: bool) -> Result<Self> {
        let stream = |span: StreamSpan, name: &str| -> Result<Vec<u8>> {
            if span.end() > payload.len() as u64 {
                return Err(Error::format(format!(
                    "block {} {name} stream [{}..{}) exceeds {}-byte payload",
                    header.block_id,
                    span.offset,
                    span.end(),
                    payload.len()
                )));
            }
            Ok(payload[span.offset as usize..span.end() as usize].to_vec())
        };
        Ok(Self {
            block_id: header.block_id,
            read_count: header.read_count,
            start_read_id: header.start_read_id,
            is_last,
            uniform_read_length: header.uniform_read_length,
            id_stream: stream(header.ids, "id")?,
            seq_stream: stream(header.seq, "sequence")?,
            qual_stream: stream(header.qual, "quality")?,
            aux_stream: stream(header.aux, "aux")?,
            codec_ids: header.codec_ids,
            codec_seq: header.codec_seq,
            codec_qual: header.codec_qual,
            codec_aux: header.codec_aux,
            checksum: header.checksum,
        })
    }
}

impl Sequenced for CompressedBlock {
    fn sequence_id(&self) -> BlockId {
        self.block_id
    }
}

/// Sequence stream variants; resolved once per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCodec {
    ConsensusDelta,
    Plain,
}

impl SequenceCodec {
    pub fn tag(self) -> u8 {
        match self {
            Self::ConsensusDelta => CodecFamily::ConsensusDelta.tag(SEQ_VERSION),
            Self::Plain => CodecFamily::PlainSequence.tag(SEQ_VERSION),
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match CodecFamily::from_tag(tag)? {
            (CodecFamily::ConsensusDelta, _) => Ok(Self::ConsensusDelta),
            (CodecFamily::PlainSequence, _) => Ok(Self::Plain),
            (other, _) => Err(Error::format(format!("{other:?} is not a sequence codec"))),
        }
    }

    /// Consensus/delta needs short reads over `ACGTN`.
    pub fn select(class: ReadLengthClass, reads: &[ReadRecord]) -> Self {
        let eligible = class == ReadLengthClass::Short
            && reads
                .iter()
                .all(|r| r.len() <= SHORT_READ_MAX_LENGTH && is_delta_alphabet(&r.sequence));
        if eligible {
            Self::ConsensusDelta
        } else {
            Self::Plain
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockCodecConfig {
    pub length_class: ReadLengthClass,
    pub quality_mode: QualityMode,
    pub id_mode: IdMode,
    pub align: AlignConfig,
    /// Quality character used when qualities were discarded.
    pub placeholder_quality: u8,
}

impl Default for BlockCodecConfig {
    fn default() -> Self {
        Self {
            length_class: ReadLengthClass::Short,
            quality_mode: QualityMode::Lossless,
            id_mode: IdMode::Exact,
            align: AlignConfig::default(),
            placeholder_quality: DEFAULT_PLACEHOLDER_QUALITY,
        }
    }
}

/// Per-worker block encoder/decoder. Owns the cluster arena, so one
/// instance must never be shared between threads.
pub struct BlockCompressor {
    config: BlockCodecConfig,
    codec: Arc<dyn Codec>,
    arena: ClusterArena,
}

struct Member {
    cluster: ClusterId,
    shift: i64,
    strand: Strand,
}

impl BlockCompressor {
    pub fn new(config: BlockCodecConfig, codec: Arc<dyn Codec>) -> Self {
        Self {
            config,
            codec,
            arena: ClusterArena::new(),
        }
    }

    pub fn config(&self) -> &BlockCodecConfig {
        &self.config
    }

    pub fn compress(&mut self, chunk: ReadChunk) -> Result<CompressedBlock> {
        let reads = &chunk.reads;
        let lengths: Vec<usize> = reads.iter().map(ReadRecord::len).collect();

        let (codec_ids, ids_raw) = encode_ids(reads.iter().map(|r| r.id.as_str()), self.config.id_mode);

        let seq_codec = SequenceCodec::select(self.config.length_class, reads);
        let seq_raw = match seq_codec {
            SequenceCodec::ConsensusDelta => self.encode_consensus_delta(reads, &chunk.cluster_starts),
            SequenceCodec::Plain => reads.iter().flat_map(|r| r.sequence.iter().copied()).collect(),
        };

        let (codec_qual, qual_raw) =
            encode_qualities(reads.iter().map(|r| r.quality.as_slice()), self.config.quality_mode);

        let (uniform_read_length, aux_raw) = encode_lengths(&lengths);

        let checksum = block_checksum(
            reads,
            self.config.id_mode != IdMode::Discard,
            self.config.quality_mode,
        );

        Ok(CompressedBlock {
            block_id: chunk.chunk_id,
            read_count: reads.len() as u32,
            start_read_id: chunk.start_read_id,
            is_last: chunk.is_last,
            uniform_read_length,
            id_stream: self.entropy_encode(&ids_raw)?,
            seq_stream: self.entropy_encode(&seq_raw)?,
            qual_stream: self.entropy_encode(&qual_raw)?,
            aux_stream: self.entropy_encode(&aux_raw)?,
            codec_ids,
            codec_seq: seq_codec.tag(),
            codec_qual,
            codec_aux: CodecFamily::LengthVarint.tag(AUX_VERSION),
            checksum,
        })
    }

    /// Decodes `block`; when `verify` is set the recomputed checksum must
    /// match the stored one.
    pub fn decompress(&self, block: &CompressedBlock, verify: bool) -> Result<Vec<ReadRecord>> {
        let count = block.read_count as usize;

        let aux_raw = self.entropy_decode(&block.aux_stream)?;
        let lengths = decode_lengths(block.uniform_read_length, &aux_raw, count)?;

        let ids_raw = self.entropy_decode(&block.id_stream)?;
        let ids = decode_ids(block.codec_ids, &ids_raw, count)?;

        let seq_raw = self.entropy_decode(&block.seq_stream)?;
        let sequences = match SequenceCodec::from_tag(block.codec_seq)? {
            SequenceCodec::ConsensusDelta => decode_consensus_delta(&seq_raw, &lengths)?,
            SequenceCodec::Plain => split_by_lengths(&seq_raw, &lengths, "sequence")?,
        };

        let qual_raw = self.entropy_decode(&block.qual_stream)?;
        let qualities = decode_qualities(
            block.codec_qual,
            &qual_raw,
            &lengths,
            self.config.placeholder_quality,
        )?;

        let reads: Vec<ReadRecord> = ids
            .into_iter()
            .zip(sequences)
            .zip(qualities)
            .map(|((id, sequence), quality)| ReadRecord {
                id,
                sequence,
                quality,
            })
            .collect();

        if verify {
            let ids_kept = CodecFamily::from_tag(block.codec_ids)?.0 != CodecFamily::Discarded;
            let quality_mode = if CodecFamily::from_tag(block.codec_qual)?.0 == CodecFamily::Discarded {
                QualityMode::Discard
            } else {
                QualityMode::Lossless
            };
            let actual = block_checksum(&reads, ids_kept, quality_mode);
            if actual != block.checksum {
                return Err(Error::ChecksumMismatch {
                    block: block.block_id,
                    expected: block.checksum,
                    actual,
                });
            }
        }
        Ok(reads)
    }

    fn entropy_encode(&self, raw: &[u8]) -> Result<Vec<u8>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        self.codec.compress(raw)
    }

    fn entropy_decode(&self, stream: &[u8]) -> Result<Vec<u8>> {
        if stream.is_empty() {
            return Ok(Vec::new());
        }
        self.codec.decompress(stream)
    }

    // ── Consensus/delta encoding ───────────────────────────────────────────

    fn encode_consensus_delta(&mut self, reads: &[ReadRecord], cluster_starts: &[usize]) -> Vec<u8> {
        self.arena.clear();
        let mut members: Vec<Member> = Vec::with_capacity(reads.len());
        let mut current: Option<(ClusterId, usize)> = None;
        let mut anchor = 0i64;
        let mut forced = cluster_starts.iter().copied().peekable();

        for (i, read) in reads.iter().enumerate() {
            let mut boundary = false;
            while let Some(&start) = forced.peek() {
                if start > i {
                    break;
                }
                boundary |= start == i;
                forced.next();
            }

            let placement = match current {
                Some((cid, _)) if !boundary => {
                    let consensus = self.arena.get(cid);
                    if consensus.len() >= MAX_CONSENSUS_LEN {
                        None
                    } else {
                        find_best_alignment(&read.sequence, consensus.sequence(), anchor, &self.config.align)
                            .map(|a| (cid, a))
                    }
                }
                _ => None,
            };

            match (placement, current) {
                (Some((cid, alignment)), Some((_, first_member))) => {
                    let consensus = self.arena.get_mut(cid);
                    let prepended = consensus.add_read(&read.sequence, alignment.shift, alignment.strand);
                    consensus.recompute_consensus();
                    if prepended > 0 {
                        for m in &mut members[first_member..] {
                            m.shift += prepended as i64;
                        }
                    }
                    let shift = alignment.shift + prepended as i64;
                    members.push(Member {
                        cluster: cid,
                        shift,
                        strand: alignment.strand,
                    });
                    anchor = shift;
                }
                _ => {
                    let cid = self.arena.open(&read.sequence);
                    current = Some((cid, members.len()));
                    members.push(Member {
                        cluster: cid,
                        shift: 0,
                        strand: Strand::Forward,
                    });
                    anchor = 0;
                }
            }
        }

        let mut out = Vec::with_capacity(reads.len() * 8);
        put_varint(&mut out, self.arena.len() as u64);
        let mut at = 0;
        for (cid, consensus) in self.arena.iter() {
            let end = at + members[at..].iter().take_while(|m| m.cluster == cid).count();
            let reference = consensus.sequence();
            put_varint(&mut out, reference.len() as u64);
            out.extend_from_slice(reference);
            put_varint(&mut out, (end - at) as u64);
            let mut prev_shift = 0i64;
            for (member, read) in members[at..end].iter().zip(&reads[at..end]) {
                let delta = compute_delta(&read.sequence, reference, member.shift, member.strand);
                write_delta(&mut out, &delta, prev_shift);
                prev_shift = member.shift;
            }
            at = end;
        }
        self.arena.clear();
        out
    }
}

fn write_delta(out: &mut Vec<u8>, delta: &Delta, prev_shift: i64) {
    put_signed(out, delta.shift - prev_shift);
    out.push(delta.strand.as_u8());
    put_varint(out, delta.mismatches.len() as u64);
    let mut prev_pos = 0u32;
    for &(pos, code) in &delta.mismatches {
        put_varint(out, u64::from(pos - prev_pos));
        out.push(code);
        prev_pos = pos;
    }
    out.extend_from_slice(&delta.head);
    out.extend_from_slice(&delta.tail);
}

fn decode_consensus_delta(stream: &[u8], lengths: &[usize]) -> Result<Vec<Vec<u8>>> {
    let mut cur = ByteCursor::new(stream, "sequence stream");
    let clusters = cur.length(lengths.len())?;
    let mut out = Vec::with_capacity(lengths.len());
    for _ in 0..clusters {
        let clen = cur.length(MAX_CONSENSUS_LEN.max(stream.len()))?;
        let consensus = cur.bytes(clen)?;
        let members = cur.length(lengths.len() - out.len())?;
        let mut prev_shift = 0i64;
        for _ in 0..members {
            let length = lengths[out.len()];
            let shift = prev_shift
                .checked_add(cur.signed()?)
                .ok_or_else(|| Error::format("member shift overflows"))?;
            let strand = Strand::from_u8(cur.u8()?)?;
            let geo = WindowGeometry::new(shift, length, consensus.len());
            let mismatch_count = cur.length(geo.window_len)?;
            let mut mismatches = Vec::with_capacity(mismatch_count);
            let mut pos = 0u64;
            for _ in 0..mismatch_count {
                pos = pos
                    .checked_add(cur.varint()?)
                    .ok_or_else(|| Error::format("mismatch position overflows"))?;
                let code = cur.u8()?;
                if pos >= geo.window_len as u64 {
                    return Err(Error::format(format!(
                        "mismatch at {pos} outside {}-base window",
                        geo.window_len
                    )));
                }
                mismatches.push((pos as u32, code));
            }
            let delta = Delta {
                shift,
                strand,
                length,
                mismatches,
                head: cur.bytes(geo.head_len)?.to_vec(),
                tail: cur.bytes(geo.tail_len)?.to_vec(),
            };
            out.push(reconstruct_from_delta(&delta, consensus)?);
            prev_shift = shift;
        }
    }
    if out.len() != lengths.len() {
        return Err(Error::format(format!(
            "sequence stream decoded {} of {} reads",
            out.len(),
            lengths.len()
        )));
    }
    if !cur.is_empty() {
        return Err(Error::format(format!(
            "sequence stream has {} trailing bytes",
            cur.remaining()
        )));
    }
    Ok(out)
}

fn split_by_lengths(raw: &[u8], lengths: &[usize], what: &str) -> Result<Vec<Vec<u8>>> {
    let total: usize = lengths.iter().sum();
    if raw.len() != total {
        return Err(Error::format(format!(
            "{what} stream holds {} bytes for {total} bases",
            raw.len()
        )));
    }
    let mut at = 0;
    Ok(lengths
        .iter()
        .map(|&len| {
            let s = raw[at..at + len].to_vec();
            at += len;
            s
        })
        .collect())
}

// ── Lengths ────────────────────────────────────────────────────────────────

/// `(uniform_length, aux_stream)`: a shared non-zero length leaves the aux
/// stream empty; otherwise lengths are zigzag deltas from their predecessor.
pub fn encode_lengths(lengths: &[usize]) -> (u32, Vec<u8>) {
    if let Some(&first) = lengths.first() {
        if first > 0 && lengths.iter().all(|&l| l == first) {
            return (first as u32, Vec::new());
        }
    }
    let mut out = Vec::with_capacity(lengths.len());
    let mut prev = 0i64;
    for &len in lengths {
        put_signed(&mut out, len as i64 - prev);
        prev = len as i64;
    }
    (0, out)
}

pub fn decode_lengths(uniform: u32, aux: &[u8], count: usize) -> Result<Vec<usize>> {
    if uniform > 0 {
        return Ok(vec![uniform as usize; count]);
    }
    let mut cur = ByteCursor::new(aux, "aux stream");
    let mut lengths = Vec::with_capacity(count);
    let mut prev = 0i64;
    for i in 0..count {
        let len = match prev.checked_add(cur.signed()?) {
            Some(len) if len >= 0 => len,
            _ => return Err(Error::format(format!("read {i} has an invalid length"))),
        };
        lengths.push(len as usize);
        prev = len;
    }
    if !cur.is_empty() {
        return Err(Error::format("aux stream has trailing bytes"));
    }
    Ok(lengths)
}

/// XXH64 (seed 0) over ids, then sequences, then qualities as a reader will
/// see them, then the little-endian `u32` lengths. Discarded streams are
/// left out.
pub fn block_checksum(reads: &[ReadRecord], include_ids: bool, quality_mode: QualityMode) -> u64 {
    let mut hasher = Xxh64::new(0);
    if include_ids {
        for r in reads {
            hasher.update(r.id.as_bytes());
        }
    }
    for r in reads {
        hasher.update(&r.sequence);
    }
    if quality_mode != QualityMode::Discard {
        for r in reads {
            hasher.update(&logical_quality(&r.quality, quality_mode));
        }
    }
    for r in reads {
        hasher.update(&(r.len() as u32).to_le_bytes());
    }
    hasher.digest()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths_uniform_and_varying() {
        assert_eq!(encode_lengths(&[150, 150, 150]), (150, Vec::new()));
        let (uniform, aux) = encode_lengths(&[0, 0]);
        assert_eq!(uniform, 0);
        assert_eq!(decode_lengths(uniform, &aux, 2).unwrap(), vec![0, 0]);
        let varying = [100, 98, 150, 1];
        let (uniform, aux) = encode_lengths(&varying);
        assert_eq!(decode_lengths(uniform, &aux, 4).unwrap(), varying);
    }

    #[test]
    fn test_sequence_codec_selection() {
        let good = vec![ReadRecord::new("a", b"ACGTN".to_vec(), b"IIIII".to_vec())];
        let odd = vec![ReadRecord::new("a", b"ACGTR".to_vec(), b"IIIII".to_vec())];
        assert_eq!(SequenceCodec::select(ReadLengthClass::Short, &good), SequenceCodec::ConsensusDelta);
        assert_eq!(SequenceCodec::select(ReadLengthClass::Short, &odd), SequenceCodec::Plain);
        assert_eq!(SequenceCodec::select(ReadLengthClass::Long, &good), SequenceCodec::Plain);
    }
}
