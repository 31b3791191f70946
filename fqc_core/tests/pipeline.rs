mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{make_reads, random_bases, random_quality, write_fastq, Lcg};
use fqc_codecs::{PassThroughCodec, ZstdCodec};
use fqc_core::block::SequenceCodec;
use fqc_core::consensus::reverse_complement;
use fqc_core::memory::{ChunkPlanner, MemoryBudget};
use fqc_core::pipeline::source::open_input;
use fqc_core::pipeline::{
    BackpressureController, BlockSink, ChunkSource, DecodedBlock, FastqSink, OrderedWriter, ReorderedSource,
    Sequenced,
};
use fqc_core::quality::logical_quality;
use fqc_core::types::BlockId;
use fqc_core::{
    AnalyzerConfig, BlockCodecConfig, BlockCompressor, Codec, Error, ErrorKind, GlobalAnalyzer, IdMode, QualityMode,
    ReadChunk, ReadLengthClass, ReadRecord, Result,
};

// ── Backpressure ───────────────────────────────────────────────────────────

#[test]
fn test_backpressure_blocks_until_release() {
    let ctl = BackpressureController::new(2);
    assert!(ctl.acquire());
    assert!(ctl.try_acquire());
    assert!(!ctl.try_acquire());
    assert_eq!(ctl.in_flight(), 2);

    let acquired = AtomicBool::new(false);
    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let ok = ctl.acquire();
            acquired.store(true, Ordering::SeqCst);
            ok
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        ctl.release();
        assert!(waiter.join().unwrap());
    });
    assert!(acquired.load(Ordering::SeqCst));
    assert_eq!(ctl.in_flight(), 2);
}

#[test]
fn test_backpressure_shutdown_wakes_waiters() {
    let ctl = BackpressureController::new(1);
    assert!(ctl.acquire());
    thread::scope(|s| {
        let waiters: Vec<_> = (0..3).map(|_| s.spawn(|| ctl.acquire())).collect();
        thread::sleep(Duration::from_millis(20));
        ctl.shutdown();
        for w in waiters {
            assert!(!w.join().unwrap());
        }
    });
    assert!(ctl.is_shutdown());
    ctl.release();
    assert!(!ctl.try_acquire());
}

#[test]
fn test_backpressure_zero_capacity_still_admits_one() {
    let ctl = BackpressureController::new(0);
    assert_eq!(ctl.max_in_flight(), 1);
    assert!(ctl.try_acquire());
    assert!(!ctl.try_acquire());
    ctl.release();
    ctl.release();
    assert_eq!(ctl.in_flight(), 0);
}

// ── Ordered writer ─────────────────────────────────────────────────────────

#[derive(Debug)]
struct Item(BlockId);

impl Sequenced for Item {
    fn sequence_id(&self) -> BlockId {
        self.0
    }
}

#[derive(Default)]
struct Collect(Vec<BlockId>);

impl BlockSink<Item> for Collect {
    fn write_block(&mut self, item: Item) -> Result<()> {
        self.0.push(item.0);
        Ok(())
    }
}

struct Failing;

impl BlockSink<Item> for Failing {
    fn write_block(&mut self, _: Item) -> Result<()> {
        Err(Error::Internal("disk full".into()))
    }
}

#[test]
fn test_ordered_writer_restores_any_arrival_order() {
    let mut rng = Lcg::new(11);
    let mut arrival: Vec<BlockId> = (0..200).collect();
    for i in (1..arrival.len()).rev() {
        arrival.swap(i, rng.below(i + 1));
    }

    let mut writer = OrderedWriter::new(Collect::default());
    let mut persisted = 0;
    for id in arrival {
        persisted += writer.write_block(Item(id)).unwrap();
    }
    assert_eq!(persisted, 200);
    assert_eq!(writer.written(), 200);
    assert_eq!(writer.pending_len(), 0);
    assert_eq!(writer.next_expected(), 200);
    let sink = writer.finalize().unwrap();
    assert_eq!(sink.0, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_ordered_writer_starting_mid_sequence() {
    let mut writer = OrderedWriter::starting_at(Collect::default(), 5);
    assert_eq!(writer.write_block(Item(7)).unwrap(), 0);
    assert_eq!(writer.write_block(Item(6)).unwrap(), 0);
    assert_eq!(writer.pending_len(), 2);
    assert_eq!(writer.write_block(Item(5)).unwrap(), 3);
    assert_eq!(writer.sink().0, vec![5, 6, 7]);
}

#[test]
fn test_ordered_writer_finalize_flushes_past_gap() {
    let mut writer = OrderedWriter::new(Collect::default());
    writer.write_block(Item(0)).unwrap();
    writer.write_block(Item(3)).unwrap();
    writer.write_block(Item(2)).unwrap();
    assert_eq!(writer.next_expected(), 1);
    let sink = writer.finalize().unwrap();
    assert_eq!(sink.0, vec![0, 2, 3]);
}

#[test]
fn test_ordered_writer_propagates_sink_errors() {
    let mut writer = OrderedWriter::new(Failing);
    assert!(writer.write_block(Item(1)).is_ok());
    let err = writer.write_block(Item(0)).unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

#[test]
fn test_ordered_writer_rejects_repeated_ids() {
    let mut writer = OrderedWriter::new(Collect::default());
    writer.write_block(Item(0)).unwrap();
    writer.write_block(Item(2)).unwrap();

    let err = writer.write_block(Item(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    let err = writer.write_block(Item(2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    assert_eq!(writer.write_block(Item(1)).unwrap(), 2);
    assert_eq!(writer.pending_len(), 0);
    assert_eq!(writer.finalize().unwrap().0, vec![0, 1, 2]);
}

#[test]
fn test_ordered_writer_feeds_fastq_sink() {
    let reads = make_reads(30, 20, 4);
    let blocks: Vec<DecodedBlock> = reads
        .chunks(10)
        .enumerate()
        .map(|(i, chunk)| DecodedBlock {
            block_id: i as BlockId,
            start_read_id: (i * 10) as u64,
            reads: chunk.to_vec(),
        })
        .collect();

    let mut writer = OrderedWriter::new(FastqSink::new(Vec::new()));
    for block in blocks.into_iter().rev() {
        writer.write_block(block).unwrap();
    }
    let sink = writer.finalize().unwrap();
    assert_eq!(sink.reads_written(), 30);
    let text = sink.finish().unwrap();

    let mut expected = Vec::new();
    for r in &reads {
        fqc_core::fastq::write_record(&mut expected, r).unwrap();
    }
    assert_eq!(text, expected);
}

// ── Block codec ────────────────────────────────────────────────────────────

fn zstd() -> Arc<dyn Codec> {
    Arc::new(ZstdCodec::for_level(3))
}

fn chunk(id: BlockId, reads: Vec<ReadRecord>) -> ReadChunk {
    ReadChunk {
        chunk_id: id,
        start_read_id: u64::from(id) * 1000,
        reads,
        is_last: false,
        cluster_starts: Vec::new(),
    }
}

#[test]
fn test_block_roundtrip_short_reads() {
    let reads = make_reads(400, 100, 21);
    let mut compressor = BlockCompressor::new(BlockCodecConfig::default(), zstd());
    let block = compressor.compress(chunk(3, reads.clone())).unwrap();

    assert_eq!(block.block_id, 3);
    assert_eq!(block.read_count, 400);
    assert_eq!(block.start_read_id, 3000);
    assert_eq!(block.uniform_read_length, 100);
    assert!(block.aux_stream.is_empty());
    assert_eq!(block.codec_seq, SequenceCodec::ConsensusDelta.tag());
    assert_eq!(compressor.decompress(&block, true).unwrap(), reads);
}

#[test]
fn test_block_forced_cluster_starts_roundtrip() {
    let reads = make_reads(200, 80, 22);
    let mut compressor = BlockCompressor::new(BlockCodecConfig::default(), zstd());
    let mut c = chunk(0, reads.clone());
    c.cluster_starts = vec![0, 1, 50, 51, 199];
    let block = compressor.compress(c).unwrap();
    assert_eq!(compressor.decompress(&block, true).unwrap(), reads);
}

#[test]
fn test_block_compressor_is_reusable() {
    let mut compressor = BlockCompressor::new(BlockCodecConfig::default(), zstd());
    for seed in 0..4 {
        let reads = make_reads(120, 60, 100 + seed);
        let block = compressor.compress(chunk(seed as BlockId, reads.clone())).unwrap();
        assert_eq!(compressor.decompress(&block, true).unwrap(), reads);
    }
}

#[test]
fn test_block_plain_path_for_long_class_and_odd_bases() {
    let mut reads = make_reads(50, 120, 23);
    let config = BlockCodecConfig {
        length_class: ReadLengthClass::Long,
        ..BlockCodecConfig::default()
    };
    let mut long = BlockCompressor::new(config, zstd());
    let block = long.compress(chunk(0, reads.clone())).unwrap();
    assert_eq!(block.codec_seq, SequenceCodec::Plain.tag());
    assert_eq!(long.decompress(&block, true).unwrap(), reads);

    reads[7].sequence[3] = b'R';
    let mut short = BlockCompressor::new(BlockCodecConfig::default(), zstd());
    let block = short.compress(chunk(0, reads.clone())).unwrap();
    assert_eq!(block.codec_seq, SequenceCodec::Plain.tag());
    assert_eq!(short.decompress(&block, true).unwrap(), reads);
}

#[test]
fn test_block_variable_lengths_use_aux_stream() {
    let mut reads = make_reads(60, 90, 24);
    for (i, r) in reads.iter_mut().enumerate() {
        let keep = 40 + i % 50;
        r.sequence.truncate(keep);
        r.quality.truncate(keep);
    }
    reads[10].sequence.clear();
    reads[10].quality.clear();

    let mut compressor = BlockCompressor::new(BlockCodecConfig::default(), Arc::new(PassThroughCodec));
    let block = compressor.compress(chunk(0, reads.clone())).unwrap();
    assert_eq!(block.uniform_read_length, 0);
    assert!(!block.aux_stream.is_empty());
    assert_eq!(compressor.decompress(&block, true).unwrap(), reads);
}

/// Overlapping fragments of one small genome in start order, the layout
/// reordering hands to the block compressor. The first fragment starts
/// inside the genome so the next ones extend the consensus to the left.
fn genome_fragments(count: usize, seed: u64) -> Vec<ReadRecord> {
    let mut rng = Lcg::new(seed);
    let genome = random_bases(&mut rng, 3000);
    let mut spans: Vec<(usize, usize)> = (0..count)
        .map(|_| {
            let len = 60 + rng.below(91);
            (rng.below(genome.len() - len + 1), len)
        })
        .collect();
    spans.sort_unstable();
    spans.insert(0, (25, 100));

    let mut reads = Vec::with_capacity(spans.len() + count / 150);
    for (i, (start, len)) in spans.into_iter().enumerate() {
        if i > 0 && i % 150 == 0 {
            reads.push(ReadRecord::new(format!("frag.{i}.empty"), Vec::new(), Vec::new()));
        }
        let mut sequence = genome[start..start + len].to_vec();
        if rng.below(2) == 0 {
            sequence = reverse_complement(&sequence);
        }
        if rng.below(20) == 0 {
            let at = rng.below(len);
            sequence[at] = b'N';
        }
        let quality = random_quality(&mut rng, len);
        reads.push(ReadRecord::new(format!("frag.{i}"), sequence, quality));
    }
    reads
}

#[test]
fn test_block_overlapping_fragments_join_clusters() {
    let reads = genome_fragments(1500, 27);
    let bases: usize = reads.iter().map(ReadRecord::len).sum();
    assert!(reads.iter().any(|r| r.is_empty()));

    let mut compressor = BlockCompressor::new(BlockCodecConfig::default(), Arc::new(PassThroughCodec));
    let block = compressor.compress(chunk(0, reads.clone())).unwrap();
    assert_eq!(block.codec_seq, SequenceCodec::ConsensusDelta.tag());
    assert_eq!(block.uniform_read_length, 0);
    assert_eq!(compressor.decompress(&block, true).unwrap(), reads);

    // Members cost a few bytes each once they join a shared consensus.
    assert!(
        block.seq_stream.len() * 4 < bases,
        "{} sequence bytes for {bases} bases",
        block.seq_stream.len()
    );

    let mut zstd_blocks = BlockCompressor::new(BlockCodecConfig::default(), zstd());
    let block = zstd_blocks.compress(chunk(1, reads.clone())).unwrap();
    assert_eq!(zstd_blocks.decompress(&block, true).unwrap(), reads);
}

#[test]
fn test_block_checksum_mismatch_detected() {
    let reads = make_reads(100, 50, 25);
    let mut compressor = BlockCompressor::new(BlockCodecConfig::default(), Arc::new(PassThroughCodec));
    let mut block = compressor.compress(chunk(9, reads.clone())).unwrap();
    block.qual_stream[0] ^= 0x01;

    match compressor.decompress(&block, true) {
        Err(Error::ChecksumMismatch { block: id, expected, actual }) => {
            assert_eq!(id, 9);
            assert_ne!(expected, actual);
        }
        other => panic!("expected checksum mismatch, got {other:?}"),
    }
    let decoded = compressor.decompress(&block, false).unwrap();
    assert_eq!(decoded.len(), reads.len());
    assert_ne!(decoded[0].quality, reads[0].quality);
}

#[test]
fn test_block_lossy_modes() {
    let reads = make_reads(80, 40, 26);

    let binned = BlockCodecConfig {
        quality_mode: QualityMode::Illumina8,
        ..BlockCodecConfig::default()
    };
    let mut compressor = BlockCompressor::new(binned, zstd());
    let block = compressor.compress(chunk(0, reads.clone())).unwrap();
    let decoded = compressor.decompress(&block, true).unwrap();
    for (d, r) in decoded.iter().zip(&reads) {
        assert_eq!(d.id, r.id);
        assert_eq!(d.sequence, r.sequence);
        assert_eq!(d.quality, logical_quality(&r.quality, QualityMode::Illumina8).into_owned());
    }

    let stripped = BlockCodecConfig {
        quality_mode: QualityMode::Discard,
        id_mode: IdMode::Discard,
        placeholder_quality: b'#',
        ..BlockCodecConfig::default()
    };
    let mut compressor = BlockCompressor::new(stripped, zstd());
    let block = compressor.compress(chunk(0, reads.clone())).unwrap();
    assert!(block.qual_stream.is_empty());
    let decoded = compressor.decompress(&block, true).unwrap();
    for (d, r) in decoded.iter().zip(&reads) {
        assert!(d.id.is_empty());
        assert_eq!(d.sequence, r.sequence);
        assert_eq!(d.quality, vec![b'#'; r.len()]);
    }
}

#[test]
fn test_block_empty_chunk() {
    let mut compressor = BlockCompressor::new(BlockCodecConfig::default(), zstd());
    let mut c = chunk(0, Vec::new());
    c.is_last = true;
    let block = compressor.compress(c).unwrap();
    assert_eq!(block.read_count, 0);
    assert!(block.is_last);
    assert!(compressor.decompress(&block, true).unwrap().is_empty());
}

// ── Reordered source ───────────────────────────────────────────────────────

fn drain(source: &mut ReorderedSource) -> Result<Vec<ReadChunk>> {
    let mut chunks = Vec::new();
    while let Some(chunk) = source.next_chunk()? {
        chunks.push(chunk);
    }
    Ok(chunks)
}

#[test]
fn test_reordered_source_follows_planned_block_ids() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("reads.fastq");
    write_fastq(&input, &make_reads(300, 80, 28));
    let plan = ChunkPlanner::new(MemoryBudget::default())
        .with_max_chunk_reads(100)
        .plan(300, 50, 1);
    let offsets: Vec<u32> = plan.chunks.iter().map(|c| c.block_id_offset).collect();
    assert_eq!(offsets, vec![0, 2, 4]);
    let analyzer = || GlobalAnalyzer::new(AnalyzerConfig::default()).unwrap();

    let mut source = ReorderedSource::new(open_input(&input).unwrap(), analyzer(), plan.clone(), 50).unwrap();
    let chunks = drain(&mut source).unwrap();
    let ids: Vec<u32> = chunks.iter().map(|c| c.chunk_id).collect();
    assert_eq!(ids, (0..6).collect::<Vec<_>>());
    assert!(chunks.last().unwrap().is_last);

    // Cutting 40-read blocks yields three blocks for the first chunk, which
    // no longer lines up with the plan.
    let mut source = ReorderedSource::new(open_input(&input).unwrap(), analyzer(), plan, 40).unwrap();
    let err = drain(&mut source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}
