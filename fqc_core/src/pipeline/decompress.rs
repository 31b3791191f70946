use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::block::{BlockCodecConfig, BlockCompressor, CompressedBlock};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::pipeline::backpressure::BackpressureController;
use crate::pipeline::config::DecompressionConfig;
use crate::pipeline::ordered::OrderedWriter;
use crate::pipeline::sink::{DecodedBlock, FastqSink};
use crate::pipeline::state::{CancelHandle, ErrorSlot, NodeState};
use crate::pipeline::{PipelineStats, ProgressCallback, ProgressInfo, ProgressReporter};
use crate::reader::ArchiveReader;
use crate::types::IdMode;
use crate::writer::temp_path_for;

type OutputSink = FastqSink<Box<dyn Write>>;

/// Archive in, FASTQ out.
pub struct DecompressionPipeline {
    config: DecompressionConfig,
    codec: Arc<dyn Codec>,
    handle: CancelHandle,
    progress: Option<ProgressCallback>,
    stats: PipelineStats,
}

impl DecompressionPipeline {
    /// `codec` must be the entropy backend the archive was written with.
    pub fn new(config: DecompressionConfig, codec: Arc<dyn Codec>) -> Self {
        Self {
            config,
            codec,
            handle: CancelHandle::new(),
            progress: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &DecompressionConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn state(&self) -> NodeState {
        self.handle.state()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Decodes `input` into FASTQ at `output` (`-` writes to stdout).
    pub fn run(&mut self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<PipelineStats> {
        self.config.validate()?;
        let (input, output) = (input.as_ref(), output.as_ref());
        self.tracked(|this| this.decompress_to(input, output))
    }

    /// Decodes every block and checks every checksum without writing output.
    pub fn verify(&mut self, input: impl AsRef<Path>) -> Result<PipelineStats> {
        self.config.validate()?;
        let input = input.as_ref();
        self.tracked(|this| {
            let mut reader = this.open(input)?;
            if !reader.global_checksum_matches()? {
                return Err(Error::format("global checksum does not match the block checksums"));
            }
            let blocks = 0..reader.block_count();
            let sink: OutputSink = FastqSink::new(Box::new(io::sink()));
            let (sink, stats) = this.run_stages(reader, blocks, sink, true)?;
            sink.finish()?;
            Ok(stats)
        })
    }

    fn tracked(&mut self, f: impl FnOnce(&mut Self) -> Result<PipelineStats>) -> Result<PipelineStats> {
        self.handle.reset();
        self.handle.set_state(NodeState::Running);
        let result = f(self);
        self.handle.set_state(match &result {
            Ok(_) => NodeState::Finished,
            Err(e) if e.is_cancelled() => NodeState::Cancelled,
            Err(_) => NodeState::Error,
        });
        if let Ok(stats) = &result {
            self.stats = *stats;
        }
        result
    }

    fn open(&self, input: &Path) -> Result<ArchiveReader> {
        let reader = ArchiveReader::open(input)?;
        let codec_id = reader.header().entropy_codec;
        if codec_id != self.codec.id() {
            return Err(Error::argument(format!(
                "archive uses entropy codec {codec_id}, but {} (id {}) was supplied",
                self.codec.name(),
                self.codec.id()
            )));
        }
        Ok(reader)
    }

    fn decompress_to(&mut self, input: &Path, output: &Path) -> Result<PipelineStats> {
        let reader = self.open(input)?;
        let header = reader.header().clone();
        let total = header.total_reads;

        let range = match self.config.read_range() {
            Some(r) if r.start >= total => {
                return Err(Error::argument(format!(
                    "read range starts at {} but the archive holds {total} reads",
                    r.start + 1
                )));
            }
            Some(r) => Some(r.start..r.end.min(total)),
            None => None,
        };
        let blocks = match &range {
            Some(r) => reader.blocks_for_range(r.clone()),
            None => 0..reader.block_count(),
        };

        let to_stdout = output.as_os_str() == "-";
        let tmp_path = temp_path_for(output);
        let out: Box<dyn Write> = if to_stdout {
            Box::new(BufWriter::with_capacity(1 << 20, io::stdout().lock()))
        } else {
            Box::new(BufWriter::with_capacity(1 << 20, File::create(&tmp_path)?))
        };

        let mut sink: OutputSink = FastqSink::new(out);
        if header.flags.id_mode == IdMode::Discard {
            sink = sink.with_generated_ids(self.config.id_prefix.clone());
        }
        if let Some(r) = range {
            sink = sink.with_range(r);
        }
        if self.config.header_only {
            sink = sink.with_header_only();
        }
        if self.config.original_order {
            match reader.reorder_map() {
                Some(map) => sink = sink.with_original_order(map),
                None if header.flags.preserve_order => {}
                None => {
                    if !to_stdout {
                        let _ = fs::remove_file(&tmp_path);
                    }
                    return Err(Error::argument(
                        "archive was reordered without storing a reorder map, original order is lost",
                    ));
                }
            }
        }

        let verify = self.config.verify_checksums;
        let finished = self
            .run_stages(reader, blocks, sink, verify)
            .and_then(|(sink, stats)| sink.finish().map(|out| (out, stats)));
        let (out, stats) = match finished {
            Ok(done) => done,
            Err(e) => {
                if !to_stdout {
                    let _ = fs::remove_file(&tmp_path);
                }
                return Err(e);
            }
        };
        drop(out);
        if !to_stdout {
            fs::rename(&tmp_path, output)?;
        }
        info!(
            reads = stats.total_reads,
            blocks = stats.total_blocks,
            bytes = stats.output_bytes,
            "fastq written"
        );
        Ok(stats)
    }

    fn run_stages(
        &mut self,
        mut reader: ArchiveReader,
        blocks: Range<usize>,
        sink: OutputSink,
        verify: bool,
    ) -> Result<(OutputSink, PipelineStats)> {
        let start = Instant::now();
        let cfg = self.config.clone();
        let threads = cfg.effective_threads();
        let input_bytes = reader.file_size();
        let total_reads: u64 = reader.entries()[blocks.clone()]
            .iter()
            .map(|e| u64::from(e.read_count))
            .sum();
        let block_count = blocks.len() as u64;

        let codec_config = BlockCodecConfig {
            placeholder_quality: cfg.placeholder_quality,
            ..BlockCodecConfig::default()
        };
        let codec = Arc::clone(&self.codec);
        let backpressure = BackpressureController::new(cfg.max_in_flight);
        let errors = ErrorSlot::default();
        let cancel = self.handle.clone();
        let mut ordered = OrderedWriter::starting_at(sink, blocks.start as u32);
        let mut progress = ProgressReporter::new(self.progress.as_mut(), cfg.progress_interval_ms);
        let mut reads_done = 0u64;

        debug!(threads, blocks = block_count, verify, "decompressing");

        thread::scope(|scope| {
            let backpressure = &backpressure;
            let errors = &errors;
            let cancel = &cancel;
            let skip_corrupted = cfg.skip_corrupted;

            let (result_tx, result_rx) = mpsc::sync_channel::<Result<DecodedBlock>>(cfg.max_in_flight);
            let mut worker_txs = Vec::with_capacity(threads);
            for _ in 0..threads {
                let (tx, rx) = mpsc::sync_channel::<CompressedBlock>(1);
                worker_txs.push(tx);
                let result_tx = result_tx.clone();
                let decoder = BlockCompressor::new(codec_config.clone(), Arc::clone(&codec));
                scope.spawn(move || {
                    while let Ok(block) = rx.recv() {
                        let result = match decoder.decompress(&block, verify) {
                            Ok(reads) => Ok(DecodedBlock {
                                block_id: block.block_id,
                                start_read_id: block.start_read_id,
                                reads,
                            }),
                            Err(e) if skip_corrupted => {
                                warn!(block = block.block_id, error = %e, "skipping corrupted block");
                                Ok(DecodedBlock {
                                    block_id: block.block_id,
                                    start_read_id: block.start_read_id,
                                    reads: Vec::new(),
                                })
                            }
                            Err(e) => Err(e),
                        };
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }

            // ── Reader stage ───────────────────────────────────────────────
            let skipped_tx = result_tx;
            scope.spawn(move || {
                let mut dispatched = 0usize;
                for idx in blocks {
                    if cancel.is_cancelled() || errors.is_set() || !backpressure.acquire() {
                        break;
                    }
                    match reader.read_block(idx) {
                        Ok(block) => {
                            let worker = &worker_txs[dispatched % worker_txs.len()];
                            dispatched += 1;
                            if worker.send(block).is_err() {
                                backpressure.release();
                                break;
                            }
                        }
                        Err(e) if skip_corrupted => {
                            warn!(block = idx, error = %e, "skipping unreadable block");
                            let entry = &reader.entries()[idx];
                            let placeholder = DecodedBlock {
                                block_id: idx as u32,
                                start_read_id: entry.archive_start,
                                reads: Vec::new(),
                            };
                            if skipped_tx.send(Ok(placeholder)).is_err() {
                                backpressure.release();
                                break;
                            }
                        }
                        Err(e) => {
                            backpressure.release();
                            errors.set(e);
                            break;
                        }
                    }
                }
                debug!(blocks = dispatched, "reader finished");
            });

            // ── Writer stage ───────────────────────────────────────────────
            for result in result_rx {
                backpressure.release();
                if errors.is_set() || cancel.is_cancelled() {
                    continue;
                }
                match result {
                    Ok(decoded) => {
                        reads_done += decoded.reads.len() as u64;
                        let current_block = decoded.block_id;
                        if let Err(e) = ordered.write_block(decoded) {
                            errors.set(e);
                            backpressure.shutdown();
                            continue;
                        }
                        let bytes_processed = ordered.sink().bytes_written();
                        let keep_going = progress.report(|| ProgressInfo {
                            reads_processed: reads_done,
                            total_reads,
                            bytes_processed,
                            current_block,
                            elapsed_ms: start.elapsed().as_millis() as u64,
                        });
                        if !keep_going {
                            cancel.cancel();
                            backpressure.shutdown();
                        }
                    }
                    Err(e) => {
                        errors.set(e);
                        backpressure.shutdown();
                    }
                }
            }
        });

        if let Some(err) = errors.take() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            info!("decompression cancelled");
            return Err(Error::Cancelled);
        }

        let sink = ordered.finalize()?;
        let stats = PipelineStats {
            total_reads: sink.reads_written(),
            total_blocks: block_count,
            input_bytes,
            output_bytes: sink.bytes_written(),
            processing_time_ms: start.elapsed().as_millis() as u64,
            threads_used: threads,
        };
        Ok((sink, stats))
    }
}
