use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;

use tracing::{debug, info};

use crate::analyzer::{AnalyzerConfig, GlobalAnalyzer};
use crate::block::{BlockCodecConfig, BlockCompressor, CompressedBlock, ReadChunk};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::fastq::scan_fastq;
use crate::format::ArchiveFlags;
use crate::memory::{ChunkPlanner, MemoryBudget};
use crate::pipeline::backpressure::BackpressureController;
use crate::pipeline::config::CompressionConfig;
use crate::pipeline::ordered::OrderedWriter;
use crate::pipeline::source::{open_input, ChunkSource, ReorderedSource, StreamingSource};
use crate::pipeline::state::{CancelHandle, ErrorSlot, NodeState};
use crate::pipeline::{PipelineStats, ProgressCallback, ProgressInfo, ProgressReporter};
use crate::reorder_map::ReorderMapData;
use crate::types::{classify_read_length, ReadLengthClass, DEFAULT_PLACEHOLDER_QUALITY};
use crate::writer::{ArchiveOptions, ArchiveWriter};

/// Reads sampled to pick the read-length class.
const LENGTH_SAMPLE: usize = 10_000;

/// FASTQ in, archive out.
pub struct CompressionPipeline {
    config: CompressionConfig,
    codec: Arc<dyn Codec>,
    handle: CancelHandle,
    progress: Option<ProgressCallback>,
    stats: PipelineStats,
}

struct Prepared {
    source: Box<dyn ChunkSource>,
    class: ReadLengthClass,
    block_size: usize,
    reorder: bool,
    streaming: bool,
}

fn classify_sample(lengths: &[usize]) -> ReadLengthClass {
    let mut sorted = lengths.to_vec();
    sorted.sort_unstable();
    let median = sorted.get(sorted.len() / 2).copied().unwrap_or(0);
    let max = sorted.last().copied().unwrap_or(0);
    classify_read_length(median, max)
}

impl CompressionPipeline {
    pub fn new(config: CompressionConfig, codec: Arc<dyn Codec>) -> Self {
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

    pub fn config(&self) -> &CompressionConfig {
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

    /// Compresses `input` (a FASTQ path, gzip allowed, or `-` for stdin)
    /// into the archive at `output`.
    pub fn run(&mut self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<PipelineStats> {
        self.config.validate()?;
        self.handle.reset();
        self.handle.set_state(NodeState::Running);
        let result = self.run_inner(input.as_ref(), output.as_ref());
        self.handle.set_state(match &result {
            Ok(_) => NodeState::Finished,
            Err(e) if e.is_cancelled() => NodeState::Cancelled,
            Err(_) => NodeState::Error,
        });
        result
    }

    fn prepare(&self, input: &Path, threads: usize) -> Result<Prepared> {
        let cfg = &self.config;
        let streaming = cfg.streaming || input.as_os_str() == "-";

        if streaming {
            let class_default = cfg.read_length_class.unwrap_or_default();
            let mut source =
                StreamingSource::new(open_input(input)?, cfg.effective_block_size(class_default), cfg.max_block_bases);
            let class = match cfg.read_length_class {
                Some(class) => class,
                None => classify_sample(&source.sample_lengths(LENGTH_SAMPLE)?),
            };
            let block_size = cfg.effective_block_size(class);
            source.set_block_size(block_size);
            return Ok(Prepared {
                source: Box::new(source),
                class,
                block_size,
                reorder: false,
                streaming: true,
            });
        }

        let profile = scan_fastq(input, LENGTH_SAMPLE)?;
        let class = cfg
            .read_length_class
            .unwrap_or_else(|| classify_read_length(profile.median_length(), profile.max_length));
        let block_size = cfg.effective_block_size(class);
        info!(
            reads = profile.total_reads,
            bases = profile.total_bases,
            class = %class,
            block_size,
            "input scanned"
        );

        let reader = open_input(input)?;
        if !cfg.reorder_enabled(class) {
            return Ok(Prepared {
                source: Box::new(StreamingSource::new(reader, block_size, cfg.max_block_bases)),
                class,
                block_size,
                reorder: false,
                streaming: false,
            });
        }

        let budget = MemoryBudget::from_memory_limit(cfg.memory_limit_mb);
        budget.validate()?;
        let mut planner = ChunkPlanner::new(budget);
        if cfg.analysis_chunk_reads > 0 {
            planner = planner.with_max_chunk_reads(cfg.analysis_chunk_reads);
        }
        let plan = planner.plan_with_read_length(profile.total_reads, profile.average_length(), block_size, threads);
        info!(chunks = plan.num_chunks, reads = plan.total_reads, "analysis planned");

        let analyzer = GlobalAnalyzer::new(AnalyzerConfig::default())?;
        Ok(Prepared {
            source: Box::new(ReorderedSource::new(reader, analyzer, plan, block_size)?),
            class,
            block_size,
            reorder: true,
            streaming: false,
        })
    }

    fn run_inner(&mut self, input: &Path, output: &Path) -> Result<PipelineStats> {
        let start = Instant::now();
        let cfg = self.config.clone();
        let threads = cfg.effective_threads();
        let Prepared {
            source,
            class,
            block_size,
            reorder,
            streaming,
        } = self.prepare(input, threads)?;
        let total_reads = source.total_reads().unwrap_or(0);

        let writer = ArchiveWriter::create(
            output,
            ArchiveOptions {
                entropy_codec: self.codec.id(),
                flags: ArchiveFlags {
                    preserve_order: !reorder,
                    quality_mode: cfg.quality_mode,
                    id_mode: cfg.id_mode,
                    has_reorder_map: false,
                    length_class: class,
                    streaming,
                },
                block_size: block_size as u32,
                original_name: input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            },
        )?;

        let codec_config = BlockCodecConfig {
            length_class: class,
            quality_mode: cfg.quality_mode,
            id_mode: cfg.id_mode,
            align: cfg.align,
            placeholder_quality: DEFAULT_PLACEHOLDER_QUALITY,
        };
        let codec = Arc::clone(&self.codec);
        let backpressure = BackpressureController::new(cfg.max_in_flight);
        let errors = ErrorSlot::default();
        let cancel = self.handle.clone();
        let mut ordered = OrderedWriter::new(writer);
        let mut progress = ProgressReporter::new(self.progress.as_mut(), cfg.progress_interval_ms);
        let mut reads_done = 0u64;

        info!(threads, codec = codec.name(), reorder, "compressing");

        let reader_result: Result<(Option<ReorderMapData>, u64)> = thread::scope(|scope| {
            let backpressure = &backpressure;
            let errors = &errors;
            let cancel = &cancel;

            let (result_tx, result_rx) = mpsc::sync_channel::<Result<CompressedBlock>>(cfg.max_in_flight);
            let mut worker_txs = Vec::with_capacity(threads);
            for _ in 0..threads {
                let (tx, rx) = mpsc::sync_channel::<ReadChunk>(1);
                worker_txs.push(tx);
                let result_tx = result_tx.clone();
                let mut compressor = BlockCompressor::new(codec_config.clone(), Arc::clone(&codec));
                scope.spawn(move || {
                    while let Ok(chunk) = rx.recv() {
                        let result = compressor.compress(chunk);
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            // ── Reader stage ───────────────────────────────────────────────
            let reader = scope.spawn(move || -> Result<(Option<ReorderMapData>, u64)> {
                let mut source = source;
                let mut dispatched = 0usize;
                loop {
                    if cancel.is_cancelled() || errors.is_set() || !backpressure.acquire() {
                        break;
                    }
                    match source.next_chunk() {
                        Ok(Some(chunk)) => {
                            let worker = &worker_txs[dispatched % worker_txs.len()];
                            dispatched += 1;
                            if worker.send(chunk).is_err() {
                                backpressure.release();
                                break;
                            }
                        }
                        Ok(None) => {
                            backpressure.release();
                            break;
                        }
                        Err(e) => {
                            backpressure.release();
                            errors.set(e);
                            break;
                        }
                    }
                }
                drop(worker_txs);
                debug!(chunks = dispatched, "reader finished");
                let bytes = source.bytes_read();
                if cancel.is_cancelled() || errors.is_set() {
                    return Ok((None, bytes));
                }
                Ok((source.into_reorder_map()?, bytes))
            });

            // ── Writer stage ───────────────────────────────────────────────
            // Always drain the channel so workers never block on a full queue.
            for result in result_rx {
                backpressure.release();
                if errors.is_set() || cancel.is_cancelled() {
                    continue;
                }
                match result {
                    Ok(block) => {
                        reads_done += u64::from(block.read_count);
                        let current_block = block.block_id;
                        if let Err(e) = ordered.write_block(block) {
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

            reader
                .join()
                .unwrap_or_else(|_| Err(Error::Internal("reader stage panicked".into())))
        });

        let (reorder_map, input_bytes) = match reader_result {
            Ok(done) => done,
            Err(e) => {
                errors.set(e);
                (None, 0)
            }
        };
        if let Some(err) = errors.take() {
            ordered.into_sink().abort();
            return Err(err);
        }
        if cancel.is_cancelled() {
            ordered.into_sink().abort();
            info!("compression cancelled");
            return Err(Error::Cancelled);
        }

        let writer = ordered.finalize()?;
        let map = if cfg.save_reorder_map { reorder_map.as_ref() } else { None };
        let summary = writer.finalize(map)?;

        self.stats = PipelineStats {
            total_reads: summary.total_reads,
            total_blocks: u64::from(summary.block_count),
            input_bytes,
            output_bytes: summary.file_size,
            processing_time_ms: start.elapsed().as_millis() as u64,
            threads_used: threads,
        };
        info!(
            reads = summary.total_reads,
            blocks = summary.block_count,
            bytes = summary.file_size,
            reorder_map_bytes = summary.reorder_map_bytes,
            "archive written"
        );
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sample() {
        assert_eq!(classify_sample(&[]), ReadLengthClass::Short);
        assert_eq!(classify_sample(&[150, 150, 151]), ReadLengthClass::Short);
        assert_eq!(classify_sample(&[150, 600]), ReadLengthClass::Medium);
        assert_eq!(classify_sample(&[20_000]), ReadLengthClass::Long);
    }
}
