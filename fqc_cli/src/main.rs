use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use fqc_codecs::{codec_by_id, codec_by_name};
use fqc_core::memory::{format_memory_size, parse_memory_size, DEFAULT_MEMORY_LIMIT_MB};
use fqc_core::types::{DEFAULT_COMPRESSION_LEVEL, DEFAULT_PLACEHOLDER_QUALITY};
use fqc_core::{
    ArchiveReader, CompressionConfig, CompressionPipeline, DecompressionConfig, DecompressionPipeline, IdMode,
    ProgressInfo, QualityMode, ReadLengthClass,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "fqc",
    about = "Reordering FASTQ compressor: compress, decompress, inspect, and verify FQC archives",
    version
)]
struct Cli {
    /// Log per-block detail
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a FASTQ file (plain or gzip) into an FQC archive
    Compress(CompressArgs),
    /// Decompress an FQC archive back to FASTQ
    Decompress(DecompressArgs),
    /// Print archive header and block index statistics
    Info {
        /// Archive to inspect
        archive: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
        /// Print machine-readable JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Decode every block and check every checksum
    Verify {
        /// Archive to verify
        archive: PathBuf,
        /// Worker threads (0 = all CPUs)
        #[arg(short, long, default_value_t = 0)]
        threads: usize,
    },
}

#[derive(Args)]
struct CompressArgs {
    /// Source FASTQ file ("-" reads stdin and implies --streaming)
    input: PathBuf,
    /// Destination archive
    output: PathBuf,
    /// Worker threads (0 = all CPUs)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
    /// Compression level, 1 (fast) to 9 (small)
    #[arg(short, long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    level: u8,
    /// Reads per block (0 = read-length class default)
    #[arg(long, default_value_t = 0)]
    block_size: usize,
    /// Memory budget for analysis, e.g. 512M or 8G
    #[arg(long)]
    memory: Option<String>,
    /// Quality mode: lossless | illumina8 | discard
    #[arg(long, default_value_t = QualityMode::Lossless)]
    quality: QualityMode,
    /// Read id mode: exact | tokenize | discard
    #[arg(long, default_value_t = IdMode::Exact)]
    ids: IdMode,
    /// Keep reads in input order
    #[arg(long)]
    no_reorder: bool,
    /// Single pass over the input, no reordering
    #[arg(long)]
    streaming: bool,
    /// Do not store the reorder map (original order becomes unrecoverable)
    #[arg(long)]
    no_reorder_map: bool,
    /// Entropy codec: zstd | lz4 | passthrough
    #[arg(short, long, default_value = "zstd")]
    codec: String,
    /// Read length class: auto | short | medium | long
    #[arg(long, default_value = "auto")]
    length_class: String,
    /// Overwrite an existing output file
    #[arg(short, long)]
    force: bool,
}

#[derive(Args)]
struct DecompressArgs {
    /// Source archive
    input: PathBuf,
    /// Destination FASTQ file ("-" writes to stdout)
    output: PathBuf,
    /// Worker threads (0 = all CPUs)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
    /// Restore the order reads had before compression
    #[arg(long, conflicts_with = "range")]
    original_order: bool,
    /// 1-based inclusive archive read range, e.g. 1000:2000, 500: or :100
    #[arg(long, value_parser = parse_range)]
    range: Option<(u64, u64)>,
    /// Emit nothing for blocks that fail to decode instead of aborting
    #[arg(long)]
    skip_corrupted: bool,
    /// Skip block checksum verification
    #[arg(long)]
    no_verify: bool,
    /// Quality character used when the archive discarded qualities
    #[arg(long, default_value_t = DEFAULT_PLACEHOLDER_QUALITY as char)]
    placeholder_qual: char,
    /// Prefix for generated ids when the archive discarded them
    #[arg(long, default_value = "")]
    id_prefix: String,
    /// Write only the header line of each read
    #[arg(long)]
    header_only: bool,
    /// Overwrite an existing output file
    #[arg(short, long)]
    force: bool,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn parse_range(text: &str) -> Result<(u64, u64), String> {
    let (start, end) = text
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got '{text}'"))?;
    let start = match start.trim() {
        "" => 1,
        s => s.parse().map_err(|_| format!("invalid range start '{s}'"))?,
    };
    let end = match end.trim() {
        "" => u64::MAX,
        s => s.parse().map_err(|_| format!("invalid range end '{s}'"))?,
    };
    Ok((start, end))
}

/// Refuses to replace an existing output unless `force` is set.
fn check_output(path: &Path, force: bool) -> fqc_core::Result<()> {
    if !force && path.as_os_str() != "-" && path.exists() {
        return Err(fqc_core::Error::argument(format!(
            "output {} already exists (use -f to overwrite)",
            path.display()
        )));
    }
    Ok(())
}

fn parse_length_class(text: &str) -> anyhow::Result<Option<ReadLengthClass>> {
    if text.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    Ok(Some(text.parse()?))
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn log_progress(info: &ProgressInfo) -> bool {
    debug!(
        reads = info.reads_processed,
        total = info.total_reads,
        block = info.current_block,
        percent = info.ratio() * 100.0,
        "progress"
    );
    true
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(args: CompressArgs) -> anyhow::Result<()> {
    check_output(&args.output, args.force)?;
    let memory_limit_mb = match &args.memory {
        Some(text) => parse_memory_size(text)?,
        None => DEFAULT_MEMORY_LIMIT_MB,
    };
    let config = CompressionConfig {
        threads: args.threads,
        memory_limit_mb,
        block_size: args.block_size,
        read_length_class: parse_length_class(&args.length_class)?,
        quality_mode: args.quality,
        id_mode: args.ids,
        level: args.level,
        enable_reorder: !args.no_reorder,
        save_reorder_map: !args.no_reorder_map,
        streaming: args.streaming,
        ..CompressionConfig::default()
    };
    let codec = codec_by_name(&args.codec, args.level)?;
    let codec_display = codec.name().to_string();

    let t0 = Instant::now();
    let mut pipeline = CompressionPipeline::new(config, codec).with_progress(Box::new(log_progress));
    let stats = pipeline
        .run(&args.input, &args.output)
        .with_context(|| format!("compressing {:?} into {:?}", args.input, args.output))?;
    let elapsed = t0.elapsed();

    eprintln!("  codec       : {} (level {})", codec_display, args.level);
    eprintln!("  memory      : {}", format_memory_size(memory_limit_mb));
    eprintln!("  threads     : {}", stats.threads_used);
    eprintln!("  reads       : {}", stats.total_reads);
    eprintln!("  blocks      : {}", stats.total_blocks);
    eprintln!("  raw size    : {}", human_bytes(stats.input_bytes));
    eprintln!("  compressed  : {}", human_bytes(stats.output_bytes));
    eprintln!("  ratio       : {:.2}x", stats.compression_ratio());
    eprintln!("  throughput  : {:.2} MB/s", stats.throughput_mbps());
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(args: DecompressArgs) -> anyhow::Result<()> {
    check_output(&args.output, args.force)?;
    if !args.placeholder_qual.is_ascii() {
        anyhow::bail!("placeholder quality '{}' is not an ASCII character", args.placeholder_qual);
    }
    let codec_id = ArchiveReader::open(&args.input)
        .with_context(|| format!("opening archive {:?}", args.input))?
        .header()
        .entropy_codec;
    let codec = codec_by_id(codec_id)?;

    let config = DecompressionConfig {
        threads: args.threads,
        range: args.range,
        original_order: args.original_order,
        verify_checksums: !args.no_verify,
        skip_corrupted: args.skip_corrupted,
        placeholder_quality: args.placeholder_qual as u8,
        id_prefix: args.id_prefix,
        header_only: args.header_only,
        ..DecompressionConfig::default()
    };

    let t0 = Instant::now();
    let mut pipeline = DecompressionPipeline::new(config, codec).with_progress(Box::new(log_progress));
    let stats = pipeline
        .run(&args.input, &args.output)
        .with_context(|| format!("decompressing {:?} into {:?}", args.input, args.output))?;
    let elapsed = t0.elapsed();

    eprintln!("  threads     : {}", stats.threads_used);
    eprintln!("  reads       : {}", stats.total_reads);
    eprintln!("  blocks      : {}", stats.total_blocks);
    eprintln!("  raw size    : {}", human_bytes(stats.output_bytes));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((stats.output_bytes as f64 / elapsed.as_secs_f64().max(1e-9)) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

#[derive(Debug, Serialize)]
struct FormatVersion {
    major: u8,
    minor: u8,
}

#[derive(Debug, Serialize)]
struct BlockSummary {
    index: usize,
    offset: u64,
    size: u64,
    reads: u32,
    /// 1-based archive id of the block's first read.
    first_read: u64,
}

/// Everything `info` reports, in either output format.
#[derive(Debug, Serialize)]
struct ArchiveSummary {
    file: String,
    version: FormatVersion,
    original_name: String,
    codec: String,
    codec_id: u16,
    reads: u64,
    block_size: u32,
    block_count: usize,
    length_class: String,
    quality_mode: String,
    id_mode: String,
    preserve_order: bool,
    has_reorder_map: bool,
    streaming: bool,
    block_bytes: u64,
    reorder_map_bytes: u64,
    file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocks: Option<Vec<BlockSummary>>,
}

impl ArchiveSummary {
    fn from_reader(archive: &Path, reader: &ArchiveReader, with_blocks: bool) -> Self {
        let header = reader.header();
        let codec = codec_by_id(header.entropy_codec)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let blocks = with_blocks.then(|| {
            reader
                .entries()
                .iter()
                .enumerate()
                .map(|(index, e)| BlockSummary {
                    index,
                    offset: e.offset,
                    size: u64::from(e.record_size),
                    reads: e.read_count,
                    first_read: e.archive_start + 1,
                })
                .collect()
        });
        Self {
            file: archive.display().to_string(),
            version: FormatVersion {
                major: header.version >> 4,
                minor: header.version & 0x0f,
            },
            original_name: reader.original_name().to_string(),
            codec,
            codec_id: header.entropy_codec,
            reads: reader.total_reads(),
            block_size: header.block_size,
            block_count: reader.block_count(),
            length_class: header.flags.length_class.to_string(),
            quality_mode: header.flags.quality_mode.to_string(),
            id_mode: header.flags.id_mode.to_string(),
            preserve_order: header.flags.preserve_order,
            has_reorder_map: header.flags.has_reorder_map,
            streaming: header.flags.streaming,
            block_bytes: reader.block_bytes(),
            reorder_map_bytes: reader.reorder_map_bytes(),
            file_size: reader.file_size(),
            blocks,
        }
    }

    fn print_text(&self) {
        println!("=== FQC Archive: {:?} ===", self.file);
        println!();
        println!("  format version : {}.{}", self.version.major, self.version.minor);
        println!("  original name  : {}", self.original_name);
        println!("  codec          : {} (id={})", self.codec, self.codec_id);
        println!("  reads          : {}", self.reads);
        println!("  block size     : {} reads", self.block_size);
        println!("  block count    : {}", self.block_count);
        println!("  length class   : {}", self.length_class);
        println!("  quality mode   : {}", self.quality_mode);
        println!("  id mode        : {}", self.id_mode);
        println!("  input order    : {}", on_off(self.preserve_order));
        println!("  reorder map    : {}", on_off(self.has_reorder_map));
        println!("  streaming      : {}", on_off(self.streaming));
        println!("  block data     : {}", human_bytes(self.block_bytes));
        println!("  map size       : {}", human_bytes(self.reorder_map_bytes));
        println!("  file on disk   : {}", human_bytes(self.file_size));

        if let Some(blocks) = &self.blocks {
            println!();
            println!(
                "  {:>8}  {:>14}  {:>12}  {:>10}  {:>14}",
                "block", "file offset", "size", "reads", "first read"
            );
            println!("  {}", "-".repeat(66));
            for b in blocks {
                println!(
                    "  {:>8}  {:>14}  {:>12}  {:>10}  {:>14}",
                    b.index,
                    b.offset,
                    human_bytes(b.size),
                    b.reads,
                    b.first_read
                );
            }
        }
    }
}

fn run_info(archive: PathBuf, show_blocks: bool, json: bool) -> anyhow::Result<()> {
    let reader = ArchiveReader::open(&archive).with_context(|| format!("opening archive {:?}", archive))?;
    let summary = ArchiveSummary::from_reader(&archive, &reader, show_blocks);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        summary.print_text();
    }
    Ok(())
}

fn run_verify(archive: PathBuf, threads: usize) -> anyhow::Result<()> {
    let codec_id = ArchiveReader::open(&archive)
        .with_context(|| format!("opening archive {:?}", archive))?
        .header()
        .entropy_codec;
    let codec = codec_by_id(codec_id)?;
    let config = DecompressionConfig {
        threads,
        ..DecompressionConfig::default()
    };

    let t0 = Instant::now();
    let stats = DecompressionPipeline::new(config, codec)
        .verify(&archive)
        .with_context(|| format!("verifying {:?}", archive))?;

    eprintln!("  status      : ok");
    eprintln!("  reads       : {}", stats.total_reads);
    eprintln!("  blocks      : {}", stats.total_blocks);
    eprintln!("  elapsed     : {:.3}s", t0.elapsed().as_secs_f64());
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Compress(args) => run_compress(args),
        Commands::Decompress(args) => run_decompress(args),
        Commands::Info { archive, blocks, json } => run_info(archive, blocks, json),
        Commands::Verify { archive, threads } => run_verify(archive, threads),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let cancelled = err
                .chain()
                .filter_map(|cause| cause.downcast_ref::<fqc_core::Error>())
                .any(fqc_core::Error::is_cancelled);
            eprintln!("Error: {err:?}");
            if cancelled {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("10:20").unwrap(), (10, 20));
        assert_eq!(parse_range(":5").unwrap(), (1, 5));
        assert_eq!(parse_range("7:").unwrap(), (7, u64::MAX));
        assert!(parse_range("7").is_err());
        assert!(parse_range("a:b").is_err());
    }

    #[test]
    fn test_parse_length_class() {
        assert_eq!(parse_length_class("auto").unwrap(), None);
        assert_eq!(parse_length_class("long").unwrap(), Some(ReadLengthClass::Long));
        assert!(parse_length_class("huge").is_err());
    }

    #[test]
    fn test_existing_output_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fqc");
        check_output(&path, false).unwrap();
        std::fs::write(&path, b"x").unwrap();

        let err = check_output(&path, false).unwrap_err();
        assert_eq!(err.kind(), fqc_core::ErrorKind::InvalidArgument);
        check_output(&path, true).unwrap();
        check_output(Path::new("-"), false).unwrap();

        let cli = Cli::try_parse_from(["fqc", "compress", "in.fastq", "out.fqc", "-f"]).unwrap();
        assert!(matches!(cli.command, Commands::Compress(ref a) if a.force));
        let cli = Cli::try_parse_from(["fqc", "decompress", "a.fqc", "out.fastq", "--header-only"]).unwrap();
        assert!(matches!(cli.command, Commands::Decompress(ref a) if a.header_only && !a.force));
    }

    #[test]
    fn test_info_json_summary() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq");
        let archive = dir.path().join("reads.fqc");
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!("@r{i}\nACGTACGTAC\n+\nIIIIIIIIII\n"));
        }
        std::fs::write(&input, text).unwrap();
        let config = CompressionConfig {
            threads: 2,
            block_size: 16,
            ..CompressionConfig::default()
        };
        CompressionPipeline::new(config, codec_by_name("zstd", 3).unwrap())
            .run(&input, &archive)
            .unwrap();

        let reader = ArchiveReader::open(&archive).unwrap();
        let brief = serde_json::to_value(ArchiveSummary::from_reader(&archive, &reader, false)).unwrap();
        assert_eq!(brief["reads"], 40);
        assert_eq!(brief["original_name"], "reads.fastq");
        assert_eq!(brief["codec"], "zstd");
        assert_eq!(brief["version"]["major"], 1);
        assert!(brief.get("blocks").is_none());

        let full = serde_json::to_value(ArchiveSummary::from_reader(&archive, &reader, true)).unwrap();
        let blocks = full["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), reader.block_count());
        assert_eq!(blocks[0]["first_read"], 1);

        let cli = Cli::try_parse_from(["fqc", "info", "a.fqc", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: true, blocks: false, .. }));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
