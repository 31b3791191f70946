//! FASTQ record reading and writing.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{Error, Result};
use crate::types::ReadRecord;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const READ_BUFFER: usize = 1 << 20;

/// Streaming FASTQ parser over any buffered source.
pub struct FastqReader<R> {
    inner: R,
    line: Vec<u8>,
    records: u64,
    bytes: u64,
}

impl FastqReader<Box<dyn BufRead + Send>> {
    /// Opens `path`, decompressing transparently when it starts with the gzip magic.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let mut magic = [0u8; 2];
        let sniffed = read_up_to(&mut file, &mut magic)?;
        let file = File::open(path)?;
        let inner: Box<dyn BufRead + Send> = if sniffed == 2 && magic == GZIP_MAGIC {
            Box::new(BufReader::with_capacity(READ_BUFFER, MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::with_capacity(READ_BUFFER, file))
        };
        Ok(Self::new(inner))
    }
}

fn read_up_to(src: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::with_capacity(256),
            records: 0,
            bytes: 0,
        }
    }

    /// Records returned so far.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Uncompressed bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Next record, or `None` at a clean end of input.
    pub fn read_record(&mut self) -> Result<Option<ReadRecord>> {
        // Skip blank lines between records.
        loop {
            if !self.next_line()? {
                return Ok(None);
            }
            if !self.line.is_empty() {
                break;
            }
        }
        let record_no = self.records + 1;
        if self.line[0] != b'@' {
            return Err(Error::format(format!(
                "FASTQ record {record_no}: header does not start with '@'"
            )));
        }
        let id = String::from_utf8(self.line[1..].to_vec()).map_err(|_| {
            Error::format(format!("FASTQ record {record_no}: header is not valid UTF-8"))
        })?;

        if !self.next_line()? {
            return Err(truncated(record_no));
        }
        let sequence = self.line.clone();

        if !self.next_line()? {
            return Err(truncated(record_no));
        }
        if self.line.first() != Some(&b'+') {
            return Err(Error::format(format!(
                "FASTQ record {record_no}: missing '+' separator"
            )));
        }

        if !self.next_line()? {
            return Err(truncated(record_no));
        }
        let quality = self.line.clone();
        if quality.len() != sequence.len() {
            return Err(Error::format(format!(
                "FASTQ record {record_no}: sequence has {} bases but quality has {}",
                sequence.len(),
                quality.len()
            )));
        }

        self.records += 1;
        Ok(Some(ReadRecord {
            id,
            sequence,
            quality,
        }))
    }

    /// Reads one line into `self.line` without its terminator.
    fn next_line(&mut self) -> Result<bool> {
        self.line.clear();
        let n = self.inner.read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Ok(false);
        }
        self.bytes += n as u64;
        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        Ok(true)
    }
}

impl<R: BufRead> Iterator for FastqReader<R> {
    type Item = Result<ReadRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

fn truncated(record_no: u64) -> Error {
    Error::format(format!("FASTQ record {record_no}: truncated"))
}

/// Writes one record in four-line form.
pub fn write_record<W: Write>(out: &mut W, record: &ReadRecord) -> Result<()> {
    out.write_all(b"@")?;
    out.write_all(record.id.as_bytes())?;
    out.write_all(b"\n")?;
    out.write_all(&record.sequence)?;
    out.write_all(b"\n+\n")?;
    out.write_all(&record.quality)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Size of `record` as written by [`write_record`].
pub fn record_text_len(record: &ReadRecord) -> u64 {
    (record.id.len() + record.sequence.len() + record.quality.len() + 6) as u64
}

// ── Input profiling ────────────────────────────────────────────────────────

/// Summary from one counting pass over an input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputProfile {
    pub total_reads: u64,
    pub total_bases: u64,
    pub max_length: usize,
    /// Evenly spread length sample (first `sample` reads, then every n-th).
    pub length_sample: Vec<usize>,
    /// Uncompressed FASTQ bytes.
    pub input_bytes: u64,
}

impl InputProfile {
    pub fn median_length(&self) -> usize {
        if self.length_sample.is_empty() {
            return 0;
        }
        let mut sorted = self.length_sample.clone();
        sorted.sort_unstable();
        sorted[sorted.len() / 2]
    }

    pub fn average_length(&self) -> usize {
        if self.total_reads == 0 {
            0
        } else {
            (self.total_bases / self.total_reads) as usize
        }
    }
}

/// Counts reads and samples lengths from `path` without keeping records.
pub fn scan_fastq(path: impl AsRef<Path>, sample: usize) -> Result<InputProfile> {
    let mut reader = FastqReader::open(path)?;
    let mut profile = InputProfile::default();
    let sample = sample.max(1);
    let mut stride = 1u64;
    while let Some(record) = reader.read_record()? {
        let len = record.len();
        profile.total_bases += len as u64;
        profile.max_length = profile.max_length.max(len);
        if profile.total_reads % stride == 0 {
            profile.length_sample.push(len);
            if profile.length_sample.len() >= 2 * sample {
                // Halve the sample and double the stride to stay bounded.
                profile.length_sample = profile.length_sample.iter().step_by(2).copied().collect();
                stride *= 2;
            }
        }
        profile.total_reads += 1;
    }
    profile.input_bytes = reader.bytes_read();
    Ok(profile)
}
