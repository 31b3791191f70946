#![allow(dead_code)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use fqc_core::fastq::{write_record, FastqReader};
use fqc_core::ReadRecord;

const BASES: &[u8; 4] = b"ACGT";

/// Small deterministic generator so test data never depends on an RNG crate.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

pub fn random_bases(rng: &mut Lcg, len: usize) -> Vec<u8> {
    (0..len).map(|_| BASES[rng.below(4)]).collect()
}

pub fn random_quality(rng: &mut Lcg, len: usize) -> Vec<u8> {
    (0..len).map(|_| b'#' + rng.below(40) as u8).collect()
}

/// `n` reads of `len` bases. Roughly every tenth read repeats an earlier one
/// with a couple of substitutions, and a few carry an `N`.
pub fn make_reads(n: usize, len: usize, seed: u64) -> Vec<ReadRecord> {
    let mut rng = Lcg::new(seed);
    let mut reads: Vec<ReadRecord> = Vec::with_capacity(n);
    for i in 0..n {
        let mut sequence = if i > 0 && rng.below(10) == 0 {
            let mut copy = reads[rng.below(i)].sequence.clone();
            for _ in 0..2 {
                let at = rng.below(len);
                copy[at] = BASES[rng.below(4)];
            }
            copy
        } else {
            random_bases(&mut rng, len)
        };
        if rng.below(50) == 0 {
            let at = rng.below(len);
            sequence[at] = b'N';
        }
        let quality = random_quality(&mut rng, len);
        reads.push(ReadRecord::new(format!("SRR042.{} {}/1", i + 1, i + 1), sequence, quality));
    }
    reads
}

pub fn write_fastq(path: &Path, reads: &[ReadRecord]) {
    let mut out = BufWriter::new(File::create(path).unwrap());
    for r in reads {
        write_record(&mut out, r).unwrap();
    }
    out.flush().unwrap();
}

pub fn read_fastq(path: &Path) -> Vec<ReadRecord> {
    FastqReader::open(path)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

pub fn sorted_by_id(mut reads: Vec<ReadRecord>) -> Vec<ReadRecord> {
    reads.sort_by(|a, b| a.id.cmp(&b.id));
    reads
}
