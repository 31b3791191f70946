//! Quality string stream.

use std::borrow::Cow;

use crate::error::{Error, Result};
use crate::format::CodecFamily;
use crate::types::QualityMode;

const VERSION: u8 = 1;
const PHRED_OFFSET: u8 = 33;

/// Upper bounds (exclusive) of the Illumina 8-level bins, in Phred.
pub const ILLUMINA8_BOUNDARIES: [u8; 8] = [2, 10, 20, 25, 30, 35, 40, 94];
/// Phred value each bin decodes to.
pub const ILLUMINA8_REPRESENTATIVES: [u8; 8] = [0, 6, 15, 22, 27, 33, 37, 40];

#[inline]
pub fn illumina8_bin(phred: u8) -> u8 {
    ILLUMINA8_BOUNDARIES
        .iter()
        .position(|&bound| phred < bound)
        .unwrap_or(7) as u8
}

#[inline]
fn bin_to_char(bin: u8) -> u8 {
    ILLUMINA8_REPRESENTATIVES[usize::from(bin.min(7))] + PHRED_OFFSET
}

/// The quality string a reader will see after decoding under `mode`.
pub fn logical_quality(quality: &[u8], mode: QualityMode) -> Cow<'_, [u8]> {
    match mode {
        QualityMode::Lossless => Cow::Borrowed(quality),
        QualityMode::Illumina8 => Cow::Owned(
            quality
                .iter()
                .map(|&c| bin_to_char(illumina8_bin(c.saturating_sub(PHRED_OFFSET))))
                .collect(),
        ),
        QualityMode::Discard => Cow::Borrowed(&[]),
    }
}

pub fn encode_qualities<'a>(qualities: impl Iterator<Item = &'a [u8]>, mode: QualityMode) -> (u8, Vec<u8>) {
    match mode {
        QualityMode::Lossless => (CodecFamily::Raw.tag(VERSION), qualities.flatten().copied().collect()),
        QualityMode::Illumina8 => (
            CodecFamily::Binned.tag(VERSION),
            qualities
                .flatten()
                .map(|&c| illumina8_bin(c.saturating_sub(PHRED_OFFSET)))
                .collect(),
        ),
        QualityMode::Discard => (CodecFamily::Discarded.tag(VERSION), Vec::new()),
    }
}

/// Decodes one quality string per entry of `lengths`.
pub fn decode_qualities(tag: u8, stream: &[u8], lengths: &[usize], placeholder: u8) -> Result<Vec<Vec<u8>>> {
    let (family, _) = CodecFamily::from_tag(tag)?;
    if family == CodecFamily::Discarded {
        return Ok(lengths.iter().map(|&len| vec![placeholder; len]).collect());
    }
    let total: usize = lengths.iter().sum();
    if stream.len() != total {
        return Err(Error::format(format!(
            "quality stream holds {} values for {} bases",
            stream.len(),
            total
        )));
    }
    let mut out = Vec::with_capacity(lengths.len());
    let mut at = 0;
    for &len in lengths {
        let slice = &stream[at..at + len];
        at += len;
        out.push(match family {
            CodecFamily::Raw => slice.to_vec(),
            CodecFamily::Binned => {
                if let Some(&bad) = slice.iter().find(|&&b| b > 7) {
                    return Err(Error::format(format!("quality bin {bad} out of range")));
                }
                slice.iter().map(|&b| bin_to_char(b)).collect()
            }
            other => return Err(Error::format(format!("{other:?} is not a quality codec"))),
        });
    }
    Ok(out)
}
