use crate::error::Result;

/// General-purpose entropy backend applied to every non-empty block stream.
///
/// Implementations live in `fqc_codecs`. The archive header stores
/// [`Codec::id`], so a reader can resolve the matching backend before
/// decoding any block.
pub trait Codec: Send + Sync {
    /// Stable numeric id written into the global header.
    fn id(&self) -> u16;

    /// Short human-readable name (e.g. "zstd", "lz4").
    fn name(&self) -> &'static str;

    /// Compress one stream. Must be deterministic for identical input.
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Decompress one stream produced by [`Codec::compress`].
    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>>;
}
