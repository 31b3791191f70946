use fqc_core::format::CODEC_PASSTHROUGH;
use fqc_core::{Codec, Result};

/// Stores streams verbatim.
///
/// Handy for inspecting raw stream layouts and for checking the archive
/// round trip independently of any entropy coder.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn id(&self) -> u16 {
        CODEC_PASSTHROUGH
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}
