use fqc_core::format::CODEC_ZSTD;
use fqc_core::types::{DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL, MIN_COMPRESSION_LEVEL};
use fqc_core::{Codec, Error, Result};

/// zstd level for each archive level 1..=9.
const LEVEL_MAP: [i32; 9] = [1, 3, 5, 7, 9, 12, 15, 17, 19];

/// Zstandard stream codec.
///
/// Every stream is an independent frame, so any block decodes without
/// touching its neighbours.
pub struct ZstdCodec {
    /// Native zstd level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::for_level(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    /// Maps an archive level (clamped to 1..=9) onto a zstd level.
    pub fn for_level(level: u8) -> Self {
        let level = level.clamp(MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL);
        Self::new(LEVEL_MAP[usize::from(level - 1)])
    }
}

impl Codec for ZstdCodec {
    fn id(&self) -> u16 {
        CODEC_ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        zstd::bulk::compress(raw, self.level).map_err(|e| Error::CompressionFailed(format!("zstd: {e}")))
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        // Frames carry their content size, so no size hint is needed.
        zstd::decode_all(compressed).map_err(|e| Error::DecompressionFailed(format!("zstd: {e}")))
    }
}
