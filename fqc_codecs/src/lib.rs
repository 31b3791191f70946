mod lz4_codec;
mod passthrough;
mod zstd_codec;

pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use zstd_codec::ZstdCodec;

use fqc_core::format::{CODEC_LZ4, CODEC_PASSTHROUGH, CODEC_ZSTD};
use fqc_core::{Codec, Error, Result};
use std::sync::Arc;

/// Names accepted by [`codec_by_name`].
pub const CODEC_NAMES: [&str; 3] = ["zstd", "lz4", "passthrough"];

/// Resolve a codec from the `entropy_codec` id in an archive header.
///
/// Decoding never depends on the level, so zstd comes back at its default.
pub fn codec_by_id(id: u16) -> Result<Arc<dyn Codec>> {
    match id {
        CODEC_PASSTHROUGH => Ok(Arc::new(PassThroughCodec)),
        CODEC_ZSTD => Ok(Arc::new(ZstdCodec::default())),
        CODEC_LZ4 => Ok(Arc::new(Lz4Codec)),
        _ => Err(Error::format(format!(
            "unknown entropy codec id {id}; supported: 0 (passthrough), 1 (zstd), 2 (lz4)"
        ))),
    }
}

/// Resolve a codec by name for compression at archive level `level` (1-9).
pub fn codec_by_name(name: &str, level: u8) -> Result<Arc<dyn Codec>> {
    match name.to_ascii_lowercase().as_str() {
        "zstd" => Ok(Arc::new(ZstdCodec::for_level(level))),
        "lz4" => Ok(Arc::new(Lz4Codec)),
        "passthrough" | "none" => Ok(Arc::new(PassThroughCodec)),
        other => Err(Error::argument(format!(
            "unknown codec '{other}'; expected one of {}",
            CODEC_NAMES.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"@r1\nACGTACGTACGTACGTACGT\n+\nIIIIIIIIIIIIIIIIIIII\n";

    #[test]
    fn test_every_codec_roundtrips() {
        for name in CODEC_NAMES {
            let codec = codec_by_name(name, 5).unwrap();
            let packed = codec.compress(SAMPLE).unwrap();
            assert_eq!(codec.decompress(&packed).unwrap(), SAMPLE, "{name}");
            let by_id = codec_by_id(codec.id()).unwrap();
            assert_eq!(by_id.name(), codec.name());
        }
    }

    #[test]
    fn test_unknown_codecs_rejected() {
        assert!(codec_by_id(99).is_err());
        assert!(codec_by_name("brotli", 5).is_err());
    }

    #[test]
    fn test_corrupt_input_is_an_error() {
        let codec = codec_by_name("zstd", 5).unwrap();
        let err = codec.decompress(b"definitely not zstd").unwrap_err();
        assert_eq!(err.kind(), fqc_core::ErrorKind::DecompressionFailed);
        let lz4 = codec_by_name("lz4", 5).unwrap();
        assert!(lz4.decompress(&[10, 0, 0, 0, 0xf0]).is_err());
    }
}
