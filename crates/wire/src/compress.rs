//! zlib compression for the large raw frames (source text, target object
//! file, compressed candidate source) that accompany the JSON envelope
//! messages — the Rust analogue of the reference design's `zlib.compress` /
//! `zlib.decompress` calls.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::WireError;

/// Compress `data` at the default zlib compression level.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .expect("writing to an in-memory encoder cannot fail");
    encoder
        .finish()
        .expect("finishing an in-memory encoder cannot fail")
}

/// Decompress a zlib stream produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| WireError::Malformed(format!("bad zlib stream: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let data = b"int main(void) { return 0; }\n".repeat(50);
        let compressed = compress(&data);
        assert!(compressed.len() < data.len());
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn round_trips_empty_input() {
        let compressed = compress(&[]);
        let decompressed = decompress(&compressed).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn rejects_garbage_stream() {
        let err = decompress(b"not zlib data at all").unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));
    }
}
