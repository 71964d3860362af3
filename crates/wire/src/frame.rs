//! Length-prefixed opaque byte frames: `u32_be length ‖ bytes[length]`.

use std::io::{Read, Write};

use crate::error::WireError;

/// Frames larger than this are rejected as a framing error rather than
/// causing an unbounded allocation from a hostile/corrupt length prefix.
pub const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// Write one length-prefixed frame and flush.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), WireError> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| WireError::Framing("frame too large to encode length".to_string()))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read one length-prefixed frame. An EOF while reading the length prefix
/// is reported as `std::io::ErrorKind::UnexpectedEof` (clean disconnect,
/// see `WireError::is_eof`); an EOF mid-payload is a genuine I/O error.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>, WireError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(WireError::Framing(format!(
            "frame length {len} exceeds max {MAX_FRAME_LEN}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world").unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let out = read_frame(&mut cursor).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn empty_stream_is_eof() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(err.is_eof());
    }
}
