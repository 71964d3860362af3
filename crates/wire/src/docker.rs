//! Demultiplexing of a Docker attach-socket's interleaved stdout/stderr
//! stream, for when the evaluator sandbox runs as a container rather than a
//! bare subprocess.
//!
//! Each frame on the raw socket is prefixed with an 8-byte header:
//! `stream_id: u8` (1 = stdout, 2 = stderr), three zero bytes, then a
//! `u32_be` payload length. Stdout carries our own length-prefixed protocol
//! frames and is passed through untouched; stderr is the container's own
//! diagnostic output and is copied to the host's stderr with a prefix so it
//! shows up in logs without being mistaken for protocol data.

use std::io::{self, Read, Write};

use crate::error::WireError;

const STREAM_STDOUT: u8 = 1;
const STREAM_STDERR: u8 = 2;

/// Wraps a raw Docker attach-socket stream and exposes only the
/// demultiplexed stdout bytes as a plain `Read`, forwarding stderr chunks to
/// a sink (normally the host's real stderr) as they arrive.
pub struct DockerDemux<S, E> {
    inner: S,
    stderr_sink: E,
    pending_stdout: Vec<u8>,
}

impl<S: Read, E: Write> DockerDemux<S, E> {
    /// Wrap `inner`, sending demultiplexed stderr chunks to `stderr_sink`.
    pub fn new(inner: S, stderr_sink: E) -> Self {
        Self { inner, stderr_sink, pending_stdout: Vec::new() }
    }

    fn read_one_header_frame(&mut self) -> Result<bool, WireError> {
        let mut header = [0u8; 8];
        match self.inner.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(WireError::Io(e)),
        }
        let stream_id = header[0];
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload)?;

        match stream_id {
            STREAM_STDOUT => self.pending_stdout.extend_from_slice(&payload),
            STREAM_STDERR => {
                self.stderr_sink.write_all(b"docker stderr: ")?;
                self.stderr_sink.write_all(&payload)?;
                if !payload.ends_with(b"\n") {
                    self.stderr_sink.write_all(b"\n")?;
                }
                self.stderr_sink.flush()?;
            }
            other => {
                return Err(WireError::Malformed(format!(
                    "unknown docker attach stream id {other}"
                )))
            }
        }
        Ok(true)
    }
}

impl<S: Read, E: Write> Read for DockerDemux<S, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending_stdout.is_empty() {
            let more = self
                .read_one_header_frame()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            if !more {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.pending_stdout.len());
        buf[..n].copy_from_slice(&self.pending_stdout[..n]);
        self.pending_stdout.drain(..n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(stream_id: u8, len: u32) -> [u8; 8] {
        let mut h = [0u8; 8];
        h[0] = stream_id;
        h[4..8].copy_from_slice(&len.to_be_bytes());
        h
    }

    #[test]
    fn passes_stdout_through_and_reassembles_across_frames() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&header(STREAM_STDOUT, 5));
        raw.extend_from_slice(b"hello");
        raw.extend_from_slice(&header(STREAM_STDOUT, 6));
        raw.extend_from_slice(b" world");

        let mut demux = DockerDemux::new(Cursor::new(raw), Vec::new());
        let mut out = Vec::new();
        demux.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn routes_stderr_to_sink_and_skips_it_in_stdout() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&header(STREAM_STDERR, 7));
        raw.extend_from_slice(b"warning");
        raw.extend_from_slice(&header(STREAM_STDOUT, 2));
        raw.extend_from_slice(b"ok");

        let mut stderr_sink = Vec::new();
        let mut demux = DockerDemux::new(Cursor::new(raw), &mut stderr_sink);
        let mut out = Vec::new();
        demux.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ok");
        assert_eq!(stderr_sink, b"docker stderr: warning\n");
    }

    #[test]
    fn unknown_stream_id_is_an_error() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&header(9, 1));
        raw.push(b'x');
        let mut demux = DockerDemux::new(Cursor::new(raw), Vec::new());
        let mut out = Vec::new();
        assert!(demux.read_to_end(&mut out).is_err());
    }
}
