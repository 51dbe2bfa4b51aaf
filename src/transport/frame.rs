use std::io::{self, Read, Write};

use super::TransportError;

/// `u32` payload length followed by `u32` sequence number, both little-endian.
pub const HEADER_LEN: usize = 8;

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u32,
    pub payload: Vec<u8>,
}

/// Writes a whole frame with a single `write_all`.
pub(crate) fn write_frame<W: Write>(
    writer: &mut W,
    seq: u32,
    payload: &[u8],
    max_len: usize,
) -> Result<(), TransportError> {
    if payload.len() > max_len {
        return Err(TransportError::FrameTooLarge {
            len: payload.len(),
            max: max_len,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.extend_from_slice(payload);

    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Incremental frame reader.
///
/// Bytes read so far are kept across calls, so a read timeout in the middle
/// of a frame does not lose framing; the next call picks up where the last
/// one stopped.
#[derive(Debug)]
pub struct FrameReader {
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameReader {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    /// Number of bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn take_buffered(&mut self) -> Result<Option<Frame>, TransportError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > self.max_len {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let seq = u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
        let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some(Frame { seq, payload }))
    }

    /// Reads until one complete frame is available.
    ///
    /// Returns `Ok(None)` when the peer closed the connection. Timeouts
    /// surface as [`TransportError::Io`] with a `WouldBlock`/`TimedOut` kind
    /// and keep any partial frame buffered.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Option<Frame>, TransportError> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(frame) = self.take_buffered()? {
                return Ok(Some(frame));
            }

            match reader.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }
}
