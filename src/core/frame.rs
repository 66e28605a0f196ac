//! Length-prefixed framing for the worker socket.
//!
//! Every request and reply is one frame:
//!
//! ```text
//! +----------------+-----------------+
//! | length (u64 LE)| payload bytes   |
//! +----------------+-----------------+
//! ```
//!
//! A zero-length request frame asks the worker to shut down. The daemon uses
//! an equivalent `tokio-util` codec; these blocking helpers serve the CLI and tests.

use std::io::{self, Read, Write};

pub const FRAME_HEADER_LEN: usize = 8;

/// Default cap on a single frame (rendered images are the largest replies).
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    w.write_all(&(payload.len() as u64).to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Read one frame. `Ok(None)` means the peer closed the stream between frames.
pub fn read_frame<R: Read>(r: &mut R, max_len: usize) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u64::from_le_bytes(header);
    let len = usize::try_from(len)
        .ok()
        .filter(|&n| n <= max_len)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit of {max_len}"),
            )
        })?;

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_round_trip_back_to_back() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"ehello").unwrap();
        write_frame(&mut buf, b"").unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_frame(&mut r, 64).unwrap().unwrap(), b"ehello");
        assert_eq!(read_frame(&mut r, 64).unwrap().unwrap(), b"");
        assert!(read_frame(&mut r, 64).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[0u8; 32]).unwrap();
        let err = read_frame(&mut Cursor::new(buf), 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
