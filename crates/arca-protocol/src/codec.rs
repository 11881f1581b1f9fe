//! Newline-delimited JSON framing.
//!
//! One message per line. Empty lines are noise and decode to `None`.

use serde::Serialize;

use crate::jsonrpc::Request;

/// Frame-level failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Displays as the parser's own message; that text is sent to the peer.
    #[error("{0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Serialize `message` as a single line terminated by `\n`.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let mut frame = serde_json::to_vec(message).map_err(CodecError::Encode)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Decode one line into a request.
///
/// The line terminator (`\n` or `\r\n`) is optional. Returns `Ok(None)`
/// for a zero-length line.
pub fn decode(line: &[u8]) -> Result<Option<Request>, CodecError> {
    let line = trim_terminator(line);
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(CodecError::InvalidJson)
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
