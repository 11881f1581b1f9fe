//! Per-connection read loop.

use std::io;
use std::sync::Arc;

use arca_protocol::{Base, CodecError, Response, RpcError, codec};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::connections::ConnectionRegistry;
use crate::server::RequestHandler;

enum Frame {
    Line,
    TooLarge(usize),
    Eof,
}

/// Read frames from `reader` until EOF or a socket error, replying to each
/// on `conn`. Deregisters and closes the connection on the way out.
pub(crate) async fn run<R, H>(
    conn: Arc<Connection>,
    reader: R,
    handler: Arc<H>,
    registry: Arc<ConnectionRegistry>,
    max_frame_bytes: usize,
) where
    R: AsyncRead + Unpin,
    H: RequestHandler,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        let reply = match read_frame(&mut reader, &mut line, max_frame_bytes).await {
            Ok(Frame::Line) => reply_for(&line, handler.as_ref()),
            Ok(Frame::TooLarge(len)) => {
                let err = CodecError::FrameTooLarge { len, limit: max_frame_bytes };
                warn!("Oversized frame from {}: {err}", conn.id);
                Some(parse_error(&err))
            }
            Ok(Frame::Eof) => break,
            Err(e) => {
                warn!("Read error for {}: {e}", conn.id);
                break;
            }
        };

        let Some(response) = reply else { continue };
        let frame = match codec::encode(&response) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping reply to {}: {e}", conn.id);
                continue;
            }
        };
        if let Err(e) = conn.send(&frame).await {
            warn!("Failed to send reply to {}: {e}", conn.id);
            break;
        }
    }

    registry.remove(conn.id);
    let _ = conn.shutdown().await;
    info!("Client disconnected: {} (total: {})", conn.id, registry.len());
}

fn reply_for<H: RequestHandler>(line: &[u8], handler: &H) -> Option<Response> {
    match codec::decode(line) {
        Ok(Some(request)) => {
            debug!("Request {} {}", request.id, request.method);
            handler.handle_request(request)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Parse error: {e}");
            Some(parse_error(&e))
        }
    }
}

fn parse_error(err: &CodecError) -> Response {
    Response::failure(Base::default(), RpcError::parse_error(err.to_string()))
}

/// Read one line into `buf`, never buffering more than `limit + 1` bytes.
/// The remainder of an oversized line is consumed and discarded.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let cap = (limit as u64).saturating_add(1);
    buf.clear();
    let read = (&mut *reader).take(cap).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.ends_with(b"\n") || buf.len() <= limit {
        return Ok(Frame::Line);
    }

    let mut total = read;
    loop {
        buf.clear();
        let read = (&mut *reader).take(cap).read_until(b'\n', buf).await?;
        total += read;
        if read == 0 || buf.ends_with(b"\n") {
            buf.clear();
            return Ok(Frame::TooLarge(total));
        }
    }
}
