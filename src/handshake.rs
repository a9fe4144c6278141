//! HTTP upgrade exchange that precedes SSTP on a connection.
//!
//! The client sends `SSTP_DUPLEX_POST <path> HTTP/1.1` plus headers; the
//! server answers 200 with an unbounded Content-Length and the stream turns
//! into raw SSTP. Anything else gets a 4xx and the connection is dropped.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::types::{Result, SstpError};

pub const SSTP_METHOD: &str = "SSTP_DUPLEX_POST";

/// Reply that switches the connection over to SSTP
pub const OK_RESPONSE: &str =
    "HTTP/1.1 200 OK\r\nServer: sstpd\r\nContent-Length: 18446744073709551615\r\n\r\n";

const MAX_REQUEST_HEAD: usize = 8 * 1024;
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Run the handshake on `io`, accepting only `path`.
///
/// Returns any bytes the client sent after the request head; they are the
/// start of the SSTP stream.
pub async fn accept<T>(io: &mut T, path: &str) -> Result<BytesMut>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);

    let head_len = loop {
        if let Some(pos) = find_terminator(&buf) {
            break pos + HEAD_TERMINATOR.len();
        }
        if buf.len() >= MAX_REQUEST_HEAD {
            return reject(io, 400, "request head too large").await;
        }
        if io.read_buf(&mut buf).await? == 0 {
            return Err(SstpError::PeerDisconnected);
        }
    };

    let head = buf.split_to(head_len);
    let request_line = head[..]
        .split(|&b| b == b'\n')
        .next()
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .unwrap_or_default();
    debug!("Handshake request: {}", request_line);

    let parts: Vec<&str> = request_line.split_ascii_whitespace().collect();
    let [method, target, version] = parts[..] else {
        return reject(io, 400, "malformed request line").await;
    };
    if !version.starts_with("HTTP/1.") {
        return reject(io, 400, "unsupported HTTP version").await;
    }
    if method != SSTP_METHOD {
        return reject(io, 405, "wrong method").await;
    }
    if target != path {
        return reject(io, 404, "wrong path").await;
    }

    io.write_all(OK_RESPONSE.as_bytes()).await?;
    io.flush().await?;
    debug!("Handshake accepted, {} bytes already buffered", buf.len());
    Ok(buf)
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

async fn reject<T>(io: &mut T, status: u16, reason: &str) -> Result<BytesMut>
where
    T: AsyncWrite + Unpin,
{
    warn!("Rejecting handshake with {}: {}", status, reason);
    io.write_all(rejection_response(status).as_bytes()).await?;
    io.flush().await?;
    Err(SstpError::Handshake {
        status,
        reason: reason.to_string(),
    })
}

fn rejection_response(status: u16) -> String {
    let (text, allow) = match status {
        404 => ("Not Found", ""),
        405 => ("Method Not Allowed", "Allow: SSTP_DUPLEX_POST\r\n"),
        _ => ("Bad Request", ""),
    };
    let body = format!("{} {}", status, text);
    format!(
        "HTTP/1.1 {} {}\r\n{}Server: sstpd\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
        status,
        text,
        allow,
        body.len(),
        body
    )
}
