//! Wire protocol utilities
//!
//! Requests travel as newline-terminated lines; responses travel as frames
//! of a 4-byte big-endian length followed by that many bytes.

use anyhow::Result;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ShareError;

/// Upper bound on a single request line
pub const MAX_LINE_LEN: usize = 1 << 20;

/// Upper bound on a single response frame
pub const MAX_FRAME_LEN: usize = 64 << 20;

/// Write one frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    encode_frame(&mut buf, payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the 4-byte length prefix of a frame
pub async fn read_frame_len<R: AsyncRead + Unpin>(reader: &mut R) -> Result<usize> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;
    Ok(u32::from_be_bytes(length_buf) as usize)
}

/// Read one complete frame, refusing anything above `max_len`
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let length = read_frame_len(reader).await?;
    if length > max_len {
        return Err(ShareError::network_error(format!("Frame of {} bytes exceeds limit of {}", length, max_len)).into());
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Read one frame and decode it as UTF-8 text
pub async fn read_text_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let payload = read_frame(reader, MAX_FRAME_LEN).await?;
    String::from_utf8(payload).map_err(|e| ShareError::network_error(format!("Response is not UTF-8: {}", e)).into())
}

/// Write a request line, appending the terminator
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// A request line as read off the connection
#[derive(Debug)]
pub enum RequestLine {
    Text(String),
    /// The line was consumed but cannot be a command
    Malformed(ShareError),
}

impl RequestLine {
    pub fn into_text(self) -> Result<String, ShareError> {
        match self {
            RequestLine::Text(text) => Ok(text),
            RequestLine::Malformed(e) => Err(e),
        }
    }
}

/// Skip input up to and including the next newline
async fn discard_rest_of_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<()> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Read one request line without its terminator, `None` on EOF.
///
/// Only I/O failures are errors. A line that is too long or not UTF-8 is
/// consumed whole and returned as `Malformed`, so the stream stays aligned
/// on the next line.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<RequestLine>> {
    let mut raw = Vec::new();
    let n = (&mut *reader).take(MAX_LINE_LEN as u64 + 1).read_until(b'\n', &mut raw).await?;
    if n == 0 {
        return Ok(None);
    }

    let terminated = raw.last() == Some(&b'\n');
    while matches!(raw.last(), Some(b'\n') | Some(b'\r')) {
        raw.pop();
    }
    if raw.len() > MAX_LINE_LEN {
        if !terminated {
            discard_rest_of_line(reader).await?;
        }
        let e = ShareError::argument_error(format!("Request line exceeds {} bytes", MAX_LINE_LEN));
        return Ok(Some(RequestLine::Malformed(e)));
    }

    Ok(Some(match String::from_utf8(raw) {
        Ok(text) => RequestLine::Text(text),
        Err(_) => RequestLine::Malformed(ShareError::argument_error("Request is not valid UTF-8")),
    }))
}

/// Take one complete frame off the front of the buffer
pub fn decode_frame(buf: &mut BytesMut) -> Option<Vec<u8>> {
    if buf.len() < 4 {
        return None;
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + length {
        return None;
    }

    let message = buf[4..4 + length].to_vec();
    buf.advance(4 + length);

    Some(message)
}

/// Append a frame to the buffer
pub fn encode_frame(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}
