use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.0";

/// Size of the chunks a file body is copied in.
pub const BUFFER_SIZE: usize = 8192;

pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::new();

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(&resp.body);

    buf
}

pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response),
            written: 0,
        }
    }

    /// Writes the serialized response. Each write must make progress within
    /// `per_write`.
    pub async fn write_to_stream<W>(
        &mut self,
        stream: &mut W,
        per_write: Duration,
    ) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while self.written < self.buffer.len() {
            let n = timeout(per_write, stream.write(&self.buffer[self.written..]))
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.written += n;
        }

        Ok(())
    }
}

/// Copies at most `len` bytes from `reader` to `writer` and returns how many
/// were copied. A source shorter than `len` ends the copy early.
pub async fn copy_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
    per_write: Duration,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = reader.take(len);
    let mut chunk = vec![0u8; BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        timeout(per_write, writer.write_all(&chunk[..n]))
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
        copied += n as u64;
    }

    timeout(per_write, writer.flush())
        .await
        .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;

    Ok(copied)
}
