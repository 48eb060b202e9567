//! RESP2 framing for talking to the decimal store.

use std::io;

use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Encodes a request the way clients send it: an array of bulk strings.
    pub fn command<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Frame::Array(Some(
            parts
                .into_iter()
                .map(|part| Frame::bulk(part.as_ref()))
                .collect(),
        ))
    }

    pub fn bulk(text: &str) -> Self {
        Frame::Bulk(Some(text.as_bytes().to_vec()))
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Simple(text) => push_line(out, b'+', text.as_bytes()),
            Frame::Error(text) => push_line(out, b'-', text.as_bytes()),
            Frame::Integer(value) => push_line(out, b':', value.to_string().as_bytes()),
            Frame::Bulk(None) => push_line(out, b'$', b"-1"),
            Frame::Bulk(Some(data)) => {
                push_line(out, b'$', data.len().to_string().as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(CRLF);
            }
            Frame::Array(None) => push_line(out, b'*', b"-1"),
            Frame::Array(Some(items)) => {
                push_line(out, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }
}

fn push_line(out: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    out.push(prefix);
    out.extend_from_slice(body);
    out.extend_from_slice(CRLF);
}

/// Reads one frame. Returns `Ok(None)` when the peer closed the stream
/// cleanly before the first byte of a frame.
pub fn read_frame<'a, R>(reader: &'a mut R) -> BoxFuture<'a, io::Result<Option<Frame>>>
where
    R: AsyncBufRead + Unpin + Send + 'a,
{
    async move {
        let Some(line) = read_line(reader).await? else {
            return Ok(None);
        };
        let (prefix, body) = match line.split_first() {
            Some((prefix, body)) => (*prefix, body),
            None => return Err(invalid_data("empty frame header")),
        };

        let frame = match prefix {
            b'+' => Frame::Simple(to_text(body)?),
            b'-' => Frame::Error(to_text(body)?),
            b':' => Frame::Integer(parse_number(body)?),
            b'$' => match parse_length(body)? {
                None => Frame::Bulk(None),
                Some(len) => {
                    let mut data = vec![0; len + CRLF.len()];
                    reader.read_exact(&mut data).await?;
                    if !data.ends_with(CRLF) {
                        return Err(invalid_data("bulk string missing terminator"));
                    }
                    data.truncate(len);
                    Frame::Bulk(Some(data))
                }
            },
            b'*' => match parse_length(body)? {
                None => Frame::Array(None),
                Some(len) => {
                    let mut items = Vec::with_capacity(len);
                    for _ in 0..len {
                        match read_frame(&mut *reader).await? {
                            Some(item) => items.push(item),
                            None => return Err(truncated()),
                        }
                    }
                    Frame::Array(Some(items))
                }
            },
            other => {
                return Err(invalid_data(format!(
                    "unknown frame prefix {:?}",
                    char::from(other)
                )));
            }
        };

        Ok(Some(frame))
    }
    .boxed()
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Encode the whole frame once so a request leaves in a single write.
    let mut encoded = Vec::new();
    frame.encode_into(&mut encoded);
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_line<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let bytes = reader.read_until(b'\n', &mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    if !line.ends_with(CRLF) {
        return Err(truncated());
    }
    line.truncate(line.len() - CRLF.len());
    Ok(Some(line))
}

fn parse_length(body: &[u8]) -> io::Result<Option<usize>> {
    match parse_number(body)? {
        -1 => Ok(None),
        len if len < 0 => Err(invalid_data(format!("negative length {len}"))),
        len => usize::try_from(len)
            .map(Some)
            .map_err(|_| invalid_data(format!("length {len} out of range"))),
    }
}

fn parse_number(body: &[u8]) -> io::Result<i64> {
    to_text(body)?
        .parse()
        .map_err(|_| invalid_data("malformed integer"))
}

fn to_text(body: &[u8]) -> io::Result<String> {
    String::from_utf8(body.to_vec()).map_err(|_| invalid_data("frame is not valid UTF-8"))
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-frame")
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}
