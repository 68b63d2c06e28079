use std::io::Cursor;

use bytes::{Buf, Bytes};

/// A single RESP v2 wire frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not enough buffered bytes to decide yet.
    #[error("incomplete frame")]
    Incomplete,
    /// Malformed input. The connection must be closed by the consumer.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Frame {
    /// Validates that one complete frame is buffered, without materializing
    /// it. On success the cursor sits just past the frame.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), FrameError> {
        match get_u8(src)? {
            b'+' | b'-' => {
                get_line(src)?;
                Ok(())
            }
            b':' => {
                get_decimal(src)?;
                Ok(())
            }
            b'$' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(());
                }
                if len < 0 {
                    return Err(FrameError::Protocol(format!("invalid bulk length {}", len)));
                }
                skip(src, len as usize + 2)
            }
            b'*' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(());
                }
                if len < 0 {
                    return Err(FrameError::Protocol(format!("invalid array length {}", len)));
                }
                for _ in 0..len {
                    Frame::check(src)?;
                }
                Ok(())
            }
            actual => Err(FrameError::Protocol(format!(
                "invalid frame prefix byte {:#04x}",
                actual
            ))),
        }
    }

    /// Materializes a frame previously validated by `check`.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, FrameError> {
        match get_u8(src)? {
            b'+' => Ok(Frame::Simple(line_to_string(get_line(src)?)?)),
            b'-' => Ok(Frame::Error(line_to_string(get_line(src)?)?)),
            b':' => Ok(Frame::Integer(get_decimal(src)?)),
            b'$' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                if len < 0 {
                    return Err(FrameError::Protocol(format!("invalid bulk length {}", len)));
                }
                let len = len as usize;
                if src.remaining() < len + 2 {
                    return Err(FrameError::Incomplete);
                }
                let data = Bytes::copy_from_slice(&src.chunk()[..len]);
                skip(src, len)?;
                expect_crlf(src)?;
                Ok(Frame::Bulk(data))
            }
            b'*' => {
                let len = get_decimal(src)?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                if len < 0 {
                    return Err(FrameError::Protocol(format!("invalid array length {}", len)));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(Frame::parse(src)?);
                }
                Ok(Frame::Array(items))
            }
            actual => Err(FrameError::Protocol(format!(
                "invalid frame prefix byte {:#04x}",
                actual
            ))),
        }
    }

    /// Appends the canonical wire encoding of this frame to `dst`.
    /// Serialization is total; every frame has exactly one encoding.
    pub fn write_to(&self, dst: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                dst.push(b'+');
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(b"\r\n");
            }
            Frame::Error(s) => {
                dst.push(b'-');
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                dst.push(b':');
                dst.extend_from_slice(n.to_string().as_bytes());
                dst.extend_from_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                dst.push(b'$');
                dst.extend_from_slice(data.len().to_string().as_bytes());
                dst.extend_from_slice(b"\r\n");
                dst.extend_from_slice(data);
                dst.extend_from_slice(b"\r\n");
            }
            Frame::Null => dst.extend_from_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                dst.push(b'*');
                dst.extend_from_slice(items.len().to_string().as_bytes());
                dst.extend_from_slice(b"\r\n");
                for item in items {
                    item.write_to(dst);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// Converts a parsed command frame into dispatcher arguments. Only arrays
    /// of bulk or simple strings qualify as commands.
    pub fn into_args(self) -> Option<Vec<Vec<u8>>> {
        let Frame::Array(items) = self else {
            return None;
        };
        let mut args = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Frame::Bulk(data) => args.push(data.to_vec()),
                Frame::Simple(s) => args.push(s.into_bytes()),
                _ => return None,
            }
        }
        Some(args)
    }
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, FrameError> {
    if !src.has_remaining() {
        return Err(FrameError::Incomplete);
    }
    Ok(src.get_u8())
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), FrameError> {
    if src.remaining() < n {
        return Err(FrameError::Incomplete);
    }
    src.advance(n);
    Ok(())
}

fn expect_crlf(src: &mut Cursor<&[u8]>) -> Result<(), FrameError> {
    if src.remaining() < 2 {
        return Err(FrameError::Incomplete);
    }
    if src.get_u8() != b'\r' || src.get_u8() != b'\n' {
        return Err(FrameError::Protocol("missing trailing CRLF".to_string()));
    }
    Ok(())
}

/// Reads one CRLF-terminated line, excluding the terminator.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], FrameError> {
    let start = src.position() as usize;
    let end = src.get_ref().len();
    for i in start..end.saturating_sub(1) {
        if src.get_ref()[i] == b'\r' && src.get_ref()[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);
            return Ok(&src.get_ref()[start..i]);
        }
    }
    Err(FrameError::Incomplete)
}

fn get_decimal(src: &mut Cursor<&[u8]>) -> Result<i64, FrameError> {
    let line = get_line(src)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            FrameError::Protocol(format!(
                "invalid decimal line {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn line_to_string(line: &[u8]) -> Result<String, FrameError> {
    String::from_utf8(line.to_vec())
        .map_err(|_| FrameError::Protocol("invalid UTF-8 in line".to_string()))
}
