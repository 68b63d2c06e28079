use std::io::{self, Cursor};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::parser::frame::{Frame, FrameError};
use crate::parser::reply::Reply;

/// Buffered RESP framing over a byte stream. The generic stream lets the
/// append-only log ride the same framing during replay that sockets use live.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }
}

impl<S: AsyncRead + Unpin> Connection<S> {
    /// The next complete frame, or `None` on a clean end of stream. Bytes
    /// left over at EOF mean the peer quit mid-frame.
    pub async fn read_frame(&mut self) -> crate::Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                debug!(?frame, "read frame");
                return Ok(Some(frame));
            }
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err("stream ended mid-frame".into())
                };
            }
        }
    }

    fn parse_frame(&mut self) -> crate::Result<Option<Frame>> {
        loop {
            // A bare CRLF is keep-alive noise, not a frame.
            if self.buffer.starts_with(b"\r\n") {
                warn!("skipping undersized protocol line");
                self.buffer.advance(2);
                continue;
            }

            let mut buf = Cursor::new(&self.buffer[..]);
            return match Frame::check(&mut buf) {
                Ok(()) => {
                    let len = buf.position() as usize;
                    buf.set_position(0);
                    let frame = Frame::parse(&mut buf)?;
                    self.buffer.advance(len);
                    Ok(Some(frame))
                }
                Err(FrameError::Incomplete) => Ok(None),
                Err(err) => Err(err.into()),
            };
        }
    }
}

impl<S: AsyncWrite + Unpin> Connection<S> {
    pub async fn write_reply(&mut self, reply: &Reply) -> io::Result<()> {
        debug!(?reply, "write reply");
        self.stream.write_all(&reply.to_bytes()).await?;
        self.stream.flush().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn reads_frames_across_split_writes() {
        let (client, server) = tokio::io::duplex(64);
        let mut conn = Connection::new(server);

        let writer = tokio::spawn(async move {
            let mut client = client;
            client.write_all(b"*2\r\n$3\r\nGET").await.unwrap();
            client.write_all(b"\r\n$3\r\nfoo\r\n").await.unwrap();
        });

        let frame = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("GET")),
                Frame::Bulk(Bytes::from("foo")),
            ])
        );
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn skips_bare_crlf_noise() {
        let input: &[u8] = b"\r\n\r\n+PONG\r\n";
        let mut conn = Connection::new(input);
        let frame = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame::Simple("PONG".to_string()));
        assert!(conn.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_trailing_frame_is_an_error() {
        let input: &[u8] = b"+OK\r\n$10\r\ntrunc";
        let mut conn = Connection::new(input);
        assert!(conn.read_frame().await.unwrap().is_some());
        assert!(conn.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn protocol_fault_is_terminal() {
        let input: &[u8] = b"@bogus\r\n";
        let mut conn = Connection::new(input);
        assert!(conn.read_frame().await.is_err());
    }
}
