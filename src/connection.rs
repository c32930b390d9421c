//! Per-client socket state for the event loop
//!
//! A `Connection` never blocks: reads and writes go through `try_read_buf`
//! and `try_write`, and whatever cannot be written right away stays queued
//! until the socket reports writable again.

use bytes::{Buf, Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::protocol::Response;

pub type ConnectionId = u64;

const READ_CHUNK: usize = 4096;

/// Result of one non-blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    /// The socket was not actually readable; wait for the next readiness.
    WouldBlock,
    /// The peer closed or reset the connection.
    Closed,
}

pub struct Connection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    // Shared with the pending readiness future, never with another connection.
    stream: Arc<TcpStream>,
    // Bytes read from the socket that do not yet form a complete line.
    buffer: BytesMut,
    // Responses the peer has not accepted yet.
    outbound: BytesMut,
    closing: bool,
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr) -> Connection {
        Connection {
            id,
            peer,
            stream: Arc::new(stream),
            buffer: BytesMut::with_capacity(READ_CHUNK),
            outbound: BytesMut::new(),
            closing: false,
        }
    }

    /// Resolves once the socket can make progress: writable while responses
    /// are queued, readable otherwise.
    ///
    /// A peer that does not drain its responses within `write_timeout`
    /// resolves with a `TimedOut` error.
    pub fn readiness(
        &self,
        write_timeout: Duration,
    ) -> BoxFuture<'static, (ConnectionId, io::Result<()>)> {
        let id = self.id;
        let stream = Arc::clone(&self.stream);

        if self.wants_write() {
            async move {
                let ready = match timeout(write_timeout, stream.writable()).await {
                    Ok(ready) => ready,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "peer stopped reading responses",
                    )),
                };
                (id, ready)
            }
            .boxed()
        } else {
            async move {
                let ready = stream.readable().await;
                (id, ready)
            }
            .boxed()
        }
    }

    /// Read whatever is available without blocking.
    pub fn fill(&mut self) -> io::Result<ReadOutcome> {
        self.buffer.reserve(READ_CHUNK);
        match self.stream.try_read_buf(&mut self.buffer) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(ReadOutcome::Closed),
            Err(e) => Err(e),
        }
    }

    /// Split the next complete line off the buffer, without its `\n` or
    /// `\r\n` terminator.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let newline = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line = self.buffer.split_to(newline + 1);
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(newline - 1);
        }
        Some(line.freeze())
    }

    /// Bytes buffered that are not yet part of a complete line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn queue(&mut self, response: &Response) {
        self.outbound.extend_from_slice(&response.to_bytes());
    }

    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Write as much queued output as the socket takes right now.
    ///
    /// Returns `true` once nothing is left queued.
    pub fn flush(&mut self) -> io::Result<bool> {
        while self.wants_write() {
            match self.stream.try_write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Drop the connection as soon as its queued output is written.
    pub fn close_after_flush(&mut self) {
        self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(5);

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (Connection::new(7, server, peer), client)
    }

    async fn fill_until(conn: &mut Connection, wanted: usize) {
        while conn.pending() < wanted {
            let (id, ready) = conn.readiness(WAIT).await;
            assert_eq!(id, 7);
            ready.unwrap();
            if conn.fill().unwrap() == ReadOutcome::Closed {
                break;
            }
        }
    }

    async fn flush_all(conn: &mut Connection) {
        while !conn.flush().unwrap() {
            let (_, ready) = conn.readiness(WAIT).await;
            ready.unwrap();
        }
    }

    #[tokio::test]
    async fn test_lines_are_split_and_partial_kept() {
        let (mut conn, mut client) = pair().await;

        client
            .write_all(b"GET_CHECKPOINT a\r\nCOMPACT\nSET_CHE")
            .await
            .unwrap();
        fill_until(&mut conn, 33).await;

        assert_eq!(conn.next_line().unwrap(), Bytes::from("GET_CHECKPOINT a"));
        assert_eq!(conn.next_line().unwrap(), Bytes::from("COMPACT"));
        assert_eq!(conn.next_line(), None);
        assert_eq!(conn.pending(), 7);

        client.write_all(b"CKPOINT a 1\n").await.unwrap();
        fill_until(&mut conn, 19).await;
        assert_eq!(
            conn.next_line().unwrap(),
            Bytes::from("SET_CHECKPOINT a 1")
        );
        assert_eq!(conn.pending(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let (mut conn, client) = pair().await;
        drop(client);

        loop {
            let (_, ready) = conn.readiness(WAIT).await;
            ready.unwrap();
            match conn.fill().unwrap() {
                ReadOutcome::Closed => break,
                ReadOutcome::WouldBlock => continue,
                ReadOutcome::Data(n) => panic!("unexpected {} bytes", n),
            }
        }
    }

    #[tokio::test]
    async fn test_queued_responses_are_flushed_in_order() {
        let (mut conn, client) = pair().await;

        conn.queue(&Response::Ok);
        conn.queue(&Response::Value("42".to_string()));
        conn.queue(&Response::Null);
        assert!(conn.wants_write());

        flush_all(&mut conn).await;
        assert!(!conn.wants_write());

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "OK");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "42");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "NULL");
    }

    #[tokio::test]
    async fn test_unread_output_stays_queued_then_times_out() {
        let (mut conn, _client) = pair().await;

        // The peer never reads, so eventually both socket buffers fill up.
        let chunk = Response::Value("x".repeat(60_000));
        let mut blocked = false;
        for _ in 0..2_000 {
            conn.queue(&chunk);
            let (_, ready) = conn.readiness(WAIT).await;
            ready.unwrap();
            if !conn.flush().unwrap() {
                blocked = true;
                break;
            }
        }
        assert!(blocked);
        assert!(conn.wants_write());

        let (_, ready) = conn.readiness(Duration::from_millis(50)).await;
        assert_eq!(ready.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }
}
