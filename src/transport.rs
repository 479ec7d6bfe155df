//! Transport layer: message framing, write ordering, and lifecycle.
//!
//! Messages are UTF-8 JSON-RPC objects delimited by newlines. stdin carries
//! client messages, stdout carries server messages, stderr is reserved for
//! logging. A line that fails to parse, or that lacks the protocol version
//! marker, surfaces as a [`TransportEvent::Error`] and is dropped; the
//! connection stays open. Outbound writes are serialized through a FIFO lock
//! so concurrent senders cannot interleave bytes on the wire even when their
//! requests complete out of order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{McpMessage, OutboundMessage};

/// Events delivered to the transport's single consumer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A well-formed inbound message.
    Message(McpMessage),
    /// A framing or envelope error; the offending line was dropped.
    Error(String),
}

/// Bidirectional message channel between the engine and one client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message, completing once it is on the wire. Fails when closed.
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Receive the next event. Returns `None` once the peer is gone.
    ///
    /// There is a single consumer; concurrent callers queue behind a lock.
    async fn recv(&self) -> Option<TransportEvent>;

    /// Close the transport. Idempotent; pending writes finish first.
    async fn close(&self);

    /// Whether the transport has been closed.
    fn is_closed(&self) -> bool;
}

// ============================================================================
// Line framing
// ============================================================================

/// Incremental newline splitter.
///
/// Chunks append to an internal buffer; complete lines are returned and the
/// trailing partial line is retained for the next chunk.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain any complete lines (without the newline).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Bytes currently held back as an incomplete line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

// ============================================================================
// NDJSON transport over arbitrary async streams
// ============================================================================

/// Newline-delimited JSON transport over any byte stream pair.
///
/// The stdio binding is [`NdjsonTransport::stdio`]; tests run the same code
/// over `tokio::io::duplex`.
pub struct NdjsonTransport<W> {
    writer: Mutex<W>,
    events: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    reader_task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl NdjsonTransport<tokio::io::Stdout> {
    /// Bind to the process's standard streams.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<W> NdjsonTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create a transport from a reader/writer pair, spawning the reader task.
    pub fn new<R>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(read_loop(reader, tx, Arc::clone(&closed)));

        Self {
            writer: Mutex::new(writer),
            events: Mutex::new(rx),
            reader_task,
            closed,
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = LineBuffer::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(TransportEvent::Error(format!("read failed: {e}")));
                break;
            }
        };

        if closed.load(Ordering::SeqCst) {
            break;
        }

        for raw in framer.push(&chunk[..n]) {
            if raw.is_empty() {
                continue;
            }
            let event = match std::str::from_utf8(&raw) {
                Ok(line) => match McpMessage::parse(line) {
                    Ok(message) => TransportEvent::Message(message),
                    Err(e) => TransportEvent::Error(format!("failed to parse message: {e}")),
                },
                Err(_) => TransportEvent::Error("message is not valid UTF-8".into()),
            };
            if tx.send(event).is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl<W> Transport for NdjsonTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transport("transport is closed".into()));
        }

        let json = serde_json::to_string(&message)?;
        // Framing invariant: one message per line.
        debug_assert!(
            !json.contains('\n'),
            "serialized message must not contain embedded newlines"
        );

        // The lock is FIFO, so bytes hit the wire in send-call order.
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(Error::Transport("transport is closed".into()));
        }
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Option<TransportEvent> {
        if self.is_closed() {
            return None;
        }
        self.events.lock().await.recv().await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Queued senders hold or await the writer lock; taking it here lets
        // them drain before the stream is flushed for the last time.
        let mut writer = self.writer.lock().await;
        let _ = writer.flush().await;
        self.reader_task.abort();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<W> Drop for NdjsonTransport<W> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonRpcNotification, JsonRpcResponse};

    #[test]
    fn line_buffer_retains_partial_line() {
        let mut framer = LineBuffer::new();
        assert!(framer.push(b"{\"a\":1}\n{\"b\"").len() == 1);
        assert_eq!(framer.pending(), b"{\"b\"");

        let lines = framer.push(b":2}\n");
        assert_eq!(lines, vec![b"{\"b\":2}".to_vec()]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn line_buffer_splits_multiple_lines_and_strips_crlf() {
        let mut framer = LineBuffer::new();
        let lines = framer.push(b"one\r\ntwo\nthree");
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(framer.pending(), b"three");
    }

    #[tokio::test]
    async fn malformed_line_is_error_event_not_close() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(server);
        let transport = NdjsonTransport::new(read, write);

        client.write_all(b"this is not json\n").await.unwrap();
        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        match transport.recv().await {
            Some(TransportEvent::Error(_)) => {}
            other => panic!("expected error event, got {other:?}"),
        }
        // Connection survived: the next well-formed message still arrives.
        match transport.recv().await {
            Some(TransportEvent::Message(McpMessage::Request(req))) => {
                assert_eq!(req.method, "ping");
            }
            other => panic!("expected request, got {other:?}"),
        }
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn missing_version_marker_is_error_event() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(server);
        let transport = NdjsonTransport::new(read, write);

        client
            .write_all(b"{\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        assert!(matches!(
            transport.recv().await,
            Some(TransportEvent::Error(_))
        ));
    }

    #[tokio::test]
    async fn send_writes_newline_terminated_json() {
        let (client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(server);
        let transport = NdjsonTransport::new(read, write);

        transport
            .send(JsonRpcNotification::tools_list_changed().into())
            .await
            .unwrap();

        let mut reader = tokio::io::BufReader::new(client);
        let mut line = String::new();
        tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line)
            .await
            .unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["method"], "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn send_after_close_fails_and_close_is_idempotent() {
        let (_client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(server);
        let transport = NdjsonTransport::new(read, write);

        transport.close().await;
        transport.close().await;
        assert!(transport.is_closed());

        let result = transport
            .send(OutboundMessage::Response(JsonRpcResponse::success(
                None,
                serde_json::json!({}),
            )))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn eof_yields_none() {
        let (client, server) = tokio::io::duplex(64);
        let (read, write) = tokio::io::split(server);
        let transport = NdjsonTransport::new(read, write);

        drop(client);
        assert!(transport.recv().await.is_none());
    }
}
