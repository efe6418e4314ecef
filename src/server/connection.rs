//! Per-client connection handling.
//!
//! Each connection runs two activities: a reader that frames newline
//! terminated lines into a bounded queue, and a dispatcher that executes the
//! queued lines and writes the replies. A full queue suspends the reader, so a
//! slow wavemeter pushes back on the client through TCP flow control. When
//! either activity ends, the other is dropped.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::config::ServerConfig;
use crate::scpi::{CommandTable, Dispatcher};
use crate::session::Wavemeter;

/// Serves one client of a wavemeter.
#[derive(Debug)]
pub struct ConnectionHandler {
    dispatcher: Dispatcher,
    queue_capacity: usize,
    drain_timeout: Duration,
    max_line_length: usize,
}

impl ConnectionHandler {
    /// Bind a fresh command table to `wavemeter`.
    pub fn new(wavemeter: Arc<Wavemeter>, config: &ServerConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(
                CommandTable::for_wavemeter(wavemeter),
                config.device_timeout(),
            ),
            queue_capacity: config.queue_capacity.max(1),
            drain_timeout: config.drain_timeout(),
            max_line_length: config.max_line_length,
        }
    }

    /// Serve `stream` until the client disconnects, a write fails or
    /// `shutdown` fires. Pending replies are flushed within the drain
    /// timeout; failures while draining are ignored.
    pub async fn run<S>(self, stream: S, peer: String, shutdown: CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let span = info_span!("connection", %peer);
        self.serve(stream, shutdown).instrument(span).await;
    }

    async fn serve<S>(self, stream: S, shutdown: CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        info!("Client connected");
        let (reader, mut writer) = tokio::io::split(stream);
        let (queue, lines) = mpsc::channel(self.queue_capacity);

        tokio::select! {
            _ = read_lines(reader, queue, self.max_line_length) => {
                debug!("Client closed the connection");
            }
            result = dispatch_lines(&self.dispatcher, lines, &mut writer) => {
                if let Err(err) = result {
                    debug!("Failed to write reply: {}", err);
                }
            }
            _ = shutdown.cancelled() => {
                debug!("Server shutting down");
            }
        }

        let drain = async {
            writer.flush().await?;
            writer.shutdown().await
        };
        match tokio::time::timeout(self.drain_timeout, drain).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => trace!("Ignoring error while closing: {}", err),
            Err(_) => trace!("Closing the connection timed out"),
        }
        info!("Client disconnected");
    }
}

/// Item produced by [`RequestCodec`].
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line(Bytes),
    /// A line exceeded the length limit; its bytes are skipped up to the
    /// next newline.
    Overlong,
}

/// Newline framing that survives overlong lines.
///
/// `FramedRead` stops after the first decoder error, so the length error is
/// turned into a regular frame.
struct RequestCodec {
    inner: AnyDelimiterCodec,
}

impl RequestCodec {
    fn new(max_line_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                Vec::new(),
                max_line_length,
            ),
        }
    }

    fn map(result: Result<Option<Bytes>, AnyDelimiterCodecError>) -> std::io::Result<Option<Frame>> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Frame::Overlong)),
            Err(AnyDelimiterCodecError::Io(err)) => Err(err),
        }
    }
}

impl Decoder for RequestCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        Self::map(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        Self::map(self.inner.decode_eof(buf))
    }
}

async fn read_lines<R>(reader: R, queue: mpsc::Sender<Bytes>, max_line_length: usize)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, RequestCodec::new(max_line_length));

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Frame::Line(line)) => {
                if queue.send(line).await.is_err() {
                    break;
                }
            }
            Ok(Frame::Overlong) => {
                warn!("Discarding line longer than {} bytes", max_line_length);
            }
            Err(err) => {
                debug!("Failed to read from client: {}", err);
                break;
            }
        }
    }
}

async fn dispatch_lines<W>(
    dispatcher: &Dispatcher,
    mut lines: mpsc::Receiver<Bytes>,
    writer: &mut W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        let Ok(line) = std::str::from_utf8(&line) else {
            warn!("Discarding line that is not valid UTF-8");
            continue;
        };
        let line = line.trim_end();
        trace!(line, "Received request");
        dispatcher.dispatch_line(line, writer).await?;
    }
    Ok(())
}
