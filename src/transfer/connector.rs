//! In-memory byte connectors between pipeline stages
//!
//! A connector is a bounded, ordered, single-producer/single-consumer byte
//! pipe. The writer blocks once `depth` chunks are buffered, so a slow reader
//! throttles its producer. The writer can close the pipe in an error state,
//! which the reader observes as an I/O error instead of a clean EOF.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tokio_util::sync::PollSender;

type Chunk = io::Result<Bytes>;

/// Create a connector buffering at most `depth` chunks
pub fn connector(depth: usize) -> (ConnectorWriter, ConnectorReader) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (
        ConnectorWriter {
            tx: PollSender::new(tx),
        },
        ConnectorReader {
            inner: StreamReader::new(ReceiverStream::new(rx)),
        },
    )
}

fn disconnected() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connector reader dropped")
}

/// Producing half of a connector
pub struct ConnectorWriter {
    tx: PollSender<Chunk>,
}

impl ConnectorWriter {
    /// Close the connector so the reader fails with `err` after draining
    /// the chunks already sent.
    pub async fn close_with_error(mut self, err: io::Error) {
        if let Some(tx) = self.tx.get_ref().cloned() {
            // Reader already gone: nobody left to notify
            let _ = tx.send(Err(err)).await;
        }
        self.tx.close();
    }
}

impl AsyncWrite for ConnectorWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let this = self.get_mut();
        ready!(this.tx.poll_reserve(cx)).map_err(|_| disconnected())?;
        this.tx
            .send_item(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| disconnected())?;

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().tx.close();
        Poll::Ready(Ok(()))
    }
}

/// Consuming half of a connector
pub struct ConnectorReader {
    inner: StreamReader<ReceiverStream<Chunk>, Bytes>,
}

impl AsyncRead for ConnectorReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}
