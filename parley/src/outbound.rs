//! Single-writer queue in front of the transport's write half.
//!
//! Every producer (the sender loop, the file-streaming helper, live-session
//! tasks) enqueues whole [`Message`]s; one writer task turns each into a
//! line. Lines can interleave between messages but never within one.

use std::io;
use std::pin::pin;
use std::time::Duration;

use parley_proto::Message;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// Messages buffered ahead of the writer before producers wait.
pub const QUEUE_DEPTH: usize = 64;

/// How long teardown keeps writing to a peer that is not reading.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Cloneable handle for enqueueing outbound messages.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Producer side of the writer queue.
    tx: mpsc::Sender<Message>,
}

impl Outbound {
    /// Creates a handle and the queue the writer task drains.
    pub fn channel() -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    /// Enqueues one message, waiting while the queue is full.
    pub async fn send(&self, msg: Message) -> Result<()> {
        self.tx.send(msg).await.map_err(|_| Error::SessionClosed)
    }
}

/// Drains `rx` into `writer`, one line per message, until cancelled.
///
/// On cancellation, messages already queued are still written before the
/// stream is shut down, but a peer that stops reading gets at most
/// [`DRAIN_TIMEOUT`] before the rest is dropped.
pub async fn write_loop<W>(
    mut rx: mpsc::Receiver<Message>,
    writer: W,
    cancel: CancellationToken,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut w = BufWriter::new(writer);
    loop {
        let msg = tokio::select! {
            msg = rx.recv() => msg,
            () = cancel.cancelled() => break,
        };
        let Some(msg) = msg else { break };
        let mut write = pin!(write_line(&mut w, &msg));
        tokio::select! {
            r = &mut write => r?,
            () = cancel.cancelled() => {
                // Finish the line in flight unless the peer has stopped reading.
                if let Ok(r) = timeout(DRAIN_TIMEOUT, &mut write).await {
                    r?;
                } else {
                    debug!("peer stopped reading; outbound queue dropped");
                    return Ok(());
                }
                break;
            }
        }
    }

    let drain = async {
        while let Ok(msg) = rx.try_recv() {
            write_line(&mut w, &msg).await?;
        }
        w.shutdown().await
    };
    timeout(DRAIN_TIMEOUT, drain).await.unwrap_or_else(|_| {
        debug!("peer stopped reading; outbound queue dropped");
        Ok(())
    })
}

/// Writes and flushes one encoded message.
async fn write_line<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> io::Result<()> {
    let line = msg.to_line();
    debug!(tag = ?msg.tag(), len = line.len(), "send");
    w.write_all(line.as_bytes()).await?;
    w.write_all(b"\n").await?;
    w.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn writes_one_line_per_message_in_order() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (out, rx) = Outbound::channel();
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_loop(rx, client, cancel.clone()));

        out.send(Message::Chat("hi: there".into())).await.unwrap();
        out.send(Message::RespOk).await.unwrap();
        out.send(Message::CmdOut("a".into())).await.unwrap();
        cancel.cancel();
        writer.await.unwrap().unwrap();

        let mut text = String::new();
        server.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "hi: there\nRESP_OK\nCMD_OUT:a\n");
    }

    #[tokio::test]
    async fn stalled_peer_does_not_block_teardown() {
        let (client, _unread) = tokio::io::duplex(16);
        let (out, rx) = Outbound::channel();
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_loop(rx, client, cancel.clone()));

        out.send(Message::CmdOut("x".repeat(1024))).await.unwrap();
        out.send(Message::RespOk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let finished = timeout(DRAIN_TIMEOUT * 3, writer).await;
        finished.expect("writer hung on a stalled peer").unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_after_writer_exit_reports_closed() {
        let (out, rx) = Outbound::channel();
        drop(rx);
        assert!(matches!(
            out.send(Message::RespNo).await,
            Err(Error::SessionClosed)
        ));
    }
}
