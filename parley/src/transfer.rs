//! Chunked file streaming over the session's message channel.
//!
//! The sender emits `FILE_BEGIN`, one `FILE_DATA` per [`CHUNK_SIZE`] bytes
//! in source order, then `FILE_END`. The receiver truncates the destination
//! on `FILE_BEGIN` and appends each chunk as it arrives, so memory stays
//! O(chunk) whatever the file size.

use std::io;
use std::path::{Path, PathBuf};

use parley_proto::{CHUNK_SIZE, Message};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use crate::Result;
use crate::outbound::Outbound;

/// What a completed transfer moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    /// Bytes streamed.
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the streamed bytes.
    pub sha256: String,
}

/// Prefix of the `INFO` text either side sends when an approved copy fails.
pub const COPY_FAILED: &str = "copy failed: ";

/// Streams the file at `src` to the peer, to be written at `dest`.
///
/// If `src` cannot be opened no file frames are sent; the peer gets a
/// [`COPY_FAILED`] `INFO` instead so it can release the approved
/// destination. A read error mid-stream still closes the transfer with
/// `FILE_END` so the peer does not wait on a half-open file.
pub async fn send_file(out: &Outbound, src: &Path, dest: &str) -> Result<TransferSummary> {
    let mut file = match tokio::fs::File::open(src).await {
        Ok(file) => file,
        Err(e) => {
            let report = format!("{COPY_FAILED}could not read {}: {e}", src.display());
            out.send(Message::Info(report)).await?;
            return Err(e.into());
        }
    };
    out.send(Message::FileBegin {
        dest: dest.to_owned(),
    })
    .await?;

    let mut hasher = Sha256::new();
    let mut bytes = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let outcome = loop {
        match read_chunk(&mut file, &mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => {
                hasher.update(&buf[..n]);
                bytes += n as u64;
                out.send(Message::FileData(buf[..n].to_vec())).await?;
            }
            Err(e) => break Err(e),
        }
    };

    if let Err(e) = &outcome {
        out.send(Message::Info(format!("transfer aborted: {e}"))).await?;
    }
    out.send(Message::FileEnd).await?;
    outcome?;

    Ok(TransferSummary {
        bytes,
        sha256: hex(hasher.finalize().as_slice()),
    })
}

/// Fills `buf` as far as the file allows; returns 0 only at end of file.
async fn read_chunk(file: &mut tokio::fs::File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Receiving side of one file transfer, from `FILE_BEGIN` to `FILE_END`.
#[derive(Debug)]
pub struct InboundTransfer {
    /// Where the bytes land.
    dest: PathBuf,
    /// Open destination file.
    file: BufWriter<tokio::fs::File>,
    /// Running digest of what has been written.
    hasher: Sha256,
    /// Bytes written so far.
    bytes: u64,
}

impl InboundTransfer {
    /// Creates (or truncates) `dest`, making parent directories as needed.
    pub async fn create(dest: PathBuf) -> io::Result<Self> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&dest).await?;
        Ok(Self {
            dest,
            file: BufWriter::new(file),
            hasher: Sha256::new(),
            bytes: 0,
        })
    }

    /// Destination path.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Appends one decoded chunk.
    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
        Ok(())
    }

    /// Flushes and closes the destination.
    pub async fn finish(mut self) -> io::Result<TransferSummary> {
        self.file.flush().await?;
        self.file.get_mut().sync_all().await?;
        Ok(TransferSummary {
            bytes: self.bytes,
            sha256: hex(self.hasher.finalize().as_slice()),
        })
    }
}

/// Lowercase hex rendering of a digest.
fn hex(digest: &[u8]) -> String {
    use std::fmt::Write;

    digest.iter().fold(String::with_capacity(digest.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::outbound::write_loop;

    /// Runs `send_file` and replays the emitted messages through an
    /// [`InboundTransfer`], as the receiver loop would.
    async fn transfer(content: &[u8]) -> (Vec<Message>, Vec<u8>, TransferSummary) {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, content).unwrap();

        let (out, mut rx) = Outbound::channel();
        let sender = tokio::spawn(async move { send_file(&out, &src, "copy.bin").await });

        let mut msgs = Vec::new();
        let dest = dir.path().join("nested/dir/copy.bin");
        let mut inbound = None;
        while let Some(msg) = rx.recv().await {
            match &msg {
                Message::FileBegin { .. } => {
                    inbound = Some(InboundTransfer::create(dest.clone()).await.unwrap());
                }
                Message::FileData(chunk) => {
                    inbound.as_mut().unwrap().write(chunk).await.unwrap();
                }
                _ => {}
            }
            let end = msg == Message::FileEnd;
            msgs.push(msg);
            if end {
                break;
            }
        }
        let sent = sender.await.unwrap().unwrap();
        let received = inbound.unwrap().finish().await.unwrap();
        assert_eq!(sent, received);
        (msgs, std::fs::read(&dest).unwrap(), received)
    }

    #[tokio::test]
    async fn empty_file_is_begin_then_end() {
        let (msgs, written, summary) = transfer(b"").await;
        assert_eq!(
            msgs,
            vec![
                Message::FileBegin {
                    dest: "copy.bin".into()
                },
                Message::FileEnd
            ]
        );
        assert!(written.is_empty());
        assert_eq!(
            summary.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn single_byte_roundtrip() {
        let (msgs, written, summary) = transfer(&[0xff]).await;
        assert_eq!(msgs.len(), 3);
        assert_eq!(written, [0xff]);
        assert_eq!(summary.bytes, 1);
    }

    #[tokio::test]
    async fn large_binary_file_is_chunked_and_exact() {
        let content: Vec<u8> = (0..1_100_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let (msgs, written, summary) = transfer(&content).await;

        let chunks = msgs
            .iter()
            .filter(|m| matches!(m, Message::FileData(_)))
            .count();
        assert_eq!(chunks, content.len().div_ceil(CHUNK_SIZE));
        assert!(msgs.iter().all(|m| match m {
            Message::FileData(c) => c.len() <= CHUNK_SIZE,
            _ => true,
        }));
        assert_eq!(written, content);
        assert_eq!(summary.bytes, content.len() as u64);
    }

    #[tokio::test]
    async fn missing_source_reports_instead_of_streaming() {
        let (out, mut rx) = Outbound::channel();
        let err = send_file(&out, Path::new("/nonexistent/parley/src"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
        drop(out);
        let Some(Message::Info(report)) = rx.recv().await else {
            panic!("expected a failure report");
        };
        assert!(report.starts_with(COPY_FAILED), "{report}");
        assert!(report.contains("/nonexistent/parley/src"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unwritable_destination_fails_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        // A regular file cannot be a parent directory.
        let err = InboundTransfer::create(blocker.join("child.txt")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn stream_survives_line_encoding() {
        // Bytes that would break a naive line protocol.
        let content = b"a:b\nc\r\n\x00\xff:".repeat(1000);
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tricky.bin");
        std::fs::write(&src, &content).unwrap();

        let (out, rx) = Outbound::channel();
        let (wire_w, wire_r) = tokio::io::duplex(1 << 20);
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_loop(rx, wire_w, cancel.clone()));
        send_file(&out, &src, "tricky.bin").await.unwrap();
        cancel.cancel();
        writer.await.unwrap().unwrap();

        let mut text = String::new();
        let mut wire_r = wire_r;
        wire_r.read_to_string(&mut text).await.unwrap();
        let mut rebuilt = Vec::new();
        for line in text.lines() {
            if let Message::FileData(chunk) = Message::parse(line) {
                rebuilt.extend(chunk);
            }
        }
        assert_eq!(rebuilt, content);
    }
}
