//! Operator keystrokes, consumed either as lines or as raw bytes.

use tokio::sync::mpsc;

/// Buffers operator input arriving in arbitrary chunks.
///
/// The chat loop reads whole lines; a live bridge reads raw bytes. Bytes
/// left over after the last complete line are handed to whichever reader
/// comes next.
#[derive(Debug)]
pub struct OperatorInput {
    /// Chunks from the terminal reader.
    rx: mpsc::Receiver<Vec<u8>>,
    /// Bytes received but not yet consumed.
    buf: Vec<u8>,
    /// The chunk source has closed.
    eof: bool,
}

impl OperatorInput {
    /// Wraps a chunk channel.
    pub const fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buf: Vec::new(),
            eof: false,
        }
    }

    /// Next complete line without its terminator; `None` at end of input.
    ///
    /// Cancel-safe: partial lines stay buffered.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            if self.eof {
                if self.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut self.buf);
                return Some(String::from_utf8_lossy(&rest).into_owned());
            }
            match self.rx.recv().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => self.eof = true,
            }
        }
    }

    /// Next raw chunk, buffered bytes first; `None` at end of input.
    pub async fn next_raw(&mut self) -> Option<Vec<u8>> {
        if !self.buf.is_empty() {
            return Some(std::mem::take(&mut self.buf));
        }
        if self.eof {
            return None;
        }
        let chunk = self.rx.recv().await;
        if chunk.is_none() {
            self.eof = true;
        }
        chunk
    }
}
