//! Receiver loop: reads the peer's lines and dispatches each one before
//! reading the next. It never waits on the local operator.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parley_proto::{MAX_LINE, Message};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::console::Line;
use crate::live::LivePhase;
use crate::paths;
use crate::pending::{Direction, Request};
use crate::session::{Control, Ended, Shared};
use crate::transfer::{COPY_FAILED, InboundTransfer, send_file};

/// Outcome of one bounded line read.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// A line is in the buffer, terminator included.
    Line,
    /// The line exceeded [`MAX_LINE`] and was skipped.
    Oversized,
    /// The stream is closed.
    Eof,
}

/// Reads lines from `reader` until the peer closes or the session ends.
pub async fn run<R>(shared: Arc<Shared>, reader: R, control: mpsc::UnboundedSender<Control>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut dispatcher = Dispatcher {
        shared: Arc::clone(&shared),
        control,
        inbound: None,
    };
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            () = shared.cancel.cancelled() => return,
            r = read_bounded(&mut reader, &mut buf) => r,
        };
        match read {
            Ok(Inbound::Line) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                dispatcher.dispatch(Message::parse(line)).await;
            }
            Ok(Inbound::Oversized) => warn!(limit = MAX_LINE, "dropped oversized line"),
            Ok(Inbound::Eof) => {
                shared.shutdown(Ended::PeerClosed);
                return;
            }
            Err(e) => {
                warn!(error = %e, "transport read failed");
                shared.shutdown(Ended::TransportLost);
                return;
            }
        }
    }
}

/// Reads one `\n`-terminated line into `buf`, refusing to buffer more than
/// [`MAX_LINE`] bytes of it.
async fn read_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Inbound>
where
    R: AsyncBufRead + Unpin,
{
    let mut oversized = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (oversized, buf.is_empty()) {
                (true, _) => Inbound::Oversized,
                (false, true) => Inbound::Eof,
                (false, false) => Inbound::Line,
            });
        }
        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        if !oversized {
            // Room for the content plus a `\r\n` terminator.
            if buf.len() + used > MAX_LINE + 2 {
                oversized = true;
                buf.clear();
            } else {
                buf.extend_from_slice(&available[..used]);
            }
        }
        reader.consume(used);
        if done {
            return Ok(if oversized { Inbound::Oversized } else { Inbound::Line });
        }
    }
}

/// Per-session receive state.
struct Dispatcher {
    /// Session state.
    shared: Arc<Shared>,
    /// Hands bridge addresses to the sender loop.
    control: mpsc::UnboundedSender<Control>,
    /// File currently being received.
    inbound: Option<InboundTransfer>,
}

impl Dispatcher {
    /// Routes one message.
    async fn dispatch(&mut self, msg: Message) {
        debug!(tag = ?msg.tag(), "recv");
        let peer = self.shared.config.peer_name.as_str();
        match msg {
            Message::Chat(text) => self.shared.console.show(Line::Chat { from: peer, text: &text }),
            Message::Info(text) => self.on_info(&text),
            msg @ (Message::ReqCopy { .. } | Message::ReqExec { .. } | Message::ReqLive { .. }) => {
                self.on_request(msg).await;
            }
            Message::RespOk => self.on_accepted(),
            Message::RespNo => self.on_denied(),
            Message::RespLiveOk { addr } => self.on_live_ready(addr),
            Message::FileBegin { dest } => self.on_file_begin(&dest).await,
            Message::FileData(chunk) => self.on_file_data(&chunk).await,
            Message::FileEnd => self.on_file_end().await,
            Message::CmdOut(line) => self.shared.console.show(Line::Output(&line)),
            Message::CmdErr(output) => {
                self.shared.notice("Command failed:");
                for line in String::from_utf8_lossy(&output).lines() {
                    self.shared.console.show(Line::Output(line));
                }
            }
            other => debug!(?other, "ignored"),
        }
    }

    /// Shows a status line; a copy failure also releases an approved
    /// destination the peer will no longer send.
    fn on_info(&self, text: &str) {
        if text.starts_with(COPY_FAILED) && self.inbound.is_none() {
            let released = self.shared.pending().take_expected_file();
            if let Some(dest) = released {
                debug!(dest = %dest.display(), "approved destination released");
            }
        }
        let peer = self.shared.config.peer_name.as_str();
        self.shared.console.show(Line::Info { from: peer, text });
    }

    /// Records an incoming request and prompts the operator.
    async fn on_request(&self, msg: Message) {
        let config = &self.shared.config;
        let Some(request) = Request::from_message(msg, |dest| {
            paths::resolve_incoming(dest, config.home.as_deref(), &config.root)
        }) else {
            return;
        };
        let prompt = format!("{} wants to {request}. Accept? [y/N]", config.peer_name);
        let kind = request.kind();
        let offered = self.shared.pending().offer(Direction::Incoming, request);
        match offered {
            Ok(()) => {
                info!(?kind, "request received");
                self.shared.notice(prompt);
            }
            Err(refused) => {
                warn!(?kind, "request while another is unanswered; dropped");
                self.shared.notice(format!(
                    "{} also asked to {refused}; ignored while the first request is unanswered",
                    config.peer_name
                ));
                let reply = Message::Info(format!(
                    "busy: your request to {refused} was ignored; an earlier request is still unanswered"
                ));
                let _ = self.shared.out.send(reply).await;
            }
        }
    }

    /// Starts the requester-side follow-up for an accepted request.
    fn on_accepted(&self) {
        let taken = self.shared.pending().take(Direction::Outgoing);
        let peer = &self.shared.config.peer_name;
        match taken {
            None => warn!("RESP_OK with nothing outstanding"),
            Some(Request::Copy { src, dest }) => {
                self.shared.notice(format!("{peer} accepted; sending {src}"));
                let shared = Arc::clone(&self.shared);
                self.shared.spawn(async move {
                    let path = PathBuf::from(&src);
                    let result = tokio::select! {
                        () = shared.cancel.cancelled() => return,
                        r = send_file(&shared.out, &path, &dest) => r,
                    };
                    match result {
                        Ok(sent) => shared.notice(format!(
                            "Sent {src} ({} bytes, sha256 {})",
                            sent.bytes, sent.sha256
                        )),
                        Err(e) => shared.notice(format!("Copy of {src} failed: {e}")),
                    }
                });
            }
            Some(Request::Exec { cmd }) => {
                self.shared.notice(format!("{peer} accepted; running `{cmd}`"));
            }
            Some(Request::Live { cmd, .. }) => {
                *self.shared.live() = LivePhase::Accepted;
                self.shared.notice(format!("{peer} accepted `{cmd}`; waiting for the bridge address"));
            }
        }
    }

    /// Resolves our outstanding request as denied.
    fn on_denied(&self) {
        let taken = self.shared.pending().take(Direction::Outgoing);
        match taken {
            None => warn!("RESP_NO with nothing outstanding"),
            Some(request) => {
                if let Request::Live { .. } = request {
                    *self.shared.live() = LivePhase::Idle;
                }
                debug!(%request, "denied");
                self.shared.notice("Peer denied the request.");
            }
        }
    }

    /// Hands the bridge address to the sender loop.
    fn on_live_ready(&self, addr: String) {
        let ready = {
            let mut phase = self.shared.live();
            let ready = *phase == LivePhase::Accepted;
            if ready {
                *phase = LivePhase::Bridging;
            }
            ready
        };
        if !ready {
            warn!(addr = %addr, "unexpected RESP_LIVE_OK");
            return;
        }
        if self.control.send(Control::Bridge(addr)).is_err() {
            *self.shared.live() = LivePhase::Idle;
        }
    }

    /// Opens the approved destination for an incoming file.
    async fn on_file_begin(&mut self, announced: &str) {
        if self.inbound.take().is_some() {
            warn!("FILE_BEGIN before the previous FILE_END; previous file abandoned");
        }
        let expected = self.shared.pending().take_expected_file();
        let Some(dest) = expected else {
            warn!(announced, "unsolicited file transfer discarded");
            self.shared.notice(format!("Discarded a file ({announced}) that was never approved"));
            return;
        };
        debug!(announced, dest = %dest.display(), "receiving file");
        match InboundTransfer::create(dest.clone()).await {
            Ok(transfer) => self.inbound = Some(transfer),
            Err(e) => self.abort(&dest.display().to_string(), &e).await,
        }
    }

    /// Appends a chunk to the open file.
    async fn on_file_data(&mut self, chunk: &[u8]) {
        let Some(transfer) = self.inbound.as_mut() else {
            debug!(len = chunk.len(), "FILE_DATA outside a transfer ignored");
            return;
        };
        if let Err(e) = transfer.write(chunk).await {
            let dest = transfer.dest().display().to_string();
            self.inbound = None;
            self.abort(&dest, &e).await;
        }
    }

    /// Closes the open file and reports it.
    async fn on_file_end(&mut self) {
        let Some(transfer) = self.inbound.take() else {
            return;
        };
        let dest = transfer.dest().display().to_string();
        match transfer.finish().await {
            Ok(received) => {
                info!(dest = %dest, bytes = received.bytes, "file received");
                self.shared.notice(format!(
                    "Received {dest} ({} bytes, sha256 {})",
                    received.bytes, received.sha256
                ));
                let confirm = Message::Info(format!(
                    "saved {dest} ({} bytes, sha256 {})",
                    received.bytes, received.sha256
                ));
                let _ = self.shared.out.send(confirm).await;
            }
            Err(e) => self.abort(&dest, &e).await,
        }
    }

    /// Reports a failed incoming transfer on both sides.
    async fn abort(&self, dest: &str, err: &io::Error) {
        warn!(dest, error = %err, "incoming file failed");
        self.shared.notice(format!("Could not write {dest}: {err}"));
        let _ = self
            .shared
            .out
            .send(Message::Info(format!("{COPY_FAILED}could not write {dest}: {err}")))
            .await;
    }
}
