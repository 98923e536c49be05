//! Sender loop: turns operator lines into chat, answers and requests.

use std::path::Path;
use std::sync::Arc;

use parley_proto::Message;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::{self, Command, HELP};
use crate::input::OperatorInput;
use crate::live::{self, LivePhase};
use crate::pending::{Direction, Request};
use crate::session::{Control, Ended, Shared};
use crate::{Error, Result, exec, paths};

/// Whether the loop keeps going after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Read the next line.
    Continue,
    /// The operator typed `exit`.
    Exit,
}

/// Reads operator input until `exit`, end of input, or teardown.
pub async fn run(
    shared: &Arc<Shared>,
    mut input: OperatorInput,
    mut control: mpsc::UnboundedReceiver<Control>,
) -> Result<()> {
    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => return Ok(()),
            Some(Control::Bridge(addr)) = control.recv() => {
                bridge(shared, &mut input, &addr).await;
            }
            line = input.next_line() => {
                let Some(line) = line else {
                    shared.shutdown(Ended::InputClosed);
                    return Ok(());
                };
                if handle_line(shared, &line).await? == Flow::Exit {
                    shared.shutdown(Ended::LocalExit);
                    return Ok(());
                }
            }
        }
    }
}

/// Handles one operator line.
async fn handle_line(shared: &Arc<Shared>, line: &str) -> Result<Flow> {
    let answering = shared.pending().get(Direction::Incoming).is_some();
    if answering {
        answer(shared, line).await?;
        return Ok(Flow::Continue);
    }

    let config = &shared.config;
    let expanded = if line.trim_start().starts_with('/') {
        paths::expand_local(line, config.home.as_deref())
    } else {
        line.to_owned()
    };
    let command = match command::parse(&expanded) {
        Ok(command) => command,
        Err(e) => {
            shared.notice(e.to_string());
            return Ok(Flow::Continue);
        }
    };

    match command {
        Command::Empty => {}
        Command::Exit => return Ok(Flow::Exit),
        Command::Help => HELP.iter().for_each(|l| shared.notice(l)),
        Command::Chat(text) => chat(shared, text).await?,
        Command::Copy { src, dest } => {
            let path = paths::resolve_local(src, &config.root);
            match copy_request(&path, dest).await {
                Ok(request) => {
                    ask(shared, request).await?;
                }
                Err(e) => shared.notice(e.to_string()),
            }
        }
        Command::Exec(cmd) => {
            ask(shared, Request::Exec { cmd: cmd.to_owned() }).await?;
        }
        Command::Live(cmd) => live_request(shared, cmd).await?,
    }
    Ok(Flow::Continue)
}

/// Sends chat text unless the peer would read it as a protocol message.
async fn chat(shared: &Shared, text: &str) -> Result<()> {
    if let Some(tag) = Message::parse(text).tag() {
        shared.notice(format!(
            "Not sent: a line starting with {tag}: would be read as a protocol message"
        ));
        return Ok(());
    }
    shared.out.send(Message::Chat(text.to_owned())).await
}

/// Builds a copy request for a local file.
async fn copy_request(path: &Path, dest: Option<&str>) -> Result<Request> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| Error::NotAFile(path.to_path_buf()))?;
    let name = path.file_name().filter(|_| meta.is_file());
    let Some(name) = name else {
        return Err(Error::NotAFile(path.to_path_buf()));
    };
    Ok(Request::Copy {
        src: path.to_string_lossy().into_owned(),
        dest: dest.map_or_else(|| name.to_string_lossy().into_owned(), str::to_owned),
    })
}

/// Starts a `/live` request if no live session exists.
async fn live_request(shared: &Shared, cmd: &str) -> Result<()> {
    // Set before the request goes out so a fast RESP_OK finds it.
    let idle = {
        let mut phase = shared.live();
        let idle = *phase == LivePhase::Idle;
        if idle {
            *phase = LivePhase::Requested;
        }
        idle
    };
    if !idle {
        shared.notice(Error::LiveBusy.to_string());
        return Ok(());
    }
    let request = Request::Live {
        cmd: cmd.to_owned(),
        addr: shared
            .config
            .live_host
            .clone()
            .unwrap_or_else(|| shared.config.live_bind.ip().to_string()),
    };
    if !ask(shared, request).await? {
        *shared.live() = LivePhase::Idle;
    }
    Ok(())
}

/// Records an outgoing request and sends it. Returns `false` if another
/// outgoing request is still unanswered.
async fn ask(shared: &Shared, request: Request) -> Result<bool> {
    let offered = shared.pending().offer(Direction::Outgoing, request.clone());
    if offered.is_err() {
        shared.notice(Error::RequestPending.to_string());
        return Ok(false);
    }
    info!(kind = ?request.kind(), "request sent");
    shared.out.send(request.to_message()).await?;
    shared.notice(format!(
        "Asked {} to {request}; waiting for an answer",
        shared.config.peer_name
    ));
    Ok(true)
}

/// Resolves the incoming request with the operator's answer.
async fn answer(shared: &Arc<Shared>, line: &str) -> Result<()> {
    let approved = matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes");
    let taken = shared.pending().take(Direction::Incoming);
    let Some(request) = taken else {
        return Ok(());
    };
    info!(kind = ?request.kind(), approved, "request answered");
    if !approved {
        shared.notice("Denied.");
        return shared.out.send(Message::RespNo).await;
    }

    match request {
        Request::Copy { src, dest } => {
            // Armed before RESP_OK so the first FILE_BEGIN finds it.
            shared.pending().expect_file(Path::new(&dest));
            shared.out.send(Message::RespOk).await?;
            shared.notice(format!("Accepted; receiving {src} into {dest}"));
        }
        Request::Exec { cmd } => {
            shared.out.send(Message::RespOk).await?;
            shared.notice(format!("Accepted; running `{cmd}`"));
            run_for_peer(shared, cmd);
        }
        Request::Live { cmd, .. } => serve_live(shared, cmd).await?,
    }
    Ok(())
}

/// Runs an approved command in the background and sends back its result.
fn run_for_peer(shared: &Arc<Shared>, cmd: String) {
    let task = Arc::clone(shared);
    shared.spawn(async move {
        let result = tokio::select! {
            () = task.cancel.cancelled() => return,
            r = exec::run(&cmd, &task.config.root) => r,
        };
        match &result {
            Ok(out) => debug!(cmd = %cmd, code = out.code, "command finished"),
            Err(e) => warn!(cmd = %cmd, error = %e, "command failed to start"),
        }
        for reply in exec::replies(&result) {
            if task.out.send(reply).await.is_err() {
                return;
            }
        }
    });
}

/// Accepts a live request: binds, answers, and serves one bridge.
async fn serve_live(shared: &Arc<Shared>, cmd: String) -> Result<()> {
    let idle = {
        let mut phase = shared.live();
        let idle = *phase == LivePhase::Idle;
        if idle {
            *phase = LivePhase::Serving;
        }
        idle
    };
    if !idle {
        shared.notice(format!("{}; answering no", Error::LiveBusy));
        return shared.out.send(Message::RespNo).await;
    }

    let bind = shared.config.live_bind;
    let bound = match TcpListener::bind(bind).await {
        Ok(listener) => live::advertised_addr(&listener, shared.config.live_host.as_deref())
            .map(|addr| (listener, addr)),
        Err(e) => Err(e),
    };
    let (listener, addr) = match bound {
        Ok(bound) => bound,
        Err(e) => {
            *shared.live() = LivePhase::Idle;
            warn!(%bind, error = %e, "live listener failed");
            shared.notice(format!("Cannot listen on {bind}: {e}; answering no"));
            return shared.out.send(Message::RespNo).await;
        }
    };

    shared.out.send(Message::RespOk).await?;
    shared.out.send(Message::RespLiveOk { addr: addr.clone() }).await?;
    shared.notice(format!("Live session for `{cmd}` waiting on {addr}"));

    let task = Arc::clone(shared);
    shared.spawn(async move {
        let config = &task.config;
        let served = live::serve(listener, &cmd, &config.root, config.pty_size, &task.cancel).await;
        *task.live() = LivePhase::Idle;
        let report = match served {
            Ok(Some(code)) => format!("live session `{cmd}` ended (exit {code})"),
            Ok(None) => format!("live session `{cmd}` ended"),
            Err(e) => format!("live session `{cmd}` failed: {e}"),
        };
        task.notice(&report);
        let _ = task.out.send(Message::Info(report)).await;
    });
    Ok(())
}

/// Attaches the operator's terminal to the peer's live session.
///
/// Chat input is suspended until the bridge closes.
async fn bridge(shared: &Shared, input: &mut OperatorInput, advertised: &str) {
    let attached = match live::resolve_bridge_addr(advertised, shared.config.peer_host).await {
        Ok(addr) => {
            shared.notice(format!("Attaching to live session at {addr}"));
            live::attach(addr, input, shared.console.as_ref(), &shared.cancel)
                .await
                .map_err(Error::from)
        }
        Err(e) => Err(e),
    };
    *shared.live() = LivePhase::Idle;
    match attached {
        Ok(()) => shared.notice("Live session ended."),
        Err(e) => {
            warn!(advertised, error = %e, "live bridge failed");
            shared.notice(format!("Live session failed: {e}"));
        }
    }
}
