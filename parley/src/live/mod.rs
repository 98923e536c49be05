//! Live-session handoff: a program on a pseudo-terminal, bridged over a
//! second TCP connection.
//!
//! The side that accepts a `/live` request listens; the requester connects.
//! Exactly one connection is accepted per approval and at most one live
//! session exists per chat session.

mod pty;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PtySize;
use crate::console::Console;
use crate::input::OperatorInput;
use crate::{Error, Result};

/// How long an accepted live session waits for the requester to connect.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the requester waits for the bridge connection to open.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer size for terminal traffic.
const BRIDGE_BUF: usize = 4096;

/// Where this side stands in the live-session handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivePhase {
    /// No live session.
    #[default]
    Idle,
    /// We sent `REQ_LIVE` and wait for an answer.
    Requested,
    /// The peer said yes; its bridge address has not arrived yet.
    Accepted,
    /// Our terminal is attached to the peer's program.
    Bridging,
    /// We accepted and host the program for the peer.
    Serving,
}

/// Address to advertise in `RESP_LIVE_OK` for `listener`.
///
/// `host` replaces the bound IP when set; the port is always the one
/// actually bound.
pub fn advertised_addr(listener: &TcpListener, host: Option<&str>) -> io::Result<String> {
    let local = listener.local_addr()?;
    Ok(match host {
        Some(host) if host.contains(':') => format!("[{host}]:{}", local.port()),
        Some(host) => format!("{host}:{}", local.port()),
        None => local.to_string(),
    })
}

/// Turns an advertised bridge address into something to connect to.
///
/// An unspecified IP means "wherever you reached me", so it is replaced by
/// `peer_host`, or loopback when the transport has no IP.
pub async fn resolve_bridge_addr(advertised: &str, peer_host: Option<IpAddr>) -> Result<SocketAddr> {
    let mut addr = match advertised.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(_) => tokio::net::lookup_host(advertised)
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| Error::BadAddress(advertised.to_owned()))?,
    };
    if addr.ip().is_unspecified() {
        addr.set_ip(peer_host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }
    Ok(addr)
}

/// Accepts one bridge connection and runs `cmd` on a pseudo-terminal
/// behind it until the program exits, the connection drops, or `cancel`
/// fires. Returns the program's exit code, if it exited on its own.
pub async fn serve(
    listener: TcpListener,
    cmd: &str,
    cwd: &Path,
    size: PtySize,
    cancel: &CancellationToken,
) -> io::Result<Option<i32>> {
    let accepted = tokio::select! {
        () = cancel.cancelled() => return Ok(None),
        r = tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()) => r,
    };
    let (stream, from) = accepted
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "peer never connected"))??;
    // One connection per approval.
    drop(listener);
    info!(%from, cmd, "live bridge connected");

    let pty::PtyChild {
        mut child,
        mut master_read,
        mut master_write,
    } = pty::spawn(cmd, cwd, size)?;
    let (mut sock_read, mut sock_write) = stream.into_split();

    let program_done = tokio::select! {
        r = pump(&mut master_read, &mut sock_write) => {
            debug!(result = ?r, "program output closed");
            true
        }
        r = pump(&mut sock_read, &mut master_write) => {
            debug!(result = ?r, "bridge connection closed");
            false
        }
        () = cancel.cancelled() => false,
    };
    let _ = sock_write.shutdown().await;

    if !program_done && child.try_wait()?.is_none() {
        debug!(pid = child.id(), "stopping live program");
        if let Err(e) = child.kill() {
            warn!(error = %e, "failed to stop live program");
        }
    }
    let status = tokio::task::spawn_blocking(move || child.wait())
        .await
        .map_err(io::Error::other)??;
    info!(%status, "live program finished");
    Ok(status.code())
}

/// Connects to a peer's live session and attaches the operator's terminal
/// until the connection closes, operator input ends, or `cancel` fires.
///
/// The console is in raw mode for the duration.
pub async fn attach(
    addr: SocketAddr,
    input: &mut OperatorInput,
    console: &dyn Console,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connect to {addr}")))??;
    let (mut read, mut write) = stream.into_split();
    console.set_raw_mode(true)?;

    let mut buf = vec![0u8; BRIDGE_BUF];
    let outcome = loop {
        tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            n = read.read(&mut buf) => match n {
                Ok(0) => break Ok(()),
                Ok(n) => console.raw(&buf[..n]),
                Err(e) => break Err(e),
            },
            keys = input.next_raw() => match keys {
                Some(keys) => {
                    if let Err(e) = write.write_all(&keys).await {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },
        }
    };

    let restored = console.set_raw_mode(false);
    outcome.and(restored)
}

/// Copies `from` into `to` until end of stream.
///
/// A pseudo-terminal master reports `EIO` once the program side is gone;
/// that counts as end of stream.
async fn pump<R, W>(from: &mut R, to: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BRIDGE_BUF];
    let mut total = 0u64;
    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(total),
            Err(e) => return Err(e),
        };
        to.write_all(&buf[..n]).await?;
        to.flush().await?;
        total += n as u64;
    }
}
