//! Ways to open the session stream, and the operator's keyboard feed.

use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;

use anyhow::{Context, Result};
use parley_proto::DEFAULT_PORT;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::info;

/// An open duplex stream to the peer.
pub struct Link {
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
    /// Peer IP, when the stream is a TCP connection.
    pub peer: Option<IpAddr>,
    /// Tunnel process for `pipe`; killed when the link is dropped.
    _child: Option<Child>,
}

impl Link {
    fn tcp(stream: TcpStream, peer: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: Some(peer.ip()),
            _child: None,
        }
    }
}

/// Waits for exactly one peer on `bind`.
pub async fn listen(bind: SocketAddr) -> Result<Link> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("listening on {bind}"))?;
    eprintln!("parley: waiting for a peer on {}", listener.local_addr()?);
    let (stream, from) = listener.accept().await.context("accepting a peer")?;
    info!(%from, "peer connected");
    Ok(Link::tcp(stream, from))
}

/// Connects to `addr`, adding the default port if none is given.
pub async fn connect(addr: &str) -> Result<Link> {
    let target = with_default_port(addr);
    let stream = TcpStream::connect(&target)
        .await
        .with_context(|| format!("connecting to {target}"))?;
    let peer = stream.peer_addr()?;
    info!(%peer, "connected");
    Ok(Link::tcp(stream, peer))
}

/// Starts `program` and talks over its stdin and stdout.
pub fn pipe(program: &[String]) -> Result<Link> {
    let (cmd, args) = program.split_first().context("program required")?;
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("starting {cmd}"))?;
    let writer = child.stdin.take().context("tunnel stdin unavailable")?;
    let reader = child.stdout.take().context("tunnel stdout unavailable")?;
    info!(program = %cmd, pid = ?child.id(), "tunnel started");
    Ok(Link {
        reader: Box::new(reader),
        writer: Box::new(writer),
        peer: None,
        _child: Some(child),
    })
}

/// `host` becomes `host:DEFAULT_PORT`; addresses with a port are kept.
fn with_default_port(addr: &str) -> String {
    let has_port = addr.parse::<SocketAddr>().is_ok()
        || addr
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.contains(':') && port.parse::<u16>().is_ok());
    if has_port {
        addr.to_owned()
    } else if addr.parse::<IpAddr>().is_ok_and(|ip| ip.is_ipv6()) {
        format!("[{addr}]:{DEFAULT_PORT}")
    } else {
        format!("{addr}:{DEFAULT_PORT}")
    }
}

/// Feeds stdin to the session in whatever chunks the terminal delivers.
///
/// Reads on a plain thread so a pending read never holds up exit.
pub fn operator_input() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
