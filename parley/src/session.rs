//! Session lifecycle: spawns the receiver and writer tasks, runs the sender
//! loop, and tears everything down together.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_proto::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::console::{Console, Line};
use crate::input::OperatorInput;
use crate::live::LivePhase;
use crate::outbound::{Outbound, write_loop};
use crate::pending::PendingTracker;
use crate::{Error, Result, receiver, sender};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Ended {
    /// The peer closed the stream.
    PeerClosed,
    /// The local operator typed `exit`.
    LocalExit,
    /// The local operator's input reached end of file.
    InputClosed,
    /// Reading from or writing to the stream failed.
    TransportLost,
}

impl fmt::Display for Ended {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PeerClosed => "peer disconnected",
            Self::LocalExit => "local exit",
            Self::InputClosed => "operator input closed",
            Self::TransportLost => "connection lost",
        })
    }
}

/// Work handed from the receiver loop to the sender loop.
#[derive(Debug)]
pub enum Control {
    /// Attach the operator's terminal to the peer's live session.
    Bridge(String),
}

/// State both loops and their helper tasks see.
pub struct Shared {
    /// Session settings.
    pub config: SessionConfig,
    /// Operator output.
    pub console: Arc<dyn Console>,
    /// Writer queue.
    pub out: Outbound,
    /// Fires once, on teardown.
    pub cancel: CancellationToken,
    /// Outstanding requests in both directions.
    pending: Mutex<PendingTracker>,
    /// Live-session handshake state.
    live: Mutex<LivePhase>,
    /// File senders, command runners and live servers.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// First recorded reason for teardown.
    ended: Mutex<Option<Ended>>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Shared {
    /// Locks the pending-request tracker.
    pub fn pending(&self) -> MutexGuard<'_, PendingTracker> {
        lock(&self.pending)
    }

    /// Locks the live-session phase.
    pub fn live(&self) -> MutexGuard<'_, LivePhase> {
        lock(&self.live)
    }

    /// Shows a local notice to the operator.
    pub fn notice(&self, text: impl AsRef<str>) {
        self.console.show(Line::Notice(text.as_ref()));
    }

    /// Runs `task` in the background; it is awaited on teardown.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Starts teardown. The first reason recorded wins.
    pub fn shutdown(&self, reason: Ended) {
        {
            let mut ended = lock(&self.ended);
            if ended.is_none() {
                info!(%reason, "session ending");
                *ended = Some(reason);
            }
        }
        self.cancel.cancel();
    }
}

/// Locks `m`, recovering the data if a holder panicked.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One conversation over one duplex stream.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use parley::{Console, Session, SessionConfig};
/// # async fn demo(console: Arc<dyn Console>) -> parley::Result<()> {
/// let (local, _remote) = tokio::io::duplex(64 * 1024);
/// let (reader, writer) = tokio::io::split(local);
/// let (keys, operator) = tokio::sync::mpsc::channel(16);
///
/// let session = Session::new(SessionConfig::new("alice"), console);
/// let _running = tokio::spawn(session.run(reader, writer, operator));
/// keys.send(b"hello\nexit\n".to_vec()).await.ok();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Session {
    /// State shared with the loops.
    shared: Arc<Shared>,
    /// Writer queue, consumed by [`Session::run`].
    out_rx: mpsc::Receiver<Message>,
}

impl Session {
    /// Creates a session that renders to `console`.
    pub fn new(config: SessionConfig, console: Arc<dyn Console>) -> Self {
        let (out, out_rx) = Outbound::channel();
        let shared = Arc::new(Shared {
            config,
            console,
            out,
            cancel: CancellationToken::new(),
            pending: Mutex::default(),
            live: Mutex::default(),
            tasks: Mutex::default(),
            ended: Mutex::default(),
        });
        Self { shared, out_rx }
    }

    /// Token that ends the session when cancelled, e.g. on Ctrl-C.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Runs the session until either side ends it.
    ///
    /// `operator` carries the local operator's keystrokes in arbitrary
    /// chunks. When this returns, every task the session started has
    /// finished and the write half has been shut down.
    pub async fn run<R, W>(
        self,
        reader: R,
        writer: W,
        operator: mpsc::Receiver<Vec<u8>>,
    ) -> Result<Ended>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self { shared, out_rx } = self;
        info!(name = %shared.config.name, peer = %shared.config.peer_name, "session started");

        let writer_task = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                if let Err(e) = write_loop(out_rx, writer, shared.cancel.clone()).await {
                    warn!(error = %e, "transport write failed");
                    shared.shutdown(Ended::TransportLost);
                }
            })
        };
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let receiver_task = tokio::spawn(receiver::run(Arc::clone(&shared), reader, control_tx));

        let greeting = Message::Info(format!("{} joined", shared.config.name));
        let outcome = match shared.out.send(greeting).await {
            Ok(()) => sender::run(&shared, OperatorInput::new(operator), control_rx).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) | Err(Error::SessionClosed) => {}
            Err(e) => {
                warn!(error = %e, "sender loop failed");
                shared.shutdown(Ended::TransportLost);
            }
        }
        // Covers a sender loop that returned without recording a reason.
        shared.shutdown(Ended::LocalExit);

        receiver_task.await.map_err(io::Error::other)?;
        let helpers = std::mem::take(&mut *lock(&shared.tasks));
        for task in helpers {
            if let Err(e) = task.await {
                warn!(error = %e, "session task failed");
            }
        }
        writer_task.await.map_err(io::Error::other)?;

        for dropped in shared.pending().outstanding() {
            debug!(direction = ?dropped.direction, request = %dropped.request, "discarding unanswered request");
        }
        let ended = (*lock(&shared.ended)).unwrap_or(Ended::LocalExit);
        Ok(ended)
    }
}
