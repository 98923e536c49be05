//! Single-outstanding-request bookkeeping for privileged operations.
//!
//! Each direction holds at most one [`Request`]. Creating one while another
//! of the same direction is outstanding fails and leaves the first intact;
//! taking one clears the slot. Both transitions happen under the session's
//! lock, so they are atomic with respect to the two loops.

use std::fmt;
use std::path::{Path, PathBuf};

use parley_proto::Message;

/// What a privileged request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RequestKind {
    /// Send a file.
    Copy,
    /// Run a command.
    Exec,
    /// Run an interactive program on a bridged terminal.
    Live,
}

/// Which side asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Direction {
    /// The peer asked us.
    Incoming,
    /// We asked the peer.
    Outgoing,
}

/// A privileged request and its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Request {
    /// Send the file at `src` to `dest`.
    ///
    /// Outgoing: `src` is our resolved source path and `dest` the raw
    /// destination for the peer. Incoming: `src` is the peer's path, for
    /// display, and `dest` is already resolved on our side.
    Copy {
        /// Source path.
        src: String,
        /// Destination path.
        dest: String,
    },
    /// Run `cmd` in a shell.
    Exec {
        /// Command text.
        cmd: String,
    },
    /// Run `cmd` on a pseudo-terminal behind a bridge connection.
    Live {
        /// Command text.
        cmd: String,
        /// Requester's advertised host.
        addr: String,
    },
}

impl Request {
    /// The request's kind.
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Copy { .. } => RequestKind::Copy,
            Self::Exec { .. } => RequestKind::Exec,
            Self::Live { .. } => RequestKind::Live,
        }
    }

    /// Builds a request from an incoming `REQ_*` message.
    ///
    /// `resolve_dest` maps the peer-supplied destination into our
    /// filesystem. Returns `None` for non-request messages.
    pub fn from_message(msg: Message, resolve_dest: impl FnOnce(&str) -> PathBuf) -> Option<Self> {
        match msg {
            Message::ReqCopy { src, dest } => Some(Self::Copy {
                src,
                dest: resolve_dest(&dest).to_string_lossy().into_owned(),
            }),
            Message::ReqExec { cmd } => Some(Self::Exec { cmd }),
            Message::ReqLive { cmd, addr } => Some(Self::Live { cmd, addr }),
            _ => None,
        }
    }

    /// The `REQ_*` message announcing this request to the peer.
    pub fn to_message(&self) -> Message {
        match self {
            Self::Copy { src, dest } => Message::ReqCopy {
                src: src.clone(),
                dest: dest.clone(),
            },
            Self::Exec { cmd } => Message::ReqExec { cmd: cmd.clone() },
            Self::Live { cmd, addr } => Message::ReqLive {
                cmd: cmd.clone(),
                addr: addr.clone(),
            },
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy { src, dest } => write!(f, "copy {src} to {dest}"),
            Self::Exec { cmd } => write!(f, "run `{cmd}`"),
            Self::Live { cmd, .. } => write!(f, "start a live session running `{cmd}`"),
        }
    }
}

/// A request together with the side that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Who asked.
    pub direction: Direction,
    /// What was asked.
    pub request: Request,
}

/// Per-direction pending-request slots.
#[derive(Debug, Default)]
pub struct PendingTracker {
    /// Request from the peer awaiting our operator's answer.
    incoming: Option<Request>,
    /// Our request awaiting the peer's answer.
    outgoing: Option<Request>,
    /// Destination of an approved incoming copy whose data has not started.
    expected_file: Option<PathBuf>,
}

impl PendingTracker {
    /// Records a new request, refusing if the direction's slot is taken.
    ///
    /// On refusal the new request is handed back and the existing one is
    /// left untouched.
    pub fn offer(&mut self, direction: Direction, request: Request) -> Result<(), Request> {
        let slot = self.slot(direction);
        if slot.is_some() {
            return Err(request);
        }
        *slot = Some(request);
        Ok(())
    }

    /// Resolves and clears the direction's request.
    pub fn take(&mut self, direction: Direction) -> Option<Request> {
        self.slot(direction).take()
    }

    /// The outstanding request for a direction, if any.
    pub const fn get(&self, direction: Direction) -> Option<&Request> {
        match direction {
            Direction::Incoming => self.incoming.as_ref(),
            Direction::Outgoing => self.outgoing.as_ref(),
        }
    }

    /// Both outstanding requests, incoming first.
    pub fn outstanding(&self) -> impl Iterator<Item = PendingRequest> + '_ {
        [Direction::Incoming, Direction::Outgoing]
            .into_iter()
            .filter_map(|direction| {
                self.get(direction).map(|request| PendingRequest {
                    direction,
                    request: request.clone(),
                })
            })
    }

    /// Marks `dest` as the approved target of the next `FILE_BEGIN`.
    pub fn expect_file(&mut self, dest: &Path) {
        self.expected_file = Some(dest.to_path_buf());
    }

    /// Claims the approved file destination, if one is waiting.
    pub fn take_expected_file(&mut self) -> Option<PathBuf> {
        self.expected_file.take()
    }

    /// Mutable slot for a direction.
    const fn slot(&mut self, direction: Direction) -> &mut Option<Request> {
        match direction {
            Direction::Incoming => &mut self.incoming,
            Direction::Outgoing => &mut self.outgoing,
        }
    }
}
