//! Operator-facing output.

use std::fmt;
use std::io;

/// One line of operator-visible output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Line<'a> {
    /// A chat message from the peer.
    Chat {
        /// Peer display name.
        from: &'a str,
        /// Message text.
        text: &'a str,
    },
    /// An `INFO` status line from the peer.
    Info {
        /// Peer display name.
        from: &'a str,
        /// Status text.
        text: &'a str,
    },
    /// A local notice: prompts, outcomes, errors.
    Notice(&'a str),
    /// One line of output from a command the peer ran for us.
    Output(&'a str),
}

impl fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat { from, text } => write!(f, "{from}: {text}"),
            Self::Info { from, text } => write!(f, "[{from}] {text}"),
            Self::Notice(text) => write!(f, "--> {text}"),
            Self::Output(text) => f.write_str(text),
        }
    }
}

/// Where a session renders output for the local operator.
///
/// Implementations must be cheap and non-blocking: the receiver loop calls
/// [`Console::show`] inline.
pub trait Console: Send + Sync {
    /// Displays one line.
    fn show(&self, line: Line<'_>);

    /// Writes raw terminal output from a bridged live session.
    fn raw(&self, bytes: &[u8]) {
        let _ = bytes;
    }

    /// Enters or leaves raw terminal mode around a live bridge.
    fn set_raw_mode(&self, enabled: bool) -> io::Result<()> {
        let _ = enabled;
        Ok(())
    }
}
