//! Per-session settings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use parley_proto::LIVE_PORT;

/// Window size given to the pseudo-terminal of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Terminal rows.
    pub rows: u16,
    /// Terminal columns.
    pub cols: u16,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Configuration for one [`Session`](crate::Session).
///
/// Built fluently, starting from [`SessionConfig::new`]:
///
/// ```
/// use parley::SessionConfig;
///
/// let config = SessionConfig::new("alice")
///     .peer_name("bob")
///     .root("/srv/drop")
///     .live_host("192.168.1.20");
/// assert_eq!(config.name(), "alice");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Our display name, announced to the peer.
    pub(crate) name: String,
    /// How the peer is labelled locally.
    pub(crate) peer_name: String,
    /// Base for relative local paths.
    pub(crate) root: PathBuf,
    /// Target of the `~` and `@~` shortcuts; `None` leaves them unexpanded.
    pub(crate) home: Option<PathBuf>,
    /// Where an accepted live session listens.
    pub(crate) live_bind: SocketAddr,
    /// Host advertised in `RESP_LIVE_OK` and `REQ_LIVE` instead of the bind IP.
    pub(crate) live_host: Option<String>,
    /// Transport peer IP, used when the peer advertises an unspecified host.
    pub(crate) peer_host: Option<IpAddr>,
    /// Window size for live-session pseudo-terminals.
    pub(crate) pty_size: PtySize,
}

impl SessionConfig {
    /// Creates a configuration with defaults for everything but our name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            peer_name: "peer".to_owned(),
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            home: dirs::home_dir(),
            live_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), LIVE_PORT),
            live_host: None,
            peer_host: None,
            pty_size: PtySize::default(),
        }
    }

    /// Sets the label shown for the peer.
    #[must_use]
    pub fn peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer_name = name.into();
        self
    }

    /// Sets the working-directory root for relative paths.
    #[must_use]
    pub fn root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    /// Overrides the home directory used for path shortcuts.
    #[must_use]
    pub fn home(mut self, home: impl AsRef<Path>) -> Self {
        self.home = Some(home.as_ref().to_path_buf());
        self
    }

    /// Sets the listen address for accepted live sessions.
    #[must_use]
    pub const fn live_bind(mut self, addr: SocketAddr) -> Self {
        self.live_bind = addr;
        self
    }

    /// Sets the host other peers should use to reach us.
    #[must_use]
    pub fn live_host(mut self, host: impl Into<String>) -> Self {
        self.live_host = Some(host.into());
        self
    }

    /// Records the transport peer's IP address.
    #[must_use]
    pub const fn peer_host(mut self, ip: IpAddr) -> Self {
        self.peer_host = Some(ip);
        self
    }

    /// Sets the live-session terminal size.
    #[must_use]
    pub const fn pty_size(mut self, size: PtySize) -> Self {
        self.pty_size = size;
        self
    }

    /// Our display name.
    pub fn name(&self) -> &str {
        &self.name
    }
}
