//! Permissioned peer-to-peer remote actions over one duplex byte stream.
//!
//! Two operators chat over an already-established, reliable stream. Three
//! privileged operations ride on the same stream, each gated by an
//! explicit yes/no from the other operator:
//!
//! - `/copy` streams a file to the peer in base64 chunks.
//! - `/exec` runs a command in the peer's shell and returns its output.
//! - `/live` hands off to a second TCP connection bridged to a program
//!   running on a pseudo-terminal on the peer.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use parley::{Console, Line, Session, SessionConfig};
//!
//! struct Stdout;
//!
//! impl Console for Stdout {
//!     fn show(&self, line: Line<'_>) {
//!         println!("{line}");
//!     }
//! }
//!
//! # async fn demo() -> parley::Result<()> {
//! let stream = tokio::net::TcpStream::connect("10.0.0.2:5000").await?;
//! let (reader, writer) = stream.into_split();
//! let (_keys, operator) = tokio::sync::mpsc::channel::<Vec<u8>>(16);
//!
//! let session = Session::new(SessionConfig::new("alice"), Arc::new(Stdout));
//! let ended = session.run(reader, writer, operator).await?;
//! println!("session over: {ended}");
//! # Ok(())
//! # }
//! ```
//!
//! # Platform
//!
//! Unix only: command output capture and live sessions need pipes and
//! pseudo-terminals.

#![cfg(unix)]

mod command;
mod config;
mod console;
mod error;
mod exec;
mod input;
mod live;
mod outbound;
mod paths;
mod pending;
mod receiver;
mod sender;
mod session;
mod transfer;

pub use config::{PtySize, SessionConfig};
pub use console::{Console, Line};
pub use error::{Error, Result};
pub use session::{Ended, Session};
