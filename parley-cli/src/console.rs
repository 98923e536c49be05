//! Terminal console: colored lines in chat mode, raw bytes while a live
//! session is attached.

use std::io::{self, IsTerminal, Write};
use std::sync::{Mutex, PoisonError};

use colored::Colorize;
use nix::sys::termios::{self, SetArg, Termios};
use parley::{Console, Line};

/// Console on the process's stdin and stdout.
#[derive(Debug, Default)]
pub struct StdConsole {
    /// Terminal settings to restore when raw mode ends.
    saved: Mutex<Option<Termios>>,
}

impl Console for StdConsole {
    fn show(&self, line: Line<'_>) {
        let text = match line {
            Line::Chat { from, text } => format!("{}: {text}", from.bold().cyan()),
            Line::Info { from, text } => format!("[{from}] {text}").dimmed().to_string(),
            Line::Notice(text) => format!("--> {text}").yellow().to_string(),
            other => other.to_string(),
        };
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }

    fn raw(&self, bytes: &[u8]) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(bytes);
        let _ = out.flush();
    }

    fn set_raw_mode(&self, enabled: bool) -> io::Result<()> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(());
        }
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        if enabled {
            let original = termios::tcgetattr(&stdin)?;
            let mut raw = original.clone();
            termios::cfmakeraw(&mut raw);
            termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw)?;
            *saved = Some(original);
        } else if let Some(original) = saved.take() {
            termios::tcsetattr(&stdin, SetArg::TCSANOW, &original)?;
        }
        Ok(())
    }
}
