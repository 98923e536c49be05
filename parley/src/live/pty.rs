//! Pseudo-terminal process spawning.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use nix::pty::{OpenptyResult, Winsize, openpty};
use nix::unistd::dup;

use crate::config::PtySize;
use crate::exec::set_cloexec;

/// A shell command running with a pseudo-terminal as its controlling tty.
#[derive(Debug)]
pub struct PtyChild {
    /// The `sh -c` process.
    pub child: Child,
    /// Async reader for the master side (child output, stdout and stderr merged).
    pub master_read: tokio::fs::File,
    /// Async writer for the master side (child input).
    pub master_write: tokio::fs::File,
}

/// Spawns `sh -c <cmd>` in `cwd` on a fresh pseudo-terminal.
///
/// The child gets a new session (`setsid`) and the slave becomes its
/// controlling terminal (`TIOCSCTTY`).
#[allow(unsafe_code)]
pub fn spawn(cmd: &str, cwd: &Path, size: PtySize) -> io::Result<PtyChild> {
    let winsize = Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let OpenptyResult { master, slave } =
        openpty(Some(&winsize), None).map_err(|e| io::Error::other(format!("openpty: {e}")))?;
    // Keeps other children, including concurrent `/exec` runs, off the pty.
    set_cloexec(&master)?;
    set_cloexec(&slave)?;

    let slave_raw_fd = slave.as_raw_fd();
    let slave_stdin = dup_fd(&slave, "stdin")?;
    let slave_stdout = dup_fd(&slave, "stdout")?;
    let slave_stderr = dup_fd(&slave, "stderr")?;

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .env("TERM", std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_owned()))
        .stdin(Stdio::from(slave_stdin))
        .stdout(Stdio::from(slave_stdout))
        .stderr(Stdio::from(slave_stderr));

    // SAFETY: only async-signal-safe calls between fork and exec.
    unsafe {
        command.pre_exec(move || {
            nix::unistd::setsid().map_err(io::Error::other)?;
            if libc::ioctl(slave_raw_fd, libc::TIOCSCTTY, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn()?;
    // The child holds its own copies now.
    drop(command);
    drop(slave);

    let read_fd = dup_fd(&master, "master_read")?;
    let master_read = async_file(read_fd);
    let master_write = async_file(master);

    Ok(PtyChild {
        child,
        master_read,
        master_write,
    })
}

/// Wraps an owned descriptor as a tokio file.
fn async_file(fd: OwnedFd) -> tokio::fs::File {
    tokio::fs::File::from_std(std::fs::File::from(fd))
}

/// Duplicates an `OwnedFd` as close-on-exec, with a descriptive error
/// context. Stdio redirection clears the flag on the child's copies.
fn dup_fd(fd: &OwnedFd, label: &str) -> io::Result<OwnedFd> {
    let copy = dup(fd).map_err(|e| io::Error::other(format!("dup {label}: {e}")))?;
    set_cloexec(&copy)?;
    Ok(copy)
}
