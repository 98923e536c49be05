//! Runs an approved command and maps its result onto `CMD_*` messages.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;

use parley_proto::Message;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Sent instead of `CMD_OUT` lines when a successful command printed nothing.
pub const NO_OUTPUT: &str = "command finished with no output";

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output and standard error, interleaved as written.
    pub output: Vec<u8>,
    /// Exit code; `128 + signal` if the process was killed.
    pub code: i32,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    pub const fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs `cmd` with `sh -c` in `cwd`, capturing combined output.
///
/// Standard output and standard error share one pipe so their relative
/// order is preserved. The child is killed if the returned future is
/// dropped.
pub async fn run(cmd: &str, cwd: &Path) -> io::Result<CommandOutput> {
    let (read_end, write_end) = nix::unistd::pipe()?;
    set_cloexec(&read_end)?;
    set_cloexec(&write_end)?;
    let stderr_end = write_end.try_clone()?;

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(write_end))
        .stderr(Stdio::from(stderr_end))
        .kill_on_drop(true);
    let mut child = command.spawn()?;
    // Close our copies of the write end so the read below sees EOF.
    drop(command);

    let mut output = Vec::new();
    let mut pipe = tokio::fs::File::from_std(std::fs::File::from(read_end));
    pipe.read_to_end(&mut output).await?;

    let status = child.wait().await?;
    let code = status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1);
    Ok(CommandOutput { output, code })
}

/// Sets `FD_CLOEXEC` so concurrently spawned children do not inherit the pipe.
#[allow(unsafe_code)]
pub(crate) fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: fcntl(F_SETFD) on a descriptor we own.
    let ret = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Messages that report `result` back to the requester.
///
/// Success becomes one `CMD_OUT` per output line, in order. A non-zero
/// exit, or a failure to start, becomes a single `CMD_ERR`.
pub fn replies(result: &io::Result<CommandOutput>) -> Vec<Message> {
    match result {
        Ok(out) if out.success() => {
            let text = String::from_utf8_lossy(&out.output);
            let lines: Vec<Message> = text.lines().map(|l| Message::CmdOut(l.to_owned())).collect();
            if lines.is_empty() {
                vec![Message::Info(NO_OUTPUT.to_owned())]
            } else {
                lines
            }
        }
        Ok(out) => vec![Message::CmdErr(out.output.clone())],
        Err(e) => vec![Message::CmdErr(format!("failed to start command: {e}").into_bytes())],
    }
}
