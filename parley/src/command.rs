//! Operator input grammar.

use std::fmt;

/// Help text printed by `/help`.
pub const HELP: &[&str] = &[
    "/copy <localPath> [remotePath]  send a file (remotePath may start with @~)",
    "/exec <command...>              run a command on the peer",
    "/live <command...>              run an interactive program on the peer",
    "/help                           show this help",
    "exit                            end the session",
    "~ expands to your home directory; anything else is sent as chat",
];

/// One parsed operator line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Blank line.
    Empty,
    /// Plain chat text.
    Chat(&'a str),
    /// `/copy <src> [dest]`
    Copy {
        /// Local source path.
        src: &'a str,
        /// Destination on the peer; defaults to the source file name.
        dest: Option<&'a str>,
    },
    /// `/exec <command...>`
    Exec(&'a str),
    /// `/live <command...>`
    Live(&'a str),
    /// `/help`
    Help,
    /// `exit`
    Exit,
}

/// Why an operator line was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A known command with the wrong arguments; carries its usage.
    Usage(&'static str),
    /// A `/word` that is not a command.
    Unknown(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(usage) => write!(f, "usage: {usage}"),
            Self::Unknown(name) => write!(f, "unknown command /{name}; try /help"),
        }
    }
}

/// Parses one operator line, already shortcut-expanded.
pub fn parse(line: &str) -> Result<Command<'_>, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Command::Empty);
    }
    if trimmed == "exit" {
        return Ok(Command::Exit);
    }
    let Some(body) = trimmed.strip_prefix('/') else {
        return Ok(Command::Chat(line));
    };

    let (name, rest) = body
        .split_once(char::is_whitespace)
        .map_or((body, ""), |(n, r)| (n, r.trim()));
    match name {
        "copy" => {
            let mut args = rest.split_whitespace();
            match (args.next(), args.next(), args.next()) {
                (Some(src), dest, None) => Ok(Command::Copy { src, dest }),
                _ => Err(CommandError::Usage("/copy <localPath> [remotePath]")),
            }
        }
        "exec" if !rest.is_empty() => Ok(Command::Exec(rest)),
        "exec" => Err(CommandError::Usage("/exec <command...>")),
        "live" if !rest.is_empty() => Ok(Command::Live(rest)),
        "live" => Err(CommandError::Usage("/live <command...>")),
        "help" => Ok(Command::Help),
        other => Err(CommandError::Unknown(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_commands() {
        assert_eq!(
            parse("/copy notes.txt remote-notes.txt"),
            Ok(Command::Copy {
                src: "notes.txt",
                dest: Some("remote-notes.txt"),
            })
        );
        assert_eq!(
            parse("/copy  notes.txt "),
            Ok(Command::Copy {
                src: "notes.txt",
                dest: None,
            })
        );
        assert_eq!(parse("/exec echo hi | wc -c"), Ok(Command::Exec("echo hi | wc -c")));
        assert_eq!(parse("/live top"), Ok(Command::Live("top")));
        assert_eq!(parse("/help"), Ok(Command::Help));
        assert_eq!(parse("  exit "), Ok(Command::Exit));
    }

    #[test]
    fn bad_arguments_report_usage() {
        assert!(matches!(parse("/copy"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("/copy a b c"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("/exec   "), Err(CommandError::Usage(_))));
        assert!(matches!(parse("/live"), Err(CommandError::Usage(_))));
        assert_eq!(
            parse("/frobnicate now"),
            Err(CommandError::Unknown("frobnicate".into()))
        );
    }

    #[test]
    fn everything_else_is_chat() {
        assert_eq!(parse("hello there"), Ok(Command::Chat("hello there")));
        assert_eq!(parse("exit now"), Ok(Command::Chat("exit now")));
        assert_eq!(parse("   "), Ok(Command::Empty));
    }
}
