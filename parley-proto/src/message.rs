//! Protocol tags and the typed messages they carry.

use std::fmt;

use crate::codec::{self, b64, one_line, unb64, unb64_str};

/// Default TCP port for the main session transport.
pub const DEFAULT_PORT: u16 = 5000;

/// Well-known port the live-session acceptor listens on.
pub const LIVE_PORT: u16 = 5001;

/// File transfer chunk size, before base64 encoding (4 KiB).
pub const CHUNK_SIZE: usize = 4096;

/// Longest protocol line a receiver accepts (1 MiB).
pub const MAX_LINE: usize = 1024 * 1024;

/// The closed set of protocol tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Tag {
    /// Ask permission to send a file.
    ReqCopy,
    /// Ask permission to run a command on the peer.
    ReqExec,
    /// Ask for an interactive terminal session.
    ReqLive,
    /// Accept the outstanding request.
    RespOk,
    /// Deny the outstanding request.
    RespNo,
    /// Live session accepted; carries the bridge address.
    RespLiveOk,
    /// Start of a file transfer.
    FileBegin,
    /// One chunk of file contents.
    FileData,
    /// End of a file transfer.
    FileEnd,
    /// One line of successful command output.
    CmdOut,
    /// Command failed; carries its full output.
    CmdErr,
    /// Informational status text.
    Info,
}

impl Tag {
    /// Every tag, in wire-table order.
    pub const ALL: [Self; 12] = [
        Self::ReqCopy,
        Self::ReqExec,
        Self::ReqLive,
        Self::RespOk,
        Self::RespNo,
        Self::RespLiveOk,
        Self::FileBegin,
        Self::FileData,
        Self::FileEnd,
        Self::CmdOut,
        Self::CmdErr,
        Self::Info,
    ];

    /// Wire spelling of the tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReqCopy => "REQ_COPY",
            Self::ReqExec => "REQ_EXEC",
            Self::ReqLive => "REQ_LIVE",
            Self::RespOk => "RESP_OK",
            Self::RespNo => "RESP_NO",
            Self::RespLiveOk => "RESP_LIVE_OK",
            Self::FileBegin => "FILE_BEGIN",
            Self::FileData => "FILE_DATA",
            Self::FileEnd => "FILE_END",
            Self::CmdOut => "CMD_OUT",
            Self::CmdErr => "CMD_ERR",
            Self::Info => "INFO",
        }
    }

    /// Looks up a tag by its exact wire spelling.
    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == text)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// `REQ_COPY:<srcB64>:<destB64>`
    ReqCopy {
        /// Source path on the requesting side, for display.
        src: String,
        /// Destination path on the receiving side, before shortcut expansion.
        dest: String,
    },
    /// `REQ_EXEC:<cmdB64>`
    ReqExec {
        /// Command text for the peer's shell.
        cmd: String,
    },
    /// `REQ_LIVE:<cmdB64>:<addr>`
    ReqLive {
        /// Command to run attached to a pseudo-terminal.
        cmd: String,
        /// Requester's reachable host, informational.
        addr: String,
    },
    /// `RESP_OK`
    RespOk,
    /// `RESP_NO`
    RespNo,
    /// `RESP_LIVE_OK:<addr>`
    RespLiveOk {
        /// `host:port` the acceptor listens on for the bridge.
        addr: String,
    },
    /// `FILE_BEGIN:<destB64>`
    FileBegin {
        /// Destination path as the sender knows it.
        dest: String,
    },
    /// `FILE_DATA:<chunkB64>`
    FileData(Vec<u8>),
    /// `FILE_END`
    FileEnd,
    /// `CMD_OUT:<line>`
    CmdOut(String),
    /// `CMD_ERR:<outputB64>`
    CmdErr(Vec<u8>),
    /// `INFO:<text>`
    Info(String),
    /// Any line that is not a well-formed tagged message.
    Chat(String),
}

impl Message {
    /// The tag this message is sent with, or `None` for plain chat.
    pub const fn tag(&self) -> Option<Tag> {
        Some(match self {
            Self::ReqCopy { .. } => Tag::ReqCopy,
            Self::ReqExec { .. } => Tag::ReqExec,
            Self::ReqLive { .. } => Tag::ReqLive,
            Self::RespOk => Tag::RespOk,
            Self::RespNo => Tag::RespNo,
            Self::RespLiveOk { .. } => Tag::RespLiveOk,
            Self::FileBegin { .. } => Tag::FileBegin,
            Self::FileData(_) => Tag::FileData,
            Self::FileEnd => Tag::FileEnd,
            Self::CmdOut(_) => Tag::CmdOut,
            Self::CmdErr(_) => Tag::CmdErr,
            Self::Info(_) => Tag::Info,
            Self::Chat(_) => return None,
        })
    }

    /// Encodes the message as one protocol line, without the trailing newline.
    ///
    /// Line breaks in plain-text fields become spaces, so the result is
    /// always exactly one line.
    pub fn to_line(&self) -> String {
        let tag = self.tag().map_or("", Tag::as_str);
        match self {
            Self::Chat(text) => one_line(text).into_owned(),
            Self::ReqCopy { src, dest } => codec::encode(tag, &[&b64(src), &b64(dest)]),
            Self::ReqExec { cmd } => codec::encode(tag, &[&b64(cmd)]),
            Self::ReqLive { cmd, addr } => codec::encode(tag, &[&b64(cmd), &one_line(addr)]),
            Self::RespLiveOk { addr } => codec::encode(tag, &[&one_line(addr)]),
            Self::FileBegin { dest } => codec::encode(tag, &[&b64(dest)]),
            Self::FileData(chunk) => codec::encode(tag, &[&b64(chunk)]),
            Self::CmdOut(line) => codec::encode(tag, &[&one_line(line)]),
            Self::CmdErr(output) => codec::encode(tag, &[&b64(output)]),
            Self::Info(text) => codec::encode(tag, &[&one_line(text)]),
            Self::RespOk | Self::RespNo | Self::FileEnd => codec::encode(tag, &[]),
        }
    }

    /// Decodes one protocol line.
    ///
    /// Never fails: an unknown tag or a malformed payload degrades to
    /// [`Message::Chat`] carrying the whole line.
    pub fn parse(line: &str) -> Self {
        let frame = codec::decode(line);
        Tag::parse(frame.tag)
            .and_then(|tag| Self::from_payload(tag, frame.payload))
            .unwrap_or_else(|| Self::Chat(line.to_owned()))
    }

    /// Builds a message from a known tag and its raw payload.
    fn from_payload(tag: Tag, payload: &str) -> Option<Self> {
        let msg = match tag {
            Tag::ReqCopy => {
                let (src, dest) = payload.split_once(':')?;
                Self::ReqCopy {
                    src: unb64_str(src)?,
                    dest: unb64_str(dest)?,
                }
            }
            Tag::ReqExec => Self::ReqExec {
                cmd: unb64_str(payload)?,
            },
            Tag::ReqLive => {
                // The address is plain text and may hold colons of its own.
                let (cmd, addr) = payload.split_once(':')?;
                Self::ReqLive {
                    cmd: unb64_str(cmd)?,
                    addr: addr.to_owned(),
                }
            }
            Tag::RespOk => Self::RespOk,
            Tag::RespNo => Self::RespNo,
            Tag::RespLiveOk if !payload.is_empty() => Self::RespLiveOk {
                addr: payload.to_owned(),
            },
            Tag::RespLiveOk => return None,
            Tag::FileBegin => Self::FileBegin {
                dest: unb64_str(payload).unwrap_or_else(|| payload.to_owned()),
            },
            Tag::FileData => Self::FileData(unb64(payload)?),
            Tag::FileEnd => Self::FileEnd,
            Tag::CmdOut => Self::CmdOut(payload.to_owned()),
            Tag::CmdErr => Self::CmdErr(unb64(payload)?),
            Tag::Info => Self::Info(payload.to_owned()),
        };
        Some(msg)
    }
}
