//! Wire protocol for parley peer sessions.
//!
//! Every message is one UTF-8 line of the form `TAG:payload`. Payload
//! sub-fields are joined with `:`; fields that may carry colons, newlines
//! or arbitrary bytes are base64-encoded first, so a decoder only ever
//! needs to split left-to-right. Lines whose tag is not recognised are
//! plain chat.

mod codec;
mod message;

pub use codec::{Frame, b64, decode, encode, unb64, unb64_str};
pub use message::{CHUNK_SIZE, DEFAULT_PORT, LIVE_PORT, MAX_LINE, Message, Tag};
