//! Home-directory shortcuts and path resolution.
//!
//! Two shortcuts exist. `~` in the operator's own input means the local
//! home and is expanded before the line is parsed. `@~` is written into a
//! destination meant for the peer and is expanded by whichever side the
//! file lands on.

use std::path::{Path, PathBuf};

/// Shortcut for the receiving machine's home in a peer-supplied destination.
pub const PEER_HOME: &str = "@~";

/// Expands `~` and `~/...` words in operator input to `home`.
///
/// Only whole space-separated words are touched, so `a~b` and `@~` pass
/// through unchanged.
pub fn expand_local(line: &str, home: Option<&Path>) -> String {
    let Some(home) = home else {
        return line.to_owned();
    };
    line.split(' ')
        .map(|word| expand_word(word, "~", home).unwrap_or_else(|| word.to_owned()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves a destination the peer asked us to write to.
///
/// `@~` maps to our home; relative paths land under `root`.
pub fn resolve_incoming(dest: &str, home: Option<&Path>, root: &Path) -> PathBuf {
    let expanded = home
        .and_then(|h| expand_word(dest, PEER_HOME, h))
        .unwrap_or_else(|| dest.to_owned());
    resolve_local(&expanded, root)
}

/// Anchors a relative path at `root`; absolute paths are kept.
pub fn resolve_local(path: &str, root: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Expands `word` if it is exactly `marker` or starts with `marker/`.
fn expand_word(word: &str, marker: &str, home: &Path) -> Option<String> {
    let rest = word.strip_prefix(marker)?;
    if rest.is_empty() {
        return Some(home.to_string_lossy().into_owned());
    }
    let rest = rest.strip_prefix('/')?;
    Some(home.join(rest).to_string_lossy().into_owned())
}
