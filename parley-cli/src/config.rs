//! Optional JSON config file, overridden by command-line flags.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parley::SessionConfig;
use parley_proto::LIVE_PORT;
use serde::Deserialize;

use crate::SessionArgs;

/// Contents of `config.json`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub name: Option<String>,
    pub live_port: Option<u16>,
    pub live_host: Option<String>,
    pub root: Option<PathBuf>,
}

impl FileConfig {
    /// `<config dir>/parley/config.json`.
    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("parley").join("config.json"))
    }

    /// Loads `path`, or the default location when `None`.
    ///
    /// A missing default file is not an error; a missing explicit one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Builds the session settings: flags first, then the file, then defaults.
pub fn session_config(args: &SessionArgs, file: FileConfig, peer: Option<IpAddr>) -> SessionConfig {
    let name = args
        .name
        .clone()
        .or(file.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "anonymous".to_owned());
    let live_port = args.live_port.or(file.live_port).unwrap_or(LIVE_PORT);

    let mut config = SessionConfig::new(name)
        .live_bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, live_port)));
    if let Some(peer_name) = &args.peer_name {
        config = config.peer_name(peer_name);
    }
    if let Some(root) = args.root.clone().or(file.root) {
        config = config.root(root);
    }
    if let Some(host) = args.live_host.clone().or(file.live_host) {
        config = config.live_host(host);
    }
    if let Some(ip) = peer {
        config = config.peer_host(ip);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"name": "alice", "live_port": 6001}"#).unwrap();

        let file = FileConfig::load(Some(&path)).unwrap();
        assert_eq!(file.name.as_deref(), Some("alice"));
        assert_eq!(file.live_port, Some(6001));
        assert!(file.root.is_none());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileConfig::load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"nmae": "typo"}"#).unwrap();
        let err = FileConfig::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }
}
