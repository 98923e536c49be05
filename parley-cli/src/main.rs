//! CLI for parley peer-to-peer sessions.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

#[cfg(unix)]
mod config;
#[cfg(unix)]
mod console;
#[cfg(unix)]
mod transport;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use parley_proto::DEFAULT_PORT;

#[derive(Parser)]
#[command(
    name = "parley",
    version,
    about = "Chat with one peer; copy files, run commands and share terminals with their approval"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    session: SessionArgs,

    /// More logging on stderr (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Settings shared by every way of starting a session.
#[derive(Args)]
struct SessionArgs {
    /// Name shown to the peer.
    #[arg(long, global = true)]
    name: Option<String>,

    /// Label for the peer's messages.
    #[arg(long, global = true)]
    peer_name: Option<String>,

    /// Directory that relative paths resolve against.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Port to listen on when accepting a live session.
    #[arg(long, global = true)]
    live_port: Option<u16>,

    /// Host to advertise for live sessions instead of the bound address.
    #[arg(long, global = true)]
    live_host: Option<String>,

    /// Config file (default: <config dir>/parley/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for one peer to connect, then start a session.
    Listen {
        /// Address to listen on.
        #[arg(long, default_value_t = SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)))]
        bind: SocketAddr,
    },

    /// Connect to a listening peer.
    Connect {
        /// Peer address as `host[:port]`.
        addr: String,
    },

    /// Hold the session over a program's stdin and stdout.
    ///
    /// For example a TLS tunnel: `parley pipe -- openssl s_client -quiet -connect host:5000`.
    Pipe {
        /// Program and arguments.
        #[arg(last = true, required = true)]
        program: Vec<String>,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = cli.dispatch().await {
        eprintln!("parley: {e:#}");
        std::process::exit(1);
    }
}

/// Logs to stderr, filtered by `RUST_LOG` or the verbosity flag.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("parley={level},parley_cli={level}").into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    #[cfg(unix)]
    async fn dispatch(self) -> Result<()> {
        let file = match &self.command {
            Command::Completion { shell } => {
                clap_complete::generate(*shell, &mut Self::command(), "parley", &mut std::io::stdout());
                return Ok(());
            }
            _ => config::FileConfig::load(self.session.config.as_deref())?,
        };

        let link = match self.command {
            Command::Listen { bind } => transport::listen(bind).await?,
            Command::Connect { addr } => transport::connect(&addr).await?,
            Command::Pipe { program } => transport::pipe(&program)?,
            Command::Completion { .. } => return Ok(()),
        };
        let config = config::session_config(&self.session, file, link.peer);
        run_session(config, link).await
    }

    #[cfg(not(unix))]
    async fn dispatch(self) -> Result<()> {
        if let Command::Completion { shell } = self.command {
            clap_complete::generate(shell, &mut Self::command(), "parley", &mut std::io::stdout());
            return Ok(());
        }
        anyhow::bail!("sessions require Linux or macOS")
    }
}

/// Runs one session on the terminal until either side ends it.
#[cfg(unix)]
async fn run_session(config: parley::SessionConfig, link: transport::Link) -> Result<()> {
    let console = std::sync::Arc::new(console::StdConsole::default());
    let session = parley::Session::new(config, console);

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    eprintln!("parley: connected; /help lists commands, exit leaves");
    let ended = session
        .run(link.reader, link.writer, transport::operator_input())
        .await?;
    eprintln!("parley: session ended ({ended})");
    Ok(())
}
