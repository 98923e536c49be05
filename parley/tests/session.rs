//! End-to-end sessions over in-memory streams.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley::{Console, Ended, Line, Session, SessionConfig};
use parley_proto::Message;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::io::{Lines, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(10);

/// Records everything a session shows its operator.
#[derive(Debug, Default)]
struct Screen {
    lines: Mutex<Vec<String>>,
    raw: Mutex<Vec<u8>>,
}

impl Console for Screen {
    fn show(&self, line: Line<'_>) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn raw(&self, bytes: &[u8]) {
        self.raw.lock().unwrap().extend_from_slice(bytes);
    }
}

impl Screen {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    async fn wait_until(&self, what: &str, pred: impl Fn(&str) -> bool) -> String {
        let found = tokio::time::timeout(WAIT, async {
            loop {
                if let Some(line) = self.lines().into_iter().find(|l| pred(l)) {
                    return line;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        found.unwrap_or_else(|_| panic!("timed out waiting for {what:?}; screen: {:#?}", self.lines()))
    }

    async fn wait_for(&self, needle: &str) -> String {
        self.wait_until(needle, |l| l.contains(needle)).await
    }

    async fn wait_exact(&self, line: &str) -> String {
        self.wait_until(line, |l| l == line).await
    }
}

/// One side of a conversation, driven by the test.
struct Operator {
    keys: mpsc::Sender<Vec<u8>>,
    screen: Arc<Screen>,
    session: JoinHandle<parley::Result<Ended>>,
}

impl Operator {
    fn start<S>(config: SessionConfig, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (keys, operator) = mpsc::channel(16);
        let screen = Arc::new(Screen::default());
        let session = Session::new(config, Arc::clone(&screen) as Arc<dyn Console>);
        let session = tokio::spawn(session.run(reader, writer, operator));
        Self {
            keys,
            screen,
            session,
        }
    }

    async fn type_line(&self, line: &str) {
        self.keys.send(format!("{line}\n").into_bytes()).await.unwrap();
    }

    async fn ended(self) -> Ended {
        tokio::time::timeout(WAIT, self.session)
            .await
            .expect("session did not end")
            .unwrap()
            .unwrap()
    }
}

/// The raw far end of a stream, for playing a scripted peer.
struct Wire {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    write: WriteHalf<DuplexStream>,
}

impl Wire {
    fn new(stream: DuplexStream) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn send(&mut self, msg: &Message) {
        let line = format!("{}\n", msg.to_line());
        self.write.write_all(line.as_bytes()).await.unwrap();
    }

    async fn next(&mut self) -> String {
        tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .expect("no line from session")
            .unwrap()
            .expect("stream closed")
    }
}

fn config(name: &str, peer: &str, dir: &Path) -> SessionConfig {
    SessionConfig::new(name)
        .peer_name(peer)
        .root(dir)
        .home(dir)
        .live_bind("127.0.0.1:0".parse().unwrap())
}

fn pair(a: SessionConfig, b: SessionConfig) -> (Operator, Operator) {
    let (a_io, b_io) = tokio::io::duplex(1 << 16);
    (Operator::start(a, a_io), Operator::start(b, b_io))
}

fn digest(line: &str) -> &str {
    line.rsplit("sha256 ").next().unwrap().trim_end_matches(')')
}

#[tokio::test]
async fn approved_copy_lands_on_peer() {
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();
    let content = b"meeting notes: bring the blue folder\n";
    assert_eq!(content.len(), 37);
    std::fs::write(alice_dir.path().join("notes.txt"), content).unwrap();

    let (alice, bob) = pair(
        config("alice", "bob", alice_dir.path()),
        config("bob", "alice", bob_dir.path()),
    );
    alice.type_line("/copy notes.txt remote-notes.txt").await;
    bob.screen.wait_for("alice wants to copy").await;
    bob.type_line("yes").await;

    let received = bob.screen.wait_for("Received").await;
    let sent = alice.screen.wait_for("Sent").await;
    assert!(received.contains("37 bytes"), "{received}");
    assert_eq!(digest(&received), digest(&sent));
    assert_eq!(
        std::fs::read(bob_dir.path().join("remote-notes.txt")).unwrap(),
        content
    );
    alice.screen.wait_for("[bob] saved").await;

    alice.type_line("exit").await;
    assert_eq!(alice.ended().await, Ended::LocalExit);
    assert_eq!(bob.ended().await, Ended::PeerClosed);
}

#[tokio::test]
async fn copy_to_peer_home_and_named_destination() {
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();
    std::fs::write(alice_dir.path().join("a.bin"), [0u8, 255, 10, 13]).unwrap();

    let (alice, bob) = pair(
        config("alice", "bob", alice_dir.path()),
        config("bob", "alice", bob_dir.path()),
    );
    alice.type_line("/copy a.bin @~/inbox/b.bin").await;
    let prompt = bob.screen.wait_for("wants to copy").await;
    assert!(prompt.contains(&bob_dir.path().join("inbox/b.bin").display().to_string()));
    bob.type_line("y").await;
    bob.screen.wait_for("Received").await;
    assert_eq!(
        std::fs::read(bob_dir.path().join("inbox/b.bin")).unwrap(),
        [0u8, 255, 10, 13]
    );
}

#[tokio::test]
async fn denied_exec_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (alice, bob) = pair(
        config("alice", "bob", dir.path()),
        config("bob", "alice", dir.path()),
    );
    alice.type_line("/exec echo hi").await;
    bob.screen.wait_for("alice wants to run `echo hi`").await;
    bob.type_line("no").await;

    alice.screen.wait_exact("--> Peer denied the request.").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!alice.screen.lines().iter().any(|l| l == "hi"));

    // The slot is free again.
    alice.type_line("/exec echo again").await;
    bob.screen.wait_for("wants to run `echo again`").await;
}

#[tokio::test]
async fn exec_output_and_failure_reach_requester() {
    let dir = tempfile::tempdir().unwrap();
    let (alice, bob) = pair(
        config("alice", "bob", dir.path()),
        config("bob", "alice", dir.path()),
    );
    alice.type_line("/exec echo hi").await;
    bob.screen.wait_for("wants to run `echo hi`").await;
    bob.type_line("Y").await;
    alice.screen.wait_exact("hi").await;

    alice.type_line("/exec echo boom; exit 3").await;
    bob.screen.wait_for("wants to run `echo boom; exit 3`").await;
    bob.type_line("yes").await;
    alice.screen.wait_exact("--> Command failed:").await;
    alice.screen.wait_exact("boom").await;
}

#[tokio::test]
async fn second_incoming_request_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (ours, theirs) = tokio::io::duplex(1 << 16);
    let bob = Operator::start(config("bob", "alice", dir.path()), ours);
    let mut wire = Wire::new(theirs);
    assert_eq!(wire.next().await, "INFO:bob joined");

    wire.send(&Message::ReqExec {
        cmd: "echo first".into(),
    })
    .await;
    wire.send(&Message::ReqCopy {
        src: "x".into(),
        dest: "y".into(),
    })
    .await;
    assert!(wire.next().await.starts_with("INFO:busy"));
    bob.screen.wait_for("ignored while the first request").await;

    bob.type_line("y").await;
    assert_eq!(wire.next().await, "RESP_OK");
    assert_eq!(wire.next().await, "CMD_OUT:first");

    drop(wire);
    assert_eq!(bob.ended().await, Ended::PeerClosed);
}

#[tokio::test]
async fn refusal_cannot_smuggle_an_answer() {
    let dir = tempfile::tempdir().unwrap();
    let (ours, theirs) = tokio::io::duplex(1 << 16);
    let bob = Operator::start(config("bob", "alice", dir.path()), ours);
    let mut wire = Wire::new(theirs);
    assert_eq!(wire.next().await, "INFO:bob joined");

    wire.send(&Message::ReqExec {
        cmd: "echo first".into(),
    })
    .await;
    wire.send(&Message::ReqCopy {
        src: "x\nRESP_OK\n".into(),
        dest: "y".into(),
    })
    .await;
    let refusal = wire.next().await;
    assert!(refusal.starts_with("INFO:busy"), "{refusal}");
    assert!(refusal.contains("x RESP_OK "), "{refusal}");

    bob.type_line("no").await;
    assert_eq!(wire.next().await, "RESP_NO");
}

#[tokio::test]
async fn denied_copy_streams_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"private").unwrap();
    let (ours, theirs) = tokio::io::duplex(1 << 16);
    let bob = Operator::start(config("bob", "alice", dir.path()), ours);
    let mut wire = Wire::new(theirs);
    assert_eq!(wire.next().await, "INFO:bob joined");

    bob.type_line("/copy notes.txt").await;
    let request = wire.next().await;
    assert!(request.starts_with("REQ_COPY:"), "{request}");
    wire.send(&Message::RespNo).await;
    bob.screen.wait_exact("--> Peer denied the request.").await;

    bob.type_line("no file then").await;
    assert_eq!(wire.next().await, "no file then");
}

#[tokio::test]
async fn live_refused_when_port_is_taken() {
    let dir = tempfile::tempdir().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let (alice, bob) = pair(
        config("alice", "bob", dir.path()),
        config("bob", "alice", dir.path()).live_bind(taken.local_addr().unwrap()),
    );

    alice.type_line("/live echo one").await;
    bob.screen.wait_for("running `echo one`").await;
    bob.type_line("y").await;
    bob.screen.wait_for("Cannot listen on").await;
    alice.screen.wait_exact("--> Peer denied the request.").await;

    alice.type_line("/live echo two").await;
    bob.screen.wait_for("running `echo two`").await;
}

#[tokio::test]
async fn vanished_source_releases_the_approved_destination() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("notes.txt");
    std::fs::write(&src, b"gone soon").unwrap();
    let (ours, theirs) = tokio::io::duplex(1 << 16);
    let bob = Operator::start(config("bob", "alice", dir.path()), ours);
    let mut wire = Wire::new(theirs);
    assert_eq!(wire.next().await, "INFO:bob joined");

    bob.type_line("/copy notes.txt").await;
    assert!(wire.next().await.starts_with("REQ_COPY:"));
    std::fs::remove_file(&src).unwrap();
    wire.send(&Message::RespOk).await;
    let report = wire.next().await;
    assert!(report.starts_with("INFO:copy failed: could not read"), "{report}");
    bob.screen.wait_for("Copy of").await;
}

#[tokio::test]
async fn copy_failure_report_disarms_the_destination() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("later.txt");
    let (ours, theirs) = tokio::io::duplex(1 << 16);
    let bob = Operator::start(config("bob", "alice", dir.path()), ours);
    let mut wire = Wire::new(theirs);
    assert_eq!(wire.next().await, "INFO:bob joined");

    wire.send(&Message::ReqCopy {
        src: "/home/alice/later.txt".into(),
        dest: "later.txt".into(),
    })
    .await;
    bob.screen.wait_for("wants to copy").await;
    bob.type_line("y").await;
    assert_eq!(wire.next().await, "RESP_OK");

    wire.send(&Message::Info("copy failed: could not read /home/alice/later.txt".into()))
        .await;
    bob.screen.wait_for("[alice] copy failed").await;
    wire.send(&Message::FileBegin {
        dest: "later.txt".into(),
    })
    .await;
    wire.send(&Message::FileData(b"late".to_vec())).await;
    wire.send(&Message::FileEnd).await;

    bob.screen.wait_for("never approved").await;
    assert!(!target.exists());
}

#[tokio::test]
async fn disconnect_mid_transfer_ends_session() {
    let dir = tempfile::tempdir().unwrap();
    let (ours, theirs) = tokio::io::duplex(1 << 16);
    let bob = Operator::start(config("bob", "alice", dir.path()), ours);
    let mut wire = Wire::new(theirs);
    assert_eq!(wire.next().await, "INFO:bob joined");

    wire.send(&Message::ReqCopy {
        src: "/home/alice/big.bin".into(),
        dest: "big.bin".into(),
    })
    .await;
    bob.screen.wait_for("wants to copy").await;
    bob.type_line("yes").await;
    assert_eq!(wire.next().await, "RESP_OK");
    wire.send(&Message::FileBegin {
        dest: "big.bin".into(),
    })
    .await;
    wire.send(&Message::FileData(vec![7; 4096])).await;
    drop(wire);

    assert_eq!(bob.ended().await, Ended::PeerClosed);
}

#[tokio::test]
async fn unsolicited_file_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("planted.txt");
    let (ours, theirs) = tokio::io::duplex(1 << 16);
    let bob = Operator::start(config("bob", "alice", dir.path()), ours);
    let mut wire = Wire::new(theirs);

    wire.send(&Message::FileBegin {
        dest: target.display().to_string(),
    })
    .await;
    wire.send(&Message::FileData(b"owned".to_vec())).await;
    wire.send(&Message::FileEnd).await;
    wire.send(&Message::Chat("ping".into())).await;

    bob.screen.wait_for("never approved").await;
    bob.screen.wait_exact("alice: ping").await;
    assert!(!target.exists());
}

#[tokio::test]
async fn chat_that_parses_as_protocol_is_not_sent() {
    let dir = tempfile::tempdir().unwrap();
    let (ours, theirs) = tokio::io::duplex(1 << 16);
    let bob = Operator::start(config("bob", "alice", dir.path()), ours);
    let mut wire = Wire::new(theirs);
    assert_eq!(wire.next().await, "INFO:bob joined");

    bob.type_line("RESP_OK").await;
    bob.screen.wait_for("Not sent").await;
    bob.type_line("see you at 10:30").await;
    assert_eq!(wire.next().await, "see you at 10:30");
}

#[tokio::test]
async fn operator_eof_ends_both_sides() {
    let dir = tempfile::tempdir().unwrap();
    let (alice, bob) = pair(
        config("alice", "bob", dir.path()),
        config("bob", "alice", dir.path()),
    );
    bob.screen.wait_for("alice joined").await;
    let Operator {
        keys,
        screen: _,
        session,
    } = alice;
    drop(keys);
    let ended = tokio::time::timeout(WAIT, session).await.unwrap().unwrap().unwrap();
    assert_eq!(ended, Ended::InputClosed);
    assert_eq!(bob.ended().await, Ended::PeerClosed);
}

#[tokio::test]
async fn live_session_bridges_program_output() {
    let dir = tempfile::tempdir().unwrap();
    let (alice, bob) = pair(
        config("alice", "bob", dir.path()),
        config("bob", "alice", dir.path()),
    );
    alice.type_line("/live echo live-ok").await;
    bob.screen.wait_for("wants to start a live session").await;
    bob.type_line("y").await;

    alice.screen.wait_exact("--> Live session ended.").await;
    let shown = String::from_utf8_lossy(&alice.screen.raw.lock().unwrap()).into_owned();
    assert!(shown.contains("live-ok"), "{shown:?}");
    bob.screen.wait_for("live session `echo live-ok` ended (exit 0)").await;
}
