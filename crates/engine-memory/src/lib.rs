//! In-memory coordination engine for exercising the embedded test server.
//!
//! Not a real metadata store: no consensus, no replication, no durability
//! guarantees. It keeps a node table in memory, appends mutations to a
//! transaction log under its data directory, and writes a snapshot on
//! shutdown.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod protocol;

pub use error::Error;
pub use protocol::Command;

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use quorum_engine::{Engine, EngineInstance, EngineListener};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

const TXN_LOG_FILE: &str = "txn.log";
const SNAPSHOT_FILE: &str = "snapshot";

/// In-memory coordination engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryEngine;

impl MemoryEngine {
    /// Creates a new `MemoryEngine`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Engine for MemoryEngine {
    type Error = Error;
    type Instance = MemoryInstance;
    type Listener = MemoryListener;

    fn initialize(&self, data_dir: &Path) -> Result<MemoryInstance, Error> {
        let txn_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join(TXN_LOG_FILE))
            .map_err(|e| Error::Io("failed to open transaction log", e))?;

        Ok(MemoryInstance {
            data_dir: data_dir.to_path_buf(),
            running: AtomicBool::new(true),
            state: Mutex::new(State {
                nodes: BTreeMap::new(),
                txn_log,
            }),
        })
    }

    fn prepare(&self, addr: SocketAddr) -> MemoryListener {
        MemoryListener {
            addr,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }
}

struct State {
    nodes: BTreeMap<String, String>,
    txn_log: File,
}

/// Engine instance keeping its node table in memory and its transaction log
/// on disk.
pub struct MemoryInstance {
    data_dir: PathBuf,
    running: AtomicBool,
    state: Mutex<State>,
}

impl MemoryInstance {
    /// Applies one protocol line and renders the response line.
    pub async fn apply(&self, line: &str) -> String {
        if !self.running.load(Ordering::SeqCst) {
            return "ERR not running".to_string();
        }

        match Command::parse(line) {
            Err(reason) => format!("ERR {reason}"),
            Ok(Command::Create { key, value }) => {
                let mut state = self.state.lock().await;
                if state.nodes.contains_key(key) {
                    "EXISTS".to_string()
                } else {
                    state.nodes.insert(key.to_string(), value.to_string());
                    log_txn(&mut state, &format!("create {key} {value}"));
                    "OK".to_string()
                }
            }
            Ok(Command::Get { key }) => {
                let state = self.state.lock().await;
                state
                    .nodes
                    .get(key)
                    .map_or_else(|| "NONE".to_string(), |value| format!("VALUE {value}"))
            }
            Ok(Command::Delete { key }) => {
                let mut state = self.state.lock().await;
                if state.nodes.remove(key).is_some() {
                    log_txn(&mut state, &format!("delete {key}"));
                    "OK".to_string()
                } else {
                    "NONE".to_string()
                }
            }
        }
    }
}

fn log_txn(state: &mut State, entry: &str) {
    if let Err(e) = writeln!(state.txn_log, "{entry}") {
        warn!("failed to append to transaction log: {e}");
    }
}

#[async_trait]
impl EngineInstance for MemoryInstance {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let state = self.state.lock().await;

            let mut snapshot = String::new();
            for (key, value) in &state.nodes {
                snapshot.push_str(key);
                snapshot.push(' ');
                snapshot.push_str(value);
                snapshot.push('\n');
            }

            if let Err(e) = std::fs::write(self.data_dir.join(SNAPSHOT_FILE), snapshot) {
                warn!("failed to write snapshot: {e}");
            }

            debug!("memory engine instance stopped");
        }
    }
}

/// Listener serving the engine's line protocol over TCP.
pub struct MemoryListener {
    addr: SocketAddr,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

#[async_trait]
impl EngineListener for MemoryListener {
    type Error = Error;
    type Instance = MemoryInstance;

    async fn startup(&self, instance: Arc<MemoryInstance>) -> Result<(), Error> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Io("failed to bind listener", e))?;

        let shutdown_token = self.shutdown_token.clone();
        let task_tracker = self.task_tracker.clone();

        self.task_tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown_token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted client connection");
                            task_tracker.spawn(handle_connection(
                                stream,
                                instance.clone(),
                                shutdown_token.clone(),
                            ));
                        }
                        Err(e) => {
                            warn!("accept failed: {e}");
                            break;
                        }
                    }
                }
            }
        });

        self.task_tracker.close();

        Ok(())
    }

    fn shutdown(&self) {
        self.shutdown_token.cancel();
        // join() must return even when startup never spawned the accept loop
        self.task_tracker.close();
    }

    async fn join(&self) {
        self.task_tracker.wait().await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    instance: Arc<MemoryInstance>,
    shutdown_token: CancellationToken,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let response = instance.apply(&line).await;
                    if writer.write_all(response.as_bytes()).await.is_err()
                        || writer.write_all(b"\n").await.is_err()
                    {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    }
}
