//! Embedded coordination server for use in automated tests.
//!
//! Starts an engine instance backed by a throwaway data directory, serves it
//! on a localhost port, and tears everything down again. The intended flow is
//! strictly linear: construct, [`start`](EmbeddedServer::start), run the test
//! body against [`connect_string`](EmbeddedServer::connect_string),
//! [`close`](EmbeddedServer::close), [`cleanup`](EmbeddedServer::cleanup).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use quorum_engine::{Engine, EngineInstance, EngineListener};
use tracing::{debug, info, warn};

/// Embedded coordination server fixture.
///
/// Exclusively owns its engine instance and listener; nothing is shared
/// across fixture instances. `start` and `close` are idempotent and safe to
/// call concurrently: the side-effecting body runs exactly once, guarded by
/// atomic flag transitions.
pub struct EmbeddedServer<E: Engine> {
    port: u16,
    data_dir: PathBuf,
    instance: Arc<E::Instance>,
    listener: Arc<E::Listener>,

    started: AtomicBool,
    stopped: AtomicBool,
}

impl<E: Engine> EmbeddedServer<E> {
    /// Creates a fixture on a port chosen by the port allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFreePort`] if port allocation is exhausted,
    /// otherwise fails as [`with_port`](Self::with_port) does.
    pub fn new(engine: &E) -> Result<Self, Error> {
        let port = quorum_util::allocate_port().ok_or(Error::NoFreePort)?;
        Self::with_port(engine, port)
    }

    /// Creates a fixture on `port`.
    ///
    /// Provisions a fresh uniquely-named temporary data directory and
    /// initializes the engine instance against it. The listener is prepared
    /// for `127.0.0.1:<port>` but not bound until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the data directory cannot be created, or
    /// [`Error::Engine`] if the engine instance fails to initialize.
    pub fn with_port(engine: &E, port: u16) -> Result<Self, Error> {
        // Reclamation is cleanup()'s contract, so the directory is kept
        // rather than deleted on drop.
        let data_dir = tempfile::Builder::new()
            .prefix("quorum-embedded-")
            .tempdir()
            .map_err(|e| Error::Io("failed to create data directory", e))?
            .keep();

        let instance = engine
            .initialize(&data_dir)
            .map_err(|e| Error::Engine(Box::new(e)))?;

        let listener = engine.prepare(SocketAddr::from(([127, 0, 0, 1], port)));

        debug!(port, data_dir = %data_dir.display(), "prepared embedded coordination server");

        Ok(Self {
            port,
            data_dir,
            instance: Arc::new(instance),
            listener: Arc::new(listener),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Starts the server. The first call binds the listener and begins
    /// serving connections; every later call, including concurrent ones, is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if the listener fails to bind or begin
    /// serving.
    pub async fn start(&self) -> Result<(), Error> {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.listener
                .startup(self.instance.clone())
                .await
                .map_err(|e| Error::Engine(Box::new(e)))?;

            info!(port = self.port, "embedded coordination server accepting connections");
        }

        Ok(())
    }

    /// Stops the server: stops accepting connections, waits for the
    /// listener's workers to fully terminate, then shuts the engine instance
    /// down if it still reports itself as running.
    ///
    /// Idempotent, never fails, and a pure no-op if [`start`](Self::start)
    /// was never called. The shutdown sequence runs on its own task, so a
    /// caller cancelled mid-`close` does not leave the engine running.
    pub async fn close(&self) {
        if self.started.load(Ordering::SeqCst) && !self.stopped.swap(true, Ordering::SeqCst) {
            let listener = self.listener.clone();
            let instance = self.instance.clone();
            let port = self.port;

            let shutdown_task = tokio::spawn(async move {
                listener.shutdown();
                listener.join().await;

                // No worker is left at this point, so no in-flight
                // connection can reach the instance once it stops.
                if instance.is_running() {
                    instance.shutdown().await;
                }

                info!(port, "embedded coordination server stopped");
            });

            if let Err(e) = shutdown_task.await {
                warn!("shutdown task did not complete cleanly: {e}");
            }
        }
    }

    /// Returns the `host:port` string clients connect to. Valid at any
    /// lifecycle stage; the port is fixed at construction.
    #[must_use]
    pub fn connect_string(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Returns the fixed port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the data directory the engine persists into.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Reclaims the data directory, deleting children before parents and
    /// continuing past individual failures.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStopped`] if the server has not been stopped with
    /// [`close`](Self::close); nothing is deleted in that case.
    pub fn cleanup(&self) -> Result<(), Error> {
        if !self.stopped.load(Ordering::SeqCst) {
            return Err(Error::NotStopped);
        }

        remove_tree(&self.data_dir);

        Ok(())
    }
}

/// Best-effort post-order removal. Failed deletes are logged and skipped.
fn remove_tree(path: &Path) {
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let child = entry.path();
            if entry.file_type().is_ok_and(|file_type| file_type.is_dir()) {
                remove_tree(&child);
            } else if let Err(e) = std::fs::remove_file(&child) {
                debug!("failed to remove {}: {e}", child.display());
            }
        }
    }

    if let Err(e) = std::fs::remove_dir(path) {
        debug!("failed to remove {}: {e}", path.display());
    }
}
