//! Abstract interface for coordination engines hosted by the embedded test
//! server.
//!
//! The embedded server only manages lifecycle. Consensus, storage, and the
//! client protocol all belong to the engine behind these traits.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error as StdError;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

/// A coordination engine that can be hosted by the embedded server.
pub trait Engine: Send + Sync + 'static {
    /// Error type for engine initialization and listener startup.
    type Error: Debug + StdError + Send + Sync + 'static;

    /// Engine instance bound to a data directory.
    type Instance: EngineInstance;

    /// Listener speaking the engine's client protocol.
    type Listener: EngineListener<Error = Self::Error, Instance = Self::Instance>;

    /// Creates an instance that persists its transaction log and snapshots
    /// under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot set up its durable state.
    fn initialize(&self, data_dir: &Path) -> Result<Self::Instance, Self::Error>;

    /// Prepares a listener for `addr`. The socket is not bound until
    /// [`EngineListener::startup`] is called.
    fn prepare(&self, addr: SocketAddr) -> Self::Listener;
}

/// A running (or stopped) engine instance.
#[async_trait]
pub trait EngineInstance: Send + Sync + 'static {
    /// Whether the instance is currently able to serve requests.
    fn is_running(&self) -> bool;

    /// Stops the instance, flushing durable state to its data directory.
    /// Calling this on an already-stopped instance is a no-op.
    async fn shutdown(&self);
}

/// Accepts client connections and serves them against an engine instance.
#[async_trait]
pub trait EngineListener: Send + Sync + 'static {
    /// Error type for listener startup.
    type Error: Debug + StdError + Send + Sync + 'static;

    /// The instance type served by this listener.
    type Instance: EngineInstance;

    /// Binds the prepared address and begins serving connections against
    /// `instance`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener is already serving or the socket
    /// cannot be bound.
    async fn startup(&self, instance: Arc<Self::Instance>) -> Result<(), Self::Error>;

    /// Signals the listener to stop accepting connections.
    fn shutdown(&self);

    /// Waits until the accept loop and all connection workers have
    /// terminated.
    async fn join(&self);
}
