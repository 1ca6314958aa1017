//! Shared utilities for the Quorum test-support crates.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod port_allocator;

pub use port_allocator::{allocate_port, allocate_socket_addr, is_port_available};
