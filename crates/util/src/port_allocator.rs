//! Ephemeral port allocation for test servers.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    net::{SocketAddr, TcpListener},
    sync::{LazyLock, Mutex},
    time::SystemTime,
};

/// How many candidate ports a single allocation may probe before giving up.
const MAX_PROBES: u16 = 10000;

/// Global allocation cursor starting from a random port (to avoid conflicts
/// with other services and with concurrently running test binaries).
static NEXT_PORT: LazyLock<Mutex<u16>> = LazyLock::new(|| {
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    // Random starting port in range 15000-25000
    let random_offset = (hasher.finish() % 10000) as u16;
    Mutex::new(15000 + random_offset)
});

/// Allocates the next port that is currently free for binding on localhost.
///
/// Ports handed out by this function are distinct within the process, but the
/// port is only known to be free at probe time; another process may still win
/// the race to bind it.
///
/// Returns `None` if no free port is found after probing [`MAX_PROBES`]
/// candidates.
#[must_use]
pub fn allocate_port() -> Option<u16> {
    let mut port_guard = NEXT_PORT.lock().unwrap();

    for _ in 0..MAX_PROBES {
        let port = *port_guard;
        *port_guard = port_guard.checked_add(1)?;

        if is_port_available(port) {
            return Some(port);
        }
    }

    None
}

/// Checks whether a port is free by attempting to bind it on localhost.
#[must_use]
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).is_ok()
}

/// Allocates a localhost socket address with a currently free port.
#[must_use]
pub fn allocate_socket_addr() -> Option<SocketAddr> {
    allocate_port().map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_port_is_bindable() {
        let port = allocate_port().expect("no free port");
        assert!(port >= 15000);
        assert!(TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).is_ok());
    }

    #[test]
    fn test_allocated_ports_are_distinct() {
        let first = allocate_port().expect("no free port");
        let second = allocate_port().expect("no free port");
        assert_ne!(first, second);
    }

    #[test]
    fn test_bound_port_is_unavailable() {
        let port = allocate_port().expect("no free port");
        let _listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).unwrap();
        assert!(!is_port_available(port));
    }
}
