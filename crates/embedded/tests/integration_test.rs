//! Integration tests for the embedded coordination server fixture.

use std::sync::Arc;

use quorum_embedded::{EmbeddedServer, Error};
use quorum_engine_memory::MemoryEngine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn connect(addr: &str) -> TcpStream {
    TcpStream::connect(addr).await.expect("failed to connect")
}

/// Sends one command line and reads the one-line response.
async fn roundtrip(stream: &mut TcpStream, command: &str) -> String {
    stream.write_all(command.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response).await.unwrap();
    response.trim_end().to_string()
}

#[tokio::test]
async fn test_end_to_end_lifecycle() {
    init_tracing();

    let engine = MemoryEngine::new();
    let port = quorum_util::allocate_port().expect("no free port");
    let server = EmbeddedServer::with_port(&engine, port).unwrap();

    assert_eq!(server.port(), port);
    assert_eq!(server.connect_string(), format!("127.0.0.1:{port}"));

    server.start().await.unwrap();

    let mut client = connect(&server.connect_string()).await;
    assert_eq!(roundtrip(&mut client, "CREATE /nodes/a hello").await, "OK");
    assert_eq!(roundtrip(&mut client, "GET /nodes/a").await, "VALUE hello");
    drop(client);

    server.close().await;

    // The listener is gone, so a fresh connection attempt must be refused.
    assert!(TcpStream::connect(server.connect_string()).await.is_err());

    // Connect string stays valid after the server is stopped.
    assert_eq!(server.connect_string(), format!("127.0.0.1:{port}"));

    let data_dir = server.data_dir().to_path_buf();
    assert!(data_dir.join("txn.log").exists());

    server.cleanup().unwrap();
    assert!(!data_dir.exists());
}

#[tokio::test]
async fn test_unused_port_constructor() {
    init_tracing();

    let engine = MemoryEngine::new();
    let server = EmbeddedServer::new(&engine).unwrap();

    assert!(server.port() >= 15000);
    assert_eq!(
        server.connect_string(),
        format!("127.0.0.1:{}", server.port())
    );

    server.start().await.unwrap();

    let mut client = connect(&server.connect_string()).await;
    assert_eq!(roundtrip(&mut client, "CREATE /nodes/a hello").await, "OK");
    drop(client);

    server.close().await;
    server.cleanup().unwrap();
}

#[tokio::test]
async fn test_start_is_idempotent() {
    init_tracing();

    let engine = MemoryEngine::new();
    let server = EmbeddedServer::new(&engine).unwrap();

    server.start().await.unwrap();
    server.start().await.unwrap();

    // Still serving after the repeated call.
    let mut client = connect(&server.connect_string()).await;
    assert_eq!(roundtrip(&mut client, "CREATE /nodes/a hello").await, "OK");
    drop(client);

    server.close().await;
    server.cleanup().unwrap();
}

#[tokio::test]
async fn test_concurrent_start_activates_exactly_once() {
    init_tracing();

    let engine = MemoryEngine::new();
    let server = Arc::new(EmbeddedServer::new(&engine).unwrap());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let server = server.clone();
        handles.push(tokio::spawn(async move { server.start().await }));
    }

    // A second activation would surface the listener's AlreadyStarted error,
    // so ten Ok results prove the body ran exactly once.
    for handle in handles {
        handle.await.unwrap().expect("start failed");
    }

    let mut client = connect(&server.connect_string()).await;
    assert_eq!(roundtrip(&mut client, "CREATE /nodes/a hello").await, "OK");
    drop(client);

    server.close().await;
    server.cleanup().unwrap();
}

#[tokio::test]
async fn test_close_before_start_is_noop() {
    init_tracing();

    let engine = MemoryEngine::new();
    let server = EmbeddedServer::new(&engine).unwrap();

    server.close().await;

    // The no-op close does not count as stopping, so cleanup still refuses
    // and the data directory is untouched.
    assert!(matches!(server.cleanup(), Err(Error::NotStopped)));
    assert!(server.data_dir().exists());

    // The fixture is still in its initial state and can be started.
    server.start().await.unwrap();
    server.close().await;
    server.cleanup().unwrap();
}

#[tokio::test]
async fn test_concurrent_close_runs_shutdown_once() {
    init_tracing();

    let engine = MemoryEngine::new();
    let server = Arc::new(EmbeddedServer::new(&engine).unwrap());

    server.start().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let server = server.clone();
        handles.push(tokio::spawn(async move { server.close().await }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(TcpStream::connect(server.connect_string()).await.is_err());

    // Repeated close after the fact is still a no-op.
    server.close().await;

    server.cleanup().unwrap();
}

#[tokio::test]
async fn test_cleanup_before_stop_fails_fast() {
    init_tracing();

    let engine = MemoryEngine::new();
    let server = EmbeddedServer::new(&engine).unwrap();

    server.start().await.unwrap();

    let mut client = connect(&server.connect_string()).await;
    assert_eq!(roundtrip(&mut client, "CREATE /nodes/a hello").await, "OK");
    drop(client);

    let err = server.cleanup().unwrap_err();
    assert_eq!(err.to_string(), "not stopped");

    // Nothing was deleted.
    assert!(server.data_dir().join("txn.log").exists());

    server.close().await;
    server.cleanup().unwrap();
}

#[tokio::test]
async fn test_close_flushes_engine_snapshot() {
    init_tracing();

    let engine = MemoryEngine::new();
    let server = EmbeddedServer::new(&engine).unwrap();

    server.start().await.unwrap();

    let mut client = connect(&server.connect_string()).await;
    assert_eq!(roundtrip(&mut client, "CREATE /nodes/b world").await, "OK");
    assert_eq!(roundtrip(&mut client, "CREATE /nodes/a hello").await, "OK");
    drop(client);

    server.close().await;

    let snapshot = std::fs::read_to_string(server.data_dir().join("snapshot")).unwrap();
    assert_eq!(snapshot, "/nodes/a hello\n/nodes/b world\n");

    server.cleanup().unwrap();
}
