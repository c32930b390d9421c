//! Integration tests for CheckVault
//!
//! Tests the complete system including server, client, and persistence

use checkvault::{CheckpointServer, Client, ServerConfig, ShutdownHandle};
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

struct TestServer {
    addr: String,
    shutdown: ShutdownHandle,
    task: JoinHandle<checkvault::Result<()>>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let server = CheckpointServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());
        Self {
            addr,
            shutdown,
            task,
        }
    }

    fn client(&self) -> Client {
        Client::new(self.addr.clone())
    }

    async fn stop(self) {
        self.shutdown.shutdown().unwrap();
        self.task.await.unwrap().unwrap();
    }
}

fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        aof_path: dir.join("checkpoints.aof"),
        ..ServerConfig::default()
    }
}

/// A raw protocol connection, for tests that need to control framing.
async fn raw_connect(addr: &str) -> (Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, writer) = stream.into_split();
    (BufReader::new(reader).lines(), writer)
}

async fn next_response(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> String {
    lines.next_line().await.unwrap().expect("connection closed")
}

#[tokio::test]
async fn test_checkpoint_survives_compaction_and_restart() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(test_config(dir.path())).await;
    let client = server.client();

    client
        .set_checkpoint("orders_pipeline", "42", None)
        .await
        .unwrap();
    assert_eq!(
        client.get_checkpoint("orders_pipeline").await.unwrap(),
        Some("42".to_string())
    );
    client.compact().await.unwrap();
    server.stop().await;

    let server = TestServer::start(test_config(dir.path())).await;
    assert_eq!(
        server.client().get_checkpoint("orders_pipeline").await.unwrap(),
        Some("42".to_string())
    );
    server.stop().await;
}

#[tokio::test]
async fn test_restart_without_compaction_replays_history() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(test_config(dir.path())).await;
    let client = server.client();

    for position in 1..=20 {
        client
            .set_checkpoint("orders_pipeline", &position.to_string(), None)
            .await
            .unwrap();
    }
    client.set_checkpoint("billing", "7", None).await.unwrap();
    server.stop().await;

    let server = TestServer::start(test_config(dir.path())).await;
    let client = server.client();
    assert_eq!(
        client.get_checkpoint("orders_pipeline").await.unwrap(),
        Some("20".to_string())
    );
    assert_eq!(
        client.get_checkpoint("billing").await.unwrap(),
        Some("7".to_string())
    );
    server.stop().await;
}

#[tokio::test]
async fn test_missing_pipeline_is_null() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(test_config(dir.path())).await;

    let (mut lines, mut writer) = raw_connect(&server.addr).await;
    writer
        .write_all(b"GET_CHECKPOINT missing_pipeline\n")
        .await
        .unwrap();
    assert_eq!(next_response(&mut lines).await, "NULL");

    assert_eq!(
        server.client().get_checkpoint("missing_pipeline").await.unwrap(),
        None
    );
    server.stop().await;
}

#[tokio::test]
async fn test_invalid_ttl_leaves_store_unchanged() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(test_config(dir.path())).await;

    let (mut lines, mut writer) = raw_connect(&server.addr).await;
    writer.write_all(b"SET_CHECKPOINT p 1 abc\n").await.unwrap();
    assert!(next_response(&mut lines).await.starts_with("ERROR "));

    // The connection stays open after a protocol error.
    writer.write_all(b"GET_CHECKPOINT p\n").await.unwrap();
    assert_eq!(next_response(&mut lines).await, "NULL");
    server.stop().await;
}

#[tokio::test]
async fn test_protocol_errors() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(test_config(dir.path())).await;

    let (mut lines, mut writer) = raw_connect(&server.addr).await;
    writer
        .write_all(b"PING\nGET_CHECKPOINT\nSET_CHECKPOINT p\n\n")
        .await
        .unwrap();
    assert_eq!(next_response(&mut lines).await, "ERROR unknown command");
    assert_eq!(
        next_response(&mut lines).await,
        "ERROR wrong number of arguments for 'GET_CHECKPOINT'"
    );
    assert_eq!(
        next_response(&mut lines).await,
        "ERROR wrong number of arguments for 'SET_CHECKPOINT'"
    );
    assert_eq!(next_response(&mut lines).await, "ERROR empty command");

    server.client().compact().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_command_split_across_writes() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(test_config(dir.path())).await;

    let (mut lines, mut writer) = raw_connect(&server.addr).await;
    writer.write_all(b"SET_CHECK").await.unwrap();
    writer.flush().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    writer.write_all(b"POINT p 9\r\nGET_CHECKPOINT p\r\n").await.unwrap();

    assert_eq!(next_response(&mut lines).await, "OK");
    assert_eq!(next_response(&mut lines).await, "9");
    server.stop().await;
}

#[tokio::test]
async fn test_two_clients_see_each_others_writes() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(test_config(dir.path())).await;

    let (mut a_lines, mut a_writer) = raw_connect(&server.addr).await;
    let (mut b_lines, mut b_writer) = raw_connect(&server.addr).await;

    a_writer.write_all(b"SET_CHECKPOINT p 5\n").await.unwrap();
    assert_eq!(next_response(&mut a_lines).await, "OK");

    b_writer.write_all(b"GET_CHECKPOINT p\n").await.unwrap();
    assert_eq!(next_response(&mut b_lines).await, "5");
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_pipelines() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(test_config(dir.path())).await;

    let mut handles = Vec::new();
    for id in 0..10 {
        let client = server.client();
        handles.push(tokio::spawn(async move {
            let pipeline = format!("pipeline_{}", id);
            for position in 0..20 {
                client
                    .set_checkpoint(&pipeline, &position.to_string(), None)
                    .await
                    .unwrap();
                assert_eq!(
                    client.get_checkpoint(&pipeline).await.unwrap(),
                    Some(position.to_string())
                );
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let client = server.client();
    for id in 0..10 {
        assert_eq!(
            client
                .get_checkpoint(&format!("pipeline_{}", id))
                .await
                .unwrap(),
            Some("19".to_string())
        );
    }
    server.stop().await;
}

#[tokio::test]
async fn test_checkpoint_expires() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(test_config(dir.path())).await;
    let client = server.client();

    client.set_checkpoint("p", "v", Some(1)).await.unwrap();
    assert_eq!(client.get_checkpoint("p").await.unwrap(), Some("v".to_string()));

    sleep(Duration::from_millis(1200)).await;
    assert_eq!(client.get_checkpoint("p").await.unwrap(), None);
    assert_eq!(client.get_checkpoint("p").await.unwrap(), None);

    // Expired entries do not come back through compaction and restart.
    client.compact().await.unwrap();
    server.stop().await;

    let server = TestServer::start(test_config(dir.path())).await;
    assert_eq!(server.client().get_checkpoint("p").await.unwrap(), None);
    server.stop().await;
}

#[tokio::test]
async fn test_overlong_line_closes_connection() {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        max_line_length: 32,
        ..test_config(dir.path())
    };
    let server = TestServer::start(config).await;

    let (mut lines, mut writer) = raw_connect(&server.addr).await;
    writer.write_all(&[b'x'; 64]).await.unwrap();
    assert_eq!(next_response(&mut lines).await, "ERROR line exceeds 32 bytes");
    assert!(lines.next_line().await.unwrap_or(None).is_none());

    // Other clients are unaffected.
    server.client().set_checkpoint("p", "1", None).await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_connection_limit() {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        max_connections: 1,
        ..test_config(dir.path())
    };
    let server = TestServer::start(config).await;

    let (mut held_lines, mut held_writer) = raw_connect(&server.addr).await;
    held_writer.write_all(b"GET_CHECKPOINT p\n").await.unwrap();
    assert_eq!(next_response(&mut held_lines).await, "NULL");

    // The rejected client never writes, so the server closes it cleanly
    // after the error line.
    let (mut rejected, _rejected_writer) = raw_connect(&server.addr).await;
    let line = timeout(Duration::from_secs(2), rejected.next_line())
        .await
        .expect("no rejection within 2s")
        .unwrap();
    assert_eq!(line.as_deref(), Some("ERROR too many connections"));
    let eof = timeout(Duration::from_secs(2), rejected.next_line())
        .await
        .expect("rejected connection left open");
    assert!(eof.unwrap_or(None).is_none());

    // The held client is still served.
    held_writer.write_all(b"GET_CHECKPOINT p\n").await.unwrap();
    assert_eq!(next_response(&mut held_lines).await, "NULL");

    drop(held_lines);
    drop(held_writer);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.client().get_checkpoint("p").await.unwrap(), None);
    server.stop().await;
}

#[tokio::test]
async fn test_client_that_stops_reading_does_not_stall_others() {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        write_timeout_ms: 30_000,
        ..test_config(dir.path())
    };
    let server = TestServer::start(config).await;
    let client = server.client();

    let value = "v".repeat(60_000);
    client.set_checkpoint("big", &value, None).await.unwrap();

    // Hundreds of large responses are far more than the socket buffers hold
    // while this client is not reading.
    let requests = 400;
    let (mut stalled_lines, mut stalled_writer) = raw_connect(&server.addr).await;
    stalled_writer
        .write_all(b"GET_CHECKPOINT big\n".repeat(requests).as_slice())
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;

    let answered = timeout(Duration::from_secs(2), client.get_checkpoint("p"))
        .await
        .expect("server stalled behind a client that is not reading");
    assert_eq!(answered.unwrap(), None);
    timeout(Duration::from_secs(2), client.set_checkpoint("p", "1", None))
        .await
        .expect("server stalled behind a client that is not reading")
        .unwrap();

    // Once it reads again, every response arrives, in order.
    for _ in 0..requests {
        assert_eq!(next_response(&mut stalled_lines).await, value);
    }
    server.stop().await;
}

#[tokio::test]
async fn test_error_handling() {
    // Nothing listens on a port that was just released.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = Client::new(addr.to_string()).get_checkpoint("p").await;
    assert!(result.is_err());
}
