//! Socket-level tests driving a worker pool against a fake hub.

use contun_pool::cli::PoolConfig;
use contun_pool::Supervisor;
use contun_proto::{Destination, Mode};
use ntest::timeout;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

fn config(hub: SocketAddr, mode: Mode, declared: Option<Destination>) -> PoolConfig {
    PoolConfig {
        hub_host: hub.ip().to_string(),
        hub_port: hub.port(),
        mode,
        workers: 1,
        retry_delay: Duration::from_millis(100),
        declared,
    }
}

async fn fake_hub() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn start_pool(cfg: PoolConfig) -> broadcast::Sender<()> {
    let (shutdown, _) = broadcast::channel(1);
    tokio::spawn(Supervisor::new(cfg).run(shutdown.clone()));
    shutdown
}

async fn read_line(conn: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    conn.read_line(&mut line).await.unwrap();
    line.trim_end().to_string()
}

/// A local port guaranteed to have no listener.
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
#[timeout(20000)]
async fn direct_worker_declares_its_target() {
    let (hub, hub_addr) = fake_hub().await;
    let declared = Destination::classify("10.0.0.5", 22);
    let _shutdown = start_pool(config(hub_addr, Mode::Direct, Some(declared)));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    assert_eq!(
        read_line(&mut conn).await,
        "HELLO 1 direct DEST ipv4 10.0.0.5 22"
    );
}

#[tokio::test]
#[timeout(20000)]
async fn socks_worker_declares_no_target() {
    let (hub, hub_addr) = fake_hub().await;
    let _shutdown = start_pool(config(hub_addr, Mode::Socks, None));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    assert_eq!(read_line(&mut conn).await, "HELLO 1 socks");
}

#[tokio::test]
#[timeout(20000)]
async fn rejected_handshake_triggers_redial() {
    let (hub, hub_addr) = fake_hub().await;
    let _shutdown = start_pool(config(hub_addr, Mode::Socks, None));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    read_line(&mut conn).await;
    conn.write_all(b"GO AWAY\n").await.unwrap();
    drop(conn);

    // The worker must come back after its retry delay.
    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    assert_eq!(read_line(&mut conn).await, "HELLO 1 socks");
}

#[tokio::test]
#[timeout(20000)]
async fn mismatched_direct_request_is_rejected_without_dialling() {
    let forged = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let forged_port = forged.local_addr().unwrap().port();

    let (hub, hub_addr) = fake_hub().await;
    let declared = Destination::classify("10.0.0.5", 22);
    let _shutdown = start_pool(config(hub_addr, Mode::Direct, Some(declared)));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    read_line(&mut conn).await;
    conn.write_all(b"OK\n").await.unwrap();

    conn.write_all(format!("REQUEST CONNECT ipv4 127.0.0.1 {forged_port}\n").as_bytes())
        .await
        .unwrap();
    let reply = read_line(&mut conn).await;
    assert!(reply.starts_with("REPLY 1 "), "got {reply:?}");

    // No connection may reach the forged destination.
    assert!(
        tokio::time::timeout(Duration::from_millis(300), forged.accept())
            .await
            .is_err(),
        "worker dialled a mismatched destination"
    );
}

#[tokio::test]
#[timeout(20000)]
async fn dial_failure_maps_to_refused_and_session_survives() {
    let (hub, hub_addr) = fake_hub().await;
    let _shutdown = start_pool(config(hub_addr, Mode::Socks, None));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    read_line(&mut conn).await;
    conn.write_all(b"OK\n").await.unwrap();

    let port = dead_port().await;
    conn.write_all(format!("REQUEST CONNECT ipv4 127.0.0.1 {port}\n").as_bytes())
        .await
        .unwrap();
    let reply = read_line(&mut conn).await;
    assert!(reply.starts_with("REPLY 5 "), "got {reply:?}");

    // The control connection is still usable after a failed dial.
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    conn.write_all(format!("REQUEST CONNECT ipv4 127.0.0.1 {target_port}\n").as_bytes())
        .await
        .unwrap();
    let reply = read_line(&mut conn).await;
    assert!(reply.starts_with("REPLY 0 "), "got {reply:?}");
    target.accept().await.unwrap();
}

#[tokio::test]
#[timeout(20000)]
async fn invalid_destination_gets_general_failure() {
    let (hub, hub_addr) = fake_hub().await;
    let _shutdown = start_pool(config(hub_addr, Mode::Socks, None));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    read_line(&mut conn).await;
    conn.write_all(b"OK\n").await.unwrap();

    conn.write_all(b"REQUEST CONNECT ipv4 not-an-ip 80\n")
        .await
        .unwrap();
    let reply = read_line(&mut conn).await;
    assert!(reply.starts_with("REPLY 1 "), "got {reply:?}");
}

#[tokio::test]
#[timeout(20000)]
async fn malformed_control_line_closes_the_session() {
    let (hub, hub_addr) = fake_hub().await;
    let _shutdown = start_pool(config(hub_addr, Mode::Socks, None));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    read_line(&mut conn).await;
    conn.write_all(b"OK\n").await.unwrap();

    conn.write_all(b"REQUEST FROBNICATE ipv4 127.0.0.1 80\n")
        .await
        .unwrap();
    let mut rest = Vec::new();
    conn.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty(), "worker wrote {rest:?} instead of closing");

    // And the slot is replaced.
    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    assert_eq!(read_line(&mut conn).await, "HELLO 1 socks");
}

#[tokio::test]
#[timeout(20000)]
async fn empty_lines_are_keepalive() {
    let (hub, hub_addr) = fake_hub().await;
    let _shutdown = start_pool(config(hub_addr, Mode::Socks, None));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    read_line(&mut conn).await;
    conn.write_all(b"OK\n").await.unwrap();

    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    conn.write_all(b"\n\r\n").await.unwrap();
    conn.write_all(format!("REQUEST CONNECT ipv4 127.0.0.1 {target_port}\n").as_bytes())
        .await
        .unwrap();
    let reply = read_line(&mut conn).await;
    assert!(reply.starts_with("REPLY 0 "), "got {reply:?}");
}

#[tokio::test]
#[timeout(20000)]
async fn streams_bytes_to_the_target_and_back() {
    let (hub, hub_addr) = fake_hub().await;
    let _shutdown = start_pool(config(hub_addr, Mode::Socks, None));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    read_line(&mut conn).await;
    conn.write_all(b"OK\n").await.unwrap();

    // Echo target.
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = target.accept().await.unwrap();
        let (mut read, mut write) = sock.split();
        let _ = tokio::io::copy(&mut read, &mut write).await;
    });

    conn.write_all(format!("REQUEST CONNECT ipv4 127.0.0.1 {target_port}\n").as_bytes())
        .await
        .unwrap();
    let reply = read_line(&mut conn).await;
    assert!(reply.starts_with("REPLY 0 "), "got {reply:?}");

    conn.write_all(b"hello-through-contun").await.unwrap();
    let mut echoed = [0u8; 20];
    conn.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello-through-contun");
}

#[tokio::test]
#[timeout(20000)]
async fn stream_bytes_pipelined_with_the_request_close_the_session() {
    let (hub, hub_addr) = fake_hub().await;
    let _shutdown = start_pool(config(hub_addr, Mode::Socks, None));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    read_line(&mut conn).await;
    conn.write_all(b"OK\n").await.unwrap();

    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();

    // Payload sent in the same write as the request is still buffered when
    // the worker replies; it must refuse to bridge instead of desyncing.
    conn.write_all(
        format!("REQUEST CONNECT ipv4 127.0.0.1 {target_port}\nearly-payload").as_bytes(),
    )
    .await
    .unwrap();
    let reply = read_line(&mut conn).await;
    assert!(reply.starts_with("REPLY 0 "), "got {reply:?}");

    let mut rest = Vec::new();
    conn.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty(), "worker bridged early bytes: {rest:?}");

    // The slot is replaced after the protocol error.
    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    assert_eq!(read_line(&mut conn).await, "HELLO 1 socks");
}

#[tokio::test]
#[timeout(20000)]
async fn shutdown_stops_redialling() {
    let (hub, hub_addr) = fake_hub().await;
    let shutdown = start_pool(config(hub_addr, Mode::Socks, None));

    let (conn, _) = hub.accept().await.unwrap();
    let mut conn = BufReader::new(conn);
    read_line(&mut conn).await;

    let _ = shutdown.send(());
    // Cancellation twice behaves as once.
    let _ = shutdown.send(());
    drop(conn);

    assert!(
        tokio::time::timeout(Duration::from_millis(500), hub.accept())
            .await
            .is_err(),
        "worker redialled after shutdown"
    );
}
