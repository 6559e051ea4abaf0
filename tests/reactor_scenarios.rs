//! Reactor-level scenario tests against a loopback `TcpListener` standing
//! in for the SOCKS proxy, covering the concrete scenarios.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use onioncat_socks::address::CachingHosts;
use onioncat_socks::config::{Config, ConnectMode};
use onioncat_socks::control_channel;
use onioncat_socks::peer::PeerLayer;
use onioncat_socks::reactor::Connector;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const TARGET: &str = "fd87:d87e:eb43:0000:0000:0000:0000:0001";

/// Captures every hand-off instead of actually relaying traffic.
struct RecordingPeerLayer {
    tx: mpsc::UnboundedSender<Ipv6Addr>,
}

impl PeerLayer for RecordingPeerLayer {
    fn hand_off(&self, addr: Ipv6Addr, _socket: tokio::net::TcpStream, _connect_duration: Duration) {
        let _ = self.tx.send(addr);
    }
}

#[tokio::test]
async fn happy_socks5_hands_off_and_removes_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut greeting = [0u8; 3];
        socket.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [5, 1, 0]);
        socket.write_all(&[5, 0]).await.unwrap();

        let mut header = [0u8; 5];
        socket.read_exact(&mut header).await.unwrap();
        assert_eq!(&header, &[5, 1, 0, 3, 22]);
        let mut hostname = [0u8; 22];
        socket.read_exact(&mut hostname).await.unwrap();
        assert_eq!(&hostname, b"facebookcorewwwi.onion");
        let mut port = [0u8; 2];
        socket.read_exact(&mut port).await.unwrap();

        socket
            .write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
    });

    let (control, control_rx) = control_channel();
    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
    let peer_layer = Arc::new(RecordingPeerLayer { tx: peer_tx });
    let terminate = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let config = Config {
        socks5: ConnectMode::Socks5,
        socks_dst: Some(proxy_addr),
        ..Config::default()
    };

    let connector = Connector::new(config, control_rx, CachingHosts::new(), peer_layer, terminate.clone());
    let reactor = tokio::spawn(connector.run());

    let addr: Ipv6Addr = TARGET.parse().unwrap();
    control.enqueue(addr, false);

    let handed_off = peer_rx.recv().await;
    assert_eq!(handed_off, Some(addr));

    server.await.unwrap();
    terminate.store(true, std::sync::atomic::Ordering::Relaxed);
    control.wakeup();
    reactor.abort();
}

#[tokio::test(start_paused = true)]
async fn socks4a_rejection_reschedules_the_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = vec![0u8; 512];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(&[0, 0x5B, 0, 0, 0, 0, 0, 0]).await;
        }
    });

    let (control, control_rx) = control_channel();
    let (peer_tx, _peer_rx) = mpsc::unbounded_channel();
    let peer_layer = Arc::new(RecordingPeerLayer { tx: peer_tx });
    let terminate = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let config = Config {
        socks5: ConnectMode::Socks4a,
        socks_dst: Some(proxy_addr),
        ..Config::default()
    };

    let connector = Connector::new(config, control_rx, CachingHosts::new(), peer_layer, terminate);
    tokio::spawn(connector.run());

    let addr: Ipv6Addr = TARGET.parse().unwrap();
    control.enqueue(addr, false);

    let dumped = poll_until_dump(&control, |dump| dump.contains("state=NEW") && dump.contains("retry=1")).await;
    assert!(dumped.contains("retry=1"), "expected a retried NEW request, got: {dumped}");
}

#[tokio::test(start_paused = true)]
async fn temporary_request_is_deleted_after_retry_budget_exhausted() {
    // A listener bound then immediately dropped leaves the port refusing
    // every subsequent connection attempt, simulating "every connect
    // fails immediately".
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    drop(listener);

    let (control, control_rx) = control_channel();
    let (peer_tx, _peer_rx) = mpsc::unbounded_channel();
    let peer_layer = Arc::new(RecordingPeerLayer { tx: peer_tx });
    let terminate = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let config = Config {
        socks5: ConnectMode::Socks5,
        socks_dst: Some(proxy_addr),
        ..Config::default()
    };

    let connector = Connector::new(config, control_rx, CachingHosts::new(), peer_layer, terminate);
    tokio::spawn(connector.run());

    let addr: Ipv6Addr = TARGET.parse().unwrap();
    control.enqueue(addr, false);

    let empty = poll_until_dump(&control, |dump| dump.is_empty()).await;
    assert!(empty.is_empty(), "expected the request to be deleted, got: {empty}");
}

#[tokio::test]
async fn wakeup_without_enqueue_changes_no_state() {
    let (control, control_rx) = control_channel();
    let (peer_tx, _peer_rx) = mpsc::unbounded_channel();
    let peer_layer = Arc::new(RecordingPeerLayer { tx: peer_tx });
    let terminate = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let config = Config::default();
    let connector = Connector::new(config, control_rx, CachingHosts::new(), peer_layer, terminate);
    tokio::spawn(connector.run());

    control.wakeup();

    let dump = control.dump_queue().await.unwrap();
    assert!(dump.is_empty());
}

#[tokio::test]
async fn duplicate_enqueue_while_connecting_is_a_no_op() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    // Accept but never speak, so the request stays in `CONNECTING`.
    let _server = tokio::spawn(async move {
        let _ = listener.accept().await;
        std::future::pending::<()>().await;
    });

    let (control, control_rx) = control_channel();
    let (peer_tx, _peer_rx) = mpsc::unbounded_channel();
    let peer_layer = Arc::new(RecordingPeerLayer { tx: peer_tx });
    let terminate = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let config = Config {
        socks5: ConnectMode::Socks5,
        socks_dst: Some(proxy_addr),
        ..Config::default()
    };

    let connector = Connector::new(config, control_rx, CachingHosts::new(), peer_layer, terminate);
    tokio::spawn(connector.run());

    let addr: Ipv6Addr = TARGET.parse().unwrap();
    control.enqueue(addr, false);

    poll_until_dump(&control, |dump| dump.contains("CONNECTING")).await;

    control.enqueue(addr, false);

    let dump = control.dump_queue().await.unwrap();
    assert_eq!(dump.lines().count(), 1, "duplicate enqueue must not grow the queue");
}

async fn poll_until_dump(
    control: &onioncat_socks::ControlHandle,
    mut predicate: impl FnMut(&str) -> bool,
) -> String {
    for _ in 0..1000 {
        if let Some(dump) = control.dump_queue().await {
            if predicate(&dump) {
                return dump;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    control.dump_queue().await.unwrap_or_default()
}
