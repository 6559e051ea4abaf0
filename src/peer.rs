//! Hand-off of a successfully connected socket to the peer layer (spec
//! §4.8). The peer table itself is out of scope (spec §1); this module
//! defines the interface the connector consumes plus a minimal in-memory
//! implementation used by tests and the default binary wiring.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;

/// External collaborator: accepts a connected, handshaken socket and
/// starts relaying data on it. Out of scope beyond this interface.
pub trait PeerLayer: Send + Sync {
    /// Registers `socket` as the transport for the peer at `addr`, having
    /// taken `connect_duration` to establish. Implements the two-level
    /// table-then-peer locking from spec §4.8: the peer table lock is held
    /// only long enough to find and lock the individual peer, then
    /// released before any further work happens under the peer lock.
    ///
    /// The peer not being found immediately after a connection it itself
    /// requested is a logic error and is logged at `error` severity
    /// (spec's "emergency severity" has no direct analogue in `tracing`).
    fn hand_off(&self, addr: Ipv6Addr, socket: TcpStream, connect_duration: Duration);
}

/// A single peer's mutable state, guarded independently of the table so
/// that other peers remain reachable while this one is being updated.
#[derive(Default)]
pub struct Peer {
    pub socket: Option<TcpStream>,
    pub last_connect_duration: Option<Duration>,
    keepalives_sent: u64,
}

impl Peer {
    /// Sends one keepalive immediately after a socket is registered, per
    /// spec §4.8. The actual wire format is owned by the peer/data-path
    /// layer, out of scope here; this records the attempt.
    pub fn send_keepalive_now(&mut self) {
        self.keepalives_sent += 1;
    }

    pub fn keepalives_sent(&self) -> u64 {
        self.keepalives_sent
    }
}

/// Reference peer table: table-level `RwLock` guarding membership, each
/// peer independently guarded by its own `Mutex` so the table lock is
/// never held while a peer is being mutated.
#[derive(Default)]
pub struct PeerTable {
    peers: RwLock<std::collections::HashMap<Ipv6Addr, Arc<Mutex<Peer>>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-registers a peer so hand-off can find it. In the real system
    /// this entry is created by whatever discovered the peer in the first
    /// place; the connector only ever looks requests up, never inserts.
    pub fn insert(&self, addr: Ipv6Addr) {
        self.peers
            .write()
            .entry(addr)
            .or_insert_with(|| Arc::new(Mutex::new(Peer::default())));
    }

    pub fn get(&self, addr: Ipv6Addr) -> Option<Arc<Mutex<Peer>>> {
        let table = self.peers.read();
        table.get(&addr).cloned()
    }
}

impl PeerLayer for PeerTable {
    fn hand_off(&self, addr: Ipv6Addr, socket: TcpStream, connect_duration: Duration) {
        let Some(peer) = self.get(addr) else {
            tracing::error!(%addr, "Peer missing from table immediately after a connection it requested");
            return;
        };

        let mut peer = peer.lock();
        peer.socket = Some(socket);
        peer.last_connect_duration = Some(connect_duration);
        peer.send_keepalive_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hand_off_registers_socket_and_sends_keepalive() {
        let table = PeerTable::new();
        let addr: Ipv6Addr = "::1".parse().unwrap();
        table.insert(addr);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let client = TcpStream::connect(local_addr).await.unwrap();
        accept.await.unwrap();

        table.hand_off(addr, client, Duration::from_millis(5));

        let peer = table.get(addr).unwrap();
        let peer = peer.lock();
        assert!(peer.socket.is_some());
        assert_eq!(peer.keepalives_sent(), 1);
    }

    #[tokio::test]
    async fn hand_off_to_missing_peer_does_not_panic() {
        let table = PeerTable::new();
        let addr: Ipv6Addr = "::2".parse().unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let client = TcpStream::connect(local_addr).await.unwrap();
        accept.await.unwrap();

        table.hand_off(addr, client, Duration::from_millis(1));
    }
}
