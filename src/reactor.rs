//! The connector reactor: a readiness-driven state machine sweeping every
//! pending request once per iteration (spec §4.7).
//!
//! Concurrency model (spec §5): this is realized as a single Tokio task.
//! Instead of hand-rolled readiness sets over raw file descriptors, every
//! request that has left `NEW` is driven by exactly one future held in a
//! `FuturesUnordered` — the same pattern the teacher's gateway event loop
//! uses for its bounded DNS-resolution pool (`resolve_tasks:
//! FuturesTupleSet`). A future resolves exactly when the socket it holds
//! would have become read- or write-ready, so polling the stream *is* the
//! multiplexed readiness wait; `tokio::select!` plays the role of the
//! spec's bounded blocking wait, with the teacher's `Sleep` future (reset
//! to `now + DNS_RETRY_TIMEOUT` at the top of every sweep) standing in for
//! the bound itself.

use std::net::{Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::random;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::address::{resolve_name, HostsLookup};
use crate::codec::{socks4a, socks5};
use crate::config::{Config, ConnectMode, DNS_RETRY, DNS_RETRY_TIMEOUT, MAX_RETRY, TOR_SOCKS_CONN_TIMEOUT};
use crate::control::{ControlMessage, ControlReceiver};
use crate::direct;
use crate::dns as dns_wire;
use crate::error::ConnectError;
use crate::peer::PeerLayer;
use crate::queue::RequestQueue;
use crate::request::Phase;
use crate::sleep::Sleep;

/// Outcome of one request's in-flight future: either the handshake
/// finished (successfully or not) or the DNS phase finished (resolved,
/// exhausted, or hard I/O failure).
enum Outcome {
    Connected {
        addr: Ipv6Addr,
        socket: TcpStream,
        connect_duration: Duration,
    },
    ConnectFailed {
        addr: Ipv6Addr,
    },
    DnsResolved {
        addr: Ipv6Addr,
        hostname: String,
    },
    DnsExhausted {
        addr: Ipv6Addr,
    },
    DnsFailed {
        addr: Ipv6Addr,
    },
}

pub struct Connector<H, P> {
    config: Config,
    queue: RequestQueue,
    control_rx: ControlReceiver,
    hosts: H,
    peer_layer: Arc<P>,
    in_flight: FuturesUnordered<BoxFuture<'static, Outcome>>,
    terminate: Arc<AtomicBool>,
    /// Bounds the per-sweep blocking wait, reset to `now + DNS_RETRY_TIMEOUT`
    /// at the top of every sweep (spec §5).
    wake: Sleep,
}

impl<H, P> Connector<H, P>
where
    H: HostsLookup + Send + 'static,
    P: PeerLayer + 'static,
{
    pub fn new(
        config: Config,
        control_rx: ControlReceiver,
        hosts: H,
        peer_layer: Arc<P>,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            queue: RequestQueue::new(),
            control_rx,
            hosts,
            peer_layer,
            in_flight: FuturesUnordered::new(),
            terminate,
            wake: Sleep::default(),
        }
    }

    /// Runs the reactor until the termination flag is set. Never returns
    /// an error: every per-request failure is handled internally per
    /// spec §7.
    pub async fn run(mut self) {
        loop {
            if self.terminate.load(Ordering::Relaxed) {
                tracing::debug!("Connector reactor observed termination flag, exiting");
                return;
            }

            let now = Instant::now();
            let addrs = self.queue.addrs();
            for addr in addrs {
                self.dispatch_new(addr, now).await;
            }

            Pin::new(&mut self.wake).reset(Instant::now() + DNS_RETRY_TIMEOUT);

            tokio::select! {
                () = &mut self.wake => {}
                Some(msg) = self.control_rx.recv() => {
                    self.handle_control(msg);
                }
                Some(outcome) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.handle_outcome(outcome, Instant::now());
                }
            }

            self.queue.sweep_deleted();
        }
    }

    /// Dispatches a single `NEW`-phase request: retry accounting, the DNS
    /// fast path, and finally spawning the connect-and-handshake future.
    /// No-op for requests in any other phase (spec §4.7).
    async fn dispatch_new(&mut self, addr: Ipv6Addr, now: Instant) {
        {
            let Some(req) = self.queue.get_mut(&addr) else {
                return;
            };

            if req.phase != Phase::New {
                return;
            }

            if req.idle(now) {
                return;
            }

            req.retry += 1;

            if !req.perm && req.retry > MAX_RETRY {
                tracing::warn!(%addr, "Temporary request exceeded retry budget, deleting");
                req.phase = Phase::Delete;
                return;
            }
        }

        if self.config.dns_lookup {
            let retry = self.queue.get(&addr).map(|r| r.retry).unwrap_or(0);
            let resolved = resolve_name(addr, &self.config, &mut self.hosts);

            if !resolved.found() && retry <= 1 {
                if self.start_dns_query(addr, now).is_ok() {
                    return;
                }
                // Opening the UDP socket failed: fall through to a direct
                // proxy/direct connect attempt in this same sweep.
            }
        }

        let resolved = resolve_name(addr, &self.config, &mut self.hosts);
        let hostname = resolved.name;

        match self.config.socks5 {
            ConnectMode::Direct => {
                match direct::resolve(&hostname, self.config.ocat_dest_port).await {
                    Ok(target) => self.spawn_connect(addr, now, target, hostname),
                    Err(_) => {
                        // Spec §4.7: "failure -> skip this sweep, state unchanged".
                        tracing::debug!(%addr, %hostname, "Direct resolution failed, will retry next sweep");
                    }
                }
            }
            ConnectMode::Socks4a | ConnectMode::Socks5 => {
                let Some(proxy) = self.config.socks_dst else {
                    return;
                };
                self.spawn_connect(addr, now, proxy, hostname);
            }
        }
    }

    fn spawn_connect(&mut self, addr: Ipv6Addr, now: Instant, target: SocketAddr, hostname: String) {
        let Some(req) = self.queue.get_mut(&addr) else {
            return;
        };
        req.phase = Phase::Connecting;
        req.connect_time = Some(now);

        let mode = self.config.socks5;
        let dest_port = self.config.ocat_dest_port;
        let usrname = self.config.usrname.clone();

        self.in_flight
            .push(Box::pin(connect_and_handshake(
                addr, target, mode, hostname, dest_port, usrname,
            )));
    }

    fn start_dns_query(&mut self, addr: Ipv6Addr, now: Instant) -> std::io::Result<()> {
        let Some(req) = self.queue.get_mut(&addr) else {
            return Ok(());
        };

        let id: u16 = random();
        let nameserver = self.config.nameserver();
        let query = dns_wire::encode_ptr_query(id, addr)
            .map_err(|_| std::io::Error::other("failed to encode PTR query"))?;

        req.phase = Phase::DnsSent;
        req.id = id;
        req.ns_addr = Some(nameserver);
        req.restart_time = now + DNS_RETRY_TIMEOUT;

        self.in_flight
            .push(Box::pin(drive_dns(addr, nameserver, id, query)));

        Ok(())
    }

    fn handle_control(&mut self, msg: ControlMessage) {
        let now = Instant::now();

        match msg {
            ControlMessage::Enqueue { addr, perm } => {
                if !self.config.connector_enabled() {
                    tracing::debug!(%addr, "Connector disabled (no SOCKS destination configured), dropping enqueue");
                    return;
                }

                if !self.queue.enqueue(addr, perm, now) {
                    tracing::trace!(%addr, "Duplicate enqueue ignored, request already pending");
                }
            }
            ControlMessage::Wakeup => {
                tracing::trace!("Wakeup received, performing one scheduling pass");
            }
            ControlMessage::DumpQueue(reply) => {
                let listing = self.render_dump();
                let _ = reply.send(listing);
            }
        }
    }

    fn render_dump(&mut self) -> String {
        let mut out = String::new();
        let addrs: Vec<Ipv6Addr> = self.queue.iter().map(|(addr, _)| *addr).collect();

        for (index, addr) in addrs.iter().enumerate() {
            let hostname = resolve_name(*addr, &self.config, &mut self.hosts).name;
            let Some(req) = self.queue.get(addr) else {
                continue;
            };
            out.push_str(&req.dump_line(index, &hostname));
            out.push('\n');
        }

        out
    }

    fn handle_outcome(&mut self, outcome: Outcome, now: Instant) {
        match outcome {
            Outcome::Connected {
                addr,
                socket,
                connect_duration,
            } => {
                self.peer_layer.hand_off(addr, socket, connect_duration);

                if let Some(req) = self.queue.get_mut(&addr) {
                    req.phase = Phase::Delete;
                }
            }
            Outcome::ConnectFailed { addr } => {
                if let Some(req) = self.queue.get_mut(&addr) {
                    req.reschedule(now, TOR_SOCKS_CONN_TIMEOUT);
                }
            }
            Outcome::DnsResolved { addr, hostname } => {
                self.hosts.record(addr, hostname);

                if let Some(req) = self.queue.get_mut(&addr) {
                    req.phase = Phase::New;
                    req.retry = 0;
                    req.restart_time = now;
                    req.ns_addr = None;
                    req.ns_src = None;
                }
            }
            Outcome::DnsExhausted { addr } => {
                // Design Note / SPEC_FULL §9: bias the next `NEW` pass to
                // skip the DNS fast path and fall back to the
                // deterministic hostname encoding.
                if let Some(req) = self.queue.get_mut(&addr) {
                    req.phase = Phase::New;
                    req.retry = 1;
                    req.restart_time = now;
                }
            }
            Outcome::DnsFailed { addr } => {
                if let Some(req) = self.queue.get_mut(&addr) {
                    req.phase = Phase::Delete;
                }
            }
        }
    }
}

async fn connect_and_handshake(
    addr: Ipv6Addr,
    target: SocketAddr,
    mode: ConnectMode,
    hostname: String,
    dest_port: u16,
    usrname: String,
) -> Outcome {
    match try_connect_and_handshake(target, mode, &hostname, dest_port, &usrname).await {
        Ok((socket, connect_duration)) => Outcome::Connected {
            addr,
            socket,
            connect_duration,
        },
        Err(error) => {
            tracing::debug!(%addr, %error, "Connect/handshake failed, rescheduling");
            Outcome::ConnectFailed { addr }
        }
    }
}

pub(crate) async fn try_connect_and_handshake(
    target: SocketAddr,
    mode: ConnectMode,
    hostname: &str,
    dest_port: u16,
    usrname: &str,
) -> Result<(TcpStream, Duration), ConnectError> {
    let started = Instant::now();
    let mut stream = TcpStream::connect(target).await?;

    match mode {
        ConnectMode::Direct => {}
        ConnectMode::Socks4a => {
            let frame = socks4a::encode_request(dest_port, usrname, hostname);
            stream.write_all(&frame).await?;

            let mut reply = [0u8; socks4a::REPLY_LEN];
            stream.read_exact(&mut reply).await?;
            socks4a::decode_reply(&reply)?;
        }
        ConnectMode::Socks5 => {
            stream.write_all(&socks5::encode_greeting()).await?;

            let mut greeting_reply = [0u8; socks5::GREETING_REPLY_LEN];
            stream.read_exact(&mut greeting_reply).await?;
            socks5::decode_greeting_reply(&greeting_reply)?;

            let request = socks5::encode_request(hostname, dest_port);
            stream.write_all(&request).await?;

            let mut header = [0u8; socks5::REQUEST_REPLY_HEADER_LEN];
            stream.read_exact(&mut header).await?;
            let atyp = socks5::decode_request_reply_header(&header)?;

            match socks5::reply_trailer_len(atyp) {
                Some(len) => {
                    let mut trailer = vec![0u8; len];
                    stream.read_exact(&mut trailer).await?;
                }
                None => {
                    let mut len_byte = [0u8; 1];
                    stream.read_exact(&mut len_byte).await?;
                    let mut trailer = vec![0u8; len_byte[0] as usize + 2];
                    stream.read_exact(&mut trailer).await?;
                }
            }
        }
    }

    Ok((stream, started.elapsed()))
}

/// Drives the UDP DNS PTR-query path for one request: send, wait up to
/// `DNS_RETRY_TIMEOUT` for a reply, retransmit up to `DNS_RETRY` times.
/// The socket is `connect`ed to the nameserver, so the kernel itself
/// enforces spec §4.7's "source address and port MUST match the
/// nameserver" requirement — any datagram from elsewhere is never
/// delivered to this socket.
async fn drive_dns(addr: Ipv6Addr, nameserver: SocketAddr, id: u16, query: Vec<u8>) -> Outcome {
    let bind_addr: SocketAddr = if nameserver.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };

    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(socket) => socket,
        Err(_) => return Outcome::DnsFailed { addr },
    };

    if socket.connect(nameserver).await.is_err() {
        return Outcome::DnsFailed { addr };
    }

    let mut buf = [0u8; 512];

    for _ in 0..DNS_RETRY {
        if socket.send(&query).await.is_err() {
            return Outcome::DnsFailed { addr };
        }

        match timeout(DNS_RETRY_TIMEOUT, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => match dns_wire::decode_ptr_response(&buf[..n], id) {
                Ok(hostname) => return Outcome::DnsResolved { addr, hostname },
                Err(_) => continue,
            },
            Ok(Err(_)) => return Outcome::DnsFailed { addr },
            Err(_elapsed) => continue,
        }
    }

    Outcome::DnsExhausted { addr }
}
