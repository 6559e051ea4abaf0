use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// How many times a temporary (`perm = false`) request is retried before
/// it is dropped from the queue.
pub const MAX_RETRY: u32 = 10;

/// How many times the UDP DNS path retransmits a PTR query before falling
/// back to the deterministic hostname encoding.
pub const DNS_RETRY: u32 = 3;

/// Backoff applied after a failed connect or rejected handshake.
pub const TOR_SOCKS_CONN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a single DNS query is allowed to go unanswered, and the upper
/// bound on the reactor's blocking wait.
pub const DNS_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection mode, mirroring the source's `socks5` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConnectMode {
    /// SOCKS4a CONNECT through the proxy.
    Socks4a,
    /// SOCKS5 CONNECT (no-auth, DOMAIN address type) through the proxy.
    Socks5,
    /// Bypass the proxy and connect to the resolved hostname directly.
    Direct,
}

/// Runtime configuration for the connector.
///
/// Field names intentionally echo the source's option names (spec §6) so
/// that the mapping from spec to struct is one-to-one.
#[derive(Debug, Clone, Parser)]
#[command(name = "onioncat-socks", about = "SOCKS connector core")]
pub struct Config {
    /// Address of the local SOCKS proxy. Omit (or give a family-0 address)
    /// to disable the connector: `enqueue` then becomes a no-op.
    #[arg(long, env = "OCAT_SOCKS_DST")]
    pub socks_dst: Option<SocketAddr>,

    /// Connection mode: socks4a, socks5 or direct.
    #[arg(long, value_enum, env = "OCAT_SOCKS5", default_value = "socks5")]
    pub socks5: ConnectMode,

    /// Destination TCP port carried in SOCKS requests, or used for DIRECT
    /// resolution.
    #[arg(long, env = "OCAT_DEST_PORT", default_value_t = 80)]
    pub ocat_dest_port: u16,

    /// User-id string for SOCKS4a requests.
    #[arg(long, env = "OCAT_USRNAME", default_value = "")]
    pub usrname: String,

    /// Suffix appended to deterministically derived hostnames.
    #[arg(long, env = "OCAT_DOMAIN", default_value = "onion")]
    pub domain: String,

    /// Consult the hosts subsystem for a reverse mapping before falling
    /// back to deterministic encoding.
    #[arg(long, env = "OCAT_HOSTS_LOOKUP", default_value_t = false)]
    pub hosts_lookup: bool,

    /// Enable the UDP PTR-query DNS resolution path.
    #[arg(long, env = "OCAT_DNS_LOOKUP", default_value_t = false)]
    pub dns_lookup: bool,

    /// Nameserver consulted by the DNS path. The source reads this out of
    /// `/etc/resolv.conf`; that file-parsing concern is out of scope here,
    /// so the address is taken as configuration directly.
    #[arg(long, env = "OCAT_NS_ADDR", default_value = "127.0.0.1")]
    pub ocat_ns_addr: IpAddr,

    /// UDP port of the nameserver used by the DNS path.
    #[arg(long, env = "OCAT_NS_PORT", default_value_t = 53)]
    pub ocat_ns_port: u16,
}

impl Config {
    /// A family-0 proxy address disables the connector entirely (spec §6).
    pub fn connector_enabled(&self) -> bool {
        self.socks_dst.is_some()
    }

    pub fn nameserver(&self) -> SocketAddr {
        SocketAddr::new(self.ocat_ns_addr, self.ocat_ns_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socks_dst: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9050)),
            socks5: ConnectMode::Socks5,
            ocat_dest_port: 80,
            usrname: String::new(),
            domain: "onion".to_string(),
            hosts_lookup: false,
            dns_lookup: false,
            ocat_ns_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ocat_ns_port: 53,
        }
    }
}
