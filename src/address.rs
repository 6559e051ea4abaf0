//! Maps a peer's virtual IPv6 address onto the hidden-service hostname the
//! SOCKS proxy should resolve (spec §4.1).

use std::net::Ipv6Addr;

use data_encoding::BASE32_NOPAD;

use crate::config::Config;

/// External collaborator: the hosts-file subsystem. Out of scope here
/// beyond the query interface the translator consumes.
pub trait HostsLookup {
    /// Refresh the cache if it is stale. Must be called before `lookup`.
    fn check(&mut self);

    /// Reverse-lookup a hostname for a virtual address, if one is known.
    fn lookup(&self, addr: Ipv6Addr) -> Option<String>;

    /// Records a name learned out-of-band (the DNS fast path, spec §4.7)
    /// so a later `lookup` can find it. A no-op for implementations that
    /// don't cache, e.g. `NoHosts`.
    fn record(&mut self, addr: Ipv6Addr, name: String);
}

/// A `HostsLookup` that never has anything cached, used when
/// `hosts_lookup` is disabled or as a default in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHosts;

impl HostsLookup for NoHosts {
    fn check(&mut self) {}

    fn lookup(&self, _addr: Ipv6Addr) -> Option<String> {
        None
    }

    fn record(&mut self, _addr: Ipv6Addr, _name: String) {}
}

/// An in-memory `HostsLookup` populated only by `record`, standing in for
/// the hosts-file subsystem (out of scope per spec §1) in the default
/// binary wiring and in tests.
#[derive(Debug, Default, Clone)]
pub struct CachingHosts {
    entries: std::collections::HashMap<Ipv6Addr, String>,
}

impl CachingHosts {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostsLookup for CachingHosts {
    fn check(&mut self) {}

    fn lookup(&self, addr: Ipv6Addr) -> Option<String> {
        self.entries.get(&addr).cloned()
    }

    fn record(&mut self, addr: Ipv6Addr, name: String) {
        self.entries.insert(addr, name);
    }
}

/// Result of `resolve_name`: the derived hostname, plus whether it came
/// from the hosts cache (`Looked`) or the deterministic encoding
/// (`Synthesized`). Design Note "`resolve_name` semantics" calls for this
/// explicit two-variant result rather than the source's `-1` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub name: String,
    pub origin: NameOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOrigin {
    Looked,
    Synthesized,
}

impl ResolvedName {
    pub fn found(&self) -> bool {
        self.origin == NameOrigin::Looked
    }
}

/// The number of trailing address bytes carrying the hidden-service
/// identity; the remaining leading bytes are the overlay's routing prefix
/// and carry no information about the destination service.
const ENCODED_SUFFIX_BYTES: usize = 10;

pub fn resolve_name(addr: Ipv6Addr, config: &Config, hosts: &mut dyn HostsLookup) -> ResolvedName {
    if config.hosts_lookup {
        hosts.check();

        if let Some(name) = hosts.lookup(addr) {
            return ResolvedName {
                name,
                origin: NameOrigin::Looked,
            };
        }
    }

    ResolvedName {
        name: synthesize_hostname(addr, &config.domain),
        origin: NameOrigin::Synthesized,
    }
}

/// Deterministically derives a hostname from the trailing bytes of a
/// virtual address, independent of any hosts-file state. Always succeeds:
/// there is no input for which this encoding is invalid.
pub fn synthesize_hostname(addr: Ipv6Addr, domain: &str) -> String {
    let octets = addr.octets();
    let suffix = &octets[octets.len() - ENCODED_SUFFIX_BYTES..];

    let label = BASE32_NOPAD.encode(suffix).to_ascii_lowercase();

    format!("{label}.{domain}")
}
