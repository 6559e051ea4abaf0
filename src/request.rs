//! The request record and its state tag (spec §3).
//!
//! The source's `fd` field is not represented here at all: ownership of
//! the live socket lives for exactly as long as the in-flight future
//! driving the request's current operation (see `reactor.rs`), so "a
//! request in a socket-bearing state has a valid fd" becomes "the
//! request's address has a matching entry in the reactor's in-flight
//! set" — a structural fact rather than an invariant to assert.

use std::net::{Ipv6Addr, SocketAddr};
use std::time::Instant;

/// Where a request currently sits in its protocol lifecycle. `Ready` from
/// spec §3 is not represented: a successful handshake hands the socket off
/// and marks `Delete` in the same step, so there is no observable instant
/// in which a request is `Ready` but still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    DnsSent,
    Connecting,
    S4aReqSent,
    S5GreetSent,
    S5ReqSent,
    Delete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::New => "NEW",
            Phase::DnsSent => "DNS_SENT",
            Phase::Connecting => "CONNECTING",
            Phase::S4aReqSent => "S4A_REQ_SENT",
            Phase::S5GreetSent => "S5_GREET_SENT",
            Phase::S5ReqSent => "S5_REQ_SENT",
            Phase::Delete => "DELETE",
        }
    }

    /// States that invariant-require a live in-flight operation (spec §3:
    /// "A request with state ∈ {CONNECTING, S4A_REQ_SENT, S5_GREET_SENT,
    /// S5_REQ_SENT, DNS_SENT} has a valid fd").
    pub fn has_in_flight_socket(&self) -> bool {
        !matches!(self, Phase::New | Phase::Delete)
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub addr: Ipv6Addr,
    pub perm: bool,
    pub phase: Phase,
    pub retry: u32,
    pub connect_time: Option<Instant>,
    pub restart_time: Instant,
    pub id: u16,
    pub ns_addr: Option<SocketAddr>,
    pub ns_src: Option<SocketAddr>,
}

impl Request {
    pub fn new(addr: Ipv6Addr, perm: bool, now: Instant) -> Self {
        Self {
            addr,
            perm,
            phase: Phase::New,
            retry: 0,
            connect_time: None,
            restart_time: now,
            id: 0,
            ns_addr: None,
            ns_src: None,
        }
    }

    pub fn idle(&self, now: Instant) -> bool {
        self.restart_time > now
    }

    /// Reschedule after a failure: close is implicit (the in-flight future
    /// driving this request is simply dropped by the caller), go back to
    /// `NEW`, back off by `timeout`. Retry counters are preserved so
    /// `perm = false` requests eventually converge to removal.
    pub fn reschedule(&mut self, now: Instant, timeout: std::time::Duration) {
        self.phase = Phase::New;
        self.connect_time = None;
        self.restart_time = now + timeout;
    }

    pub fn dump_line(&self, index: usize, hostname: &str) -> String {
        let perm_label = if self.perm { "perm" } else { "temp" };
        let connect_time = fmt_instant(self.connect_time);
        let restart_time = fmt_instant(Some(self.restart_time));

        format!(
            "{index}  {addr}  {hostname}  state={state}  {perm_label}(perm={perm_num})  retry={retry}  connect_time={connect_time}  restart_time={restart_time}",
            index = index,
            addr = self.addr,
            hostname = hostname,
            state = self.phase.as_str(),
            perm_label = perm_label,
            perm_num = self.perm as u8,
            retry = self.retry,
            connect_time = connect_time,
            restart_time = restart_time,
        )
    }
}

fn fmt_instant(instant: Option<Instant>) -> String {
    match instant {
        None => "-".to_string(),
        Some(instant) => {
            let now = Instant::now();
            if instant >= now {
                format!("+{:.3}s", (instant - now).as_secs_f64())
            } else {
                format!("-{:.3}s", (now - instant).as_secs_f64())
            }
        }
    }
}
