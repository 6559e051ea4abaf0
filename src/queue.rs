//! The de-duplicated, insertion-ordered request collection (spec §4.5).
//!
//! The source uses a hand-linked singly linked list; Design Note "Raw
//! intrusive linked list" only requires a de-duplicated set keyed by
//! `addr`, iterable in a stable order. `IndexMap` satisfies exactly that
//! contract with O(1) lookup instead of a linear scan per `enqueue`.

use std::net::Ipv6Addr;
use std::time::Instant;

use indexmap::IndexMap;

use crate::request::Request;

#[derive(Debug, Default)]
pub struct RequestQueue {
    requests: IndexMap<Ipv6Addr, Request>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new request, unless one with the same address already
    /// exists — a re-request while one is in flight is a no-op (spec §4.5,
    /// tested by scenario 6 in spec §8).
    pub fn enqueue(&mut self, addr: Ipv6Addr, perm: bool, now: Instant) -> bool {
        if self.requests.contains_key(&addr) {
            return false;
        }

        self.requests.insert(addr, Request::new(addr, perm, now));
        true
    }

    pub fn get(&self, addr: &Ipv6Addr) -> Option<&Request> {
        self.requests.get(addr)
    }

    pub fn get_mut(&mut self, addr: &Ipv6Addr) -> Option<&mut Request> {
        self.requests.get_mut(addr)
    }

    pub fn remove(&mut self, addr: &Ipv6Addr) -> Option<Request> {
        self.requests.shift_remove(addr)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ipv6Addr, &Request)> {
        self.requests.iter()
    }

    pub fn addrs(&self) -> Vec<Ipv6Addr> {
        self.requests.keys().copied().collect()
    }

    /// Removes every request currently in the `Delete` phase. Spec §4.7
    /// "Cleanup": terminal within one sweep.
    pub fn sweep_deleted(&mut self) {
        self.requests
            .retain(|_, req| req.phase != crate::request::Phase::Delete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_is_idempotent() {
        let mut queue = RequestQueue::new();
        let addr: Ipv6Addr = "fd87:d87e:eb43:0000:0000:0000:0000:0001".parse().unwrap();
        let now = Instant::now();

        assert!(queue.enqueue(addr, false, now));
        assert!(!queue.enqueue(addr, true, now));

        assert_eq!(queue.len(), 1);
        assert!(!queue.get(&addr).unwrap().perm);
    }

    #[test]
    fn remove_drops_entry() {
        let mut queue = RequestQueue::new();
        let addr: Ipv6Addr = "::1".parse().unwrap();
        let now = Instant::now();

        queue.enqueue(addr, false, now);
        assert!(queue.remove(&addr).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn sweep_removes_only_deleted() {
        let mut queue = RequestQueue::new();
        let now = Instant::now();
        let a: Ipv6Addr = "::1".parse().unwrap();
        let b: Ipv6Addr = "::2".parse().unwrap();

        queue.enqueue(a, false, now);
        queue.enqueue(b, false, now);
        queue.get_mut(&a).unwrap().phase = crate::request::Phase::Delete;

        queue.sweep_deleted();

        assert_eq!(queue.len(), 1);
        assert!(queue.get(&b).is_some());
    }
}
