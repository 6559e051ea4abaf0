//! Sans-io encode/decode for the two outbound proxy protocols (spec §4.2,
//! §4.3). Kept free of any socket type so the round-trip laws in spec §8
//! can be tested without I/O.

pub mod socks4a;
pub mod socks5;
