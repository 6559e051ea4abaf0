//! SOCKS4a request/reply framing (spec §4.2).

use crate::error::ConnectError;

/// The SOCKS4a sentinel destination address: `0.0.0.1`, signalling
/// "hostname follows" to the proxy.
const SENTINEL_ADDR: [u8; 4] = [0, 0, 0, 1];

const VERSION: u8 = 4;
const CMD_CONNECT: u8 = 1;

pub const REPLY_LEN: usize = 8;
const REPLY_VERSION: u8 = 0;
const REPLY_GRANTED: u8 = 90;

/// Encodes a CONNECT request. A single write of the returned buffer MUST
/// deliver the entire frame; a short write is a failure, not something to
/// resume mid-frame.
pub fn encode_request(port: u16, userid: &str, hostname: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + userid.len() + hostname.len());

    buf.push(VERSION);
    buf.push(CMD_CONNECT);
    buf.extend_from_slice(&port.to_be_bytes());
    buf.extend_from_slice(&SENTINEL_ADDR);
    buf.extend_from_slice(userid.as_bytes());
    buf.push(0);
    buf.extend_from_slice(hostname.as_bytes());
    buf.push(0);

    buf
}

/// Parses a freshly encoded request back into its constituent fields.
/// Used only by the round-trip tests below — the proxy side of this
/// exchange is out of scope for the crate itself.
pub fn decode_request(buf: &[u8]) -> Option<(u16, String, String)> {
    if buf.len() < 9 || buf[0] != VERSION || buf[1] != CMD_CONNECT || &buf[4..8] != &SENTINEL_ADDR[..] {
        return None;
    }

    let port = u16::from_be_bytes([buf[2], buf[3]]);
    let rest = &buf[8..];

    let mut parts = rest.splitn(2, |&b| b == 0);
    let userid = String::from_utf8(parts.next()?.to_vec()).ok()?;
    let hostname_and_tail = parts.next()?;
    let hostname_end = hostname_and_tail.iter().position(|&b| b == 0)?;
    let hostname = String::from_utf8(hostname_and_tail[..hostname_end].to_vec()).ok()?;

    Some((port, userid, hostname))
}

/// Validates an 8-byte SOCKS4a reply. Any version other than 0 or status
/// other than "granted" is a protocol error.
pub fn decode_reply(buf: &[u8; REPLY_LEN]) -> Result<(), ConnectError> {
    if buf[0] != REPLY_VERSION {
        return Err(ConnectError::protocol("unexpected SOCKS4a reply version"));
    }

    if buf[1] != REPLY_GRANTED {
        return Err(ConnectError::protocol("SOCKS4a request rejected"));
    }

    Ok(())
}
