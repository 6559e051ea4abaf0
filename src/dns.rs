//! DNS PTR query wire format for the UDP resolution path (spec §4.7
//! `DNS_SENT`, UDP variant). Standard DNS wire format via `hickory-proto`
//! rather than a hand-rolled encoder, per the corpus's own preference for
//! `hickory-resolver`/`hickory-proto` wherever DNS wire format is needed.

use std::net::Ipv6Addr;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use hickory_proto::serialize::binary::BinEncodable;

use crate::error::ConnectError;

/// Encodes a PTR query for `addr`'s reverse-DNS name, tagged with
/// transaction id `id`.
pub fn encode_ptr_query(id: u16, addr: Ipv6Addr) -> Result<Vec<u8>, ConnectError> {
    let name = Name::from(std::net::IpAddr::V6(addr));

    let mut query = Query::new();
    query.set_name(name);
    query.set_query_type(RecordType::PTR);

    let mut message = Message::new();
    message.set_id(id);
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(query);

    message
        .to_bytes()
        .map_err(|_| ConnectError::protocol("failed to encode DNS PTR query"))
}

/// Parses a PTR response, validating the transaction id and extracting the
/// first PTR record's target as a hostname. The caller is responsible for
/// validating that the datagram's source address and port match the
/// nameserver the query went to (spec §4.7) before calling this.
pub fn decode_ptr_response(buf: &[u8], expected_id: u16) -> Result<String, ConnectError> {
    let message = Message::from_vec(buf)
        .map_err(|_| ConnectError::protocol("malformed DNS response"))?;

    if message.id() != expected_id {
        return Err(ConnectError::protocol("DNS response id mismatch"));
    }

    message
        .answers()
        .iter()
        .find_map(|record| match record.data() {
            RData::PTR(ptr) => Some(ptr.0.to_utf8()),
            _ => None,
        })
        .ok_or_else(|| ConnectError::protocol("DNS response had no PTR answer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_round_trips_id() {
        let addr: Ipv6Addr = "fd87:d87e:eb43:0000:0000:0000:0000:0001".parse().unwrap();

        let encoded = encode_ptr_query(0xBEEF, addr).unwrap();
        let message = Message::from_vec(&encoded).unwrap();

        assert_eq!(message.id(), 0xBEEF);
        assert_eq!(message.message_type(), MessageType::Query);
        assert_eq!(message.queries()[0].query_type(), RecordType::PTR);
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let addr: Ipv6Addr = "fd87:d87e:eb43:0000:0000:0000:0000:0001".parse().unwrap();
        let encoded = encode_ptr_query(1, addr).unwrap();

        assert!(decode_ptr_response(&encoded, 2).is_err());
    }
}
