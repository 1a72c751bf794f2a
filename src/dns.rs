//! Raw DNS query packets
//!
//! Just enough of the RFC 1035 wire format to emit a query for a dotted
//! name and to pull the question name back out of a captured packet.
//! Responses, answer sections, and name compression are out of scope: the
//! channel only ever reads queries.

use thiserror::Error;

use crate::codec::MAX_LABEL_LEN;

/// DNS header length
const HEADER_LEN: usize = 12;

/// QCLASS IN
const QCLASS_IN: u16 = 0x0001;

/// Malformed or non-query packets; the capture path drops these silently.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short")]
    Truncated,

    #[error("packet is not a query")]
    NotAQuery,

    #[error("label at offset {0} overruns the packet")]
    BadLabel(usize),

    #[error("label is not valid ascii")]
    NotAscii,

    #[error("label too long to encode: {0} bytes")]
    OversizeLabel(usize),
}

/// Build a standard query packet for `name`.
pub fn build_query_packet(
    name: &str,
    transaction_id: u16,
    qtype: u16,
) -> Result<Vec<u8>, PacketError> {
    let mut packet = Vec::with_capacity(HEADER_LEN + name.len() + 6);

    // Header (12 bytes)
    packet.extend_from_slice(&transaction_id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00]); // Flags: standard query, RD
    packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT: 1 question
    packet.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

    // Question section
    for label in name.split('.').filter(|label| !label.is_empty()) {
        if label.len() > MAX_LABEL_LEN {
            return Err(PacketError::OversizeLabel(label.len()));
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&QCLASS_IN.to_be_bytes());

    Ok(packet)
}

/// Extract the question name from a captured DNS query packet.
///
/// Accepts any query record type; rejects responses and truncated
/// packets. The caller treats every error here as non-channel traffic.
pub fn extract_query_name(packet: &[u8]) -> Result<String, PacketError> {
    if packet.len() < HEADER_LEN {
        return Err(PacketError::Truncated);
    }

    // QR bit set means response
    if packet[2] & 0x80 != 0 {
        return Err(PacketError::NotAQuery);
    }

    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    if qdcount == 0 {
        return Err(PacketError::NotAQuery);
    }

    let mut labels: Vec<&str> = Vec::new();
    let mut pos = HEADER_LEN;
    loop {
        let len = *packet.get(pos).ok_or(PacketError::Truncated)? as usize;
        if len == 0 {
            break;
        }
        // A compression pointer in a question name claims a length ≥0xc0
        // and falls out here as an overrun
        pos += 1;
        if pos + len > packet.len() {
            return Err(PacketError::BadLabel(pos));
        }
        let label =
            std::str::from_utf8(&packet[pos..pos + len]).map_err(|_| PacketError::NotAscii)?;
        labels.push(label);
        pos += len;
    }

    Ok(labels.join("."))
}
