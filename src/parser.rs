//! Packet Parser
//!
//! Decomposes raw IPv6/UDP(/CoAP) packets into the ordered list of field
//! values a rule of a given stack describes. Addresses and ports are resolved
//! to their device/application roles using the packet direction.

use bitvec::prelude::*;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::udp::UdpPacket;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::bit_buffer::{into_padded_bytes, realigned};
use crate::checksum::udp_ipv6_checksum;
use crate::coap::CoapMessage;
use crate::error::{Result, SchcError};
use crate::field_id::FieldId;
use crate::rule::ProtocolStack;

pub const IPV6_HEADER_LEN: usize = 40;
pub const UDP_HEADER_LEN: usize = 8;
pub const IPV6_UDP_HEADER_LEN: usize = IPV6_HEADER_LEN + UDP_HEADER_LEN;

// =============================================================================
// Direction
// =============================================================================

/// Packet direction for directional field resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,   // DEV -> APP
    Down, // APP -> DEV
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(format!("unknown direction '{}', expected 'up' or 'down'", other)),
        }
    }
}

// =============================================================================
// Field Values
// =============================================================================

/// A field value as an exact-length bit string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue(BitVec<u8, Msb0>);

impl FieldValue {
    /// The low `bits` bits of `value`.
    pub fn from_u64(value: u64, bits: usize) -> Self {
        let bits = bits.min(64);
        let be = value.to_be_bytes();
        FieldValue(realigned(&be.view_bits::<Msb0>()[64 - bits..]))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        FieldValue(BitVec::from_slice(bytes))
    }

    pub fn from_bitvec(bits: BitVec<u8, Msb0>) -> Self {
        FieldValue(bits)
    }

    pub fn bits(&self) -> &BitSlice<u8, Msb0> {
        &self.0
    }

    /// Length in bits.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric value, for fields of at most 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0.len() > 64 {
            return None;
        }
        Some(self.0.iter().by_vals().fold(0u64, |acc, bit| (acc << 1) | u64::from(bit)))
    }

    /// The value as bytes, zero-padding a partial last byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        into_padded_bytes(self.0.clone())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u64() {
            Some(v) if self.len() <= 32 => write!(f, "{}", v),
            _ => write!(f, "0x{}", hex::encode(self.to_bytes())),
        }
    }
}

// =============================================================================
// Parsed packet
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedField {
    pub fid: FieldId,
    /// Occurrence of this field id in the packet, counted from 1.
    pub position: u8,
    pub value: FieldValue,
}

impl ParsedField {
    fn new(fid: FieldId, value: FieldValue) -> Self {
        Self {
            fid,
            position: 1,
            value,
        }
    }
}

/// A packet decomposed under one protocol stack.
#[derive(Debug, Clone)]
pub struct ParsedPacket {
    pub stack: ProtocolStack,
    pub direction: Direction,
    /// Header fields in wire order.
    pub fields: Vec<ParsedField>,
    /// Bytes following the described headers.
    pub payload: Vec<u8>,
}

impl ParsedPacket {
    pub fn get(&self, fid: FieldId, position: u8) -> Option<&ParsedField> {
        self.fields.iter().find(|f| f.fid == fid && f.position == position)
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Decompose `raw` under `stack`.
///
/// Packets whose length fields disagree with their size, or whose UDP checksum
/// is wrong, are rejected: a rule that recomputes those fields could not
/// restore them.
pub fn parse_packet(raw: &[u8], stack: ProtocolStack, direction: Direction) -> Result<ParsedPacket> {
    match stack {
        ProtocolStack::NoCompression => Ok(ParsedPacket {
            stack,
            direction,
            fields: vec![ParsedField::new(FieldId::Payload, FieldValue::from_bytes(raw))],
            payload: Vec::new(),
        }),
        ProtocolStack::Ipv6Udp => {
            let fields = parse_ipv6_udp(raw, direction)?;
            Ok(ParsedPacket {
                stack,
                direction,
                fields,
                payload: raw[IPV6_UDP_HEADER_LEN..].to_vec(),
            })
        }
        ProtocolStack::Ipv6UdpCoap => {
            let mut fields = parse_ipv6_udp(raw, direction)?;
            let payload = parse_coap(&raw[IPV6_UDP_HEADER_LEN..], &mut fields)?;
            Ok(ParsedPacket {
                stack,
                direction,
                fields,
                payload,
            })
        }
    }
}

fn parse_ipv6_udp(raw: &[u8], direction: Direction) -> Result<Vec<ParsedField>> {
    if raw.len() < IPV6_UDP_HEADER_LEN {
        return Err(SchcError::PacketParse(format!(
            "IPv6/UDP needs at least {} bytes, got {}",
            IPV6_UDP_HEADER_LEN,
            raw.len()
        )));
    }
    let ipv6 = Ipv6Packet::new(raw)
        .ok_or_else(|| SchcError::PacketParse("truncated IPv6 header".into()))?;
    if ipv6.get_version() != 6 {
        return Err(SchcError::PacketParse(format!("IP version {} is not 6", ipv6.get_version())));
    }
    let udp = UdpPacket::new(&raw[IPV6_HEADER_LEN..])
        .ok_or_else(|| SchcError::PacketParse("truncated UDP header".into()))?;

    let segment_len = raw.len() - IPV6_HEADER_LEN;
    if usize::from(ipv6.get_payload_length()) != segment_len {
        return Err(SchcError::PacketParse(format!(
            "IPv6 payload length {} does not match {} bytes",
            ipv6.get_payload_length(),
            segment_len
        )));
    }
    if usize::from(udp.get_length()) != segment_len {
        return Err(SchcError::PacketParse(format!(
            "UDP length {} does not match {} bytes",
            udp.get_length(),
            segment_len
        )));
    }

    let src = ipv6.get_source().octets();
    let dst = ipv6.get_destination().octets();
    if udp_ipv6_checksum(&src, &dst, &raw[IPV6_HEADER_LEN..]) != udp.get_checksum() {
        return Err(SchcError::PacketParse("UDP checksum mismatch".into()));
    }

    let (dev, app, dev_port, app_port) = match direction {
        Direction::Up => (src, dst, udp.get_source(), udp.get_destination()),
        Direction::Down => (dst, src, udp.get_destination(), udp.get_source()),
    };

    let num = |fid: FieldId, value: u64, bits: usize| ParsedField::new(fid, FieldValue::from_u64(value, bits));
    let bytes = |fid: FieldId, value: &[u8]| ParsedField::new(fid, FieldValue::from_bytes(value));

    Ok(vec![
        num(FieldId::Ipv6Ver, u64::from(ipv6.get_version()), 4),
        num(FieldId::Ipv6Tc, u64::from(ipv6.get_traffic_class()), 8),
        num(FieldId::Ipv6Fl, u64::from(ipv6.get_flow_label()), 20),
        num(FieldId::Ipv6Len, u64::from(ipv6.get_payload_length()), 16),
        num(FieldId::Ipv6Nxt, u64::from(ipv6.get_next_header().0), 8),
        num(FieldId::Ipv6HopLmt, u64::from(ipv6.get_hop_limit()), 8),
        bytes(FieldId::Ipv6DevPrefix, &dev[..8]),
        bytes(FieldId::Ipv6DevIid, &dev[8..]),
        bytes(FieldId::Ipv6AppPrefix, &app[..8]),
        bytes(FieldId::Ipv6AppIid, &app[8..]),
        num(FieldId::UdpDevPort, u64::from(dev_port), 16),
        num(FieldId::UdpAppPort, u64::from(app_port), 16),
        num(FieldId::UdpLen, u64::from(udp.get_length()), 16),
        num(FieldId::UdpCksum, u64::from(udp.get_checksum()), 16),
    ])
}

/// Append the CoAP header, token and option fields; return the CoAP payload.
fn parse_coap(message: &[u8], fields: &mut Vec<ParsedField>) -> Result<Vec<u8>> {
    let msg = CoapMessage::decode(message)?;

    let num = |fid: FieldId, value: u64, bits: usize| ParsedField::new(fid, FieldValue::from_u64(value, bits));
    fields.push(num(FieldId::CoapVer, u64::from(message[0] >> 6), 2));
    fields.push(num(FieldId::CoapType, u64::from(msg.msg_type.bits()), 2));
    fields.push(num(FieldId::CoapTkl, msg.token.len() as u64, 4));
    fields.push(num(FieldId::CoapCode, u64::from(msg.code), 8));
    fields.push(num(FieldId::CoapMid, u64::from(msg.message_id), 16));
    if !msg.token.is_empty() {
        fields.push(ParsedField::new(FieldId::CoapToken, FieldValue::from_bytes(&msg.token)));
    }

    let mut occurrences: HashMap<FieldId, u8> = HashMap::new();
    for option in &msg.options {
        let fid = FieldId::from_coap_option(option.number).ok_or_else(|| {
            SchcError::PacketParse(format!("unsupported CoAP option {}", option.number))
        })?;
        let count = occurrences.entry(fid).or_insert(0);
        *count = count
            .checked_add(1)
            .ok_or_else(|| SchcError::PacketParse(format!("too many {} options", fid)))?;
        fields.push(ParsedField {
            fid,
            position: *count,
            value: FieldValue::from_bytes(&option.value),
        });
    }

    Ok(msg.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::{CoapOption, CoapTemplate, CoapType, OPTION_URI_PATH, OPTION_URI_QUERY};
    use crate::packet_builder::{build_ipv6_udp_coap_packet_vec, build_ipv6_udp_packet_vec, Ipv6UdpConfig};

    fn config() -> Ipv6UdpConfig {
        Ipv6UdpConfig {
            src_ip: "2001:db8:0:1::1".parse::<std::net::Ipv6Addr>().unwrap().octets(),
            dst_ip: "2001:db8:0:2::2".parse::<std::net::Ipv6Addr>().unwrap().octets(),
            src_port: 0x1234,
            dst_port: 0x5678,
            traffic_class: 0,
            next_header: 17,
            hop_limit: 255,
        }
    }

    fn value(packet: &ParsedPacket, fid: FieldId) -> u64 {
        packet.get(fid, 1).unwrap().value.to_u64().unwrap()
    }

    // =========================================================================
    // FieldValue tests
    // =========================================================================

    #[test]
    fn test_field_value_from_u64() {
        let v = FieldValue::from_u64(0xABC, 20);
        assert_eq!(v.len(), 20);
        assert_eq!(v.to_u64(), Some(0xABC));
        assert_eq!(v.to_bytes(), vec![0x00, 0xAB, 0xC0]);
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::from_u64(17, 8).to_string(), "17");
        assert_eq!(FieldValue::from_bytes(b"ab").to_string(), "24930");
        assert_eq!(FieldValue::from_bytes(&[1, 2, 3, 4, 5]).to_string(), "0x0102030405");
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("up".parse::<Direction>(), Ok(Direction::Up));
        assert_eq!("down".parse::<Direction>(), Ok(Direction::Down));
        assert!("sideways".parse::<Direction>().is_err());
    }

    // =========================================================================
    // IPv6/UDP tests
    // =========================================================================

    #[test]
    fn test_parse_ipv6_udp_up() {
        let raw = build_ipv6_udp_packet_vec(&config(), 0x12345, &[0xAA; 4]).unwrap();
        let packet = parse_packet(&raw, ProtocolStack::Ipv6Udp, Direction::Up).unwrap();

        assert_eq!(packet.fields.len(), 14);
        assert_eq!(value(&packet, FieldId::Ipv6Ver), 6);
        assert_eq!(value(&packet, FieldId::Ipv6Fl), 0x12345);
        assert_eq!(value(&packet, FieldId::Ipv6Len), 12);
        assert_eq!(value(&packet, FieldId::Ipv6Nxt), 17);
        assert_eq!(value(&packet, FieldId::UdpDevPort), 0x1234);
        assert_eq!(value(&packet, FieldId::UdpAppPort), 0x5678);
        assert_eq!(value(&packet, FieldId::Ipv6DevIid), 1);
        assert_eq!(packet.payload, vec![0xAA; 4]);
    }

    #[test]
    fn test_parse_ipv6_udp_down_swaps_roles() {
        let mut cfg = config();
        std::mem::swap(&mut cfg.src_ip, &mut cfg.dst_ip);
        std::mem::swap(&mut cfg.src_port, &mut cfg.dst_port);
        let raw = build_ipv6_udp_packet_vec(&cfg, 0, &[]).unwrap();
        let packet = parse_packet(&raw, ProtocolStack::Ipv6Udp, Direction::Down).unwrap();

        assert_eq!(value(&packet, FieldId::UdpDevPort), 0x1234);
        assert_eq!(value(&packet, FieldId::Ipv6AppIid), 2);
        assert_eq!(
            packet.get(FieldId::Ipv6DevPrefix, 1).unwrap().value.to_bytes(),
            vec![0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_parse_too_short() {
        let result = parse_packet(&[0x60; 47], ProtocolStack::Ipv6Udp, Direction::Up);
        assert!(matches!(result, Err(SchcError::PacketParse(_))));
    }

    #[test]
    fn test_parse_wrong_version() {
        let mut raw = build_ipv6_udp_packet_vec(&config(), 0, &[1]).unwrap();
        raw[0] = 0x40 | (raw[0] & 0x0F);
        assert!(parse_packet(&raw, ProtocolStack::Ipv6Udp, Direction::Up).is_err());
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let mut raw = build_ipv6_udp_packet_vec(&config(), 0, &[1, 2, 3]).unwrap();
        raw.push(0);
        assert!(parse_packet(&raw, ProtocolStack::Ipv6Udp, Direction::Up).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let mut raw = build_ipv6_udp_packet_vec(&config(), 0, &[1, 2, 3]).unwrap();
        raw[46] ^= 0xFF;
        assert!(parse_packet(&raw, ProtocolStack::Ipv6Udp, Direction::Up).is_err());
    }

    // =========================================================================
    // CoAP tests
    // =========================================================================

    #[test]
    fn test_parse_coap_fields_and_occurrences() {
        let template = CoapTemplate {
            msg_type: CoapType::NonConfirmable,
            code: 0x02,
            message_id_base: 0x3030,
            options: vec![
                CoapOption::new(OPTION_URI_PATH, "sensor"),
                CoapOption::new(OPTION_URI_PATH, "data"),
                CoapOption::new(OPTION_URI_QUERY, "id=7"),
            ],
        };
        let msg = template.message(7, &[9, 9]);
        let raw = build_ipv6_udp_coap_packet_vec(&config(), 0, &msg).unwrap();
        let packet = parse_packet(&raw, ProtocolStack::Ipv6UdpCoap, Direction::Up).unwrap();

        assert_eq!(value(&packet, FieldId::CoapVer), 1);
        assert_eq!(value(&packet, FieldId::CoapType), 1);
        assert_eq!(value(&packet, FieldId::CoapTkl), 0);
        assert_eq!(value(&packet, FieldId::CoapMid), 0x3037);
        assert!(packet.get(FieldId::CoapToken, 1).is_none());
        assert_eq!(packet.get(FieldId::CoapUriPath, 2).unwrap().value.to_bytes(), b"data".to_vec());
        assert_eq!(packet.get(FieldId::CoapUriQuery, 1).unwrap().value.to_bytes(), b"id=7".to_vec());
        assert_eq!(packet.fields.len(), 14 + 5 + 3);
        assert_eq!(packet.payload, vec![9, 9]);
    }

    #[test]
    fn test_parse_coap_rejects_unknown_option() {
        let template = CoapTemplate {
            msg_type: CoapType::NonConfirmable,
            code: 0x02,
            message_id_base: 0,
            options: vec![CoapOption::new(2, "x")],
        };
        let raw = build_ipv6_udp_coap_packet_vec(&config(), 0, &template.message(0, &[])).unwrap();
        assert!(parse_packet(&raw, ProtocolStack::Ipv6UdpCoap, Direction::Up).is_err());
        // The same bytes still decompose as plain IPv6/UDP
        assert!(parse_packet(&raw, ProtocolStack::Ipv6Udp, Direction::Up).is_ok());
    }

    #[test]
    fn test_parse_no_compression_stack() {
        let packet = parse_packet(&[1, 2, 3], ProtocolStack::NoCompression, Direction::Up).unwrap();
        assert_eq!(packet.fields.len(), 1);
        assert_eq!(packet.fields[0].fid, FieldId::Payload);
        assert_eq!(packet.fields[0].value.len(), 24);
    }
}
