//! Packet Header Builder
//!
//! Builds byte-exact IPv6/UDP(/CoAP) packets, either from a device
//! configuration (the reference packets a sensor sends) or from decompressed
//! field values. Lengths and the UDP checksum are always computed here; fields
//! that a rule transmitted explicitly are written over the computed values.

use std::collections::HashMap;

use crate::checksum::{udp_ipv6_checksum, UDP_CHECKSUM_OFFSET};
use crate::coap::{CoapMessage, CoapOption, CoapType, COAP_VERSION};
use crate::error::{Result, SchcError};
use crate::field_id::FieldId;
use crate::parser::{Direction, ParsedField, IPV6_HEADER_LEN, IPV6_UDP_HEADER_LEN, UDP_HEADER_LEN};
use crate::rule::ProtocolStack;

/// Fixed IPv6 and UDP header inputs for the reference builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6UdpConfig {
    pub src_ip: [u8; 16],
    pub dst_ip: [u8; 16],
    pub src_port: u16,
    pub dst_port: u16,
    pub traffic_class: u8,
    pub next_header: u8,
    pub hop_limit: u8,
}

// =============================================================================
// IPv6 + UDP
// =============================================================================

/// Write the IPv6 header into `out[..40]`.
///
/// IPv6 Header Format (40 bytes):
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version| Traffic Class |           Flow Label                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Payload Length        |  Next Header  |   Hop Limit   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address (128)                    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address (128)                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
fn write_ipv6_header(out: &mut [u8], cfg: &Ipv6UdpConfig, flow_label: u32, payload_length: u16) {
    let fl = flow_label & 0x000F_FFFF;
    out[0] = (6 << 4) | (cfg.traffic_class >> 4);
    out[1] = ((cfg.traffic_class & 0x0F) << 4) | ((fl >> 16) as u8 & 0x0F);
    out[2] = (fl >> 8) as u8;
    out[3] = fl as u8;
    out[4..6].copy_from_slice(&payload_length.to_be_bytes());
    out[6] = cfg.next_header;
    out[7] = cfg.hop_limit;
    out[8..24].copy_from_slice(&cfg.src_ip);
    out[24..40].copy_from_slice(&cfg.dst_ip);
}

/// Write the UDP header into `out[..8]` with a zero checksum.
///
/// UDP Header Format (8 bytes):
/// ```text
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Source Port          |       Destination Port        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            Length             |           Checksum            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
fn write_udp_header(out: &mut [u8], cfg: &Ipv6UdpConfig, udp_length: u16) {
    out[0..2].copy_from_slice(&cfg.src_port.to_be_bytes());
    out[2..4].copy_from_slice(&cfg.dst_port.to_be_bytes());
    out[4..6].copy_from_slice(&udp_length.to_be_bytes());
    out[6..8].copy_from_slice(&[0, 0]);
}

/// Build an IPv6 + UDP packet carrying `payload` into `out`.
///
/// Both length fields are `8 + payload.len()`. Returns the packet length.
pub fn build_ipv6_udp_packet(
    cfg: &Ipv6UdpConfig,
    flow_label: u32,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize> {
    let udp_length = u16::try_from(UDP_HEADER_LEN + payload.len()).map_err(|_| {
        SchcError::InvalidInput(format!(
            "payload of {} bytes overflows the UDP length field",
            payload.len()
        ))
    })?;
    let total = IPV6_UDP_HEADER_LEN + payload.len();
    if out.len() < total {
        return Err(SchcError::InsufficientCapacity {
            needed: total,
            capacity: out.len(),
        });
    }

    write_ipv6_header(&mut out[..IPV6_HEADER_LEN], cfg, flow_label, udp_length);
    write_udp_header(&mut out[IPV6_HEADER_LEN..IPV6_UDP_HEADER_LEN], cfg, udp_length);
    out[IPV6_UDP_HEADER_LEN..total].copy_from_slice(payload);

    let checksum = udp_ipv6_checksum(&cfg.src_ip, &cfg.dst_ip, &out[IPV6_HEADER_LEN..total]);
    let at = IPV6_HEADER_LEN + UDP_CHECKSUM_OFFSET;
    out[at..at + 2].copy_from_slice(&checksum.to_be_bytes());

    Ok(total)
}

/// Build an IPv6 + UDP packet whose UDP payload is the encoded CoAP `message`.
pub fn build_ipv6_udp_coap_packet(
    cfg: &Ipv6UdpConfig,
    flow_label: u32,
    message: &CoapMessage,
    out: &mut [u8],
) -> Result<usize> {
    let coap = message.encode()?;
    build_ipv6_udp_packet(cfg, flow_label, &coap, out)
}

pub fn build_ipv6_udp_packet_vec(cfg: &Ipv6UdpConfig, flow_label: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; IPV6_UDP_HEADER_LEN + payload.len()];
    let len = build_ipv6_udp_packet(cfg, flow_label, payload, &mut out)?;
    out.truncate(len);
    Ok(out)
}

pub fn build_ipv6_udp_coap_packet_vec(
    cfg: &Ipv6UdpConfig,
    flow_label: u32,
    message: &CoapMessage,
) -> Result<Vec<u8>> {
    let coap = message.encode()?;
    build_ipv6_udp_packet_vec(cfg, flow_label, &coap)
}

// =============================================================================
// Reassembly from decompressed fields
// =============================================================================

/// Decompressed field values keyed by `(FieldId, position)`.
struct FieldMap<'a> {
    fields: HashMap<(FieldId, u8), &'a ParsedField>,
}

impl<'a> FieldMap<'a> {
    fn new(fields: &'a [ParsedField]) -> Self {
        Self {
            fields: fields.iter().map(|f| ((f.fid, f.position), f)).collect(),
        }
    }

    fn get(&self, fid: FieldId) -> Option<&'a ParsedField> {
        self.fields.get(&(fid, 1)).copied()
    }

    fn required(&self, fid: FieldId) -> Result<&'a ParsedField> {
        self.get(fid)
            .ok_or_else(|| SchcError::Decompression(format!("field {} was not restored", fid)))
    }

    fn u64(&self, fid: FieldId) -> Result<u64> {
        self.required(fid)?
            .value
            .to_u64()
            .ok_or_else(|| SchcError::Decompression(format!("field {} is too wide", fid)))
    }

    /// A fixed-width field that must hold exactly `N` bytes.
    fn bytes<const N: usize>(&self, fid: FieldId) -> Result<[u8; N]> {
        let field = self.required(fid)?;
        if field.value.len() != N * 8 {
            return Err(SchcError::Decompression(format!(
                "field {} has {} bits, expected {}",
                fid,
                field.value.len(),
                N * 8
            )));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&field.value.to_bytes());
        Ok(out)
    }

    /// An optional explicit 16-bit value, used to override computed fields.
    fn explicit_u16(&self, fid: FieldId) -> Result<Option<u16>> {
        match self.get(fid) {
            Some(_) => Ok(Some(self.u64(fid)? as u16)),
            None => Ok(None),
        }
    }
}

fn address(prefix: [u8; 8], iid: [u8; 8]) -> [u8; 16] {
    let mut addr = [0u8; 16];
    addr[..8].copy_from_slice(&prefix);
    addr[8..].copy_from_slice(&iid);
    addr
}

/// Rebuild the original packet bytes from decompressed header fields and the
/// payload that followed the residue.
///
/// Length and checksum fields absent from `fields` are computed.
pub fn assemble_packet(
    stack: ProtocolStack,
    direction: Direction,
    fields: &[ParsedField],
    payload: &[u8],
) -> Result<Vec<u8>> {
    let map = FieldMap::new(fields);

    if stack == ProtocolStack::NoCompression {
        let mut raw = map.required(FieldId::Payload)?.value.to_bytes();
        raw.extend_from_slice(payload);
        return Ok(raw);
    }

    let version = map.u64(FieldId::Ipv6Ver)?;
    if version != 6 {
        return Err(SchcError::Decompression(format!("IPv6 version restored as {}", version)));
    }

    let dev = address(map.bytes(FieldId::Ipv6DevPrefix)?, map.bytes(FieldId::Ipv6DevIid)?);
    let app = address(map.bytes(FieldId::Ipv6AppPrefix)?, map.bytes(FieldId::Ipv6AppIid)?);
    let dev_port = map.u64(FieldId::UdpDevPort)? as u16;
    let app_port = map.u64(FieldId::UdpAppPort)? as u16;

    let (src_ip, dst_ip, src_port, dst_port) = match direction {
        Direction::Up => (dev, app, dev_port, app_port),
        Direction::Down => (app, dev, app_port, dev_port),
    };
    let cfg = Ipv6UdpConfig {
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        traffic_class: map.u64(FieldId::Ipv6Tc)? as u8,
        next_header: map.u64(FieldId::Ipv6Nxt)? as u8,
        hop_limit: map.u64(FieldId::Ipv6HopLmt)? as u8,
    };
    let flow_label = map.u64(FieldId::Ipv6Fl)? as u32;

    let mut raw = if stack.has_coap() {
        build_ipv6_udp_coap_packet_vec(&cfg, flow_label, &assemble_coap(&map, fields, payload)?)?
    } else {
        build_ipv6_udp_packet_vec(&cfg, flow_label, payload)?
    };

    // Explicitly transmitted lengths and checksum override the computed ones
    let mut lengths_patched = false;
    if let Some(len) = map.explicit_u16(FieldId::Ipv6Len)? {
        raw[4..6].copy_from_slice(&len.to_be_bytes());
    }
    if let Some(len) = map.explicit_u16(FieldId::UdpLen)? {
        raw[IPV6_HEADER_LEN + 4..IPV6_HEADER_LEN + 6].copy_from_slice(&len.to_be_bytes());
        lengths_patched = true;
    }
    let at = IPV6_HEADER_LEN + UDP_CHECKSUM_OFFSET;
    match map.explicit_u16(FieldId::UdpCksum)? {
        Some(checksum) => raw[at..at + 2].copy_from_slice(&checksum.to_be_bytes()),
        None if lengths_patched => {
            let checksum = udp_ipv6_checksum(&src_ip, &dst_ip, &raw[IPV6_HEADER_LEN..]);
            raw[at..at + 2].copy_from_slice(&checksum.to_be_bytes());
        }
        None => {}
    }

    Ok(raw)
}

fn assemble_coap(map: &FieldMap<'_>, fields: &[ParsedField], payload: &[u8]) -> Result<CoapMessage> {
    let version = map.u64(FieldId::CoapVer)?;
    if version != u64::from(COAP_VERSION) {
        return Err(SchcError::Decompression(format!("CoAP version restored as {}", version)));
    }
    let tkl = map.u64(FieldId::CoapTkl)? as usize;
    let token = match map.get(FieldId::CoapToken) {
        Some(field) => field.value.to_bytes(),
        None => Vec::new(),
    };
    if token.len() != tkl {
        return Err(SchcError::Decompression(format!(
            "CoAP token has {} bytes but TKL is {}",
            token.len(),
            tkl
        )));
    }

    let mut options: Vec<(u16, u8, CoapOption)> = fields
        .iter()
        .filter_map(|f| {
            f.fid
                .coap_option_number()
                .map(|number| (number, f.position, CoapOption::new(number, f.value.to_bytes())))
        })
        .collect();
    options.sort_by_key(|(number, position, _)| (*number, *position));

    Ok(CoapMessage {
        msg_type: CoapType::from_bits(map.u64(FieldId::CoapType)? as u8),
        code: map.u64(FieldId::CoapCode)? as u8,
        message_id: map.u64(FieldId::CoapMid)? as u16,
        token,
        options: options.into_iter().map(|(_, _, option)| option).collect(),
        payload: payload.to_vec(),
    })
}
