//! Compression Logic
//!
//! Implements the SCHC compression actions: a matched rule turns a packet
//! into `rule_id ‖ residue ‖ payload`, padded with zeros to a whole byte.

use bitvec::prelude::*;
use log::debug;

use crate::bit_buffer::BitBuffer;
use crate::error::{Result, SchcError};
use crate::field_id::FieldId;
use crate::matcher::find_rule;
use crate::parser::{Direction, FieldValue, ParsedPacket};
use crate::rule::{CompressionAction, Field, MatchingOperator, Rule, RuleSet};

/// Bits used to carry the rule id.
pub const RULE_ID_BITS: usize = 8;

// =============================================================================
// Compressed Packet
// =============================================================================

/// Per-field compression details for debugging
#[derive(Debug, Clone)]
pub struct FieldCompressionDetail {
    pub fid: FieldId,
    pub position: u8,
    pub original_bits: usize,
    pub sent_bits: usize,
    pub cda: CompressionAction,
}

/// Final compressed packet output
#[derive(Debug, Clone)]
pub struct CompressedPacket {
    pub data: Vec<u8>,
    /// Bits written before padding.
    pub bit_length: usize,
    pub rule_id: u8,
    pub original_bits: usize,
    pub field_details: Vec<FieldCompressionDetail>,
}

impl CompressedPacket {
    /// Savings in bits, counting the padding of the last byte
    pub fn savings_bits(&self) -> i64 {
        self.original_bits as i64 - (self.data.len() * 8) as i64
    }

    pub fn savings_bytes(&self) -> f64 {
        self.savings_bits() as f64 / 8.0
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// =============================================================================
// Compression Functions
// =============================================================================

/// Compress `raw` with the first matching rule, or the no-compression rule.
///
/// The output must fit in `capacity` bytes.
pub fn compress_packet(
    ruleset: &RuleSet,
    raw: &[u8],
    direction: Direction,
    capacity: usize,
) -> Result<CompressedPacket> {
    let matched = find_rule(ruleset, raw, direction);
    let mut out = BitBuffer::new(capacity.saturating_mul(8));

    let field_details = match &matched.packet {
        Some(packet) => compress_with_rule(matched.rule, packet, &mut out),
        None => compress_verbatim(matched.rule.rule_id, raw, &mut out).map(|_| Vec::new()),
    }
    .map_err(|e| match e {
        SchcError::OutOfSpace { .. } => SchcError::BufferTooSmall { capacity },
        other => other,
    })?;

    let bit_length = out.len();
    let data = out.finish();
    debug!(
        "Compressed {} bytes to {} bytes ({} bits) with rule {}",
        raw.len(),
        data.len(),
        bit_length,
        matched.rule.rule_id
    );

    Ok(CompressedPacket {
        data,
        bit_length,
        rule_id: matched.rule.rule_id,
        original_bits: raw.len() * 8,
        field_details,
    })
}

/// Compress into a caller-owned buffer; returns the number of bytes written.
pub fn compress_into(ruleset: &RuleSet, raw: &[u8], direction: Direction, out: &mut [u8]) -> Result<usize> {
    let compressed = compress_packet(ruleset, raw, direction, out.len())?;
    out[..compressed.data.len()].copy_from_slice(&compressed.data);
    Ok(compressed.data.len())
}

/// The no-compression form: rule id followed by the packet verbatim.
fn compress_verbatim(rule_id: u8, raw: &[u8], out: &mut BitBuffer) -> Result<()> {
    out.write_value(u64::from(rule_id), RULE_ID_BITS)?;
    BitBuffer::from_bytes(raw).read_remaining_into(out)
}

/// Compress a decomposed packet using a matched rule
pub fn compress_with_rule(
    rule: &Rule,
    packet: &ParsedPacket,
    out: &mut BitBuffer,
) -> Result<Vec<FieldCompressionDetail>> {
    out.write_value(u64::from(rule.rule_id), RULE_ID_BITS)?;

    let mut details = Vec::new();
    for field in rule.fields_for(packet.direction) {
        let parsed = packet.get(field.fid, field.fp).ok_or_else(|| {
            SchcError::InvalidInput(format!(
                "packet has no {} (FP {}) for rule {}",
                field.fid, field.fp, rule.rule_id
            ))
        })?;

        let before = out.len();
        compress_field(out, field, &parsed.value)?;
        details.push(FieldCompressionDetail {
            fid: field.fid,
            position: field.fp,
            original_bits: parsed.value.len(),
            sent_bits: out.len() - before,
            cda: field.cda,
        });
    }

    out.write_all_bytes(&packet.payload)?;
    Ok(details)
}

/// Compress a single field according to its CDA
fn compress_field(out: &mut BitBuffer, field: &Field, value: &FieldValue) -> Result<()> {
    match field.cda {
        CompressionAction::NotSent
        | CompressionAction::ComputeLength
        | CompressionAction::ComputeChecksum
        | CompressionAction::Compute => Ok(()),
        CompressionAction::ValueSent => send_field_value(out, field, value),
        CompressionAction::Lsb => {
            let MatchingOperator::Msb(msb_bits) = field.mo else {
                return Err(SchcError::RuleValidation(format!(
                    "Field {}: LSB without MSB operator",
                    field.fid
                )));
            };
            send_lsb(out, value.bits(), usize::from(msb_bits))
        }
    }
}

/// Send the full field value, length-prefixed when the field is variable.
fn send_field_value(out: &mut BitBuffer, field: &Field, value: &FieldValue) -> Result<()> {
    let needs_prefix = field.length_bits().is_none()
        && !matches!(field.fid, FieldId::Payload | FieldId::CoapToken);
    if needs_prefix {
        send_length(out, value.len() / 8)?;
    }
    out.write_bitslice(value.bits())
}

/// Send the bits after the first `msb_bits`
#[inline]
fn send_lsb(out: &mut BitBuffer, value: &BitSlice<u8, Msb0>, msb_bits: usize) -> Result<()> {
    out.write_bitslice(&value[msb_bits.min(value.len())..])
}

/// Length of a variable field in bytes: 4 bits below 15, otherwise `1111`
/// then 8 bits below 255, otherwise `1111 11111111` then 16 bits.
pub fn send_length(out: &mut BitBuffer, len: usize) -> Result<()> {
    if len < 15 {
        out.write_value(len as u64, 4)
    } else if len < 255 {
        out.write_value(0xF, 4)?;
        out.write_value(len as u64, 8)
    } else {
        let len = u16::try_from(len)
            .map_err(|_| SchcError::InvalidInput(format!("variable field of {} bytes is too long", len)))?;
        out.write_value(0xFFF, 12)?;
        out.write_value(u64::from(len), 16)
    }
}
