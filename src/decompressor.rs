//! Decompression Logic
//!
//! Implements the SCHC Decompression Actions for converting compressed
//! SCHC packets back into original packets.

use bitvec::prelude::*;
use log::debug;

use crate::bit_buffer::{realigned, BitBuffer};
use crate::compressor::RULE_ID_BITS;
use crate::error::{Result, SchcError};
use crate::field_id::FieldId;
use crate::packet_builder::assemble_packet;
use crate::parser::{Direction, FieldValue, ParsedField};
use crate::rule::{CompressionAction, Field, MatchingOperator, RuleSet};

// =============================================================================
// Decompression Result Types
// =============================================================================

/// Result of decompressing a SCHC packet
#[derive(Debug, Clone)]
pub struct DecompressedPacket {
    /// Reconstructed packet bytes
    pub data: Vec<u8>,
    /// Rule ID used for decompression
    pub rule_id: u8,
    /// Bits consumed by the rule id and the residue
    pub bits_consumed: usize,
    /// Reconstructed header fields, in rule order
    pub fields: Vec<ParsedField>,
}

// =============================================================================
// Packet Decompression
// =============================================================================

/// Decompress a SCHC packet produced by [`crate::compressor::compress_packet`]
///
/// The leading 8 bits select the rule. Fields are restored in rule order from
/// the residue or from their target values, whole bytes after the residue are
/// the payload, and computed fields are filled in when the packet is rebuilt.
pub fn decompress_packet(ruleset: &RuleSet, data: &[u8], direction: Direction) -> Result<DecompressedPacket> {
    let mut buf = BitBuffer::from_bytes(data);
    let rule_id = buf
        .read_bits(RULE_ID_BITS)
        .ok_or_else(|| SchcError::Decompression("Empty compressed data".to_string()))? as u8;
    let rule = ruleset.get(rule_id).ok_or(SchcError::RuleNotFound(rule_id))?;

    if rule_id == ruleset.default_rule_id() {
        debug!("Rule {} carries the packet uncompressed", rule_id);
        return Ok(DecompressedPacket {
            data: data[1..].to_vec(),
            rule_id,
            bits_consumed: RULE_ID_BITS,
            fields: Vec::new(),
        });
    }

    let mut fields: Vec<ParsedField> = Vec::with_capacity(rule.compression.len());
    for field in rule.fields_for(direction) {
        if field.cda.is_computed() {
            continue;
        }
        let value = decompress_field(&mut buf, field, &fields)?;
        fields.push(ParsedField {
            fid: field.fid,
            position: field.fp,
            value,
        });
    }

    let bits_consumed = buf.position();
    let payload = buf.read_bits_as_bytes(buf.remaining() / 8 * 8).unwrap_or_default();
    let data = assemble_packet(rule.stack, direction, &fields, &payload)?;
    debug!(
        "Decompressed {} bytes to {} bytes with rule {}",
        bits_consumed.div_ceil(8) + payload.len(),
        data.len(),
        rule_id
    );

    Ok(DecompressedPacket {
        data,
        rule_id,
        bits_consumed,
        fields,
    })
}

/// Decompress into a caller-owned buffer; returns the number of bytes written.
pub fn decompress_into(ruleset: &RuleSet, data: &[u8], direction: Direction, out: &mut [u8]) -> Result<usize> {
    let packet = decompress_packet(ruleset, data, direction)?;
    if packet.data.len() > out.len() {
        return Err(SchcError::InsufficientCapacity {
            needed: packet.data.len(),
            capacity: out.len(),
        });
    }
    out[..packet.data.len()].copy_from_slice(&packet.data);
    Ok(packet.data.len())
}

// =============================================================================
// Field Decompression
// =============================================================================

/// Decompress a single field based on its CDA
fn decompress_field(buf: &mut BitBuffer, field: &Field, restored: &[ParsedField]) -> Result<FieldValue> {
    match field.cda {
        CompressionAction::NotSent => restore_from_tv(field),
        CompressionAction::ValueSent => {
            let n_bits = match field.length_bits() {
                Some(len) => usize::from(len),
                None if field.fid == FieldId::CoapToken => token_length_bits(restored)?,
                None => read_length(buf, field.fid)? * 8,
            };
            read_field_value(buf, n_bits, field.fid)
        }
        CompressionAction::Lsb => decompress_lsb(buf, field),
        CompressionAction::ComputeLength | CompressionAction::ComputeChecksum | CompressionAction::Compute => {
            Err(SchcError::Decompression(format!("Field {} is computed, not restored", field.fid)))
        }
    }
}

/// Restore field value from Target Value (for not-sent CDA)
fn restore_from_tv(field: &Field) -> Result<FieldValue> {
    field
        .target
        .as_ref()
        .map(|tv| FieldValue::from_bitvec(realigned(tv.bits())))
        .ok_or_else(|| SchcError::Decompression(format!("Field {} has not-sent CDA but no TV", field.fid)))
}

/// Decompress LSB field (MSB from TV, LSB from residue)
fn decompress_lsb(buf: &mut BitBuffer, field: &Field) -> Result<FieldValue> {
    let (MatchingOperator::Msb(msb_bits), Some(tv)) = (field.mo, &field.target) else {
        return Err(SchcError::Decompression(format!(
            "Field {} has LSB CDA without an MSB target",
            field.fid
        )));
    };
    let msb_bits = usize::from(msb_bits);
    let field_size = field
        .length_bits()
        .map(usize::from)
        .ok_or_else(|| SchcError::Decompression(format!("Field {} has LSB CDA but no fixed length", field.fid)))?;

    let lsb = read_bitvec(buf, field_size.saturating_sub(msb_bits), field.fid)?;
    let mut combined = realigned(&tv.bits()[..msb_bits]);
    combined.extend_from_bitslice(lsb.as_bitslice());
    Ok(FieldValue::from_bitvec(combined))
}

// =============================================================================
// Bit Reading Helpers
// =============================================================================

fn read_bitvec(buf: &mut BitBuffer, n_bits: usize, fid: FieldId) -> Result<BitVec<u8, Msb0>> {
    let available = buf.remaining();
    buf.read_bitvec(n_bits).ok_or(SchcError::Truncated {
        field: fid,
        needed: n_bits,
        available,
    })
}

fn read_field_value(buf: &mut BitBuffer, n_bits: usize, fid: FieldId) -> Result<FieldValue> {
    read_bitvec(buf, n_bits, fid).map(FieldValue::from_bitvec)
}

fn read_u64(buf: &mut BitBuffer, n_bits: usize, fid: FieldId) -> Result<u64> {
    let available = buf.remaining();
    buf.read_bits(n_bits).ok_or(SchcError::Truncated {
        field: fid,
        needed: n_bits,
        available,
    })
}

/// Read a variable field's length prefix, in bytes.
fn read_length(buf: &mut BitBuffer, fid: FieldId) -> Result<usize> {
    let short = read_u64(buf, 4, fid)?;
    if short < 0xF {
        return Ok(short as usize);
    }
    let medium = read_u64(buf, 8, fid)?;
    if medium < 0xFF {
        return Ok(medium as usize);
    }
    Ok(read_u64(buf, 16, fid)? as usize)
}

/// A value-sent token is as long as the already restored TKL says.
fn token_length_bits(restored: &[ParsedField]) -> Result<usize> {
    restored
        .iter()
        .find(|f| f.fid == FieldId::CoapTkl)
        .and_then(|f| f.value.to_u64())
        .map(|tkl| tkl as usize * 8)
        .ok_or_else(|| SchcError::Decompression("CoAP token restored before TKL".to_string()))
}
