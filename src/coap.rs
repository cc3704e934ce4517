//! CoAP message encoding
//!
//! Small pure functions for the pieces of RFC 7252 the codec needs: option
//! delta/length encoding, message id composition, and whole-message
//! encode/decode. Options are always emitted in ascending option-number order.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchcError};

pub const COAP_VERSION: u8 = 1;
pub const PAYLOAD_MARKER: u8 = 0xFF;
pub const MAX_TOKEN_LEN: usize = 8;

/// Largest value expressible with the two-byte extended delta/length form.
const MAX_EXTENDED: usize = 0xFFFF + 269;

// =============================================================================
// Option numbers
// =============================================================================

pub const OPTION_IF_MATCH: u16 = 1;
pub const OPTION_URI_HOST: u16 = 3;
pub const OPTION_ETAG: u16 = 4;
pub const OPTION_IF_NONE_MATCH: u16 = 5;
pub const OPTION_OBSERVE: u16 = 6;
pub const OPTION_URI_PORT: u16 = 7;
pub const OPTION_LOCATION_PATH: u16 = 8;
pub const OPTION_URI_PATH: u16 = 11;
pub const OPTION_CONTENT_FORMAT: u16 = 12;
pub const OPTION_MAX_AGE: u16 = 14;
pub const OPTION_URI_QUERY: u16 = 15;
pub const OPTION_ACCEPT: u16 = 17;
pub const OPTION_LOCATION_QUERY: u16 = 20;
pub const OPTION_SIZE1: u16 = 60;

/// Registered name of an option number, e.g. `Uri-Path` for 11.
pub fn option_name(number: u16) -> Option<&'static str> {
    Some(match number {
        OPTION_IF_MATCH => "If-Match",
        OPTION_URI_HOST => "Uri-Host",
        OPTION_ETAG => "ETag",
        OPTION_IF_NONE_MATCH => "If-None-Match",
        OPTION_OBSERVE => "Observe",
        OPTION_URI_PORT => "Uri-Port",
        OPTION_LOCATION_PATH => "Location-Path",
        OPTION_URI_PATH => "Uri-Path",
        OPTION_CONTENT_FORMAT => "Content-Format",
        OPTION_MAX_AGE => "Max-Age",
        OPTION_URI_QUERY => "Uri-Query",
        OPTION_ACCEPT => "Accept",
        OPTION_LOCATION_QUERY => "Location-Query",
        OPTION_SIZE1 => "Size1",
        _ => return None,
    })
}

// =============================================================================
// Primitive encoders
// =============================================================================

/// Compose a message id from the upper 12 bits of `base` and a 4-bit rolling nibble.
pub fn message_id(base: u16, nibble: u8) -> u16 {
    (base & 0xFFF0) | u16::from(nibble & 0x0F)
}

fn nibble_and_extension(value: usize) -> (u8, Option<Vec<u8>>) {
    if value < 13 {
        (value as u8, None)
    } else if value < 269 {
        (13, Some(vec![(value - 13) as u8]))
    } else {
        (14, Some(((value - 269) as u16).to_be_bytes().to_vec()))
    }
}

/// Encode one option as `(delta << 4) | length`, extended delta and length
/// bytes when needed, then the raw value.
pub fn encode_option(delta: u16, value: &[u8]) -> Result<Vec<u8>> {
    if value.len() > MAX_EXTENDED {
        return Err(SchcError::InvalidInput(format!(
            "CoAP option value of {} bytes is too long",
            value.len()
        )));
    }
    let (delta_nibble, delta_ext) = nibble_and_extension(usize::from(delta));
    let (length_nibble, length_ext) = nibble_and_extension(value.len());

    let mut encoded = Vec::with_capacity(5 + value.len());
    encoded.push((delta_nibble << 4) | length_nibble);
    encoded.extend(delta_ext.unwrap_or_default());
    encoded.extend(length_ext.unwrap_or_default());
    encoded.extend_from_slice(value);
    Ok(encoded)
}

/// Read a delta or length nibble's extended value starting at `pos`.
fn read_extended(bytes: &[u8], pos: &mut usize, nibble: u8) -> Result<usize> {
    match nibble {
        0..=12 => Ok(usize::from(nibble)),
        13 => {
            let b = *bytes
                .get(*pos)
                .ok_or_else(|| SchcError::PacketParse("truncated CoAP option extension".into()))?;
            *pos += 1;
            Ok(usize::from(b) + 13)
        }
        14 => {
            let ext = bytes
                .get(*pos..*pos + 2)
                .ok_or_else(|| SchcError::PacketParse("truncated CoAP option extension".into()))?;
            *pos += 2;
            Ok(usize::from(u16::from_be_bytes([ext[0], ext[1]])) + 269)
        }
        _ => Err(SchcError::PacketParse("reserved CoAP option nibble 15".into())),
    }
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoapType {
    #[serde(rename = "CON")]
    Confirmable,
    #[serde(rename = "NON")]
    NonConfirmable,
    #[serde(rename = "ACK")]
    Acknowledgement,
    #[serde(rename = "RST")]
    Reset,
}

impl CoapType {
    pub fn bits(&self) -> u8 {
        match self {
            CoapType::Confirmable => 0,
            CoapType::NonConfirmable => 1,
            CoapType::Acknowledgement => 2,
            CoapType::Reset => 3,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => CoapType::Confirmable,
            1 => CoapType::NonConfirmable,
            2 => CoapType::Acknowledgement,
            _ => CoapType::Reset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

impl CoapOption {
    pub fn new(number: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapMessage {
    pub msg_type: CoapType,
    pub code: u8,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Vec<CoapOption>,
    pub payload: Vec<u8>,
}

impl CoapMessage {
    /// Append the encoded message to `out`.
    ///
    /// Options are sorted by number (stable, so repeated options keep their
    /// order). The payload marker is written only for a non-empty payload.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(SchcError::InvalidInput(format!(
                "CoAP token of {} bytes exceeds {}",
                self.token.len(),
                MAX_TOKEN_LEN
            )));
        }

        out.push((COAP_VERSION << 6) | (self.msg_type.bits() << 4) | self.token.len() as u8);
        out.push(self.code);
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.token);

        let mut options: Vec<&CoapOption> = self.options.iter().collect();
        options.sort_by_key(|o| o.number);
        let mut previous = 0u16;
        for option in options {
            out.extend(encode_option(option.number - previous, &option.value)?);
            previous = option.number;
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(&self.payload);
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Decode a CoAP message occupying all of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(SchcError::PacketParse(format!(
                "CoAP header needs 4 bytes, got {}",
                bytes.len()
            )));
        }
        let version = bytes[0] >> 6;
        if version != COAP_VERSION {
            return Err(SchcError::PacketParse(format!("CoAP version {} unsupported", version)));
        }
        let tkl = usize::from(bytes[0] & 0x0F);
        if tkl > MAX_TOKEN_LEN {
            return Err(SchcError::PacketParse(format!("CoAP token length {} is reserved", tkl)));
        }
        let token = bytes
            .get(4..4 + tkl)
            .ok_or_else(|| SchcError::PacketParse("truncated CoAP token".into()))?
            .to_vec();

        let mut pos = 4 + tkl;
        let mut number = 0usize;
        let mut options = Vec::new();
        let mut payload = Vec::new();

        while pos < bytes.len() {
            let head = bytes[pos];
            pos += 1;
            if head == PAYLOAD_MARKER {
                if pos == bytes.len() {
                    return Err(SchcError::PacketParse("payload marker with empty payload".into()));
                }
                payload = bytes[pos..].to_vec();
                break;
            }
            let delta = read_extended(bytes, &mut pos, head >> 4)?;
            let length = read_extended(bytes, &mut pos, head & 0x0F)?;
            number += delta;
            let option_number = u16::try_from(number)
                .map_err(|_| SchcError::PacketParse(format!("CoAP option number {} too large", number)))?;
            let value = bytes
                .get(pos..pos + length)
                .ok_or_else(|| SchcError::PacketParse(format!("truncated CoAP option {}", option_number)))?;
            pos += length;
            options.push(CoapOption::new(option_number, value));
        }

        Ok(Self {
            msg_type: CoapType::from_bits(bytes[0] >> 4),
            code: bytes[1],
            message_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            token,
            options,
            payload,
        })
    }
}

/// The fixed part of the messages a device sends: everything but the rolling
/// message-id nibble and the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapTemplate {
    pub msg_type: CoapType,
    pub code: u8,
    pub message_id_base: u16,
    pub options: Vec<CoapOption>,
}

impl CoapTemplate {
    pub fn message(&self, nibble: u8, payload: &[u8]) -> CoapMessage {
        CoapMessage {
            msg_type: self.msg_type,
            code: self.code,
            message_id: message_id(self.message_id_base, nibble),
            token: Vec::new(),
            options: self.options.clone(),
            payload: payload.to_vec(),
        }
    }
}
