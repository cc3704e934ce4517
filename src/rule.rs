//! SCHC Rule structures and parsing
//!
//! A [`RuleSet`] is read from JSON (or built by [`crate::templates`]), validated
//! once, and is immutable afterwards. Target values are parsed into owned
//! [`TargetValue`] bit strings at construction time so the codec never touches
//! JSON on the hot path.

use bitvec::prelude::*;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fs;
use std::net::Ipv6Addr;
use std::path::Path;

use crate::bit_buffer::realigned;
use crate::error::{Result, SchcError};
use crate::field_id::FieldId;
use crate::parser::Direction;

// =============================================================================
// Target values
// =============================================================================

/// An immutable bit string: owned bytes, a starting bit offset and a bit length.
#[derive(Debug, Clone, Eq)]
pub struct TargetValue {
    bytes: Vec<u8>,
    start_bit: usize,
    len_bits: usize,
}

impl TargetValue {
    /// The low `bits` bits of `value`.
    pub fn from_u64(value: u64, bits: u16) -> Result<Self> {
        let bits = usize::from(bits);
        if bits > 64 {
            return Err(SchcError::RuleValidation(format!(
                "numeric target value cannot describe a {}-bit field",
                bits
            )));
        }
        if bits < 64 && value >> bits != 0 {
            return Err(SchcError::RuleValidation(format!(
                "target value {} does not fit in {} bits",
                value, bits
            )));
        }
        Ok(Self {
            bytes: value.to_be_bytes().to_vec(),
            start_bit: 64 - bits,
            len_bits: bits,
        })
    }

    /// Every bit of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            start_bit: 0,
            len_bits: bytes.len() * 8,
        }
    }

    /// The right-most `bits` bits of `bytes`; any bits to their left must be zero.
    pub fn right_aligned(bytes: &[u8], bits: u16) -> Result<Self> {
        let bits = usize::from(bits);
        let total = bytes.len() * 8;
        let view = bytes.view_bits::<Msb0>();
        if total >= bits {
            let start_bit = total - bits;
            if view[..start_bit].any() {
                return Err(SchcError::RuleValidation(format!(
                    "target value 0x{} does not fit in {} bits",
                    hex::encode(bytes),
                    bits
                )));
            }
            return Ok(Self {
                bytes: bytes.to_vec(),
                start_bit,
                len_bits: bits,
            });
        }
        // Shorter than the field: left-pad with zero bytes
        let needed = bits.div_ceil(8);
        let mut padded = vec![0u8; needed - bytes.len()];
        padded.extend_from_slice(bytes);
        Ok(Self {
            bytes: padded,
            start_bit: needed * 8 - bits,
            len_bits: bits,
        })
    }

    pub fn bits(&self) -> &BitSlice<u8, Msb0> {
        &self.bytes.view_bits::<Msb0>()[self.start_bit..self.start_bit + self.len_bits]
    }

    pub fn len_bits(&self) -> usize {
        self.len_bits
    }

    pub fn start_bit(&self) -> usize {
        self.start_bit
    }

    /// Numeric value, for target values of at most 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.len_bits > 64 {
            return None;
        }
        Some(self.bits().iter().by_vals().fold(0u64, |acc, bit| (acc << 1) | u64::from(bit)))
    }

    /// The value as whole bytes, for byte-aligned lengths.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        if self.len_bits % 8 != 0 {
            return None;
        }
        Some(realigned(self.bits()).into_vec())
    }
}

impl PartialEq for TargetValue {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

// =============================================================================
// Operators and actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingOperator {
    Equal,
    Ignore,
    /// Number of most-significant bits that must equal the target value.
    Msb(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAction {
    NotSent,
    ValueSent,
    /// Send the bits left over after the `MSB(n)` prefix.
    Lsb,
    ComputeLength,
    ComputeChecksum,
    /// Generic `compute`, resolved to length or checksum by field id on validation.
    Compute,
}

impl CompressionAction {
    /// Actions whose field is derived by the receiver and never transmitted.
    pub fn is_computed(&self) -> bool {
        matches!(
            self,
            CompressionAction::ComputeLength
                | CompressionAction::ComputeChecksum
                | CompressionAction::Compute
        )
    }
}

/// Which protocol layers a rule describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolStack {
    #[serde(rename = "IPv6/UDP")]
    Ipv6Udp,
    #[serde(rename = "IPv6/UDP/CoAP")]
    Ipv6UdpCoap,
    #[serde(rename = "none")]
    NoCompression,
}

impl ProtocolStack {
    pub fn has_coap(&self) -> bool {
        matches!(self, ProtocolStack::Ipv6UdpCoap)
    }
}

// =============================================================================
// Field descriptor
// =============================================================================

/// Field descriptor within a rule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Field {
    #[serde(rename = "FID")]
    pub fid: FieldId,

    /// Occurrence of the field in the packet, counted from 1.
    #[serde(rename = "FP", default = "default_position")]
    pub fp: u8,

    /// `None` means bidirectional.
    #[serde(rename = "DI", default)]
    #[serde(deserialize_with = "deserialize_di", serialize_with = "serialize_di")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub di: Option<Direction>,

    /// Length in bits; `Some(0)` marks a variable-length field.
    #[serde(rename = "FL", default, skip_serializing_if = "Option::is_none")]
    pub fl: Option<u16>,

    #[serde(rename = "TV", default, skip_serializing_if = "Option::is_none")]
    pub tv: Option<serde_json::Value>,

    #[serde(rename = "MO")]
    #[serde(deserialize_with = "deserialize_mo")]
    #[serde(serialize_with = "serialize_mo")]
    pub mo: MatchingOperator,

    #[serde(rename = "MO.val", default, skip_serializing_if = "Option::is_none")]
    pub mo_val: Option<u8>,

    #[serde(rename = "CDA")]
    #[serde(deserialize_with = "deserialize_cda")]
    #[serde(serialize_with = "serialize_cda")]
    pub cda: CompressionAction,

    #[serde(skip)]
    pub target: Option<TargetValue>,
}

fn default_position() -> u8 {
    1
}

impl Field {
    pub fn new(
        fid: FieldId,
        tv: Option<serde_json::Value>,
        mo: MatchingOperator,
        cda: CompressionAction,
    ) -> Self {
        let mo_val = match mo {
            MatchingOperator::Msb(n) => Some(n),
            _ => None,
        };
        Self {
            fid,
            fp: 1,
            di: None,
            fl: None,
            tv,
            mo,
            mo_val,
            cda,
            target: None,
        }
    }

    pub fn with_position(mut self, fp: u8) -> Self {
        self.fp = fp;
        self
    }

    pub fn with_length(mut self, fl: u16) -> Self {
        self.fl = Some(fl);
        self
    }

    pub fn with_direction(mut self, di: Direction) -> Self {
        self.di = Some(di);
        self
    }

    /// Fixed length in bits, or `None` for a variable-length field.
    pub fn length_bits(&self) -> Option<u16> {
        match self.fl {
            Some(0) => None,
            Some(n) => Some(n),
            None => self.fid.default_size_bits(),
        }
    }

    /// Whether the field takes part in packets travelling in `direction`.
    pub fn applies_to(&self, direction: Direction) -> bool {
        self.di.is_none_or(|di| di == direction)
    }

    /// Parse the target value, apply `MO.val` to the MSB operator and check
    /// that the operator and action fit the field.
    pub fn parse_tv(&mut self) -> Result<()> {
        if self.fp == 0 {
            return Err(self.invalid("field position starts at 1"));
        }
        if let (Some(default), Some(fl)) = (self.fid.default_size_bits(), self.fl) {
            if fl != default {
                return Err(self.invalid(&format!("FL {} differs from the field's {} bits", fl, default)));
            }
        }

        if let MatchingOperator::Msb(_) = self.mo {
            let mo_val = self.mo_val.unwrap_or(0);
            self.mo = MatchingOperator::Msb(mo_val);

            let field_length = self
                .length_bits()
                .ok_or_else(|| self.invalid("MSB requires a fixed field length"))?;
            if u16::from(mo_val) > field_length {
                return Err(self.invalid(&format!(
                    "MO.val ({}) exceeds field length ({} bits)",
                    mo_val, field_length
                )));
            }
        }

        if self.cda.is_computed() {
            let resolved = if self.fid.is_length() {
                CompressionAction::ComputeLength
            } else if self.fid.is_checksum() {
                CompressionAction::ComputeChecksum
            } else {
                return Err(self.invalid("compute actions apply only to length and checksum fields"));
            };
            if self.cda != CompressionAction::Compute && self.cda != resolved {
                return Err(self.invalid("compute action does not fit the field"));
            }
            self.cda = resolved;
            // Computed fields are never compared nor transmitted
            self.tv = None;
            self.target = None;
            return Ok(());
        }

        // Only an equal match guarantees the elided value is the target value
        if self.cda == CompressionAction::NotSent && self.mo != MatchingOperator::Equal {
            return Err(self.invalid("not-sent requires the equal operator"));
        }
        if self.cda == CompressionAction::Lsb && !matches!(self.mo, MatchingOperator::Msb(_)) {
            return Err(self.invalid("LSB requires the MSB matching operator"));
        }
        if self.fid == FieldId::Payload && self.cda != CompressionAction::ValueSent {
            return Err(self.invalid("PAYLOAD must be value-sent"));
        }

        let needs_target = matches!(self.mo, MatchingOperator::Equal | MatchingOperator::Msb(_))
            || matches!(self.cda, CompressionAction::NotSent | CompressionAction::Lsb);

        self.target = match &self.tv {
            Some(tv) => Some(parse_target(tv, self.fid, self.length_bits())?),
            None if needs_target => return Err(self.invalid("a target value is required")),
            None => None,
        };
        Ok(())
    }

    fn invalid(&self, reason: &str) -> SchcError {
        SchcError::RuleValidation(format!("Field {} (FP {}): {}", self.fid, self.fp, reason))
    }
}

fn parse_target(tv: &serde_json::Value, fid: FieldId, length: Option<u16>) -> Result<TargetValue> {
    let invalid = |reason: String| SchcError::RuleValidation(format!("Field {}: {}", fid, reason));

    match (tv, length) {
        (serde_json::Value::Number(n), Some(bits)) => {
            let value = n
                .as_u64()
                .ok_or_else(|| invalid(format!("target value {} is not an unsigned integer", n)))?;
            TargetValue::from_u64(value, bits)
        }
        // Variable-length numeric options use the minimal big-endian encoding
        (serde_json::Value::Number(n), None) => {
            let value = n
                .as_u64()
                .ok_or_else(|| invalid(format!("target value {} is not an unsigned integer", n)))?;
            let bytes = value.to_be_bytes();
            let skip = bytes.iter().take_while(|b| **b == 0).count();
            Ok(TargetValue::from_bytes(&bytes[skip..]))
        }
        (serde_json::Value::String(s), Some(bits)) if fid.is_prefix() => {
            let (addr, prefix_len) = match s.split_once('/') {
                Some((addr, len)) => (addr, Some(len)),
                None => (s.as_str(), None),
            };
            if let Some(len) = prefix_len.filter(|len| *len != "64") {
                return Err(invalid(format!("prefix length must be /64, got /{}", len)));
            }
            let addr = if addr.is_empty() { "::" } else { addr };
            let addr: Ipv6Addr = addr
                .parse()
                .map_err(|_| invalid(format!("invalid IPv6 prefix '{}'", s)))?;
            if bits != 64 {
                return Err(invalid(format!("prefix fields are 64 bits, rule says {}", bits)));
            }
            Ok(TargetValue::from_bytes(&addr.octets()[..8]))
        }
        (serde_json::Value::String(s), Some(bits)) if fid.is_iid() && !s.starts_with("0x") => {
            let value = s
                .parse::<u64>()
                .map_err(|_| invalid(format!("invalid interface identifier '{}'", s)))?;
            TargetValue::from_u64(value, bits)
        }
        (serde_json::Value::String(s), Some(bits)) => {
            let digits = s
                .strip_prefix("0x")
                .ok_or_else(|| invalid(format!("fixed-length target '{}' must be 0x-prefixed hex", s)))?;
            let digits = if digits.len() % 2 == 1 {
                format!("0{}", digits)
            } else {
                digits.to_string()
            };
            let bytes = hex::decode(&digits).map_err(|e| invalid(format!("bad hex '{}': {}", s, e)))?;
            TargetValue::right_aligned(&bytes, bits)
        }
        (serde_json::Value::String(s), None) => Ok(TargetValue::from_bytes(s.as_bytes())),
        (other, _) => Err(invalid(format!("unsupported target value {}", other))),
    }
}

fn deserialize_di<'de, D>(deserializer: D) -> std::result::Result<Option<Direction>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s.as_deref() {
        None | Some("bi") => Ok(None),
        Some("up") => Ok(Some(Direction::Up)),
        Some("down") => Ok(Some(Direction::Down)),
        Some(other) => Err(de::Error::custom(format!("unknown direction indicator '{}'", other))),
    }
}

fn serialize_di<S>(di: &Option<Direction>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = match di {
        None => "bi",
        Some(Direction::Up) => "up",
        Some(Direction::Down) => "down",
    };
    serializer.serialize_str(s)
}

fn deserialize_mo<'de, D>(deserializer: D) -> std::result::Result<MatchingOperator, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.as_str() {
        "equal" => Ok(MatchingOperator::Equal),
        "ignore" => Ok(MatchingOperator::Ignore),
        "MSB" => Ok(MatchingOperator::Msb(0)),
        other => Err(de::Error::custom(format!("unknown matching operator '{}'", other))),
    }
}

fn serialize_mo<S>(mo: &MatchingOperator, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = match mo {
        MatchingOperator::Equal => "equal",
        MatchingOperator::Ignore => "ignore",
        MatchingOperator::Msb(_) => "MSB",
    };
    serializer.serialize_str(s)
}

fn deserialize_cda<'de, D>(deserializer: D) -> std::result::Result<CompressionAction, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.as_str() {
        "not-sent" => Ok(CompressionAction::NotSent),
        "value-sent" => Ok(CompressionAction::ValueSent),
        "LSB" => Ok(CompressionAction::Lsb),
        "compute-length" => Ok(CompressionAction::ComputeLength),
        "compute-checksum" => Ok(CompressionAction::ComputeChecksum),
        "compute" => Ok(CompressionAction::Compute),
        other => Err(de::Error::custom(format!("unknown compression action '{}'", other))),
    }
}

fn serialize_cda<S>(cda: &CompressionAction, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = match cda {
        CompressionAction::NotSent => "not-sent",
        CompressionAction::ValueSent => "value-sent",
        CompressionAction::Lsb => "LSB",
        CompressionAction::ComputeLength => "compute-length",
        CompressionAction::ComputeChecksum => "compute-checksum",
        CompressionAction::Compute => "compute",
    };
    serializer.serialize_str(s)
}

// =============================================================================
// Rules
// =============================================================================

/// SCHC Compression Rule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    #[serde(rename = "RuleID")]
    pub rule_id: u8,

    #[serde(rename = "Stack")]
    pub stack: ProtocolStack,

    #[serde(rename = "Comment", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(rename = "Compression")]
    pub compression: Vec<Field>,
}

impl Rule {
    /// Fields taking part in packets travelling in `direction`, in rule order.
    pub fn fields_for(&self, direction: Direction) -> impl Iterator<Item = &Field> {
        self.compression.iter().filter(move |f| f.applies_to(direction))
    }

    fn validate(&mut self) -> Result<()> {
        let rule_id = self.rule_id;
        for field in &mut self.compression {
            field.parse_tv().map_err(|e| match e {
                SchcError::RuleValidation(msg) => {
                    SchcError::RuleValidation(format!("Rule {}: {}", rule_id, msg))
                }
                other => other,
            })?;
        }

        for field in &self.compression {
            let foreign = match self.stack {
                ProtocolStack::Ipv6Udp => field.fid.is_coap() || field.fid == FieldId::Payload,
                ProtocolStack::Ipv6UdpCoap => field.fid == FieldId::Payload,
                ProtocolStack::NoCompression => field.fid != FieldId::Payload,
            };
            if foreign {
                return Err(SchcError::RuleValidation(format!(
                    "Rule {}: field {} does not belong to stack {:?}",
                    self.rule_id, field.fid, self.stack
                )));
            }
        }

        for direction in [Direction::Up, Direction::Down] {
            let mut seen = HashSet::new();
            for field in self.fields_for(direction) {
                // Token length is read back from TKL
                if field.fid == FieldId::CoapToken
                    && field.cda != CompressionAction::NotSent
                    && !seen.contains(&(FieldId::CoapTkl, 1))
                {
                    return Err(SchcError::RuleValidation(format!(
                        "Rule {}: COAP.TOKEN must follow COAP.TKL",
                        self.rule_id
                    )));
                }
                if !seen.insert((field.fid, field.fp)) {
                    return Err(SchcError::RuleValidation(format!(
                        "Rule {}: field {} (FP {}) appears twice for direction {:?}",
                        self.rule_id, field.fid, field.fp, direction
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Collection of SCHC rules with a reserved no-compression rule.
///
/// Built once and never mutated; share it by reference or behind an `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct RuleSet {
    #[serde(rename = "DefaultRuleID")]
    default_rule_id: u8,

    #[serde(rename = "Rules")]
    rules: Vec<Rule>,

    #[serde(skip)]
    default_index: usize,
}

/// On-disk shape of a rule set, before validation.
#[derive(Debug, Deserialize)]
struct RuleSetFile {
    #[serde(rename = "DefaultRuleID")]
    default_rule_id: u8,

    #[serde(rename = "Rules")]
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate `rules` and build a rule set. Rules are tried in the given order.
    pub fn new(mut rules: Vec<Rule>, default_rule_id: u8) -> Result<Self> {
        let mut ids = HashSet::new();
        for rule in &mut rules {
            if !ids.insert(rule.rule_id) {
                return Err(SchcError::RuleValidation(format!(
                    "Rule ID {} is used more than once",
                    rule.rule_id
                )));
            }
            rule.validate()?;
        }

        let default_index = rules
            .iter()
            .position(|r| r.rule_id == default_rule_id)
            .ok_or(SchcError::RuleNotFound(default_rule_id))?;

        let default_rule = &rules[default_index];
        let payload_only = matches!(
            default_rule.compression.as_slice(),
            [field] if field.fid == FieldId::Payload
                && field.cda == CompressionAction::ValueSent
                && field.di.is_none()
        );
        if default_rule.stack != ProtocolStack::NoCompression || !payload_only {
            return Err(SchcError::RuleValidation(format!(
                "Rule {}: the no-compression rule must have stack 'none' and a single value-sent PAYLOAD field",
                default_rule_id
            )));
        }

        if let Some(extra) = rules
            .iter()
            .find(|r| r.rule_id != default_rule_id && r.stack == ProtocolStack::NoCompression)
        {
            return Err(SchcError::RuleValidation(format!(
                "Rule {}: only the default rule may use stack 'none'",
                extra.rule_id
            )));
        }

        Ok(Self {
            default_rule_id,
            rules,
            default_index,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: RuleSetFile = serde_json::from_str(json)?;
        Self::new(file.rules, file.default_rule_id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// All rules in registration order, the default rule included.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn default_rule_id(&self) -> u8 {
        self.default_rule_id
    }

    pub fn default_rule(&self) -> &Rule {
        &self.rules[self.default_index]
    }

    pub fn get(&self, rule_id: u8) -> Option<&Rule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    /// Rules eligible for matching, in registration order.
    pub fn candidates(&self) -> impl Iterator<Item = &Rule> {
        let default_rule_id = self.default_rule_id;
        self.rules.iter().filter(move |r| r.rule_id != default_rule_id)
    }
}

impl<'de> Deserialize<'de> for RuleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let file = RuleSetFile::deserialize(deserializer)?;
        RuleSet::new(file.rules, file.default_rule_id).map_err(de::Error::custom)
    }
}
