//! Field Matching Logic
//!
//! Decides whether a rule describes a decomposed packet, and picks the first
//! rule in registration order that does. Packets no rule describes fall back
//! to the rule set's no-compression rule.

use bitvec::prelude::*;
use log::{debug, trace};
use std::collections::HashMap;

use crate::parser::{parse_packet, Direction, FieldValue, ParsedPacket};
use crate::rule::{Field, MatchingOperator, ProtocolStack, Rule, RuleSet, TargetValue};

// =============================================================================
// Value Matching Functions
// =============================================================================

/// Check if a packet value equals a target value bit for bit
#[inline]
pub fn values_match(packet_value: &FieldValue, target_value: &TargetValue) -> bool {
    packet_value.bits() == target_value.bits()
}

/// Check if the top `bits` bits of a packet value equal those of the target
#[inline]
pub fn msb_match(packet_value: &FieldValue, target_value: &TargetValue, bits: u8) -> bool {
    let n = usize::from(bits);
    let pv: &BitSlice<u8, Msb0> = packet_value.bits();
    let tv = target_value.bits();
    if n > pv.len() || n > tv.len() {
        return false;
    }
    pv[..n] == tv[..n]
}

/// Check one rule field against the packet's value for it.
///
/// Computed fields always match; fixed-length fields must have exactly their
/// declared length.
pub fn field_matches(field: &Field, value: &FieldValue) -> bool {
    if field.cda.is_computed() {
        return true;
    }
    if let Some(len) = field.length_bits() {
        if value.len() != usize::from(len) {
            return false;
        }
    }
    match (field.mo, &field.target) {
        (MatchingOperator::Ignore, _) => true,
        (MatchingOperator::Equal, Some(tv)) => values_match(value, tv),
        (MatchingOperator::Msb(bits), Some(tv)) => msb_match(value, tv, bits),
        (_, None) => false,
    }
}

// =============================================================================
// Rule Matching
// =============================================================================

/// Check whether `rule` describes `packet` completely.
///
/// The rule's fields for the packet direction must cover the packet fields
/// one-to-one by `(FID, FP)` and every matching operator must hold.
pub fn rule_matches(rule: &Rule, packet: &ParsedPacket) -> bool {
    if rule.stack != packet.stack {
        return false;
    }
    let fields: Vec<&Field> = rule.fields_for(packet.direction).collect();
    if fields.len() != packet.fields.len() {
        trace!(
            "Rule {}: {} fields for {} packet fields",
            rule.rule_id,
            fields.len(),
            packet.fields.len()
        );
        return false;
    }
    fields.iter().all(|field| match packet.get(field.fid, field.fp) {
        Some(parsed) => {
            let ok = field_matches(field, &parsed.value);
            if !ok {
                trace!("Rule {}: {} = {} does not match", rule.rule_id, field.fid, parsed.value);
            }
            ok
        }
        None => {
            trace!("Rule {}: packet has no {} (FP {})", rule.rule_id, field.fid, field.fp);
            false
        }
    })
}

/// Outcome of rule selection.
#[derive(Debug)]
pub struct RuleMatch<'a> {
    pub rule: &'a Rule,
    /// The decomposition the rule matched; `None` for the no-compression rule.
    pub packet: Option<ParsedPacket>,
}

impl RuleMatch<'_> {
    pub fn is_default(&self) -> bool {
        self.packet.is_none()
    }
}

/// Pick the first rule in registration order that describes `raw`.
///
/// Each stack's decomposition is computed at most once. A packet that no rule
/// describes gets the no-compression rule.
pub fn find_rule<'a>(ruleset: &'a RuleSet, raw: &[u8], direction: Direction) -> RuleMatch<'a> {
    let mut decomposed: HashMap<ProtocolStack, Option<ParsedPacket>> = HashMap::new();

    for rule in ruleset.candidates() {
        let packet = decomposed.entry(rule.stack).or_insert_with(|| {
            match parse_packet(raw, rule.stack, direction) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    trace!("Packet does not decompose as {:?}: {}", rule.stack, e);
                    None
                }
            }
        });
        let Some(packet) = packet else {
            continue;
        };
        if rule_matches(rule, packet) {
            debug!("Packet matches rule {}", rule.rule_id);
            return RuleMatch {
                rule,
                packet: decomposed.remove(&rule.stack).flatten(),
            };
        }
    }

    debug!(
        "No rule matches, falling back to no-compression rule {}",
        ruleset.default_rule_id()
    );
    RuleMatch {
        rule: ruleset.default_rule(),
        packet: None,
    }
}
