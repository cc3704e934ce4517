//! Built-in rule sets
//!
//! Derives the deployment's rules from a [`DeviceConfig`]: one rule for the
//! CoAP uplink, one for bare UDP, and the no-compression rule.

use serde_json::json;
use std::collections::HashMap;

use crate::config::DeviceConfig;
use crate::error::Result;
use crate::field_id::FieldId;
use crate::rule::{CompressionAction, Field, MatchingOperator, ProtocolStack, Rule, RuleSet};

pub const NO_COMPRESSION_RULE_ID: u8 = 150;
pub const IPV6_UDP_COAP_RULE_ID: u8 = 29;
pub const IPV6_UDP_RULE_ID: u8 = 28;

/// Bits of the CoAP message id fixed by the rule; the rest travel as LSB.
pub const MID_MSB_BITS: u8 = 12;

fn not_sent(fid: FieldId, tv: serde_json::Value) -> Field {
    Field::new(fid, Some(tv), MatchingOperator::Equal, CompressionAction::NotSent)
}

fn computed(fid: FieldId, cda: CompressionAction) -> Field {
    Field::new(fid, None, MatchingOperator::Ignore, cda)
}

/// The rule carrying packets no other rule describes.
pub fn no_compression_rule(rule_id: u8) -> Rule {
    Rule {
        rule_id,
        stack: ProtocolStack::NoCompression,
        comment: Some("No compression".to_string()),
        compression: vec![Field::new(
            FieldId::Payload,
            None,
            MatchingOperator::Ignore,
            CompressionAction::ValueSent,
        )],
    }
}

fn ipv6_udp_fields(config: &DeviceConfig) -> Vec<Field> {
    let dev = config.dev_ip().octets();
    let app = config.app_ip().octets();
    vec![
        not_sent(FieldId::Ipv6Ver, json!(6)),
        not_sent(FieldId::Ipv6Tc, json!(config.traffic_class())),
        not_sent(FieldId::Ipv6Fl, json!(config.flow_label())),
        computed(FieldId::Ipv6Len, CompressionAction::ComputeLength),
        not_sent(FieldId::Ipv6Nxt, json!(config.next_header())),
        not_sent(FieldId::Ipv6HopLmt, json!(config.hop_limit())),
        not_sent(FieldId::Ipv6DevPrefix, json!(format!("{}/64", config.dev_ip()))),
        not_sent(FieldId::Ipv6DevIid, json!(format!("0x{}", hex::encode(&dev[8..])))),
        not_sent(FieldId::Ipv6AppPrefix, json!(format!("{}/64", config.app_ip()))),
        not_sent(FieldId::Ipv6AppIid, json!(format!("0x{}", hex::encode(&app[8..])))),
        not_sent(FieldId::UdpDevPort, json!(config.dev_port())),
        not_sent(FieldId::UdpAppPort, json!(config.app_port())),
        computed(FieldId::UdpLen, CompressionAction::ComputeLength),
        computed(FieldId::UdpCksum, CompressionAction::ComputeChecksum),
    ]
}

/// IPv6/UDP rule: every header field is elided.
pub fn ipv6_udp_rule(rule_id: u8, config: &DeviceConfig) -> Rule {
    Rule {
        rule_id,
        stack: ProtocolStack::Ipv6Udp,
        comment: Some("IPv6/UDP, all headers elided".to_string()),
        compression: ipv6_udp_fields(config),
    }
}

/// IPv6/UDP/CoAP rule: only the low nibble of the message id is sent.
pub fn ipv6_udp_coap_rule(rule_id: u8, config: &DeviceConfig) -> Rule {
    let mut compression = ipv6_udp_fields(config);
    compression.extend([
        not_sent(FieldId::CoapVer, json!(1)),
        not_sent(FieldId::CoapType, json!(config.coap_type().bits())),
        not_sent(FieldId::CoapTkl, json!(0)),
        not_sent(FieldId::CoapCode, json!(config.coap_code())),
        Field::new(
            FieldId::CoapMid,
            Some(json!(config.message_id_base())),
            MatchingOperator::Msb(MID_MSB_BITS),
            CompressionAction::Lsb,
        ),
    ]);

    let mut occurrences: HashMap<FieldId, u8> = HashMap::new();
    for option in config.options() {
        // Validated by DeviceConfig
        let Some(fid) = FieldId::from_coap_option(option.number) else {
            continue;
        };
        let position = occurrences.entry(fid).or_insert(0);
        *position += 1;
        compression.push(not_sent(fid, option.value.to_json()).with_position(*position));
    }

    Rule {
        rule_id,
        stack: ProtocolStack::Ipv6UdpCoap,
        comment: Some("IPv6/UDP/CoAP sensor uplink, MID low nibble sent".to_string()),
        compression,
    }
}

/// The deployment's rule set, in matching order: CoAP uplink, then bare UDP.
pub fn default_ruleset(config: &DeviceConfig) -> Result<RuleSet> {
    RuleSet::new(
        vec![
            no_compression_rule(NO_COMPRESSION_RULE_ID),
            ipv6_udp_coap_rule(IPV6_UDP_COAP_RULE_ID, config),
            ipv6_udp_rule(IPV6_UDP_RULE_ID, config),
        ],
        NO_COMPRESSION_RULE_ID,
    )
}
