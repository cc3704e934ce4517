//! # SCHC Library - Static Context Header Compression
//!
//! Rule-driven compression of IPv6/UDP(/CoAP) sensor packets for constrained
//! links, with the reciprocal decompressor and a byte-exact reference packet
//! builder.

pub mod bit_buffer;
pub mod error;
pub mod field_id;
pub mod rule;

// Protocol building blocks
pub mod checksum;
pub mod coap;
pub mod packet_builder;
pub mod parser;

// Core functional modules
pub mod compressor;
pub mod decompressor;
pub mod matcher;

// Integration layer
pub mod config;
pub mod service;
pub mod templates;

// Core error/result types
pub use error::{Result, SchcError};
pub use field_id::FieldId;
pub use rule::{CompressionAction, Field, MatchingOperator, ProtocolStack, Rule, RuleSet, TargetValue};

pub use bit_buffer::BitBuffer;
pub use coap::{CoapMessage, CoapOption, CoapTemplate, CoapType};
pub use config::{DeviceConfig, OptionSpec, OptionValue};
pub use packet_builder::{
    build_ipv6_udp_coap_packet, build_ipv6_udp_coap_packet_vec, build_ipv6_udp_packet, build_ipv6_udp_packet_vec,
    Ipv6UdpConfig,
};
pub use parser::{Direction, FieldValue, ParsedField, ParsedPacket};

pub use compressor::{compress_into, compress_packet, CompressedPacket};
pub use decompressor::{decompress_into, decompress_packet, DecompressedPacket};
pub use matcher::{find_rule, RuleMatch};
pub use service::SchcService;
pub use templates::default_ruleset;
