//! Device configuration
//!
//! The fixed values of a deployment: addresses, ports, IPv6 header constants
//! and the CoAP message template. Loaded from JSON, read-only afterwards.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv6Addr;
use std::path::Path;

use crate::coap::{
    option_name, CoapOption, CoapTemplate, CoapType, OPTION_URI_HOST, OPTION_URI_PATH, OPTION_URI_PORT,
    OPTION_URI_QUERY,
};
use crate::error::{Result, SchcError};
use crate::field_id::FieldId;
use crate::packet_builder::Ipv6UdpConfig;
use crate::parser::Direction;

/// Default transport frame size in bytes.
pub const DEFAULT_FRAME_CAPACITY: usize = 256;

/// Largest value of the 20-bit IPv6 flow label.
pub const MAX_FLOW_LABEL: u32 = 0x000F_FFFF;

/// A CoAP option value as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Uint(u64),
    Text(String),
}

impl OptionValue {
    /// Wire bytes: text as UTF-8, integers in the shortest big-endian form.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            OptionValue::Text(s) => s.as_bytes().to_vec(),
            OptionValue::Uint(v) => {
                let bytes = v.to_be_bytes();
                let skip = bytes.iter().take_while(|b| **b == 0).count();
                bytes[skip..].to_vec()
            }
        }
    }

    /// The same value as a rule target value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            OptionValue::Uint(v) => serde_json::Value::from(*v),
            OptionValue::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

/// One entry of the CoAP option template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub number: u16,
    pub value: OptionValue,
}

impl OptionSpec {
    pub fn new(number: u16, value: OptionValue) -> Self {
        Self {
            name: option_name(number).unwrap_or("Unknown").to_string(),
            number,
            value,
        }
    }

    pub fn text(number: u16, value: &str) -> Self {
        Self::new(number, OptionValue::Text(value.to_string()))
    }

    pub fn uint(number: u16, value: u64) -> Self {
        Self::new(number, OptionValue::Uint(value))
    }
}

/// Options of the original sensor uplink: `Uri-Path "sensor"`, `Uri-Path "data"`.
pub fn sensor_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::text(OPTION_URI_PATH, "sensor"),
        OptionSpec::text(OPTION_URI_PATH, "data"),
    ]
}

/// The richer option sequence addressing the gateway explicitly.
pub fn extended_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::text(OPTION_URI_HOST, "2001:db8:0:2::2"),
        OptionSpec::uint(OPTION_URI_PORT, 5683),
        OptionSpec::text(OPTION_URI_PATH, "sensor"),
        OptionSpec::text(OPTION_URI_PATH, "data"),
        OptionSpec::text(OPTION_URI_QUERY, "id=1"),
    ]
}

// =============================================================================
// Device configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    dev_ip: Ipv6Addr,
    app_ip: Ipv6Addr,
    dev_port: u16,
    app_port: u16,
    traffic_class: u8,
    next_header: u8,
    hop_limit: u8,
    flow_label: u32,
    coap_type: CoapType,
    coap_code: u8,
    message_id_base: u16,
    options: Vec<OptionSpec>,
    frame_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            dev_ip: Ipv6Addr::new(0x2001, 0x0db8, 0, 1, 0, 0, 0, 1),
            app_ip: Ipv6Addr::new(0x2001, 0x0db8, 0, 2, 0, 0, 0, 2),
            dev_port: 0x1234,
            app_port: 0x5678,
            traffic_class: 0,
            next_header: 17,
            hop_limit: 255,
            flow_label: 0,
            coap_type: CoapType::NonConfirmable,
            coap_code: 0x02,
            message_id_base: 0x3030,
            options: sensor_options(),
            frame_capacity: DEFAULT_FRAME_CAPACITY,
        }
    }
}

impl DeviceConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a configuration. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DeviceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Replace the CoAP option template.
    pub fn with_options(mut self, options: Vec<OptionSpec>) -> Result<Self> {
        self.options = options;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.flow_label > MAX_FLOW_LABEL {
            return Err(SchcError::InvalidInput(format!(
                "flow label 0x{:X} does not fit in 20 bits",
                self.flow_label
            )));
        }
        if self.frame_capacity == 0 {
            return Err(SchcError::InvalidInput("frame capacity must be positive".to_string()));
        }
        for option in &self.options {
            if FieldId::from_coap_option(option.number).is_none() {
                return Err(SchcError::InvalidInput(format!(
                    "CoAP option {} ({}) has no field identifier",
                    option.number, option.name
                )));
            }
        }
        Ok(())
    }

    pub fn dev_ip(&self) -> Ipv6Addr {
        self.dev_ip
    }

    pub fn app_ip(&self) -> Ipv6Addr {
        self.app_ip
    }

    pub fn dev_port(&self) -> u16 {
        self.dev_port
    }

    pub fn app_port(&self) -> u16 {
        self.app_port
    }

    pub fn traffic_class(&self) -> u8 {
        self.traffic_class
    }

    pub fn next_header(&self) -> u8 {
        self.next_header
    }

    pub fn hop_limit(&self) -> u8 {
        self.hop_limit
    }

    pub fn flow_label(&self) -> u32 {
        self.flow_label
    }

    pub fn coap_type(&self) -> CoapType {
        self.coap_type
    }

    pub fn coap_code(&self) -> u8 {
        self.coap_code
    }

    /// Only the upper 12 bits are fixed; the low nibble rolls per message.
    pub fn message_id_base(&self) -> u16 {
        self.message_id_base
    }

    pub fn options(&self) -> &[OptionSpec] {
        &self.options
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    /// Builder input for packets travelling in `direction`.
    pub fn ipv6_udp_config(&self, direction: Direction) -> Ipv6UdpConfig {
        let (src_ip, dst_ip, src_port, dst_port) = match direction {
            Direction::Up => (self.dev_ip, self.app_ip, self.dev_port, self.app_port),
            Direction::Down => (self.app_ip, self.dev_ip, self.app_port, self.dev_port),
        };
        Ipv6UdpConfig {
            src_ip: src_ip.octets(),
            dst_ip: dst_ip.octets(),
            src_port,
            dst_port,
            traffic_class: self.traffic_class,
            next_header: self.next_header,
            hop_limit: self.hop_limit,
        }
    }

    pub fn coap_template(&self) -> CoapTemplate {
        CoapTemplate {
            msg_type: self.coap_type,
            code: self.coap_code,
            message_id_base: self.message_id_base,
            options: self
                .options
                .iter()
                .map(|o| CoapOption::new(o.number, o.value.to_bytes()))
                .collect(),
        }
    }
}
