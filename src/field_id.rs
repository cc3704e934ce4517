//! Field identifier enum for compile-time type safety.
//!
//! Every header field a rule can describe is listed once in the table below,
//! together with its SCHC name and its default size. CoAP options also carry
//! their option number.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Error returned when a field name is not a known SCHC field identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFieldId(pub String);

impl fmt::Display for UnknownFieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown field identifier: {}", self.0)
    }
}

impl std::error::Error for UnknownFieldId {}

macro_rules! field_ids {
    ($( $variant:ident => $name:literal, $size:expr, $option:expr; )+) => {
        /// SCHC field identifier
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum FieldId {
            $( $variant, )+
        }

        impl FieldId {
            /// All known field identifiers, in declaration order.
            pub const ALL: &'static [FieldId] = &[ $( FieldId::$variant, )+ ];

            /// Canonical SCHC name, e.g. `IPV6.HOP_LMT`.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( FieldId::$variant => $name, )+
                }
            }

            /// Default field size in bits; `None` for variable-length fields.
            pub fn default_size_bits(&self) -> Option<u16> {
                match self {
                    $( FieldId::$variant => $size, )+
                }
            }

            /// CoAP option number, for fields that are CoAP options.
            pub fn coap_option_number(&self) -> Option<u16> {
                match self {
                    $( FieldId::$variant => $option, )+
                }
            }
        }

        impl FromStr for FieldId {
            type Err = UnknownFieldId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $name => Ok(FieldId::$variant), )+
                    _ => Err(UnknownFieldId(s.to_string())),
                }
            }
        }
    };
}

field_ids! {
    Ipv6Ver => "IPV6.VER", Some(4), None;
    Ipv6Tc => "IPV6.TC", Some(8), None;
    Ipv6Fl => "IPV6.FL", Some(20), None;
    Ipv6Len => "IPV6.LEN", Some(16), None;
    Ipv6Nxt => "IPV6.NXT", Some(8), None;
    Ipv6HopLmt => "IPV6.HOP_LMT", Some(8), None;
    Ipv6DevPrefix => "IPV6.DEV_PREFIX", Some(64), None;
    Ipv6DevIid => "IPV6.DEV_IID", Some(64), None;
    Ipv6AppPrefix => "IPV6.APP_PREFIX", Some(64), None;
    Ipv6AppIid => "IPV6.APP_IID", Some(64), None;
    UdpDevPort => "UDP.DEV_PORT", Some(16), None;
    UdpAppPort => "UDP.APP_PORT", Some(16), None;
    UdpLen => "UDP.LEN", Some(16), None;
    UdpCksum => "UDP.CKSUM", Some(16), None;
    CoapVer => "COAP.VER", Some(2), None;
    CoapType => "COAP.TYPE", Some(2), None;
    CoapTkl => "COAP.TKL", Some(4), None;
    CoapCode => "COAP.CODE", Some(8), None;
    CoapMid => "COAP.MID", Some(16), None;
    CoapToken => "COAP.TOKEN", None, None;
    CoapIfMatch => "COAP.IF_MATCH", None, Some(1);
    CoapUriHost => "COAP.URI_HOST", None, Some(3);
    CoapEtag => "COAP.ETAG", None, Some(4);
    CoapIfNoneMatch => "COAP.IF_NONE_MATCH", None, Some(5);
    CoapObserve => "COAP.OBSERVE", None, Some(6);
    CoapUriPort => "COAP.URI_PORT", None, Some(7);
    CoapLocationPath => "COAP.LOCATION_PATH", None, Some(8);
    CoapUriPath => "COAP.URI_PATH", None, Some(11);
    CoapContentFormat => "COAP.CONTENT_FORMAT", None, Some(12);
    CoapMaxAge => "COAP.MAX_AGE", None, Some(14);
    CoapUriQuery => "COAP.URI_QUERY", None, Some(15);
    CoapAccept => "COAP.ACCEPT", None, Some(17);
    CoapLocationQuery => "COAP.LOCATION_QUERY", None, Some(20);
    CoapSize1 => "COAP.SIZE1", None, Some(60);
    Payload => "PAYLOAD", None, None;
}

impl FieldId {
    /// Look up the field identifier for a CoAP option number.
    pub fn from_coap_option(number: u16) -> Option<FieldId> {
        FieldId::ALL
            .iter()
            .copied()
            .find(|fid| fid.coap_option_number() == Some(number))
    }

    pub fn is_coap_option(&self) -> bool {
        self.coap_option_number().is_some()
    }

    /// Whether the field belongs to the CoAP layer (header, token or option).
    pub fn is_coap(&self) -> bool {
        self.as_str().starts_with("COAP.")
    }

    /// IPv6 prefix fields, whose target values are written as address prefixes.
    pub fn is_prefix(&self) -> bool {
        matches!(self, FieldId::Ipv6DevPrefix | FieldId::Ipv6AppPrefix)
    }

    /// IPv6 interface identifier fields.
    pub fn is_iid(&self) -> bool {
        matches!(self, FieldId::Ipv6DevIid | FieldId::Ipv6AppIid)
    }

    /// Whether a `compute-length` action can rebuild this field.
    pub fn is_length(&self) -> bool {
        matches!(self, FieldId::Ipv6Len | FieldId::UdpLen)
    }

    /// Whether a `compute-checksum` action can rebuild this field.
    pub fn is_checksum(&self) -> bool {
        matches!(self, FieldId::UdpCksum)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FieldId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FieldId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // as_str / FromStr tests
    // =========================================================================

    #[test]
    fn test_ipv6_field_strings() {
        assert_eq!(FieldId::Ipv6Ver.as_str(), "IPV6.VER");
        assert_eq!(FieldId::Ipv6Fl.as_str(), "IPV6.FL");
        assert_eq!(FieldId::Ipv6HopLmt.as_str(), "IPV6.HOP_LMT");
        assert_eq!(FieldId::Ipv6DevPrefix.as_str(), "IPV6.DEV_PREFIX");
        assert_eq!(FieldId::Ipv6AppIid.as_str(), "IPV6.APP_IID");
    }

    #[test]
    fn test_every_name_parses_back() {
        for fid in FieldId::ALL {
            assert_eq!(FieldId::from_str(fid.as_str()).unwrap(), *fid);
        }
    }

    #[test]
    fn test_parse_unknown_field() {
        let err = FieldId::from_str("UNKNOWN.FIELD").unwrap_err();
        assert_eq!(err.0, "UNKNOWN.FIELD");
    }

    #[test]
    fn test_parse_case_sensitive() {
        assert!(FieldId::from_str("ipv6.ver").is_err());
        assert!(FieldId::from_str("Coap.Mid").is_err());
    }

    // =========================================================================
    // default_size_bits tests
    // =========================================================================

    #[test]
    fn test_header_field_sizes() {
        assert_eq!(FieldId::Ipv6Ver.default_size_bits(), Some(4));
        assert_eq!(FieldId::Ipv6Fl.default_size_bits(), Some(20));
        assert_eq!(FieldId::Ipv6DevIid.default_size_bits(), Some(64));
        assert_eq!(FieldId::UdpCksum.default_size_bits(), Some(16));
        assert_eq!(FieldId::CoapVer.default_size_bits(), Some(2));
        assert_eq!(FieldId::CoapTkl.default_size_bits(), Some(4));
        assert_eq!(FieldId::CoapMid.default_size_bits(), Some(16));
    }

    #[test]
    fn test_variable_length_fields() {
        assert_eq!(FieldId::CoapToken.default_size_bits(), None);
        assert_eq!(FieldId::CoapUriPath.default_size_bits(), None);
        assert_eq!(FieldId::Payload.default_size_bits(), None);
    }

    // =========================================================================
    // CoAP option mapping tests
    // =========================================================================

    #[test]
    fn test_coap_option_numbers() {
        assert_eq!(FieldId::CoapUriHost.coap_option_number(), Some(3));
        assert_eq!(FieldId::CoapUriPort.coap_option_number(), Some(7));
        assert_eq!(FieldId::CoapUriPath.coap_option_number(), Some(11));
        assert_eq!(FieldId::CoapUriQuery.coap_option_number(), Some(15));
        assert_eq!(FieldId::CoapMid.coap_option_number(), None);
    }

    #[test]
    fn test_layer_predicates() {
        assert!(FieldId::CoapMid.is_coap());
        assert!(FieldId::CoapUriPath.is_coap());
        assert!(!FieldId::UdpLen.is_coap());
        assert!(FieldId::Ipv6AppPrefix.is_prefix());
        assert!(FieldId::Ipv6DevIid.is_iid());
        assert!(FieldId::UdpLen.is_length());
        assert!(FieldId::UdpCksum.is_checksum());
        assert!(!FieldId::Ipv6Len.is_checksum());
    }

    #[test]
    fn test_from_coap_option() {
        assert_eq!(FieldId::from_coap_option(11), Some(FieldId::CoapUriPath));
        assert_eq!(FieldId::from_coap_option(60), Some(FieldId::CoapSize1));
        assert_eq!(FieldId::from_coap_option(2), None);
    }

    // =========================================================================
    // Serialization tests
    // =========================================================================

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&FieldId::Ipv6Ver).unwrap();
        assert_eq!(json, "\"IPV6.VER\"");
    }

    #[test]
    fn test_deserialize() {
        let field: FieldId = serde_json::from_str("\"UDP.DEV_PORT\"").unwrap();
        assert_eq!(field, FieldId::UdpDevPort);
    }

    #[test]
    fn test_deserialize_unknown_fails() {
        let result: Result<FieldId, _> = serde_json::from_str("\"UDP.SRC_PORT\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", FieldId::CoapUriPath), "COAP.URI_PATH");
    }
}
