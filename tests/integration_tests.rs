//! Integration Tests for SCHC Compression Pipeline
//!
//! These tests drive the build-compress-decompress pipeline end to end through
//! the public API, with the deployment's configuration and rule sets.

use schc::config::{extended_options, DeviceConfig};
use schc::templates::{IPV6_UDP_COAP_RULE_ID, IPV6_UDP_RULE_ID, NO_COMPRESSION_RULE_ID};
use schc::{
    build_ipv6_udp_coap_packet_vec, build_ipv6_udp_packet_vec, compress_packet, decompress_packet, default_ruleset,
    Direction, RuleSet, SchcError, SchcService,
};

/// The reference uplink: 12 zero payload bytes from dev to app.
fn reference_packet() -> Vec<u8> {
    let mut packet = hex::decode("60000000001411ff").unwrap();
    packet.extend(hex::decode("20010db8000000010000000000000001").unwrap()); // src
    packet.extend(hex::decode("20010db8000000020000000000000002").unwrap()); // dst
    packet.extend(hex::decode("1234567800143ba2").unwrap()); // UDP header
    packet.extend([0u8; 12]);
    packet
}

#[test]
fn test_reference_packet_is_byte_exact() {
    let config = DeviceConfig::default();
    let raw = build_ipv6_udp_packet_vec(&config.ipv6_udp_config(Direction::Up), 0, &[0u8; 12]).unwrap();
    assert_eq!(raw.len(), 60);
    assert_eq!(raw, reference_packet());
}

#[test]
fn test_reference_packet_compresses_to_rule_id_and_payload() {
    let ruleset = default_ruleset(&DeviceConfig::default()).unwrap();
    let raw = reference_packet();

    let compressed = compress_packet(&ruleset, &raw, Direction::Up, 256).unwrap();
    assert_eq!(compressed.rule_id, IPV6_UDP_RULE_ID);
    assert_eq!(compressed.data.len(), 13);
    assert_eq!(compressed.savings_bits(), 47 * 8);

    let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
    assert_eq!(restored.data, raw);
}

#[test]
fn test_sensor_coap_uplink() {
    let config = DeviceConfig::default();
    let ruleset = default_ruleset(&config).unwrap();
    let message = config.coap_template().message(0x7, &[0u8; 12]);
    let raw = build_ipv6_udp_coap_packet_vec(&config.ipv6_udp_config(Direction::Up), 0, &message).unwrap();

    // 48 header bytes, then the 29-byte CoAP message
    assert_eq!(raw.len(), 77);
    assert_eq!(&raw[44..48], &[0x00, 0x25, 0xE2, 0x2C]);
    assert_eq!(
        hex::encode(&raw[48..65]),
        "50023037b673656e736f720464617461ff"
    );

    let compressed = compress_packet(&ruleset, &raw, Direction::Up, 256).unwrap();
    assert_eq!(compressed.rule_id, IPV6_UDP_COAP_RULE_ID);
    let mut expected = vec![IPV6_UDP_COAP_RULE_ID, 0x70];
    expected.extend([0u8; 12]);
    assert_eq!(compressed.data, expected);

    let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
    assert_eq!(restored.data, raw);
}

#[test]
fn test_rolling_sequence_survives_round_trip() {
    let config = DeviceConfig::default();
    let ruleset = default_ruleset(&config).unwrap();
    let cfg = config.ipv6_udp_config(Direction::Up);

    for nibble in 0..16u8 {
        let message = config.coap_template().message(nibble, &[nibble, 0x42]);
        let raw = build_ipv6_udp_coap_packet_vec(&cfg, 0, &message).unwrap();
        let compressed = compress_packet(&ruleset, &raw, Direction::Up, 256).unwrap();
        assert_eq!(compressed.rule_id, IPV6_UDP_COAP_RULE_ID);
        assert_eq!(compressed.data[1] >> 4, nibble);
        let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
        assert_eq!(restored.data, raw);
    }
}

#[test]
fn test_extended_options_round_trip() {
    let config = DeviceConfig::default().with_options(extended_options()).unwrap();
    let ruleset = default_ruleset(&config).unwrap();
    let message = config.coap_template().message(0x3, b"21.5C");
    let raw = build_ipv6_udp_coap_packet_vec(&config.ipv6_udp_config(Direction::Up), 0, &message).unwrap();

    let compressed = compress_packet(&ruleset, &raw, Direction::Up, 256).unwrap();
    assert_eq!(compressed.rule_id, IPV6_UDP_COAP_RULE_ID);
    // rule id, MID nibble, payload
    assert_eq!(compressed.bit_length, 8 + 4 + 5 * 8);

    let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
    assert_eq!(restored.data, raw);
}

#[test]
fn test_sensor_rules_do_not_match_extended_packets() {
    let sensor = DeviceConfig::default();
    let ruleset = default_ruleset(&sensor).unwrap();
    let extended = DeviceConfig::default().with_options(extended_options()).unwrap();
    let message = extended.coap_template().message(0x1, &[1, 2, 3]);
    let raw = build_ipv6_udp_coap_packet_vec(&extended.ipv6_udp_config(Direction::Up), 0, &message).unwrap();

    let compressed = compress_packet(&ruleset, &raw, Direction::Up, 256).unwrap();
    // The IPv6/UDP rule still describes the packet, with CoAP as opaque payload
    assert_eq!(compressed.rule_id, IPV6_UDP_RULE_ID);
    assert_eq!(compressed.data.len(), 1 + raw.len() - 48);
    let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
    assert_eq!(restored.data, raw);
}

#[test]
fn test_unmatched_packet_falls_back_to_default_rule() {
    let config = DeviceConfig::default();
    let ruleset = default_ruleset(&config).unwrap();
    let raw = build_ipv6_udp_packet_vec(&config.ipv6_udp_config(Direction::Down), 0, &[7u8; 10]).unwrap();

    // Down packets swap the endpoints, which the Up-built rules still describe by DEV/APP
    let compressed = compress_packet(&ruleset, &raw, Direction::Down, 256).unwrap();
    assert_eq!(compressed.rule_id, IPV6_UDP_RULE_ID);

    // Read as Up, the addresses no longer match the rule
    let compressed = compress_packet(&ruleset, &raw, Direction::Up, 256).unwrap();
    assert_eq!(compressed.rule_id, NO_COMPRESSION_RULE_ID);
    assert_eq!(compressed.data.len(), raw.len() + 1);
    let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
    assert_eq!(restored.data, raw);
}

#[test]
fn test_corrupted_checksum_is_carried_verbatim() {
    let ruleset = default_ruleset(&DeviceConfig::default()).unwrap();
    let mut raw = reference_packet();
    raw[47] ^= 0x01;

    let compressed = compress_packet(&ruleset, &raw, Direction::Up, 256).unwrap();
    assert_eq!(compressed.rule_id, NO_COMPRESSION_RULE_ID);
    let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
    assert_eq!(restored.data, raw);
}

#[test]
fn test_rules_from_json_with_value_sent_options() {
    let json = r#"{
        "DefaultRuleID": 0,
        "Rules": [
            {
                "RuleID": 0,
                "Stack": "none",
                "Compression": [
                    { "FID": "PAYLOAD", "FL": 0, "MO": "ignore", "CDA": "value-sent" }
                ]
            },
            {
                "RuleID": 5,
                "Stack": "IPv6/UDP/CoAP",
                "Comment": "Any Uri-Path pair",
                "Compression": [
                    { "FID": "IPV6.VER", "TV": 6, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "IPV6.TC", "TV": 0, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "IPV6.FL", "TV": 0, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "IPV6.LEN", "MO": "ignore", "CDA": "compute" },
                    { "FID": "IPV6.NXT", "TV": 17, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "IPV6.HOP_LMT", "TV": 255, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "IPV6.DEV_PREFIX", "TV": "2001:db8:0:1::/64", "MO": "equal", "CDA": "not-sent" },
                    { "FID": "IPV6.DEV_IID", "TV": "1", "MO": "equal", "CDA": "not-sent" },
                    { "FID": "IPV6.APP_PREFIX", "TV": "2001:db8:0:2::/64", "MO": "equal", "CDA": "not-sent" },
                    { "FID": "IPV6.APP_IID", "TV": "0x2", "MO": "equal", "CDA": "not-sent" },
                    { "FID": "UDP.DEV_PORT", "TV": 4660, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "UDP.APP_PORT", "TV": 22136, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "UDP.LEN", "MO": "ignore", "CDA": "compute" },
                    { "FID": "UDP.CKSUM", "MO": "ignore", "CDA": "compute" },
                    { "FID": "COAP.VER", "TV": 1, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "COAP.TYPE", "TV": 1, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "COAP.TKL", "TV": 0, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "COAP.CODE", "TV": 2, "MO": "equal", "CDA": "not-sent" },
                    { "FID": "COAP.MID", "MO": "ignore", "CDA": "value-sent" },
                    { "FID": "COAP.URI_PATH", "FP": 1, "MO": "ignore", "CDA": "value-sent" },
                    { "FID": "COAP.URI_PATH", "FP": 2, "MO": "ignore", "CDA": "value-sent" }
                ]
            }
        ]
    }"#;
    let ruleset = RuleSet::from_json(json).unwrap();
    let config = DeviceConfig::default();
    let message = config.coap_template().message(0x9, &[0xAA]);
    let raw = build_ipv6_udp_coap_packet_vec(&config.ipv6_udp_config(Direction::Up), 0, &message).unwrap();

    let compressed = compress_packet(&ruleset, &raw, Direction::Up, 256).unwrap();
    assert_eq!(compressed.rule_id, 5);
    // MID, then "sensor" and "data" each behind a 4-bit length
    assert_eq!(compressed.bit_length, 8 + 16 + (4 + 48) + (4 + 32) + 8);

    let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
    assert_eq!(restored.data, raw);
}

#[test]
fn test_service_reports_small_frame() {
    let config = DeviceConfig::default();
    let service = SchcService::new();
    service.init(default_ruleset(&config).unwrap()).unwrap();

    let raw = build_ipv6_udp_packet_vec(&config.ipv6_udp_config(Direction::Up), 0, &[0u8; 40]).unwrap();
    let mut frame = [0u8; 16];
    assert!(matches!(
        service.compress(&raw, Direction::Up, &mut frame),
        Err(SchcError::BufferTooSmall { capacity: 16 })
    ));
}
