use proptest::prelude::*;
use schc::checksum::udp_ipv6_checksum;
use schc::config::DeviceConfig;
use schc::{
    build_ipv6_udp_coap_packet_vec, build_ipv6_udp_packet_vec, compress_packet, decompress_packet, default_ruleset,
    Direction, Ipv6UdpConfig,
};

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Up), Just(Direction::Down)]
}

proptest! {
    #[test]
    fn prop_coap_uplink_round_trip(
        nibble in 0u8..16,
        payload in prop::collection::vec(any::<u8>(), 0..128),
        direction in direction_strategy(),
    ) {
        let config = DeviceConfig::default();
        let ruleset = default_ruleset(&config).unwrap();
        let message = config.coap_template().message(nibble, &payload);
        let raw = build_ipv6_udp_coap_packet_vec(&config.ipv6_udp_config(direction), 0, &message).unwrap();

        let compressed = compress_packet(&ruleset, &raw, direction, 512).unwrap();
        prop_assert!(compressed.data.len() <= raw.len());
        let restored = decompress_packet(&ruleset, &compressed.data, direction).unwrap();
        prop_assert_eq!(restored.data, raw);
    }

    #[test]
    fn prop_any_header_round_trip(
        traffic_class in any::<u8>(),
        flow_label in 0u32..=0xF_FFFF,
        hop_limit in prop_oneof![Just(255u8), any::<u8>()],
        src_port in any::<u16>(),
        payload in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let config = DeviceConfig::default();
        let ruleset = default_ruleset(&config).unwrap();
        let mut cfg = config.ipv6_udp_config(Direction::Up);
        cfg.traffic_class = traffic_class;
        cfg.hop_limit = hop_limit;
        cfg.src_port = src_port;
        let raw = build_ipv6_udp_packet_vec(&cfg, flow_label, &payload).unwrap();

        let compressed = compress_packet(&ruleset, &raw, Direction::Up, 512).unwrap();
        let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
        prop_assert_eq!(restored.data, raw);
    }

    #[test]
    fn prop_arbitrary_bytes_round_trip(raw in prop::collection::vec(any::<u8>(), 0..160)) {
        let ruleset = default_ruleset(&DeviceConfig::default()).unwrap();
        let compressed = compress_packet(&ruleset, &raw, Direction::Up, 512).unwrap();
        let restored = decompress_packet(&ruleset, &compressed.data, Direction::Up).unwrap();
        prop_assert_eq!(restored.data, raw);
    }

    #[test]
    fn prop_udp_checksum_never_zero(
        src in any::<[u8; 16]>(),
        dst in any::<[u8; 16]>(),
        segment in prop::collection::vec(any::<u8>(), 8..96),
    ) {
        prop_assert_ne!(udp_ipv6_checksum(&src, &dst, &segment), 0);
    }

    #[test]
    fn prop_length_fields_follow_payload(
        src_ip in any::<[u8; 16]>(),
        dst_ip in any::<[u8; 16]>(),
        payload in prop::collection::vec(any::<u8>(), 0..300),
    ) {
        let cfg = Ipv6UdpConfig {
            src_ip,
            dst_ip,
            src_port: 0x1234,
            dst_port: 0x5678,
            traffic_class: 0,
            next_header: 17,
            hop_limit: 255,
        };
        let raw = build_ipv6_udp_packet_vec(&cfg, 0, &payload).unwrap();
        let udp_length = (8 + payload.len()) as u16;

        prop_assert_eq!(raw.len(), 48 + payload.len());
        prop_assert_eq!(u16::from_be_bytes([raw[4], raw[5]]), udp_length);
        prop_assert_eq!(u16::from_be_bytes([raw[44], raw[45]]), udp_length);
        prop_assert_eq!(&raw[48..], payload.as_slice());
    }
}
