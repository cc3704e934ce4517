//! Simple compression example
//!
//! Compresses one sensor uplink with an inline rule that sends the flow label
//! and UDP source port, then restores it.

use schc::config::DeviceConfig;
use schc::{build_ipv6_udp_packet_vec, compress_packet, decompress_packet, Direction, RuleSet};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Define a simple rule inline
    let rules_json = r#"{
        "DefaultRuleID": 255,
        "Rules": [
            {
                "RuleID": 255,
                "Stack": "none",
                "Compression": [
                    {"FID": "PAYLOAD", "FL": 0, "MO": "ignore", "CDA": "value-sent"}
                ]
            },
            {
                "RuleID": 1,
                "Stack": "IPv6/UDP",
                "Compression": [
                    {"FID": "IPV6.VER", "FL": 4, "TV": 6, "MO": "equal", "CDA": "not-sent"},
                    {"FID": "IPV6.TC", "FL": 8, "TV": 0, "MO": "equal", "CDA": "not-sent"},
                    {"FID": "IPV6.FL", "FL": 20, "MO": "ignore", "CDA": "value-sent"},
                    {"FID": "IPV6.LEN", "MO": "ignore", "CDA": "compute-length"},
                    {"FID": "IPV6.NXT", "FL": 8, "TV": 17, "MO": "equal", "CDA": "not-sent"},
                    {"FID": "IPV6.HOP_LMT", "FL": 8, "TV": 255, "MO": "equal", "CDA": "not-sent"},
                    {"FID": "IPV6.DEV_PREFIX", "TV": "2001:db8:0:1::/64", "MO": "equal", "CDA": "not-sent"},
                    {"FID": "IPV6.DEV_IID", "TV": "1", "MO": "equal", "CDA": "not-sent"},
                    {"FID": "IPV6.APP_PREFIX", "TV": "2001:db8:0:2::/64", "MO": "equal", "CDA": "not-sent"},
                    {"FID": "IPV6.APP_IID", "TV": "2", "MO": "equal", "CDA": "not-sent"},
                    {"FID": "UDP.DEV_PORT", "FL": 16, "TV": 4608, "MO": "MSB", "MO.val": 8, "CDA": "LSB"},
                    {"FID": "UDP.APP_PORT", "FL": 16, "TV": 22136, "MO": "equal", "CDA": "not-sent"},
                    {"FID": "UDP.LEN", "FL": 16, "MO": "ignore", "CDA": "compute"},
                    {"FID": "UDP.CKSUM", "FL": 16, "MO": "ignore", "CDA": "compute"}
                ]
            }
        ]
    }"#;

    let ruleset = RuleSet::from_json(rules_json)?;
    println!("Loaded {} rule(s)", ruleset.rules().len());

    let config = DeviceConfig::default();
    let packet = build_ipv6_udp_packet_vec(&config.ipv6_udp_config(Direction::Up), 0xBEEF, &[0u8; 12])?;
    println!("\nPacket size: {} bytes", packet.len());
    println!("Packet data: {}", hex::encode(&packet));

    let result = compress_packet(&ruleset, &packet, Direction::Up, config.frame_capacity())?;
    println!("\n=== Compression Result ===");
    println!("Rule ID:           {}", result.rule_id);
    println!("Original packet:   {} bits ({} bytes)", result.original_bits, packet.len());
    println!(
        "Compressed packet: {} bits ({} bytes, padded)",
        result.bit_length,
        result.data.len()
    );
    println!(
        "Savings:           {} bits ({:.1} bytes, {:.1}%)",
        result.savings_bits(),
        result.savings_bytes(),
        100.0 * result.savings_bits() as f64 / result.original_bits as f64
    );
    for detail in result.field_details.iter().filter(|d| d.sent_bits > 0) {
        println!("  {:<16} {:>3} of {:>3} bits sent", detail.fid.as_str(), detail.sent_bits, detail.original_bits);
    }
    println!("Compressed data:   {}", hex::encode(&result.data));

    let restored = decompress_packet(&ruleset, &result.data, Direction::Up)?;
    println!(
        "\nRound trip:        {}",
        if restored.data == packet { "identical" } else { "MISMATCH" }
    );

    Ok(())
}
