//! SCHC Codec Binary
//!
//! Builds the reference sensor packets a device sends, compresses them with
//! the configured rules and reports the savings.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use schc::config::{extended_options, DeviceConfig};
use schc::{
    build_ipv6_udp_coap_packet_vec, build_ipv6_udp_packet_vec, default_ruleset, Direction, RuleSet, SchcService,
};

#[derive(Parser, Debug)]
#[command(name = "schc-codec")]
#[command(about = "SCHC compression of IPv6/UDP/CoAP sensor packets", long_about = None)]
struct Args {
    /// Path to a device configuration JSON file (defaults to the built-in deployment)
    #[arg(short, long)]
    config: Option<String>,

    /// Path to a rules JSON file (defaults to rules derived from the configuration)
    #[arg(short, long)]
    rules: Option<String>,

    /// Sensor payload as hex
    #[arg(short, long, default_value = "000000000000000000000000")]
    payload: String,

    /// Wrap the payload in the configured CoAP message
    #[arg(long, default_value_t = false)]
    coap: bool,

    /// Use the Uri-Host/Uri-Port/Uri-Path/Uri-Query option template
    #[arg(long, default_value_t = false)]
    extended_options: bool,

    /// Number of packets to build and compress
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,

    /// Direction of the packets ("up" or "down")
    #[arg(short, long, default_value = "up")]
    direction: Direction,

    /// Transport frame capacity in bytes (defaults to the configuration's)
    #[arg(long)]
    capacity: Option<usize>,

    /// Decompress each frame and compare with the original packet
    #[arg(short = 'v', long, default_value_t = false)]
    verify: bool,

    /// Print the rule set as JSON and exit
    #[arg(long, default_value_t = false)]
    dump_rules: bool,
}

fn load_config(args: &Args) -> Result<DeviceConfig> {
    let config = match &args.config {
        Some(path) => {
            DeviceConfig::from_file(path).with_context(|| format!("Failed to load configuration from {}", path))?
        }
        None => DeviceConfig::default(),
    };
    if args.extended_options {
        return config
            .with_options(extended_options())
            .context("Extended option template rejected");
    }
    Ok(config)
}

fn load_rules(args: &Args, config: &DeviceConfig) -> Result<RuleSet> {
    match &args.rules {
        Some(path) => RuleSet::from_file(path).with_context(|| format!("Failed to load rules from {}", path)),
        None => default_ruleset(config).context("Failed to build built-in rules"),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let ruleset = load_rules(&args, &config)?;

    if args.dump_rules {
        println!("{}", ruleset.to_json().context("Failed to serialize rules")?);
        return Ok(());
    }

    let payload = hex::decode(args.payload.trim()).context("Payload is not valid hex")?;
    let capacity = args.capacity.unwrap_or_else(|| config.frame_capacity());
    let template = config.coap_template();
    let cfg = config.ipv6_udp_config(args.direction);

    info!("Loaded {} rules, frame capacity {} bytes", ruleset.rules().len(), capacity);
    let service = SchcService::new();
    service.init(ruleset)?;

    let mut frame = vec![0u8; capacity];
    let mut total_original = 0usize;
    let mut total_compressed = 0usize;
    let mut skipped = 0usize;
    let mut failed_verifications = 0usize;

    for seq in 0..args.count {
        // Rolling 4-bit sequence carried in the CoAP message id
        let nibble = (seq & 0x0F) as u8;
        let raw = if args.coap {
            build_ipv6_udp_coap_packet_vec(&cfg, config.flow_label(), &template.message(nibble, &payload))?
        } else {
            build_ipv6_udp_packet_vec(&cfg, config.flow_label(), &payload)?
        };
        debug!("Packet {}: {}", seq + 1, hex::encode(&raw));

        let n = match service.compress(&raw, args.direction, &mut frame) {
            Ok(n) => n,
            Err(e) => {
                warn!("Packet {} skipped: {}", seq + 1, e);
                skipped += 1;
                continue;
            }
        };
        let compressed = &frame[..n];
        total_original += raw.len();
        total_compressed += n;

        let savings = raw.len() as i64 - n as i64;
        println!(
            "Packet {}: {} bytes -> {} bytes (Rule: {} - Saved: {} bytes, {:.1}%)",
            seq + 1,
            raw.len(),
            n,
            compressed[0],
            savings,
            100.0 * savings as f64 / raw.len() as f64
        );
        println!("  Compressed data:   {}", hex::encode(compressed));

        if args.verify {
            let restored = service.decompress(compressed, args.direction)?;
            if restored.data == raw {
                println!("  ✓ Verification: PASSED");
            } else {
                println!("  ✗ Verification: FAILED");
                println!("    Original:     {}", hex::encode(&raw));
                println!("    Decompressed: {}", hex::encode(&restored.data));
                failed_verifications += 1;
            }
        }
    }

    println!("\n{}", "=".repeat(80));
    println!("Summary");
    println!("{}", "=".repeat(80));
    println!("  Packets compressed: {}", args.count - skipped);
    println!("  Packets skipped:    {}", skipped);
    println!("  Original bytes:     {}", total_original);
    println!("  Compressed bytes:   {}", total_compressed);
    if total_original > 0 {
        println!(
            "  Overall savings:    {:.1}%",
            100.0 * (total_original as f64 - total_compressed as f64) / total_original as f64
        );
    }

    if failed_verifications > 0 {
        bail!("{} packet(s) failed round-trip verification", failed_verifications);
    }
    Ok(())
}
