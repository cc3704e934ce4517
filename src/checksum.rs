//! Internet checksum arithmetic
//!
//! One's-complement 16-bit sums and the UDP checksum over the IPv6
//! pseudo-header (RFC 8200 §8.1).

/// Offset of the checksum field inside a UDP header.
pub const UDP_CHECKSUM_OFFSET: usize = 6;

/// Add `data` to a running one's-complement sum as big-endian 16-bit words.
///
/// An odd trailing byte is summed as if followed by a zero byte.
pub fn ones_complement_add(sum: u64, data: &[u8]) -> u64 {
    let mut chunks = data.chunks_exact(2);
    let mut sum = sum;
    for word in &mut chunks {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u64::from(u16::from_be_bytes([*last, 0]));
    }
    sum
}

/// Fold carries back into the low 16 bits until none remain.
pub fn fold(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Complemented one's-complement sum of `data`.
pub fn internet_checksum(data: &[u8]) -> u16 {
    !fold(ones_complement_add(0, data))
}

/// UDP checksum of `udp_segment` (header and payload) carried over IPv6.
///
/// The checksum field inside the segment is treated as zero. A result of zero
/// is transmitted as `0xFFFF`, since zero means "no checksum" and UDP over IPv6
/// makes the checksum mandatory.
pub fn udp_ipv6_checksum(src: &[u8; 16], dst: &[u8; 16], udp_segment: &[u8]) -> u16 {
    let udp_length = udp_segment.len() as u32;

    let mut sum = ones_complement_add(0, src);
    sum = ones_complement_add(sum, dst);
    sum = ones_complement_add(sum, &udp_length.to_be_bytes());
    sum = ones_complement_add(sum, &[0, 0, 0, 17]);

    if udp_segment.len() >= UDP_CHECKSUM_OFFSET + 2 {
        sum = ones_complement_add(sum, &udp_segment[..UDP_CHECKSUM_OFFSET]);
        sum = ones_complement_add(sum, &udp_segment[UDP_CHECKSUM_OFFSET + 2..]);
    } else {
        sum = ones_complement_add(sum, udp_segment);
    }

    match !fold(sum) {
        0 => 0xFFFF,
        checksum => checksum,
    }
}
