//! BitBuffer Abstraction
//!
//! A bounded, append-only bit buffer with an independent read cursor, wrapping
//! `bitvec`. Bits are written and read MSB-first. Nothing is padded until the
//! buffer is finished into bytes.

use bitvec::prelude::*;

use crate::error::{Result, SchcError};

/// A position-tracked bit-level read/write buffer with a fixed bit capacity.
#[derive(Debug, Clone)]
pub struct BitBuffer {
    bits: BitVec<u8, Msb0>,
    capacity: usize,
    position: usize,
}

impl BitBuffer {
    /// Create an empty buffer able to hold `capacity_bits` bits.
    pub fn new(capacity_bits: usize) -> Self {
        Self {
            bits: BitVec::with_capacity(capacity_bits.min(1 << 16)),
            capacity: capacity_bits,
            position: 0,
        }
    }

    /// Create an empty buffer with no practical capacity limit.
    pub fn unbounded() -> Self {
        Self {
            bits: BitVec::new(),
            capacity: usize::MAX,
            position: 0,
        }
    }

    /// Create a full buffer from a byte slice, ready for reading.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let bits = BitVec::from_slice(bytes);
        let capacity = bits.len();
        Self {
            bits,
            capacity,
            position: 0,
        }
    }

    fn reserve(&self, count: usize) -> Result<()> {
        let available = self.capacity - self.bits.len();
        if count > available {
            return Err(SchcError::OutOfSpace {
                requested: count,
                available,
            });
        }
        Ok(())
    }

    /// Append `count` bits of `source`, starting at bit `source_bit_offset`.
    pub fn write_bits(&mut self, source: &[u8], source_bit_offset: usize, count: usize) -> Result<()> {
        let view = source.view_bits::<Msb0>();
        let end = source_bit_offset
            .checked_add(count)
            .filter(|end| *end <= view.len())
            .ok_or_else(|| {
                SchcError::InvalidInput(format!(
                    "source holds {} bits, cannot take {} from offset {}",
                    view.len(),
                    count,
                    source_bit_offset
                ))
            })?;
        self.write_bitslice(&view[source_bit_offset..end])
    }

    /// Append every bit of `bits`.
    pub fn write_bitslice(&mut self, bits: &BitSlice<u8, Msb0>) -> Result<()> {
        self.reserve(bits.len())?;
        self.bits.extend_from_bitslice(bits);
        Ok(())
    }

    /// Append the low `n` bits of `value`, MSB first.
    pub fn write_value(&mut self, value: u64, n: usize) -> Result<()> {
        if n > 64 {
            return Err(SchcError::InvalidInput(format!("cannot write {} bits from a u64", n)));
        }
        self.reserve(n)?;
        for i in (0..n).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Append whole bytes.
    pub fn write_all_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_bitslice(bytes.view_bits::<Msb0>())
    }

    /// Read a single bit and advance position.
    pub fn read_bit(&mut self) -> Option<bool> {
        let bit = *self.bits.get(self.position)?;
        self.position += 1;
        Some(bit)
    }

    /// Read n bits as a u64 value (MSB first) and advance position.
    pub fn read_bits(&mut self, n: usize) -> Option<u64> {
        if n > 64 || n > self.remaining() {
            return None;
        }
        let mut value: u64 = 0;
        for bit in self.bits[self.position..self.position + n].iter().by_vals() {
            value = (value << 1) | u64::from(bit);
        }
        self.position += n;
        Some(value)
    }

    /// Read n bits into a new bit vector and advance position.
    pub fn read_bitvec(&mut self, n: usize) -> Option<BitVec<u8, Msb0>> {
        if n > self.remaining() {
            return None;
        }
        let out = realigned(&self.bits[self.position..self.position + n]);
        self.position += n;
        Some(out)
    }

    /// Read n bits as a byte vector (last byte zero-padded) and advance position.
    pub fn read_bits_as_bytes(&mut self, n_bits: usize) -> Option<Vec<u8>> {
        let bits = self.read_bitvec(n_bits)?;
        Some(into_padded_bytes(bits))
    }

    /// Move every unread bit of `self` into `other`, preserving order.
    ///
    /// On failure neither buffer is modified.
    pub fn read_remaining_into(&mut self, other: &mut BitBuffer) -> Result<()> {
        other.write_bitslice(&self.bits[self.position..])?;
        self.position = self.bits.len();
        Ok(())
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Set the read position.
    pub fn set_position(&mut self, pos: usize) {
        self.position = pos.min(self.bits.len());
    }

    /// Unread bits from current position.
    pub fn remaining(&self) -> usize {
        self.bits.len().saturating_sub(self.position)
    }

    /// Total number of bits written.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Capacity in bits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes the finished buffer will occupy.
    pub fn byte_len(&self) -> usize {
        self.bits.len().div_ceil(8)
    }

    pub fn as_bitslice(&self) -> &BitSlice<u8, Msb0> {
        &self.bits
    }

    /// Finish the buffer into bytes, zero-padding the final byte.
    pub fn finish(self) -> Vec<u8> {
        into_padded_bytes(self.bits)
    }
}

/// Copy `bits` into a vector whose first bit is the first bit of its storage.
///
/// `to_bitvec` on a slice keeps the slice's head offset inside the first byte.
pub(crate) fn realigned(bits: &BitSlice<u8, Msb0>) -> BitVec<u8, Msb0> {
    let mut out = BitVec::with_capacity(bits.len());
    out.extend_from_bitslice(bits);
    out
}

/// Convert a bit vector into bytes with explicit zero padding in the last byte.
pub(crate) fn into_padded_bytes(bits: BitVec<u8, Msb0>) -> Vec<u8> {
    let mut bits = realigned(&bits);
    let padding = (8 - bits.len() % 8) % 8;
    for _ in 0..padding {
        bits.push(false);
    }
    bits.into_vec()
}
