//! Codec facade
//!
//! Holds the rule set for the lifetime of the process. The rule set is
//! installed once; afterwards the codec is shared freely between threads.

use log::{info, warn};
use std::sync::OnceLock;

use crate::compressor::compress_into;
use crate::decompressor::{decompress_packet, DecompressedPacket};
use crate::error::{Result, SchcError};
use crate::parser::Direction;
use crate::rule::RuleSet;

#[derive(Debug, Default)]
pub struct SchcService {
    rules: OnceLock<RuleSet>,
}

impl SchcService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service with `ruleset` already installed.
    pub fn with_ruleset(ruleset: RuleSet) -> Self {
        let service = Self::new();
        // A fresh cell always accepts the first value
        let _ = service.rules.set(ruleset);
        service
    }

    /// Install the rule set. Fails with `AlreadyInitialized` on a second call.
    pub fn init(&self, ruleset: RuleSet) -> Result<()> {
        let count = ruleset.rules().len();
        self.rules.set(ruleset).map_err(|_| SchcError::AlreadyInitialized)?;
        info!("SCHC codec initialized with {} rules", count);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.rules.get().is_some()
    }

    pub fn ruleset(&self) -> Result<&RuleSet> {
        self.rules.get().ok_or(SchcError::NotInitialized)
    }

    /// Compress `raw` into `out`, returning the number of bytes written.
    pub fn compress(&self, raw: &[u8], direction: Direction, out: &mut [u8]) -> Result<usize> {
        let ruleset = self.ruleset()?;
        compress_into(ruleset, raw, direction, out).inspect_err(|e| {
            warn!("Compression of {} byte packet failed: {}", raw.len(), e);
        })
    }

    pub fn decompress(&self, data: &[u8], direction: Direction) -> Result<DecompressedPacket> {
        let ruleset = self.ruleset()?;
        decompress_packet(ruleset, data, direction).inspect_err(|e| {
            warn!("Decompression of {} byte frame failed: {}", data.len(), e);
        })
    }
}
