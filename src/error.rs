//! Error types for SCHC operations

use thiserror::Error;

use crate::field_id::FieldId;

#[derive(Error, Debug)]
pub enum SchcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient capacity: need {needed} bytes, have {capacity}")]
    InsufficientCapacity { needed: usize, capacity: usize },

    #[error("Compressed packet does not fit in {capacity} bytes")]
    BufferTooSmall { capacity: usize },

    #[error("Bit buffer out of space: {requested} bits requested, {available} available")]
    OutOfSpace { requested: usize, available: usize },

    #[error("Rule {0} not found in rule set")]
    RuleNotFound(u8),

    #[error("Residue truncated at {field}: need {needed} bits, {available} left")]
    Truncated {
        field: FieldId,
        needed: usize,
        available: usize,
    },

    #[error("Codec used before a rule set was installed")]
    NotInitialized,

    #[error("Rule set already installed")]
    AlreadyInitialized,

    #[error("Packet parse error: {0}")]
    PacketParse(String),

    #[error("Rule validation error: {0}")]
    RuleValidation(String),

    #[error("Decompression error: {0}")]
    Decompression(String),
}

pub type Result<T> = std::result::Result<T, SchcError>;
