//! # Persistence Format
//!
//! Binary snapshot framing for canonical state.
//!
//! Format: File header (5 bytes) + canonical header + data section.
//! - 4 bytes: Magic ("STRA")
//! - 1 byte: Version
//! - postcard `CanonicalHeader` (magic, version, counts, checksum)
//! - postcard data section (substrates, relationships, views, fetch log)
//!
//! ## Security
//!
//! Validation is staged so hostile payloads are rejected before the data
//! section is materialized:
//! - Raw byte length is capped before any parsing
//! - The 5-byte file header is validated next
//! - The canonical header is deserialized on its own and its count bounds
//!   checked BEFORE the data section is deserialized
//! - After the body parses, its lengths must match the header counts

use crate::export::{CanonicalHeader, CanonicalRelationship, CanonicalState, CanonicalSubstrate};
use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};
use crate::srl::SrlView;
use crate::srl::fetch_log::FetchRecord;
use crate::types::CoreError;

/// Maximum allowed payload size for the snapshot format.
///
/// Validated BEFORE deserialization to prevent allocation-based abuse.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 500 * 1024 * 1024; // 500 MB

/// Minimum valid snapshot size (file header only).
const MIN_FILE_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all snapshot data.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Create a new header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
        }
    }

    /// Validate the header.
    pub fn validate(&self) -> Result<(), CoreError> {
        if &self.magic != MAGIC_BYTES {
            return Err(CoreError::Serialization("Invalid magic bytes".to_string()));
        }
        if self.version != FORMAT_VERSION {
            return Err(CoreError::Serialization(format!(
                "Unsupported version: {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Write header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 5] {
        let mut bytes = [0u8; 5];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    /// Read header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < MIN_FILE_SIZE {
            return Err(CoreError::Serialization("Header too short".to_string()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// The data section as serialized after the canonical header.
type DataSection = (
    Vec<CanonicalSubstrate>,
    Vec<CanonicalRelationship>,
    Vec<SrlView>,
    Vec<FetchRecord>,
);

/// Serialize canonical state to bytes (file header + canonical header +
/// data section).
pub fn state_to_bytes(state: &CanonicalState) -> Result<Vec<u8>, CoreError> {
    let header_bytes = postcard::to_stdvec(&state.header)
        .map_err(|e| CoreError::Serialization(e.to_string()))?;
    let body = (
        &state.substrates,
        &state.relationships,
        &state.srls,
        &state.fetch_records,
    );
    let body_bytes =
        postcard::to_stdvec(&body).map_err(|e| CoreError::Serialization(e.to_string()))?;

    let mut result = Vec::with_capacity(MIN_FILE_SIZE + header_bytes.len() + body_bytes.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&body_bytes);
    Ok(result)
}

/// Deserialize canonical state from bytes.
///
/// The canonical header is parsed and validated on its own; the data
/// section is only deserialized once the header's count bounds have
/// passed.
pub fn state_from_bytes(bytes: &[u8]) -> Result<CanonicalState, CoreError> {
    if bytes.len() < MIN_FILE_SIZE {
        return Err(CoreError::Serialization(
            "Data too short: minimum 5 bytes required".to_string(),
        ));
    }
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(CoreError::Serialization(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    let file_header = PersistenceHeader::from_bytes(bytes)?;
    file_header.validate()?;

    // Header stage: bounds are enforced before the body exists in memory.
    let payload = &bytes[MIN_FILE_SIZE..];
    let (header, body_bytes) = postcard::take_from_bytes::<CanonicalHeader>(payload)
        .map_err(|e| CoreError::Serialization(format!("Failed to deserialize header: {}", e)))?;
    header.validate()?;

    let (substrates, relationships, srls, fetch_records): DataSection =
        postcard::from_bytes(body_bytes).map_err(|e| {
            CoreError::Serialization(format!("Failed to deserialize snapshot: {}", e))
        })?;

    let state = CanonicalState {
        header,
        substrates,
        relationships,
        srls,
        fetch_records,
    };
    // Cross-check: the materialized body must match the header's claims.
    state.validate()?;
    Ok(state)
}

// =============================================================================
// TESTS
// =============================================================================
