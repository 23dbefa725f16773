//! # Canonical Export Module
//!
//! Deterministic, bit-exact serialization of the core's logical state for
//! verification.
//!
//! The runtime stores live behind sharded locks and a redb backend whose
//! files are not guaranteed bit-identical across runs; the canonical
//! export is the source of truth for comparing two cores. Everything is
//! sorted, and the checksum is a truncated BLAKE3 over the sorted body.
//!
//! The stream carries a small [`CanonicalHeader`] ahead of the data
//! section. The header is deserialized and validated on its own, so
//! magic, version, and the count bounds are enforced before a single
//! body record is materialized.
//!
//! SRLs appear only as their public views: the canonical stream crosses
//! the trust boundary, so connection coordinates and credential blobs are
//! structurally absent.

use crate::gateway::Gateway;
use crate::srl::SrlView;
use crate::srl::fetch_log::FetchRecord;
use crate::types::{ActorId, CoreError, Identity};
use serde::{Deserialize, Serialize};

/// Magic bytes for canonical export payloads.
pub const CANONICAL_MAGIC: [u8; 4] = *b"STRX";

/// Current canonical format version.
pub const CANONICAL_VERSION: u8 = 1;

/// Maximum allowed substrate count in canonical imports.
///
/// Carried in the [`CanonicalHeader`] and checked before the data section
/// is deserialized, so a hostile stream cannot force large allocations.
pub const MAX_IMPORT_SUBSTRATE_COUNT: u64 = 1_000_000;

/// Maximum allowed relationship count in canonical imports.
///
/// Checked at the header stage, like [`MAX_IMPORT_SUBSTRATE_COUNT`].
pub const MAX_IMPORT_RELATIONSHIP_COUNT: u64 = 10_000_000;

// =============================================================================
// CANONICAL HEADER
// =============================================================================

/// Header for canonical export streams.
///
/// Small and fixed-shape: it is parsed and validated before the data
/// section, so the count bounds genuinely precede body allocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    /// Magic bytes to identify the format.
    pub magic: [u8; 4],

    /// Format version for compatibility.
    pub version: u8,

    /// Number of substrates in the data section.
    pub substrate_count: u64,

    /// Number of relationships in the data section.
    pub relationship_count: u64,

    /// Truncated BLAKE3 of the sorted data section.
    pub checksum: u64,
}

impl CanonicalHeader {
    /// Create a new header with the given counts and checksum.
    #[must_use]
    pub fn new(substrate_count: u64, relationship_count: u64, checksum: u64) -> Self {
        Self {
            magic: CANONICAL_MAGIC,
            version: CANONICAL_VERSION,
            substrate_count,
            relationship_count,
            checksum,
        }
    }

    /// Validate magic, version, and count bounds.
    ///
    /// # Security Note
    ///
    /// Error messages are intentionally generic to avoid leaking format
    /// details to potential attackers.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.magic != CANONICAL_MAGIC {
            return Err(CoreError::Serialization("Invalid file format".to_string()));
        }
        if self.version != CANONICAL_VERSION {
            return Err(CoreError::Serialization(
                "Unsupported file version".to_string(),
            ));
        }
        if self.substrate_count > MAX_IMPORT_SUBSTRATE_COUNT
            || self.relationship_count > MAX_IMPORT_RELATIONSHIP_COUNT
        {
            return Err(CoreError::Serialization(
                "Import exceeds size bounds".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CANONICAL RECORDS (sorted, deterministic)
// =============================================================================

/// A substrate in canonical form: identity plus canonical source. No
/// evaluated data is ever exported; importers recompute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalSubstrate {
    pub identity: u64,
    pub source: String,
    pub owner: Option<u64>,
}

/// A relationship in canonical form, sorted by `(source, target, kind)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalRelationship {
    pub source: u64,
    pub target: u64,
    pub kind: String,
    pub attributes: Vec<(String, String)>,
}

/// The complete canonical state: header plus sorted data section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalState {
    pub header: CanonicalHeader,
    pub substrates: Vec<CanonicalSubstrate>,
    pub relationships: Vec<CanonicalRelationship>,
    pub srls: Vec<SrlView>,
    pub fetch_records: Vec<FetchRecord>,
}

impl CanonicalState {
    /// Validate the header and cross-check its counts against the
    /// materialized data section.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.header.validate()?;
        if self.substrates.len() as u64 != self.header.substrate_count
            || self.relationships.len() as u64 != self.header.relationship_count
        {
            return Err(CoreError::Serialization(
                "Header counts do not match data section".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// EXPORT / VERIFY / IMPORT
// =============================================================================

/// Checksum of the sorted body: BLAKE3 truncated to 64 bits.
pub fn canonical_checksum(state: &CanonicalState) -> Result<u64, CoreError> {
    let body = (
        &state.substrates,
        &state.relationships,
        &state.srls,
        &state.fetch_records,
    );
    let bytes =
        postcard::to_allocvec(&body).map_err(|e| CoreError::Serialization(e.to_string()))?;
    Ok(Identity::from_bytes(&bytes).value())
}

/// Export a gateway's logical state in canonical form.
pub fn export_canonical(gateway: &Gateway) -> Result<CanonicalState, CoreError> {
    let mut substrates: Vec<CanonicalSubstrate> = gateway
        .registry_snapshot()
        .into_iter()
        .map(|s| CanonicalSubstrate {
            identity: s.identity().value(),
            source: s.canonical_source(),
            owner: s.owner().map(|a| a.value()),
        })
        .collect();
    substrates.sort();

    let mut relationships: Vec<CanonicalRelationship> = gateway
        .relationship_snapshot()
        .into_iter()
        .map(|r| CanonicalRelationship {
            source: r.source.value(),
            target: r.target.value(),
            kind: r.kind.as_str().to_string(),
            attributes: r.attributes.into_iter().collect(),
        })
        .collect();
    relationships.sort();

    // Views only: the canonical stream is externally visible.
    let srls = gateway.srl_table().list();
    let fetch_records = gateway.fetch_log_snapshot();

    let mut state = CanonicalState {
        header: CanonicalHeader::new(substrates.len() as u64, relationships.len() as u64, 0),
        substrates,
        relationships,
        srls,
        fetch_records,
    };
    state.header.checksum = canonical_checksum(&state)?;
    Ok(state)
}

/// Verify a canonical state's bounds and checksum.
pub fn verify_canonical(state: &CanonicalState) -> Result<bool, CoreError> {
    state.validate()?;
    Ok(canonical_checksum(state)? == state.header.checksum)
}

/// Import substrates and relationships into a gateway.
///
/// SRL views and fetch records are verification data and are not imported;
/// the durable backend owns SRL restoration.
pub fn import_canonical(gateway: &Gateway, state: &CanonicalState) -> Result<(), CoreError> {
    state.validate()?;
    if canonical_checksum(state)? != state.header.checksum {
        return Err(CoreError::Serialization(
            "Checksum mismatch on import".to_string(),
        ));
    }

    for substrate in &state.substrates {
        let expression = crate::expression::Expression::parse(&substrate.source)?;
        gateway.adopt_restored(
            Identity::new(substrate.identity),
            expression,
            substrate.owner.map(ActorId::new),
        )?;
    }
    for rel in &state.relationships {
        let kind = crate::types::RelationKind::parse(&rel.kind).ok_or_else(|| {
            CoreError::Serialization(format!("unknown relationship kind `{}`", rel.kind))
        })?;
        let mut relationship = crate::types::Relationship::new(
            Identity::new(rel.source),
            Identity::new(rel.target),
            kind,
        );
        relationship.attributes = rel.attributes.iter().cloned().collect();
        gateway.restore_relationship(relationship)?;
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::formats::persistence::{PersistenceHeader, state_from_bytes, state_to_bytes};
    use crate::graph::Direction;
    use crate::types::RelationKind;

    fn populated_gateway() -> Gateway {
        let gateway = Gateway::init(CoreConfig::default()).expect("init");
        let a = gateway
            .create_substrate(ActorId::new(1), "constant:10")
            .expect("create");
        let b = gateway
            .create_substrate(ActorId::new(1), "constant:20")
            .expect("create");
        gateway.add(a, b).expect("add");
        gateway
    }

    /// Raw stream: file header + canonical header + arbitrary body bytes.
    fn craft_stream(header: &CanonicalHeader, body: &[u8]) -> Vec<u8> {
        let mut bytes = PersistenceHeader::new().to_bytes().to_vec();
        bytes.extend_from_slice(&postcard::to_allocvec(header).expect("header"));
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn export_is_deterministic() {
        let gateway = populated_gateway();
        let first = export_canonical(&gateway).expect("export");
        let second = export_canonical(&gateway).expect("export");
        assert_eq!(first, second);
        assert!(verify_canonical(&first).expect("verify"));
    }

    #[test]
    fn tampered_state_fails_verification() {
        let gateway = populated_gateway();
        let mut state = export_canonical(&gateway).expect("export");
        state.substrates[0].source = "constant:666".to_string();
        assert!(!verify_canonical(&state).expect("verify"));
    }

    #[test]
    fn import_reconstructs_logical_state() {
        let gateway = populated_gateway();
        let state = export_canonical(&gateway).expect("export");

        let restored = Gateway::init(CoreConfig::default()).expect("init");
        import_canonical(&restored, &state).expect("import");

        let re_exported = export_canonical(&restored).expect("export");
        assert_eq!(state.substrates, re_exported.substrates);
        assert_eq!(state.relationships, re_exported.relationships);

        // Behavior survives the round trip, not just shape.
        let a = Identity::from_content("constant:10");
        assert!(restored.exists(a));
        assert!(
            !restored
                .neighbors(a, Direction::Outgoing, Some(RelationKind::Adjacency))
                .is_empty()
        );
    }

    #[test]
    fn bad_magic_rejected() {
        let gateway = populated_gateway();
        let mut state = export_canonical(&gateway).expect("export");
        state.header.magic = *b"XXXX";
        assert!(matches!(
            verify_canonical(&state),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn import_rejects_checksum_mismatch() {
        let gateway = populated_gateway();
        let mut state = export_canonical(&gateway).expect("export");
        state.substrates[0].source = "constant:666".to_string();

        let restored = Gateway::init(CoreConfig::default()).expect("init");
        assert!(matches!(
            import_canonical(&restored, &state),
            Err(CoreError::Serialization(_))
        ));
        assert!(!restored.exists(Identity::from_content("constant:10")));
    }

    // =========================================================================
    // CORRUPTED IMPORTS
    // =========================================================================

    #[test]
    fn corrupted_import_empty_data() {
        assert!(state_from_bytes(&[]).is_err());
    }

    #[test]
    fn corrupted_import_file_header_only() {
        assert!(state_from_bytes(&PersistenceHeader::new().to_bytes()).is_err());
    }

    #[test]
    fn corrupted_import_truncated_payload() {
        let gateway = populated_gateway();
        let state = export_canonical(&gateway).expect("export");
        let bytes = state_to_bytes(&state).expect("serialize");

        assert!(state_from_bytes(&bytes[..bytes.len() - 3]).is_err());
        assert!(state_from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn corrupted_import_garbage_data_section() {
        let header = CanonicalHeader::new(1, 0, 0);
        let bytes = craft_stream(&header, &[0xFF, 0xAB, 0x13, 0x37, 0xFF, 0xFF]);
        assert!(state_from_bytes(&bytes).is_err());
    }

    #[test]
    fn corrupted_import_random_bytes() {
        let bytes: Vec<u8> = (0..256u32).map(|i| (i.wrapping_mul(97) % 251) as u8).collect();
        assert!(state_from_bytes(&bytes).is_err());
    }

    #[test]
    fn corrupted_import_excessive_substrate_count() {
        // The header claims an enormous data section; the stream must be
        // rejected at the header stage, before any body allocation.
        let header = CanonicalHeader::new(MAX_IMPORT_SUBSTRATE_COUNT + 1, 0, 0);
        let bytes = craft_stream(&header, &[0u8; 4]);
        assert!(matches!(
            state_from_bytes(&bytes),
            Err(CoreError::Serialization(_))
        ));
        assert!(header.validate().is_err());
    }

    #[test]
    fn corrupted_import_excessive_relationship_count() {
        let header = CanonicalHeader::new(0, MAX_IMPORT_RELATIONSHIP_COUNT + 1, 0);
        let bytes = craft_stream(&header, &[0u8; 4]);
        assert!(matches!(
            state_from_bytes(&bytes),
            Err(CoreError::Serialization(_))
        ));
        assert!(header.validate().is_err());
    }

    #[test]
    fn corrupted_import_wrong_canonical_version() {
        let gateway = populated_gateway();
        let mut state = export_canonical(&gateway).expect("export");
        state.header.version = 9;
        let bytes = state_to_bytes(&state).expect("serialize");
        assert!(state_from_bytes(&bytes).is_err());
    }

    #[test]
    fn corrupted_import_wrong_file_version() {
        let gateway = populated_gateway();
        let state = export_canonical(&gateway).expect("export");
        let mut bytes = state_to_bytes(&state).expect("serialize");
        bytes[4] = 99;
        assert!(state_from_bytes(&bytes).is_err());
    }

    #[test]
    fn corrupted_import_count_mismatch() {
        let gateway = populated_gateway();
        let mut state = export_canonical(&gateway).expect("export");
        // Header passes its own bounds but disagrees with the body.
        state.header.substrate_count += 1;
        let bytes = state_to_bytes(&state).expect("serialize");
        assert!(matches!(
            state_from_bytes(&bytes),
            Err(CoreError::Serialization(_))
        ));
    }
}
