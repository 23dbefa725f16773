//! # Core Type Definitions
//!
//! This module contains all core types for the Strata dimensional substrate:
//! - Content-addressed identifiers (`Identity`, `ActorId`)
//! - Projected values (`Value`)
//! - The closed relationship vocabulary (`RelationKind`, `Relationship`,
//!   `RelationshipSet`)
//! - SRL lifecycle types (`SrlKind`, `SrlStatus`)
//! - Cooperative cancellation (`CancelToken`)
//! - Error types (`CoreError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Derive identity from content, never from insertion order

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Content-addressed identifier of a substrate.
///
/// An `Identity` is a 64-bit value. When generated from an expression it is
/// the BLAKE3 hash of the canonical source truncated to 64 bits, so two
/// substrates with the same canonical expression share one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(pub u64);

impl Identity {
    /// Create an identity from a raw 64-bit value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Create an identity from a wider integer, failing if it does not fit
    /// in 64 bits.
    pub fn from_wide(value: u128) -> Result<Self, CoreError> {
        if value > u128::from(u64::MAX) {
            return Err(CoreError::IdentityOutOfRange(value));
        }
        Ok(Self(value as u64))
    }

    /// Derive an identity from canonical content.
    ///
    /// Stable across processes and platforms: BLAKE3 truncated to the first
    /// eight bytes, little-endian.
    #[must_use]
    pub fn from_content(content: &str) -> Self {
        Self(truncate_hash(blake3::hash(content.as_bytes()).as_bytes()))
    }

    /// Derive an identity from raw bytes (used by SRL spawn rules).
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(truncate_hash(blake3::hash(bytes).as_bytes()))
    }

    /// Get the raw 64-bit value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Strict addition: overflow beyond 64 bits is a failure, not a wrap.
    ///
    /// The operator algebra's `add` wraps by design (it models identity
    /// combination); this is the bounds-enforcing primitive for callers
    /// that treat overflow as an error.
    pub fn checked_add(self, other: Identity) -> Result<Identity, CoreError> {
        self.0
            .checked_add(other.0)
            .map(Identity)
            .ok_or(CoreError::IdentityOverflow)
    }

    /// Strict multiplication; see [`Identity::checked_add`].
    pub fn checked_mul(self, other: Identity) -> Result<Identity, CoreError> {
        self.0
            .checked_mul(other.0)
            .map(Identity)
            .ok_or(CoreError::IdentityOverflow)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Truncate a 32-byte BLAKE3 digest to a little-endian u64.
fn truncate_hash(digest: &[u8; 32]) -> u64 {
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(first)
}

/// Identifier of an external actor interacting through the gateway.
///
/// The core never authenticates actors; it only attributes ownership and
/// audit records to them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ActorId(pub u64);

impl ActorId {
    /// Create a new actor identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// A projected value produced by expression evaluation or a lens.
///
/// The substrate algebra is closed over unsigned 64-bit integers; anything
/// richer lives in wrapping systems.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Value(pub u64);

impl Value {
    /// Create a new value.
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Milliseconds since the Unix epoch.
///
/// Only the observation log and the SRL perimeter touch the clock;
/// expression evaluation never does.
#[must_use]
pub fn unix_time_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// RELATIONSHIP VOCABULARY
// =============================================================================

/// The closed set of relationship kinds.
///
/// Chosen so the operator algebra is complete: every operator's returned
/// relationship set draws only from this vocabulary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RelationKind {
    // Structural (created by division)
    PartOfWhole,
    WholeOfPart,
    Sibling,
    Containment,
    Ordering,
    // Operational (created by addition)
    Attribute,
    Dependency,
    Adjacency,
    Aggregation,
    // Residual (created by modulus)
    Boundary,
    Cycle,
    Recursion,
    Lineage,
    // Projection (created by power/root)
    Embedding,
    Extraction,
    Orthogonal,
    // Reversal marker
    InverseOf,
}

impl RelationKind {
    /// Every kind, in deterministic order.
    pub const ALL: [RelationKind; 17] = [
        Self::PartOfWhole,
        Self::WholeOfPart,
        Self::Sibling,
        Self::Containment,
        Self::Ordering,
        Self::Attribute,
        Self::Dependency,
        Self::Adjacency,
        Self::Aggregation,
        Self::Boundary,
        Self::Cycle,
        Self::Recursion,
        Self::Lineage,
        Self::Embedding,
        Self::Extraction,
        Self::Orthogonal,
        Self::InverseOf,
    ];

    /// Snake-case name, used in seed files and persisted attributes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PartOfWhole => "part_of_whole",
            Self::WholeOfPart => "whole_of_part",
            Self::Sibling => "sibling",
            Self::Containment => "containment",
            Self::Ordering => "ordering",
            Self::Attribute => "attribute",
            Self::Dependency => "dependency",
            Self::Adjacency => "adjacency",
            Self::Aggregation => "aggregation",
            Self::Boundary => "boundary",
            Self::Cycle => "cycle",
            Self::Recursion => "recursion",
            Self::Lineage => "lineage",
            Self::Embedding => "embedding",
            Self::Extraction => "extraction",
            Self::Orthogonal => "orthogonal",
            Self::InverseOf => "inverse_of",
        }
    }

    /// Parse a snake-case kind name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    /// Stable numeric code for storage keys.
    #[must_use]
    pub fn code(self) -> u16 {
        Self::ALL
            .iter()
            .position(|k| *k == self)
            .map(|p| p as u16)
            .unwrap_or(u16::MAX)
    }

    /// Decode a storage code back into a kind.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

/// A typed, immutable edge between two substrate identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source identity.
    pub source: Identity,
    /// Target identity.
    pub target: Identity,
    /// Relationship kind, drawn from the closed set.
    pub kind: RelationKind,
    /// Free-form attributes. Sorted map for deterministic serialization.
    pub attributes: BTreeMap<String, String>,
}

impl Relationship {
    /// Create a relationship with no attributes.
    #[must_use]
    pub fn new(source: Identity, target: Identity, kind: RelationKind) -> Self {
        Self {
            source,
            target,
            kind,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute attachment.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The identity triple that makes this relationship unique.
    #[must_use]
    pub fn key(&self) -> RelationshipKey {
        (self.source, self.target, self.kind)
    }
}

/// Uniqueness key of a relationship. Duplicate keys are rejected by the graph.
pub type RelationshipKey = (Identity, Identity, RelationKind);

// =============================================================================
// RELATIONSHIP SET
// =============================================================================

/// A grouped, indexed collection of relationships supporting set algebra.
///
/// Membership is decided by the `(source, target, kind)` triple, never by
/// attribute payloads; set operations on two sets holding the same triple
/// keep the left operand's attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RelationshipSet {
    relations: BTreeMap<RelationshipKey, Relationship>,
}

impl RelationshipSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a relationship. Returns `false` if the triple was already present.
    pub fn insert(&mut self, rel: Relationship) -> bool {
        let key = rel.key();
        if self.relations.contains_key(&key) {
            return false;
        }
        self.relations.insert(key, rel);
        true
    }

    /// Check membership by triple.
    #[must_use]
    pub fn contains(&self, source: Identity, target: Identity, kind: RelationKind) -> bool {
        self.relations.contains_key(&(source, target, kind))
    }

    /// Number of relationships.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Iterate in deterministic key order.
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.relations.values()
    }

    /// Iterate over relationships of a single kind.
    pub fn of_kind(&self, kind: RelationKind) -> impl Iterator<Item = &Relationship> {
        self.relations.values().filter(move |r| r.kind == kind)
    }

    /// The distinct kinds present in this set.
    #[must_use]
    pub fn kinds(&self) -> BTreeSet<RelationKind> {
        self.relations.keys().map(|(_, _, k)| *k).collect()
    }

    /// The `(source, target)` pairs present, ignoring kind.
    ///
    /// This is the projection scenario algebra operates on when callers
    /// compare neighborhoods of two substrates.
    #[must_use]
    pub fn identity_pairs(&self) -> BTreeSet<(Identity, Identity)> {
        self.relations.keys().map(|(s, t, _)| (*s, *t)).collect()
    }

    /// Set union. Left attributes win on shared triples.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut merged = self.relations.clone();
        for (key, rel) in &other.relations {
            merged.entry(*key).or_insert_with(|| rel.clone());
        }
        Self { relations: merged }
    }

    /// Set intersection.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let relations = self
            .relations
            .iter()
            .filter(|(key, _)| other.relations.contains_key(*key))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        Self { relations }
    }

    /// Relative complement: everything in `self` that is not in `other`.
    #[must_use]
    pub fn complement(&self, other: &Self) -> Self {
        let relations = self
            .relations
            .iter()
            .filter(|(key, _)| !other.relations.contains_key(*key))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        Self { relations }
    }

    /// Symmetric difference.
    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.complement(other).union(&other.complement(self))
    }
}

impl FromIterator<Relationship> for RelationshipSet {
    fn from_iter<I: IntoIterator<Item = Relationship>>(iter: I) -> Self {
        let mut set = Self::new();
        for rel in iter {
            set.insert(rel);
        }
        set
    }
}

// =============================================================================
// SRL LIFECYCLE TYPES
// =============================================================================

/// Kind of external resource an SRL materializes.
///
/// The numeric codes are wire-stable: they occupy the top 16 bits of a
/// packed SRL identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SrlKind {
    File,
    Http,
    Database,
    Socket,
    Custom,
}

impl SrlKind {
    /// Stable 16-bit code used in identity packing.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::File => 1,
            Self::Http => 2,
            Self::Database => 3,
            Self::Socket => 4,
            Self::Custom => 5,
        }
    }

    /// Decode a packed kind code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::File),
            2 => Some(Self::Http),
            3 => Some(Self::Database),
            4 => Some(Self::Socket),
            5 => Some(Self::Custom),
            _ => None,
        }
    }

    /// Lower-case name for logs and views.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Http => "http",
            Self::Database => "database",
            Self::Socket => "socket",
            Self::Custom => "custom",
        }
    }
}

/// Connection status of an SRL.
///
/// `Disconnected -> Connecting -> {Connected, Disconnected}` happens
/// automatically during fetch; `Disabled` and `Blacklisted` are entered
/// manually or by the failure threshold and only leave through an explicit
/// re-enable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum SrlStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disabled,
    Blacklisted,
}

impl SrlStatus {
    /// Whether the automatic state machine permits this transition.
    ///
    /// Manual states are terminal for the automatic machine: leaving
    /// `Disabled` or `Blacklisted` requires the explicit re-enable path.
    #[must_use]
    pub fn can_auto_transition(self, to: SrlStatus) -> bool {
        match self {
            Self::Disconnected => matches!(to, Self::Connecting),
            Self::Connecting => matches!(to, Self::Connected | Self::Disconnected),
            Self::Connected => matches!(to, Self::Connecting | Self::Disconnected),
            Self::Disabled | Self::Blacklisted => false,
        }
    }

    /// Whether the SRL is usable for fetches (possibly after connecting).
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Disabled | Self::Blacklisted)
    }

    /// Lower-case name for logs and views.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disabled => "disabled",
            Self::Blacklisted => "blacklisted",
        }
    }
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative cancellation token for long operations (SRL fetch, seed
/// bulk-load).
///
/// Cancellation is all-or-nothing: an operation observing a cancelled token
/// commits no partial state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Strata core.
///
/// - No silent failures
/// - Use `Result<T, CoreError>` for all recoverable operations
/// - Messages are actor-safe: they never carry credentials or decrypted bytes
#[derive(Debug, Error)]
pub enum CoreError {
    // ---- Identity ----
    /// A wider source value does not fit in 64 bits.
    #[error("Identity out of range: {0}")]
    IdentityOutOfRange(u128),

    /// The requested identity is not in the registry.
    #[error("Identity not found: {0}")]
    IdentityNotFound(Identity),

    /// A checked arithmetic path overflowed 64 bits.
    #[error("Identity arithmetic overflowed 64 bits")]
    IdentityOverflow,

    /// Two different expressions collided on one identity.
    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(Identity),

    // ---- Expression ----
    /// The expression callable failed during evaluation.
    #[error("Expression evaluation failed: {0}")]
    EvaluationFailed(String),

    /// Repeated invocation produced different results.
    #[error("Expression is not deterministic: {0}")]
    NotDeterministic(Identity),

    /// The expression source was rejected before compilation.
    #[error("Expression source rejected: {0}")]
    SourceRejected(String),

    // ---- Operators ----
    /// Modulus or division by zero.
    #[error("Division by zero")]
    DivisionByZero,

    /// A dimension index outside the Fibonacci table.
    #[error("Invalid dimension index: {0}")]
    InvalidDimensionIndex(u8),

    /// An operator pair failed to reconstruct its input.
    #[error("Reversibility violated for input {0}")]
    ReversibilityViolation(Identity),

    // ---- Graph ----
    /// The `(source, target, kind)` triple already exists.
    #[error("Duplicate relationship: {} -> {} ({})", .0, .1, .2.as_str())]
    DuplicateRelationship(Identity, Identity, RelationKind),

    /// An endpoint is not registered.
    #[error("Dangling edge: {0} is not registered")]
    DanglingEdge(Identity),

    /// A traversal expanded more nodes than the hard bound allows.
    #[error("Traversal exceeded the cycle expansion limit")]
    CycleLimitExceeded,

    /// Seed-relationship expansion exceeded the depth limit.
    #[error("Recursion exceeded depth limit {0}")]
    ExcessiveRecursion(usize),

    // ---- Seeds ----
    /// A seed record failed validation.
    #[error("Seed validation failed: {0}")]
    SeedValidation(String),

    /// Two seeds with the same name carry conflicting definitions.
    #[error("Seed conflict: {0}")]
    SeedConflict(String),

    // ---- SRL ----
    /// Fetch attempted on a disabled SRL.
    #[error("SRL disabled: {0}")]
    SrlDisabled(Identity),

    /// Fetch attempted on a blacklisted SRL.
    #[error("SRL blacklisted: {0}")]
    SrlBlacklisted(Identity),

    /// The adapter failed to materialize the resource.
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// No adapter registered for the SRL kind.
    #[error("No adapter available for kind {}", .0.as_str())]
    AdapterUnavailable(SrlKind),

    /// Credential decryption failed (wrong key, tampered blob).
    #[error("Credential decryption failed")]
    CredentialDecryptionFailed,

    /// The process-wide master key is not available.
    #[error("Master key unavailable: {0}")]
    MasterKeyUnavailable(String),

    /// A fetch was cancelled by its token.
    #[error("Fetch cancelled")]
    FetchCancelled,

    /// A cancellable bulk operation was cancelled; nothing was committed.
    #[error("Operation cancelled")]
    Cancelled,

    // ---- Gateway ----
    /// The requested operation would violate substrate law.
    #[error("Law violation: {0}")]
    LawViolation(String),

    /// The gateway rejected an external input.
    #[error("Input rejected: {0}")]
    InputRejected(String),

    // ---- Ambient ----
    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_from_content_is_stable() {
        let a = Identity::from_content("constant:42");
        let b = Identity::from_content("constant:42");
        assert_eq!(a, b);
        assert_ne!(a, Identity::from_content("constant:43"));
    }

    #[test]
    fn identity_from_wide_rejects_oversize() {
        assert!(Identity::from_wide(u128::from(u64::MAX)).is_ok());
        assert!(matches!(
            Identity::from_wide(u128::from(u64::MAX) + 1),
            Err(CoreError::IdentityOutOfRange(_))
        ));
    }

    #[test]
    fn checked_arithmetic_rejects_overflow() {
        let near_max = Identity::new(u64::MAX - 1);
        assert!(near_max.checked_add(Identity::new(1)).is_ok());
        assert!(matches!(
            near_max.checked_add(Identity::new(2)),
            Err(CoreError::IdentityOverflow)
        ));
        assert!(matches!(
            near_max.checked_mul(Identity::new(3)),
            Err(CoreError::IdentityOverflow)
        ));
    }

    #[test]
    fn relation_kind_roundtrips_through_names_and_codes() {
        for kind in RelationKind::ALL {
            assert_eq!(RelationKind::parse(kind.as_str()), Some(kind));
            assert_eq!(RelationKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(RelationKind::parse("frobnication"), None);
    }

    #[test]
    fn relationship_set_rejects_duplicate_triples() {
        let mut set = RelationshipSet::new();
        let rel = Relationship::new(Identity(1), Identity(2), RelationKind::Sibling);
        assert!(set.insert(rel.clone()));
        assert!(!set.insert(rel.with_attribute("note", "other payload")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn relationship_set_algebra_identities() {
        let a: RelationshipSet = [
            Relationship::new(Identity(1), Identity(2), RelationKind::Sibling),
            Relationship::new(Identity(1), Identity(3), RelationKind::Ordering),
        ]
        .into_iter()
        .collect();
        let b: RelationshipSet = [
            Relationship::new(Identity(1), Identity(3), RelationKind::Ordering),
            Relationship::new(Identity(4), Identity(5), RelationKind::Lineage),
        ]
        .into_iter()
        .collect();

        assert_eq!(a.intersection(&a), a);
        assert_eq!(a.union(&a), a);
        assert!(a.symmetric_difference(&a).is_empty());
        assert_eq!(a.intersection(&b).len(), 1);
        assert_eq!(a.union(&b).len(), 3);
        assert_eq!(a.complement(&b).len(), 1);
    }

    #[test]
    fn srl_status_machine_shape() {
        use SrlStatus::*;
        assert!(Disconnected.can_auto_transition(Connecting));
        assert!(Connecting.can_auto_transition(Connected));
        assert!(Connecting.can_auto_transition(Disconnected));
        assert!(Connected.can_auto_transition(Disconnected));
        assert!(!Disabled.can_auto_transition(Connected));
        assert!(!Blacklisted.can_auto_transition(Connecting));
        assert!(!Disabled.is_active());
        assert!(Disconnected.is_active());
    }

    #[test]
    fn cancel_token_is_sticky() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
