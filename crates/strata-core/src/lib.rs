//! # strata-core
//!
//! The dimensional substrate engine - THE SUBSTRATE.
//!
//! This crate implements a content-addressed, immutable store whose values
//! are mathematical expressions rather than stored data, together with:
//! - a reversible dimensional operator algebra returning explicit
//!   relationship sets
//! - a typed, triply indexed, append-only relationship graph
//! - a lens/observation subsystem
//! - Substrate Resource Locators: lazy external materialization behind
//!   encrypted credentials and an append-only audit log
//!
//! ## Architectural Constraints
//!
//! - Expression evaluation is deterministic: no I/O, no clock, no
//!   randomness inside the grammar
//! - Substrates, relationships, observations, and fetch logs are
//!   append-only; a "change" is a new substrate plus a relationship
//! - The [`gateway::Gateway`] is the only sanctioned entry point; external
//!   callers hold identities, never substrate references
//! - The only blocking operations are SRL fetches and persistence flushes

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod export;
pub mod expression;
pub mod formats;
pub mod gateway;
pub mod graph;
pub mod lens;
pub mod ops;
pub mod primitives;
pub mod registry;
pub mod seeds;
pub mod srl;
pub mod storage;
pub mod substrate;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ActorId, CancelToken, CoreError, Identity, RelationKind, Relationship, RelationshipSet,
    SrlKind, SrlStatus, Value,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use config::CoreConfig;
pub use expression::{Expression, ParamBag, canonicalize};
pub use gateway::{CoreStats, Gateway};
pub use graph::{Direction, RelationGraph};
pub use lens::{FibonacciLens, FnLens, IdentityLens, Lens, Observation, ObservationLog};
pub use ops::{Residue, apply_with_validation, validate_reversibility};
pub use registry::SubstrateRegistry;
pub use substrate::{Dimension, Substrate};

// =============================================================================
// RE-EXPORTS: Seeds & SRL
// =============================================================================

pub use seeds::{PendingRelationship, SeedIndex, SeedLoadReport, SeedRecord, SeedSearch};
pub use srl::adapter::{AdapterRegistry, FetchTarget, ResourceAdapter};
pub use srl::fetch_log::{FetchLog, FetchRecord};
pub use srl::vault::{CredentialVault, EncryptedCredentials};
pub use srl::{SrlTable, SrlView, pack_identity};

// =============================================================================
// RE-EXPORTS: Formats & Storage
// =============================================================================

pub use export::{
    CanonicalHeader, CanonicalState, canonical_checksum, export_canonical, import_canonical,
    verify_canonical,
};
pub use formats::{PersistenceHeader, state_from_bytes, state_to_bytes};
pub use storage::RedbStore;
