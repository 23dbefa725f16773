//! # Substrate Resource Locators
//!
//! An SRL is a special substrate encoding how to fetch an external
//! resource. Fetches are lazy (no background I/O), credentials stay
//! encrypted outside a single decryption scope, every attempt is audited,
//! and repeated failure blacklists the locator.
//!
//! Externally visible state is confined to [`SrlView`]; the full record
//! (connection coordinates, credential blob, last error) never implements
//! `Serialize`.

pub mod adapter;
pub mod fetch_log;
pub mod vault;

use crate::types::{
    ActorId, CancelToken, CoreError, Identity, SrlKind, SrlStatus, unix_time_millis,
};
use adapter::{AdapterRegistry, FetchTarget, sanitize_error};
use fetch_log::{FetchLog, FetchRecord, canonical_params};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use vault::{CredentialVault, EncryptedCredentials};

// =============================================================================
// IDENTITY PACKING
// =============================================================================

const NAMESPACE_MASK: u64 = 0xFF_FFFF;
const PATH_MASK: u64 = 0xFF_FFFF;

/// Pack `(kind, namespace, path)` into a 64-bit SRL identity.
///
/// Layout: bits 63..48 kind, 47..24 namespace hash, 23..0 path hash (or
/// the literal port for numeric paths). Two SRLs targeting the same
/// resource always produce the same identity.
#[must_use]
pub fn pack_identity(kind: SrlKind, namespace: &str, path: &str) -> Identity {
    let namespace_bits = Identity::from_content(namespace).value() & NAMESPACE_MASK;
    let path_bits = match path.parse::<u64>() {
        Ok(port) if port <= PATH_MASK => port,
        _ => Identity::from_content(path).value() & PATH_MASK,
    };
    Identity::new((u64::from(kind.code()) << 48) | (namespace_bits << 24) | path_bits)
}

/// Extract the kind field from a packed SRL identity.
#[must_use]
pub fn unpack_kind(identity: Identity) -> Option<SrlKind> {
    SrlKind::from_code((identity.value() >> 48) as u16)
}

// =============================================================================
// RECORD AND VIEW
// =============================================================================

/// Full SRL record. Deliberately NOT `Serialize`: connection coordinates,
/// the encrypted credential blob, and the last error stay inside the
/// process.
#[derive(Debug, Clone)]
struct SrlRecord {
    id: Identity,
    substrate: Identity,
    name: String,
    kind: SrlKind,
    namespace: String,
    path: String,
    status: SrlStatus,
    created_at: u64,
    last_used_at: Option<u64>,
    fetch_count: u64,
    consecutive_failures: u32,
    credentials: Option<EncryptedCredentials>,
    last_error: Option<String>,
}

/// The externally visible projection of an SRL.
///
/// This is the ONLY serializable surface; adding a field here is a
/// trust-boundary decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrlView {
    pub id: Identity,
    pub substrate_identity: Identity,
    pub name: String,
    pub kind: SrlKind,
    pub status: SrlStatus,
    pub created_at: u64,
    pub last_used_at: Option<u64>,
    pub fetch_count: u64,
    pub is_active: bool,
}

impl SrlRecord {
    fn view(&self) -> SrlView {
        SrlView {
            id: self.id,
            substrate_identity: self.substrate,
            name: self.name.clone(),
            kind: self.kind,
            status: self.status,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            fetch_count: self.fetch_count,
            is_active: self.status.is_active(),
        }
    }
}

/// Durable form of an SRL for the redb store: the view plus the fields
/// needed to rebuild the record. Credentials travel only as the encrypted
/// blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSrl {
    pub view: SrlView,
    pub namespace: String,
    pub path: String,
    pub consecutive_failures: u32,
    pub credentials: Option<EncryptedCredentials>,
}

// =============================================================================
// TABLE
// =============================================================================

/// Outcome of a fetch, before any spawn rule runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPayload {
    /// The raw fetched bytes.
    pub bytes: Vec<u8>,
    /// Content identity of the bytes, used by spawn rules.
    pub payload_identity: Identity,
}

/// The process-wide SRL table.
pub struct SrlTable {
    entries: RwLock<BTreeMap<Identity, SrlRecord>>,
    blacklist_threshold: u32,
}

impl std::fmt::Debug for SrlTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrlTable")
            .field("entries", &self.entries.read().len())
            .field("blacklist_threshold", &self.blacklist_threshold)
            .finish()
    }
}

impl SrlTable {
    /// Create an empty table with a failure threshold.
    #[must_use]
    pub fn new(blacklist_threshold: u32) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            blacklist_threshold: blacklist_threshold.max(1),
        }
    }

    /// Register an SRL. Idempotent on resource coordinates: a second
    /// registration of the same `(kind, namespace, path)` returns the
    /// existing identity.
    ///
    /// Credentials, when given, are encrypted immediately; the plaintext
    /// is not retained.
    pub fn register(
        &self,
        name: &str,
        kind: SrlKind,
        namespace: &str,
        path: &str,
        credentials: Option<&str>,
        vault: Option<&CredentialVault>,
    ) -> Result<Identity, CoreError> {
        let id = pack_identity(kind, namespace, path);
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Ok(id);
        }

        let encrypted = match credentials {
            Some(plaintext) => {
                let vault = vault.ok_or_else(|| {
                    CoreError::MasterKeyUnavailable("vault not initialized".to_string())
                })?;
                Some(vault.encrypt(plaintext)?)
            }
            None => None,
        };

        entries.insert(
            id,
            SrlRecord {
                id,
                substrate: id,
                name: name.to_string(),
                kind,
                namespace: namespace.to_string(),
                path: path.to_string(),
                status: SrlStatus::Disconnected,
                created_at: unix_time_millis(),
                last_used_at: None,
                fetch_count: 0,
                consecutive_failures: 0,
                credentials: encrypted,
                last_error: None,
            },
        );
        tracing::info!(srl = %id, kind = kind.as_str(), "srl registered");
        Ok(id)
    }

    /// Restore a persisted SRL (durable-store loading path).
    pub fn restore(&self, stored: StoredSrl) -> Result<(), CoreError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&stored.view.id) {
            return Err(CoreError::DuplicateIdentity(stored.view.id));
        }
        entries.insert(
            stored.view.id,
            SrlRecord {
                id: stored.view.id,
                substrate: stored.view.substrate_identity,
                name: stored.view.name,
                kind: stored.view.kind,
                namespace: stored.namespace,
                path: stored.path,
                status: stored.view.status,
                created_at: stored.view.created_at,
                last_used_at: stored.view.last_used_at,
                fetch_count: stored.view.fetch_count,
                consecutive_failures: stored.consecutive_failures,
                credentials: stored.credentials,
                last_error: None,
            },
        );
        Ok(())
    }

    /// Durable form of one SRL.
    pub fn stored(&self, id: Identity) -> Result<StoredSrl, CoreError> {
        let entries = self.entries.read();
        let record = entries.get(&id).ok_or(CoreError::IdentityNotFound(id))?;
        Ok(StoredSrl {
            view: record.view(),
            namespace: record.namespace.clone(),
            path: record.path.clone(),
            consecutive_failures: record.consecutive_failures,
            credentials: record.credentials.clone(),
        })
    }

    /// Public view of one SRL.
    pub fn view(&self, id: Identity) -> Result<SrlView, CoreError> {
        let entries = self.entries.read();
        entries
            .get(&id)
            .map(SrlRecord::view)
            .ok_or(CoreError::IdentityNotFound(id))
    }

    /// Public views of every SRL, in identity order.
    #[must_use]
    pub fn list(&self) -> Vec<SrlView> {
        self.entries.read().values().map(SrlRecord::view).collect()
    }

    /// Number of registered SRLs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Manually disable an SRL.
    pub fn disable(&self, id: Identity) -> Result<(), CoreError> {
        self.set_manual_status(id, SrlStatus::Disabled)
    }

    /// Manually blacklist an SRL (security trigger).
    pub fn blacklist(&self, id: Identity) -> Result<(), CoreError> {
        self.set_manual_status(id, SrlStatus::Blacklisted)
    }

    /// Explicit re-enable: the only exit from `Disabled` or `Blacklisted`.
    pub fn enable(&self, id: Identity) -> Result<(), CoreError> {
        let mut entries = self.entries.write();
        let record = entries.get_mut(&id).ok_or(CoreError::IdentityNotFound(id))?;
        if record.status.is_active() {
            return Ok(());
        }
        transition(record, SrlStatus::Disconnected);
        record.consecutive_failures = 0;
        Ok(())
    }

    fn set_manual_status(&self, id: Identity, status: SrlStatus) -> Result<(), CoreError> {
        let mut entries = self.entries.write();
        let record = entries.get_mut(&id).ok_or(CoreError::IdentityNotFound(id))?;
        transition(record, status);
        Ok(())
    }

    // =========================================================================
    // FETCH CONTRACT
    // =========================================================================

    /// Fetch the resource behind an SRL.
    ///
    /// Exactly one [`FetchRecord`] is appended per invocation, whatever the
    /// outcome. The table lock is never held across adapter I/O.
    pub fn fetch(
        &self,
        id: Identity,
        query: &str,
        params: &BTreeMap<String, String>,
        actor: ActorId,
        adapters: &AdapterRegistry,
        vault: Option<&CredentialVault>,
        log: &FetchLog,
        cancel: &CancelToken,
    ) -> Result<FetchPayload, CoreError> {
        let started = Instant::now();

        // Admission and transition to Connecting.
        let (kind, target, credentials) = {
            let mut entries = self.entries.write();
            let record = entries.get_mut(&id).ok_or(CoreError::IdentityNotFound(id))?;
            match record.status {
                SrlStatus::Disabled => {
                    append_record(log, record, actor, query, params, started, Err("disabled"));
                    return Err(CoreError::SrlDisabled(id));
                }
                SrlStatus::Blacklisted => {
                    append_record(log, record, actor, query, params, started, Err("blacklisted"));
                    return Err(CoreError::SrlBlacklisted(id));
                }
                _ => {}
            }
            transition(record, SrlStatus::Connecting);
            (
                record.kind,
                FetchTarget {
                    kind: record.kind,
                    namespace: record.namespace.clone(),
                    path: record.path.clone(),
                },
                record.credentials.clone(),
            )
        };

        // Adapter invocation, outside the table lock, inside the
        // decrypted-credentials scope when credentials exist.
        let outcome: Result<Vec<u8>, CoreError> = if cancel.is_cancelled() {
            Err(CoreError::FetchCancelled)
        } else {
            adapters.get(kind).and_then(|adapter| match &credentials {
                Some(encrypted) => {
                    let vault = vault.ok_or_else(|| {
                        CoreError::MasterKeyUnavailable("vault not initialized".to_string())
                    })?;
                    vault.with_decrypted(encrypted, |plaintext| {
                        adapter.fetch(&target, Some(plaintext), query, cancel)
                    })?
                }
                None => adapter.fetch(&target, None, query, cancel),
            })
        };

        // Finalize status, counters, and the audit record.
        let mut entries = self.entries.write();
        let record = entries.get_mut(&id).ok_or(CoreError::IdentityNotFound(id))?;
        match outcome {
            Ok(bytes) => {
                transition(record, SrlStatus::Connected);
                record.fetch_count = record.fetch_count.saturating_add(1);
                record.consecutive_failures = 0;
                record.last_used_at = Some(unix_time_millis());
                record.last_error = None;
                append_record(
                    log,
                    record,
                    actor,
                    query,
                    params,
                    started,
                    Ok(bytes.len() as u64),
                );
                let payload_identity = Identity::from_bytes(&bytes);
                Ok(FetchPayload {
                    bytes,
                    payload_identity,
                })
            }
            Err(error) => {
                transition(record, SrlStatus::Disconnected);
                let cancelled = matches!(error, CoreError::FetchCancelled);
                let message = if cancelled {
                    "cancelled".to_string()
                } else {
                    sanitize_error(&error.to_string())
                };
                record.last_error = Some(message.clone());
                append_record(log, record, actor, query, params, started, Err(&message));
                // Cancellation is the caller's doing, not the resource's:
                // it never counts toward the blacklist.
                if !cancelled {
                    record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                    if record.consecutive_failures >= self.blacklist_threshold {
                        transition(record, SrlStatus::Blacklisted);
                        tracing::warn!(
                            srl = %id,
                            failures = record.consecutive_failures,
                            "srl blacklisted after repeated failures"
                        );
                    }
                }
                Err(error)
            }
        }
    }
}

/// Apply a status change, logging it. Automatic transitions respect the
/// state machine; manual states are set directly.
fn transition(record: &mut SrlRecord, to: SrlStatus) {
    if record.status == to {
        return;
    }
    let from = record.status;
    let manual = matches!(to, SrlStatus::Disabled | SrlStatus::Blacklisted)
        || matches!(from, SrlStatus::Disabled | SrlStatus::Blacklisted);
    if manual || from.can_auto_transition(to) {
        record.status = to;
        tracing::info!(
            srl = %record.id,
            from = from.as_str(),
            to = to.as_str(),
            "srl status transition"
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn append_record(
    log: &FetchLog,
    record: &SrlRecord,
    actor: ActorId,
    query: &str,
    params: &BTreeMap<String, String>,
    started: Instant,
    outcome: Result<u64, &str>,
) {
    let (success, size, error) = match outcome {
        Ok(size) => (true, size, None),
        Err(message) => (false, 0, Some(message.to_string())),
    };
    log.append(FetchRecord {
        srl: record.id,
        actor,
        query: query.trim().to_string(),
        params: canonical_params(params),
        success,
        result_size_bytes: size,
        duration_ms: started.elapsed().as_millis() as u64,
        error,
        fetched_at_ms: unix_time_millis(),
    });
}

// =============================================================================
// TESTS
// =============================================================================
