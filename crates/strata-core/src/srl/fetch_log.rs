//! # Fetch Log
//!
//! Append-only audit trail of every SRL fetch attempt.
//!
//! Every `fetch` invocation appends exactly one record, success or
//! failure. There is no deletion or rewrite surface; rotation belongs to
//! the persistence layer outside the core.

use crate::primitives::MAX_FETCH_LOG_PAGE;
use crate::types::{ActorId, Identity};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One fetch attempt.
///
/// `error` carries a sanitized message only; credential bytes can never
/// reach it because decryption happens inside a closed scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRecord {
    /// The SRL that was fetched.
    pub srl: Identity,
    /// The actor on whose behalf the fetch ran.
    pub actor: ActorId,
    /// Canonical form of the query.
    pub query: String,
    /// Canonical `key=value;...` form of the parameters.
    pub params: String,
    /// Whether the fetch succeeded.
    pub success: bool,
    /// Size of the fetched payload, zero on failure.
    pub result_size_bytes: u64,
    /// Wall-clock duration of the attempt.
    pub duration_ms: u64,
    /// Sanitized error message, absent on success.
    pub error: Option<String>,
    /// Unix milliseconds at completion.
    pub fetched_at_ms: u64,
}

/// Canonical parameter rendering: sorted `key=value` pairs joined by `;`.
#[must_use]
pub fn canonical_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Append-only, per-SRL fetch log with timestamp pagination.
#[derive(Debug, Default)]
pub struct FetchLog {
    records: RwLock<BTreeMap<Identity, Vec<FetchRecord>>>,
}

impl FetchLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Appends are linearizable per SRL.
    pub fn append(&self, record: FetchRecord) {
        self.records.write().entry(record.srl).or_default().push(record);
    }

    /// Number of records for one SRL.
    #[must_use]
    pub fn count(&self, srl: Identity) -> usize {
        self.records.read().get(&srl).map_or(0, Vec::len)
    }

    /// Total records across all SRLs.
    #[must_use]
    pub fn total(&self) -> usize {
        self.records.read().values().map(Vec::len).sum()
    }

    /// Page of records for one SRL strictly after a timestamp, in append
    /// order. `limit` is clamped to the maximum page size.
    #[must_use]
    pub fn page(&self, srl: Identity, after_ms: u64, limit: usize) -> Vec<FetchRecord> {
        let limit = limit.min(MAX_FETCH_LOG_PAGE);
        self.records
            .read()
            .get(&srl)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.fetched_at_ms > after_ms)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every record, grouped by SRL in identity order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FetchRecord> {
        self.records
            .read()
            .values()
            .flat_map(|records| records.iter().cloned())
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
