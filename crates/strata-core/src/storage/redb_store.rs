//! # redb-backed Durable Store
//!
//! Disk persistence for the core's logical schema using the redb embedded
//! database: ACID transactions, crash safety (copy-on-write B-trees), and
//! MVCC with concurrent readers.
//!
//! What is stored:
//! - substrates: identity -> canonical expression source (reproducibility;
//!   no evaluated data)
//! - relationships: append-only, keyed by the `(source, target, kind)` triple
//! - SRLs: public view fields plus the ENCRYPTED credential blob; plaintext
//!   credentials are unrepresentable here
//! - fetch log: append-only, keyed `(srl, timestamp, sequence)` for
//!   timestamp pagination

use crate::expression::Expression;
use crate::gateway::Gateway;
use crate::srl::StoredSrl;
use crate::srl::fetch_log::FetchRecord;
use crate::types::{ActorId, CoreError, Identity, RelationKind, Relationship};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Table for substrates: identity -> serialized StoredSubstrate.
const SUBSTRATES: TableDefinition<u64, &[u8]> = TableDefinition::new("substrates");

/// Table for relationships: (source, target, kind code) -> attribute bytes.
const RELATIONSHIPS: TableDefinition<(u64, u64, u16), &[u8]> =
    TableDefinition::new("relationships");

/// Table for SRLs: srl identity -> serialized StoredSrl.
const SRLS: TableDefinition<u64, &[u8]> = TableDefinition::new("srls");

/// Table for fetch records: (srl, fetched_at_ms, seq) -> serialized record.
const FETCH_LOG: TableDefinition<(u64, u64, u32), &[u8]> = TableDefinition::new("fetch_log");

/// Table for metadata: key string -> value u64.
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// Durable substrate row: the canonical source is the whole truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSubstrate {
    source: String,
    owner: Option<u64>,
}

/// A disk-backed store for the core's logical schema.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| CoreError::Io(e.to_string()))?;

        // Initialize tables so first readers find them.
        {
            let write_txn = db.begin_write().map_err(|e| CoreError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(SUBSTRATES)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(RELATIONSHIPS)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(SRLS)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(FETCH_LOG)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(METADATA)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| CoreError::Io(e.to_string()))?;
        }

        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), CoreError> {
        self.db
            .compact()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(())
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Persist one substrate (canonical source only).
    pub fn persist_substrate(
        &self,
        identity: Identity,
        source: &str,
        owner: Option<ActorId>,
    ) -> Result<(), CoreError> {
        let row = StoredSubstrate {
            source: source.to_string(),
            owner: owner.map(|a| a.value()),
        };
        let bytes =
            postcard::to_allocvec(&row).map_err(|e| CoreError::Serialization(e.to_string()))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(SUBSTRATES)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            table
                .insert(identity.value(), bytes.as_slice())
                .map_err(|e| CoreError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Persist one relationship. Append-only: an existing triple is left
    /// untouched. Returns whether a row was written.
    pub fn persist_relationship(&self, rel: &Relationship) -> Result<bool, CoreError> {
        let key = (rel.source.value(), rel.target.value(), rel.kind.code());
        let bytes = postcard::to_allocvec(&rel.attributes)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        let written = {
            let mut table = write_txn
                .open_table(RELATIONSHIPS)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            let exists = table
                .get(key)
                .map_err(|e| CoreError::Io(e.to_string()))?
                .is_some();
            if exists {
                false
            } else {
                table
                    .insert(key, bytes.as_slice())
                    .map_err(|e| CoreError::Io(e.to_string()))?;
                true
            }
        };
        write_txn
            .commit()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(written)
    }

    /// Persist an SRL row (view fields plus the encrypted blob).
    pub fn persist_srl(&self, stored: &StoredSrl) -> Result<(), CoreError> {
        let bytes =
            postcard::to_allocvec(stored).map_err(|e| CoreError::Serialization(e.to_string()))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(SRLS)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            table
                .insert(stored.view.id.value(), bytes.as_slice())
                .map_err(|e| CoreError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Append one fetch record. The global sequence counter disambiguates
    /// same-millisecond appends; rows are never rewritten.
    pub fn append_fetch_record(&self, record: &FetchRecord) -> Result<(), CoreError> {
        let bytes =
            postcard::to_allocvec(record).map_err(|e| CoreError::Serialization(e.to_string()))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        {
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            let seq = meta
                .get("fetch_seq")
                .map_err(|e| CoreError::Io(e.to_string()))?
                .map(|v| v.value())
                .unwrap_or(0);
            meta.insert("fetch_seq", seq.saturating_add(1))
                .map_err(|e| CoreError::Io(e.to_string()))?;

            let mut table = write_txn
                .open_table(FETCH_LOG)
                .map_err(|e| CoreError::Io(e.to_string()))?;
            table
                .insert(
                    (record.srl.value(), record.fetched_at_ms, seq as u32),
                    bytes.as_slice(),
                )
                .map_err(|e| CoreError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// All substrates, in identity order.
    pub fn load_substrates(&self) -> Result<Vec<(Identity, String, Option<ActorId>)>, CoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(SUBSTRATES)
            .map_err(|e| CoreError::Io(e.to_string()))?;

        let mut rows = Vec::new();
        for entry in table.iter().map_err(|e| CoreError::Io(e.to_string()))? {
            let (key, value) = entry.map_err(|e| CoreError::Io(e.to_string()))?;
            let row: StoredSubstrate = postcard::from_bytes(value.value())
                .map_err(|e| CoreError::Serialization(e.to_string()))?;
            rows.push((
                Identity::new(key.value()),
                row.source,
                row.owner.map(ActorId::new),
            ));
        }
        Ok(rows)
    }

    /// All relationships, in key order.
    pub fn load_relationships(&self) -> Result<Vec<Relationship>, CoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(RELATIONSHIPS)
            .map_err(|e| CoreError::Io(e.to_string()))?;

        let mut rows = Vec::new();
        for entry in table.iter().map_err(|e| CoreError::Io(e.to_string()))? {
            let (key, value) = entry.map_err(|e| CoreError::Io(e.to_string()))?;
            let (source, target, kind_code) = key.value();
            let kind = RelationKind::from_code(kind_code).ok_or_else(|| {
                CoreError::Serialization(format!("unknown relationship kind code {kind_code}"))
            })?;
            let attributes: BTreeMap<String, String> = postcard::from_bytes(value.value())
                .map_err(|e| CoreError::Serialization(e.to_string()))?;
            let mut rel =
                Relationship::new(Identity::new(source), Identity::new(target), kind);
            rel.attributes = attributes;
            rows.push(rel);
        }
        Ok(rows)
    }

    /// All SRL rows.
    pub fn load_srls(&self) -> Result<Vec<StoredSrl>, CoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(SRLS)
            .map_err(|e| CoreError::Io(e.to_string()))?;

        let mut rows = Vec::new();
        for entry in table.iter().map_err(|e| CoreError::Io(e.to_string()))? {
            let (_, value) = entry.map_err(|e| CoreError::Io(e.to_string()))?;
            rows.push(
                postcard::from_bytes(value.value())
                    .map_err(|e| CoreError::Serialization(e.to_string()))?,
            );
        }
        Ok(rows)
    }

    /// All fetch records, in `(srl, timestamp, seq)` order.
    pub fn load_fetch_records(&self) -> Result<Vec<FetchRecord>, CoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(FETCH_LOG)
            .map_err(|e| CoreError::Io(e.to_string()))?;

        let mut rows = Vec::new();
        for entry in table.iter().map_err(|e| CoreError::Io(e.to_string()))? {
            let (_, value) = entry.map_err(|e| CoreError::Io(e.to_string()))?;
            rows.push(
                postcard::from_bytes(value.value())
                    .map_err(|e| CoreError::Serialization(e.to_string()))?,
            );
        }
        Ok(rows)
    }

    /// Page of one SRL's fetch records strictly after a timestamp.
    pub fn fetch_page(
        &self,
        srl: Identity,
        after_ms: u64,
        limit: usize,
    ) -> Result<Vec<FetchRecord>, CoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(FETCH_LOG)
            .map_err(|e| CoreError::Io(e.to_string()))?;

        let mut rows = Vec::new();
        for entry in table.iter().map_err(|e| CoreError::Io(e.to_string()))? {
            let (key, value) = entry.map_err(|e| CoreError::Io(e.to_string()))?;
            let (row_srl, fetched_at, _) = key.value();
            if row_srl != srl.value() || fetched_at <= after_ms {
                continue;
            }
            rows.push(
                postcard::from_bytes(value.value())
                    .map_err(|e| CoreError::Serialization(e.to_string()))?,
            );
            if rows.len() >= limit {
                break;
            }
        }
        Ok(rows)
    }

    /// Number of persisted substrates.
    pub fn substrate_count(&self) -> Result<usize, CoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(SUBSTRATES)
            .map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(table.len().map_err(|e| CoreError::Io(e.to_string()))? as usize)
    }

    /// Number of persisted relationships.
    pub fn relationship_count(&self) -> Result<usize, CoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(RELATIONSHIPS)
            .map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(table.len().map_err(|e| CoreError::Io(e.to_string()))? as usize)
    }

    // =========================================================================
    // GATEWAY INTEGRATION
    // =========================================================================

    /// Persist a gateway's full logical state.
    pub fn persist_all(&self, gateway: &Gateway) -> Result<(), CoreError> {
        for substrate in gateway.registry_snapshot() {
            self.persist_substrate(
                substrate.identity(),
                &substrate.canonical_source(),
                substrate.owner(),
            )?;
        }
        for rel in gateway.relationship_snapshot() {
            self.persist_relationship(&rel)?;
        }
        for view in gateway.srl_table().list() {
            self.persist_srl(&gateway.srl_table().stored(view.id)?)?;
        }
        for record in gateway.fetch_log_snapshot() {
            self.append_fetch_record(&record)?;
        }
        Ok(())
    }

    /// Load persisted state into a freshly initialized gateway.
    pub fn load_into(&self, gateway: &Gateway) -> Result<(), CoreError> {
        for (identity, source, owner) in self.load_substrates()? {
            let expression = Expression::parse(&source)?;
            gateway.adopt_restored(identity, expression, owner)?;
        }
        for rel in self.load_relationships()? {
            gateway.restore_relationship(rel)?;
        }
        for stored in self.load_srls()? {
            gateway.srl_table().restore(stored)?;
        }
        for record in self.load_fetch_records()? {
            gateway.restore_fetch_record(record);
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::expression::ParamBag;
    use crate::types::{SrlKind, Value};

    fn temp_store() -> (tempfile::TempDir, RedbStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RedbStore::open(dir.path().join("strata.redb")).expect("open");
        (dir, store)
    }

    #[test]
    fn substrate_roundtrip() {
        let (_dir, store) = temp_store();
        let id = Identity::from_content("constant:42");
        store
            .persist_substrate(id, "constant:42", Some(ActorId::new(3)))
            .expect("persist");

        let rows = store.load_substrates().expect("load");
        assert_eq!(rows, vec![(id, "constant:42".to_string(), Some(ActorId::new(3)))]);
    }

    #[test]
    fn relationships_are_append_only() {
        let (_dir, store) = temp_store();
        let rel = Relationship::new(Identity::new(1), Identity::new(2), RelationKind::Sibling)
            .with_attribute("note", "first");

        assert!(store.persist_relationship(&rel).expect("persist"));
        // A second write of the same triple does not overwrite the first.
        let overwrite = rel.clone().with_attribute("note", "second");
        assert!(!store.persist_relationship(&overwrite).expect("persist"));

        let rows = store.load_relationships().expect("load");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attributes["note"], "first");
    }

    #[test]
    fn fetch_log_pagination() {
        let (_dir, store) = temp_store();
        for at in [100u64, 200, 300] {
            store
                .append_fetch_record(&FetchRecord {
                    srl: Identity::new(9),
                    actor: ActorId::new(1),
                    query: String::new(),
                    params: String::new(),
                    success: true,
                    result_size_bytes: 1,
                    duration_ms: 1,
                    error: None,
                    fetched_at_ms: at,
                })
                .expect("append");
        }

        let page = store.fetch_page(Identity::new(9), 100, 10).expect("page");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].fetched_at_ms, 200);
    }

    #[test]
    fn gateway_state_survives_persistence() {
        let (_dir, store) = temp_store();
        let gateway = Gateway::init(CoreConfig::default()).expect("init");
        let a = gateway
            .create_substrate(ActorId::new(1), "constant:10")
            .expect("create");
        let b = gateway
            .create_substrate(ActorId::new(1), "expr: a + 1")
            .expect("create");
        gateway.add(a, b).expect("add");
        gateway
            .register_srl("files", SrlKind::File, "local", "/tmp/x", None)
            .expect("srl");

        store.persist_all(&gateway).expect("persist");

        let restored = Gateway::init(CoreConfig::default()).expect("init");
        store.load_into(&restored).expect("load");

        assert_eq!(
            restored.invoke(a, &ParamBag::new()).expect("invoke"),
            Value::new(10)
        );
        assert_eq!(restored.stats().substrates, gateway.stats().substrates);
        assert_eq!(
            restored.stats().relationships,
            gateway.stats().relationships
        );
        assert_eq!(restored.list_srls().len(), 1);
    }

    #[test]
    fn credential_plaintext_never_touches_disk() {
        let (dir, store) = temp_store();
        let vault = crate::srl::vault::CredentialVault::derive("master-pass", "salt");
        let table = crate::srl::SrlTable::new(5);
        let id = table
            .register(
                "secret-api",
                SrlKind::Http,
                "api.example.com",
                "/v1",
                Some("plaintext-credential-token"),
                Some(&vault),
            )
            .expect("register");

        store
            .persist_srl(&table.stored(id).expect("stored"))
            .expect("persist");
        drop(store);

        let raw = std::fs::read(dir.path().join("strata.redb")).expect("read db file");
        let needle = b"plaintext-credential-token";
        let found = raw.windows(needle.len()).any(|w| w == needle);
        assert!(!found, "credential plaintext must not appear on disk");
    }
}
