//! # Gateway
//!
//! The only sanctioned entry point to the core. External callers hold
//! identities, never substrate references; every mutation routes through
//! here and is append-only.
//!
//! The gateway enforces:
//! - expression-source validation (size bound, banned markers, parse check)
//! - dedup and identity bounds on all inputs
//! - law compliance: no mutation of existing substrates, no relationship
//!   deletion, no audit redaction

use crate::config::CoreConfig;
use crate::expression::{Expression, ParamBag};
use crate::graph::{Direction, RelationGraph};
use crate::lens::{Lens, Observation, ObservationLog, observe};
use crate::ops::{self, Residue};
use crate::registry::SubstrateRegistry;
use crate::seeds::{self, SeedIndex, SeedLoadReport, SeedSearch};
use crate::srl::adapter::AdapterRegistry;
use crate::srl::fetch_log::{FetchLog, FetchRecord};
use crate::srl::vault::CredentialVault;
use crate::srl::{SrlTable, SrlView};
use crate::substrate::Dimension;
use crate::types::{
    ActorId, CancelToken, CoreError, Identity, RelationKind, Relationship, RelationshipSet,
    SrlKind, Value,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::Duration;

/// Identifiers that mark an expression source as non-deterministic.
///
/// The grammar cannot express any of these anyway; rejecting them by name
/// keeps the refusal legible to callers porting code from richer languages.
const BANNED_SOURCE_MARKERS: [&str; 6] = ["time", "now", "clock", "random", "rand", "env"];

/// Aggregate counters, logged at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreStats {
    pub substrates: usize,
    pub relationships: usize,
    pub observations: usize,
    pub srls: usize,
    pub fetch_records: usize,
    pub seeds: usize,
}

/// The process-wide core, owned by the embedder.
#[derive(Debug)]
pub struct Gateway {
    config: CoreConfig,
    vault: Option<CredentialVault>,
    registry: SubstrateRegistry,
    graph: RwLock<RelationGraph>,
    srls: SrlTable,
    adapters: AdapterRegistry,
    observations: ObservationLog,
    fetch_log: FetchLog,
    seeds: RwLock<SeedIndex>,
}

impl Gateway {
    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Initialize the core. The vault key is loaded here, once, from the
    /// configured environment variable; nothing else initializes shared
    /// state implicitly.
    pub fn init(config: CoreConfig) -> Result<Self, CoreError> {
        let vault =
            match CredentialVault::from_env(&config.master_key_env, &config.key_derivation_salt) {
                Ok(vault) => Some(vault),
                Err(CoreError::MasterKeyUnavailable(var)) => {
                    tracing::warn!(
                        var,
                        "master key not set; credentialed SRLs are unavailable"
                    );
                    None
                }
                Err(other) => return Err(other),
            };
        let adapters = AdapterRegistry::with_defaults(
            Duration::from_millis(config.fetch_timeout_ms),
            config.file_adapter_root.clone(),
        )?;
        let srls = SrlTable::new(config.blacklist_threshold);

        tracing::info!(
            vault = vault.is_some(),
            blacklist_threshold = config.blacklist_threshold,
            "gateway initialized"
        );
        Ok(Self {
            config,
            vault,
            registry: SubstrateRegistry::new(),
            graph: RwLock::new(RelationGraph::new()),
            srls,
            adapters,
            observations: ObservationLog::new(),
            fetch_log: FetchLog::new(),
            seeds: RwLock::new(SeedIndex::new()),
        })
    }

    /// Tear the core down. Consumes the gateway; shared state has no other
    /// owner, so drop is the teardown.
    pub fn teardown(self) {
        let stats = self.stats();
        tracing::info!(
            substrates = stats.substrates,
            relationships = stats.relationships,
            fetch_records = stats.fetch_records,
            "gateway teardown"
        );
    }

    /// Register an embedder-supplied adapter (Database and Custom kinds).
    pub fn register_adapter(&mut self, adapter: std::sync::Arc<dyn crate::srl::adapter::ResourceAdapter>) {
        self.adapters.register(adapter);
    }

    /// Aggregate counters.
    #[must_use]
    pub fn stats(&self) -> CoreStats {
        CoreStats {
            substrates: self.registry.len(),
            relationships: self.graph.read().relationship_count(),
            observations: self.observations.len(),
            srls: self.srls.len(),
            fetch_records: self.fetch_log.total(),
            seeds: self.seeds.read().len(),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    // =========================================================================
    // SUBSTRATE OPERATIONS
    // =========================================================================

    /// Validate an incoming expression source.
    fn validate_source(&self, source: &str) -> Result<(), CoreError> {
        if source.len() > self.config.max_expression_source_bytes {
            return Err(CoreError::InputRejected(format!(
                "source of {} bytes exceeds the {}-byte bound",
                source.len(),
                self.config.max_expression_source_bytes
            )));
        }
        for word in source.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
            if BANNED_SOURCE_MARKERS.contains(&word) {
                return Err(CoreError::InputRejected(format!(
                    "non-determinism marker `{word}`"
                )));
            }
        }
        Ok(())
    }

    /// Create (or rediscover) a substrate from an expression source.
    pub fn create_substrate(
        &self,
        actor: ActorId,
        source: &str,
    ) -> Result<Identity, CoreError> {
        self.validate_source(source)?;
        let identity = self.registry.create(source, Some(actor))?;
        self.graph.write().register_identity(identity);
        if self.config.determinism_probe {
            let substrate = self.registry.get(identity)?;
            if substrate.expression().is_closed() {
                self.registry.probe_determinism(identity, &ParamBag::new())?;
            }
        }
        tracing::debug!(identity = %identity, "substrate registered");
        Ok(identity)
    }

    /// Evaluate a substrate's expression.
    pub fn invoke(&self, identity: Identity, params: &ParamBag) -> Result<Value, CoreError> {
        self.registry.invoke(identity, params)
    }

    /// Whether an identity is registered.
    #[must_use]
    pub fn exists(&self, identity: Identity) -> bool {
        self.registry.exists(identity)
    }

    /// Identities owned by an actor.
    #[must_use]
    pub fn list_by_owner(&self, actor: ActorId) -> Vec<Identity> {
        self.registry.list_by_owner(actor)
    }

    /// The canonical source of a substrate (for reproducibility; no
    /// evaluated data is ever stored).
    pub fn canonical_source(&self, identity: Identity) -> Result<String, CoreError> {
        Ok(self.registry.get(identity)?.canonical_source())
    }

    fn require(&self, identity: Identity) -> Result<(), CoreError> {
        if !self.registry.exists(identity) {
            return Err(CoreError::IdentityNotFound(identity));
        }
        Ok(())
    }

    /// Register an operator result: a substrate under its forced identity,
    /// known to the graph.
    ///
    /// Operator results converge: if the identity is already registered
    /// (under any expression), the existing substrate is the result. This
    /// is what makes `subtract(add(a, b).0, b)` land back on `a` itself.
    fn adopt(&self, identity: Identity, expression: Expression) -> Result<Identity, CoreError> {
        match self.registry.insert_with_identity(identity, expression, None) {
            Ok(_) | Err(CoreError::DuplicateIdentity(_)) => {
                self.graph.write().register_identity(identity);
                Ok(identity)
            }
            Err(other) => Err(other),
        }
    }

    // =========================================================================
    // OPERATOR ROUTING
    // =========================================================================

    /// Divide a substrate into its nine dimensions, materializing the part
    /// substrates and the structural relationships.
    pub fn divide(&self, whole: Identity) -> Result<[Dimension; 9], CoreError> {
        let dimensions = self.registry.divide(whole)?;
        let (_, created) = ops::divide(whole);
        for dim in &dimensions {
            self.adopt(dim.identity, dim.expression())?;
        }
        self.graph.write().add_set(&created)?;
        Ok(dimensions)
    }

    /// Combine two substrates; records the operational relationships.
    pub fn add(
        &self,
        a: Identity,
        b: Identity,
    ) -> Result<(Identity, RelationshipSet), CoreError> {
        self.require(a)?;
        self.require(b)?;
        let (sum, created) = ops::add(a, b);
        self.adopt(sum, Expression::IdentitySeed(sum.value()))?;
        self.graph.write().add_set(&created)?;
        Ok((sum, created))
    }

    /// Sever an addend from a sum.
    ///
    /// Relationships are never deleted: each severed edge still present in
    /// the graph gains an `InverseOf` reversal marker, and the severed set
    /// is returned for the caller's own bookkeeping.
    pub fn subtract(
        &self,
        minuend: Identity,
        subtrahend: Identity,
    ) -> Result<(Identity, RelationshipSet), CoreError> {
        self.require(minuend)?;
        self.require(subtrahend)?;
        let (difference, severed) = ops::subtract(minuend, subtrahend);
        self.adopt(difference, Expression::IdentitySeed(difference.value()))?;

        let mut graph = self.graph.write();
        for rel in severed.iter() {
            if graph.has(rel.source, rel.target, rel.kind) {
                let marker = Relationship::new(rel.target, rel.source, RelationKind::InverseOf)
                    .with_attribute("severs", rel.kind.as_str());
                match graph.add(marker) {
                    Ok(()) | Err(CoreError::DuplicateRelationship(_, _, _)) => {}
                    Err(other) => return Err(other),
                }
            }
        }
        Ok((difference, severed))
    }

    /// Collapse parts into a unity; returns the collapsed sibling set.
    pub fn multiply(
        &self,
        parts: &[Identity],
    ) -> Result<(Identity, RelationshipSet), CoreError> {
        for part in parts {
            self.require(*part)?;
        }
        let (unity, collapsed) = ops::multiply(parts)?;
        self.adopt(unity, Expression::IdentitySeed(unity.value()))?;
        Ok((unity, collapsed))
    }

    /// Express a value against a modulus under a parent substrate; records
    /// the four residual relationship sets.
    pub fn modulus(
        &self,
        value: Identity,
        modulus: Identity,
        parent: Identity,
    ) -> Result<(Identity, Residue), CoreError> {
        self.require(parent)?;
        let (expressed, residue) = ops::modulus(value, modulus, parent)?;
        self.adopt(expressed, Expression::IdentitySeed(expressed.value()))?;
        self.adopt(residue.seed, Expression::IdentitySeed(residue.seed.value()))?;
        self.graph.write().add_set(&residue.combined())?;
        Ok((expressed, residue))
    }

    /// Promote a residue into the seed of the next dimensional level.
    ///
    /// The new substrate's identity is content-derived from the residue
    /// expression; a `Containment` edge mounts it under its parent.
    pub fn promote_residue(&self, residue: &Residue) -> Result<Identity, CoreError> {
        self.require(residue.parent)?;
        let expression = residue.seed_expression();
        let promoted = self.adopt(expression.identity(), expression)?;
        let containment = Relationship::new(residue.parent, promoted, RelationKind::Containment)
            .with_attribute("seed", residue.seed.value().to_string());
        match self.graph.write().add(containment) {
            Ok(()) | Err(CoreError::DuplicateRelationship(_, _, _)) => {}
            Err(other) => return Err(other),
        }
        Ok(promoted)
    }

    /// Stack a substrate up `exponent` dimensional levels.
    pub fn power(
        &self,
        base: Identity,
        exponent: u8,
    ) -> Result<(Identity, RelationshipSet), CoreError> {
        self.require(base)?;
        let (stacked, created) = ops::power(base, exponent)?;
        self.adopt(stacked, Expression::IdentitySeed(stacked.value()))?;

        // Embedding and orthogonality are an inverse pair; record the marker.
        let embedding = Relationship::new(base, stacked, RelationKind::Embedding);
        let orthogonal = Relationship::new(stacked, base, RelationKind::Orthogonal);
        let mut graph = self.graph.write();
        match graph.pair_inverse(embedding, orthogonal) {
            Ok(()) | Err(CoreError::DuplicateRelationship(_, _, _)) => {}
            Err(other) => return Err(other),
        }
        Ok((stacked, created))
    }

    /// Reduce a substrate down `exponent` dimensional levels.
    pub fn root(
        &self,
        value: Identity,
        exponent: u8,
    ) -> Result<(Identity, RelationshipSet), CoreError> {
        self.require(value)?;
        let (reduced, created) = ops::root(value, exponent)?;
        self.adopt(reduced, Expression::IdentitySeed(reduced.value()))?;
        let mut graph = self.graph.write();
        for rel in created.iter() {
            match graph.add(rel.clone()) {
                Ok(()) | Err(CoreError::DuplicateRelationship(_, _, _)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok((reduced, created))
    }

    // =========================================================================
    // RELATIONSHIP QUERIES
    // =========================================================================

    /// Append a relationship between two registered substrates.
    pub fn link(
        &self,
        source: Identity,
        target: Identity,
        kind: RelationKind,
    ) -> Result<(), CoreError> {
        self.graph
            .write()
            .add(Relationship::new(source, target, kind))
    }

    /// Neighbor query.
    #[must_use]
    pub fn neighbors(
        &self,
        identity: Identity,
        direction: Direction,
        kind: Option<RelationKind>,
    ) -> Vec<Relationship> {
        self.graph.read().neighbors(identity, direction, kind)
    }

    /// A substrate's neighborhood as a set, for algebra.
    #[must_use]
    pub fn relationship_set_of(
        &self,
        identity: Identity,
        direction: Direction,
    ) -> RelationshipSet {
        self.graph.read().relationship_set(identity, direction)
    }

    /// Whether a specific relationship exists.
    #[must_use]
    pub fn has_relationship(
        &self,
        source: Identity,
        target: Identity,
        kind: RelationKind,
    ) -> bool {
        self.graph.read().has(source, target, kind)
    }

    /// BFS path between two substrates.
    pub fn find_path(
        &self,
        from: Identity,
        to: Identity,
    ) -> Result<Option<Vec<Identity>>, CoreError> {
        self.graph.read().find_path(from, to)
    }

    /// Relationship deletion is not a thing this core does.
    ///
    /// Removal is modeled by [`Gateway::subtract`], which adds reversal
    /// markers. This guard exists so callers porting mutable-graph code get
    /// a `LawViolation` instead of silent acceptance.
    pub fn remove_relationship(
        &self,
        _source: Identity,
        _target: Identity,
        _kind: RelationKind,
    ) -> Result<(), CoreError> {
        Err(CoreError::LawViolation(
            "relationships are append-only; sever with an inverse marker".to_string(),
        ))
    }

    // =========================================================================
    // OBSERVATION
    // =========================================================================

    /// Observe one dimension of a substrate through a lens.
    pub fn observe(
        &self,
        substrate: Identity,
        dimension_index: u8,
        lens: &dyn Lens,
    ) -> Result<Observation, CoreError> {
        observe(
            &self.registry,
            &self.observations,
            substrate,
            dimension_index,
            lens,
        )
    }

    /// Observations recorded for a substrate.
    #[must_use]
    pub fn observations_of(&self, substrate: Identity) -> Vec<Observation> {
        self.observations.for_substrate(substrate)
    }

    // =========================================================================
    // SEEDS
    // =========================================================================

    /// Bulk-load seed records from TOML text. All-or-nothing under
    /// cancellation.
    pub fn load_seeds(
        &self,
        toml_text: &str,
        cancel: &CancelToken,
    ) -> Result<SeedLoadReport, CoreError> {
        let records = seeds::parse_seed_file(toml_text)?;
        let mut graph = self.graph.write();
        let mut index = self.seeds.write();
        seeds::load(records, &self.registry, &mut graph, &mut index, cancel)
    }

    /// Identity of a seed by name.
    #[must_use]
    pub fn seed_by_name(&self, name: &str) -> Option<Identity> {
        self.seeds.read().get_by_name(name)
    }

    /// Seed names in a category.
    #[must_use]
    pub fn seeds_by_category(&self, category: &str) -> Vec<String> {
        self.seeds.read().get_by_category(category)
    }

    /// Seed names in a domain.
    #[must_use]
    pub fn seeds_by_domain(&self, domain: &str) -> Vec<String> {
        self.seeds.read().get_by_domain(domain)
    }

    /// Seed names carrying a tag.
    #[must_use]
    pub fn seeds_by_tag(&self, tag: &str) -> Vec<String> {
        self.seeds.read().get_by_tag(tag)
    }

    /// Substring search over seeds; the iterator is restartable.
    #[must_use]
    pub fn search_seeds(&self, needle: &str) -> SeedSearch {
        self.seeds.read().search(needle)
    }

    /// Bounded transitive closure over `related` seed names.
    pub fn related_seeds(&self, name: &str) -> Result<Vec<String>, CoreError> {
        self.seeds.read().related_closure(name)
    }

    // =========================================================================
    // SRL OPERATIONS
    // =========================================================================

    /// Register an SRL and its backing substrate.
    pub fn register_srl(
        &self,
        name: &str,
        kind: SrlKind,
        namespace: &str,
        path: &str,
        credentials: Option<&str>,
    ) -> Result<Identity, CoreError> {
        let id = self.srls.register(
            name,
            kind,
            namespace,
            path,
            credentials,
            self.vault.as_ref(),
        )?;
        self.adopt(id, Expression::IdentitySeed(id.value()))?;
        Ok(id)
    }

    /// Public view of an SRL. The view is the only serializable surface.
    pub fn srl_view(&self, id: Identity) -> Result<SrlView, CoreError> {
        self.srls.view(id)
    }

    /// Public views of all SRLs.
    #[must_use]
    pub fn list_srls(&self) -> Vec<SrlView> {
        self.srls.list()
    }

    /// Manually disable an SRL.
    pub fn disable_srl(&self, id: Identity) -> Result<(), CoreError> {
        self.srls.disable(id)
    }

    /// Manually blacklist an SRL.
    pub fn blacklist_srl(&self, id: Identity) -> Result<(), CoreError> {
        self.srls.blacklist(id)
    }

    /// Explicit re-enable for disabled or blacklisted SRLs.
    pub fn enable_srl(&self, id: Identity) -> Result<(), CoreError> {
        self.srls.enable(id)
    }

    /// Fetch the resource behind an SRL. Lazy: this is the only code path
    /// that performs external I/O for the locator.
    pub fn fetch(
        &self,
        id: Identity,
        query: &str,
        params: &BTreeMap<String, String>,
        actor: ActorId,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, CoreError> {
        self.srls
            .fetch(
                id,
                query,
                params,
                actor,
                &self.adapters,
                self.vault.as_ref(),
                &self.fetch_log,
                cancel,
            )
            .map(|payload| payload.bytes)
    }

    /// Fetch and spawn a substrate from the fetched bytes.
    ///
    /// The spawned identity is the content hash of the payload; the SRL
    /// and the spawned substrate are linked with `Lineage`. Spawning the
    /// same bytes twice (even through another SRL) converges on one
    /// substrate.
    pub fn fetch_and_spawn(
        &self,
        id: Identity,
        query: &str,
        params: &BTreeMap<String, String>,
        actor: ActorId,
        cancel: &CancelToken,
    ) -> Result<Identity, CoreError> {
        let payload = self.srls.fetch(
            id,
            query,
            params,
            actor,
            &self.adapters,
            self.vault.as_ref(),
            &self.fetch_log,
            cancel,
        )?;

        // Spawning converges on content: the same bytes through any SRL
        // land on one substrate.
        let spawned = payload.payload_identity;
        let expression = Expression::Spawned {
            srl: id,
            payload: spawned.value(),
        };
        let spawned = self.adopt(spawned, expression)?;

        let lineage = Relationship::new(id, spawned, RelationKind::Lineage)
            .with_attribute("origin", "srl-spawn");
        match self.graph.write().add(lineage) {
            Ok(()) | Err(CoreError::DuplicateRelationship(_, _, _)) => {}
            Err(other) => return Err(other),
        }
        Ok(spawned)
    }

    /// Page through an SRL's fetch log.
    #[must_use]
    pub fn fetch_log_page(
        &self,
        id: Identity,
        after_ms: u64,
        limit: usize,
    ) -> Vec<FetchRecord> {
        self.fetch_log.page(id, after_ms, limit)
    }

    /// The audit log admits no redaction.
    pub fn purge_fetch_log(&self, _id: Identity) -> Result<(), CoreError> {
        Err(CoreError::LawViolation(
            "the fetch log is append-only".to_string(),
        ))
    }

    // =========================================================================
    // SNAPSHOT ACCESS (export / persistence)
    // =========================================================================

    pub(crate) fn registry_snapshot(&self) -> Vec<crate::substrate::Substrate> {
        self.registry.snapshot()
    }

    pub(crate) fn relationship_snapshot(&self) -> Vec<Relationship> {
        self.graph.read().iter().cloned().collect()
    }

    pub(crate) fn srl_table(&self) -> &SrlTable {
        &self.srls
    }

    pub(crate) fn fetch_log_snapshot(&self) -> Vec<FetchRecord> {
        self.fetch_log.snapshot()
    }

    pub(crate) fn adopt_restored(
        &self,
        identity: Identity,
        expression: Expression,
        owner: Option<ActorId>,
    ) -> Result<Identity, CoreError> {
        let adopted = self
            .registry
            .insert_with_identity(identity, expression, owner)?;
        self.graph.write().register_identity(adopted);
        Ok(adopted)
    }

    pub(crate) fn restore_relationship(&self, rel: Relationship) -> Result<(), CoreError> {
        match self.graph.write().add(rel) {
            Ok(()) | Err(CoreError::DuplicateRelationship(_, _, _)) => Ok(()),
            Err(other) => Err(other),
        }
    }

    pub(crate) fn restore_fetch_record(&self, record: FetchRecord) {
        self.fetch_log.append(record);
    }
}

// =============================================================================
// TESTS
// =============================================================================
