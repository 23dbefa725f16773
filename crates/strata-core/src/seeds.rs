//! # Seed Loader
//!
//! Declarative knowledge units loaded from TOML records into substrates.
//!
//! Loading is two-pass: substrates first, relationships after every name
//! is known. Unresolved relationship targets are diagnostics, never
//! failures. A bulk load is all-or-nothing under cancellation: nothing is
//! committed before the staging pass completes.

use crate::expression::Expression;
use crate::graph::RelationGraph;
use crate::primitives::{MAX_RELATED_DEPTH, MAX_SEED_BATCH};
use crate::registry::SubstrateRegistry;
use crate::types::{CancelToken, CoreError, Identity, RelationKind, Relationship};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// RECORD SHAPE
// =============================================================================

/// A relationship declared by a seed, resolved by target name after all
/// seeds are ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRelation {
    /// Name of the target seed.
    pub target: String,
    /// Snake-case relationship kind.
    pub kind: String,
}

/// A declarative knowledge record.
///
/// `name`, `category`, `definition`, `usage`, and `meaning` are required;
/// everything else defaults to empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRecord {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub domain: String,
    pub definition: String,
    #[serde(default)]
    pub usage: Vec<String>,
    #[serde(default)]
    pub meaning: String,
    #[serde(default)]
    pub etymology: String,
    /// Expression source; defaults to an identity echo of the name hash.
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub returns: String,
    #[serde(default)]
    pub relationships: Vec<SeedRelation>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub antonyms: Vec<String>,
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Top-level shape of a seed file: an array of `[[seed]]` tables.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub seed: Vec<SeedRecord>,
}

/// Diagnostic for a relationship whose target or kind could not be
/// resolved. Non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRelationship {
    pub source: String,
    pub target: String,
    pub kind: String,
}

/// Result of a bulk load.
#[derive(Debug, Clone, Default)]
pub struct SeedLoadReport {
    /// Identities of the substrates created (or rediscovered) by this load.
    pub loaded: Vec<Identity>,
    /// Relationships that could not be resolved.
    pub pending: Vec<PendingRelationship>,
}

// =============================================================================
// PARSING & VALIDATION
// =============================================================================

/// Parse a TOML seed file.
pub fn parse_seed_file(text: &str) -> Result<Vec<SeedRecord>, CoreError> {
    let file: SeedFile =
        toml::from_str(text).map_err(|e| CoreError::SeedValidation(e.to_string()))?;
    Ok(file.seed)
}

/// Validate required fields.
pub fn validate(record: &SeedRecord) -> Result<(), CoreError> {
    let missing = |field: &str, name: &str| {
        CoreError::SeedValidation(format!("seed `{name}` is missing required field `{field}`"))
    };
    if record.name.trim().is_empty() {
        return Err(CoreError::SeedValidation(
            "seed with empty name".to_string(),
        ));
    }
    if record.category.trim().is_empty() {
        return Err(missing("category", &record.name));
    }
    if record.definition.trim().is_empty() {
        return Err(missing("definition", &record.name));
    }
    if record.usage.is_empty() {
        return Err(missing("usage", &record.name));
    }
    if record.meaning.trim().is_empty() {
        return Err(missing("meaning", &record.name));
    }
    Ok(())
}

/// Name-derived identity: the BLAKE3 hash of the name, truncated to 64 bits.
#[must_use]
pub fn seed_identity(name: &str) -> Identity {
    Identity::from_content(name)
}

// =============================================================================
// INDEX
// =============================================================================

/// Indexes over loaded seeds: by name, category, domain, and tag.
#[derive(Debug, Clone, Default)]
pub struct SeedIndex {
    records: BTreeMap<String, SeedRecord>,
    by_name: BTreeMap<String, Identity>,
    by_category: BTreeMap<String, BTreeSet<String>>,
    by_domain: BTreeMap<String, BTreeSet<String>>,
    by_tag: BTreeMap<String, BTreeSet<String>>,
}

impl SeedIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of a seed by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Identity> {
        self.by_name.get(name).copied()
    }

    /// The full record of a seed by name.
    #[must_use]
    pub fn record(&self, name: &str) -> Option<&SeedRecord> {
        self.records.get(name)
    }

    /// Names of seeds in a category, in order.
    #[must_use]
    pub fn get_by_category(&self, category: &str) -> Vec<String> {
        self.by_category
            .get(category)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of seeds in a domain, in order.
    #[must_use]
    pub fn get_by_domain(&self, domain: &str) -> Vec<String> {
        self.by_domain
            .get(domain)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of seeds carrying a tag, in order.
    #[must_use]
    pub fn get_by_tag(&self, tag: &str) -> Vec<String> {
        self.by_tag
            .get(tag)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Substring search over names, definitions, and meanings.
    ///
    /// Returns a restartable iterator over matching names.
    #[must_use]
    pub fn search(&self, needle: &str) -> SeedSearch {
        let needle = needle.to_lowercase();
        let matches = self
            .records
            .values()
            .filter(|r| {
                r.name.to_lowercase().contains(&needle)
                    || r.definition.to_lowercase().contains(&needle)
                    || r.meaning.to_lowercase().contains(&needle)
            })
            .map(|r| r.name.clone())
            .collect();
        SeedSearch { matches, cursor: 0 }
    }

    /// Depth-first closure over `related` names.
    ///
    /// Cycles are handled with a visited set; chains deeper than the hard
    /// limit fail with `ExcessiveRecursion`.
    pub fn related_closure(&self, name: &str) -> Result<Vec<String>, CoreError> {
        let mut visited = BTreeSet::new();
        let mut closure = Vec::new();
        self.expand_related(name, 0, &mut visited, &mut closure)?;
        Ok(closure)
    }

    fn expand_related(
        &self,
        name: &str,
        depth: usize,
        visited: &mut BTreeSet<String>,
        closure: &mut Vec<String>,
    ) -> Result<(), CoreError> {
        if depth > MAX_RELATED_DEPTH {
            return Err(CoreError::ExcessiveRecursion(MAX_RELATED_DEPTH));
        }
        if !visited.insert(name.to_string()) {
            return Ok(());
        }
        let Some(record) = self.records.get(name) else {
            return Ok(());
        };
        if depth > 0 {
            closure.push(name.to_string());
        }
        for next in &record.related {
            self.expand_related(next, depth + 1, visited, closure)?;
        }
        Ok(())
    }

    /// Number of indexed seeds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, record: SeedRecord, identity: Identity) {
        self.by_name.insert(record.name.clone(), identity);
        self.by_category
            .entry(record.category.clone())
            .or_default()
            .insert(record.name.clone());
        if !record.domain.is_empty() {
            self.by_domain
                .entry(record.domain.clone())
                .or_default()
                .insert(record.name.clone());
        }
        for tag in &record.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(record.name.clone());
        }
        self.records.insert(record.name.clone(), record);
    }
}

/// Restartable iterator over search matches.
#[derive(Debug, Clone)]
pub struct SeedSearch {
    matches: Vec<String>,
    cursor: usize,
}

impl SeedSearch {
    /// Rewind to the first match.
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// Number of matches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether there are no matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

impl Iterator for SeedSearch {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let item = self.matches.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }
}

// =============================================================================
// BULK LOAD
// =============================================================================

/// Load seed records into the registry, graph, and index.
///
/// Staging validates and compiles everything before the first commit, so a
/// cancelled or failing load leaves no partial state. Relationship
/// resolution runs after all seeds are ingested.
pub fn load(
    records: Vec<SeedRecord>,
    registry: &SubstrateRegistry,
    graph: &mut RelationGraph,
    index: &mut SeedIndex,
    cancel: &CancelToken,
) -> Result<SeedLoadReport, CoreError> {
    if records.len() > MAX_SEED_BATCH {
        return Err(CoreError::SeedValidation(format!(
            "batch of {} exceeds the {} seed limit",
            records.len(),
            MAX_SEED_BATCH
        )));
    }

    // Staging pass: nothing is committed until every record has been
    // validated and compiled.
    let mut staged: Vec<(SeedRecord, Identity, Expression)> = Vec::with_capacity(records.len());
    let mut staged_names: BTreeMap<String, String> = BTreeMap::new();
    for record in records {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        validate(&record)?;

        let identity = seed_identity(&record.name);
        let source = if record.expression.trim().is_empty() {
            format!("identity:{}", identity.value())
        } else {
            record.expression.clone()
        };
        let expression = Expression::parse(&source)?;
        let canonical = expression.canonical_source();

        // Same name must mean the same definition, inside the batch and
        // against previously loaded seeds.
        if let Some(previous) = staged_names.get(&record.name) {
            if *previous != canonical {
                return Err(CoreError::SeedConflict(record.name));
            }
            continue;
        }
        if let Some(existing) = index.record(&record.name) {
            let existing_source = if existing.expression.trim().is_empty() {
                format!("identity:{}", identity.value())
            } else {
                Expression::parse(&existing.expression)?.canonical_source()
            };
            if existing_source != canonical || existing.definition != record.definition {
                return Err(CoreError::SeedConflict(record.name));
            }
            continue;
        }

        staged_names.insert(record.name.clone(), canonical);
        staged.push((record, identity, expression));
    }

    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }

    // Commit pass: once this starts it runs to completion.
    let mut report = SeedLoadReport::default();
    let mut loaded_names = Vec::with_capacity(staged.len());
    for (record, identity, expression) in &staged {
        let inserted = registry
            .insert_with_identity(*identity, expression.clone(), None)
            .map_err(|e| match e {
                CoreError::DuplicateIdentity(_) => CoreError::SeedConflict(record.name.clone()),
                other => other,
            })?;
        graph.register_identity(inserted);
        report.loaded.push(inserted);
        loaded_names.push(record.name.clone());
    }
    for (record, identity, _) in staged {
        index.insert(record, identity);
    }

    // Resolution pass: relationships by target name; unresolved targets and
    // unknown kinds are reported, never fatal.
    for name in loaded_names {
        let Some(record) = index.records.get(&name).cloned() else {
            continue;
        };
        let source_id = seed_identity(&name);
        for declared in &record.relationships {
            let kind = RelationKind::parse(&declared.kind);
            let target_id = index.get_by_name(&declared.target);
            match (kind, target_id) {
                (Some(kind), Some(target)) => {
                    let rel = Relationship::new(source_id, target, kind)
                        .with_attribute("origin", "seed");
                    match graph.add(rel) {
                        Ok(()) | Err(CoreError::DuplicateRelationship(_, _, _)) => {}
                        Err(other) => return Err(other),
                    }
                }
                _ => {
                    report.pending.push(PendingRelationship {
                        source: name.clone(),
                        target: declared.target.clone(),
                        kind: declared.kind.clone(),
                    });
                }
            }
        }
    }

    tracing::info!(
        loaded = report.loaded.len(),
        pending = report.pending.len(),
        "seed bulk load committed"
    );
    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================
