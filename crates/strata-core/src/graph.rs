//! # Relationship Graph
//!
//! The typed, append-only multigraph between substrate identities.
//!
//! Triply indexed: by source (outgoing), by target (incoming), and by
//! kind. Neighbor and kind queries are direct index hits. All data
//! structures use `BTreeMap` for deterministic ordering.
//!
//! Relationships are never deleted; removal is modeled as an inverse
//! relationship. Cycles are permitted; traversal carries a visited set and
//! a hard expansion bound.

use crate::primitives::MAX_TRAVERSAL_NODES;
use crate::types::{
    CoreError, Identity, RelationKind, Relationship, RelationshipKey, RelationshipSet,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Direction of a neighbor query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// The append-only relationship multigraph.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    /// Identities known to the registry; edges may only touch these.
    known: BTreeSet<Identity>,

    /// Primary storage: triple -> relationship.
    edges: BTreeMap<RelationshipKey, Relationship>,

    /// Outgoing index: source -> (target, kind).
    by_source: BTreeMap<Identity, BTreeSet<(Identity, RelationKind)>>,

    /// Incoming index: target -> (source, kind).
    by_target: BTreeMap<Identity, BTreeSet<(Identity, RelationKind)>>,

    /// Kind index: kind -> (source, target).
    by_kind: BTreeMap<RelationKind, BTreeSet<(Identity, Identity)>>,
}

impl RelationGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an identity a legal edge endpoint.
    ///
    /// The gateway calls this on every substrate registration; the graph
    /// itself never invents endpoints.
    pub fn register_identity(&mut self, identity: Identity) {
        self.known.insert(identity);
    }

    /// Whether an identity may appear as an endpoint.
    #[must_use]
    pub fn is_registered(&self, identity: Identity) -> bool {
        self.known.contains(&identity)
    }

    /// Append a relationship.
    ///
    /// Rejects edges whose endpoints are unregistered (`DanglingEdge`) and
    /// duplicate `(source, target, kind)` triples (`DuplicateRelationship`).
    pub fn add(&mut self, rel: Relationship) -> Result<(), CoreError> {
        if !self.known.contains(&rel.source) {
            return Err(CoreError::DanglingEdge(rel.source));
        }
        if !self.known.contains(&rel.target) {
            return Err(CoreError::DanglingEdge(rel.target));
        }
        let key = rel.key();
        if self.edges.contains_key(&key) {
            return Err(CoreError::DuplicateRelationship(
                rel.source, rel.target, rel.kind,
            ));
        }

        self.by_source
            .entry(rel.source)
            .or_default()
            .insert((rel.target, rel.kind));
        self.by_target
            .entry(rel.target)
            .or_default()
            .insert((rel.source, rel.kind));
        self.by_kind
            .entry(rel.kind)
            .or_default()
            .insert((rel.source, rel.target));
        self.edges.insert(key, rel);
        Ok(())
    }

    /// Append a whole set atomically: either every relationship is valid
    /// and all are inserted, or nothing is.
    ///
    /// Triples already present are skipped (operator outputs overlap when
    /// the same operands are combined twice); returns the number inserted.
    pub fn add_set(&mut self, set: &RelationshipSet) -> Result<usize, CoreError> {
        for rel in set.iter() {
            if !self.known.contains(&rel.source) {
                return Err(CoreError::DanglingEdge(rel.source));
            }
            if !self.known.contains(&rel.target) {
                return Err(CoreError::DanglingEdge(rel.target));
            }
        }
        let mut inserted = 0;
        for rel in set.iter() {
            if !self.edges.contains_key(&rel.key()) {
                self.add(rel.clone())?;
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Whether a specific triple exists.
    #[must_use]
    pub fn has(&self, source: Identity, target: Identity, kind: RelationKind) -> bool {
        self.edges.contains_key(&(source, target, kind))
    }

    /// Fetch a specific relationship.
    #[must_use]
    pub fn get(
        &self,
        source: Identity,
        target: Identity,
        kind: RelationKind,
    ) -> Option<&Relationship> {
        self.edges.get(&(source, target, kind))
    }

    /// Neighbor query, optionally filtered by kind.
    #[must_use]
    pub fn neighbors(
        &self,
        identity: Identity,
        direction: Direction,
        kind: Option<RelationKind>,
    ) -> Vec<Relationship> {
        let index = match direction {
            Direction::Outgoing => &self.by_source,
            Direction::Incoming => &self.by_target,
        };
        let Some(entries) = index.get(&identity) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|(_, k)| kind.is_none_or(|want| *k == want))
            .filter_map(|(other, k)| {
                let key = match direction {
                    Direction::Outgoing => (identity, *other, *k),
                    Direction::Incoming => (*other, identity, *k),
                };
                self.edges.get(&key).cloned()
            })
            .collect()
    }

    /// The neighborhood of an identity as a relationship set, for algebra.
    #[must_use]
    pub fn relationship_set(&self, identity: Identity, direction: Direction) -> RelationshipSet {
        self.neighbors(identity, direction, None)
            .into_iter()
            .collect()
    }

    /// All relationships of one kind, in deterministic order.
    #[must_use]
    pub fn edges_of_kind(&self, kind: RelationKind) -> Vec<Relationship> {
        let Some(pairs) = self.by_kind.get(&kind) else {
            return Vec::new();
        };
        pairs
            .iter()
            .filter_map(|(s, t)| self.edges.get(&(*s, *t, kind)).cloned())
            .collect()
    }

    /// Breadth-first path search over outgoing edges.
    ///
    /// Returns `None` if unreachable. The expansion bound terminates
    /// pathological cyclic growth the visited set alone cannot keep cheap.
    pub fn find_path(
        &self,
        from: Identity,
        to: Identity,
    ) -> Result<Option<Vec<Identity>>, CoreError> {
        if !self.known.contains(&from) || !self.known.contains(&to) {
            return Ok(None);
        }
        if from == to {
            return Ok(Some(vec![from]));
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        let mut came_from: BTreeMap<Identity, Identity> = BTreeMap::new();
        let mut expanded = 0usize;

        visited.insert(from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            expanded += 1;
            if expanded > MAX_TRAVERSAL_NODES {
                return Err(CoreError::CycleLimitExceeded);
            }
            if let Some(targets) = self.by_source.get(&current) {
                for (next, _) in targets {
                    if visited.contains(next) {
                        continue;
                    }
                    visited.insert(*next);
                    came_from.insert(*next, current);
                    if *next == to {
                        let mut path = vec![to];
                        let mut cursor = to;
                        while let Some(&previous) = came_from.get(&cursor) {
                            path.push(previous);
                            cursor = previous;
                        }
                        path.reverse();
                        return Ok(Some(path));
                    }
                    queue.push_back(*next);
                }
            }
        }
        Ok(None)
    }

    /// Record a forward/backward operator pair.
    ///
    /// Adds both relationships plus an `InverseOf` edge linking their
    /// sources, annotated with the paired kinds.
    pub fn pair_inverse(
        &mut self,
        forward: Relationship,
        backward: Relationship,
    ) -> Result<(), CoreError> {
        let marker = Relationship::new(forward.source, backward.source, RelationKind::InverseOf)
            .with_attribute("forward", forward.kind.as_str())
            .with_attribute("backward", backward.kind.as_str());
        self.add(forward)?;
        self.add(backward)?;
        self.add(marker)
    }

    /// Number of relationships.
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.known.len()
    }

    /// All relationships in deterministic key order.
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.edges.values()
    }

    /// Registered identities in order.
    pub fn identities(&self) -> impl Iterator<Item = Identity> + '_ {
        self.known.iter().copied()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(identities: &[u64]) -> RelationGraph {
        let mut graph = RelationGraph::new();
        for &id in identities {
            graph.register_identity(Identity::new(id));
        }
        graph
    }

    #[test]
    fn add_indexes_all_three_ways() {
        let mut graph = graph_with(&[1, 2]);
        let rel = Relationship::new(Identity::new(1), Identity::new(2), RelationKind::Dependency);
        graph.add(rel.clone()).expect("add");

        let outgoing = graph.neighbors(Identity::new(1), Direction::Outgoing, None);
        assert_eq!(outgoing, vec![rel.clone()]);

        let incoming = graph.neighbors(Identity::new(2), Direction::Incoming, None);
        assert_eq!(incoming, vec![rel.clone()]);

        assert_eq!(graph.edges_of_kind(RelationKind::Dependency), vec![rel]);
    }

    #[test]
    fn duplicate_triple_rejected() {
        let mut graph = graph_with(&[1, 2]);
        let rel = Relationship::new(Identity::new(1), Identity::new(2), RelationKind::Sibling);
        graph.add(rel.clone()).expect("add");
        assert!(matches!(
            graph.add(rel),
            Err(CoreError::DuplicateRelationship(_, _, _))
        ));
        // Same pair under a different kind is a distinct edge.
        graph
            .add(Relationship::new(
                Identity::new(1),
                Identity::new(2),
                RelationKind::Ordering,
            ))
            .expect("different kind");
    }

    #[test]
    fn dangling_edges_rejected() {
        let mut graph = graph_with(&[1]);
        assert!(matches!(
            graph.add(Relationship::new(
                Identity::new(1),
                Identity::new(99),
                RelationKind::Sibling
            )),
            Err(CoreError::DanglingEdge(_))
        ));
    }

    #[test]
    fn add_set_is_atomic() {
        let mut graph = graph_with(&[1, 2]);
        let set: RelationshipSet = [
            Relationship::new(Identity::new(1), Identity::new(2), RelationKind::Sibling),
            Relationship::new(Identity::new(1), Identity::new(99), RelationKind::Sibling),
        ]
        .into_iter()
        .collect();

        assert!(graph.add_set(&set).is_err());
        assert_eq!(graph.relationship_count(), 0);
    }

    #[test]
    fn neighbor_kind_filter() {
        let mut graph = graph_with(&[1, 2, 3]);
        graph
            .add(Relationship::new(
                Identity::new(1),
                Identity::new(2),
                RelationKind::Sibling,
            ))
            .expect("add");
        graph
            .add(Relationship::new(
                Identity::new(1),
                Identity::new(3),
                RelationKind::Ordering,
            ))
            .expect("add");

        let siblings = graph.neighbors(
            Identity::new(1),
            Direction::Outgoing,
            Some(RelationKind::Sibling),
        );
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].target, Identity::new(2));
    }

    #[test]
    fn find_path_handles_cycles() {
        let mut graph = graph_with(&[1, 2, 3]);
        // 1 -> 2 -> 3 and 3 -> 1 (a cycle).
        for (s, t) in [(1u64, 2u64), (2, 3), (3, 1)] {
            graph
                .add(Relationship::new(
                    Identity::new(s),
                    Identity::new(t),
                    RelationKind::Ordering,
                ))
                .expect("add");
        }
        let path = graph
            .find_path(Identity::new(1), Identity::new(3))
            .expect("search")
            .expect("path");
        assert_eq!(path, vec![Identity::new(1), Identity::new(2), Identity::new(3)]);

        // Unreachable target.
        let mut island = graph_with(&[1, 2]);
        island.register_identity(Identity::new(7));
        assert_eq!(
            island
                .find_path(Identity::new(1), Identity::new(7))
                .expect("search"),
            None
        );
    }

    #[test]
    fn pair_inverse_adds_marker() {
        let mut graph = graph_with(&[1, 2]);
        let forward =
            Relationship::new(Identity::new(1), Identity::new(2), RelationKind::Embedding);
        let backward =
            Relationship::new(Identity::new(2), Identity::new(1), RelationKind::Extraction);
        graph
            .pair_inverse(forward, backward)
            .expect("pair_inverse");

        assert_eq!(graph.relationship_count(), 3);
        let marker = graph
            .get(Identity::new(1), Identity::new(2), RelationKind::InverseOf)
            .expect("marker");
        assert_eq!(marker.attributes["forward"], "embedding");
        assert_eq!(marker.attributes["backward"], "extraction");
    }

    #[test]
    fn neighborhood_set_algebra() {
        let mut graph = graph_with(&[10, 11, 100, 101, 102, 103]);
        // A(10) -> {100, 101, 102}; B(11) -> {101, 102, 103}
        for target in [100u64, 101, 102] {
            graph
                .add(Relationship::new(
                    Identity::new(10),
                    Identity::new(target),
                    RelationKind::Dependency,
                ))
                .expect("add");
        }
        for target in [101u64, 102, 103] {
            graph
                .add(Relationship::new(
                    Identity::new(11),
                    Identity::new(target),
                    RelationKind::Dependency,
                ))
                .expect("add");
        }

        let a = graph.relationship_set(Identity::new(10), Direction::Outgoing);
        let b = graph.relationship_set(Identity::new(11), Direction::Outgoing);

        // Set algebra compares identity pairs, not relationship objects.
        let a_targets: BTreeSet<Identity> =
            a.identity_pairs().into_iter().map(|(_, t)| t).collect();
        let b_targets: BTreeSet<Identity> =
            b.identity_pairs().into_iter().map(|(_, t)| t).collect();
        let common: Vec<Identity> = a_targets.intersection(&b_targets).copied().collect();
        assert_eq!(common, vec![Identity::new(101), Identity::new(102)]);
    }
}
