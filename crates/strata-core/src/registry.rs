//! # Substrate Registry
//!
//! The sole owner of all substrates. Everything outside the registry holds
//! identities, never handles.
//!
//! The registry is sharded on the top nibble of the identity so
//! independent identities never contend on a lock. Substrate creation is
//! linearizable per shard; identity conflicts are resolved
//! deterministically by dedup on canonical source.

use crate::expression::{Expression, ParamBag};
use crate::primitives::{DIMENSION_COUNT, SHARD_COUNT};
use crate::substrate::{Dimension, Substrate};
use crate::types::{ActorId, CoreError, Identity, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Sharded, append-only substrate store.
#[derive(Debug, Default)]
pub struct SubstrateRegistry {
    shards: [RwLock<BTreeMap<Identity, Substrate>>; SHARD_COUNT],
}

impl SubstrateRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shard selection: top nibble of the identity.
    fn shard(&self, identity: Identity) -> &RwLock<BTreeMap<Identity, Substrate>> {
        &self.shards[(identity.value() >> 60) as usize]
    }

    /// Register an expression source.
    ///
    /// Non-duplication: if a substrate with the same canonical source
    /// already exists, its identity is returned and nothing is inserted.
    /// A different expression colliding on the same 64-bit identity is
    /// rejected with `DuplicateIdentity`.
    pub fn create(&self, source: &str, owner: Option<ActorId>) -> Result<Identity, CoreError> {
        let substrate = Substrate::from_source(source, owner)?;
        self.insert(substrate)
    }

    /// Register an expression under a forced identity (packed SRL ids,
    /// name-hashed seeds, operator results).
    pub fn insert_with_identity(
        &self,
        identity: Identity,
        expression: Expression,
        owner: Option<ActorId>,
    ) -> Result<Identity, CoreError> {
        self.insert(Substrate::new(identity, expression, owner))
    }

    fn insert(&self, substrate: Substrate) -> Result<Identity, CoreError> {
        let identity = substrate.identity();
        let mut shard = self.shard(identity).write();
        if let Some(existing) = shard.get(&identity) {
            if existing.canonical_source() == substrate.canonical_source() {
                return Ok(identity);
            }
            return Err(CoreError::DuplicateIdentity(identity));
        }
        shard.insert(identity, substrate);
        Ok(identity)
    }

    /// Fetch a substrate snapshot by identity.
    pub fn get(&self, identity: Identity) -> Result<Substrate, CoreError> {
        self.shard(identity)
            .read()
            .get(&identity)
            .cloned()
            .ok_or(CoreError::IdentityNotFound(identity))
    }

    /// Whether an identity is registered.
    #[must_use]
    pub fn exists(&self, identity: Identity) -> bool {
        self.shard(identity).read().contains_key(&identity)
    }

    /// Evaluate a substrate's expression against a parameter bag.
    pub fn invoke(&self, identity: Identity, params: &ParamBag) -> Result<Value, CoreError> {
        let shard = self.shard(identity).read();
        let substrate = shard
            .get(&identity)
            .ok_or(CoreError::IdentityNotFound(identity))?;
        substrate.invoke(params)
    }

    /// Divide a substrate into its nine dimensions.
    ///
    /// The division is memoized on the stored substrate, so repeated calls
    /// are lookups.
    pub fn divide(&self, identity: Identity) -> Result<[Dimension; DIMENSION_COUNT], CoreError> {
        let shard = self.shard(identity).read();
        let substrate = shard
            .get(&identity)
            .ok_or(CoreError::IdentityNotFound(identity))?;
        Ok(*substrate.divide())
    }

    /// Registry-level determinism cross-check: evaluate twice and compare.
    ///
    /// Expressions are pure by construction; this guards against a future
    /// expression kind smuggling in hidden state.
    pub fn probe_determinism(
        &self,
        identity: Identity,
        params: &ParamBag,
    ) -> Result<(), CoreError> {
        let first = self.invoke(identity, params)?;
        let second = self.invoke(identity, params)?;
        if first != second {
            return Err(CoreError::NotDeterministic(identity));
        }
        Ok(())
    }

    /// Identities owned by an actor, in identity order.
    #[must_use]
    pub fn list_by_owner(&self, actor: ActorId) -> Vec<Identity> {
        let mut owned = Vec::new();
        for shard in &self.shards {
            let guard = shard.read();
            owned.extend(
                guard
                    .values()
                    .filter(|s| s.owner() == Some(actor))
                    .map(Substrate::identity),
            );
        }
        owned.sort_unstable();
        owned
    }

    /// Snapshot of all substrates in identity order.
    ///
    /// A point-in-time copy: iteration never blocks writers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Substrate> {
        let mut all = Vec::new();
        for shard in &self.shards {
            all.extend(shard.read().values().cloned());
        }
        all.sort_unstable_by_key(Substrate::identity);
        all
    }

    /// Total number of registered substrates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get() {
        let registry = SubstrateRegistry::new();
        let id = registry.create("constant:42", None).expect("create");
        let substrate = registry.get(id).expect("get");
        assert_eq!(substrate.canonical_source(), "constant:42");
        assert!(registry.exists(id));
    }

    #[test]
    fn equivalent_sources_deduplicate() {
        let registry = SubstrateRegistry::new();
        let first = registry.create("expr: a + 1", None).expect("create");
        let second = registry.create("expr:a+1", None).expect("create");
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn forced_identity_conflict_is_rejected() {
        let registry = SubstrateRegistry::new();
        let id = Identity::new(77);
        registry
            .insert_with_identity(id, Expression::Constant(1), None)
            .expect("insert");
        // Same expression under the same identity is idempotent.
        registry
            .insert_with_identity(id, Expression::Constant(1), None)
            .expect("reinsert");
        // A different expression under the same identity is a collision.
        assert!(matches!(
            registry.insert_with_identity(id, Expression::Constant(2), None),
            Err(CoreError::DuplicateIdentity(_))
        ));
    }

    #[test]
    fn missing_identity_is_reported() {
        let registry = SubstrateRegistry::new();
        assert!(matches!(
            registry.get(Identity::new(999)),
            Err(CoreError::IdentityNotFound(_))
        ));
        assert!(matches!(
            registry.invoke(Identity::new(999), &ParamBag::new()),
            Err(CoreError::IdentityNotFound(_))
        ));
    }

    #[test]
    fn list_by_owner_filters_and_sorts() {
        let registry = SubstrateRegistry::new();
        let alice = ActorId::new(1);
        let bob = ActorId::new(2);
        let a = registry
            .create("constant:1", Some(alice))
            .expect("create");
        let b = registry
            .create("constant:2", Some(alice))
            .expect("create");
        registry.create("constant:3", Some(bob)).expect("create");

        let mut expected = vec![a, b];
        expected.sort_unstable();
        assert_eq!(registry.list_by_owner(alice), expected);
    }

    #[test]
    fn snapshot_is_ordered_and_complete() {
        let registry = SubstrateRegistry::new();
        for i in 0..50 {
            registry
                .create(&format!("constant:{i}"), None)
                .expect("create");
        }
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 50);
        assert!(
            snapshot
                .windows(2)
                .all(|w| w[0].identity() < w[1].identity())
        );
    }

    #[test]
    fn probe_determinism_passes_for_pure_expressions() {
        let registry = SubstrateRegistry::new();
        let id = registry.create("expr: mix(a)", None).expect("create");
        let params: ParamBag = [("a".to_string(), 5u64)].into_iter().collect();
        registry.probe_determinism(id, &params).expect("probe");
    }
}
