//! # Property-Based Tests
//!
//! Quantified invariants of the substrate algebra, verified with proptest:
//! non-duplication, 64-bit closure, reversibility, set algebra laws, graph
//! indexing, and SRL opacity.

use proptest::collection::vec;
use proptest::prelude::*;
use strata_core::graph::{Direction, RelationGraph};
use strata_core::ops;
use strata_core::srl::SrlTable;
use strata_core::srl::vault::CredentialVault;
use strata_core::{
    Identity, RelationKind, Relationship, RelationshipSet, SrlKind, SubstrateRegistry,
    validate_reversibility,
};

// =============================================================================
// STRATEGIES
// =============================================================================

/// A relationship set over a small identity universe, so intersections are
/// non-trivial.
fn relationship_set() -> impl Strategy<Value = RelationshipSet> {
    vec((0u64..8, 0u64..8, 0usize..RelationKind::ALL.len()), 0..24).prop_map(|triples| {
        triples
            .into_iter()
            .map(|(s, t, k)| {
                Relationship::new(Identity::new(s), Identity::new(t), RelationKind::ALL[k])
            })
            .collect()
    })
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Whitespace variants of one program canonicalize to one identity.
    #[test]
    fn non_duplication_across_whitespace(
        pad_a in " {0,3}",
        pad_b in " {0,3}",
        pad_c in " {0,3}",
        lhs in 0u64..1000,
        rhs in 0u64..1000
    ) {
        let registry = SubstrateRegistry::new();
        let spaced = format!("expr:{pad_a}{lhs}{pad_b}+{pad_c}{rhs}");
        let tight = format!("expr:{lhs}+{rhs}");

        let id1 = registry.create(&spaced, None).expect("create");
        let id2 = registry.create(&tight, None).expect("create");
        prop_assert_eq!(id1, id2);
        prop_assert_eq!(registry.len(), 1);
    }

    /// Subtraction reconstructs addition bitwise, for any operands.
    #[test]
    fn add_subtract_reversible(a in any::<u64>(), b in any::<u64>()) {
        let (sum, _) = ops::add(Identity::new(a), Identity::new(b));
        let (back, _) = ops::subtract(sum, Identity::new(b));
        prop_assert_eq!(back, Identity::new(a));
    }

    /// Multiplication reconstructs division bitwise, for any whole.
    #[test]
    fn multiply_divide_reversible(whole in any::<u64>()) {
        let (parts, _) = ops::divide(Identity::new(whole));
        let (unity, _) = ops::multiply(&parts).expect("multiply");
        prop_assert_eq!(unity, Identity::new(whole));
    }

    /// Root reconstructs power bitwise over the whole exponent range.
    #[test]
    fn power_root_reversible(base in any::<u64>(), exponent in 0u8..=21) {
        let (stacked, _) = ops::power(Identity::new(base), exponent).expect("power");
        let (reduced, _) = ops::root(stacked, exponent).expect("root");
        prop_assert_eq!(reduced, Identity::new(base));
    }

    /// `expressed * modulus + seed` reconstructs the value exactly.
    #[test]
    fn modulus_reconstructs(value in any::<u64>(), modulus in 1u64..=u64::MAX) {
        let parent = Identity::new(1);
        let (expressed, residue) =
            ops::modulus(Identity::new(value), Identity::new(modulus), parent).expect("modulus");
        let back = ops::reconstruct_modulus(expressed, Identity::new(modulus), residue.seed);
        prop_assert_eq!(back.value(), value);
    }

    /// Reversibility also holds through the generic validator.
    #[test]
    fn generic_validator_agrees(input in any::<u64>(), shift in any::<u64>()) {
        let forward = |x: Identity| Ok(ops::add(x, Identity::new(shift)).0);
        let inverse = |x: Identity| Ok(ops::subtract(x, Identity::new(shift)).0);
        prop_assert!(validate_reversibility(forward, inverse, Identity::new(input)));
    }

    /// Division always yields nine parts with the Fibonacci index table.
    #[test]
    fn division_shape(whole in any::<u64>()) {
        let (parts, created) = ops::divide(Identity::new(whole));
        prop_assert_eq!(parts.len(), 9);
        prop_assert_eq!(created.of_kind(RelationKind::PartOfWhole).count(), 9);
        prop_assert_eq!(created.of_kind(RelationKind::Ordering).count(), 8);
    }

    /// Set algebra laws: idempotence, annihilation, distributivity.
    #[test]
    fn set_algebra_laws(
        a in relationship_set(),
        b in relationship_set(),
        c in relationship_set()
    ) {
        prop_assert_eq!(a.intersection(&a).len(), a.len());
        prop_assert_eq!(a.union(&a).len(), a.len());
        prop_assert!(a.symmetric_difference(&a).is_empty());

        let left = a.intersection(&b.union(&c));
        let right = a.intersection(&b).union(&a.intersection(&c));
        prop_assert_eq!(left, right);
    }

    /// Every added relationship is visible through both neighbor indices.
    #[test]
    fn graph_triple_indexing(
        edges in vec((0u64..32, 0u64..32, 0usize..RelationKind::ALL.len()), 1..64)
    ) {
        let mut graph = RelationGraph::new();
        for id in 0..32u64 {
            graph.register_identity(Identity::new(id));
        }

        for (s, t, k) in edges {
            let rel = Relationship::new(Identity::new(s), Identity::new(t), RelationKind::ALL[k]);
            match graph.add(rel.clone()) {
                Ok(()) => {
                    let outgoing =
                        graph.neighbors(rel.source, Direction::Outgoing, Some(rel.kind));
                    prop_assert!(outgoing.contains(&rel));
                    let incoming =
                        graph.neighbors(rel.target, Direction::Incoming, Some(rel.kind));
                    prop_assert!(incoming.contains(&rel));
                    prop_assert!(graph.edges_of_kind(rel.kind).contains(&rel));
                }
                Err(_) => {
                    // Duplicate triple: the original must still be indexed.
                    prop_assert!(graph.has(rel.source, rel.target, rel.kind));
                }
            }
        }
    }

    /// No serialization of an SRL view leaks credentials, coordinates, or
    /// the encrypted blob.
    #[test]
    fn srl_view_opacity(
        host in "host-[a-z0-9]{8,12}",
        path in "/res-[a-z0-9]{8,12}",
        credential in "secret-[a-z0-9]{12,24}"
    ) {
        let vault = CredentialVault::derive("master-passphrase", "prop-salt");
        let table = SrlTable::new(5);
        let id = table
            .register("probe", SrlKind::Http, &host, &path, Some(&credential), Some(&vault))
            .expect("register");

        let view = table.view(id).expect("view");
        let as_toml = toml::to_string(&view).expect("toml");
        let as_postcard = postcard::to_allocvec(&view).expect("postcard");

        prop_assert!(!as_toml.contains(&credential));
        prop_assert!(!as_toml.contains(&host));
        prop_assert!(!as_toml.contains(&path));
        prop_assert!(!as_toml.contains("ciphertext"));

        let cred_bytes = credential.as_bytes();
        prop_assert!(!as_postcard.windows(cred_bytes.len()).any(|w| w == cred_bytes));
        let host_bytes = host.as_bytes();
        prop_assert!(!as_postcard.windows(host_bytes.len()).any(|w| w == host_bytes));
    }

    /// Operator results always fit 64 bits (closure is structural: the
    /// identity type is u64), and dedup is deterministic across registries.
    #[test]
    fn registries_agree_on_identities(sources in vec(0u64..100_000, 1..40)) {
        let registry1 = SubstrateRegistry::new();
        let registry2 = SubstrateRegistry::new();
        for n in &sources {
            let source = format!("constant:{n}");
            let id1 = registry1.create(&source, None).expect("create");
            let id2 = registry2.create(&source, None).expect("create");
            prop_assert_eq!(id1, id2);
        }
        prop_assert_eq!(registry1.len(), registry2.len());
    }
}
