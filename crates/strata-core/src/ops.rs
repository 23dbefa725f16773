//! # Operator Algebra
//!
//! Dimensional arithmetic over identities. Every operator returns its
//! result together with the relationship set it creates (or severs), and
//! every operator has an inverse that reconstructs its input within 64-bit
//! arithmetic.
//!
//! Wrap policy: addition, subtraction, and multiplication wrap (they model
//! identity combination in the ring Z/2^64); all other paths treat overflow
//! as a failure. Power and root multiply by the golden stacking constant,
//! which is odd and therefore a unit of the ring, so stacking is a
//! bijection at every level.

use crate::expression::Expression;
use crate::primitives::{DIMENSION_COUNT, FIBONACCI_INDICES, GOLDEN_GAMMA, GOLDEN_GAMMA_INVERSE, MAX_FIBONACCI_INDEX};
use crate::types::{CoreError, Identity, RelationKind, Relationship, RelationshipSet};

// =============================================================================
// PART DERIVATION
// =============================================================================

/// Identity of the `position`-th part of a divided whole.
///
/// Parts 0..=7 are content-derived odd identities of the whole; part 8 is
/// the balancing factor chosen so the product of all nine parts equals the
/// whole. Multiplication therefore reconstructs division exactly.
#[must_use]
pub fn part_identity(whole: u64, position: usize) -> u64 {
    if position < DIMENSION_COUNT - 1 {
        derived_part(whole, position)
    } else {
        let mut product: u64 = 1;
        for i in 0..DIMENSION_COUNT - 1 {
            product = product.wrapping_mul(derived_part(whole, i));
        }
        // product is odd (a product of odd factors), hence invertible.
        whole.wrapping_mul(mod_inverse(product))
    }
}

/// Content-derived part, forced odd so products stay invertible.
fn derived_part(whole: u64, position: usize) -> u64 {
    let mut input = [0u8; 9];
    input[..8].copy_from_slice(&whole.to_le_bytes());
    input[8] = position as u8;
    Identity::from_bytes(&input).value() | 1
}

/// Multiplicative inverse of an odd value modulo 2^64.
///
/// Newton iteration: each step doubles the number of correct low bits.
fn mod_inverse(odd: u64) -> u64 {
    let mut x = odd.wrapping_mul(3) ^ 2;
    for _ in 0..4 {
        x = x.wrapping_mul(2u64.wrapping_sub(odd.wrapping_mul(x)));
    }
    x
}

// =============================================================================
// ADDITION / SUBTRACTION
// =============================================================================

/// Combine two identities.
///
/// Returns the wrapped sum and the four operational relationship kinds it
/// establishes: the addend becomes an attribute of the base, the sum
/// depends on both operands, the operands sit adjacent, and both aggregate
/// into the sum.
#[must_use]
pub fn add(a: Identity, b: Identity) -> (Identity, RelationshipSet) {
    let sum = Identity::new(a.value().wrapping_add(b.value()));
    let rels: RelationshipSet = [
        Relationship::new(a, b, RelationKind::Adjacency),
        Relationship::new(b, a, RelationKind::Attribute),
        Relationship::new(sum, a, RelationKind::Dependency),
        Relationship::new(sum, b, RelationKind::Dependency),
        Relationship::new(a, sum, RelationKind::Aggregation),
        Relationship::new(b, sum, RelationKind::Aggregation),
    ]
    .into_iter()
    .collect();
    (sum, rels)
}

/// Exact inverse of [`add`].
///
/// Returns the wrapped difference and the severed set: the relationships
/// [`add`] would have created for `(difference, subtrahend)`, which is
/// exactly the set any live graph must retire (by inverse marking, never
/// deletion).
#[must_use]
pub fn subtract(minuend: Identity, subtrahend: Identity) -> (Identity, RelationshipSet) {
    let difference = Identity::new(minuend.value().wrapping_sub(subtrahend.value()));
    let (_, severed) = add(difference, subtrahend);
    (difference, severed)
}

// =============================================================================
// MULTIPLICATION / DIVISION
// =============================================================================

/// Collapse parts into a unity.
///
/// The unity is the wrapped product of all parts. The returned set holds
/// the sibling relationships among the parts, now collapsed; any
/// `PartOfWhole` lineage the caller holds remains untouched.
pub fn multiply(parts: &[Identity]) -> Result<(Identity, RelationshipSet), CoreError> {
    if parts.is_empty() {
        return Err(CoreError::InputRejected(
            "multiply requires at least one part".to_string(),
        ));
    }
    let unity = Identity::new(
        parts
            .iter()
            .fold(1u64, |acc, p| acc.wrapping_mul(p.value())),
    );
    let mut collapsed = RelationshipSet::new();
    for (i, left) in parts.iter().enumerate() {
        for right in &parts[i + 1..] {
            collapsed.insert(Relationship::new(*left, *right, RelationKind::Sibling));
        }
    }
    Ok((unity, collapsed))
}

/// Divide a whole into its nine dimensional parts.
///
/// The parts follow the Fibonacci dimension table and their product
/// reconstructs the whole. The created relationship set holds one
/// `WholeOfPart` from the whole to its index-0 part, one `PartOfWhole`
/// per part, all sibling pairs, and the consecutive ordering chain.
#[must_use]
pub fn divide(whole: Identity) -> ([Identity; DIMENSION_COUNT], RelationshipSet) {
    let mut parts = [Identity::new(0); DIMENSION_COUNT];
    for (position, part) in parts.iter_mut().enumerate() {
        *part = Identity::new(part_identity(whole.value(), position));
    }

    let mut created = RelationshipSet::new();
    created.insert(
        Relationship::new(whole, parts[0], RelationKind::WholeOfPart)
            .with_attribute("parts", DIMENSION_COUNT.to_string()),
    );
    for (position, part) in parts.iter().enumerate() {
        created.insert(
            Relationship::new(*part, whole, RelationKind::PartOfWhole)
                .with_attribute("position", position.to_string())
                .with_attribute("fibonacci", FIBONACCI_INDICES[position].to_string()),
        );
    }
    for (i, left) in parts.iter().enumerate() {
        for right in &parts[i + 1..] {
            created.insert(Relationship::new(*left, *right, RelationKind::Sibling));
        }
    }
    for window in parts.windows(2) {
        created.insert(Relationship::new(
            window[0],
            window[1],
            RelationKind::Ordering,
        ));
    }

    (parts, created)
}

// =============================================================================
// MODULUS
// =============================================================================

/// The residue of a modulus operation: a first-class value that can seed
/// the next dimensional level, together with the four residual
/// relationship sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Residue {
    /// The parent identity this residue descends from.
    pub parent: Identity,
    /// The remainder: the seed of the next level.
    pub seed: Identity,
    /// Boundary relationships (seed bounds the expressed value).
    pub boundary: RelationshipSet,
    /// Cycle relationships (the expressed value wraps back to the seed).
    pub cycle: RelationshipSet,
    /// Recursion relationships (the seed recurses toward the parent).
    pub recursion: RelationshipSet,
    /// Lineage relationships (the parent begat the expressed value).
    pub lineage: RelationshipSet,
}

impl Residue {
    /// All residual relationships as one set.
    #[must_use]
    pub fn combined(&self) -> RelationshipSet {
        self.boundary
            .union(&self.cycle)
            .union(&self.recursion)
            .union(&self.lineage)
    }

    /// An expression that seeds the next dimensional level with this residue.
    #[must_use]
    pub fn seed_expression(&self) -> Expression {
        Expression::ResidueSeeded {
            parent: self.parent,
            seed: self.seed.value(),
        }
    }
}

/// Express a value against a modulus.
///
/// Returns the quotient (the expressed identity) and the [`Residue`]
/// carrying the remainder as the next-level seed. Reconstruction is exact:
/// `expressed * modulus + seed == value`.
pub fn modulus(
    value: Identity,
    modulus: Identity,
    parent: Identity,
) -> Result<(Identity, Residue), CoreError> {
    let m = modulus.value();
    if m == 0 {
        return Err(CoreError::DivisionByZero);
    }
    let expressed = Identity::new(value.value() / m);
    let seed = Identity::new(value.value() % m);

    let residue = Residue {
        parent,
        seed,
        boundary: [Relationship::new(seed, expressed, RelationKind::Boundary)]
            .into_iter()
            .collect(),
        cycle: [Relationship::new(expressed, seed, RelationKind::Cycle)]
            .into_iter()
            .collect(),
        recursion: [Relationship::new(seed, parent, RelationKind::Recursion)]
            .into_iter()
            .collect(),
        lineage: [Relationship::new(parent, expressed, RelationKind::Lineage)]
            .into_iter()
            .collect(),
    };
    Ok((expressed, residue))
}

/// Exact inverse of [`modulus`]: rebuild the value from quotient, modulus,
/// and residue seed.
#[must_use]
pub fn reconstruct_modulus(expressed: Identity, modulus: Identity, seed: Identity) -> Identity {
    Identity::new(
        expressed
            .value()
            .wrapping_mul(modulus.value())
            .wrapping_add(seed.value()),
    )
}

// =============================================================================
// POWER / ROOT
// =============================================================================

/// Stack a base `exponent` dimensional levels up.
///
/// Each level multiplies by the golden stacking constant; the exponent is
/// capped at the maximum Fibonacci index to bound recursion.
pub fn power(base: Identity, exponent: u8) -> Result<(Identity, RelationshipSet), CoreError> {
    let stacked = Identity::new(golden_scale(base.value(), exponent, GOLDEN_GAMMA)?);
    let rels: RelationshipSet = [
        Relationship::new(base, stacked, RelationKind::Embedding),
        Relationship::new(stacked, base, RelationKind::Orthogonal),
    ]
    .into_iter()
    .collect();
    Ok((stacked, rels))
}

/// Reduce a value `exponent` dimensional levels down. Exact inverse of
/// [`power`] for the same exponent.
pub fn root(value: Identity, exponent: u8) -> Result<(Identity, RelationshipSet), CoreError> {
    let reduced = Identity::new(golden_scale(value.value(), exponent, GOLDEN_GAMMA_INVERSE)?);
    let rels: RelationshipSet = [Relationship::new(value, reduced, RelationKind::Extraction)]
        .into_iter()
        .collect();
    Ok((reduced, rels))
}

fn golden_scale(value: u64, exponent: u8, constant: u64) -> Result<u64, CoreError> {
    if exponent > MAX_FIBONACCI_INDEX {
        return Err(CoreError::InvalidDimensionIndex(exponent));
    }
    let mut scaled = value;
    for _ in 0..exponent {
        scaled = scaled.wrapping_mul(constant);
    }
    Ok(scaled)
}

// =============================================================================
// REVERSIBILITY
// =============================================================================

/// Check that `inverse(forward(input)) == input`, bitwise.
///
/// Operator errors count as a reversibility failure.
pub fn validate_reversibility<F, G>(forward: F, inverse: G, input: Identity) -> bool
where
    F: Fn(Identity) -> Result<Identity, CoreError>,
    G: Fn(Identity) -> Result<Identity, CoreError>,
{
    match forward(input).and_then(|mid| inverse(mid)) {
        Ok(back) => back == input,
        Err(_) => false,
    }
}

/// Apply a forward operator, refusing to return a result whose inverse does
/// not reconstruct the input.
pub fn apply_with_validation<F, G>(
    forward: F,
    inverse: G,
    input: Identity,
) -> Result<Identity, CoreError>
where
    F: Fn(Identity) -> Result<Identity, CoreError>,
    G: Fn(Identity) -> Result<Identity, CoreError>,
{
    let result = forward(input)?;
    let back = inverse(result)?;
    if back != input {
        return Err(CoreError::ReversibilityViolation(input));
    }
    Ok(result)
}

// =============================================================================
// TESTS
// =============================================================================
