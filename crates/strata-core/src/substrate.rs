//! # Substrate Module
//!
//! The atomic immutable unit: an identity paired with a pure expression.
//!
//! A substrate stores no evaluated data. Its value IS the expression;
//! callers recompute. Division into the nine Fibonacci dimensions is
//! derived from the identity alone and memoized on first access.

use crate::expression::{Expression, ParamBag};
use crate::ops;
use crate::primitives::{DIMENSION_COUNT, FIBONACCI_INDICES};
use crate::types::{ActorId, CoreError, Identity, Value};
use std::sync::OnceLock;

// =============================================================================
// DIMENSION
// =============================================================================

/// One of the nine indexed projections of a substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    /// The substrate this dimension projects.
    pub parent: Identity,
    /// Position in the dimension table, 0..9.
    pub position: u8,
    /// The Fibonacci index at this position.
    pub fibonacci: u8,
    /// The content-derived identity of this part.
    pub identity: Identity,
}

impl Dimension {
    /// The projection expression for this dimension.
    #[must_use]
    pub fn expression(&self) -> Expression {
        Expression::Projected {
            parent: self.parent,
            position: self.position,
        }
    }
}

// =============================================================================
// SUBSTRATE
// =============================================================================

/// An `(identity, expression)` pair. Immutable after construction.
///
/// The registry is the sole owner of substrates; everything outside it
/// holds identities. Cloning a substrate clones the memoized division
/// along with it, so snapshots stay cheap to re-divide.
#[derive(Debug, Clone)]
pub struct Substrate {
    identity: Identity,
    expression: Expression,
    owner: Option<ActorId>,
    dimensions: OnceLock<[Dimension; DIMENSION_COUNT]>,
}

impl Substrate {
    /// Construct with an explicit identity.
    ///
    /// Used for identities that are packed or forced (SRLs, seeds,
    /// operator results) rather than content-derived.
    #[must_use]
    pub fn new(identity: Identity, expression: Expression, owner: Option<ActorId>) -> Self {
        Self {
            identity,
            expression,
            owner,
            dimensions: OnceLock::new(),
        }
    }

    /// Construct from an expression source; the identity is the BLAKE3 hash
    /// of the canonical source truncated to 64 bits.
    pub fn from_source(source: &str, owner: Option<ActorId>) -> Result<Self, CoreError> {
        let expression = Expression::parse(source)?;
        let identity = expression.identity();
        Ok(Self::new(identity, expression, owner))
    }

    /// The substrate's identity.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// The owning actor, if the substrate was created through the gateway
    /// on behalf of one.
    #[must_use]
    pub fn owner(&self) -> Option<ActorId> {
        self.owner
    }

    /// The expression, shared by value (it is pure).
    #[must_use]
    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// The canonical source of the expression.
    #[must_use]
    pub fn canonical_source(&self) -> String {
        self.expression.canonical_source()
    }

    /// Evaluate the expression against a parameter bag.
    ///
    /// Deterministic: repeated invocation with equal parameters returns
    /// equal values.
    pub fn invoke(&self, params: &ParamBag) -> Result<Value, CoreError> {
        self.expression.evaluate(params).map(Value::new)
    }

    /// Divide into the nine Fibonacci dimensions.
    ///
    /// Lazily computed from the identity and memoized; repeated calls
    /// return the same slice.
    pub fn divide(&self) -> &[Dimension; DIMENSION_COUNT] {
        self.dimensions.get_or_init(|| {
            let mut dims = [Dimension {
                parent: self.identity,
                position: 0,
                fibonacci: 0,
                identity: Identity::new(0),
            }; DIMENSION_COUNT];
            for (position, dim) in dims.iter_mut().enumerate() {
                dim.position = position as u8;
                dim.fibonacci = FIBONACCI_INDICES[position];
                dim.identity = Identity::new(ops::part_identity(self.identity.value(), position));
            }
            dims
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_hash_of_canonical_source() {
        let substrate = Substrate::from_source("constant:42", None).expect("create");
        assert_eq!(
            substrate.identity(),
            Identity::from_content("constant:42")
        );
        assert_eq!(
            substrate.invoke(&ParamBag::new()).expect("invoke"),
            Value::new(42)
        );
        // Repeated invocation returns the same value.
        assert_eq!(
            substrate.invoke(&ParamBag::new()).expect("invoke"),
            Value::new(42)
        );
    }

    #[test]
    fn whitespace_variants_share_identity() {
        let a = Substrate::from_source("expr: a + 1", None).expect("create");
        let b = Substrate::from_source("expr:a+1", None).expect("create");
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn division_has_fibonacci_shape() {
        let substrate = Substrate::from_source("identity:1", None).expect("create");
        let dims = substrate.divide();
        assert_eq!(dims.len(), 9);
        let indices: Vec<u8> = dims.iter().map(|d| d.fibonacci).collect();
        assert_eq!(indices, vec![0, 1, 1, 2, 3, 5, 8, 13, 21]);
        for dim in dims {
            assert_eq!(dim.parent, substrate.identity());
        }
    }

    #[test]
    fn division_is_memoized() {
        let substrate = Substrate::from_source("constant:9", None).expect("create");
        let first = substrate.divide() as *const _;
        let second = substrate.divide() as *const _;
        assert_eq!(first, second);
    }

    #[test]
    fn dimension_expression_projects_part() {
        let substrate = Substrate::from_source("constant:5", None).expect("create");
        let dims = substrate.divide();
        for dim in dims {
            let projected = dim
                .expression()
                .evaluate(&ParamBag::new())
                .expect("projection");
            assert_eq!(projected, dim.identity.value());
        }
    }
}
