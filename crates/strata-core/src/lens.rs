//! # Lens Module
//!
//! Pure projections over substrate dimensions.
//!
//! A lens never mutates the substrate or the registry. Observations are
//! recorded in a separate append-only log; the substrate does not know who
//! observed it.

use crate::primitives::DIMENSION_COUNT;
use crate::registry::SubstrateRegistry;
use crate::substrate::Dimension;
use crate::types::{CoreError, Identity, Value, unix_time_millis};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// LENS TRAIT
// =============================================================================

/// A pure projection from a dimension to a value.
///
/// Implementations must be deterministic and side-effect-free.
pub trait Lens: Send + Sync {
    /// Name used in logs and observation records.
    fn name(&self) -> &str;

    /// Project a dimension to a value.
    fn project(&self, dimension: &Dimension) -> Result<Value, CoreError>;
}

/// A lens built from a closure.
pub struct FnLens<F>
where
    F: Fn(&Dimension) -> Result<Value, CoreError> + Send + Sync,
{
    name: String,
    projection: F,
}

impl<F> FnLens<F>
where
    F: Fn(&Dimension) -> Result<Value, CoreError> + Send + Sync,
{
    /// Wrap a closure as a lens.
    pub fn new(name: impl Into<String>, projection: F) -> Self {
        Self {
            name: name.into(),
            projection,
        }
    }
}

impl<F> Lens for FnLens<F>
where
    F: Fn(&Dimension) -> Result<Value, CoreError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn project(&self, dimension: &Dimension) -> Result<Value, CoreError> {
        (self.projection)(dimension)
    }
}

/// Projects the dimension's own identity value.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityLens;

impl Lens for IdentityLens {
    fn name(&self) -> &str {
        "identity"
    }

    fn project(&self, dimension: &Dimension) -> Result<Value, CoreError> {
        Ok(Value::new(dimension.identity.value()))
    }
}

/// Projects the dimension's Fibonacci index.
#[derive(Debug, Clone, Copy, Default)]
pub struct FibonacciLens;

impl Lens for FibonacciLens {
    fn name(&self) -> &str {
        "fibonacci"
    }

    fn project(&self, dimension: &Dimension) -> Result<Value, CoreError> {
        Ok(Value::new(u64::from(dimension.fibonacci)))
    }
}

// =============================================================================
// OBSERVATION
// =============================================================================

/// A timestamped record of a lens applied to one dimension of a substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// The observed substrate.
    pub substrate: Identity,
    /// Position of the observed dimension, 0..9.
    pub dimension_index: u8,
    /// The lens that produced the value.
    pub lens: String,
    /// The projected value.
    pub value: Value,
    /// Unix milliseconds at observation time.
    pub observed_at: u64,
}

/// Append-only observation log, external to the substrates it describes.
#[derive(Debug, Default)]
pub struct ObservationLog {
    records: RwLock<Vec<Observation>>,
}

impl ObservationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation.
    pub fn append(&self, observation: Observation) {
        self.records.write().push(observation);
    }

    /// Number of recorded observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of all observations, in append order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Observation> {
        self.records.read().clone()
    }

    /// Observations of one substrate, in append order.
    #[must_use]
    pub fn for_substrate(&self, substrate: Identity) -> Vec<Observation> {
        self.records
            .read()
            .iter()
            .filter(|o| o.substrate == substrate)
            .cloned()
            .collect()
    }
}

// =============================================================================
// OBSERVE PIPELINE
// =============================================================================

/// Observe one dimension of a substrate through a lens.
///
/// Fetches the substrate, divides it lazily, applies the lens to the named
/// dimension, appends the observation to the log, and returns it. The
/// substrate itself is untouched.
pub fn observe(
    registry: &SubstrateRegistry,
    log: &ObservationLog,
    substrate: Identity,
    dimension_index: u8,
    lens: &dyn Lens,
) -> Result<Observation, CoreError> {
    if usize::from(dimension_index) >= DIMENSION_COUNT {
        return Err(CoreError::InvalidDimensionIndex(dimension_index));
    }
    let dimensions = registry.divide(substrate)?;
    let dimension = &dimensions[usize::from(dimension_index)];
    let value = lens.project(dimension)?;

    let observation = Observation {
        substrate,
        dimension_index,
        lens: lens.name().to_string(),
        value,
        observed_at: unix_time_millis(),
    };
    log.append(observation.clone());
    Ok(observation)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(source: &str) -> (SubstrateRegistry, Identity) {
        let registry = SubstrateRegistry::new();
        let id = registry.create(source, None).expect("create");
        (registry, id)
    }

    #[test]
    fn observe_records_and_returns() {
        let (registry, id) = registry_with("constant:42");
        let log = ObservationLog::new();

        let observation =
            observe(&registry, &log, id, 3, &IdentityLens).expect("observe");
        assert_eq!(observation.substrate, id);
        assert_eq!(observation.dimension_index, 3);
        assert_eq!(log.len(), 1);
        assert_eq!(log.for_substrate(id), vec![observation]);
    }

    #[test]
    fn observe_rejects_bad_dimension_index() {
        let (registry, id) = registry_with("constant:1");
        let log = ObservationLog::new();
        assert!(matches!(
            observe(&registry, &log, id, 9, &IdentityLens),
            Err(CoreError::InvalidDimensionIndex(9))
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn fibonacci_lens_projects_index() {
        let (registry, id) = registry_with("identity:1");
        let log = ObservationLog::new();
        let observation =
            observe(&registry, &log, id, 8, &FibonacciLens).expect("observe");
        assert_eq!(observation.value, Value::new(21));
    }

    #[test]
    fn fn_lens_wraps_closures() {
        let (registry, id) = registry_with("constant:7");
        let log = ObservationLog::new();
        let parity = FnLens::new("parity", |dim: &Dimension| {
            Ok(Value::new(dim.identity.value() % 2))
        });
        let observation = observe(&registry, &log, id, 0, &parity).expect("observe");
        assert!(observation.value.value() <= 1);
        assert_eq!(observation.lens, "parity");
    }

    #[test]
    fn observation_does_not_mutate_registry() {
        let (registry, id) = registry_with("constant:5");
        let log = ObservationLog::new();
        let before = registry.len();
        observe(&registry, &log, id, 1, &IdentityLens).expect("observe");
        assert_eq!(registry.len(), before);
    }
}
