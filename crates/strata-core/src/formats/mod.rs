//! # Formats Module
//!
//! Binary serialization formats for snapshot exchange. File I/O lives
//! with the embedder; everything here is a pure transformation.

pub mod persistence;

pub use persistence::{PersistenceHeader, state_from_bytes, state_to_bytes};
