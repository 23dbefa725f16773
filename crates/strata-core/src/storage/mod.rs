//! # Storage Module
//!
//! Durable backend for the core's logical schema. Optional: the core runs
//! fully in memory; embedders opt into durability.

pub mod redb_store;

pub use redb_store::RedbStore;
