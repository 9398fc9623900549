//! Persistence layer: durable regions and key encoding

pub mod durable_store;
pub mod keys;

pub use durable_store::{DurableStore, Region};
