//! Inventory unit storage.
//!
//! [`InventoryStore`] is the abstract ledger with atomic conditional writes;
//! [`InMemoryInventoryStore`] is the reference implementation used by the
//! binary and the tests.

pub mod memory;
pub mod store;

pub use memory::InMemoryInventoryStore;
pub use store::{InventoryStore, UnitQuery};
