//! State store
//!
//! Actor-owned canonical snapshot plus dual-slot persistence.

mod manager;
mod messages;
mod slots;

pub use manager::StateStore;
pub use messages::{StoreCommand, StoreError, StoreResponse, Transform};
pub use slots::{LoadedFrom, SlotError, SlotStore};
