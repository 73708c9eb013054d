//! Project registry, durable event log, and in-memory ring buffer — C1,
//! C2, and C3 of the collector.

pub mod durable;
pub mod memory;
pub mod registry;

pub use durable::{DurableLog, DurableLogConfig, EventFilter, StoredEventRow};
pub use memory::{MemoryFilter, MemoryStore, SubscriptionToken};
pub use registry::{sanitize_app_name, Registry};
