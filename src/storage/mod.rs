pub mod engine;
pub mod memory;
pub mod persistence;

pub use engine::{Committed, ModuleRegistration, ModuleRepository, VersionCommit};
pub use memory::{FailPoint, InMemoryRepository};
pub use persistence::{DurabilityMode, PersistenceManager};
