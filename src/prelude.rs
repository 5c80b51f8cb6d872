//! Everything an embedding application usually needs in one import.

pub use crate::{
    AccessPolicy, Actor, ActorId, CommandOptions, EngineConfig, InMemoryRepository, LocalizedText,
    ModuleId, ModulePayload, ModuleRepository, NewModule, Result, Role, WorkflowEngine,
    WorkflowError, WorkflowState,
};
