//! Runtime for executing turns
//!
//! Wires the pure state machine to the user store, checkpoint store,
//! reasoning oracle and tools.

mod executor;
mod recovery;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{OrchestratorConfig, TurnError, TurnOrchestrator, DEFAULT_MAX_TOOL_ROUNDS};
pub use traits::*;

use crate::db::{CheckpointDatabase, UserDatabase};
use crate::llm::LlmService;
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// Type alias for the production orchestrator with concrete implementations
pub type ProductionOrchestrator =
    TurnOrchestrator<UserDatabase, CheckpointDatabase, LlmOracle, ToolRegistryExecutor>;

/// Build the production orchestrator. The oracle is bound to the standard
/// tool set once and reused for every turn.
pub fn production_orchestrator(
    users: UserDatabase,
    checkpoints: CheckpointDatabase,
    llm: Arc<dyn LlmService>,
    config: OrchestratorConfig,
) -> ProductionOrchestrator {
    let registry = ToolRegistry::standard();
    let oracle = LlmOracle::new(llm, registry.definitions());
    TurnOrchestrator::new(
        Arc::new(users),
        checkpoints,
        Arc::new(oracle),
        ToolRegistryExecutor::new(registry),
        config,
    )
}
