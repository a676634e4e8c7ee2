mod backend;
mod config;
mod handlers;
mod structs;

pub use backend::{PulumiStackCatalog, StackCatalog, StepFunctionsEngine, WorkflowEngine};
pub use config::{CatalogConfig, DEFAULT_BRANCH};
pub use handlers::{create_router, workflow_input, AppState};
pub use structs::{ExecutionDescription, StartExecutionResponse};
