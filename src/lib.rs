pub mod config;
pub mod executor;
pub mod logging;
pub mod model;
pub mod remediate;
pub mod traits;
pub mod version;

// Re-export common types for convenience
pub use config::*;
pub use executor::*;
pub use logging::init_logging;
pub use model::*;
pub use remediate::{
    validate, CompatibilityTables, ModifiedManifest, PipelineError, PipelineResult,
    RemediationEngine, RemediationPipeline, RemediationReport, ValidationSummary,
    WriteBackPolicy,
};
pub use traits::*;
