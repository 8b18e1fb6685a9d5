//! Remediate module - in-place manifest rewriting for vulnerability fixes.
//!
//! This module provides the core of the remediation engine:
//! - **Traits**: [`ManifestMutator`] for the per-dialect parse/edit/validate contract
//! - **Documents**: Parsed manifests with an append-only edit log via [`ManifestDocument`]
//! - **Decisions**: Matching, version resolution, the compatibility gate and the strategy chain
//! - **Orchestration**: [`RemediationEngine`] and the async [`pipeline::RemediationPipeline`]

pub mod compat;
pub mod consolidate;
pub mod document;
pub mod engine;
pub mod extract;
pub mod formats;
pub mod gate;
pub mod matcher;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod runtime;
pub mod strategy;
pub mod traits;
pub mod validate;

// Re-export commonly used types
pub use traits::{
    ConstraintRequest, Declaration, DeclarationKind, ManifestMutator, MutationError, ParseError,
    ValidationReport,
};

pub use compat::CompatibilityTables;
pub use document::{EditEntry, EditKind, ManifestDocument};
pub use engine::RemediationEngine;
pub use extract::{ExtractedVersion, VersionExtractor, VersionSource};
pub use matcher::{MatchOutcome, MatchRule, VulnerabilityMatcher};
pub use report::{ModifiedManifest, RemediationReport, RunSummary, SatisfiedFix};
pub use runtime::{RuntimeOrigin, RuntimeVersion};
pub use strategy::{FixStrategy, StrategyOutcome};
pub use validate::{validate, ValidationIssue, ValidationSummary};

pub use pipeline::{
    write_back, PipelineError, PipelineResult, PipelineStats, RemediationPipeline,
    WriteBackPolicy, WriteBackSummary,
};
