//! Async remediation pipeline.
//!
//! This module provides the [`RemediationPipeline`] coordinator that runs the
//! remediation stages (Parse → Apply → Validate) with:
//! - Parallel manifest parsing on the blocking pool
//! - A configurable timeout per stage
//! - Structured logging via `tracing`
//!
//! The apply stage is a single blocking task. Fixes are never processed in
//! parallel; a timed-out run returns an error and its partial report is
//! dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{ConfigError, RemediationConfig};
use crate::executor::ParseExecutor;
use crate::model::{DependencyEntry, ManifestInput, VulnerabilityFix};
use crate::remediate::engine::RemediationEngine;
use crate::remediate::report::{ParseFailure, RemediationReport};
use crate::remediate::validate::{validate, ValidationSummary};
use crate::traits::{ManifestSink, SinkError};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Complete pipeline result with statistics.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub report: RemediationReport,
    pub validation: ValidationSummary,
    pub stats: PipelineStats,
}

/// Statistics about one pipeline run.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    /// Total time spent on the run (milliseconds)
    pub total_duration_ms: u64,

    /// Time spent parsing manifests (milliseconds)
    pub parse_duration_ms: u64,

    /// Time spent applying fixes (milliseconds)
    pub apply_duration_ms: u64,

    /// Time spent validating modified manifests (milliseconds)
    pub validate_duration_ms: u64,

    /// Number of manifests parsed successfully
    pub manifests_parsed: usize,

    /// Number of edits across all modified manifests
    pub edits: usize,
}

/// Which manifests [`write_back`] hands to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteBackPolicy {
    /// Skip manifests that failed validation
    #[default]
    SkipInvalid,

    /// Write every modified manifest
    WriteAll,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBackSummary {
    pub written: Vec<String>,
    pub skipped: Vec<String>,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that can occur during pipeline execution.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Stage execution exceeded timeout
    #[error("Stage '{stage}' timed out after {timeout_secs}s")]
    StageTimeout { stage: String, timeout_secs: u64 },

    /// Blocking task panicked or was cancelled
    #[error("Stage '{stage}' task failed: {message}")]
    Join { stage: String, message: String },

    /// Engine could not be built from the configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Write-back collaborator failed
    #[error("Write-back failed: {0}")]
    Sink(#[from] SinkError),
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Remediation pipeline with parallel parsing and stage timeouts.
///
/// # Thread Safety
///
/// The pipeline is `Send + Sync`; one instance can serve runs for several
/// repositories at once since every run carries its own state.
///
/// # Example
///
/// ```ignore
/// use package_remediator::{RemediationConfig, RemediationPipeline};
///
/// let pipeline = RemediationPipeline::new(RemediationConfig::default())?;
/// let result = pipeline.execute(manifests, fixes, graph).await?;
/// println!("{} edits", result.stats.edits);
/// ```
pub struct RemediationPipeline {
    engine: Arc<RemediationEngine>,
    executor: ParseExecutor,
    stage_timeout: Duration,
}

impl RemediationPipeline {
    /// Creates a pipeline from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the compatibility tables are invalid.
    pub fn new(config: RemediationConfig) -> Result<Self, PipelineError> {
        let executor = ParseExecutor::new(config.parse_concurrency);
        let stage_timeout = config.stage_timeout();
        Ok(Self {
            engine: Arc::new(RemediationEngine::new(config)?),
            executor,
            stage_timeout,
        })
    }

    /// Sets the timeout for each pipeline stage.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &RemediationEngine {
        &self.engine
    }

    /// Runs parse, apply and validate for one repository.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a stage times out or its task fails.
    /// Parse and mutation problems are not errors; they are in the report.
    pub async fn execute(
        &self,
        manifests: Vec<ManifestInput>,
        fixes: Vec<VulnerabilityFix>,
        graph: Vec<DependencyEntry>,
    ) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        let mut stats = PipelineStats::default();

        // ====================================================================
        // Stage 1: Parse
        // ====================================================================

        info!(manifests = manifests.len(), "Starting parse stage");
        let parse_start = Instant::now();

        let parsed = timeout(self.stage_timeout, self.executor.parse_all(&manifests))
            .await
            .map_err(|_| self.timed_out("parse"))?;

        let mut documents = Vec::new();
        let mut failures = Vec::new();
        let mutable = manifests.iter().filter(|input| input.format.is_mutable());
        for (input, result) in mutable.zip(parsed) {
            match result {
                Ok(doc) => documents.push(doc),
                Err(err) => {
                    warn!(path = %input.path, error = %err, "Failed to parse manifest");
                    failures.push(ParseFailure {
                        path: input.path.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        stats.parse_duration_ms = parse_start.elapsed().as_millis() as u64;
        stats.manifests_parsed = documents.len();
        info!(
            duration_ms = stats.parse_duration_ms,
            parsed = stats.manifests_parsed,
            failed = failures.len(),
            "Parse completed"
        );

        // ====================================================================
        // Stage 2: Apply
        // ====================================================================

        info!(fixes = fixes.len(), "Starting apply stage");
        let apply_start = Instant::now();

        let engine = Arc::clone(&self.engine);
        let report = timeout(self.stage_timeout, async move {
            tokio::task::spawn_blocking(move || {
                engine.apply_parsed(&manifests, documents, failures, &fixes, &graph)
            })
            .await
        })
        .await
        .map_err(|_| self.timed_out("apply"))?
        .map_err(|e| PipelineError::Join {
            stage: "apply".to_string(),
            message: e.to_string(),
        })?;

        stats.apply_duration_ms = apply_start.elapsed().as_millis() as u64;
        stats.edits = report.edit_count();
        info!(
            duration_ms = stats.apply_duration_ms,
            edits = stats.edits,
            files = report.summary.files_touched,
            "Apply completed"
        );

        // ====================================================================
        // Stage 3: Validate
        // ====================================================================

        let validate_start = Instant::now();
        let validation = validate(&report.modified_manifests);
        stats.validate_duration_ms = validate_start.elapsed().as_millis() as u64;
        info!(
            duration_ms = stats.validate_duration_ms,
            all_valid = validation.all_valid,
            errors = validation.errors.len(),
            "Validation completed"
        );

        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        Ok(PipelineResult {
            report,
            validation,
            stats,
        })
    }

    fn timed_out(&self, stage: &str) -> PipelineError {
        PipelineError::StageTimeout {
            stage: stage.to_string(),
            timeout_secs: self.stage_timeout.as_secs(),
        }
    }
}

/// Hands modified manifests to `sink` according to `policy`.
///
/// # Errors
///
/// Stops at the first [`SinkError`]; manifests written before it stay written.
pub async fn write_back(
    sink: &dyn ManifestSink,
    result: &PipelineResult,
    policy: WriteBackPolicy,
) -> Result<WriteBackSummary, PipelineError> {
    let mut summary = WriteBackSummary::default();
    for manifest in &result.report.modified_manifests {
        if policy == WriteBackPolicy::SkipInvalid && !result.validation.is_valid(&manifest.path) {
            warn!(path = %manifest.path, sink = sink.sink_id(), "Not writing invalid manifest");
            summary.skipped.push(manifest.path.clone());
            continue;
        }
        sink.write(&manifest.path, &manifest.content).await?;
        summary.written.push(manifest.path.clone());
    }
    info!(
        sink = sink.sink_id(),
        written = summary.written.len(),
        skipped = summary.skipped.len(),
        "Write-back completed"
    );
    Ok(summary)
}

// ============================================================================
// Tests
// ============================================================================
