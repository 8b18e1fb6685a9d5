//! Result types of a remediation run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{
    ConsolidatedFix, MajorUpgradeRequirement, ManifestFormat, SkipAnnotation, SkippedFix,
    UnresolvedFix,
};
use crate::remediate::document::EditEntry;
use crate::remediate::runtime::RuntimeVersion;

/// A manifest whose text changed during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedManifest {
    pub path: String,
    pub format: ManifestFormat,
    pub content: String,
    pub edits: Vec<EditEntry>,
}

/// A fix that needed no edit because the manifests already satisfy it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatisfiedFix {
    pub dependency_name: String,
    pub cve_id: String,
    pub declared_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub path: String,
    pub message: String,
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub files_touched: usize,
    pub edits_per_format: BTreeMap<ManifestFormat, usize>,
    pub fixes_applied: usize,
    pub fixes_skipped: usize,
    pub fixes_cascaded: usize,
    pub fixes_escalated: usize,
    pub fixes_unresolved: usize,
    pub fixes_already_satisfied: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationReport {
    pub modified_manifests: Vec<ModifiedManifest>,

    /// Manifest path -> fixes applied to it
    pub applied_fixes: BTreeMap<String, Vec<ConsolidatedFix>>,

    pub major_upgrade_requirements: Vec<MajorUpgradeRequirement>,
    pub skip_annotations: Vec<SkipAnnotation>,
    pub skipped_fixes: Vec<SkippedFix>,
    pub unresolved_fixes: Vec<UnresolvedFix>,
    pub already_satisfied: Vec<SatisfiedFix>,
    pub parse_failures: Vec<ParseFailure>,
    pub runtime: Option<RuntimeVersion>,
    pub summary: RunSummary,
}

impl RemediationReport {
    /// Total number of edit-log entries across modified manifests.
    pub fn edit_count(&self) -> usize {
        self.modified_manifests.iter().map(|m| m.edits.len()).sum()
    }

    pub fn manifest(&self, path: &str) -> Option<&ModifiedManifest> {
        self.modified_manifests.iter().find(|m| m.path == path)
    }

    pub(crate) fn record_applied(&mut self, path: &str, fix: &ConsolidatedFix) {
        let applied = self.applied_fixes.entry(path.to_string()).or_default();
        if !applied.iter().any(|existing| existing.dependency_name == fix.dependency_name) {
            applied.push(fix.clone());
        }
    }

    pub(crate) fn finish_summary(&mut self) {
        let mut edits_per_format: BTreeMap<ManifestFormat, usize> = BTreeMap::new();
        for manifest in &self.modified_manifests {
            *edits_per_format.entry(manifest.format).or_default() += manifest.edits.len();
        }
        let mut applied: Vec<&str> = self
            .applied_fixes
            .values()
            .flatten()
            .map(|fix| fix.dependency_name.as_str())
            .collect();
        applied.sort_unstable();
        applied.dedup();

        self.summary = RunSummary {
            files_touched: self.modified_manifests.len(),
            edits_per_format,
            fixes_applied: applied.len(),
            fixes_skipped: self.skipped_fixes.len(),
            fixes_cascaded: self.skip_annotations.len(),
            fixes_escalated: self.major_upgrade_requirements.len(),
            fixes_unresolved: self.unresolved_fixes.len(),
            fixes_already_satisfied: self.already_satisfied.len(),
        };
    }
}
