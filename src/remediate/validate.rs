//! Post-edit structural validation.
//!
//! Failures are reported, never acted on: whether an invalid manifest is
//! written back is the caller's decision.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::remediate::formats;
use crate::remediate::report::ModifiedManifest;
use crate::remediate::traits::ValidationReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// Outcome of validating a set of modified manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub all_valid: bool,
    pub errors: Vec<ValidationIssue>,
    /// One report per manifest, in input order
    pub reports: Vec<ValidationReport>,
}

impl ValidationSummary {
    pub fn is_valid(&self, path: &str) -> bool {
        self.reports
            .iter()
            .find(|report| report.path == path)
            .map_or(false, |report| report.valid)
    }
}

/// Runs the format's structural check on every modified manifest.
pub fn validate(manifests: &[ModifiedManifest]) -> ValidationSummary {
    let reports: Vec<ValidationReport> = manifests
        .iter()
        .map(|manifest| match formats::mutator_for(manifest.format) {
            Some(mutator) => mutator.validate(&manifest.path, &manifest.content),
            None => ValidationReport::invalid(
                &manifest.path,
                vec![format!("{} manifests cannot be validated", manifest.format)],
            ),
        })
        .collect();

    let errors: Vec<ValidationIssue> = reports
        .iter()
        .flat_map(|report| {
            report.messages.iter().map(|message| ValidationIssue {
                path: report.path.clone(),
                message: message.clone(),
            })
        })
        .collect();

    for report in reports.iter().filter(|report| !report.valid) {
        warn!(path = %report.path, problems = report.messages.len(), "Manifest failed validation");
    }
    debug!(manifests = reports.len(), errors = errors.len(), "Validation finished");

    ValidationSummary {
        all_valid: reports.iter().all(|report| report.valid),
        errors,
        reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ManifestFormat;

    fn modified(path: &str, format: ManifestFormat, content: &str) -> ModifiedManifest {
        ModifiedManifest {
            path: path.to_string(),
            format,
            content: content.to_string(),
            edits: Vec::new(),
        }
    }

    #[test]
    fn test_valid_manifests() {
        let summary = validate(&[
            modified("pom.xml", ManifestFormat::Maven, "<project><dependencies></dependencies></project>"),
            modified("package.json", ManifestFormat::Npm, "{\"dependencies\": {\"a\": \"1.0.0\"}}"),
        ]);
        assert!(summary.all_valid);
        assert!(summary.errors.is_empty());
        assert!(summary.is_valid("pom.xml"));
    }

    #[test]
    fn test_errors_carry_manifest_path() {
        let summary = validate(&[
            modified("pom.xml", ManifestFormat::Maven, "<project><dependencies></dependencies></project>"),
            modified("web/package.json", ManifestFormat::Npm, "{\"dependencies\": {"),
        ]);
        assert!(!summary.all_valid);
        assert!(summary.is_valid("pom.xml"));
        assert!(!summary.is_valid("web/package.json"));
        assert!(summary.errors.iter().all(|issue| issue.path == "web/package.json"));
        assert!(!summary.errors.is_empty());
    }

    #[test]
    fn test_empty_input_is_valid() {
        let summary = validate(&[]);
        assert!(summary.all_valid);
        assert!(summary.reports.is_empty());
    }
}
