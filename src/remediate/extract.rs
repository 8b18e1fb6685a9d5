//! Target-version extraction from free-text recommendation sources.
//!
//! Patterns are tried in list order against one source at a time; the first
//! capture wins. Sources are searched description first, then each
//! recommended action, then the remediation command.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::model::{UnresolvedFix, VulnerabilityFix};
use crate::remediate::compat::ExtractionPatterns;
use crate::version;

/// Where a target version was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    /// The fix carried an explicit recommended version
    Explicit,
    Description,
    RecommendedActions,
    RemediationCommand,
}

impl VersionSource {
    fn label(self) -> &'static str {
        match self {
            VersionSource::Explicit => "recommended_version",
            VersionSource::Description => "description",
            VersionSource::RecommendedActions => "recommended_actions",
            VersionSource::RemediationCommand => "remediation_command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedVersion {
    pub version: String,
    pub source: VersionSource,
    /// Name of the matching pattern, `None` for explicit versions
    pub pattern: Option<String>,
}

/// Compiled, ordered extraction pattern list.
#[derive(Debug, Clone)]
pub struct VersionExtractor {
    revision: u32,
    patterns: Vec<(String, Regex)>,
}

impl VersionExtractor {
    /// Compiles the pattern list.
    ///
    /// # Errors
    ///
    /// Fails on an invalid regex or a pattern without a `version` group.
    pub fn new(config: &ExtractionPatterns) -> Result<Self, ConfigError> {
        let patterns = config
            .patterns
            .iter()
            .map(|entry| {
                let regex = Regex::new(&entry.pattern).map_err(|err| ConfigError::InvalidPattern {
                    name: entry.name.clone(),
                    message: err.to_string(),
                })?;
                if !regex.capture_names().any(|name| name == Some("version")) {
                    return Err(ConfigError::MissingVersionGroup(entry.name.clone()));
                }
                Ok((entry.name.clone(), regex))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            revision: config.version,
            patterns,
        })
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// First version found in `text`, with the name of the pattern that hit.
    pub fn extract_from_text(&self, text: &str) -> Option<(String, String)> {
        let cleaned: String = text.chars().filter(|c| !matches!(c, '*' | '`')).collect();
        self.patterns.iter().find_map(|(name, regex)| {
            let captured = regex.captures(&cleaned)?.name("version")?.as_str();
            let trimmed = captured.trim_end_matches(['.', '-', '_']);
            let normalized = version::normalize(trimmed);
            (!normalized.is_empty() && version::looks_like_version(normalized))
                .then(|| (normalized.to_string(), name.clone()))
        })
    }

    /// Determines the recommended version of a fix.
    ///
    /// # Errors
    ///
    /// Returns the [`UnresolvedFix`] listing every source searched when
    /// nothing matched. No placeholder version is ever substituted.
    pub fn extract(&self, fix: &VulnerabilityFix) -> Result<ExtractedVersion, UnresolvedFix> {
        if let Some(explicit) = fix
            .recommended_version
            .as_deref()
            .filter(|value| version::looks_like_version(value))
        {
            return Ok(ExtractedVersion {
                version: version::normalize(explicit).to_string(),
                source: VersionSource::Explicit,
                pattern: None,
            });
        }

        let mut searched = Vec::new();
        let mut sources: Vec<(VersionSource, &str)> = Vec::new();
        if !fix.description.trim().is_empty() {
            sources.push((VersionSource::Description, fix.description.as_str()));
        }
        sources.extend(
            fix.recommended_actions
                .iter()
                .map(|action| (VersionSource::RecommendedActions, action.as_str())),
        );
        if let Some(command) = fix.remediation_command.as_deref() {
            sources.push((VersionSource::RemediationCommand, command));
        }

        for (source, text) in sources {
            if !searched.contains(&source.label().to_string()) {
                searched.push(source.label().to_string());
            }
            if let Some((version, pattern)) = self.extract_from_text(text) {
                debug!(
                    dependency = %fix.dependency_name,
                    source = source.label(),
                    pattern = %pattern,
                    version = %version,
                    "Extracted target version"
                );
                return Ok(ExtractedVersion {
                    version,
                    source,
                    pattern: Some(pattern),
                });
            }
        }

        Err(UnresolvedFix {
            dependency_name: fix.dependency_name.clone(),
            cve_id: fix.cve_id.clone(),
            searched_sources: searched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediate::compat::{CompatibilityTables, ExtractionPattern};

    fn extractor() -> VersionExtractor {
        VersionExtractor::new(&CompatibilityTables::builtin().unwrap().extraction).unwrap()
    }

    fn fix(description: &str) -> VulnerabilityFix {
        VulnerabilityFix {
            dependency_name: "com.example:lib".to_string(),
            current_version: "1.2.0".to_string(),
            cve_id: "CVE-2024-0001".to_string(),
            severity: "High".to_string(),
            description: description.to_string(),
            ..VulnerabilityFix::default()
        }
    }

    #[test]
    fn test_patterns_apply_in_priority_order() {
        let extractor = extractor();
        let text = "Upgrade to 2.0.0. **Recommended version: 1.5.0**";
        assert_eq!(
            extractor.extract_from_text(text),
            Some(("1.5.0".to_string(), "recommended-version".to_string()))
        );
        assert_eq!(
            extractor.extract_from_text("Please upgrade com.example:lib to `1.5.1`."),
            Some(("1.5.1".to_string(), "upgrade-to".to_string()))
        );
        assert_eq!(
            extractor
                .extract_from_text("Use com.fasterxml.jackson.core:jackson-databind:2.13.4.2")
                .map(|(version, _)| version),
            Some("2.13.4.2".to_string())
        );
        assert_eq!(
            extractor
                .extract_from_text("Install lodash@4.17.21 or later")
                .map(|(version, _)| version),
            Some("4.17.21".to_string())
        );
        assert_eq!(
            extractor
                .extract_from_text("fixed in v3.0.2")
                .map(|(version, _)| version),
            Some("3.0.2".to_string())
        );
        assert_eq!(extractor.extract_from_text("No fix available yet"), None);
    }

    #[test]
    fn test_sources_searched_in_order() {
        let extractor = extractor();
        let mut input = fix("Prototype pollution in lib");
        input.recommended_actions = vec![
            "Review usages".to_string(),
            "Upgrade to version 1.5.0".to_string(),
        ];
        input.remediation_command = Some("npm install lib@2.0.0".to_string());

        let extracted = extractor.extract(&input).unwrap();
        assert_eq!(extracted.version, "1.5.0");
        assert_eq!(extracted.source, VersionSource::RecommendedActions);
    }

    #[test]
    fn test_explicit_version_wins() {
        let mut input = fix("Upgrade to 9.9.9");
        input.recommended_version = Some("1.5.0".to_string());
        let extracted = extractor().extract(&input).unwrap();
        assert_eq!(extracted.version, "1.5.0");
        assert_eq!(extracted.source, VersionSource::Explicit);
    }

    #[test]
    fn test_nothing_found_is_unresolved() {
        let mut input = fix("Denial of service");
        input.remediation_command = Some("./gradlew dependencies".to_string());
        let unresolved = extractor().extract(&input).unwrap_err();
        assert_eq!(unresolved.cve_id, "CVE-2024-0001");
        assert_eq!(
            unresolved.searched_sources,
            vec!["description".to_string(), "remediation_command".to_string()]
        );
    }

    #[test]
    fn test_pattern_without_version_group_is_rejected() {
        let config = ExtractionPatterns {
            version: 2,
            patterns: vec![ExtractionPattern {
                name: "broken".to_string(),
                pattern: r"\d+\.\d+".to_string(),
            }],
        };
        assert!(matches!(
            VersionExtractor::new(&config),
            Err(ConfigError::MissingVersionGroup(name)) if name == "broken"
        ));
    }
}
