//! Vulnerability to dependency matching.
//!
//! Rules are tried in order for every graph entry and the first that
//! matches decides; there is no partial match.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{DependencyEntry, Vulnerability};
use crate::remediate::compat::CompatibilityTables;

/// Minimum length of a stripped name taking part in containment matching.
const MIN_CONTAINMENT_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    Exact,
    Coordinate,
    Containment,
    Family,
}

/// Result of matching one vulnerability against the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome<'g> {
    Affected(Vec<(&'g DependencyEntry, MatchRule)>),
    /// Nothing in the graph is affected.
    FalsePositive,
}

impl<'g> MatchOutcome<'g> {
    pub fn entries(&self) -> Vec<&'g DependencyEntry> {
        match self {
            MatchOutcome::Affected(entries) => entries.iter().map(|(entry, _)| *entry).collect(),
            MatchOutcome::FalsePositive => Vec::new(),
        }
    }

    pub fn is_false_positive(&self) -> bool {
        matches!(self, MatchOutcome::FalsePositive)
    }
}

/// Pluggable rule for families whose members carry suffixes.
pub trait FamilyMatchRule: Send + Sync {
    fn matches(&self, affected: &str, dependency_name: &str) -> bool;
}

/// Matches an affected family alias against any member artifact carrying
/// the family marker token.
pub struct MarkerFamilyRule {
    tables: Arc<CompatibilityTables>,
}

impl MarkerFamilyRule {
    pub fn new(tables: Arc<CompatibilityTables>) -> Self {
        Self { tables }
    }
}

impl FamilyMatchRule for MarkerFamilyRule {
    fn matches(&self, affected: &str, dependency_name: &str) -> bool {
        let affected = affected.trim().to_ascii_lowercase();
        let Some(family) = self.tables.family_of(dependency_name) else {
            return false;
        };
        let Some(marker) = family.marker.as_deref() else {
            return false;
        };
        let names_family = family.name == affected
            || family
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(&affected));
        names_family && artifact(dependency_name).to_ascii_lowercase().contains(marker)
    }
}

/// Segment after the last `:` (maven/gradle artifact), else the whole name.
fn artifact(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Drops a maven group or an npm scope.
fn strip_group(name: &str) -> &str {
    let name = artifact(name);
    match name.strip_prefix('@') {
        Some(scoped) => scoped.split_once('/').map(|(_, rest)| rest).unwrap_or(scoped),
        None => name,
    }
}

/// Identity used for target selection: exact equality, or artifact equality
/// when either side is a coordinate.
pub fn same_coordinate(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if !(a.contains(':') || b.contains(':')) {
        return false;
    }
    if a.contains(':') && b.contains(':') {
        // Two full coordinates only match on the whole group:artifact.
        return coordinate_key(a) == coordinate_key(b);
    }
    artifact(a) == artifact(b)
}

/// `group:artifact` without any version suffix.
fn coordinate_key(name: &str) -> String {
    name.split(':').take(2).collect::<Vec<_>>().join(":")
}

pub struct VulnerabilityMatcher {
    family_rules: Vec<Box<dyn FamilyMatchRule>>,
}

impl VulnerabilityMatcher {
    pub fn new() -> Self {
        Self {
            family_rules: Vec::new(),
        }
    }

    /// Matcher with the marker rule over the given tables.
    pub fn with_tables(tables: Arc<CompatibilityTables>) -> Self {
        Self::new().with_family_rule(Box::new(MarkerFamilyRule::new(tables)))
    }

    pub fn with_family_rule(mut self, rule: Box<dyn FamilyMatchRule>) -> Self {
        self.family_rules.push(rule);
        self
    }

    /// First rule under which `affected` names `dependency_name`.
    pub fn match_name(&self, affected: &str, dependency_name: &str) -> Option<MatchRule> {
        let affected = affected.trim();
        if affected.is_empty() {
            return None;
        }
        if affected == dependency_name {
            return Some(MatchRule::Exact);
        }
        if (affected.contains(':') || dependency_name.contains(':'))
            && same_coordinate(affected, dependency_name)
        {
            return Some(MatchRule::Coordinate);
        }
        // Groups are ignored here, so two coordinates are compared on artifacts too.
        let (short_affected, short_dependency) = (strip_group(affected), strip_group(dependency_name));
        if short_affected.len() >= MIN_CONTAINMENT_LEN
            && short_dependency.len() >= MIN_CONTAINMENT_LEN
            && (short_affected.contains(short_dependency) || short_dependency.contains(short_affected))
        {
            return Some(MatchRule::Containment);
        }
        if self
            .family_rules
            .iter()
            .any(|rule| rule.matches(affected, dependency_name))
        {
            return Some(MatchRule::Family);
        }
        None
    }

    /// Graph entries affected by `vulnerability`, in graph order.
    pub fn match_vulnerability<'g>(
        &self,
        vulnerability: &Vulnerability,
        graph: &'g [DependencyEntry],
    ) -> MatchOutcome<'g> {
        let affected: Vec<(&DependencyEntry, MatchRule)> = graph
            .iter()
            .filter_map(|entry| {
                vulnerability
                    .affected_packages
                    .iter()
                    .find_map(|package| self.match_name(package, &entry.name))
                    .map(|rule| (entry, rule))
            })
            .collect();
        if affected.is_empty() {
            MatchOutcome::FalsePositive
        } else {
            MatchOutcome::Affected(affected)
        }
    }
}

impl Default for VulnerabilityMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DependencyKind;

    fn entry(name: &str) -> DependencyEntry {
        DependencyEntry {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            package_manager: "maven".to_string(),
            file_path: "pom.xml".to_string(),
            kind: DependencyKind::Direct,
            parent: None,
        }
    }

    fn matcher() -> VulnerabilityMatcher {
        VulnerabilityMatcher::with_tables(Arc::new(CompatibilityTables::builtin().unwrap()))
    }

    #[test]
    fn test_rule_precedence() {
        let matcher = matcher();
        assert_eq!(matcher.match_name("com.example:lib", "com.example:lib"), Some(MatchRule::Exact));
        assert_eq!(matcher.match_name("lib", "com.example:lib"), Some(MatchRule::Coordinate));
        assert_eq!(
            matcher.match_name("jackson-databind-2.13", "com.fasterxml.jackson.core:jackson-databind"),
            Some(MatchRule::Containment)
        );
        assert_eq!(
            matcher.match_name("spring-framework", "org.springframework:spring-webmvc"),
            Some(MatchRule::Family)
        );
        assert_eq!(matcher.match_name("@babel/traverse", "traverse"), Some(MatchRule::Containment));
    }

    #[test]
    fn test_unrelated_names_do_not_match() {
        let matcher = matcher();
        assert_eq!(matcher.match_name("com.example:lib", "com.other:json"), None);
        assert_eq!(matcher.match_name("qs", "express"), None);
        assert_eq!(matcher.match_name("", "express"), None);
        // Family alias without the marker token on the artifact.
        assert_eq!(matcher.match_name("spring-framework", "com.example:lib"), None);
    }

    #[test]
    fn test_coordinates_match_by_artifact_containment() {
        let matcher = matcher();
        assert_eq!(
            matcher.match_name("com.example:lib", "com.other:lib"),
            Some(MatchRule::Containment)
        );
        assert_eq!(
            matcher.match_name(
                "org.apache.logging.log4j:log4j-core",
                "org.apache.logging.log4j:log4j-core-extras"
            ),
            Some(MatchRule::Containment)
        );

        let graph = vec![entry("org.apache.logging.log4j:log4j-core-extras"), entry("org.yaml:snakeyaml")];
        let vulnerability = Vulnerability {
            id: "CVE-2021-44228".to_string(),
            severity: "Critical".to_string(),
            description: "n/a".to_string(),
            affected_packages: vec!["org.apache.logging.log4j:log4j-core".to_string()],
        };
        let outcome = matcher.match_vulnerability(&vulnerability, &graph);
        assert!(!outcome.is_false_positive());
        assert_eq!(outcome.entries().len(), 1);
        assert_eq!(outcome.entries()[0].name, "org.apache.logging.log4j:log4j-core-extras");
    }

    #[test]
    fn test_false_positive_when_graph_has_no_match() {
        let graph = vec![entry("com.example:lib"), entry("org.yaml:snakeyaml")];
        let vulnerability = Vulnerability {
            id: "CVE-2024-0002".to_string(),
            severity: "High".to_string(),
            description: "n/a".to_string(),
            affected_packages: vec!["log4j-core".to_string()],
        };
        assert!(matcher().match_vulnerability(&vulnerability, &graph).is_false_positive());

        let vulnerability = Vulnerability {
            affected_packages: vec!["org.yaml:snakeyaml".to_string()],
            ..vulnerability
        };
        let outcome = matcher().match_vulnerability(&vulnerability, &graph);
        assert_eq!(outcome.entries().len(), 1);
        assert_eq!(outcome.entries()[0].name, "org.yaml:snakeyaml");
    }
}
