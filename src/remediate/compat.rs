//! Compatibility tables.
//!
//! Families, runtime ranges, family pairs, catalogs, gate rules and the
//! extraction pattern list are all data. The built-in asset lives in
//! `data/compatibility.json` and can be replaced at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ConfigError;
use crate::version::{self, VersionRange};

const BUILTIN: &str = include_str!("../../data/compatibility.json");

/// A group of components that share a version lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySpec {
    pub name: String,

    /// Coordinate prefixes of member components (`org.springframework:`)
    pub members: Vec<String>,

    /// Names the family goes by in vulnerability feeds
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Token every member artifact carries, used by suffix matching
    #[serde(default)]
    pub marker: Option<String>,

    /// Conventional names of the shared version variable
    #[serde(default)]
    pub variables: Vec<String>,

    /// Build plugin ids that carry the family version
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Umbrella family this one must track
    #[serde(default)]
    pub aligned_with: Option<String>,
}

impl FamilySpec {
    pub fn is_member(&self, name: &str) -> bool {
        self.plugins.iter().any(|plugin| plugin == name)
            || self.members.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Length of the longest member prefix matching `name`.
    fn match_len(&self, name: &str) -> Option<usize> {
        if self.plugins.iter().any(|plugin| plugin == name) {
            return Some(usize::MAX);
        }
        self.members
            .iter()
            .filter(|prefix| name.starts_with(prefix.as_str()))
            .map(String::len)
            .max()
    }
}

/// Umbrella `major.minor` to extension range mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyPair {
    pub umbrella: String,
    pub extension: String,
    pub mapping: BTreeMap<String, VersionRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyRequirement {
    pub family: String,
    pub min_major: u64,
}

/// "Components matching `pattern` at major >= `min_major` need ..."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRule {
    pub name: String,

    /// Dependency name prefix, or an exact family member name
    pub pattern: String,

    pub min_major: u64,

    #[serde(default)]
    pub requires_runtime: Option<u32>,

    #[serde(default)]
    pub requires_family: Option<FamilyRequirement>,
}

impl GateRule {
    pub fn applies_to(&self, dependency_name: &str, version: &str) -> bool {
        dependency_name.starts_with(self.pattern.as_str())
            && version::major(version).is_some_and(|major| major >= self.min_major)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionPattern {
    pub name: String,
    pub pattern: String,
}

/// Ordered pattern list; earlier entries win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionPatterns {
    pub version: u32,
    pub patterns: Vec<ExtractionPattern>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityTables {
    /// Umbrella family reported by framework detection
    pub framework_family: String,

    pub families: Vec<FamilySpec>,

    /// Runtime major -> family -> range
    #[serde(default)]
    pub runtime_ranges: BTreeMap<u32, BTreeMap<String, VersionRange>>,

    #[serde(default)]
    pub family_pairs: Vec<FamilyPair>,

    /// Available versions keyed by dependency name or family name
    #[serde(default)]
    pub catalogs: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub gate_rules: Vec<GateRule>,

    pub extraction: ExtractionPatterns,
}

impl CompatibilityTables {
    /// Loads the embedded default tables.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json(BUILTIN)
    }

    /// Parses tables and checks that every family reference resolves.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Json`] for malformed JSON or range strings,
    /// [`ConfigError::UnknownFamily`] for dangling family names.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let tables: Self = serde_json::from_str(json)?;
        tables.check_references()?;
        Ok(tables)
    }

    fn check_references(&self) -> Result<(), ConfigError> {
        let known = |family: &str, referenced_by: String| {
            if self.family(family).is_some() {
                Ok(())
            } else {
                Err(ConfigError::UnknownFamily {
                    family: family.to_string(),
                    referenced_by,
                })
            }
        };
        known(&self.framework_family, "framework_family".to_string())?;
        for family in &self.families {
            if let Some(umbrella) = &family.aligned_with {
                known(umbrella, format!("family '{}'", family.name))?;
            }
        }
        for pair in &self.family_pairs {
            known(&pair.umbrella, "family_pairs".to_string())?;
            known(&pair.extension, "family_pairs".to_string())?;
        }
        for (runtime, ranges) in &self.runtime_ranges {
            for family in ranges.keys() {
                known(family, format!("runtime_ranges.{}", runtime))?;
            }
        }
        for rule in &self.gate_rules {
            if let Some(requirement) = &rule.requires_family {
                known(&requirement.family, format!("gate rule '{}'", rule.name))?;
            }
        }
        Ok(())
    }

    pub fn family(&self, name: &str) -> Option<&FamilySpec> {
        self.families.iter().find(|family| family.name == name)
    }

    /// Family a dependency or plugin belongs to.
    ///
    /// Exact plugin ids win, then the longest member prefix.
    pub fn family_of(&self, dependency_name: &str) -> Option<&FamilySpec> {
        self.families
            .iter()
            .filter_map(|family| family.match_len(dependency_name).map(|len| (len, family)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, family)| family)
    }

    /// Family whose version variable is called `variable`.
    pub fn family_for_variable(&self, variable: &str) -> Option<&FamilySpec> {
        self.families
            .iter()
            .find(|family| family.variables.iter().any(|name| name == variable))
    }

    /// Range for `family` under the closest runtime entry at or below `runtime`.
    pub fn runtime_range(&self, runtime: u32, family: &str) -> Option<VersionRange> {
        self.runtime_ranges
            .range(..=runtime)
            .next_back()
            .and_then(|(_, ranges)| ranges.get(family).copied())
    }

    /// Extension range implied by the umbrella's version.
    pub fn pair_range(
        &self,
        umbrella: &str,
        extension: &str,
        umbrella_version: &str,
    ) -> Option<VersionRange> {
        let pair = self
            .family_pairs
            .iter()
            .find(|pair| pair.umbrella == umbrella && pair.extension == extension)?;
        let (major, minor) = version::major_minor(umbrella_version)?;
        pair.mapping
            .get(&format!("{}.{}", major, minor))
            .or_else(|| pair.mapping.get(&major.to_string()))
            .copied()
    }

    /// Published versions for a dependency, looked up by name then family.
    pub fn catalog(&self, dependency_name: &str, family: Option<&str>) -> Option<&[String]> {
        self.catalogs
            .get(dependency_name)
            .or_else(|| family.and_then(|family| self.catalogs.get(family)))
            .map(Vec::as_slice)
    }

    /// Families others align with; resolved first.
    pub fn is_umbrella(&self, family: &str) -> bool {
        self.families
            .iter()
            .any(|spec| spec.aligned_with.as_deref() == Some(family))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables_are_consistent() {
        let tables = CompatibilityTables::builtin().unwrap();
        assert_eq!(tables.framework_family, "spring-boot");
        assert!(tables.extraction.patterns.len() >= 6);
        assert!(tables.is_umbrella("spring-framework"));
    }

    #[test]
    fn test_family_of_prefers_longest_prefix() {
        let tables = CompatibilityTables::builtin().unwrap();
        assert_eq!(
            tables.family_of("org.springframework:spring-core").map(|f| f.name.as_str()),
            Some("spring-framework")
        );
        assert_eq!(
            tables
                .family_of("org.springframework.boot:spring-boot-starter-web")
                .map(|f| f.name.as_str()),
            Some("spring-boot")
        );
        assert_eq!(
            tables.family_of("org.springframework.boot").map(|f| f.name.as_str()),
            Some("spring-boot")
        );
        assert!(tables.family_of("com.example:lib").is_none());
    }

    #[test]
    fn test_runtime_range_uses_closest_lower_entry() {
        let tables = CompatibilityTables::builtin().unwrap();
        let range = tables.runtime_range(11, "spring-framework").unwrap();
        assert_eq!(range.to_string(), "5.3.x");
        assert_eq!(
            tables.runtime_range(19, "spring-boot").unwrap().to_string(),
            "3.3.x"
        );
        assert!(tables.runtime_range(7, "spring-boot").is_none());
        assert!(tables.runtime_range(17, "jackson").is_none());
    }

    #[test]
    fn test_pair_range_lookup() {
        let tables = CompatibilityTables::builtin().unwrap();
        let range = tables
            .pair_range("spring-framework", "spring-security", "5.3.31")
            .unwrap();
        assert_eq!(range.to_string(), "5.8.x");
        assert!(tables
            .pair_range("spring-framework", "spring-security", "4.3.0")
            .is_none());
    }

    #[test]
    fn test_unknown_family_reference_is_rejected() {
        let json = r#"{
            "framework_family": "missing",
            "families": [],
            "extraction": {"version": 1, "patterns": []}
        }"#;
        assert!(matches!(
            CompatibilityTables::from_json(json),
            Err(ConfigError::UnknownFamily { .. })
        ));
    }

    #[test]
    fn test_gate_rule_matching() {
        let rule = GateRule {
            name: "fw-6".to_string(),
            pattern: "org.springframework:".to_string(),
            min_major: 6,
            requires_runtime: Some(17),
            requires_family: None,
        };
        assert!(rule.applies_to("org.springframework:spring-core", "6.0.5"));
        assert!(!rule.applies_to("org.springframework:spring-core", "5.3.30"));
        assert!(!rule.applies_to("org.springframework.boot:spring-boot", "6.0.0"));
    }
}
