use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a dependency is declared explicitly or pulled in by another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Direct,
    Transitive,
}

/// One node of the resolved dependency graph, as produced by the graph builder.
///
/// Identity is `(name, package_manager, file_path)`. `parent` is a name only,
/// used for cascade reasoning; it is never dereferenced into another entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub name: String,
    pub version: String,
    pub package_manager: String, // e.g., "maven", "gradle", "npm"
    pub file_path: String,
    pub kind: DependencyKind,
    #[serde(default)]
    pub parent: Option<String>,
}

impl DependencyEntry {
    pub fn is_direct(&self) -> bool {
        self.kind == DependencyKind::Direct
    }

    pub fn ecosystem(&self) -> Ecosystem {
        Ecosystem::from_package_manager(&self.package_manager)
            .unwrap_or_else(|| Ecosystem::infer_from_name(&self.name))
    }
}

/// A vulnerability finding with the package identifiers it affects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,       // CVE-2023-XXXX
    pub severity: String, // "Critical", "High", etc.
    pub description: String,
    pub affected_packages: Vec<String>,
}

/// A raw fix proposal for one dependency.
///
/// `recommended_version` may be absent, in which case it is extracted from
/// `description`, `recommended_actions` and `remediation_command` in that order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VulnerabilityFix {
    pub dependency_name: String,
    pub current_version: String,
    #[serde(default)]
    pub recommended_version: Option<String>,
    pub cve_id: String,
    pub severity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub remediation_command: Option<String>,
}

/// All fixes for one dependency name merged into a single unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedFix {
    pub dependency_name: String,
    pub current_version: String,
    /// Highest version recommended across the merged fixes.
    pub recommended_version: String,
    /// Version actually written after compatibility reconciliation.
    pub target_version: String,
    /// Comma-joined CVE identifiers.
    pub cve_id: String,
    pub severity: String,
    pub description: String,
}

/// Package ecosystem family a manifest or dependency belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Jvm,
    Node,
}

impl Ecosystem {
    pub fn from_package_manager(package_manager: &str) -> Option<Self> {
        match package_manager.to_ascii_lowercase().as_str() {
            "maven" | "gradle" | "jvm" => Some(Ecosystem::Jvm),
            "npm" | "yarn" | "pnpm" | "node" => Some(Ecosystem::Node),
            _ => None,
        }
    }

    /// Coordinates with a `group:artifact` shape are JVM, everything else is
    /// treated as a node package name.
    pub fn infer_from_name(name: &str) -> Self {
        if name.contains(':') {
            Ecosystem::Jvm
        } else {
            Ecosystem::Node
        }
    }
}

/// Detected format of a build file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ManifestFormat {
    #[serde(rename = "gradle-like")]
    Gradle,
    #[serde(rename = "maven-like")]
    Maven,
    #[serde(rename = "npm-like")]
    Npm,
    #[serde(rename = "dockerfile")]
    Dockerfile,
    #[serde(rename = "version-file")]
    VersionFile,
}

impl ManifestFormat {
    /// Only build manifests are rewritten; Dockerfiles and version files feed
    /// runtime detection.
    pub fn is_mutable(self) -> bool {
        matches!(
            self,
            ManifestFormat::Gradle | ManifestFormat::Maven | ManifestFormat::Npm
        )
    }

    pub fn ecosystem(self) -> Option<Ecosystem> {
        match self {
            ManifestFormat::Gradle | ManifestFormat::Maven => Some(Ecosystem::Jvm),
            ManifestFormat::Npm => Some(Ecosystem::Node),
            ManifestFormat::Dockerfile | ManifestFormat::VersionFile => None,
        }
    }

    /// Guesses the format from a file name.
    pub fn from_path(path: &str) -> Option<Self> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        match file_name {
            "pom.xml" => Some(ManifestFormat::Maven),
            "package.json" => Some(ManifestFormat::Npm),
            "build.gradle" | "build.gradle.kts" => Some(ManifestFormat::Gradle),
            ".java-version" | ".sdkmanrc" | ".tool-versions" => Some(ManifestFormat::VersionFile),
            name if name == "Dockerfile" || name.starts_with("Dockerfile.") => {
                Some(ManifestFormat::Dockerfile)
            }
            name if name.ends_with(".gradle") || name.ends_with(".gradle.kts") => {
                Some(ManifestFormat::Gradle)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManifestFormat::Gradle => "gradle-like",
            ManifestFormat::Maven => "maven-like",
            ManifestFormat::Npm => "npm-like",
            ManifestFormat::Dockerfile => "dockerfile",
            ManifestFormat::VersionFile => "version-file",
        };
        f.write_str(name)
    }
}

/// Raw manifest handed in by the repository collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInput {
    pub path: String,
    pub format: ManifestFormat,
    pub content: String,
}

impl ManifestInput {
    pub fn new(path: impl Into<String>, format: ManifestFormat, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format,
            content: content.into(),
        }
    }
}

/// Platform component whose upgrade a fix would force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeKind {
    Runtime,
    Framework,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredUpgrade {
    pub kind: UpgradeKind,
    pub current: String,
    pub required: String,
    pub description: String,
}

/// Emitted instead of an edit when a fix needs a platform-level upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MajorUpgradeRequirement {
    pub dependency_name: String,
    pub cve_id: String,
    pub recommended_version: String,
    pub requirements: Vec<RequiredUpgrade>,
}

/// Explains why a transitive fix was left to its parent's upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipAnnotation {
    pub dependency_name: String,
    pub cve_id: String,
    pub required_version: String,
    pub parent: String,
    pub parent_target_version: String,
}

impl fmt::Display for SkipAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) is resolved through {} upgraded to {} (requires >= {})",
            self.dependency_name,
            self.cve_id,
            self.parent,
            self.parent_target_version,
            self.required_version
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// No manifest could be chosen for the dependency.
    NoTarget,
    /// Every strategy declined or failed in every target manifest.
    StrategiesExhausted { attempts: Vec<String> },
    /// The resolved version is lower than what is already declared.
    WouldDowngrade { declared: String, resolved: String },
    /// Every target pair was already edited earlier in the run.
    AlreadyConstrained,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFix {
    pub dependency_name: String,
    pub cve_id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// A fix for which no target version could be found in any free-text source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedFix {
    pub dependency_name: String,
    pub cve_id: String,
    pub searched_sources: Vec<String>,
}
