//! Runtime and framework version detection.
//!
//! Runtime sources are ranked: explicit version files, then build manifests,
//! then container base images. The first tier that yields anything decides;
//! inside a tier the lowest major wins since every module must run on it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

use crate::model::{ManifestFormat, ManifestInput};
use crate::remediate::compat::CompatibilityTables;
use crate::remediate::formats::{self, static_regex};
use crate::remediate::traits::{Declaration, DeclarationKind};
use crate::version;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum RuntimeOrigin {
    Detected { path: String },
    /// Nothing was found; the configured conservative default applies.
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeVersion {
    pub major: u32,
    #[serde(flatten)]
    pub origin: RuntimeOrigin,
}

impl RuntimeVersion {
    pub fn is_detected(&self) -> bool {
        matches!(self.origin, RuntimeOrigin::Detected { .. })
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)
    }
}

/// Everything the gate and the resolver need to know about the platform.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeState {
    pub runtime_major: u32,
    /// Lowest declared version per family
    pub family_versions: BTreeMap<String, String>,
}

impl RuntimeState {
    pub fn family_version(&self, family: &str) -> Option<&str> {
        self.family_versions.get(family).map(String::as_str)
    }
}

static MAVEN_RUNTIME: OnceLock<Regex> = OnceLock::new();
static GRADLE_COMPATIBILITY: OnceLock<Regex> = OnceLock::new();
static GRADLE_TOOLCHAIN: OnceLock<Regex> = OnceLock::new();
static GRADLE_JVM_TARGET: OnceLock<Regex> = OnceLock::new();
static DOCKER_FROM: OnceLock<Regex> = OnceLock::new();

fn maven_patterns() -> Vec<&'static Regex> {
    vec![static_regex(
        &MAVEN_RUNTIME,
        r"<(?:java\.version|maven\.compiler\.(?:release|source|target)|release)>\s*(?P<v>1\.\d+|\d+)",
    )]
}

fn gradle_patterns() -> Vec<&'static Regex> {
    vec![
        static_regex(
            &GRADLE_COMPATIBILITY,
            r#"(?:sourceCompatibility|targetCompatibility)\s*=\s*['"]?(?:JavaVersion\.VERSION_)?(?P<v>1[._]\d+|\d+)"#,
        ),
        static_regex(
            &GRADLE_TOOLCHAIN,
            r"(?:JavaLanguageVersion\.of|jvmToolchain)\(\s*(?P<v>\d+)\s*\)",
        ),
        static_regex(
            &GRADLE_JVM_TARGET,
            r#"jvmTarget\s*(?:=|\.set\()\s*['"]?(?:JvmTarget\.JVM_)?(?P<v>1[._]\d+|\d+)"#,
        ),
    ]
}

fn docker_patterns() -> Vec<&'static Regex> {
    vec![static_regex(
        &DOCKER_FROM,
        r"(?im)^\s*FROM\s+(?:--platform=\S+\s+)?[\w./\-]*(?:openjdk|temurin|jdk|jre|corretto|zulu|java)[\w./\-]*:(?P<v>\d+(?:\.\d+)?)",
    )]
}

/// Major version from `17`, `17.0.2`, `1.8`, `1_8`, `temurin-21.0.1+12`.
pub(crate) fn parse_java_major(raw: &str) -> Option<u32> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let digits = raw[start..].replace('_', ".");
    let mut parts = digits.split(|c: char| !c.is_ascii_digit());
    let major: u32 = parts.next()?.parse().ok()?;
    if major == 1 {
        return parts.next().and_then(|minor| minor.parse().ok());
    }
    Some(major)
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn version_file_major(input: &ManifestInput) -> Option<u32> {
    match file_name(&input.path) {
        ".java-version" => input
            .content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .and_then(parse_java_major),
        ".sdkmanrc" => input
            .content
            .lines()
            .find_map(|line| line.trim().strip_prefix("java="))
            .and_then(parse_java_major),
        ".tool-versions" => input
            .content
            .lines()
            .find_map(|line| line.trim().strip_prefix("java "))
            .and_then(parse_java_major),
        _ => None,
    }
}

fn pattern_major(patterns: &[&Regex], content: &str) -> Option<u32> {
    patterns
        .iter()
        .flat_map(|regex| regex.captures_iter(content))
        .filter_map(|caps| caps.name("v").and_then(|m| parse_java_major(m.as_str())))
        .min()
}

/// Detects the runtime major version, falling back to `default_major`.
pub fn detect_runtime_version(manifests: &[ManifestInput], default_major: u32) -> RuntimeVersion {
    type Probe = fn(&ManifestInput) -> Option<u32>;
    let tiers: [Probe; 3] = [
        |input| match input.format {
            ManifestFormat::VersionFile => version_file_major(input),
            _ => None,
        },
        |input| match input.format {
            ManifestFormat::Maven => pattern_major(&maven_patterns(), &input.content),
            ManifestFormat::Gradle => pattern_major(&gradle_patterns(), &input.content),
            _ => None,
        },
        |input| match input.format {
            ManifestFormat::Dockerfile => pattern_major(&docker_patterns(), &input.content),
            _ => None,
        },
    ];

    for detect in tiers {
        let found = manifests
            .iter()
            .filter_map(|input| detect(input).map(|major| (major, input.path.as_str())))
            .min_by_key(|(major, _)| *major);
        if let Some((major, path)) = found {
            debug!(runtime = major, path = %path, "Detected runtime version");
            return RuntimeVersion {
                major,
                origin: RuntimeOrigin::Detected {
                    path: path.to_string(),
                },
            };
        }
    }

    debug!(runtime = default_major, "No runtime version found, using default");
    RuntimeVersion {
        major: default_major,
        origin: RuntimeOrigin::Default,
    }
}

/// Lowest declared version of every known family across the manifest set.
///
/// The module still on the oldest line is the one a major upgrade would
/// break, so it decides. Variable references are resolved against variables defined anywhere in
/// the set, first definition winning.
pub fn family_versions<'a, I>(declaration_sets: I, tables: &CompatibilityTables) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a [Declaration]>,
{
    let sets: Vec<&[Declaration]> = declaration_sets.into_iter().collect();
    let mut variables: BTreeMap<&str, &str> = BTreeMap::new();
    for decl in sets.iter().flat_map(|set| set.iter()) {
        if decl.kind == DeclarationKind::Variable {
            if let Some(value) = decl.value.as_deref() {
                variables.entry(decl.name.as_str()).or_insert(value);
            }
        }
    }

    let mut found: BTreeMap<String, String> = BTreeMap::new();
    let mut record = |family: &str, value: &str| {
        if !version::looks_like_version(value) {
            return;
        }
        let value = version::normalize(value);
        let entry = found.entry(family.to_string()).or_insert_with(|| value.to_string());
        if version::compare_versions(value, entry) == std::cmp::Ordering::Less {
            *entry = value.to_string();
        }
    };

    for decl in sets.iter().flat_map(|set| set.iter()) {
        if decl.kind == DeclarationKind::Variable {
            if let (Some(family), Some(value)) =
                (tables.family_for_variable(&decl.name), decl.value.as_deref())
            {
                record(&family.name, value);
            }
            continue;
        }
        let Some(family) = tables.family_of(&decl.name) else {
            continue;
        };
        let resolved = match (decl.version(), decl.variable_ref()) {
            (Some(literal), _) => Some(literal),
            (None, Some(variable)) => variables.get(variable).copied(),
            (None, None) => None,
        };
        if let Some(value) = resolved {
            record(&family.name, value);
        }
    }
    found
}

fn parse_all(manifests: &[ManifestInput]) -> Vec<Vec<Declaration>> {
    manifests
        .iter()
        .filter_map(|input| {
            let mutator = formats::mutator_for(input.format)?;
            mutator.parse(&input.path, &input.content).ok()
        })
        .collect()
}

/// Version of the configured framework umbrella family, if declared anywhere.
pub fn detect_framework_version(
    manifests: &[ManifestInput],
    tables: &CompatibilityTables,
) -> Option<String> {
    let parsed = parse_all(manifests);
    family_versions(parsed.iter().map(Vec::as_slice), tables).remove(&tables.framework_family)
}

/// Runtime plus family versions for a set of raw manifests.
pub fn detect_runtime_state(
    manifests: &[ManifestInput],
    tables: &CompatibilityTables,
    default_major: u32,
) -> RuntimeState {
    let parsed = parse_all(manifests);
    RuntimeState {
        runtime_major: detect_runtime_version(manifests, default_major).major,
        family_versions: family_versions(parsed.iter().map(Vec::as_slice), tables),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(path: &str, content: &str) -> ManifestInput {
        let format = ManifestFormat::from_path(path).unwrap();
        ManifestInput::new(path, format, content)
    }

    #[test]
    fn test_parse_java_major_variants() {
        assert_eq!(parse_java_major("17"), Some(17));
        assert_eq!(parse_java_major("1.8"), Some(8));
        assert_eq!(parse_java_major("1_8"), Some(8));
        assert_eq!(parse_java_major("temurin-21.0.1+12"), Some(21));
        assert_eq!(parse_java_major("17.0.2-tem"), Some(17));
        assert_eq!(parse_java_major("latest"), None);
    }

    #[test]
    fn test_version_files_outrank_build_files() {
        let manifests = vec![
            input("pom.xml", "<project><properties><java.version>11</java.version></properties></project>"),
            input(".sdkmanrc", "# sdkman\njava=17.0.2-tem\n"),
        ];
        let runtime = detect_runtime_version(&manifests, 8);
        assert_eq!(runtime.major, 17);
        assert_eq!(
            runtime.origin,
            RuntimeOrigin::Detected {
                path: ".sdkmanrc".to_string()
            }
        );
    }

    #[test]
    fn test_lowest_build_runtime_wins() {
        let manifests = vec![
            input("api/build.gradle", "java {\n    sourceCompatibility = JavaVersion.VERSION_17\n}\n"),
            input("core/build.gradle.kts", "kotlin {\n    jvmToolchain(11)\n}\n"),
            input("Dockerfile", "FROM eclipse-temurin:21-jre\n"),
        ];
        assert_eq!(detect_runtime_version(&manifests, 8).major, 11);
    }

    #[test]
    fn test_dockerfile_and_default() {
        let docker = vec![input("Dockerfile", "FROM --platform=linux/amd64 openjdk:11-jre-slim\nCOPY . /app\n")];
        assert_eq!(detect_runtime_version(&docker, 8).major, 11);

        let none = vec![input("package.json", "{}")];
        let runtime = detect_runtime_version(&none, 8);
        assert_eq!(runtime.major, 8);
        assert!(!runtime.is_detected());
    }

    #[test]
    fn test_framework_version_from_parent_and_variables() {
        let tables = CompatibilityTables::builtin().unwrap();
        let pom = r#"<project>
    <parent>
        <groupId>org.springframework.boot</groupId>
        <artifactId>spring-boot-starter-parent</artifactId>
        <version>2.7.18</version>
    </parent>
</project>
"#;
        let gradle = r#"ext {
    springVersion = '5.3.31'
}
plugins {
    id 'org.springframework.boot' version '2.6.3'
}
dependencies {
    implementation "org.springframework:spring-web:${springVersion}"
}
"#;
        let manifests = vec![input("pom.xml", pom), input("app/build.gradle", gradle)];
        assert_eq!(
            detect_framework_version(&manifests, &tables).as_deref(),
            Some("2.6.3")
        );

        let state = detect_runtime_state(&manifests, &tables, 8);
        assert_eq!(state.family_version("spring-framework"), Some("5.3.31"));
        assert_eq!(state.runtime_major, 8);
    }

    #[test]
    fn test_lowest_family_version_across_modules() {
        let tables = CompatibilityTables::builtin().unwrap();
        let module = |version: &str| {
            format!(
                "dependencies {{\n    implementation 'org.springframework:spring-core:{}'\n}}\n",
                version
            )
        };
        let mut manifests = vec![
            input("api/build.gradle", &module("6.1.0")),
            input("legacy/build.gradle", &module("5.3.20")),
            input("web/build.gradle", &module("6.0.5")),
        ];
        let state = detect_runtime_state(&manifests, &tables, 17);
        assert_eq!(state.family_version("spring-framework"), Some("5.3.20"));

        manifests.reverse();
        let state = detect_runtime_state(&manifests, &tables, 17);
        assert_eq!(state.family_version("spring-framework"), Some("5.3.20"));
    }
}
