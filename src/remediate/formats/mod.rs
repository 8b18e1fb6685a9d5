//! Manifest dialect implementations.
//!
//! Each submodule implements [`ManifestMutator`](crate::remediate::ManifestMutator)
//! for one format family:
//! - `gradle` - Groovy and Kotlin DSL build scripts
//! - `maven` - `pom.xml`
//! - `npm` - `package.json`

pub mod gradle;
pub mod maven;
pub mod npm;

use regex::Regex;
use std::sync::OnceLock;

use crate::model::ManifestFormat;
use crate::remediate::traits::ManifestMutator;

static GRADLE: gradle::GradleMutator = gradle::GradleMutator;
static MAVEN: maven::MavenMutator = maven::MavenMutator;
static NPM: npm::NpmMutator = npm::NpmMutator;

/// Mutator for a format, `None` for read-only formats.
pub fn mutator_for(format: ManifestFormat) -> Option<&'static dyn ManifestMutator> {
    match format {
        ManifestFormat::Gradle => Some(&GRADLE),
        ManifestFormat::Maven => Some(&MAVEN),
        ManifestFormat::Npm => Some(&NPM),
        ManifestFormat::Dockerfile | ManifestFormat::VersionFile => None,
    }
}

/// Compiles a hardcoded pattern once.
pub(crate) fn static_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("hardcoded pattern compiles"))
}

/// 1-based line number and text of the line holding byte `offset`.
pub(crate) fn line_at(content: &str, offset: usize) -> (usize, String) {
    let offset = offset.min(content.len());
    let start = content[..offset].rfind('\n').map(|idx| idx + 1).unwrap_or(0);
    let end = content[offset..]
        .find('\n')
        .map(|idx| offset + idx)
        .unwrap_or(content.len());
    let number = content[..start].matches('\n').count() + 1;
    let text = content[start..end].trim_end_matches('\r').to_string();
    (number, text)
}

/// Byte offset where the line holding `offset` starts.
pub(crate) fn line_start(content: &str, offset: usize) -> usize {
    content[..offset.min(content.len())]
        .rfind('\n')
        .map(|idx| idx + 1)
        .unwrap_or(0)
}

pub(crate) fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

/// Indentation unit used by the file, falling back to `default`.
pub(crate) fn indent_unit(content: &str, default: &str) -> String {
    content
        .lines()
        .map(leading_whitespace)
        .filter(|indent| !indent.is_empty())
        .min_by_key(|indent| indent.len())
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn line_ending(content: &str) -> &'static str {
    if content.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_at_reports_number_and_text() {
        let content = "one\n  two\nthree";
        assert_eq!(line_at(content, 6), (2, "  two".to_string()));
        assert_eq!(line_at(content, 0), (1, "one".to_string()));
        assert_eq!(line_at(content, content.len()), (3, "three".to_string()));
    }

    #[test]
    fn test_indent_unit_detection() {
        assert_eq!(indent_unit("a {\n  b\n    c\n}", "    "), "  ");
        assert_eq!(indent_unit("flat", "    "), "    ");
        assert_eq!(indent_unit("a {\n\tb\n}", "    "), "\t");
    }

    #[test]
    fn test_only_build_manifests_have_mutators() {
        assert!(mutator_for(ManifestFormat::Maven).is_some());
        assert!(mutator_for(ManifestFormat::Dockerfile).is_none());
        assert_eq!(
            mutator_for(ManifestFormat::Npm).map(|m| m.format()),
            Some(ManifestFormat::Npm)
        );
    }
}
