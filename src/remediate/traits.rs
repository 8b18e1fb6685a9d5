//! Core traits and types for manifest mutation.
//!
//! This module defines the capability contract every manifest dialect has to
//! satisfy to take part in remediation:
//! - Parsing a build file into [`Declaration`]s via [`ManifestMutator::parse`]
//! - Single textual edits that preserve every unrelated byte
//! - A cheap structural check via [`ManifestMutator::validate`]
//! - Standardized error handling

use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

use crate::model::ManifestFormat;
use crate::version;

// ============================================================================
// Mutator Trait
// ============================================================================

/// Abstraction over one manifest dialect (gradle-like, maven-like, npm-like).
///
/// Implementations are stateless. Every edit takes the current text and
/// returns the complete new text; the caller decides whether to commit it.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` so manifests can be parsed on
/// the blocking pool ahead of the fix loop.
pub trait ManifestMutator: Send + Sync {
    /// Returns the dialect this mutator handles.
    fn format(&self) -> ManifestFormat;

    /// Extracts dependency, plugin, variable and constraint declarations.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Malformed`] when the text cannot be scanned at
    /// all (e.g. unbalanced markup that hides declaration boundaries).
    fn parse(&self, path: &str, content: &str) -> Result<Vec<Declaration>, ParseError>;

    /// Renders the literal written in place of `old_value` for `version`.
    ///
    /// Default implementation writes the bare version.
    fn render_version(
        &self,
        declaration: &Declaration,
        version: &str,
    ) -> Result<String, MutationError> {
        let _ = declaration;
        Ok(version.to_string())
    }

    /// Replaces the declared value of `declaration` with `version`.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::MissingValue`] when the declaration carries no
    /// editable value, or whatever [`render_version`](Self::render_version)
    /// rejects.
    fn set_version(
        &self,
        content: &str,
        declaration: &Declaration,
        version: &str,
    ) -> Result<String, MutationError> {
        let span = declaration
            .value_span
            .clone()
            .ok_or_else(|| MutationError::MissingValue {
                name: declaration.name.clone(),
            })?;
        let rendered = self.render_version(declaration, version)?;
        splice(content, span, &rendered)
    }

    /// Rewrites a hardcoded version into a reference to `variable`.
    ///
    /// Default implementation reports the edit as unsupported.
    fn substitute_variable(
        &self,
        path: &str,
        content: &str,
        declaration: &Declaration,
        variable: &str,
    ) -> Result<String, MutationError> {
        let _ = (path, content, declaration, variable);
        Err(MutationError::Unsupported {
            format: self.format(),
            edit: "variable substitution",
        })
    }

    /// Adds a constraint/override pinning a transitive dependency.
    fn add_constraint(
        &self,
        path: &str,
        content: &str,
        request: &ConstraintRequest,
    ) -> Result<String, MutationError>;

    /// Structural sanity check of fully mutated text.
    fn validate(&self, path: &str, content: &str) -> ValidationReport;
}

/// Replaces `span` inside `content`, refusing spans that do not fall on
/// character boundaries.
pub fn splice(content: &str, span: Range<usize>, replacement: &str) -> Result<String, MutationError> {
    if span.start > span.end
        || span.end > content.len()
        || !content.is_char_boundary(span.start)
        || !content.is_char_boundary(span.end)
    {
        return Err(MutationError::AnchorNotFound(format!(
            "span {}..{} outside document",
            span.start, span.end
        )));
    }
    let mut out = String::with_capacity(content.len() + replacement.len());
    out.push_str(&content[..span.start]);
    out.push_str(replacement);
    out.push_str(&content[span.end..]);
    Ok(out)
}

/// A transitive pin to be inserted into a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintRequest {
    pub name: String,
    pub version: String,
    pub reason: String,
}

// ============================================================================
// Declarations
// ============================================================================

/// Classification of a parsed declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationKind {
    /// Ordinary dependency declaration
    Dependency,

    /// Build plugin with its own version
    Plugin,

    /// Named version variable / property
    Variable,

    /// Version pin that does not declare the dependency itself
    /// (`constraints {}`, `<dependencyManagement>`, `overrides`)
    Constraint,

    /// Maven `<parent>` coordinate
    Parent,
}

impl DeclarationKind {
    /// Kinds that declare a dependency in the manifest's own right.
    pub fn is_direct(self) -> bool {
        matches!(
            self,
            DeclarationKind::Dependency | DeclarationKind::Parent | DeclarationKind::Plugin
        )
    }
}

/// One declaration found in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: DeclarationKind,

    /// Coordinate (`group:artifact`), package name, plugin id or variable name
    pub name: String,

    /// Declared value as written, `None` when the version is managed elsewhere
    pub value: Option<String>,

    /// 1-based line of the value (or of the declaration when it has none)
    pub line_number: usize,

    /// Full text of that line
    pub line: String,

    /// Byte span of the value inside the manifest text
    pub value_span: Option<Range<usize>>,

    /// Byte span of the enclosing quoted literal, for dialects that need to
    /// requote when rewriting
    pub literal_span: Option<Range<usize>>,
}

impl Declaration {
    /// Name of the variable this declaration's value refers to, if any.
    ///
    /// Understands `${name}`, `$name` and bare identifiers, and drops the
    /// `ext.`/`rootProject.` scoping prefixes.
    pub fn variable_ref(&self) -> Option<&str> {
        let value = self.value.as_deref()?.trim();
        let inner = if let Some(rest) = value.strip_prefix("${") {
            rest.strip_suffix('}')?
        } else if let Some(rest) = value.strip_prefix('$') {
            rest
        } else if value.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
            && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            && !DYNAMIC_VERSIONS
                .iter()
                .any(|keyword| keyword.eq_ignore_ascii_case(value))
        {
            value
        } else {
            return None;
        };
        if inner.is_empty()
            || !inner
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return None;
        }
        Some(strip_scope(inner))
    }

    /// Normalized version when the value is a literal version.
    pub fn version(&self) -> Option<&str> {
        let value = self.value.as_deref()?;
        if self.variable_ref().is_some() || !version::looks_like_version(value) {
            return None;
        }
        Some(version::normalize(value))
    }
}

/// Dynamic version keywords that are not variable names.
const DYNAMIC_VERSIONS: [&str; 5] = [
    "latest",
    "release",
    "latest.release",
    "latest.integration",
    "snapshot",
];

fn strip_scope(name: &str) -> &str {
    const SCOPES: [&str; 5] = ["rootProject.ext.", "project.ext.", "rootProject.", "ext.", "extra."];
    SCOPES
        .iter()
        .find_map(|scope| name.strip_prefix(scope))
        .unwrap_or(name)
}

// ============================================================================
// Validation Report
// ============================================================================

/// Report from post-edit structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Manifest path
    pub path: String,

    /// Whether validation passed
    pub valid: bool,

    /// Human-readable validation messages
    pub messages: Vec<String>,
}

impl ValidationReport {
    /// Creates a report indicating successful validation.
    pub fn valid(path: &str) -> Self {
        Self {
            path: path.to_string(),
            valid: true,
            messages: Vec::new(),
        }
    }

    /// Creates a report indicating validation failure.
    pub fn invalid(path: &str, messages: Vec<String>) -> Self {
        Self {
            path: path.to_string(),
            valid: false,
            messages,
        }
    }

    /// Valid when `messages` is empty, invalid otherwise.
    pub fn from_messages(path: &str, messages: Vec<String>) -> Self {
        if messages.is_empty() {
            Self::valid(path)
        } else {
            Self::invalid(path, messages)
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while parsing a manifest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Text could not be scanned
    #[error("Failed to parse {path}: {message}")]
    Malformed { path: String, message: String },

    /// Dockerfiles and version files are detection inputs only
    #[error("Format {0} is not a mutable manifest")]
    NotMutable(ManifestFormat),

    /// Blocking parse task did not complete
    #[error("Parse task failed for {path}: {message}")]
    Task { path: String, message: String },
}

/// Errors that can occur while mutating a manifest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Declaration has no version to rewrite
    #[error("Declaration '{name}' has no editable value")]
    MissingValue { name: String },

    /// Value is a git URL, tag, path, wildcard or similar
    #[error("Declaration '{name}' uses a non-version specifier '{value}'")]
    NonVersionSpecifier { name: String, value: String },

    /// Dialect cannot express the edit
    #[error("{format} manifests do not support {edit}")]
    Unsupported {
        format: ManifestFormat,
        edit: &'static str,
    },

    /// Referenced variable is not defined anywhere
    #[error("Variable '{0}' is not defined in any manifest")]
    VariableUndefined(String),

    /// No insertion point for the edit
    #[error("No anchor for edit: {0}")]
    AnchorNotFound(String),

    /// Re-parsing the edited text did not show the expected value
    #[error("Edit of '{name}' is inconsistent: expected {expected}, found {found:?}")]
    Inconsistent {
        name: String,
        expected: String,
        found: Option<String>,
    },
}

// ============================================================================
// Tests
// ============================================================================
