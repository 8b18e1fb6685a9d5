//! Parsed manifest with its append-only edit log.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ManifestFormat, ManifestInput};
use crate::remediate::formats;
use crate::remediate::traits::{
    Declaration, DeclarationKind, ManifestMutator, MutationError, ParseError,
};
use crate::version;

/// What an edit changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    DependencyVersion,
    PluginVersion,
    VariableValue,
    VariableSubstitution,
    ConstraintAdded,
    ConstraintUpdated,
}

/// One applied modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditEntry {
    pub kind: EditKind,
    /// Declaration the edit was aimed at (dependency, plugin or variable name)
    pub subject: String,
    pub subject_kind: DeclarationKind,
    pub line_number: usize,
    pub old_line: String,
    pub new_line: String,
    /// Value the subject must carry after the edit
    pub new_value: String,
    pub cve_id: String,
    pub comment: String,
}

/// What the re-parsed text has to show for an edit to count as applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// The subject's value normalizes to this version.
    Version(String),
    /// The subject's value refers to this variable.
    VariableRef(String),
}

impl Expectation {
    fn holds(&self, declaration: &Declaration) -> bool {
        match self {
            Expectation::Version(expected) => declaration
                .value
                .as_deref()
                .map(|value| version::normalize(value) == version::normalize(expected))
                .unwrap_or(false),
            Expectation::VariableRef(variable) => {
                declaration.variable_ref() == Some(variable.as_str())
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Expectation::Version(version) => version.clone(),
            Expectation::VariableRef(variable) => format!("${{{}}}", variable),
        }
    }
}

/// An edit computed by a strategy but not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedEdit {
    /// Manifest the new text belongs to
    pub path: String,
    pub kind: EditKind,
    pub subject: String,
    pub subject_kind: DeclarationKind,
    pub expectation: Expectation,
    pub line_number: usize,
    pub old_line: String,
    pub new_content: String,
    pub comment: String,
}

/// One build file for the duration of a run.
///
/// Text and declarations only change together through [`apply`](Self::apply).
#[derive(Clone)]
pub struct ManifestDocument {
    mutator: &'static dyn ManifestMutator,
    path: String,
    format: ManifestFormat,
    original: String,
    content: String,
    declarations: Vec<Declaration>,
    edits: Vec<EditEntry>,
}

impl ManifestDocument {
    /// Parses a mutable manifest.
    ///
    /// # Errors
    ///
    /// [`ParseError::NotMutable`] for Dockerfiles and version files, or the
    /// dialect's own parse error.
    pub fn parse(input: &ManifestInput) -> Result<Self, ParseError> {
        let mutator =
            formats::mutator_for(input.format).ok_or(ParseError::NotMutable(input.format))?;
        let declarations = mutator.parse(&input.path, &input.content)?;
        debug!(
            path = %input.path,
            format = %input.format,
            declarations = declarations.len(),
            "Parsed manifest"
        );
        Ok(Self {
            mutator,
            path: input.path.clone(),
            format: input.format,
            original: input.content.clone(),
            content: input.content.clone(),
            declarations,
            edits: Vec::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn format(&self) -> ManifestFormat {
        self.format
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn edits(&self) -> &[EditEntry] {
        &self.edits
    }

    pub fn is_modified(&self) -> bool {
        !self.edits.is_empty()
    }

    pub fn mutator(&self) -> &'static dyn ManifestMutator {
        self.mutator
    }

    /// Number of directories above the manifest.
    pub fn depth(&self) -> usize {
        self.path.matches('/').count()
    }

    pub fn variable(&self, name: &str) -> Option<&Declaration> {
        self.declarations
            .iter()
            .find(|decl| decl.kind == DeclarationKind::Variable && decl.name == name)
    }

    /// Commits `edit` if the re-parsed text shows the expected value.
    ///
    /// On error neither the text nor the declarations change.
    pub fn apply(&mut self, edit: ProposedEdit, cve_id: &str) -> Result<&EditEntry, MutationError> {
        let reparsed = self
            .mutator
            .parse(&self.path, &edit.new_content)
            .map_err(|err| MutationError::Inconsistent {
                name: edit.subject.clone(),
                expected: edit.expectation.describe(),
                found: Some(err.to_string()),
            })?;

        let landed = reparsed
            .iter()
            .filter(|decl| decl.kind == edit.subject_kind && decl.name == edit.subject)
            .find(|decl| edit.expectation.holds(decl))
            .ok_or_else(|| MutationError::Inconsistent {
                name: edit.subject.clone(),
                expected: edit.expectation.describe(),
                found: reparsed
                    .iter()
                    .find(|decl| decl.kind == edit.subject_kind && decl.name == edit.subject)
                    .and_then(|decl| decl.value.clone()),
            })?;

        let entry = EditEntry {
            kind: edit.kind,
            subject: edit.subject.clone(),
            subject_kind: edit.subject_kind,
            line_number: landed.line_number,
            old_line: edit.old_line,
            new_line: landed.line.clone(),
            new_value: landed.value.clone().unwrap_or_default(),
            cve_id: cve_id.to_string(),
            comment: edit.comment,
        };

        self.content = edit.new_content;
        self.declarations = reparsed;
        self.edits.push(entry);
        Ok(&self.edits[self.edits.len() - 1])
    }

    /// Checks that every logged edit is still reflected by the declarations.
    ///
    /// Only the last edit per subject is checked; earlier ones may have been
    /// superseded within the run.
    pub fn check_consistency(&self) -> Result<(), MutationError> {
        for (idx, entry) in self.edits.iter().enumerate() {
            let superseded = self.edits[idx + 1..]
                .iter()
                .any(|later| later.subject == entry.subject && later.subject_kind == entry.subject_kind);
            if superseded {
                continue;
            }
            let holds = self.declarations.iter().any(|decl| {
                decl.kind == entry.subject_kind
                    && decl.name == entry.subject
                    && decl.value.as_deref() == Some(entry.new_value.as_str())
            });
            if !holds {
                return Err(MutationError::Inconsistent {
                    name: entry.subject.clone(),
                    expected: entry.new_value.clone(),
                    found: None,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ManifestDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestDocument")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("declarations", &self.declarations.len())
            .field("edits", &self.edits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POM: &str = r#"<project>
    <properties>
        <lib.version>1.0.0</lib.version>
    </properties>
    <dependencies>
        <dependency>
            <groupId>com.example</groupId>
            <artifactId>lib</artifactId>
            <version>1.2.0</version>
        </dependency>
    </dependencies>
</project>
"#;

    fn document() -> ManifestDocument {
        ManifestDocument::parse(&ManifestInput::new("pom.xml", ManifestFormat::Maven, POM)).unwrap()
    }

    #[test]
    fn test_read_only_formats_are_rejected() {
        let input = ManifestInput::new("Dockerfile", ManifestFormat::Dockerfile, "FROM openjdk:11");
        assert_eq!(
            ManifestDocument::parse(&input).unwrap_err(),
            ParseError::NotMutable(ManifestFormat::Dockerfile)
        );
    }

    #[test]
    fn test_apply_updates_text_and_declarations_together() {
        let mut doc = document();
        let decl = doc
            .declarations()
            .iter()
            .find(|d| d.name == "com.example:lib")
            .cloned()
            .unwrap();
        let new_content = doc.mutator().set_version(doc.content(), &decl, "1.5.0").unwrap();
        let entry = doc
            .apply(
                ProposedEdit {
                    path: "pom.xml".to_string(),
                    kind: EditKind::DependencyVersion,
                    subject: decl.name.clone(),
                    subject_kind: DeclarationKind::Dependency,
                    expectation: Expectation::Version("1.5.0".to_string()),
                    line_number: decl.line_number,
                    old_line: decl.line.clone(),
                    new_content,
                    comment: "bump".to_string(),
                },
                "CVE-2024-0001",
            )
            .unwrap()
            .clone();

        assert_eq!(entry.new_line.trim(), "<version>1.5.0</version>");
        assert_eq!(entry.cve_id, "CVE-2024-0001");
        assert!(doc.content().contains("<version>1.5.0</version>"));
        assert!(doc.check_consistency().is_ok());
        // Unrelated declarations are untouched.
        assert_eq!(doc.variable("lib.version").unwrap().value.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_apply_rejects_edit_that_did_not_land() {
        let mut doc = document();
        let before = doc.content().to_string();
        let result = doc.apply(
            ProposedEdit {
                path: "pom.xml".to_string(),
                kind: EditKind::DependencyVersion,
                subject: "com.example:lib".to_string(),
                subject_kind: DeclarationKind::Dependency,
                expectation: Expectation::Version("9.9.9".to_string()),
                line_number: 9,
                old_line: String::new(),
                new_content: before.clone(),
                comment: String::new(),
            },
            "CVE-2024-0001",
        );

        assert!(matches!(result, Err(MutationError::Inconsistent { .. })));
        assert_eq!(doc.content(), before);
        assert!(doc.edits().is_empty());
    }
}
