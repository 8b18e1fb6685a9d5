//! Fix strategies.
//!
//! Each strategy looks at one target manifest (plus the rest of the
//! workspace for variable definitions) and either proposes a single edit or
//! declines. The engine walks [`default_chain`] in order and stops at the
//! first proposal that commits.

use crate::model::ConsolidatedFix;
use crate::remediate::compat::FamilySpec;
use crate::remediate::document::{EditKind, Expectation, ManifestDocument, ProposedEdit};
use crate::remediate::matcher::same_coordinate;
use crate::remediate::traits::{ConstraintRequest, Declaration, DeclarationKind, MutationError};
use crate::version;

/// Everything a strategy needs to know about the fix being applied.
#[derive(Debug, Clone, Copy)]
pub struct FixRequest<'a> {
    pub fix: &'a ConsolidatedFix,
    pub family: Option<&'a FamilySpec>,
    /// Some manifest declares the dependency directly with a version
    pub declared_directly: bool,
    pub allow_constraints: bool,
}

impl FixRequest<'_> {
    fn target(&self) -> &str {
        &self.fix.target_version
    }

    fn comment(&self, action: &str) -> String {
        format!(
            "{} {} to {} ({})",
            action, self.fix.dependency_name, self.fix.target_version, self.fix.cve_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Proposed(ProposedEdit),
    /// The manifest already carries the target version or higher.
    AlreadySatisfied { declared: String },
    NotApplicable,
    Failed(MutationError),
}

pub trait FixStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn attempt(
        &self,
        target: &ManifestDocument,
        workspace: &[ManifestDocument],
        request: &FixRequest<'_>,
    ) -> StrategyOutcome;
}

/// Strategies in the order they are tried.
pub fn default_chain() -> Vec<Box<dyn FixStrategy>> {
    vec![
        Box::new(DirectDependencyEdit),
        Box::new(PluginEdit),
        Box::new(VariableEdit),
        Box::new(VariableSubstitution),
        Box::new(TransitiveConstraint),
    ]
}

// ============================================================================
// Shared helpers
// ============================================================================

fn matching<'d>(
    document: &'d ManifestDocument,
    name: &str,
    kinds: &[DeclarationKind],
) -> Vec<&'d Declaration> {
    document
        .declarations()
        .iter()
        .filter(|decl| kinds.contains(&decl.kind) && same_coordinate(&decl.name, name))
        .collect()
}

/// Gradle plugin marker artifacts are published as `<id>:<id>.gradle.plugin`.
pub(crate) fn is_plugin_marker(plugin_id: &str, dependency_name: &str) -> bool {
    dependency_name
        .split_once(':')
        .is_some_and(|(group, artifact)| {
            group == plugin_id && artifact == format!("{}.gradle.plugin", plugin_id)
        })
}

fn camel_case(artifact: &str) -> String {
    let mut out = String::with_capacity(artifact.len());
    let mut upper = false;
    for c in artifact.chars() {
        if matches!(c, '-' | '.' | '_') {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Conventional variable names that could hold the dependency's version.
pub fn candidate_variables(dependency_name: &str, family: Option<&FamilySpec>) -> Vec<String> {
    let artifact = dependency_name.rsplit(':').next().unwrap_or(dependency_name);
    let artifact = artifact.rsplit('/').next().unwrap_or(artifact);
    let mut names: Vec<String> = family.map(|f| f.variables.clone()).unwrap_or_default();
    for name in [
        format!("{}.version", artifact),
        format!("{}Version", camel_case(artifact)),
        format!("{}_version", artifact.replace(['-', '.'], "_")),
    ] {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Definition of `variable` visible from `target`: the target itself first,
/// then manifests of the same format from the shallowest down.
pub fn find_variable<'w>(
    target: &'w ManifestDocument,
    workspace: &'w [ManifestDocument],
    variable: &str,
) -> Option<(&'w ManifestDocument, &'w Declaration)> {
    if let Some(decl) = target.variable(variable) {
        return Some((target, decl));
    }
    let mut others: Vec<&ManifestDocument> = workspace
        .iter()
        .filter(|doc| doc.format() == target.format() && doc.path() != target.path())
        .collect();
    others.sort_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.path().cmp(b.path())));
    others
        .into_iter()
        .find_map(|doc| doc.variable(variable).map(|decl| (doc, decl)))
}

/// Rewrites every literal declaration below the target in one edit.
fn edit_literals(
    target: &ManifestDocument,
    decls: &[&Declaration],
    request: &FixRequest<'_>,
    kind: EditKind,
    action: &str,
) -> StrategyOutcome {
    let versioned: Vec<&Declaration> = decls.iter().copied().filter(|decl| decl.value.is_some()).collect();
    if versioned.is_empty() || versioned.iter().any(|decl| decl.variable_ref().is_some()) {
        return StrategyOutcome::NotApplicable;
    }

    let mut stale: Vec<&Declaration> = versioned
        .iter()
        .copied()
        .filter(|decl| {
            decl.version()
                .map_or(true, |declared| !version::satisfies(declared, request.target()))
        })
        .collect();
    if stale.is_empty() {
        let declared = versioned
            .iter()
            .filter_map(|decl| decl.version())
            .min_by(|a, b| version::compare_versions(a, b))
            .unwrap_or_default()
            .to_string();
        return StrategyOutcome::AlreadySatisfied { declared };
    }

    // Later spans first so earlier offsets stay valid.
    stale.sort_by_key(|decl| std::cmp::Reverse(decl.value_span.as_ref().map_or(0, |span| span.start)));
    let mut content = target.content().to_string();
    for decl in &stale {
        content = match target.mutator().set_version(&content, decl, request.target()) {
            Ok(updated) => updated,
            Err(err) => return StrategyOutcome::Failed(err),
        };
    }

    let first = stale[stale.len() - 1];
    StrategyOutcome::Proposed(ProposedEdit {
        path: target.path().to_string(),
        kind,
        subject: first.name.clone(),
        subject_kind: first.kind,
        expectation: Expectation::Version(request.target().to_string()),
        line_number: first.line_number,
        old_line: first.line.clone(),
        new_content: content,
        comment: request.comment(action),
    })
}

/// Whether `variable` belongs to the dependency being fixed.
///
/// A family variable always does. Any other candidate must already be
/// referenced by a declaration from the same group, so an unrelated
/// library's `core.version` is never borrowed.
fn owns_variable(
    target: &ManifestDocument,
    workspace: &[ManifestDocument],
    request: &FixRequest<'_>,
    variable: &str,
) -> bool {
    if request.family.is_some_and(|f| f.variables.iter().any(|v| v == variable)) {
        return true;
    }
    let group = match request.fix.dependency_name.split_once(':') {
        Some((group, _)) if !group.is_empty() => group,
        _ => return false,
    };
    std::iter::once(target)
        .chain(workspace.iter().filter(|doc| doc.format() == target.format()))
        .flat_map(|doc| doc.declarations())
        .any(|decl| {
            decl.variable_ref() == Some(variable)
                && decl.name.split_once(':').is_some_and(|(g, _)| g == group)
        })
}

/// A defined variable owned by the dependency that already holds a
/// satisfying version.
fn satisfying_variable<'w>(
    target: &'w ManifestDocument,
    workspace: &'w [ManifestDocument],
    request: &FixRequest<'_>,
) -> Option<(String, &'w Declaration)> {
    candidate_variables(&request.fix.dependency_name, request.family)
        .into_iter()
        .filter(|name| owns_variable(target, workspace, request, name))
        .find_map(|name| {
            let (_, decl) = find_variable(target, workspace, &name)?;
            let value = decl.version()?;
            version::satisfies(value, request.target()).then_some((name, decl))
        })
}

// ============================================================================
// Strategies
// ============================================================================

/// Updates a hardcoded version on a dependency (or maven parent) declaration.
pub struct DirectDependencyEdit;

impl FixStrategy for DirectDependencyEdit {
    fn name(&self) -> &'static str {
        "direct-dependency"
    }

    fn attempt(
        &self,
        target: &ManifestDocument,
        workspace: &[ManifestDocument],
        request: &FixRequest<'_>,
    ) -> StrategyOutcome {
        let decls = matching(
            target,
            &request.fix.dependency_name,
            &[DeclarationKind::Dependency, DeclarationKind::Parent],
        );
        if decls.is_empty() {
            return StrategyOutcome::NotApplicable;
        }
        let below_target = decls.iter().any(|decl| {
            decl.version()
                .is_some_and(|declared| !version::satisfies(declared, request.target()))
        });
        // A variable that already carries the fix is better referenced than duplicated.
        if below_target && satisfying_variable(target, workspace, request).is_some() {
            return StrategyOutcome::NotApplicable;
        }
        edit_literals(target, &decls, request, EditKind::DependencyVersion, "Upgrade")
    }
}

/// Updates the version of a build plugin with the dependency's identity.
pub struct PluginEdit;

impl FixStrategy for PluginEdit {
    fn name(&self) -> &'static str {
        "plugin"
    }

    fn attempt(
        &self,
        target: &ManifestDocument,
        _workspace: &[ManifestDocument],
        request: &FixRequest<'_>,
    ) -> StrategyOutcome {
        let name = &request.fix.dependency_name;
        let decls: Vec<&Declaration> = target
            .declarations()
            .iter()
            .filter(|decl| {
                decl.kind == DeclarationKind::Plugin
                    && (same_coordinate(&decl.name, name) || is_plugin_marker(&decl.name, name))
            })
            .collect();
        if decls.is_empty() {
            return StrategyOutcome::NotApplicable;
        }
        edit_literals(target, &decls, request, EditKind::PluginVersion, "Upgrade plugin")
    }
}

/// Raises the variable a declaration already refers to.
pub struct VariableEdit;

impl FixStrategy for VariableEdit {
    fn name(&self) -> &'static str {
        "variable"
    }

    fn attempt(
        &self,
        target: &ManifestDocument,
        workspace: &[ManifestDocument],
        request: &FixRequest<'_>,
    ) -> StrategyOutcome {
        let decls = matching(
            target,
            &request.fix.dependency_name,
            &[
                DeclarationKind::Dependency,
                DeclarationKind::Parent,
                DeclarationKind::Plugin,
                DeclarationKind::Constraint,
            ],
        );
        let Some(variable) = decls.iter().find_map(|decl| decl.variable_ref()) else {
            return StrategyOutcome::NotApplicable;
        };
        let Some((owner, definition)) = find_variable(target, workspace, variable) else {
            return StrategyOutcome::Failed(MutationError::VariableUndefined(variable.to_string()));
        };
        if let Some(declared) = definition.version() {
            if version::satisfies(declared, request.target()) {
                return StrategyOutcome::AlreadySatisfied {
                    declared: declared.to_string(),
                };
            }
        }
        match owner
            .mutator()
            .set_version(owner.content(), definition, request.target())
        {
            Ok(new_content) => StrategyOutcome::Proposed(ProposedEdit {
                path: owner.path().to_string(),
                kind: EditKind::VariableValue,
                subject: definition.name.clone(),
                subject_kind: DeclarationKind::Variable,
                expectation: Expectation::Version(request.target().to_string()),
                line_number: definition.line_number,
                old_line: definition.line.clone(),
                new_content,
                comment: request.comment(&format!("Set {} for", variable)),
            }),
            Err(err) => StrategyOutcome::Failed(err),
        }
    }
}

/// Points a hardcoded declaration at a variable that already holds a
/// satisfying version.
pub struct VariableSubstitution;

impl FixStrategy for VariableSubstitution {
    fn name(&self) -> &'static str {
        "variable-substitution"
    }

    fn attempt(
        &self,
        target: &ManifestDocument,
        workspace: &[ManifestDocument],
        request: &FixRequest<'_>,
    ) -> StrategyOutcome {
        let decls = matching(
            target,
            &request.fix.dependency_name,
            &[DeclarationKind::Dependency, DeclarationKind::Plugin],
        );
        let Some(decl) = decls.iter().find(|decl| {
            decl.version()
                .is_some_and(|declared| !version::satisfies(declared, request.target()))
        }) else {
            return StrategyOutcome::NotApplicable;
        };
        let Some((variable, _)) = satisfying_variable(target, workspace, request) else {
            return StrategyOutcome::NotApplicable;
        };
        match target
            .mutator()
            .substitute_variable(target.path(), target.content(), decl, &variable)
        {
            Ok(new_content) => StrategyOutcome::Proposed(ProposedEdit {
                path: target.path().to_string(),
                kind: EditKind::VariableSubstitution,
                subject: decl.name.clone(),
                subject_kind: decl.kind,
                expectation: Expectation::VariableRef(variable.clone()),
                line_number: decl.line_number,
                old_line: decl.line.clone(),
                new_content,
                comment: request.comment(&format!("Reference {} to upgrade", variable)),
            }),
            Err(err) => StrategyOutcome::Failed(err),
        }
    }
}

/// Pins a genuinely transitive dependency with a constraint or override.
pub struct TransitiveConstraint;

impl FixStrategy for TransitiveConstraint {
    fn name(&self) -> &'static str {
        "transitive-constraint"
    }

    fn attempt(
        &self,
        target: &ManifestDocument,
        _workspace: &[ManifestDocument],
        request: &FixRequest<'_>,
    ) -> StrategyOutcome {
        if request.declared_directly {
            return StrategyOutcome::NotApplicable;
        }
        let existing = matching(target, &request.fix.dependency_name, &[DeclarationKind::Constraint]);
        if !existing.is_empty() {
            return edit_literals(
                target,
                &existing,
                request,
                EditKind::ConstraintUpdated,
                "Raise constraint on",
            );
        }
        if !request.allow_constraints {
            return StrategyOutcome::NotApplicable;
        }

        let constraint = ConstraintRequest {
            name: request.fix.dependency_name.clone(),
            version: request.target().to_string(),
            reason: format!(
                "{}: pin transitive {}",
                request.fix.cve_id, request.fix.dependency_name
            ),
        };
        match target
            .mutator()
            .add_constraint(target.path(), target.content(), &constraint)
        {
            Ok(new_content) => StrategyOutcome::Proposed(ProposedEdit {
                path: target.path().to_string(),
                kind: EditKind::ConstraintAdded,
                subject: request.fix.dependency_name.clone(),
                subject_kind: DeclarationKind::Constraint,
                expectation: Expectation::Version(request.target().to_string()),
                line_number: 0,
                old_line: String::new(),
                new_content,
                comment: request.comment("Pin transitive"),
            }),
            Err(err) => StrategyOutcome::Failed(err),
        }
    }
}
