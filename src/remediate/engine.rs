//! Fix application orchestrator.
//!
//! Fixes are processed strictly in order. Every decision reads and updates
//! the per-run [`RunContext`]: the processed set, the `(name, path)` pairs
//! already edited, the parent fix map and the family edit history. Nothing
//! here is shared between runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, RemediationConfig};
use crate::model::{
    ConsolidatedFix, DependencyEntry, Ecosystem, ManifestFormat, ManifestInput,
    MajorUpgradeRequirement, SkipAnnotation, SkipReason, SkippedFix, VulnerabilityFix,
};
use crate::remediate::compat::{CompatibilityTables, FamilySpec};
use crate::remediate::consolidate::consolidate;
use crate::remediate::document::{EditKind, Expectation, ManifestDocument, ProposedEdit};
use crate::remediate::extract::VersionExtractor;
use crate::remediate::gate::CompatibilityGate;
use crate::remediate::matcher::same_coordinate;
use crate::remediate::report::{ModifiedManifest, ParseFailure, RemediationReport, SatisfiedFix};
use crate::remediate::resolver::VersionResolver;
use crate::remediate::runtime::{self, RuntimeState, RuntimeVersion};
use crate::remediate::strategy::{self, FixRequest, FixStrategy, StrategyOutcome};
use crate::remediate::traits::{Declaration, DeclarationKind};
use crate::version;

// Target-selection heuristic weights.
const SCORE_FAMILY_EDITED: u32 = 100;
const SCORE_FAMILY_PRESENT: u32 = 30;
const SCORE_MODULE_LEVEL: u32 = 20;

/// Mutable state of one run.
struct RunContext {
    documents: Vec<ManifestDocument>,
    processed: HashSet<String>,
    constrained: HashSet<(String, String)>,
    parent_fixes: HashMap<String, String>,
    /// `(family, path)` pairs that received an edit
    family_edits: HashSet<(String, String)>,
    report: RemediationReport,
}

impl RunContext {
    fn document_index(&self, path: &str) -> Option<usize> {
        self.documents.iter().position(|doc| doc.path() == path)
    }

    fn is_constrained(&self, name: &str, path: &str) -> bool {
        self.constrained.contains(&(name.to_string(), path.to_string()))
    }

    fn constrain(&mut self, name: &str, path: &str) {
        self.constrained.insert((name.to_string(), path.to_string()));
    }

    fn skip(&mut self, fix: &ConsolidatedFix, reason: SkipReason) {
        info!(dependency = %fix.dependency_name, cve = %fix.cve_id, reason = ?reason, "Skipping fix");
        self.report.skipped_fixes.push(SkippedFix {
            dependency_name: fix.dependency_name.clone(),
            cve_id: fix.cve_id.clone(),
            reason,
        });
    }

    fn satisfied(&mut self, fix: &ConsolidatedFix, declared: String) {
        debug!(dependency = %fix.dependency_name, declared = %declared, "Fix already satisfied");
        self.report.already_satisfied.push(SatisfiedFix {
            dependency_name: fix.dependency_name.clone(),
            cve_id: fix.cve_id.clone(),
            declared_version: declared,
        });
    }

    /// Commits a proposal to the document it belongs to.
    fn commit(&mut self, edit: ProposedEdit, cve_id: &str) -> Result<(), String> {
        let path = edit.path.clone();
        let idx = self
            .document_index(&path)
            .ok_or_else(|| format!("no manifest at {}", path))?;
        let entry = self.documents[idx]
            .apply(edit, cve_id)
            .map_err(|err| err.to_string())?;
        info!(
            path = %path,
            subject = %entry.subject,
            kind = ?entry.kind,
            line = entry.line_number,
            value = %entry.new_value,
            "Applied edit"
        );
        Ok(())
    }
}

/// The remediation engine.
///
/// Holds only immutable configuration; every call to
/// [`apply_fixes`](Self::apply_fixes) threads its own run state, so one
/// engine can serve concurrent runs for different repositories.
pub struct RemediationEngine {
    config: RemediationConfig,
    tables: Arc<CompatibilityTables>,
    extractor: VersionExtractor,
    resolver: VersionResolver,
    gate: CompatibilityGate,
    chain: Vec<Box<dyn FixStrategy>>,
}

impl RemediationEngine {
    /// Builds an engine from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the compatibility tables or the extraction
    /// patterns are invalid.
    pub fn new(config: RemediationConfig) -> Result<Self, ConfigError> {
        let tables = config.tables()?;
        let extractor = VersionExtractor::new(&tables.extraction)?;
        Ok(Self {
            resolver: VersionResolver::new(Arc::clone(&tables)),
            gate: CompatibilityGate::new(tables.gate_rules.clone()),
            chain: strategy::default_chain(),
            extractor,
            tables,
            config,
        })
    }

    /// Replaces the strategy chain.
    pub fn with_strategy_chain(mut self, chain: Vec<Box<dyn FixStrategy>>) -> Self {
        self.chain = chain;
        self
    }

    pub fn config(&self) -> &RemediationConfig {
        &self.config
    }

    pub fn tables(&self) -> &CompatibilityTables {
        &self.tables
    }

    pub fn detect_runtime_version(&self, manifests: &[ManifestInput]) -> RuntimeVersion {
        runtime::detect_runtime_version(manifests, self.config.default_runtime_major)
    }

    pub fn detect_framework_version(&self, manifests: &[ManifestInput]) -> Option<String> {
        runtime::detect_framework_version(manifests, &self.tables)
    }

    /// Parses every mutable manifest, collecting failures instead of aborting.
    pub fn parse_manifests(manifests: &[ManifestInput]) -> (Vec<ManifestDocument>, Vec<ParseFailure>) {
        let mut documents = Vec::new();
        let mut failures = Vec::new();
        for input in manifests.iter().filter(|input| input.format.is_mutable()) {
            match ManifestDocument::parse(input) {
                Ok(doc) => documents.push(doc),
                Err(err) => {
                    warn!(path = %input.path, error = %err, "Failed to parse manifest");
                    failures.push(ParseFailure {
                        path: input.path.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
        (documents, failures)
    }

    /// Applies `fixes` to the manifest set.
    ///
    /// Read-only manifests (Dockerfiles, version files) only feed runtime
    /// detection. Nothing in here is fatal: every problem ends up in the
    /// report and the next fix is processed.
    #[instrument(skip_all, fields(manifests = manifests.len(), fixes = fixes.len()))]
    pub fn apply_fixes(
        &self,
        manifests: &[ManifestInput],
        fixes: &[VulnerabilityFix],
        graph: &[DependencyEntry],
    ) -> RemediationReport {
        let (documents, failures) = Self::parse_manifests(manifests);
        self.apply_parsed(manifests, documents, failures, fixes, graph)
    }

    /// Same as [`apply_fixes`](Self::apply_fixes) for manifests parsed ahead of time.
    pub fn apply_parsed(
        &self,
        manifests: &[ManifestInput],
        documents: Vec<ManifestDocument>,
        parse_failures: Vec<ParseFailure>,
        fixes: &[VulnerabilityFix],
        graph: &[DependencyEntry],
    ) -> RemediationReport {
        let mut report = RemediationReport {
            parse_failures,
            ..RemediationReport::default()
        };

        // Extraction: fixes without any target version are surfaced, never defaulted.
        let mut extracted = Vec::with_capacity(fixes.len());
        for fix in fixes {
            match self.extractor.extract(fix) {
                Ok(found) => extracted.push((fix, found.version)),
                Err(unresolved) => {
                    warn!(
                        dependency = %unresolved.dependency_name,
                        cve = %unresolved.cve_id,
                        "No target version found for fix"
                    );
                    report.unresolved_fixes.push(unresolved);
                }
            }
        }
        let mut consolidated =
            consolidate(extracted.iter().map(|(fix, version)| (*fix, version.as_str())));

        let runtime = self.detect_runtime_version(manifests);
        let state = RuntimeState {
            runtime_major: runtime.major,
            family_versions: runtime::family_versions(
                documents.iter().map(ManifestDocument::declarations),
                &self.tables,
            ),
        };
        report.runtime = Some(runtime);
        self.resolver.resolve_all(&mut consolidated, &state);

        let mut blocked: HashMap<String, MajorUpgradeRequirement> = consolidated
            .iter()
            .filter_map(|fix| {
                self.gate
                    .check(fix, &state)
                    .map(|requirement| (fix.dependency_name.clone(), requirement))
            })
            .collect();

        let mut ctx = RunContext {
            documents,
            processed: HashSet::new(),
            constrained: HashSet::new(),
            parent_fixes: HashMap::new(),
            family_edits: HashSet::new(),
            report,
        };
        ctx.parent_fixes = consolidated
            .iter()
            .filter(|fix| !blocked.contains_key(&fix.dependency_name))
            .filter(|fix| {
                graph
                    .iter()
                    .any(|entry| entry.is_direct() && same_coordinate(&entry.name, &fix.dependency_name))
                    || declared_anywhere(&ctx.documents, &fix.dependency_name, false)
            })
            .map(|fix| (fix.dependency_name.clone(), fix.target_version.clone()))
            .collect();

        info!(
            fixes = consolidated.len(),
            runtime = state.runtime_major,
            parents = ctx.parent_fixes.len(),
            "Starting fix application"
        );

        for idx in 0..consolidated.len() {
            let fix = consolidated[idx].clone();
            if ctx.processed.contains(&fix.dependency_name) {
                debug!(dependency = %fix.dependency_name, "Already processed in this run");
                continue;
            }
            if let Some(requirement) = blocked.remove(&fix.dependency_name) {
                ctx.report.major_upgrade_requirements.push(requirement);
                ctx.processed.insert(fix.dependency_name.clone());
                continue;
            }
            if self.cascade(&mut ctx, &fix, graph) {
                continue;
            }
            if self.family_shortcut(&mut ctx, &fix, &consolidated, &blocked, graph) {
                continue;
            }
            self.apply_one(&mut ctx, &fix, graph);
        }

        self.finish(ctx)
    }

    /// Skips a transitive fix whose parent is being upgraded far enough.
    fn cascade(&self, ctx: &mut RunContext, fix: &ConsolidatedFix, graph: &[DependencyEntry]) -> bool {
        let entries: Vec<&DependencyEntry> = graph
            .iter()
            .filter(|entry| same_coordinate(&entry.name, &fix.dependency_name))
            .collect();
        let transitive = !entries.is_empty()
            && entries.iter().all(|entry| !entry.is_direct())
            && !declared_anywhere(&ctx.documents, &fix.dependency_name, false);
        if !transitive {
            return false;
        }

        let parent = entries.iter().filter_map(|entry| entry.parent.as_deref()).find_map(|parent| {
            ctx.parent_fixes
                .iter()
                .find(|(name, _)| same_coordinate(name, parent))
                .map(|(name, target)| (name.clone(), target.clone()))
        });
        let Some((parent, parent_target)) = parent else {
            return false;
        };
        if !version::satisfies(&parent_target, &fix.recommended_version) {
            return false;
        }

        let annotation = SkipAnnotation {
            dependency_name: fix.dependency_name.clone(),
            cve_id: fix.cve_id.clone(),
            required_version: fix.recommended_version.clone(),
            parent,
            parent_target_version: parent_target,
        };
        info!(annotation = %annotation, "Transitive fix covered by parent upgrade");
        ctx.report.skip_annotations.push(annotation);
        ctx.processed.insert(fix.dependency_name.clone());
        true
    }

    /// Raises a shared family version variable once for every fix that
    /// references it, then points matching hardcoded family declarations at
    /// it.
    fn family_shortcut(
        &self,
        ctx: &mut RunContext,
        fix: &ConsolidatedFix,
        all: &[ConsolidatedFix],
        blocked: &HashMap<String, MajorUpgradeRequirement>,
        graph: &[DependencyEntry],
    ) -> bool {
        let Some(family) = self.tables.family_of(&fix.dependency_name) else {
            return false;
        };
        if family.variables.is_empty() {
            return false;
        }
        let ecosystem = fix_ecosystem(&fix.dependency_name, graph);

        // The family variable this dependency refers to, and where.
        let Some((referencing_path, variable)) = ctx
            .documents
            .iter()
            .filter(|doc| doc.format().ecosystem() == Some(ecosystem))
            .find_map(|doc| {
                doc.declarations()
                    .iter()
                    .filter(|decl| same_coordinate(&decl.name, &fix.dependency_name))
                    .filter_map(Declaration::variable_ref)
                    .find(|variable| family.variables.iter().any(|name| name.as_str() == *variable))
                    .map(|variable| (doc.path().to_string(), variable.to_string()))
            })
        else {
            return false;
        };

        let Some(referencing) = ctx.document_index(&referencing_path) else {
            return false;
        };
        let Some((definition_path, old_value)) =
            strategy::find_variable(&ctx.documents[referencing], &ctx.documents, &variable).map(
                |(doc, decl)| (doc.path().to_string(), decl.value.clone().unwrap_or_default()),
            )
        else {
            return false;
        };

        // Every pending fix whose declarations use the same variable.
        let covered: Vec<&ConsolidatedFix> = all
            .iter()
            .filter(|other| {
                other.dependency_name == fix.dependency_name
                    || (!ctx.processed.contains(&other.dependency_name)
                        && !blocked.contains_key(&other.dependency_name)
                        && references_variable(&ctx.documents, &other.dependency_name, &variable))
            })
            .collect();
        let new_value = covered
            .iter()
            .map(|fix| fix.target_version.as_str())
            .fold(fix.target_version.as_str(), |acc, target| version::max_version(acc, target))
            .to_string();
        let cve_ids = covered
            .iter()
            .map(|fix| fix.cve_id.as_str())
            .collect::<Vec<_>>()
            .join(",");

        if version::looks_like_version(&old_value) && version::satisfies(&old_value, &new_value) {
            for covered_fix in &covered {
                ctx.satisfied(covered_fix, version::normalize(&old_value).to_string());
                ctx.processed.insert(covered_fix.dependency_name.clone());
            }
            return true;
        }
        if covered
            .iter()
            .any(|covered_fix| ctx.is_constrained(&covered_fix.dependency_name, &definition_path))
        {
            return false;
        }

        let Some(def_idx) = ctx.document_index(&definition_path) else {
            return false;
        };
        let proposal = {
            let doc = &ctx.documents[def_idx];
            let Some(decl) = doc.variable(&variable) else {
                return false;
            };
            match doc.mutator().set_version(doc.content(), decl, &new_value) {
                Ok(new_content) => ProposedEdit {
                    path: definition_path.clone(),
                    kind: EditKind::VariableValue,
                    subject: variable.clone(),
                    subject_kind: DeclarationKind::Variable,
                    expectation: Expectation::Version(new_value.clone()),
                    line_number: decl.line_number,
                    old_line: decl.line.clone(),
                    new_content,
                    comment: format!(
                        "Upgrade {} family via {} to {} ({})",
                        family.name, variable, new_value, cve_ids
                    ),
                },
                Err(err) => {
                    warn!(variable = %variable, error = %err, "Family variable edit failed");
                    return false;
                }
            }
        };
        if let Err(err) = ctx.commit(proposal, &cve_ids) {
            warn!(variable = %variable, error = %err, "Family variable edit rejected");
            return false;
        }

        for covered_fix in &covered {
            ctx.constrain(&covered_fix.dependency_name, &definition_path);
            ctx.processed.insert(covered_fix.dependency_name.clone());
            ctx.report.record_applied(&definition_path, covered_fix);
        }
        ctx.family_edits
            .insert((family.name.clone(), definition_path.clone()));
        info!(
            family = %family.name,
            variable = %variable,
            value = %new_value,
            fixes = covered.len(),
            "Updated family version variable"
        );

        self.propagate_family(ctx, family, &variable, &old_value, &new_value, &definition_path, all);
        true
    }

    /// Points hardcoded family declarations still at the variable's old
    /// value to the variable (plugins get the literal instead).
    #[allow(clippy::too_many_arguments)]
    fn propagate_family(
        &self,
        ctx: &mut RunContext,
        family: &FamilySpec,
        variable: &str,
        old_value: &str,
        new_value: &str,
        definition_path: &str,
        all: &[ConsolidatedFix],
    ) {
        let Some(def_idx) = ctx.document_index(definition_path) else {
            return;
        };
        let format = ctx.documents[def_idx].format();
        let old_value = version::normalize(old_value).to_string();

        for idx in 0..ctx.documents.len() {
            if ctx.documents[idx].format() != format {
                continue;
            }
            if idx != def_idx {
                // A local definition shadows the one that was raised.
                if ctx.documents[idx].variable(variable).is_some() {
                    continue;
                }
                // Maven properties are only visible to the declaring pom and its modules.
                if format == ManifestFormat::Maven
                    && !is_below(ctx.documents[idx].path(), definition_path)
                {
                    continue;
                }
            }
            let stale: Vec<Declaration> = ctx.documents[idx]
                .declarations()
                .iter()
                .filter(|decl| {
                    matches!(decl.kind, DeclarationKind::Dependency | DeclarationKind::Plugin)
                        && family.is_member(&decl.name)
                        && decl.version() == Some(old_value.as_str())
                })
                .cloned()
                .collect();

            for decl in stale {
                let path = ctx.documents[idx].path().to_string();
                if ctx.is_constrained(&decl.name, &path) {
                    continue;
                }
                let doc = &ctx.documents[idx];
                let (result, kind, expectation) = if decl.kind == DeclarationKind::Plugin {
                    (
                        doc.mutator().set_version(doc.content(), &decl, new_value),
                        EditKind::PluginVersion,
                        Expectation::Version(new_value.to_string()),
                    )
                } else {
                    (
                        doc.mutator()
                            .substitute_variable(&path, doc.content(), &decl, variable),
                        EditKind::VariableSubstitution,
                        Expectation::VariableRef(variable.to_string()),
                    )
                };
                let new_content = match result {
                    Ok(content) => content,
                    Err(err) => {
                        debug!(dependency = %decl.name, error = %err, "Family propagation skipped");
                        continue;
                    }
                };
                let own_fix = all.iter().find(|fix| same_coordinate(&fix.dependency_name, &decl.name));
                let cve_id = own_fix.map(|fix| fix.cve_id.clone()).unwrap_or_default();
                let proposal = ProposedEdit {
                    path: path.clone(),
                    kind,
                    subject: decl.name.clone(),
                    subject_kind: decl.kind,
                    expectation,
                    line_number: decl.line_number,
                    old_line: decl.line.clone(),
                    new_content,
                    comment: format!("Keep {} aligned with {}", decl.name, variable),
                };
                if let Err(err) = ctx.commit(proposal, &cve_id) {
                    warn!(dependency = %decl.name, error = %err, "Family propagation rejected");
                    continue;
                }
                ctx.constrain(&decl.name, &path);
                if let Some(own_fix) = own_fix {
                    if version::satisfies(new_value, &own_fix.target_version)
                        && !ctx.processed.contains(&own_fix.dependency_name)
                    {
                        ctx.processed.insert(own_fix.dependency_name.clone());
                        ctx.report.record_applied(&path, own_fix);
                    }
                }
            }
        }
    }

    /// Target selection and the strategy chain for one fix.
    fn apply_one(&self, ctx: &mut RunContext, fix: &ConsolidatedFix, graph: &[DependencyEntry]) {
        ctx.processed.insert(fix.dependency_name.clone());
        let family = self.tables.family_of(&fix.dependency_name);
        let ecosystem = fix_ecosystem(&fix.dependency_name, graph);

        let targets = self.select_targets(ctx, fix, family, ecosystem, graph);
        if targets.is_empty() {
            ctx.skip(fix, SkipReason::NoTarget);
            return;
        }

        // Never write a reconciled version below what is already declared
        // when the declaration does not yet satisfy the recommendation.
        let downgrade = targets.iter().find_map(|&idx| {
            direct_declarations(&ctx.documents[idx], &fix.dependency_name)
                .filter_map(Declaration::version)
                .find(|declared| {
                    version::compare_versions(declared, &fix.target_version).is_gt()
                        && !version::satisfies(declared, &fix.recommended_version)
                })
                .map(str::to_string)
        });
        if let Some(declared) = downgrade {
            ctx.skip(
                fix,
                SkipReason::WouldDowngrade {
                    declared,
                    resolved: fix.target_version.clone(),
                },
            );
            return;
        }

        let request = FixRequest {
            fix,
            family,
            declared_directly: declared_anywhere(&ctx.documents, &fix.dependency_name, true),
            allow_constraints: self.config.allow_constraints,
        };

        let mut applied = Vec::new();
        let mut satisfied: Option<String> = None;
        let mut attempts = Vec::new();
        let mut blocked_targets = 0;

        for &idx in &targets {
            let target_path = ctx.documents[idx].path().to_string();
            if ctx.is_constrained(&fix.dependency_name, &target_path) {
                blocked_targets += 1;
                continue;
            }
            for strategy in &self.chain {
                let outcome = strategy.attempt(&ctx.documents[idx], &ctx.documents, &request);
                match outcome {
                    StrategyOutcome::Proposed(edit) => {
                        let edit_path = edit.path.clone();
                        if ctx.is_constrained(&fix.dependency_name, &edit_path) {
                            debug!(
                                dependency = %fix.dependency_name,
                                path = %edit_path,
                                "Pair already edited in this run"
                            );
                            blocked_targets += 1;
                            break;
                        }
                        match ctx.commit(edit, &fix.cve_id) {
                            Ok(()) => {
                                ctx.constrain(&fix.dependency_name, &edit_path);
                                ctx.constrain(&fix.dependency_name, &target_path);
                                applied.push(edit_path);
                                break;
                            }
                            Err(err) => {
                                warn!(
                                    strategy = strategy.name(),
                                    path = %target_path,
                                    error = %err,
                                    "Edit did not land, trying next strategy"
                                );
                                attempts.push(format!("{}@{}: {}", strategy.name(), target_path, err));
                            }
                        }
                    }
                    StrategyOutcome::AlreadySatisfied { declared } => {
                        satisfied = Some(declared);
                        break;
                    }
                    StrategyOutcome::NotApplicable => {}
                    StrategyOutcome::Failed(err) => {
                        warn!(
                            strategy = strategy.name(),
                            path = %target_path,
                            error = %err,
                            "Strategy failed, trying next"
                        );
                        attempts.push(format!("{}@{}: {}", strategy.name(), target_path, err));
                    }
                }
            }
        }

        if !applied.is_empty() {
            for path in &applied {
                ctx.report.record_applied(path, fix);
                if let Some(family) = family {
                    ctx.family_edits.insert((family.name.clone(), path.clone()));
                }
            }
            return;
        }
        if let Some(declared) = satisfied {
            ctx.satisfied(fix, declared);
            return;
        }
        if blocked_targets == targets.len() {
            ctx.skip(fix, SkipReason::AlreadyConstrained);
        } else {
            ctx.skip(fix, SkipReason::StrategiesExhausted { attempts });
        }
    }

    /// Manifests a fix should be applied to, as document indices.
    fn select_targets(
        &self,
        ctx: &RunContext,
        fix: &ConsolidatedFix,
        family: Option<&FamilySpec>,
        ecosystem: Ecosystem,
        graph: &[DependencyEntry],
    ) -> Vec<usize> {
        let candidates: Vec<usize> = (0..ctx.documents.len())
            .filter(|&idx| ctx.documents[idx].format().ecosystem() == Some(ecosystem))
            .collect();

        let declaring: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&idx| direct_declarations(&ctx.documents[idx], &fix.dependency_name).next().is_some())
            .collect();
        if !declaring.is_empty() {
            debug!(dependency = %fix.dependency_name, targets = declaring.len(), "Targeting declaring manifests");
            return declaring;
        }

        let mut from_graph: Vec<usize> = graph
            .iter()
            .filter(|entry| same_coordinate(&entry.name, &fix.dependency_name))
            .filter_map(|entry| ctx.document_index(&entry.file_path))
            .filter(|idx| candidates.contains(idx))
            .collect();
        from_graph.sort_unstable();
        from_graph.dedup();
        if !from_graph.is_empty() {
            debug!(dependency = %fix.dependency_name, targets = from_graph.len(), "Targeting manifests from graph");
            return from_graph;
        }

        let scored = candidates.into_iter().map(|idx| {
            let doc = &ctx.documents[idx];
            let mut score = 0;
            if let Some(family) = family {
                if ctx
                    .family_edits
                    .contains(&(family.name.clone(), doc.path().to_string()))
                {
                    score += SCORE_FAMILY_EDITED;
                }
                if doc.declarations().iter().any(|decl| family.is_member(&decl.name)) {
                    score += SCORE_FAMILY_PRESENT;
                }
            }
            if doc.depth() > 0 && !is_aggregator(doc) {
                score += SCORE_MODULE_LEVEL;
            }
            (score, idx)
        });
        let best = scored.max_by(|(score_a, a), (score_b, b)| {
            let (doc_a, doc_b) = (&ctx.documents[*a], &ctx.documents[*b]);
            score_a
                .cmp(score_b)
                .then_with(|| doc_b.depth().cmp(&doc_a.depth()))
                .then_with(|| doc_b.path().cmp(doc_a.path()))
        });
        match best {
            Some((score, idx)) => {
                debug!(
                    dependency = %fix.dependency_name,
                    path = %ctx.documents[idx].path(),
                    score,
                    "Targeting manifest by heuristic"
                );
                vec![idx]
            }
            None => Vec::new(),
        }
    }

    fn finish(&self, ctx: RunContext) -> RemediationReport {
        let RunContext {
            documents,
            mut report,
            ..
        } = ctx;
        for doc in documents.into_iter().filter(ManifestDocument::is_modified) {
            if let Err(err) = doc.check_consistency() {
                warn!(path = %doc.path(), error = %err, "Discarding inconsistent manifest");
                report.applied_fixes.remove(doc.path());
                continue;
            }
            report.modified_manifests.push(ModifiedManifest {
                path: doc.path().to_string(),
                format: doc.format(),
                content: doc.content().to_string(),
                edits: doc.edits().to_vec(),
            });
        }
        report.finish_summary();
        info!(
            files = report.summary.files_touched,
            applied = report.summary.fixes_applied,
            skipped = report.summary.fixes_skipped,
            cascaded = report.summary.fixes_cascaded,
            escalated = report.summary.fixes_escalated,
            unresolved = report.summary.fixes_unresolved,
            "Fix application finished"
        );
        report
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Declarations of `name` in its own right, including gradle plugin markers.
fn direct_declarations<'d>(doc: &'d ManifestDocument, name: &'d str) -> impl Iterator<Item = &'d Declaration> {
    doc.declarations().iter().filter(move |decl| {
        decl.kind.is_direct()
            && (same_coordinate(&decl.name, name)
                || (decl.kind == DeclarationKind::Plugin && strategy::is_plugin_marker(&decl.name, name)))
    })
}

/// Whether any manifest declares `name` directly; with `versioned`, only
/// declarations that carry a version of their own count.
fn declared_anywhere(documents: &[ManifestDocument], name: &str, versioned: bool) -> bool {
    documents.iter().any(|doc| {
        direct_declarations(doc, name).any(|decl| !versioned || decl.value.is_some())
    })
}

fn references_variable(documents: &[ManifestDocument], name: &str, variable: &str) -> bool {
    documents.iter().any(|doc| {
        doc.declarations()
            .iter()
            .any(|decl| same_coordinate(&decl.name, name) && decl.variable_ref() == Some(variable))
    })
}

fn fix_ecosystem(name: &str, graph: &[DependencyEntry]) -> Ecosystem {
    graph
        .iter()
        .find(|entry| same_coordinate(&entry.name, name))
        .map(DependencyEntry::ecosystem)
        .unwrap_or_else(|| Ecosystem::infer_from_name(name))
}

fn is_aggregator(doc: &ManifestDocument) -> bool {
    match doc.format() {
        ManifestFormat::Maven => doc.content().contains("<modules>"),
        ManifestFormat::Gradle => {
            doc.content().contains("subprojects") || doc.content().contains("allprojects")
        }
        ManifestFormat::Npm => doc.content().contains("\"workspaces\""),
        ManifestFormat::Dockerfile | ManifestFormat::VersionFile => false,
    }
}

/// Whether `path` sits in the directory tree of the manifest at `root_manifest`.
fn is_below(path: &str, root_manifest: &str) -> bool {
    match root_manifest.rsplit_once('/') {
        Some((dir, _)) => path.starts_with(&format!("{}/", dir)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyKind, UpgradeKind};

    const POM: &str = r#"<project>
    <modelVersion>4.0.0</modelVersion>
    <dependencies>
        <dependency>
            <groupId>com.example</groupId>
            <artifactId>lib</artifactId>
            <version>1.2.0</version>
        </dependency>
        <dependency>
            <groupId>com.example</groupId>
            <artifactId>umbrella</artifactId>
            <version>2.0.0</version>
        </dependency>
    </dependencies>
</project>
"#;

    const FAMILY_POM: &str = r#"<project>
    <properties>
        <fw.version>1.0.0</fw.version>
    </properties>
    <dependencies>
        <dependency>
            <groupId>com.fw</groupId>
            <artifactId>core</artifactId>
            <version>${fw.version}</version>
        </dependency>
        <dependency>
            <groupId>com.fw</groupId>
            <artifactId>web</artifactId>
            <version>${fw.version}</version>
        </dependency>
        <dependency>
            <groupId>com.fw</groupId>
            <artifactId>extra</artifactId>
            <version>1.0.0</version>
        </dependency>
    </dependencies>
</project>
"#;

    const PACKAGE: &str = r#"{
  "name": "web",
  "dependencies": {
    "express": "^4.18.0"
  }
}
"#;

    fn engine() -> RemediationEngine {
        RemediationEngine::new(RemediationConfig::default()).unwrap()
    }

    fn family_engine() -> RemediationEngine {
        let tables = CompatibilityTables::from_json(
            r#"{
                "framework_family": "fw",
                "families": [{"name": "fw", "members": ["com.fw:"], "variables": ["fw.version"]}],
                "extraction": {"version": 1, "patterns": []}
            }"#,
        )
        .unwrap();
        RemediationEngine::new(RemediationConfig::default().with_tables(tables)).unwrap()
    }

    fn fix(name: &str, recommended: &str, cve: &str) -> VulnerabilityFix {
        VulnerabilityFix {
            dependency_name: name.to_string(),
            current_version: "1.0.0".to_string(),
            recommended_version: Some(recommended.to_string()),
            cve_id: cve.to_string(),
            severity: "High".to_string(),
            ..VulnerabilityFix::default()
        }
    }

    fn entry(name: &str, manager: &str, path: &str, kind: DependencyKind, parent: Option<&str>) -> DependencyEntry {
        DependencyEntry {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            package_manager: manager.to_string(),
            file_path: path.to_string(),
            kind,
            parent: parent.map(str::to_string),
        }
    }

    fn pom(content: &str) -> ManifestInput {
        ManifestInput::new("pom.xml", ManifestFormat::Maven, content)
    }

    /// Feeds the modified manifests of `report` back as inputs.
    fn rerun_inputs(inputs: &[ManifestInput], report: &RemediationReport) -> Vec<ManifestInput> {
        inputs
            .iter()
            .map(|input| match report.manifest(&input.path) {
                Some(modified) => ManifestInput::new(&input.path, input.format, &modified.content),
                None => input.clone(),
            })
            .collect()
    }

    #[test]
    fn test_direct_dependency_is_upgraded_in_place() {
        let inputs = vec![pom(POM)];
        let report = engine().apply_fixes(&inputs, &[fix("com.example:lib", "1.5.0", "CVE-2024-0001")], &[]);

        assert_eq!(report.edit_count(), 1);
        let manifest = report.manifest("pom.xml").unwrap();
        assert!(manifest.content.contains("<version>1.5.0</version>"));
        assert!(manifest.content.contains("<version>2.0.0</version>"));
        assert_eq!(manifest.edits[0].cve_id, "CVE-2024-0001");
        assert_eq!(manifest.edits[0].new_value, "1.5.0");
        assert_eq!(report.summary.fixes_applied, 1);
        assert_eq!(report.summary.edits_per_format.get(&ManifestFormat::Maven), Some(&1));
    }

    #[test]
    fn test_second_run_makes_no_edits() {
        let inputs = vec![pom(POM)];
        let fixes = vec![fix("com.example:lib", "1.5.0", "CVE-2024-0001")];
        let engine = engine();
        let first = engine.apply_fixes(&inputs, &fixes, &[]);
        let second = engine.apply_fixes(&rerun_inputs(&inputs, &first), &fixes, &[]);

        assert_eq!(second.edit_count(), 0);
        assert!(second.modified_manifests.is_empty());
        assert_eq!(second.already_satisfied.len(), 1);
        assert_eq!(second.already_satisfied[0].declared_version, "1.5.0");
    }

    #[test]
    fn test_fixes_for_one_dependency_are_consolidated() {
        let inputs = vec![pom(POM)];
        let fixes = vec![
            fix("com.example:lib", "1.3.0", "CVE-2024-0001"),
            fix("com.example:lib", "1.5.0", "CVE-2024-0002"),
        ];
        let report = engine().apply_fixes(&inputs, &fixes, &[]);

        assert_eq!(report.edit_count(), 1);
        let applied = &report.applied_fixes["pom.xml"];
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].target_version, "1.5.0");
        assert_eq!(applied[0].cve_id, "CVE-2024-0001,CVE-2024-0002");
    }

    #[test]
    fn test_transitive_fix_cascades_to_parent_upgrade() {
        let inputs = vec![pom(POM)];
        let fixes = vec![
            fix("com.example:child", "2.0.5", "CVE-2024-0003"),
            fix("com.example:umbrella", "2.1.0", "CVE-2024-0004"),
        ];
        let graph = vec![
            entry("com.example:umbrella", "maven", "pom.xml", DependencyKind::Direct, None),
            entry(
                "com.example:child",
                "maven",
                "pom.xml",
                DependencyKind::Transitive,
                Some("com.example:umbrella"),
            ),
        ];
        let report = engine().apply_fixes(&inputs, &fixes, &graph);

        assert_eq!(report.edit_count(), 1);
        assert_eq!(report.skip_annotations.len(), 1);
        let annotation = &report.skip_annotations[0];
        assert_eq!(annotation.dependency_name, "com.example:child");
        assert_eq!(annotation.parent, "com.example:umbrella");
        assert_eq!(annotation.parent_target_version, "2.1.0");
        assert!(!report.manifest("pom.xml").unwrap().content.contains("child"));
        assert_eq!(report.summary.fixes_cascaded, 1);
    }

    #[test]
    fn test_fix_needing_newer_runtime_is_escalated() {
        let content = r#"<project>
    <properties>
        <java.version>11</java.version>
    </properties>
    <dependencies>
        <dependency>
            <groupId>org.springframework</groupId>
            <artifactId>spring-core</artifactId>
            <version>5.3.20</version>
        </dependency>
    </dependencies>
</project>
"#;
        let report = engine().apply_fixes(
            &[pom(content)],
            &[fix("org.springframework:spring-core", "6.0.5", "CVE-2023-20860")],
            &[],
        );

        assert_eq!(report.edit_count(), 0);
        assert_eq!(report.major_upgrade_requirements.len(), 1);
        let requirement = &report.major_upgrade_requirements[0];
        assert_eq!(requirement.requirements[0].kind, UpgradeKind::Runtime);
        assert_eq!(requirement.requirements[0].current, "11");
        assert_eq!(report.runtime.as_ref().map(|r| r.major), Some(11));
    }

    #[test]
    fn test_shared_family_variable_is_raised_once() {
        let inputs = vec![pom(FAMILY_POM)];
        let fixes = vec![
            fix("com.fw:core", "1.1.0", "CVE-2024-0005"),
            fix("com.fw:web", "1.2.0", "CVE-2024-0006"),
        ];
        let engine = family_engine();
        let report = engine.apply_fixes(&inputs, &fixes, &[]);

        let manifest = report.manifest("pom.xml").unwrap();
        assert!(manifest.content.contains("<fw.version>1.2.0</fw.version>"));
        assert_eq!(manifest.content.matches("${fw.version}").count(), 3);
        assert_eq!(manifest.edits.len(), 2);
        assert_eq!(manifest.edits[0].kind, EditKind::VariableValue);
        assert_eq!(manifest.edits[0].cve_id, "CVE-2024-0005,CVE-2024-0006");
        assert_eq!(manifest.edits[1].kind, EditKind::VariableSubstitution);
        assert_eq!(report.summary.fixes_applied, 2);
        assert!(report.skipped_fixes.is_empty());

        let second = engine.apply_fixes(&rerun_inputs(&inputs, &report), &fixes, &[]);
        assert_eq!(second.edit_count(), 0);
        assert_eq!(second.already_satisfied.len(), 2);
    }

    #[test]
    fn test_same_artifact_in_another_group_keeps_its_literal() {
        let content = r#"<project>
    <properties>
        <core.version>1.5.0</core.version>
    </properties>
    <dependencies>
        <dependency>
            <groupId>com.example</groupId>
            <artifactId>core</artifactId>
            <version>${core.version}</version>
        </dependency>
        <dependency>
            <groupId>com.other</groupId>
            <artifactId>core</artifactId>
            <version>1.2.0</version>
        </dependency>
    </dependencies>
</project>
"#;
        let report = engine().apply_fixes(&[pom(content)], &[fix("com.other:core", "1.5.0", "CVE-2024-0007")], &[]);

        assert_eq!(report.edit_count(), 1);
        let manifest = report.manifest("pom.xml").unwrap();
        assert_eq!(manifest.edits[0].kind, EditKind::DependencyVersion);
        assert_eq!(manifest.edits[0].new_value, "1.5.0");
        assert_eq!(manifest.content.matches("${core.version}").count(), 1);
        assert!(manifest
            .content
            .contains("<artifactId>core</artifactId>\n            <version>1.5.0</version>"));
    }

    #[test]
    fn test_transitive_npm_package_gets_override() {
        let inputs = vec![ManifestInput::new("package.json", ManifestFormat::Npm, PACKAGE)];
        let graph = vec![entry("qs", "npm", "package.json", DependencyKind::Transitive, Some("express"))];
        let report = engine().apply_fixes(&inputs, &[fix("qs", "6.11.0", "CVE-2022-24999")], &graph);

        let manifest = report.manifest("package.json").unwrap();
        assert!(manifest.content.contains("\"overrides\": {\n    \"qs\": \"6.11.0\"\n  }"));
        assert_eq!(manifest.edits[0].kind, EditKind::ConstraintAdded);
        assert!(serde_json::from_str::<serde_json::Value>(&manifest.content).is_ok());
    }

    #[test]
    fn test_constraints_can_be_disabled() {
        let config = RemediationConfig::default().with_constraints(false);
        let engine = RemediationEngine::new(config).unwrap();
        let inputs = vec![ManifestInput::new("package.json", ManifestFormat::Npm, PACKAGE)];
        let graph = vec![entry("qs", "npm", "package.json", DependencyKind::Transitive, Some("express"))];
        let report = engine.apply_fixes(&inputs, &[fix("qs", "6.11.0", "CVE-2022-24999")], &graph);

        assert_eq!(report.edit_count(), 0);
        assert!(matches!(
            report.skipped_fixes[0].reason,
            SkipReason::StrategiesExhausted { .. }
        ));
    }

    #[test]
    fn test_fix_without_version_is_unresolved() {
        let unresolved = VulnerabilityFix {
            dependency_name: "com.example:lib".to_string(),
            current_version: "1.2.0".to_string(),
            cve_id: "CVE-2024-0007".to_string(),
            severity: "Low".to_string(),
            description: "Upgrade soon".to_string(),
            ..VulnerabilityFix::default()
        };
        let report = engine().apply_fixes(&[pom(POM)], &[unresolved], &[]);

        assert_eq!(report.edit_count(), 0);
        assert_eq!(report.unresolved_fixes.len(), 1);
        assert_eq!(report.unresolved_fixes[0].searched_sources, vec!["description"]);
    }

    #[test]
    fn test_parse_failures_do_not_stop_the_run() {
        let inputs = vec![
            ManifestInput::new("broken/pom.xml", ManifestFormat::Maven, "<project><dependencies></project>"),
            pom(POM),
            ManifestInput::new("Dockerfile", ManifestFormat::Dockerfile, "FROM eclipse-temurin:17-jre\n"),
        ];
        let report = engine().apply_fixes(&inputs, &[fix("com.example:lib", "1.5.0", "CVE-2024-0001")], &[]);

        assert_eq!(report.parse_failures.len(), 1);
        assert_eq!(report.parse_failures[0].path, "broken/pom.xml");
        assert_eq!(report.edit_count(), 1);
        assert_eq!(report.runtime.as_ref().map(|r| r.major), Some(17));
    }

    #[test]
    fn test_each_manifest_pair_is_edited_once() {
        let inputs = vec![
            pom(POM),
            ManifestInput::new("api/pom.xml", ManifestFormat::Maven, POM),
        ];
        let report = engine().apply_fixes(&inputs, &[fix("com.example:lib", "1.5.0", "CVE-2024-0001")], &[]);

        assert_eq!(report.modified_manifests.len(), 2);
        for manifest in &report.modified_manifests {
            assert_eq!(manifest.edits.len(), 1);
        }
    }

    #[test]
    fn test_is_below() {
        assert!(is_below("api/pom.xml", "pom.xml"));
        assert!(is_below("services/api/pom.xml", "services/pom.xml"));
        assert!(!is_below("web/pom.xml", "services/pom.xml"));
    }

    #[test]
    fn test_fix_ecosystem_prefers_graph() {
        let graph = vec![entry("left-pad", "npm", "package.json", DependencyKind::Direct, None)];
        assert_eq!(fix_ecosystem("left-pad", &graph), Ecosystem::Node);
        assert_eq!(fix_ecosystem("com.example:lib", &[]), Ecosystem::Jvm);
    }
}
