//! Compatibility gate.
//!
//! A pure check of one fix against the platform state. Every violated rule
//! contributes one [`RequiredUpgrade`]; any entry blocks the fix.

use tracing::info;

use crate::model::{ConsolidatedFix, MajorUpgradeRequirement, RequiredUpgrade, UpgradeKind};
use crate::remediate::compat::GateRule;
use crate::remediate::runtime::RuntimeState;
use crate::version;

#[derive(Debug, Clone, Default)]
pub struct CompatibilityGate {
    rules: Vec<GateRule>,
}

impl CompatibilityGate {
    pub fn new(rules: Vec<GateRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[GateRule] {
        &self.rules
    }

    /// Returns the unmet requirements of `fix`, or `None` when it is safe.
    ///
    /// The higher of the recommended and reconciled versions is checked. An
    /// undetected umbrella version never counts as a violation.
    pub fn check(&self, fix: &ConsolidatedFix, state: &RuntimeState) -> Option<MajorUpgradeRequirement> {
        let checked = version::max_version(&fix.recommended_version, &fix.target_version);
        let mut requirements = Vec::new();

        for rule in self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(&fix.dependency_name, checked))
        {
            if let Some(required) = rule.requires_runtime {
                if state.runtime_major < required {
                    requirements.push(RequiredUpgrade {
                        kind: UpgradeKind::Runtime,
                        current: state.runtime_major.to_string(),
                        required: required.to_string(),
                        description: format!(
                            "{} {} requires runtime {} or newer ({})",
                            fix.dependency_name, checked, required, rule.name
                        ),
                    });
                }
            }
            if let Some(requirement) = &rule.requires_family {
                let Some(current) = state.family_version(&requirement.family) else {
                    continue;
                };
                let below = version::major(current).is_some_and(|major| major < requirement.min_major);
                if below {
                    requirements.push(RequiredUpgrade {
                        kind: UpgradeKind::Framework,
                        current: current.to_string(),
                        required: format!("{}.x", requirement.min_major),
                        description: format!(
                            "{} {} requires {} {}.x or newer ({})",
                            fix.dependency_name,
                            checked,
                            requirement.family,
                            requirement.min_major,
                            rule.name
                        ),
                    });
                }
            }
        }

        if requirements.is_empty() {
            return None;
        }
        info!(
            dependency = %fix.dependency_name,
            cve = %fix.cve_id,
            unmet = requirements.len(),
            "Fix requires a major platform upgrade"
        );
        Some(MajorUpgradeRequirement {
            dependency_name: fix.dependency_name.clone(),
            cve_id: fix.cve_id.clone(),
            recommended_version: fix.recommended_version.clone(),
            requirements,
        })
    }
}
