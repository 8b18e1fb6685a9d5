//! Merges raw fixes into one unit of work per dependency name.

use std::collections::HashMap;

use crate::model::{ConsolidatedFix, VulnerabilityFix};
use crate::version;

fn severity_rank(severity: &str) -> u8 {
    match severity.trim().to_ascii_lowercase().as_str() {
        "critical" => 4,
        "high" => 3,
        "medium" | "moderate" => 2,
        "low" => 1,
        _ => 0,
    }
}

fn push_unique(joined: &mut String, value: &str, separator: &str) {
    let value = value.trim();
    if value.is_empty() || joined.split(separator).any(|existing| existing == value) {
        return;
    }
    if !joined.is_empty() {
        joined.push_str(separator);
    }
    joined.push_str(value);
}

/// Consolidates fixes that already carry their extracted recommended version.
///
/// Output keeps first-appearance order. The merged recommended version is
/// the greatest input, CVE ids are comma-joined without repeats and the
/// highest severity wins. `target_version` starts out equal to the
/// recommended version until reconciliation runs.
pub fn consolidate<'a, I>(fixes: I) -> Vec<ConsolidatedFix>
where
    I: IntoIterator<Item = (&'a VulnerabilityFix, &'a str)>,
{
    let mut order: Vec<ConsolidatedFix> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (fix, recommended) in fixes {
        let recommended = version::normalize(recommended);
        match index.get(&fix.dependency_name) {
            Some(&idx) => {
                let merged = &mut order[idx];
                if version::compare_versions(recommended, &merged.recommended_version)
                    == std::cmp::Ordering::Greater
                {
                    merged.recommended_version = recommended.to_string();
                    merged.target_version = recommended.to_string();
                }
                push_unique(&mut merged.cve_id, &fix.cve_id, ",");
                push_unique(&mut merged.description, &fix.description, "\n");
                if severity_rank(&fix.severity) > severity_rank(&merged.severity) {
                    merged.severity = fix.severity.clone();
                }
                if merged.current_version.is_empty() {
                    merged.current_version = fix.current_version.clone();
                }
            }
            None => {
                index.insert(fix.dependency_name.clone(), order.len());
                order.push(ConsolidatedFix {
                    dependency_name: fix.dependency_name.clone(),
                    current_version: fix.current_version.clone(),
                    recommended_version: recommended.to_string(),
                    target_version: recommended.to_string(),
                    cve_id: fix.cve_id.trim().to_string(),
                    severity: fix.severity.clone(),
                    description: fix.description.trim().to_string(),
                });
            }
        }
    }
    order
}
