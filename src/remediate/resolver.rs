//! Compatibility reconciliation of recommended versions.
//!
//! Always runs after extraction, even when the recommendation looks clean:
//! a correct version can still be unpublished in the package source or
//! incompatible with the detected runtime.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::model::ConsolidatedFix;
use crate::remediate::compat::CompatibilityTables;
use crate::remediate::runtime::RuntimeState;
use crate::version::{self, VersionRange};

/// Why a target differs (or not) from the recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum ResolutionBasis {
    /// Recommended version used unchanged
    Recommended,
    /// Picked from the available-version catalog
    Catalog,
    /// Deterministic in-range fallback, no catalog available
    RangeFloor { range: VersionRange },
    /// Highest peer recommendation inside the umbrella-aligned range
    PeerAligned { range: VersionRange },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target_version: String,
    pub range: Option<VersionRange>,
    pub basis: ResolutionBasis,
}

impl Resolution {
    fn recommended(version: &str, range: Option<VersionRange>) -> Self {
        Self {
            target_version: version.to_string(),
            range,
            basis: ResolutionBasis::Recommended,
        }
    }
}

fn highest<'a>(versions: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    versions.max_by(|a, b| version::compare_versions(a, b))
}

fn lowest<'a>(versions: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    versions.min_by(|a, b| version::compare_versions(a, b))
}

pub struct VersionResolver {
    tables: Arc<CompatibilityTables>,
}

impl VersionResolver {
    pub fn new(tables: Arc<CompatibilityTables>) -> Self {
        Self { tables }
    }

    /// Reconciles one recommendation against the runtime range table.
    pub fn reconcile(
        &self,
        dependency_name: &str,
        current_version: &str,
        recommended: &str,
        runtime_major: u32,
    ) -> Resolution {
        let family = self.tables.family_of(dependency_name).map(|f| f.name.as_str());
        let catalog = self.tables.catalog(dependency_name, family);

        let range = family
            .and_then(|family| self.tables.runtime_range(runtime_major, family))
            .filter(|range| {
                // A range never forces a major upgrade nobody asked for.
                let ceiling = version::major(current_version)
                    .into_iter()
                    .chain(version::major(recommended))
                    .max();
                ceiling.map_or(true, |ceiling| range.major <= ceiling)
            });

        match range {
            Some(range) => Self::within_range(recommended, range, catalog),
            None => Self::without_range(recommended, catalog),
        }
    }

    fn within_range(recommended: &str, range: VersionRange, catalog: Option<&[String]>) -> Resolution {
        let listed = |version: &str| {
            catalog.map_or(true, |catalog| {
                catalog
                    .iter()
                    .any(|entry| version::compare_versions(entry, version) == Ordering::Equal)
            })
        };
        if range.contains(recommended) && listed(recommended) {
            return Resolution::recommended(recommended, Some(range));
        }
        if let Some(best) = catalog.and_then(|catalog| {
            highest(catalog.iter().map(String::as_str).filter(|entry| range.contains(entry)))
        }) {
            return Resolution {
                target_version: best.to_string(),
                range: Some(range),
                basis: ResolutionBasis::Catalog,
            };
        }
        if range.contains(recommended) {
            return Resolution::recommended(recommended, Some(range));
        }
        warn!(
            recommended = %recommended,
            range = %range,
            "Recommended version outside compatible range, using range floor"
        );
        Resolution {
            target_version: range.floor(),
            range: Some(range),
            basis: ResolutionBasis::RangeFloor { range },
        }
    }

    fn without_range(recommended: &str, catalog: Option<&[String]>) -> Resolution {
        let Some(catalog) = catalog else {
            return Resolution::recommended(recommended, None);
        };
        if catalog
            .iter()
            .any(|entry| version::compare_versions(entry, recommended) == Ordering::Equal)
        {
            return Resolution::recommended(recommended, None);
        }
        let satisfying = || {
            catalog
                .iter()
                .map(String::as_str)
                .filter(|entry| version::satisfies(entry, recommended))
        };
        let same_line = version::major_minor(recommended);
        let pick = highest(satisfying().filter(|entry| version::major_minor(entry) == same_line))
            .or_else(|| lowest(satisfying()));
        match pick {
            Some(pick) => Resolution {
                target_version: pick.to_string(),
                range: None,
                basis: ResolutionBasis::Catalog,
            },
            None => Resolution::recommended(recommended, None),
        }
    }

    /// Extension version tracking its umbrella family.
    ///
    /// `peers` are recommendations for other members of the extension family
    /// seen in the same run; they bias the pick upward inside the range.
    pub fn align(
        &self,
        dependency_name: &str,
        recommended: &str,
        umbrella_version: &str,
        peers: &[&str],
    ) -> Option<Resolution> {
        let family = self.tables.family_of(dependency_name)?;
        let umbrella = family.aligned_with.as_deref()?;
        let range = self
            .tables
            .pair_range(umbrella, &family.name, umbrella_version)?;

        if let Some(best) = self.tables.catalog(dependency_name, Some(&family.name)).and_then(|catalog| {
            highest(catalog.iter().map(String::as_str).filter(|entry| range.contains(entry)))
        }) {
            return Some(Resolution {
                target_version: best.to_string(),
                range: Some(range),
                basis: ResolutionBasis::Catalog,
            });
        }

        let in_range = highest(
            std::iter::once(recommended)
                .chain(peers.iter().copied())
                .filter(|candidate| range.contains(candidate)),
        );
        Some(match in_range {
            Some(best) if version::compare_versions(best, recommended) == Ordering::Equal => {
                Resolution::recommended(recommended, Some(range))
            }
            Some(best) => Resolution {
                target_version: best.to_string(),
                range: Some(range),
                basis: ResolutionBasis::PeerAligned { range },
            },
            None => Resolution {
                target_version: range.floor(),
                range: Some(range),
                basis: ResolutionBasis::RangeFloor { range },
            },
        })
    }

    /// Sets `target_version` on every fix.
    ///
    /// Umbrella and standalone families are reconciled first so aligned
    /// families can follow the umbrella's new version.
    pub fn resolve_all(&self, fixes: &mut [ConsolidatedFix], state: &RuntimeState) -> Vec<Resolution> {
        let mut resolutions: Vec<Option<Resolution>> = vec![None; fixes.len()];
        let aligned = |fix: &ConsolidatedFix| {
            self.tables
                .family_of(&fix.dependency_name)
                .and_then(|family| family.aligned_with.clone())
        };

        for (idx, fix) in fixes.iter_mut().enumerate() {
            if aligned(fix).is_some() {
                continue;
            }
            let resolution = self.reconcile(
                &fix.dependency_name,
                &fix.current_version,
                &fix.recommended_version,
                state.runtime_major,
            );
            fix.target_version = resolution.target_version.clone();
            resolutions[idx] = Some(resolution);
        }

        for idx in 0..fixes.len() {
            let Some(umbrella) = aligned(&fixes[idx]) else {
                continue;
            };
            let umbrella_target = highest(
                fixes
                    .iter()
                    .filter(|fix| {
                        self.tables
                            .family_of(&fix.dependency_name)
                            .is_some_and(|family| family.name == umbrella)
                    })
                    .map(|fix| fix.target_version.as_str()),
            )
            .map(str::to_string)
            .or_else(|| state.family_version(&umbrella).map(str::to_string));

            let family = self.tables.family_of(&fixes[idx].dependency_name).map(|f| f.name.clone());
            let peers: Vec<String> = fixes
                .iter()
                .enumerate()
                .filter(|(other, fix)| {
                    *other != idx
                        && self.tables.family_of(&fix.dependency_name).map(|f| &f.name) == family.as_ref()
                })
                .map(|(_, fix)| fix.recommended_version.clone())
                .collect();
            let peer_refs: Vec<&str> = peers.iter().map(String::as_str).collect();

            let fix = &fixes[idx];
            let resolution = umbrella_target
                .as_deref()
                .and_then(|umbrella_version| {
                    self.align(&fix.dependency_name, &fix.recommended_version, umbrella_version, &peer_refs)
                })
                .unwrap_or_else(|| {
                    self.reconcile(
                        &fix.dependency_name,
                        &fix.current_version,
                        &fix.recommended_version,
                        state.runtime_major,
                    )
                });
            debug!(
                dependency = %fix.dependency_name,
                umbrella = %umbrella,
                target = %resolution.target_version,
                "Aligned with umbrella family"
            );
            fixes[idx].target_version = resolution.target_version.clone();
            resolutions[idx] = Some(resolution);
        }

        resolutions
            .into_iter()
            .zip(fixes.iter())
            .map(|(resolution, fix)| {
                resolution.unwrap_or_else(|| Resolution::recommended(&fix.target_version, None))
            })
            .collect()
    }
}
