// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance-policy admission.
//!
//! An [`InstancePolicy`] constrains the instances a node group will accept:
//! a non-empty sequence of alternative min/max sizing brackets, a standard
//! spec used when the caller does not size the instance explicitly, the set
//! of permitted disk templates, and vcpu/spindle overcommit limits.
//! [`InstancePolicy::evaluate`] is a pure function over a policy snapshot;
//! [`Admitter`] wraps it with logging for use inside a request handler.

use std::collections::BTreeSet;
use std::fmt::Display;

use corral_types::{DiskTemplate, InstanceSpec, SpecDimension};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One alternative sizing constraint. A spec satisfies the bracket iff it
/// lies between `min` and `max` (inclusive) in every dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize,
         JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PolicyBracket {
    pub min: InstanceSpec,
    pub max: InstanceSpec,
}

impl PolicyBracket {
    pub fn contains(&self, spec: &InstanceSpec) -> bool {
        SpecDimension::ALL.iter().all(|&d| {
            self.min.get(d) <= spec.get(d) && spec.get(d) <= self.max.get(d)
        })
    }

    /// How badly `spec` misses this bracket: the per-dimension overshoot
    /// (in either direction) normalized by the bracket's max, summed over
    /// all dimensions. Zero iff the bracket contains the spec.
    fn violation_score(&self, spec: &InstanceSpec) -> f64 {
        SpecDimension::ALL
            .iter()
            .map(|&d| {
                let value = spec.get(d);
                let over = value.saturating_sub(self.max.get(d));
                let under = self.min.get(d).saturating_sub(value);
                (over + under) as f64 / self.max.get(d).max(1) as f64
            })
            .sum()
    }

    fn deltas(&self, spec: &InstanceSpec) -> Vec<DimensionDelta> {
        SpecDimension::ALL
            .iter()
            .filter_map(|&d| {
                let value = spec.get(d);
                if value > self.max.get(d) {
                    Some(DimensionDelta {
                        dimension: d,
                        direction: Direction::TooHigh,
                        amount: value - self.max.get(d),
                    })
                } else if value < self.min.get(d) {
                    Some(DimensionDelta {
                        dimension: d,
                        direction: Direction::TooLow,
                        amount: self.min.get(d) - value,
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Which side of a bracket a dimension fell out of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize,
         JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    TooLow,
    TooHigh,
}

/// A single dimension's distance from the closest bracket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize,
         JsonSchema)]
pub struct DimensionDelta {
    pub dimension: SpecDimension,
    pub direction: Direction,
    pub amount: u64,
}

impl Display for DimensionDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.direction {
            Direction::TooLow => "too low",
            Direction::TooHigh => "too high",
        };
        write!(f, "{} {} by {}", self.dimension, side, self.amount)
    }
}

/// Why an instance spec was turned away.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum RejectReason {
    /// The requested disk template is not permitted by the policy. Brackets
    /// are not evaluated in this case.
    DisallowedDiskTemplate { template: DiskTemplate },

    /// No bracket contains the spec. `closest` indexes the bracket with the
    /// lowest violation score (earliest on ties) and `deltas` describes the
    /// spec's distance from it, dimension by dimension.
    NoMatchingBracket { closest: usize, deltas: Vec<DimensionDelta> },
}

/// The bracket-based admission decision.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "decision", rename_all = "kebab-case")]
pub enum Decision {
    /// `bracket` indexes the first bracket the spec satisfied. Matching is
    /// disjunctive, so the index is diagnostic only.
    Accepted { bracket: usize },
    Rejected(RejectReason),
}

/// An overcommit-ratio finding. These are advisory: the caller decides
/// whether to treat them as hard failures or warnings.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RatioFinding {
    pub dimension: RatioDimension,
    pub actual: f64,
    pub limit: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize,
         JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RatioDimension {
    Vcpu,
    Spindle,
}

impl Display for RatioDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RatioDimension::Vcpu => "vcpu",
            RatioDimension::Spindle => "spindle",
        };
        write!(f, "{}", name)
    }
}

/// The full outcome of an admission request: the bracket decision plus any
/// ratio findings, which travel alongside (never instead of) the decision.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Admission {
    #[serde(flatten)]
    pub decision: Decision,
    pub advisories: Vec<RatioFinding>,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self.decision, Decision::Accepted { .. })
    }
}

/// Node-group aggregates for the overcommit checks, supplied by the caller
/// because only the surrounding layers know the group's membership.
#[derive(Clone, Copy, Debug, Default)]
pub struct GroupUtilization {
    /// Sum of vcpu counts over the group's instances, including the
    /// candidate.
    pub instance_vcpus: u64,
    /// Sum of physical cpu capacities over the group's nodes.
    pub node_cpus: u64,
    pub instance_spindles: u64,
    pub node_spindles: u64,
}

/// Errors detected while constructing an [`InstancePolicy`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("an instance policy requires at least one min/max bracket")]
    NoBrackets,

    #[error(
        "bracket {index} has {dimension} min {min} above its max {max}"
    )]
    InvertedBracket {
        index: usize,
        dimension: SpecDimension,
        min: u64,
        max: u64,
    },

    #[error("the standard spec does not fit any bracket")]
    StdOutsideBrackets,

    #[error("the {0} ratio limit must be positive")]
    NonPositiveRatio(RatioDimension),
}

/// A node group's sizing policy. Immutable once constructed; the
/// constructor enforces the invariants the evaluator relies on.
#[derive(Clone, Debug, PartialEq, Serialize, JsonSchema)]
pub struct InstancePolicy {
    brackets: Vec<PolicyBracket>,
    std: InstanceSpec,
    allowed_disk_templates: BTreeSet<DiskTemplate>,
    vcpu_ratio: f64,
    spindle_ratio: f64,
}

impl InstancePolicy {
    pub fn new(
        brackets: Vec<PolicyBracket>,
        std: InstanceSpec,
        allowed_disk_templates: BTreeSet<DiskTemplate>,
        vcpu_ratio: f64,
        spindle_ratio: f64,
    ) -> Result<Self, PolicyError> {
        if brackets.is_empty() {
            return Err(PolicyError::NoBrackets);
        }
        for (index, bracket) in brackets.iter().enumerate() {
            for &dimension in &SpecDimension::ALL {
                let (min, max) =
                    (bracket.min.get(dimension), bracket.max.get(dimension));
                if min > max {
                    return Err(PolicyError::InvertedBracket {
                        index,
                        dimension,
                        min,
                        max,
                    });
                }
            }
        }
        if !brackets.iter().any(|b| b.contains(&std)) {
            return Err(PolicyError::StdOutsideBrackets);
        }
        if !(vcpu_ratio > 0.0) {
            return Err(PolicyError::NonPositiveRatio(RatioDimension::Vcpu));
        }
        if !(spindle_ratio > 0.0) {
            return Err(PolicyError::NonPositiveRatio(
                RatioDimension::Spindle,
            ));
        }
        Ok(Self { brackets, std, allowed_disk_templates, vcpu_ratio, spindle_ratio })
    }

    pub fn brackets(&self) -> &[PolicyBracket] {
        &self.brackets
    }

    pub fn std(&self) -> InstanceSpec {
        self.std
    }

    pub fn allowed_disk_templates(&self) -> &BTreeSet<DiskTemplate> {
        &self.allowed_disk_templates
    }

    pub fn vcpu_ratio(&self) -> f64 {
        self.vcpu_ratio
    }

    pub fn spindle_ratio(&self) -> f64 {
        self.spindle_ratio
    }

    /// Decides whether `spec`, using `template` for its disks, is
    /// admissible under this policy. When `group` aggregates are supplied
    /// the overcommit ratios are checked as well and reported as
    /// advisories on the result.
    pub fn evaluate(
        &self,
        spec: &InstanceSpec,
        template: DiskTemplate,
        group: Option<&GroupUtilization>,
    ) -> Admission {
        let advisories =
            group.map(|g| self.ratio_findings(g)).unwrap_or_default();

        if !self.allowed_disk_templates.contains(&template) {
            return Admission {
                decision: Decision::Rejected(
                    RejectReason::DisallowedDiskTemplate { template },
                ),
                advisories,
            };
        }

        if let Some(bracket) =
            self.brackets.iter().position(|b| b.contains(spec))
        {
            return Admission {
                decision: Decision::Accepted { bracket },
                advisories,
            };
        }

        // No bracket matched; report the distance from the least-violated
        // one. Strict comparison keeps the earliest bracket on ties.
        let closest = self
            .brackets
            .iter()
            .enumerate()
            .map(|(i, b)| (i, b.violation_score(spec)))
            .fold((0, f64::INFINITY), |best, cand| {
                if cand.1 < best.1 {
                    cand
                } else {
                    best
                }
            })
            .0;
        Admission {
            decision: Decision::Rejected(RejectReason::NoMatchingBracket {
                closest,
                deltas: self.brackets[closest].deltas(spec),
            }),
            advisories,
        }
    }

    fn ratio_findings(&self, group: &GroupUtilization) -> Vec<RatioFinding> {
        let mut findings = Vec::new();
        for (dimension, usage, capacity, limit) in [
            (
                RatioDimension::Vcpu,
                group.instance_vcpus,
                group.node_cpus,
                self.vcpu_ratio,
            ),
            (
                RatioDimension::Spindle,
                group.instance_spindles,
                group.node_spindles,
                self.spindle_ratio,
            ),
        ] {
            // Nonzero usage against zero capacity is an unconditional
            // violation; an idle group against zero capacity is not.
            let actual = if capacity == 0 {
                if usage == 0 {
                    0.0
                } else {
                    f64::INFINITY
                }
            } else {
                usage as f64 / capacity as f64
            };
            if actual > limit {
                findings.push(RatioFinding { dimension, actual, limit });
            }
        }
        findings
    }
}

/// Evaluates admission requests against a policy snapshot, logging each
/// outcome. In-flight requests keep the snapshot they were given; a policy
/// change builds a new `Admitter`.
pub struct Admitter {
    policy: InstancePolicy,
    log: slog::Logger,
}

impl Admitter {
    pub fn new(policy: InstancePolicy, log: slog::Logger) -> Self {
        Self { policy, log }
    }

    pub fn policy(&self) -> &InstancePolicy {
        &self.policy
    }

    pub fn admit(
        &self,
        spec: &InstanceSpec,
        template: DiskTemplate,
        group: Option<&GroupUtilization>,
    ) -> Admission {
        let admission = self.policy.evaluate(spec, template, group);
        match &admission.decision {
            Decision::Accepted { bracket } => {
                slog::debug!(self.log, "instance spec accepted";
                    "bracket" => *bracket,
                    "advisories" => admission.advisories.len());
            }
            Decision::Rejected(reason) => {
                slog::info!(self.log, "instance spec rejected";
                    "reason" => ?reason);
            }
        }
        for finding in &admission.advisories {
            slog::warn!(self.log, "overcommit ratio exceeded";
                "dimension" => %finding.dimension,
                "actual" => finding.actual,
                "limit" => finding.limit);
        }
        admission
    }
}
