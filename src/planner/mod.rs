//! # Execution Planner
//!
//! Turns a validated [`ResolvedSet`] into an [`ExecutionPlan`]: one step per
//! component, in resolution order, each with an estimated duration range and a
//! human-readable change summary. Plans are data only; the execution mode is
//! recorded on the plan and interpreted by the job manager.

mod mode;

pub use mode::ExecutionMode;

use crate::catalog::categories;
use crate::resolver::ResolvedSet;
use crate::validation::ResourceTotals;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Inclusive duration range in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationEstimate {
    pub min_seconds: u64,
    pub max_seconds: u64,
}

impl DurationEstimate {
    pub const fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            max_seconds,
        }
    }

    /// Rough per-step estimate keyed on component category
    pub fn for_category(category: &str) -> Self {
        match category {
            categories::FOUNDATION => Self::new(60, 180),
            categories::RUNTIME => Self::new(120, 300),
            categories::SERVICE => Self::new(180, 480),
            _ => Self::new(120, 360),
        }
    }
}

impl Add for DurationEstimate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.min_seconds + rhs.min_seconds,
            self.max_seconds + rhs.max_seconds,
        )
    }
}

impl std::iter::Sum for DurationEstimate {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl fmt::Display for DurationEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = |s: u64| s.div_ceil(60);
        write!(
            f,
            "{}-{} min",
            minutes(self.min_seconds),
            minutes(self.max_seconds)
        )
    }
}

/// One component's slot in the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Zero-based position in the plan
    pub index: usize,
    pub component: String,
    pub version: String,
    pub category: String,
    pub requires: Vec<String>,
    pub estimate: DurationEstimate,
    pub summary: String,
}

/// Ordered steps for a resolved set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    pub platform: String,
    pub steps: Vec<PlanStep>,
    pub estimate: DurationEstimate,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn component_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.component.clone()).collect()
    }

    /// `+ name version` for each component the plan would install
    pub fn diff_lines(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|s| format!("+ {} {}", s.component, s.version))
            .collect()
    }

    /// The plan written out as log lines, as a dry run records it
    pub fn describe(&self) -> Vec<String> {
        PlanPreview::new(self, ResourceTotals::default(), Vec::new()).render()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            mode: self.mode,
            platform: self.platform.clone(),
            step_count: self.steps.len(),
            components: self.component_names(),
            estimate: self.estimate,
        }
    }
}

/// Compact view of a plan for job listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub mode: ExecutionMode,
    pub platform: String,
    pub step_count: usize,
    pub components: Vec<String>,
    pub estimate: DurationEstimate,
}

/// Result of pre-flight validation without creating a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPreview {
    pub mode: ExecutionMode,
    pub platform: String,
    pub resolved_components: Vec<String>,
    pub steps: Vec<PlanStep>,
    pub estimate: DurationEstimate,
    pub diff: Vec<String>,
    pub warnings: Vec<String>,
    pub resources: ResourceTotals,
}

impl PlanPreview {
    pub fn new(plan: &ExecutionPlan, resources: ResourceTotals, warnings: Vec<String>) -> Self {
        Self {
            mode: plan.mode,
            platform: plan.platform.clone(),
            resolved_components: plan.component_names(),
            steps: plan.steps.clone(),
            estimate: plan.estimate,
            diff: plan.diff_lines(),
            warnings,
            resources,
        }
    }

    /// Render the preview as job log lines
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Plan ({}) for platform {}: {} step(s), estimated {}",
            self.mode,
            self.platform,
            self.steps.len(),
            self.estimate
        )];
        lines.extend(
            self.steps
                .iter()
                .map(|s| format!("  {}. {} [{}]", s.index + 1, s.summary, s.estimate)),
        );
        lines.extend(self.diff.iter().cloned());
        lines.extend(self.warnings.iter().map(|w| format!("warning: {w}")));
        lines
    }
}

/// Stateless plan builder
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionPlanner;

impl ExecutionPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, set: &ResolvedSet, mode: ExecutionMode) -> ExecutionPlan {
        let steps: Vec<PlanStep> = set
            .iter()
            .enumerate()
            .map(|(index, component)| PlanStep {
                index,
                component: component.name.clone(),
                version: component.version.clone(),
                category: component.category.clone(),
                requires: component.requires.clone(),
                estimate: DurationEstimate::for_category(&component.category),
                summary: change_summary(
                    &component.name,
                    &component.version,
                    &component.category,
                    &set.platform,
                    &component.requires,
                    mode,
                ),
            })
            .collect();

        ExecutionPlan {
            mode,
            platform: set.platform.clone(),
            estimate: steps.iter().map(|s| s.estimate).sum(),
            steps,
        }
    }
}

fn change_summary(
    name: &str,
    version: &str,
    category: &str,
    platform: &str,
    requires: &[String],
    mode: ExecutionMode,
) -> String {
    let action = format!("install {name} {version} ({category}) on {platform}");
    let mut summary = match mode {
        ExecutionMode::Normal => action,
        ExecutionMode::DryRun => format!("would {action}"),
        ExecutionMode::Check => format!("check {action} (no changes applied)"),
        ExecutionMode::Force => format!("{action} (forced, confirmations skipped)"),
    };
    if !requires.is_empty() {
        summary.push_str(&format!(" after {}", requires.join(", ")));
    }
    summary
}
