use serde::{Deserialize, Serialize};
use std::fmt;

/// How a job applies its plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Apply the plan for real
    #[default]
    Normal,
    /// Produce the plan only; the executor is never called
    #[serde(alias = "dry-run")]
    DryRun,
    /// Executor runs in its own validate-only mode
    Check,
    /// Apply for real, skipping interactive confirmations and soft pre-flight checks
    Force,
}

impl ExecutionMode {
    /// Whether the executor is invoked for this mode
    pub fn executes(&self) -> bool {
        !matches!(self, Self::DryRun)
    }

    /// Whether the executor may change host state
    pub fn applies_changes(&self) -> bool {
        matches!(self, Self::Normal | Self::Force)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::DryRun => "dry_run",
            Self::Check => "check",
            Self::Force => "force",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "dry_run" | "dry-run" => Ok(Self::DryRun),
            "check" => Ok(Self::Check),
            "force" => Ok(Self::Force),
            _ => Err(format!("Invalid execution mode: {s}")),
        }
    }
}
