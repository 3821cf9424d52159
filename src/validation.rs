//! # Compatibility and Request Validation
//!
//! Two kinds of checks live here:
//!
//! - [`CompatibilityValidator`] checks a resolved set against the target
//!   platform and the available host capacity. It is pure and always runs
//!   every check, so a [`ValidationReport`] lists every violation at once.
//! - Request input checks (environment names, target host identifiers and the
//!   free-form options payload) guard what callers send in before anything is
//!   resolved.

use crate::catalog::{Component, UNIVERSAL_PLATFORM};
use crate::error::{FleetError, Result};
use crate::resolver::ResolvedSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Maximum allowed size for an options payload (1MB)
const MAX_JSON_SIZE_BYTES: usize = 1024 * 1024;

/// Maximum nesting depth for JSON objects/arrays
const MAX_JSON_DEPTH: usize = 10;

/// Maximum number of keys in a JSON object
const MAX_JSON_KEYS: usize = 1000;

/// Maximum string length for JSON string values
const MAX_JSON_STRING_LENGTH: usize = 10000;

/// Maximum length of a single host identifier
const MAX_HOST_ID_LENGTH: usize = 253;

/// Host capacity a resolved set is validated against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailableResources {
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub cpu_cores: u32,
    /// Ports already bound on the target hosts
    pub occupied_ports: BTreeSet<u16>,
}

impl Default for AvailableResources {
    fn default() -> Self {
        Self {
            memory_mb: 16 * 1024,
            disk_mb: 100 * 1024,
            cpu_cores: 8,
            occupied_ports: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Memory,
    Disk,
    CpuCores,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory (MB)"),
            Self::Disk => write!(f, "disk (MB)"),
            Self::CpuCores => write!(f, "cpu cores"),
        }
    }
}

/// A single compatibility problem with a resolved set
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// `components` names every component blamed. With `disjoint` set the
    /// platform-specific components share no platform at all and all of them
    /// are named; `unsupported` is the subset lacking `platform` itself.
    #[error("platform conflict on '{platform}': {}", .components.join(", "))]
    PlatformConflict {
        platform: String,
        components: Vec<String>,
        unsupported: Vec<String>,
        disjoint: bool,
    },

    #[error("component '{component}' conflicts with '{conflicts_with}'")]
    Conflict {
        component: String,
        conflicts_with: String,
    },

    #[error("insufficient {resource}: required {required}, available {available}")]
    InsufficientResources {
        resource: ResourceKind,
        required: u64,
        available: u64,
    },

    #[error("port {port} claimed by more than one component: {}", .claimants.join(", "))]
    PortCollision { port: u16, claimants: Vec<String> },

    #[error("port {port} needed by '{component}' is already in use on the target")]
    PortUnavailable { port: u16, component: String },
}

/// Aggregate resource needs of a resolved set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub memory_mb: u64,
    pub disk_mb: u64,
    /// Components share cores, so this is the max rather than a sum
    pub cpu_cores: u32,
    pub ports: BTreeSet<u16>,
}

/// Every violation found in one validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub totals: ResourceTotals,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.violations.as_slice() {
            [] => write!(f, "compatible"),
            [only] => write!(f, "{only}"),
            many => {
                write!(f, "{} compatibility violations", many.len())?;
                for violation in many {
                    write!(f, "; {violation}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationReport {}

/// Pure compatibility checks over a resolved set
#[derive(Debug, Clone)]
pub struct CompatibilityValidator {
    available: AvailableResources,
}

impl CompatibilityValidator {
    pub fn new(available: AvailableResources) -> Self {
        Self { available }
    }

    pub fn available(&self) -> &AvailableResources {
        &self.available
    }

    /// Run every check and collect all violations.
    ///
    /// Checks are reported in a fixed order: platform support, mutual
    /// conflicts, then resources and ports.
    pub fn validate(&self, set: &ResolvedSet) -> ValidationReport {
        let mut violations = Vec::new();

        check_platform(&set.components, &set.platform, &mut violations);
        check_conflicts(&set.components, &mut violations);
        let totals = self.check_resources(&set.components, &mut violations);

        ValidationReport { violations, totals }
    }

    /// Like [`validate`](Self::validate) but as a `Result`
    pub fn check(&self, set: &ResolvedSet) -> std::result::Result<ResourceTotals, ValidationReport> {
        let report = self.validate(set);
        if report.is_valid() {
            Ok(report.totals)
        } else {
            Err(report)
        }
    }

    fn check_resources(
        &self,
        components: &[Component],
        violations: &mut Vec<Violation>,
    ) -> ResourceTotals {
        let mut totals = ResourceTotals::default();
        let mut claims: BTreeMap<u16, Vec<String>> = BTreeMap::new();

        for component in components {
            let needs = &component.resources;
            totals.memory_mb = totals.memory_mb.saturating_add(needs.min_memory_mb);
            totals.disk_mb = totals.disk_mb.saturating_add(needs.min_disk_mb);
            totals.cpu_cores = totals.cpu_cores.max(needs.cpu_cores);
            for port in &needs.ports {
                claims.entry(*port).or_default().push(component.name.clone());
            }
        }

        let capacity = [
            (ResourceKind::Memory, totals.memory_mb, self.available.memory_mb),
            (ResourceKind::Disk, totals.disk_mb, self.available.disk_mb),
            (
                ResourceKind::CpuCores,
                u64::from(totals.cpu_cores),
                u64::from(self.available.cpu_cores),
            ),
        ];
        for (resource, required, available) in capacity {
            if required > available {
                violations.push(Violation::InsufficientResources {
                    resource,
                    required,
                    available,
                });
            }
        }

        for (port, claimants) in &claims {
            if claimants.len() > 1 {
                violations.push(Violation::PortCollision {
                    port: *port,
                    claimants: claimants.clone(),
                });
            }
            if self.available.occupied_ports.contains(port) {
                for component in claimants {
                    violations.push(Violation::PortUnavailable {
                        port: *port,
                        component: component.clone(),
                    });
                }
            }
        }

        totals.ports = claims.into_keys().collect();
        totals
    }
}

impl Default for CompatibilityValidator {
    fn default() -> Self {
        Self::new(AvailableResources::default())
    }
}

fn check_platform(components: &[Component], platform: &str, violations: &mut Vec<Violation>) {
    let specific: Vec<&Component> = components
        .iter()
        .filter(|c| !c.platforms.contains(UNIVERSAL_PLATFORM))
        .collect();
    let common = specific
        .iter()
        .map(|c| c.platforms.iter().collect::<BTreeSet<_>>())
        .reduce(|shared, next| shared.intersection(&next).copied().collect());

    // Components with no platform in common are all named, not just the ones
    // missing the target platform
    let disjoint = specific.len() > 1 && common.is_some_and(|c| c.is_empty());
    let unsupported: Vec<String> = components
        .iter()
        .filter(|c| !c.supports_platform(platform))
        .map(|c| c.name.clone())
        .collect();
    let conflicting: Vec<String> = if disjoint {
        specific.iter().map(|c| c.name.clone()).collect()
    } else {
        unsupported.clone()
    };

    if !conflicting.is_empty() {
        violations.push(Violation::PlatformConflict {
            platform: platform.to_string(),
            components: conflicting,
            unsupported,
            disjoint,
        });
    }
}

/// Pairwise scan; a conflict declared from either side is reported once
fn check_conflicts(components: &[Component], violations: &mut Vec<Violation>) {
    for (i, left) in components.iter().enumerate() {
        for right in &components[i + 1..] {
            if left.declares_conflict_with(&right.name) || right.declares_conflict_with(&left.name)
            {
                violations.push(Violation::Conflict {
                    component: left.name.clone(),
                    conflicts_with: right.name.clone(),
                });
            }
        }
    }
}

/// Validates the target environment against the configured list
pub fn validate_environment(environment: &str, allowed: &[String]) -> Result<()> {
    if allowed.iter().any(|e| e == environment) {
        Ok(())
    } else {
        Err(FleetError::InvalidRequest {
            reason: format!(
                "invalid environment '{environment}', must be one of: {}",
                allowed.join(", ")
            ),
        })
    }
}

/// Validates host identifiers: non-empty, bounded, no whitespace
pub fn validate_target_hosts<'a>(hosts: impl IntoIterator<Item = &'a String>) -> Result<()> {
    for host in hosts {
        if host.is_empty() || host.len() > MAX_HOST_ID_LENGTH {
            return Err(FleetError::InvalidRequest {
                reason: format!(
                    "host identifier must be 1..={MAX_HOST_ID_LENGTH} characters, got {}",
                    host.len()
                ),
            });
        }
        if host.chars().any(char::is_whitespace) {
            return Err(FleetError::InvalidRequest {
                reason: format!("host identifier '{host}' contains whitespace"),
            });
        }
    }
    Ok(())
}

/// Validates the free-form job options payload
pub fn validate_options_payload(options: &Value) -> Result<()> {
    match options {
        Value::Null | Value::Object(_) => {}
        _ => {
            return Err(FleetError::InvalidRequest {
                reason: "job options must be a JSON object".to_string(),
            })
        }
    }

    let serialized = serde_json::to_string(options).map_err(|e| FleetError::InvalidRequest {
        reason: format!("invalid JSON structure: {e}"),
    })?;

    if serialized.len() > MAX_JSON_SIZE_BYTES {
        return Err(FleetError::InvalidRequest {
            reason: format!(
                "options payload too large: {} bytes (max: {MAX_JSON_SIZE_BYTES})",
                serialized.len()
            ),
        });
    }

    validate_json_depth(options, 0)
}

fn validate_json_depth(value: &Value, current_depth: usize) -> Result<()> {
    let invalid = |reason: String| Err(FleetError::InvalidRequest { reason });

    if current_depth > MAX_JSON_DEPTH {
        return invalid(format!(
            "options nesting too deep: {current_depth} (max: {MAX_JSON_DEPTH})"
        ));
    }

    match value {
        Value::Object(map) => {
            if map.len() > MAX_JSON_KEYS {
                return invalid(format!(
                    "too many option keys: {} (max: {MAX_JSON_KEYS})",
                    map.len()
                ));
            }
            for (key, val) in map {
                if key.len() > MAX_JSON_STRING_LENGTH {
                    return invalid(format!(
                        "option key too long: {} chars (max: {MAX_JSON_STRING_LENGTH})",
                        key.len()
                    ));
                }
                validate_json_depth(val, current_depth + 1)?;
            }
        }
        Value::Array(items) => {
            if items.len() > MAX_JSON_KEYS {
                return invalid(format!(
                    "option array too large: {} items (max: {MAX_JSON_KEYS})",
                    items.len()
                ));
            }
            for item in items {
                validate_json_depth(item, current_depth + 1)?;
            }
        }
        Value::String(s) if s.len() > MAX_JSON_STRING_LENGTH => {
            return invalid(format!(
                "option string too long: {} chars (max: {MAX_JSON_STRING_LENGTH})",
                s.len()
            ));
        }
        _ => {}
    }

    Ok(())
}
