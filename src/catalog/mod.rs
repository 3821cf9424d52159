//! # Component Catalog
//!
//! Static, read-only registry of deployable components. The catalog is the
//! leaf of the orchestration pipeline: the resolver, validator and planner only
//! ever read from it.
//!
//! Lookups by name are O(1); listings are grouped by platform and category for
//! presentation.

mod builtin;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

/// Platform marker for components that run on every platform.
pub const UNIVERSAL_PLATFORM: &str = "universal";

/// Conventional category tags
pub mod categories {
    pub const FOUNDATION: &str = "foundation";
    pub const RUNTIME: &str = "runtime";
    pub const SERVICE: &str = "service";
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_category() -> String {
    categories::SERVICE.to_string()
}

/// Host resources a component needs in order to be deployed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    pub min_memory_mb: u64,
    pub min_disk_mb: u64,
    pub cpu_cores: u32,
    pub ports: BTreeSet<u16>,
}

/// A named, versioned deployable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub platforms: BTreeSet<String>,
    /// Hard dependencies, in declaration order
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub conflicts: BTreeSet<String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Higher deploys first among independent components
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_category")]
    pub category: String,
}

impl Component {
    /// Create a component with no platforms, dependencies or resource needs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: default_version(),
            platforms: BTreeSet::new(),
            requires: Vec::new(),
            conflicts: BTreeSet::new(),
            resources: ResourceRequirements::default(),
            priority: 0,
            category: default_category(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms.extend(platforms.into_iter().map(Into::into));
        self
    }

    /// Append hard dependencies, keeping the first occurrence of each name
    pub fn with_requires<I, S>(mut self, requires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dependency in requires {
            let dependency = dependency.into();
            if !self.requires.contains(&dependency) {
                self.requires.push(dependency);
            }
        }
        self
    }

    pub fn with_conflicts<I, S>(mut self, conflicts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conflicts.extend(conflicts.into_iter().map(Into::into));
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Whether the component can be deployed on `platform`
    pub fn supports_platform(&self, platform: &str) -> bool {
        self.platforms.contains(platform) || self.platforms.contains(UNIVERSAL_PLATFORM)
    }

    /// Whether this component declares a conflict with `other`
    pub fn declares_conflict_with(&self, other: &str) -> bool {
        self.conflicts.contains(other)
    }
}

/// Errors raised while building or querying a catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("component '{name}' not found in catalog")]
    NotFound { name: String },

    #[error("component '{name}' is defined more than once")]
    DuplicateComponent { name: String },

    #[error("invalid catalog definition: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read catalog file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Presentation form of a component used in listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub name: String,
    pub description: String,
    pub version: String,
    pub category: String,
    pub platforms: Vec<String>,
    pub requires: Vec<String>,
}

impl From<&Component> for ComponentSummary {
    fn from(component: &Component) -> Self {
        Self {
            name: component.name.clone(),
            description: component.description.clone(),
            version: component.version.clone(),
            category: component.category.clone(),
            platforms: component.platforms.iter().cloned().collect(),
            requires: component.requires.clone(),
        }
    }
}

/// Components grouped for the "list components" operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentListing {
    pub by_platform: BTreeMap<String, Vec<ComponentSummary>>,
    pub by_category: BTreeMap<String, Vec<ComponentSummary>>,
    pub all_components: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    List(Vec<Component>),
    Wrapped { components: Vec<Component> },
}

/// Read-only component registry
#[derive(Debug, Clone, Default)]
pub struct ComponentCatalog {
    components: HashMap<String, Component>,
}

impl ComponentCatalog {
    /// Build a catalog, rejecting duplicate component names
    pub fn new(components: impl IntoIterator<Item = Component>) -> CatalogResult<Self> {
        let mut index = HashMap::new();
        for component in components {
            if index.contains_key(&component.name) {
                return Err(CatalogError::DuplicateComponent {
                    name: component.name,
                });
            }
            index.insert(component.name.clone(), component);
        }
        Ok(Self { components: index })
    }

    /// The stock fleet catalog
    pub fn builtin() -> Self {
        Self {
            components: builtin::components()
                .into_iter()
                .map(|component| (component.name.clone(), component))
                .collect(),
        }
    }

    /// Parse a catalog from JSON: either a bare array of components or an
    /// object with a `components` array
    pub fn from_json_str(json: &str) -> CatalogResult<Self> {
        let components = match serde_json::from_str::<CatalogDocument>(json)? {
            CatalogDocument::List(components) => components,
            CatalogDocument::Wrapped { components } => components,
        };
        Self::new(components)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn get(&self, name: &str) -> CatalogResult<&Component> {
        self.components
            .get(name)
            .ok_or_else(|| CatalogError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn find(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// All components, ordered by name
    pub fn all(&self) -> Vec<&Component> {
        let mut components: Vec<&Component> = self.components.values().collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));
        components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Group components for listing. With a platform filter only components
    /// deployable on that platform (including universal ones) are listed.
    pub fn listing(&self, platform_filter: Option<&str>) -> ComponentListing {
        let mut listing = ComponentListing::default();

        for component in self.all() {
            if let Some(platform) = platform_filter {
                if !component.supports_platform(platform) {
                    continue;
                }
            }

            let summary = ComponentSummary::from(component);
            for platform in &component.platforms {
                listing
                    .by_platform
                    .entry(platform.clone())
                    .or_default()
                    .push(summary.clone());
            }
            listing
                .by_category
                .entry(component.category.clone())
                .or_default()
                .push(summary);
            listing.all_components.push(component.name.clone());
        }

        listing
    }
}
