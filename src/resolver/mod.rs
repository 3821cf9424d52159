//! # Dependency Resolver
//!
//! Expands a requested set of component names into a complete, ordered
//! deployment set.
//!
//! Resolution runs in two phases:
//!
//! 1. **Expansion**: depth-first walk over `requires`, marking components as
//!    in-progress while their dependencies are visited. Revisiting an
//!    in-progress component means the active chain is a cycle.
//! 2. **Ordering**: Kahn's algorithm over the expanded set. Whenever several
//!    components are ready at once, the highest `priority` goes first and ties
//!    fall back to ascending name, so the output is deterministic.

use crate::catalog::{Component, ComponentCatalog};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use thiserror::Error;

/// Errors produced while resolving a component request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no components requested")]
    EmptyRequest,

    #[error("unknown components: {}", .names.join(", "))]
    UnknownComponents { names: Vec<String> },

    #[error("component '{component}' requires '{dependency}', which is not in the catalog")]
    MissingDependency {
        component: String,
        dependency: String,
    },

    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

pub type ResolutionResult<T> = Result<T, ResolutionError>;

/// Fully expanded, topologically ordered components for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSet {
    pub platform: String,
    pub requested: Vec<String>,
    pub components: Vec<Component>,
}

impl ResolvedSet {
    pub fn names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.components.iter().position(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Heap entry for components whose dependencies are all placed
#[derive(Debug, PartialEq, Eq)]
struct Ready<'a> {
    priority: i32,
    name: &'a str,
}

impl Ord for Ready<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest entry: higher priority, then lower name
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.name.cmp(self.name))
    }
}

impl PartialOrd for Ready<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stateless resolver over a catalog
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver<'a> {
    catalog: &'a ComponentCatalog,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(catalog: &'a ComponentCatalog) -> Self {
        Self { catalog }
    }

    /// Resolve `requested` into an ordered deployment set for `platform`.
    ///
    /// Platform support is not checked here; that belongs to compatibility
    /// validation, which reports every violator at once.
    pub fn resolve<S: AsRef<str>>(
        &self,
        requested: &[S],
        platform: &str,
    ) -> ResolutionResult<ResolvedSet> {
        if requested.is_empty() {
            return Err(ResolutionError::EmptyRequest);
        }

        let unknown: BTreeSet<String> = requested
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !self.catalog.contains(name))
            .map(str::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(ResolutionError::UnknownComponents {
                names: unknown.into_iter().collect(),
            });
        }

        let expanded = self.expand(requested)?;
        let components = self.order(&expanded)?;

        let mut seen = BTreeSet::new();
        let requested = requested
            .iter()
            .map(|name| name.as_ref().to_string())
            .filter(|name| seen.insert(name.clone()))
            .collect();

        Ok(ResolvedSet {
            platform: platform.to_string(),
            requested,
            components: components.into_iter().cloned().collect(),
        })
    }

    /// Depth-first expansion of the requested names over `requires`
    fn expand<S: AsRef<str>>(&self, requested: &[S]) -> ResolutionResult<Vec<&'a Component>> {
        let mut marks: HashMap<&'a str, Mark> = HashMap::new();
        let mut chain: Vec<&'a str> = Vec::new();
        let mut collected = Vec::new();

        for name in requested {
            let component = self
                .catalog
                .find(name.as_ref())
                .ok_or_else(|| ResolutionError::UnknownComponents {
                    names: vec![name.as_ref().to_string()],
                })?;
            self.visit(component, &mut marks, &mut chain, &mut collected)?;
        }

        Ok(collected)
    }

    fn visit(
        &self,
        component: &'a Component,
        marks: &mut HashMap<&'a str, Mark>,
        chain: &mut Vec<&'a str>,
        collected: &mut Vec<&'a Component>,
    ) -> ResolutionResult<()> {
        match marks.get(component.name.as_str()) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = chain
                    .iter()
                    .position(|name| *name == component.name)
                    .unwrap_or(0);
                let mut cycle: Vec<String> = chain[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(component.name.clone());
                return Err(ResolutionError::CyclicDependency { cycle });
            }
            None => {}
        }

        marks.insert(component.name.as_str(), Mark::InProgress);
        chain.push(component.name.as_str());

        for dependency in &component.requires {
            let required = self.catalog.find(dependency).ok_or_else(|| {
                ResolutionError::MissingDependency {
                    component: component.name.clone(),
                    dependency: dependency.clone(),
                }
            })?;
            self.visit(required, marks, chain, collected)?;
        }

        chain.pop();
        marks.insert(component.name.as_str(), Mark::Done);
        collected.push(component);
        Ok(())
    }

    /// Topological order with priority/name tie-breaking
    fn order(&self, expanded: &[&'a Component]) -> ResolutionResult<Vec<&'a Component>> {
        let by_name: HashMap<&str, &'a Component> =
            expanded.iter().map(|c| (c.name.as_str(), *c)).collect();

        let mut pending: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for component in expanded {
            let dependencies: BTreeSet<&str> =
                component.requires.iter().map(String::as_str).collect();
            pending.insert(component.name.as_str(), dependencies.len());
            for dependency in dependencies {
                dependents
                    .entry(dependency)
                    .or_default()
                    .push(component.name.as_str());
            }
        }

        let mut ready: BinaryHeap<Ready<'_>> = expanded
            .iter()
            .filter(|c| pending.get(c.name.as_str()) == Some(&0))
            .map(|c| Ready {
                priority: c.priority,
                name: c.name.as_str(),
            })
            .collect();

        let mut ordered = Vec::with_capacity(expanded.len());
        while let Some(next) = ready.pop() {
            ordered.push(by_name[next.name]);
            for dependent in dependents.get(next.name).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Ready {
                            priority: by_name[dependent].priority,
                            name: dependent,
                        });
                    }
                }
            }
        }

        if ordered.len() != expanded.len() {
            // Expansion rejects cycles first; reaching here means the graph changed shape
            let mut stuck: Vec<String> = pending
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(name, _)| name.to_string())
                .collect();
            stuck.sort();
            return Err(ResolutionError::CyclicDependency { cycle: stuck });
        }

        Ok(ordered)
    }
}
