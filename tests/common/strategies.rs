use fleet_core::catalog::{Component, UNIVERSAL_PLATFORM};
use proptest::prelude::*;

pub fn component_name(index: usize) -> String {
    format!("c{index:02}")
}

/// `n` components where each may only require components with a lower index,
/// so the graph is acyclic by construction
pub fn acyclic_components(n: usize) -> impl Strategy<Value = Vec<Component>> {
    let specs: Vec<_> = (0..n)
        .map(|i| (prop::collection::vec(any::<bool>(), i), -5i32..=5))
        .collect();

    specs.prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (mask, priority))| {
                let requires: Vec<String> = mask
                    .iter()
                    .enumerate()
                    .filter(|(_, required)| **required)
                    .map(|(j, _)| component_name(j))
                    .collect();
                Component::new(component_name(i))
                    .with_platforms([UNIVERSAL_PLATFORM])
                    .with_requires(requires)
                    .with_priority(priority)
            })
            .collect()
    })
}

/// An acyclic catalog plus a non-empty request drawn from it
pub fn catalog_and_request() -> impl Strategy<Value = (Vec<Component>, Vec<String>)> {
    (2usize..12).prop_flat_map(|n| {
        (
            acyclic_components(n),
            prop::collection::btree_set(0..n, 1..=n.min(3)),
        )
            .prop_map(|(components, picks)| {
                let request = picks.into_iter().map(component_name).collect();
                (components, request)
            })
    })
}

/// A ring of `n` components, each requiring the next; `n == 1` is a self-loop.
/// Returns the ring and the index of the member to request.
pub fn dependency_ring() -> impl Strategy<Value = (Vec<Component>, usize)> {
    (1usize..7).prop_flat_map(|n| {
        let ring: Vec<Component> = (0..n)
            .map(|i| {
                Component::new(component_name(i))
                    .with_platforms([UNIVERSAL_PLATFORM])
                    .with_requires([component_name((i + 1) % n)])
            })
            .collect();
        (Just(ring), 0..n)
    })
}
