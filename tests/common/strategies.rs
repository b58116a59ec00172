use proptest::prelude::*;
use propflow_core::{PackageTemplate, StepDefinition};

/// Strategy for step identifiers
pub fn step_id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

/// Strategy for dependency lists of an acyclic template with `size` steps
///
/// Step `i` may only depend on steps `0..i`, so any choice is a DAG.
pub fn dag_dependencies_strategy(max_steps: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_steps).prop_flat_map(|size| {
        (0..size)
            .map(|index| {
                if index == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::collection::vec(0..index, 0..=index.min(3)).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

/// Strategy for a DAG plus one back edge that closes a cycle
///
/// The back edge goes from an earlier step to a later one that already reaches it.
pub fn cyclic_dependencies_strategy(max_steps: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2..=max_steps)
        .prop_flat_map(|size| (Just(size), 1..size))
        .prop_map(|(size, tail)| {
            // A chain 0 <- 1 <- ... <- size-1, then make `tail - 1` depend on `tail`
            let mut dependencies: Vec<Vec<usize>> = (0..size)
                .map(|index| if index == 0 { Vec::new() } else { vec![index - 1] })
                .collect();
            dependencies[tail - 1].push(tail);
            dependencies
        })
}

/// Build a template named `name` whose step `i` is `s{i}` with the given dependencies
pub fn template_from_dependencies(name: &str, dependencies: &[Vec<usize>]) -> PackageTemplate {
    dependencies
        .iter()
        .enumerate()
        .fold(PackageTemplate::new(name), |template, (index, deps)| {
            template.with_step(
                StepDefinition::new(format!("s{index}"), "noop")
                    .depends_on(deps.iter().map(|dep| format!("s{dep}"))),
            )
        })
}

/// Strategy for step priorities, including ties
pub fn priority_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![Just(0), Just(5), -10i32..10]
}
