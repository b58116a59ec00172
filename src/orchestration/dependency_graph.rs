//! # Dependency Graph
//!
//! Validates a package template and builds the step DAG the scheduler walks.
//!
//! Validation runs once, at template registration: duplicate ids, unknown dependency ids,
//! and cycles (self-dependencies included) are rejected, so runtime scheduling can treat
//! the graph as a valid DAG.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::constants::system;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::models::PackageTemplate;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StepNode {
    predecessors: Vec<String>,
    successors: Vec<String>,
}

/// Immediate predecessors and successors of every step, plus a topological order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: HashMap<String, StepNode>,
    topological_order: Vec<String>,
}

impl DependencyGraph {
    /// Validate `template` and build its graph.
    pub fn build(template: &PackageTemplate) -> OrchestrationResult<Self> {
        Self::validate_shape(template)?;

        let mut nodes: HashMap<String, StepNode> = HashMap::with_capacity(template.steps.len());
        for step in &template.steps {
            if nodes.insert(step.id.clone(), StepNode::default()).is_some() {
                return Err(OrchestrationError::DuplicateStep {
                    step_id: step.id.clone(),
                });
            }
        }

        for step in &template.steps {
            let mut seen = HashSet::new();
            for dependency in &step.dependency_ids {
                if !nodes.contains_key(dependency) {
                    return Err(OrchestrationError::UnknownDependency {
                        step_id: step.id.clone(),
                        dependency_id: dependency.clone(),
                    });
                }
                // Repeated dependency ids collapse into one edge
                if !seen.insert(dependency.as_str()) {
                    continue;
                }
                if let Some(node) = nodes.get_mut(&step.id) {
                    node.predecessors.push(dependency.clone());
                }
                if let Some(node) = nodes.get_mut(dependency) {
                    node.successors.push(step.id.clone());
                }
            }
        }

        let topological_order = Self::topological_sort(template, &nodes)?;

        Ok(Self {
            nodes,
            topological_order,
        })
    }

    fn validate_shape(template: &PackageTemplate) -> OrchestrationResult<()> {
        let invalid = |reason: String| OrchestrationError::InvalidTemplate {
            template: template.name.clone(),
            reason,
        };

        if template.name.trim().is_empty() {
            return Err(invalid("template name must not be empty".to_string()));
        }
        if template.steps.is_empty() {
            return Err(invalid("template must declare at least one step".to_string()));
        }
        if template.steps.len() > system::MAX_PACKAGE_STEPS {
            return Err(invalid(format!(
                "template declares {} steps, limit is {}",
                template.steps.len(),
                system::MAX_PACKAGE_STEPS
            )));
        }
        for step in &template.steps {
            if step.id.trim().is_empty() {
                return Err(invalid("step ids must not be empty".to_string()));
            }
            if step.handler_type.trim().is_empty() {
                return Err(invalid(format!("step '{}' has no handler_type", step.id)));
            }
            if step.max_retries.unwrap_or(0) > system::MAX_STEP_RETRIES {
                return Err(invalid(format!(
                    "step '{}' exceeds the retry limit of {}",
                    step.id,
                    system::MAX_STEP_RETRIES
                )));
            }
            if step.timeout_seconds == Some(0) {
                return Err(invalid(format!("step '{}' has a zero timeout", step.id)));
            }
        }
        Ok(())
    }

    /// Kahn's algorithm seeded in template order, so the result is deterministic.
    fn topological_sort(
        template: &PackageTemplate,
        nodes: &HashMap<String, StepNode>,
    ) -> OrchestrationResult<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = nodes
            .iter()
            .map(|(id, node)| (id.as_str(), node.predecessors.len()))
            .collect();

        let mut queue: VecDeque<&str> = template
            .steps
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for successor in &nodes[id].successors {
                if let Some(degree) = in_degree.get_mut(successor.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(successor.as_str());
                    }
                }
            }
        }

        if order.len() == nodes.len() {
            return Ok(order);
        }

        // Every unprocessed node sits on or behind a cycle; walk them to name one.
        let remaining: Vec<&str> = template
            .steps
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| in_degree.get(id).is_some_and(|d| *d > 0))
            .collect();

        Err(OrchestrationError::CyclicDependency {
            step_ids: Self::find_cycle(&remaining, nodes),
        })
    }

    /// Three-color DFS over the unresolved nodes, returning a closed path (first id repeated last).
    fn find_cycle(candidates: &[&str], nodes: &HashMap<String, StepNode>) -> Vec<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit<'a>(
            id: &'a str,
            nodes: &'a HashMap<String, StepNode>,
            colors: &mut HashMap<&'a str, Color>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            colors.insert(id, Color::Gray);
            path.push(id);

            for next in &nodes[id].successors {
                match colors.get(next.as_str()).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        let start = path.iter().position(|p| *p == next.as_str()).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(next.clone());
                        return Some(cycle);
                    }
                    Color::White => {
                        if let Some(cycle) = visit(next.as_str(), nodes, colors, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }

            path.pop();
            colors.insert(id, Color::Black);
            None
        }

        let mut colors: HashMap<&str, Color> = HashMap::new();
        for id in candidates {
            if colors.get(id).copied().unwrap_or(Color::White) != Color::White {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = visit(id, nodes, &mut colors, &mut path) {
                return cycle;
            }
        }

        // Unreachable for a graph Kahn rejected; fall back to the unresolved set.
        candidates.iter().map(|s| s.to_string()).collect()
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.nodes.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of a step
    pub fn predecessors(&self, step_id: &str) -> &[String] {
        self.nodes
            .get(step_id)
            .map(|n| n.predecessors.as_slice())
            .unwrap_or(&[])
    }

    /// Steps that depend directly on the given step
    pub fn successors(&self, step_id: &str) -> &[String] {
        self.nodes
            .get(step_id)
            .map(|n| n.successors.as_slice())
            .unwrap_or(&[])
    }

    /// Steps with no dependencies, in template order
    pub fn roots(&self) -> Vec<&str> {
        self.topological_order
            .iter()
            .filter(|id| self.predecessors(id).is_empty())
            .map(String::as_str)
            .collect()
    }

    pub fn topological_order(&self) -> &[String] {
        &self.topological_order
    }

    /// All transitive successors of a step, in topological order
    pub fn descendants_of(&self, step_id: &str) -> Vec<String> {
        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([step_id]);

        while let Some(id) = queue.pop_front() {
            for successor in self.successors(id) {
                if reached.insert(successor.as_str()) {
                    queue.push_back(successor.as_str());
                }
            }
        }

        self.topological_order
            .iter()
            .filter(|id| reached.contains(id.as_str()))
            .cloned()
            .collect()
    }
}
