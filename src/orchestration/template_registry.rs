//! # Template Registry
//!
//! Validated package templates, keyed by name. Each entry carries its dependency graph,
//! built once at registration and shared read-only by every execution of the template.

use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::constants::events;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::logging::log_registry_operation;
use crate::models::PackageTemplate;
use crate::orchestration::dependency_graph::DependencyGraph;

/// A template that passed validation, with its graph
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTemplate {
    pub template: PackageTemplate,
    pub graph: DependencyGraph,
}

impl RegisteredTemplate {
    pub fn name(&self) -> &str {
        &self.template.name
    }
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, Arc<RegisteredTemplate>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a template; nothing is stored when validation fails
    ///
    /// Registered templates are immutable, so a second template with the same name is
    /// rejected with [`OrchestrationError::DuplicateTemplate`].
    pub fn register(
        &self,
        template: PackageTemplate,
    ) -> OrchestrationResult<Arc<RegisteredTemplate>> {
        let graph = match DependencyGraph::build(&template) {
            Ok(graph) => graph,
            Err(err) => {
                log_registry_operation(
                    events::TEMPLATE_REGISTERED,
                    &template.name,
                    "rejected",
                    Some(&err.to_string()),
                );
                return Err(err);
            }
        };

        let name = template.name.clone();
        let details = format!("{} steps", template.step_count());

        let registered = match self.templates.write().entry(name.clone()) {
            Entry::Occupied(_) => {
                warn!(template = %name, "Template already registered, rejecting");
                return Err(OrchestrationError::DuplicateTemplate { template: name });
            }
            Entry::Vacant(slot) => Arc::clone(slot.insert(Arc::new(RegisteredTemplate {
                template,
                graph,
            }))),
        };
        log_registry_operation(events::TEMPLATE_REGISTERED, &name, "registered", Some(&details));

        Ok(registered)
    }

    pub fn get(&self, name: &str) -> OrchestrationResult<Arc<RegisteredTemplate>> {
        self.templates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestrationError::template_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.read().contains_key(name)
    }

    /// Registered template names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }
}
