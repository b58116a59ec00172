use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::models::Parameters;

/// StepDefinition is one step of a package template
///
/// `handler_type` is the key the Step Registry resolves at invocation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub name: String,
    pub handler_type: String,
    #[serde(default, alias = "depends_on")]
    pub dependency_ids: Vec<String>,
    #[serde(default)]
    pub default_parameters: Parameters,
    /// Higher priorities dispatch sooner
    #[serde(default)]
    pub priority: i32,
    /// Overrides the orchestrator's default retry limit
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Overrides the orchestrator's default handler timeout
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, handler_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            handler_type: handler_type.into(),
            dependency_ids: Vec::new(),
            default_parameters: Parameters::new(),
            priority: 0,
            max_retries: None,
            timeout_seconds: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, dependency_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependency_ids
            .extend(dependency_ids.into_iter().map(Into::into));
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.default_parameters.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Check if this step depends directly on another step
    pub fn depends_on_step(&self, other_step_id: &str) -> bool {
        self.dependency_ids.iter().any(|d| d == other_step_id)
    }
}

/// PackageTemplate is a reusable, dependency-linked set of steps
///
/// Immutable once registered with an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub required_parameters: Vec<String>,
    #[serde(default)]
    pub optional_parameters: Vec<String>,
}

impl PackageTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
            required_parameters: Vec::new(),
            optional_parameters: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_required_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_parameters
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_optional_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_parameters
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn from_yaml_str(yaml: &str) -> OrchestrationResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json_str(json: &str) -> OrchestrationResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a template file, choosing the format from the extension (`.json`, else YAML)
    pub fn from_file(path: &Path) -> OrchestrationResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            OrchestrationError::Configuration(format!(
                "Failed to read template {}: {e}",
                path.display()
            ))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Required parameters absent from `parameters`
    pub fn missing_parameters(&self, parameters: &Parameters) -> Vec<String> {
        self.required_parameters
            .iter()
            .filter(|name| !parameters.contains_key(name.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LISTING_YAML: &str = r#"
name: listing_refresh
description: Re-price and re-announce a listing
required_parameters: [property_id]
steps:
  - id: analyze
    name: Property analysis
    handler_type: property_analysis
  - id: price
    name: Pricing
    handler_type: cma_generation
    depends_on: [analyze]
    priority: 5
    max_retries: 2
    default_parameters:
      comparables: 6
"#;

    #[test]
    fn test_yaml_template_parsing() {
        let template = PackageTemplate::from_yaml_str(LISTING_YAML).unwrap();
        assert_eq!(template.name, "listing_refresh");
        assert_eq!(template.step_count(), 2);

        let price = template.step("price").unwrap();
        assert_eq!(price.dependency_ids, vec!["analyze".to_string()]);
        assert_eq!(price.priority, 5);
        assert_eq!(price.max_retries, Some(2));
        assert_eq!(price.default_parameters["comparables"], json!(6));
        assert!(price.depends_on_step("analyze"));

        let analyze = template.step("analyze").unwrap();
        assert!(analyze.dependency_ids.is_empty());
        assert_eq!(analyze.timeout_seconds, None);
    }

    #[test]
    fn test_missing_parameters() {
        let template = PackageTemplate::from_yaml_str(LISTING_YAML).unwrap();
        let mut params = Parameters::new();
        assert_eq!(template.missing_parameters(&params), vec!["property_id"]);

        params.insert("property_id".into(), json!("prop-1"));
        assert!(template.missing_parameters(&params).is_empty());
    }

    #[test]
    fn test_builder_matches_yaml_shape() {
        let template = PackageTemplate::new("t")
            .with_step(StepDefinition::new("a", "noop"))
            .with_step(StepDefinition::new("b", "noop").depends_on(["a"]).with_priority(2))
            .with_required_parameters(["property_id"]);

        let json = serde_json::to_string(&template).unwrap();
        let parsed = PackageTemplate::from_json_str(&json).unwrap();
        assert_eq!(parsed, template);
    }

    #[test]
    fn test_invalid_yaml_is_configuration_error() {
        let err = PackageTemplate::from_yaml_str("name: [unterminated").unwrap_err();
        assert!(matches!(err, OrchestrationError::Configuration(_)));
    }
}
