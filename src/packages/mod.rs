//! # Built-in Packages
//!
//! Standard real-estate workflow templates, embedded at compile time.

use crate::error::OrchestrationResult;
use crate::models::PackageTemplate;

pub const NEW_LISTING: &str = "new_listing";
pub const BUYER_ONBOARDING: &str = "buyer_onboarding";
pub const MARKET_REPORT: &str = "market_report";

const BUILTIN_SOURCES: &[(&str, &str)] = &[
    (NEW_LISTING, include_str!("templates/new_listing.yaml")),
    (BUYER_ONBOARDING, include_str!("templates/buyer_onboarding.yaml")),
    (MARKET_REPORT, include_str!("templates/market_report.yaml")),
];

/// Parse every built-in template
pub fn builtin_templates() -> OrchestrationResult<Vec<PackageTemplate>> {
    BUILTIN_SOURCES
        .iter()
        .map(|(_, yaml)| PackageTemplate::from_yaml_str(yaml))
        .collect()
}

/// Parse one built-in template by name
pub fn builtin_template(name: &str) -> Option<OrchestrationResult<PackageTemplate>> {
    BUILTIN_SOURCES
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, yaml)| PackageTemplate::from_yaml_str(yaml))
}

/// Handler types referenced by the built-in templates, sorted and deduplicated
pub fn builtin_handler_types() -> OrchestrationResult<Vec<String>> {
    let mut types: Vec<String> = builtin_templates()?
        .into_iter()
        .flat_map(|t| t.steps.into_iter().map(|s| s.handler_type))
        .collect();
    types.sort();
    types.dedup();
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::DependencyGraph;

    #[test]
    fn test_builtin_templates_are_valid_dags() {
        let templates = builtin_templates().unwrap();
        assert_eq!(templates.len(), 3);
        for template in &templates {
            DependencyGraph::build(template).unwrap();
        }
    }

    #[test]
    fn test_new_listing_shape() {
        let template = builtin_template(NEW_LISTING).unwrap().unwrap();
        let graph = DependencyGraph::build(&template).unwrap();

        assert_eq!(graph.roots(), vec!["property_analysis"]);
        for parallel in ["pricing_cma", "marketing_assets", "photography_scheduling"] {
            assert_eq!(graph.predecessors(parallel), &["property_analysis".to_string()]);
        }
        assert_eq!(graph.predecessors("listing_publication").len(), 3);
        assert_eq!(
            graph.topological_order().last().map(String::as_str),
            Some("social_announcement")
        );
        assert_eq!(template.required_parameters, vec!["property_id"]);
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(builtin_template("open_house").is_none());
    }

    #[test]
    fn test_handler_types_cover_every_step() {
        let types = builtin_handler_types().unwrap();
        assert!(types.contains(&"cma_generation".to_string()));
        assert!(types.contains(&"report_render".to_string()));
        assert!(types.windows(2).all(|w| w[0] < w[1]));
    }
}
