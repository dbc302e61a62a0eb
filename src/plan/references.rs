//! Template parameter reference checks.
//!
//! Walks YAML templates for `get_param` references and reports the ones that
//! neither the merged parameters nor the template's own `parameters:` section
//! (with a `default`) can satisfy.

use serde_yaml::Value;
use std::collections::BTreeSet;

use crate::error::PlanStoreError;

use super::types::{Parameters, Templates};

/// Intrinsic function whose argument names a parameter.
const GET_PARAM: &str = "get_param";

/// Prefix of parameters supplied by the orchestration service itself.
const PSEUDO_PARAMETER_PREFIX: &str = "OS::";

/// Returns `template: parameter` for every unresolved reference.
pub(super) fn unresolved(
    plan: &str,
    templates: &Templates,
    parameters: &Parameters,
) -> Result<Vec<String>, PlanStoreError> {
    let mut missing = Vec::new();

    for (path, content) in templates {
        if !is_yaml_template(path) {
            continue;
        }

        let doc: Value =
            serde_yaml::from_str(content).map_err(|e| PlanStoreError::InvalidTemplate {
                plan: plan.to_string(),
                path: path.clone(),
                message: e.to_string(),
            })?;

        let declared = declared_with_default(&doc);
        let mut referenced = BTreeSet::new();
        collect(&doc, &mut referenced);

        missing.extend(
            referenced
                .into_iter()
                .filter(|name| {
                    !name.starts_with(PSEUDO_PARAMETER_PREFIX)
                        && !parameters.contains_key(name)
                        && !declared.contains(name)
                })
                .map(|name| format!("{path}: {name}")),
        );
    }

    Ok(missing)
}

/// Only rendered YAML templates are inspected; Jinja sources are skipped.
fn is_yaml_template(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    (lower.ends_with(".yaml") || lower.ends_with(".yml"))
        && !lower.ends_with(".j2.yaml")
        && !lower.ends_with(".j2.yml")
}

fn declared_with_default(doc: &Value) -> BTreeSet<String> {
    doc.get("parameters")
        .and_then(Value::as_mapping)
        .map(|section| {
            section
                .iter()
                .filter(|(_, spec)| spec.get("default").is_some())
                .filter_map(|(name, _)| name.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn collect(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Mapping(map) => {
            for (key, inner) in map {
                if key.as_str() == Some(GET_PARAM) {
                    match inner {
                        Value::String(name) => {
                            out.insert(name.clone());
                        }
                        Value::Sequence(path) => {
                            if let Some(name) = path.first().and_then(Value::as_str) {
                                out.insert(name.to_string());
                            }
                        }
                        _ => {}
                    }
                }
                collect(inner, out);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect(item, out);
            }
        }
        Value::Tagged(tagged) => collect(&tagged.value, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEMPLATE: &str = r"
heat_template_version: rocky
parameters:
  ControllerCount:
    type: number
    default: 1
  NtpServer:
    type: string
resources:
  Controller:
    type: OS::Heat::ResourceGroup
    properties:
      count: { get_param: ControllerCount }
      resource_def:
        properties:
          ntp: { get_param: NtpServer }
          mtu: { get_param: [NetworkConfig, mtu] }
          stack: { get_param: 'OS::stack_name' }
";

    fn templates(path: &str, content: &str) -> Templates {
        [(path.to_string(), content.to_string())].into_iter().collect()
    }

    #[test]
    fn test_reports_every_unresolved_reference() {
        let missing = unresolved("overcloud", &templates("overcloud.yaml", TEMPLATE), &Parameters::new())
            .unwrap();

        assert_eq!(
            missing,
            ["overcloud.yaml: NetworkConfig", "overcloud.yaml: NtpServer"]
        );
    }

    #[test]
    fn test_merged_parameters_resolve() {
        let params: Parameters = [
            (String::from("NtpServer"), json!("pool.ntp.org")),
            (String::from("NetworkConfig"), json!({"mtu": 1500})),
        ]
        .into_iter()
        .collect();

        let missing =
            unresolved("overcloud", &templates("overcloud.yaml", TEMPLATE), &params).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_non_yaml_templates_are_skipped() {
        let missing = unresolved(
            "overcloud",
            &templates("overcloud.j2.yaml", "{{ not: yaml: [ }}"),
            &Parameters::new(),
        )
        .unwrap();
        assert!(missing.is_empty());

        let missing = unresolved(
            "overcloud",
            &templates("scripts/run.sh", "echo {get_param: Missing}"),
            &Parameters::new(),
        )
        .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_broken_yaml_is_reported() {
        let result = unresolved(
            "overcloud",
            &templates("broken.yaml", "resources: [unclosed"),
            &Parameters::new(),
        );
        assert!(matches!(result, Err(PlanStoreError::InvalidTemplate { .. })));
    }
}
