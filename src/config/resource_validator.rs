//! Referential-integrity and sensitivity checks for the resource-level IR.
//! Runs before graph construction so bad references fail with a ConfigError
//! diagnostic rather than surfacing as a confusing panic deep in planning.

use std::collections::{HashMap, HashSet};

use crate::config::types::{Expression, WorkspaceConfig};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};

/// Run every resource-level IR check and collect the results.
pub fn validate_workspace(workspace: &WorkspaceConfig) -> Diagnostics {
    let mut diags = Diagnostics::new();
    check_duplicate_declarations(workspace, &mut diags);
    check_variable_references(workspace, &mut diags);
    check_sensitive_outputs(workspace, &mut diags);
    diags
}

/// No two resources may share a (type, name) pair, no two outputs the same
/// name, no two variables the same name — each collides on the same address.
fn check_duplicate_declarations(workspace: &WorkspaceConfig, diags: &mut Diagnostics) {
    let mut seen_resources = HashSet::new();
    for r in workspace.resources.iter().chain(workspace.data_sources.iter()) {
        let key = (r.resource_type.clone(), r.name.clone());
        if !seen_resources.insert(key) {
            diags.push(
                Diagnostic::error(
                    DiagnosticKind::ConfigError,
                    format!("duplicate resource declaration {}.{}", r.resource_type, r.name),
                )
                .with_address(format!("{}.{}", r.resource_type, r.name)),
            );
        }
    }

    let mut seen_outputs = HashSet::new();
    for o in &workspace.outputs {
        if !seen_outputs.insert(o.name.clone()) {
            diags.push(
                Diagnostic::error(DiagnosticKind::ConfigError, format!("duplicate output \"{}\"", o.name))
                    .with_address(format!("output.{}", o.name)),
            );
        }
    }

    let mut seen_vars = HashSet::new();
    for v in &workspace.variables {
        if !seen_vars.insert(v.name.clone()) {
            diags.push(
                Diagnostic::error(DiagnosticKind::ConfigError, format!("duplicate variable \"{}\"", v.name))
                    .with_address(format!("var.{}", v.name)),
            );
        }
    }
}

/// Every `var.X` reference must name a declared variable; every resource
/// reference (bare `type.name`) must name a declared resource or data source.
fn check_variable_references(workspace: &WorkspaceConfig, diags: &mut Diagnostics) {
    let var_names: HashSet<&str> = workspace.variables.iter().map(|v| v.name.as_str()).collect();
    let resource_addrs: HashSet<String> = workspace
        .resources
        .iter()
        .map(|r| format!("{}.{}", r.resource_type, r.name))
        .collect();
    let data_addrs: HashSet<String> = workspace
        .data_sources
        .iter()
        .map(|d| format!("data.{}.{}", d.resource_type, d.name))
        .collect();
    let local_names: HashSet<&str> = workspace.locals.keys().map(|k| k.as_str()).collect();

    let mut check = |expr: &Expression, source: &str| {
        for reference in collect_references(expr) {
            if reference.is_empty() {
                continue;
            }
            match reference[0].as_str() {
                "var" => {
                    if let Some(name) = reference.get(1) {
                        if !var_names.contains(name.as_str()) {
                            diags.push(
                                Diagnostic::error(
                                    DiagnosticKind::ConfigError,
                                    format!("reference to undeclared variable \"var.{}\"", name),
                                )
                                .with_address(source.to_string()),
                            );
                        }
                    }
                }
                "local" => {
                    if let Some(name) = reference.get(1) {
                        if !local_names.contains(name.as_str()) {
                            diags.push(
                                Diagnostic::error(
                                    DiagnosticKind::ConfigError,
                                    format!("reference to undeclared local \"local.{}\"", name),
                                )
                                .with_address(source.to_string()),
                            );
                        }
                    }
                }
                "data" => {
                    if reference.len() >= 3 {
                        let addr = format!("data.{}.{}", reference[1], reference[2]);
                        if !data_addrs.contains(&addr) {
                            diags.push(
                                Diagnostic::error(
                                    DiagnosticKind::ConfigError,
                                    format!("reference to undeclared data source \"{}\"", addr),
                                )
                                .with_address(source.to_string()),
                            );
                        }
                    }
                }
                "each" | "count" | "module" | "path" | "terraform" => {}
                first => {
                    if reference.len() >= 2 {
                        let addr = format!("{}.{}", first, reference[1]);
                        if !resource_addrs.contains(&addr) && !var_names.contains(first) {
                            diags.push(
                                Diagnostic::error(
                                    DiagnosticKind::ConfigError,
                                    format!("reference to undeclared resource \"{}\"", addr),
                                )
                                .with_address(source.to_string()),
                            );
                        }
                    }
                }
            }
        }
    };

    for r in &workspace.resources {
        for (attr, expr) in &r.attributes {
            check(expr, &format!("{}.{}.{}", r.resource_type, r.name, attr));
        }
    }
    for local_expr in workspace.locals.values() {
        check(local_expr, "locals");
    }
    for output in &workspace.outputs {
        check(&output.value, &format!("output.{}", output.name));
    }
}

/// An output reachable from a sensitive variable must itself be marked
/// `sensitive = true`, or the plan leaks the value into plain output text.
fn check_sensitive_outputs(workspace: &WorkspaceConfig, diags: &mut Diagnostics) {
    let sensitive_vars: HashSet<&str> = workspace
        .variables
        .iter()
        .filter(|v| v.sensitive)
        .map(|v| v.name.as_str())
        .collect();
    if sensitive_vars.is_empty() {
        return;
    }

    // Fixpoint: a local or resource attribute referencing a sensitive source
    // is itself sensitive, and that taint keeps propagating until nothing
    // new is tainted.
    let mut tainted_locals: HashSet<String> = HashSet::new();
    loop {
        let mut changed = false;
        for (name, expr) in &workspace.locals {
            if tainted_locals.contains(name) {
                continue;
            }
            if references_tainted(expr, &sensitive_vars, &tainted_locals) {
                tainted_locals.insert(name.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for output in &workspace.outputs {
        if output.sensitive {
            continue;
        }
        if references_tainted(&output.value, &sensitive_vars, &tainted_locals) {
            diags.push(
                Diagnostic::error(
                    DiagnosticKind::PlanError,
                    format!(
                        "output \"{}\" exposes a sensitive value and must be declared with sensitive = true",
                        output.name
                    ),
                )
                .with_address(format!("output.{}", output.name)),
            );
        }
    }
}

fn references_tainted(
    expr: &Expression,
    sensitive_vars: &HashSet<&str>,
    tainted_locals: &HashSet<String>,
) -> bool {
    collect_references(expr).iter().any(|reference| match reference.first().map(|s| s.as_str()) {
        Some("var") => reference
            .get(1)
            .map(|n| sensitive_vars.contains(n.as_str()))
            .unwrap_or(false),
        Some("local") => reference
            .get(1)
            .map(|n| tainted_locals.contains(n.as_str()))
            .unwrap_or(false),
        _ => false,
    })
}

/// Collect every `Reference` path reachable from an expression tree.
fn collect_references(expr: &Expression) -> Vec<Vec<String>> {
    let mut refs = Vec::new();
    walk(expr, &mut refs);
    refs
}

fn walk(expr: &Expression, out: &mut Vec<Vec<String>>) {
    match expr {
        Expression::Reference(path) => out.push(path.clone()),
        Expression::FunctionCall { args, .. } => {
            for a in args {
                walk(a, out);
            }
        }
        Expression::Conditional {
            condition,
            true_val,
            false_val,
        } => {
            walk(condition, out);
            walk(true_val, out);
            walk(false_val, out);
        }
        Expression::ForExpr {
            collection,
            key_expr,
            value_expr,
            condition,
            ..
        } => {
            walk(collection, out);
            if let Some(k) = key_expr {
                walk(k, out);
            }
            walk(value_expr, out);
            if let Some(c) = condition {
                walk(c, out);
            }
        }
        Expression::Template(parts) => {
            for part in parts {
                match part {
                    crate::config::types::TemplatePart::Interpolation(e)
                    | crate::config::types::TemplatePart::Directive(e) => walk(e, out),
                    crate::config::types::TemplatePart::Literal(_) => {}
                }
            }
        }
        Expression::Index { collection, key } => {
            walk(collection, out);
            walk(key, out);
        }
        Expression::GetAttr { object, .. } => walk(object, out),
        Expression::BinaryOp { left, right, .. } => {
            walk(left, out);
            walk(right, out);
        }
        Expression::UnaryOp { operand, .. } => walk(operand, out),
        Expression::Splat { source, each } => {
            walk(source, out);
            walk(each, out);
        }
        Expression::Literal(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{LifecycleConfig, OutputConfig, ResourceConfig, VariableConfig};

    fn base_workspace() -> WorkspaceConfig {
        WorkspaceConfig::default()
    }

    #[test]
    fn flags_sensitive_output_without_sensitive_flag() {
        let mut ws = base_workspace();
        ws.variables.push(VariableConfig {
            name: "db_password".to_string(),
            var_type: None,
            default: None,
            description: None,
            sensitive: true,
            validation: vec![],
        });
        ws.outputs.push(OutputConfig {
            name: "password".to_string(),
            value: Expression::Reference(vec!["var".to_string(), "db_password".to_string()]),
            description: None,
            sensitive: false,
            depends_on: vec![],
        });

        let diags = validate_workspace(&ws);
        assert!(diags.has_errors());
        assert!(diags
            .errors()
            .any(|d| d.kind == DiagnosticKind::PlanError && d.summary.contains("password")));
    }

    #[test]
    fn allows_sensitive_output_marked_sensitive() {
        let mut ws = base_workspace();
        ws.variables.push(VariableConfig {
            name: "db_password".to_string(),
            var_type: None,
            default: None,
            description: None,
            sensitive: true,
            validation: vec![],
        });
        ws.outputs.push(OutputConfig {
            name: "password".to_string(),
            value: Expression::Reference(vec!["var".to_string(), "db_password".to_string()]),
            description: None,
            sensitive: true,
            depends_on: vec![],
        });

        let diags = validate_workspace(&ws);
        assert!(!diags.has_errors());
    }

    #[test]
    fn flags_duplicate_resource_declaration() {
        let mut ws = base_workspace();
        let make = || ResourceConfig {
            resource_type: "aws_instance".to_string(),
            name: "web".to_string(),
            provider_ref: None,
            count: None,
            for_each: None,
            depends_on: vec![],
            lifecycle: LifecycleConfig::default(),
            timeout: None,
            attributes: HashMap::new(),
            provisioners: vec![],
            source_location: None,
        };
        ws.resources.push(make());
        ws.resources.push(make());

        let diags = validate_workspace(&ws);
        assert!(diags
            .errors()
            .any(|d| d.summary.contains("duplicate resource")));
    }

    #[test]
    fn flags_reference_to_undeclared_variable() {
        let mut ws = base_workspace();
        ws.outputs.push(OutputConfig {
            name: "region".to_string(),
            value: Expression::Reference(vec!["var".to_string(), "region".to_string()]),
            description: None,
            sensitive: false,
            depends_on: vec![],
        });

        let diags = validate_workspace(&ws);
        assert!(diags
            .errors()
            .any(|d| d.summary.contains("undeclared variable")));
    }
}
