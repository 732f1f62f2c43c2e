use std::collections::HashMap;

use anyhow::{bail, Result};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::config::types::{Expression, ResourceConfig, ResourceIndex, WorkspaceConfig};
use crate::executor::engine::{eval_expression, EvalContext};

/// A node in the resource-level dependency graph.
#[derive(Debug, Clone)]
pub enum DagNode {
    Resource {
        address: String,
        base_address: String,
        resource_type: String,
        name: String,
        provider_source: String,
        config: ResourceConfig,
        index: Option<ResourceIndex>,
    },
    DataSource {
        address: String,
        base_address: String,
        resource_type: String,
        name: String,
        provider_source: String,
        config: ResourceConfig,
        index: Option<ResourceIndex>,
    },
    Output {
        name: String,
        module_path: String,
    },
    /// A ConfigResource whose count/for_each could not be resolved at plan
    /// time (e.g. depends on a variable with no default and no CLI value).
    /// Expansion is deferred; the plan records it but apply fails against it.
    Deferred {
        base_address: String,
        reason: String,
    },
}

impl DagNode {
    pub fn address(&self) -> &str {
        match self {
            DagNode::Resource { address, .. } => address,
            DagNode::DataSource { address, .. } => address,
            DagNode::Output { name, .. } => name,
            DagNode::Deferred { base_address, .. } => base_address,
        }
    }

    pub fn base_address(&self) -> &str {
        match self {
            DagNode::Resource { base_address, .. } => base_address,
            DagNode::DataSource { base_address, .. } => base_address,
            DagNode::Output { name, .. } => name,
            DagNode::Deferred { base_address, .. } => base_address,
        }
    }

    pub fn index(&self) -> Option<&ResourceIndex> {
        match self {
            DagNode::Resource { index, .. } => index.as_ref(),
            DagNode::DataSource { index, .. } => index.as_ref(),
            DagNode::Output { .. } => None,
            DagNode::Deferred { .. } => None,
        }
    }
}

/// The type of dependency between nodes.
#[derive(Debug, Clone)]
pub enum DependencyEdge {
    /// Explicitly declared via `depends_on`.
    Explicit,
    /// Inferred from expression references (e.g. `aws_vpc.main.id`).
    Implicit,
    /// Data source dependency (data sources run during planning).
    DataDependency,
    /// Provider dependency (provider must be configured first).
    ProviderDep,
}

/// A resource-level dependency graph.
pub type ResourceGraph = DiGraph<DagNode, DependencyEdge>;

/// Build a resource-level dependency graph from a WorkspaceConfig.
///
/// This replaces the module-level DAG with individual resource nodes,
/// enabling resource-level parallelism during plan and apply.
/// Resources with `count` or `for_each` are expanded into individual nodes.
pub fn build_resource_dag(
    workspace: &WorkspaceConfig,
    provider_map: &HashMap<String, String>,
    var_defaults: &HashMap<String, serde_json::Value>,
) -> Result<(ResourceGraph, HashMap<String, NodeIndex>)> {
    let mut graph = DiGraph::new();
    let mut node_map: HashMap<String, NodeIndex> = HashMap::new();
    // Maps base_address -> Vec<NodeIndex> for expanded resources
    let mut base_to_indices: HashMap<String, Vec<NodeIndex>> = HashMap::new();

    // Add all resources as nodes (expanding count/for_each)
    for resource in &workspace.resources {
        let base_address = format!("{}.{}", resource.resource_type, resource.name);
        let provider_source = resolve_provider_source(resource, provider_map);

        let count_expansion = evaluate_count(resource, var_defaults)?;
        if let Some(CountExpansion::Deferred(reason)) = &count_expansion {
            let idx = graph.add_node(DagNode::Deferred {
                base_address: base_address.clone(),
                reason: reason.clone(),
            });
            node_map.insert(base_address.clone(), idx);
            base_to_indices
                .entry(base_address.clone())
                .or_default()
                .push(idx);
            continue;
        }
        let for_each_expansion = if count_expansion.is_none() {
            evaluate_for_each(resource, var_defaults)?
        } else {
            None
        };
        if let Some(ForEachExpansion::Deferred(reason)) = &for_each_expansion {
            let idx = graph.add_node(DagNode::Deferred {
                base_address: base_address.clone(),
                reason: reason.clone(),
            });
            node_map.insert(base_address.clone(), idx);
            base_to_indices
                .entry(base_address.clone())
                .or_default()
                .push(idx);
            continue;
        }

        if let Some(CountExpansion::Known(count)) = count_expansion {
            for i in 0..count {
                let address = format!("{}[{}]", base_address, i);
                let node = DagNode::Resource {
                    address: address.clone(),
                    base_address: base_address.clone(),
                    resource_type: resource.resource_type.clone(),
                    name: resource.name.clone(),
                    provider_source: provider_source.clone(),
                    config: resource.clone(),
                    index: Some(ResourceIndex::Count(i)),
                };
                let idx = graph.add_node(node);
                node_map.insert(address, idx);
                base_to_indices
                    .entry(base_address.clone())
                    .or_default()
                    .push(idx);
            }
        } else if let Some(ForEachExpansion::Known(keys)) = for_each_expansion {
            for (key, _value) in &keys {
                let address = format!("{}[\"{}\"]", base_address, key);
                let node = DagNode::Resource {
                    address: address.clone(),
                    base_address: base_address.clone(),
                    resource_type: resource.resource_type.clone(),
                    name: resource.name.clone(),
                    provider_source: provider_source.clone(),
                    config: resource.clone(),
                    index: Some(ResourceIndex::ForEach(key.clone())),
                };
                let idx = graph.add_node(node);
                node_map.insert(address, idx);
                base_to_indices
                    .entry(base_address.clone())
                    .or_default()
                    .push(idx);
            }
        } else {
            let node = DagNode::Resource {
                address: base_address.clone(),
                base_address: base_address.clone(),
                resource_type: resource.resource_type.clone(),
                name: resource.name.clone(),
                provider_source: provider_source.clone(),
                config: resource.clone(),
                index: None,
            };
            let idx = graph.add_node(node);
            node_map.insert(base_address.clone(), idx);
            base_to_indices
                .entry(base_address.clone())
                .or_default()
                .push(idx);
        }
    }

    // Add all data sources as nodes (expanding count/for_each)
    for data_source in &workspace.data_sources {
        let base_address = format!("data.{}.{}", data_source.resource_type, data_source.name);
        let provider_source = resolve_provider_source(data_source, provider_map);

        // Data sources rarely use count, but support it
        let node = DagNode::DataSource {
            address: base_address.clone(),
            base_address: base_address.clone(),
            resource_type: data_source.resource_type.clone(),
            name: data_source.name.clone(),
            provider_source,
            config: data_source.clone(),
            index: None,
        };
        let idx = graph.add_node(node);
        node_map.insert(base_address.clone(), idx);
        base_to_indices
            .entry(base_address.clone())
            .or_default()
            .push(idx);
    }

    // Add output nodes
    for output in &workspace.outputs {
        let node = DagNode::Output {
            name: output.name.clone(),
            module_path: String::new(),
        };
        let idx = graph.add_node(node);
        node_map.insert(format!("output.{}", output.name), idx);
    }

    // Add explicit and implicit dependencies
    for resource in workspace
        .resources
        .iter()
        .chain(workspace.data_sources.iter())
    {
        let is_data = workspace
            .data_sources
            .iter()
            .any(|d| d.resource_type == resource.resource_type && d.name == resource.name);
        let base_address = if is_data {
            format!("data.{}.{}", resource.resource_type, resource.name)
        } else {
            format!("{}.{}", resource.resource_type, resource.name)
        };

        // Get all node indices for this resource (may be multiple if count/for_each expanded)
        let to_indices: Vec<NodeIndex> = base_to_indices
            .get(&base_address)
            .cloned()
            .unwrap_or_default();

        if to_indices.is_empty() {
            continue;
        }

        // Explicit depends_on
        for dep in &resource.depends_on {
            let from_indices = resolve_dep_indices(dep, &node_map, &base_to_indices);
            for &from_idx in &from_indices {
                for &to_idx in &to_indices {
                    if from_idx != to_idx {
                        graph.add_edge(from_idx, to_idx, DependencyEdge::Explicit);
                    }
                }
            }
        }

        // Implicit dependencies from expressions
        let refs = extract_references_from_attributes(&resource.attributes);
        for ref_address in &refs {
            let from_indices = resolve_dep_indices(ref_address, &node_map, &base_to_indices);
            for &from_idx in &from_indices {
                for &to_idx in &to_indices {
                    if from_idx != to_idx {
                        graph.add_edge(from_idx, to_idx, DependencyEdge::Implicit);
                    }
                }
            }
        }
    }

    // Add output dependencies
    for output in &workspace.outputs {
        let output_address = format!("output.{}", output.name);
        if let Some(&to_idx) = node_map.get(&output_address) {
            for dep in &output.depends_on {
                let from_indices = resolve_dep_indices(dep, &node_map, &base_to_indices);
                for &from_idx in &from_indices {
                    graph.add_edge(from_idx, to_idx, DependencyEdge::Explicit);
                }
            }

            let refs = extract_references_from_expression(&output.value);
            for ref_address in &refs {
                let from_indices = resolve_dep_indices(ref_address, &node_map, &base_to_indices);
                for &from_idx in &from_indices {
                    graph.add_edge(from_idx, to_idx, DependencyEdge::Implicit);
                }
            }
        }
    }

    // Verify no cycles; report every address on one concrete cycle so the
    // user can see exactly which edges to break (P6).
    if let Some(cycle) = find_cycle(&graph) {
        let addresses: Vec<&str> = cycle.iter().map(|&idx| graph[idx].address()).collect();
        bail!(
            "GraphCycle: dependency cycle detected: {}",
            addresses.join(" -> ")
        );
    }

    Ok((graph, node_map))
}

/// Find one cycle in the graph via DFS, returning the node indices on it in
/// order (first node repeated at the end conceptually, not included twice).
/// Returns None if the graph is acyclic.
fn find_cycle(graph: &ResourceGraph) -> Option<Vec<NodeIndex>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: HashMap<NodeIndex, Mark> = graph
        .node_indices()
        .map(|idx| (idx, Mark::Unvisited))
        .collect();
    let mut stack: Vec<NodeIndex> = Vec::new();

    fn visit(
        graph: &ResourceGraph,
        node: NodeIndex,
        marks: &mut HashMap<NodeIndex, Mark>,
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        marks.insert(node, Mark::InProgress);
        stack.push(node);

        for succ in graph.neighbors(node) {
            match marks.get(&succ).copied().unwrap_or(Mark::Unvisited) {
                Mark::Unvisited => {
                    if let Some(cycle) = visit(graph, succ, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::InProgress => {
                    let start = stack.iter().position(|&n| n == succ).unwrap_or(0);
                    return Some(stack[start..].to_vec());
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    // Tie-break the starting node deterministically by canonical address so
    // repeated runs of the same graph report the same cycle (P7).
    let mut starts: Vec<NodeIndex> = graph.node_indices().collect();
    starts.sort_by_key(|&idx| graph[idx].address().to_string());

    for start in starts {
        if marks[&start] == Mark::Unvisited {
            if let Some(cycle) = visit(graph, start, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Resolve a dependency address to node indices. Tries exact match first, then base_address.
fn resolve_dep_indices(
    dep: &str,
    node_map: &HashMap<String, NodeIndex>,
    base_to_indices: &HashMap<String, Vec<NodeIndex>>,
) -> Vec<NodeIndex> {
    // Exact match (e.g. "aws_vpc.main" or "aws_instance.main[0]")
    if let Some(&idx) = node_map.get(dep) {
        return vec![idx];
    }
    // Base address match (e.g. "aws_instance.main" resolves to all expanded instances)
    if let Some(indices) = base_to_indices.get(dep) {
        return indices.clone();
    }
    vec![]
}

/// Outcome of resolving a resource's `count` expression.
enum CountExpansion {
    Known(usize),
    /// `count` depends on a value not yet known at plan time (e.g. an unset
    /// variable with no default). The resource is a deferred expansion
    /// rather than a plan failure (scenario: count expansion with unknown).
    Deferred(String),
}

/// Evaluate the count expression and return the count, or None if no count is set.
fn evaluate_count(
    resource: &ResourceConfig,
    var_defaults: &HashMap<String, serde_json::Value>,
) -> Result<Option<CountExpansion>> {
    let Some(ref count_expr) = resource.count else {
        return Ok(None);
    };
    let ctx = EvalContext::plan_only(var_defaults.clone());
    let val = eval_expression(count_expr, &ctx);
    match val {
        serde_json::Value::Number(n) => {
            let count = n.as_u64().ok_or_else(|| {
                anyhow::anyhow!(
                    "count must be a non-negative integer for {}.{}, got {}",
                    resource.resource_type,
                    resource.name,
                    n
                )
            })?;
            Ok(Some(CountExpansion::Known(count as usize)))
        }
        serde_json::Value::Null => Ok(Some(CountExpansion::Deferred(format!(
            "count for {}.{} could not be determined: the expression depends on a value not yet known (e.g. a variable with no default and no assigned value)",
            resource.resource_type, resource.name
        )))),
        _ => bail!(
            "count for {}.{} must evaluate to a number, got {:?}",
            resource.resource_type,
            resource.name,
            val
        ),
    }
}

/// Outcome of resolving a resource's `for_each` expression.
enum ForEachExpansion {
    Known(Vec<(String, serde_json::Value)>),
    Deferred(String),
}

/// Evaluate the for_each expression and return key-value pairs, or None if not set.
fn evaluate_for_each(
    resource: &ResourceConfig,
    var_defaults: &HashMap<String, serde_json::Value>,
) -> Result<Option<ForEachExpansion>> {
    let Some(ref for_each_expr) = resource.for_each else {
        return Ok(None);
    };
    let ctx = EvalContext::plan_only(var_defaults.clone());
    let val = eval_expression(for_each_expr, &ctx);
    match val {
        serde_json::Value::Object(map) => {
            Ok(Some(ForEachExpansion::Known(map.into_iter().collect())))
        }
        serde_json::Value::Array(arr) => Ok(Some(ForEachExpansion::Known(
            arr.into_iter()
                .map(|v| {
                    let key = match &v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key, v)
                })
                .collect(),
        ))),
        serde_json::Value::Null => Ok(Some(ForEachExpansion::Deferred(format!(
            "for_each for {}.{} could not be determined: the expression depends on a value not yet known",
            resource.resource_type, resource.name
        )))),
        _ => bail!(
            "for_each for {}.{} must evaluate to a map or set, got {:?}",
            resource.resource_type,
            resource.name,
            val
        ),
    }
}

/// Extract resource references from a map of attributes.
fn extract_references_from_attributes(attrs: &HashMap<String, Expression>) -> Vec<String> {
    let mut refs = Vec::new();
    for expr in attrs.values() {
        refs.extend(extract_references_from_expression(expr));
    }
    refs
}

/// Extract resource addresses referenced in an expression.
/// e.g. Reference(["aws_vpc", "main", "id"]) → "aws_vpc.main"
fn extract_references_from_expression(expr: &Expression) -> Vec<String> {
    let mut refs = Vec::new();
    collect_references(expr, &mut refs);
    refs
}

fn collect_references(expr: &Expression, refs: &mut Vec<String>) {
    match expr {
        Expression::Reference(parts) => {
            if parts.len() >= 2 {
                let first = &parts[0];
                // Skip "var.", "local.", "each.", "count.", "path.", "terraform."
                match first.as_str() {
                    "var" | "local" | "each" | "count" | "path" | "terraform" | "self" => {}
                    "data" if parts.len() >= 3 => {
                        refs.push(format!("data.{}.{}", parts[1], parts[2]));
                    }
                    "module" if parts.len() >= 2 => {
                        // Module references are tracked but don't resolve to
                        // individual resource addresses (modules are opaque).
                    }
                    _ => {
                        // resource_type.name pattern
                        refs.push(format!("{}.{}", parts[0], parts[1]));
                    }
                }
            }
        }
        Expression::Literal(val) => {
            // Scan literal values for embedded ${...} references (from nested blocks)
            collect_references_from_value(val, refs);
        }
        Expression::FunctionCall { args, .. } => {
            for arg in args {
                collect_references(arg, refs);
            }
        }
        Expression::Conditional {
            condition,
            true_val,
            false_val,
        } => {
            collect_references(condition, refs);
            collect_references(true_val, refs);
            collect_references(false_val, refs);
        }
        Expression::ForExpr {
            collection,
            key_expr,
            value_expr,
            condition,
            ..
        } => {
            collect_references(collection, refs);
            if let Some(k) = key_expr {
                collect_references(k, refs);
            }
            collect_references(value_expr, refs);
            if let Some(c) = condition {
                collect_references(c, refs);
            }
        }
        Expression::Template(parts) => {
            for part in parts {
                match part {
                    crate::config::types::TemplatePart::Interpolation(e) => {
                        collect_references(e, refs);
                    }
                    crate::config::types::TemplatePart::Directive(e) => {
                        collect_references(e, refs);
                    }
                    crate::config::types::TemplatePart::Literal(_) => {}
                }
            }
        }
        Expression::Index { collection, key } => {
            collect_references(collection, refs);
            collect_references(key, refs);
        }
        Expression::GetAttr { object, .. } => {
            collect_references(object, refs);
        }
        Expression::BinaryOp { left, right, .. } => {
            collect_references(left, refs);
            collect_references(right, refs);
        }
        Expression::UnaryOp { operand, .. } => {
            collect_references(operand, refs);
        }
        Expression::Splat { source, each } => {
            collect_references(source, refs);
            collect_references(each, refs);
        }
    }
}

/// Extract resource references from `${...}` interpolation strings embedded in literal values.
/// This handles nested blocks (like `route { gateway_id = aws_internet_gateway.main.id }`)
/// which get parsed as Literal values containing `${type.name.attr}` strings.
fn collect_references_from_value(val: &crate::config::types::Value, refs: &mut Vec<String>) {
    use crate::config::types::Value;
    match val {
        Value::String(s) => {
            // Scan for ${...} patterns
            let mut remaining = s.as_str();
            while let Some(start) = remaining.find("${") {
                if let Some(end) = remaining[start + 2..].find('}') {
                    let ref_str = &remaining[start + 2..start + 2 + end];
                    let parts: Vec<&str> = ref_str.split('.').collect();
                    if parts.len() >= 2 {
                        match parts[0] {
                            "var" | "local" | "each" | "count" | "path" | "terraform" | "self" => {}
                            "data" if parts.len() >= 3 => {
                                refs.push(format!("data.{}.{}", parts[1], parts[2]));
                            }
                            _ => {
                                refs.push(format!("{}.{}", parts[0], parts[1]));
                            }
                        }
                    }
                    remaining = &remaining[start + 2 + end + 1..];
                } else {
                    break;
                }
            }
        }
        Value::List(items) => {
            for item in items {
                collect_references_from_value(item, refs);
            }
        }
        Value::Map(entries) => {
            for (_, v) in entries {
                collect_references_from_value(v, refs);
            }
        }
        _ => {}
    }
}

/// Resolve the provider source for a resource.
/// Uses `provider_ref` if set, otherwise derives from resource type prefix.
fn resolve_provider_source(
    resource: &ResourceConfig,
    provider_map: &HashMap<String, String>,
) -> String {
    if let Some(ref provider_ref) = resource.provider_ref {
        // Strip alias: "aws.west" → "aws"
        let base = provider_ref.split('.').next().unwrap_or(provider_ref);
        provider_map
            .get(base)
            .cloned()
            .unwrap_or_else(|| format!("hashicorp/{}", base))
    } else {
        // Derive from resource type: "aws_vpc" → "aws"
        let prefix = resource
            .resource_type
            .split('_')
            .next()
            .unwrap_or(&resource.resource_type);
        provider_map
            .get(prefix)
            .cloned()
            .unwrap_or_else(|| format!("hashicorp/{}", prefix))
    }
}

/// Get a topological ordering of the graph (dependencies before dependents).
pub fn topological_order(graph: &ResourceGraph) -> Result<Vec<NodeIndex>> {
    petgraph::algo::toposort(graph, None).map_err(|cycle| {
        anyhow::anyhow!(
            "Cycle detected involving {:?}",
            graph[cycle.node_id()].address()
        )
    })
}

/// Get the reverse topological ordering (for destroy operations).
pub fn reverse_topological_order(graph: &ResourceGraph) -> Result<Vec<NodeIndex>> {
    let mut order = topological_order(graph)?;
    order.reverse();
    Ok(order)
}

/// Generate DOT representation of the resource graph.
pub fn to_dot(graph: &ResourceGraph) -> String {
    let mut dot = String::from("digraph resources {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=filled];\n\n");

    for idx in graph.node_indices() {
        let node = &graph[idx];
        let (label, color) = match node {
            DagNode::Resource {
                address,
                resource_type,
                ..
            } => (format!("{}\\n{}", address, resource_type), "#a8d8a8"),
            DagNode::DataSource {
                address,
                resource_type,
                ..
            } => (format!("data.{}\\n{}", address, resource_type), "#a8c8d8"),
            DagNode::Output { name, .. } => (format!("output.{}", name), "#d8d8a8"),
            DagNode::Deferred { base_address, .. } => {
                (format!("{}\\n(deferred)", base_address), "#d8a8a8")
            }
        };
        dot.push_str(&format!(
            "  n{} [label=\"{}\", fillcolor=\"{}\"];\n",
            idx.index(),
            label,
            color
        ));
    }

    dot.push('\n');

    for edge in graph.edge_indices() {
        if let Some((from, to)) = graph.edge_endpoints(edge) {
            let style = match &graph[edge] {
                DependencyEdge::Explicit => "solid",
                DependencyEdge::Implicit => "dashed",
                DependencyEdge::DataDependency => "dotted",
                DependencyEdge::ProviderDep => "bold",
            };
            dot.push_str(&format!(
                "  n{} -> n{} [style={}];\n",
                from.index(),
                to.index(),
                style
            ));
        }
    }

    dot.push_str("}\n");
    dot
}
