use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use dashmap::DashMap;
use petgraph::graph::NodeIndex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::types::WorkspaceConfig;
use crate::dag::resource_graph::{self, DagNode};
use crate::dag::walker::{DagWalker, NodeExecutor, NodeResult, NodeStatus};
use crate::provider::manager::ProviderManager;
use crate::state::backend::StateBackend;

/// The action to take for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAction {
    Create,
    Update,
    Delete,
    /// Replace where lifecycle.create_before_destroy is unset: delete the
    /// old instance, then create the new one in its place.
    DeleteThenCreate,
    /// Replace where lifecycle.create_before_destroy is set: create the new
    /// instance first (old instance deposed), then delete the deposed one.
    CreateThenDelete,
    Read,
    NoOp,
    /// count/for_each could not be resolved at plan time; apply will fail
    /// against this address if it reaches it unchanged.
    Deferred,
    /// Adopted via an `import` block: read from the provider and written to
    /// state without invoking Create.
    Import,
    /// Removed from state without calling the provider's delete — the
    /// underlying object is handed off to be managed outside this engine.
    Forget,
}

impl std::fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceAction::Create => write!(f, "+"),
            ResourceAction::Update => write!(f, "~"),
            ResourceAction::Delete => write!(f, "-"),
            ResourceAction::DeleteThenCreate | ResourceAction::CreateThenDelete => {
                write!(f, "-/+")
            }
            ResourceAction::Read => write!(f, "<="),
            ResourceAction::NoOp => write!(f, "(no changes)"),
            ResourceAction::Deferred => write!(f, "(deferred)"),
            ResourceAction::Import => write!(f, "<-"),
            ResourceAction::Forget => write!(f, "."),
        }
    }
}

/// A planned change for a single resource.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub address: String,
    pub action: ResourceAction,
    pub resource_type: String,
    pub provider_source: String,
    pub planned_state: Option<serde_json::Value>,
    pub prior_state: Option<serde_json::Value>,
    pub user_config: Option<serde_json::Value>,
    pub requires_replace: Vec<String>,
    pub planned_private: Vec<u8>,
}

/// A planned output change.
#[derive(Debug)]
pub struct PlannedOutput {
    pub name: String,
    pub action: ResourceAction,
    pub value_known: bool,
}

/// Summary of a plan operation.
#[derive(Debug)]
pub struct PlanSummary {
    pub changes: Vec<PlannedChange>,
    pub outputs: Vec<PlannedOutput>,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub replaces: usize,
    pub no_ops: usize,
    pub forgets: usize,
    /// The workspace serial this plan was computed against. `apply` refuses
    /// to proceed if the workspace's serial has since moved (StateStale).
    pub base_serial: i64,
    /// Non-fatal findings surfaced alongside the plan — e.g. a deposed
    /// object left behind by a prior create-before-destroy replacement that
    /// this plan has no scheduled path to clean up.
    pub diagnostics: Vec<crate::diagnostics::Diagnostic>,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.creates > 0 {
            parts.push(format!("{} to add", self.creates));
        }
        if self.replaces > 0 {
            parts.push(format!("{} to replace", self.replaces));
        }
        if self.updates > 0 {
            parts.push(format!("{} to change", self.updates));
        }
        if self.deletes > 0 {
            parts.push(format!("{} to destroy", self.deletes));
        }
        if self.forgets > 0 {
            parts.push(format!("{} to forget", self.forgets));
        }
        if parts.is_empty() {
            write!(f, "No changes.")
        } else {
            write!(f, "Plan: {}.", parts.join(", "))
        }
    }
}

/// Summary of an apply operation.
#[derive(Debug)]
pub struct ApplySummary {
    pub results: Vec<NodeResult>,
    pub added: usize,
    pub changed: usize,
    pub destroyed: usize,
    pub forgotten: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_secs: u64,
    pub is_destroy: bool,
}

impl std::fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = if self.is_destroy { "Destroy" } else { "Apply" };
        let time = format_elapsed(self.elapsed_secs);
        if self.is_destroy {
            write!(
                f,
                "{} complete! Resources: {} destroyed",
                action, self.destroyed,
            )?;
        } else {
            write!(
                f,
                "{} complete! Resources: {} added, {} changed, {} destroyed",
                action, self.added, self.changed, self.destroyed,
            )?;
        }
        if self.forgotten > 0 {
            write!(f, ", {} forgotten", self.forgotten)?;
        }
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        write!(f, ". Total time: {}.", time)
    }
}

fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else {
        let mins = secs / 60;
        let remaining = secs % 60;
        if remaining == 0 {
            format!("{}m", mins)
        } else {
            format!("{}m{}s", mins, remaining)
        }
    }
}

/// The resource execution engine orchestrating plan and apply operations.
///
/// This is the core of oxid v2 — it directly communicates with providers
/// via gRPC to plan and apply individual resource changes, using the
/// event-driven DAG walker for maximum parallelism.
pub struct ResourceEngine {
    provider_manager: Arc<ProviderManager>,
    parallelism: usize,
}

impl ResourceEngine {
    pub fn new(provider_manager: Arc<ProviderManager>, parallelism: usize) -> Self {
        Self {
            provider_manager,
            parallelism,
        }
    }

    /// Get a reference to the provider manager.
    pub fn provider_manager(&self) -> &ProviderManager {
        &self.provider_manager
    }

    /// Plan all resources in the workspace.
    ///
    /// Runs each resource's `PlanResourceChange`/`ReadDataSource` call through
    /// the same concurrent, readiness-based walker `apply` uses, rather than
    /// a sequential pass — provider calls for unrelated resources overlap
    /// instead of queuing behind one another.
    pub async fn plan(
        &self,
        workspace: &WorkspaceConfig,
        backend: Arc<dyn StateBackend>,
        workspace_id: &str,
        forget: &[String],
    ) -> Result<PlanSummary> {
        // Referential integrity and sensitivity-propagation checks run before
        // the graph is even built, so a bad reference or an unmasked sensitive
        // output fails with a diagnostic instead of a panic or a silently
        // leaked value deep in planning.
        crate::config::resource_validator::validate_workspace(workspace).into_result(())?;

        let provider_map = build_provider_map(workspace);
        let var_defaults = build_variable_defaults(workspace);
        let (graph, _node_map) =
            resource_graph::build_resource_dag(workspace, &provider_map, &var_defaults)?;

        // Ensure all providers are started and configured
        self.initialize_providers(workspace).await?;

        let pm = Arc::clone(&self.provider_manager);
        let ws_id = workspace_id.to_string();
        let serial_backend = Arc::clone(&backend);
        let serial_ws_id = ws_id.clone();
        let workspace_import_specs = Arc::new(workspace.imports.clone());
        let forget_addresses: Arc<std::collections::HashSet<String>> =
            Arc::new(forget.iter().cloned().collect());
        let eval_ctx = EvalContext::plan_only(var_defaults.clone());

        let outputs: Vec<PlannedOutput> = graph
            .node_indices()
            .filter_map(|idx| match &graph[idx] {
                DagNode::Output { name, .. } => Some(PlannedOutput {
                    name: name.clone(),
                    action: ResourceAction::Create,
                    value_known: false,
                }),
                _ => None,
            })
            .collect();

        let changes: Arc<DashMap<String, PlannedChange>> = Arc::new(DashMap::new());

        let changes_clone = Arc::clone(&changes);
        let executor: NodeExecutor = Box::new(move |_idx: NodeIndex, node: DagNode| {
            let pm = Arc::clone(&pm);
            let ws_id = ws_id.clone();
            let backend = Arc::clone(&backend);
            let changes = Arc::clone(&changes_clone);
            let eval_ctx = eval_ctx.clone();
            let import_specs = Arc::clone(&workspace_import_specs);
            let forget_addresses = Arc::clone(&forget_addresses);

            Box::pin(async move {
                match node {
                    DagNode::Resource {
                        ref address,
                        ref resource_type,
                        ref provider_source,
                        ref config,
                        ..
                    } => {
                        let user_config = attributes_to_json(&config.attributes, &eval_ctx);
                        let schema_opt = pm
                            .get_resource_schema(provider_source, resource_type)
                            .await
                            .ok()
                            .flatten();
                        let config_json = match &schema_opt {
                            Some(schema) => build_full_resource_config(&user_config, schema),
                            None => user_config.clone(),
                        };

                        let prior_state = match backend.get_resource(&ws_id, address).await? {
                            Some(r) => {
                                let mut attrs: serde_json::Value =
                                    serde_json::from_str(&r.attributes_json)?;
                                if let Some(schema) = &schema_opt {
                                    let current_version =
                                        schema.get("version").and_then(|v| v.as_i64()).unwrap_or(0);
                                    if current_version > r.schema_version as i64 {
                                        attrs = pm
                                            .upgrade_resource_state(
                                                provider_source,
                                                resource_type,
                                                r.schema_version as i64,
                                                &attrs,
                                            )
                                            .await
                                            .with_context(|| {
                                                format!("state upgrade failed for {}", address)
                                            })?;
                                    }
                                }
                                Some(attrs)
                            }
                            None => None,
                        };

                        // A resource explicitly requested via `--forget` drops out
                        // of state entirely; it is never planned against the
                        // provider, create/update/delete alike.
                        if let Some(ref prior) = prior_state {
                            if forget_addresses.contains(address.as_str()) {
                                changes.insert(
                                    address.clone(),
                                    PlannedChange {
                                        address: address.clone(),
                                        action: ResourceAction::Forget,
                                        resource_type: resource_type.clone(),
                                        provider_source: provider_source.clone(),
                                        planned_state: None,
                                        prior_state: Some(prior.clone()),
                                        user_config: Some(user_config),
                                        requires_replace: vec![],
                                        planned_private: vec![],
                                    },
                                );
                                return Ok(None);
                            }
                        }

                        // An `import { to = ..., id = ... }` block matching this
                        // address rewrites a planned Create into Read-then-adopt.
                        if prior_state.is_none() {
                            if let Some(import_spec) =
                                find_import_for_specs(&import_specs, address, &config.resource_type, &config.name)
                            {
                                let id_val = eval_expression(&import_spec.id, &eval_ctx);
                                let id_str = id_val
                                    .as_str()
                                    .map(|s| s.to_string())
                                    .unwrap_or_else(|| id_val.to_string());
                                let imported = pm
                                    .import_resource(provider_source, resource_type, &id_str)
                                    .await
                                    .with_context(|| {
                                        format!("import of {} (id={}) failed", address, id_str)
                                    })?;
                                changes.insert(
                                    address.clone(),
                                    PlannedChange {
                                        address: address.clone(),
                                        action: ResourceAction::Import,
                                        resource_type: resource_type.clone(),
                                        provider_source: provider_source.clone(),
                                        planned_state: Some(imported),
                                        prior_state: None,
                                        user_config: Some(user_config),
                                        requires_replace: vec![],
                                        planned_private: vec![],
                                    },
                                );
                                return Ok(None);
                            }
                        }

                        let plan_result = match pm
                            .plan_resource(
                                provider_source,
                                resource_type,
                                prior_state.as_ref(),
                                Some(&config_json),
                                &config_json,
                            )
                            .await
                        {
                            Ok(result) => result,
                            Err(e) => {
                                info!("PlanResourceChange failed for {}: {}", address, e);
                                return Ok(None);
                            }
                        };

                        let action = determine_action(
                            prior_state.as_ref(),
                            plan_result.planned_state.as_ref(),
                            &plan_result.requires_replace,
                            config.lifecycle.create_before_destroy,
                        );

                        if config.lifecycle.prevent_destroy
                            && matches!(
                                action,
                                ResourceAction::Delete
                                    | ResourceAction::DeleteThenCreate
                                    | ResourceAction::CreateThenDelete
                            )
                        {
                            anyhow::bail!(
                                "PlanError: {} has lifecycle.prevent_destroy set and the plan would destroy it; aborting",
                                address
                            );
                        }

                        changes.insert(
                            address.clone(),
                            PlannedChange {
                                address: address.clone(),
                                action,
                                resource_type: resource_type.clone(),
                                provider_source: provider_source.clone(),
                                planned_state: plan_result.planned_state,
                                prior_state,
                                user_config: Some(user_config),
                                requires_replace: plan_result.requires_replace,
                                planned_private: plan_result.planned_private,
                            },
                        );
                        Ok(None)
                    }
                    DagNode::DataSource {
                        ref address,
                        ref resource_type,
                        ref provider_source,
                        ref config,
                        ..
                    } => {
                        let user_config = attributes_to_json(&config.attributes, &eval_ctx);
                        let config_json = if let Ok(Some(schema)) =
                            pm.get_data_source_schema(provider_source, resource_type).await
                        {
                            build_full_resource_config(&user_config, &schema)
                        } else {
                            user_config.clone()
                        };

                        let data_state = match pm
                            .read_data_source(provider_source, resource_type, &config_json)
                            .await
                        {
                            Ok(state) => state,
                            Err(e) => {
                                println!("{}: {} — {}", address, "Read FAILED".red().bold(), e);
                                return Ok(None);
                            }
                        };

                        changes.insert(
                            address.clone(),
                            PlannedChange {
                                address: address.clone(),
                                action: ResourceAction::Read,
                                resource_type: resource_type.clone(),
                                provider_source: provider_source.clone(),
                                planned_state: Some(data_state),
                                prior_state: None,
                                user_config: Some(user_config),
                                requires_replace: vec![],
                                planned_private: vec![],
                            },
                        );
                        Ok(None)
                    }
                    DagNode::Output { .. } => Ok(None),
                    DagNode::Deferred { ref base_address, ref reason } => {
                        println!(
                            "{}: {} ({})",
                            base_address,
                            "expansion deferred until apply".yellow(),
                            reason,
                        );
                        changes.insert(
                            base_address.clone(),
                            PlannedChange {
                                address: base_address.clone(),
                                action: ResourceAction::Deferred,
                                resource_type: String::new(),
                                provider_source: String::new(),
                                planned_state: None,
                                prior_state: None,
                                user_config: None,
                                requires_replace: vec![],
                                planned_private: vec![],
                            },
                        );
                        Ok(None)
                    }
                }
            })
        });

        let walker = DagWalker::new(self.parallelism);
        let walk_results = walker
            .walk(
                &graph,
                Arc::new(executor),
                crate::dag::walker::WalkMode::Plan,
                CancellationToken::new(),
            )
            .await?;

        if let Some(failed) = walk_results.iter().find_map(|r| match &r.status {
            NodeStatus::Failed(msg) => Some(msg.clone()),
            _ => None,
        }) {
            anyhow::bail!(failed);
        }

        // Concurrent execution fills `changes` in completion order, not
        // address order; sort so two plans over identical inputs always
        // render the same action order regardless of scheduling races.
        let mut changes: Vec<PlannedChange> = changes.iter().map(|entry| entry.value().clone()).collect();
        changes.sort_by(|a, b| a.address.cmp(&b.address));

        let creates = changes.iter().filter(|c| c.action == ResourceAction::Create).count();
        let updates = changes.iter().filter(|c| c.action == ResourceAction::Update).count();
        let deletes = changes.iter().filter(|c| c.action == ResourceAction::Delete).count();
        let replaces = changes
            .iter()
            .filter(|c| matches!(c.action, ResourceAction::DeleteThenCreate | ResourceAction::CreateThenDelete))
            .count();
        let no_ops = changes.iter().filter(|c| c.action == ResourceAction::NoOp).count();
        let forgets = changes.iter().filter(|c| c.action == ResourceAction::Forget).count();
        let base_serial = serial_backend.get_serial(&serial_ws_id).await?;

        // The source grants deposed objects persistent lifetime across
        // failures, and it is ambiguous whether a plan that no longer
        // schedules cleanup for one should delete it automatically. Rather
        // than guess, surface it as a diagnostic prompting explicit user
        // action; nothing in this plan touches the deposed row itself.
        let mut diagnostics = Vec::new();
        let scheduled: std::collections::HashSet<&str> =
            changes.iter().map(|c| c.address.as_str()).collect();
        for deposed in serial_backend.list_deposed(&serial_ws_id, None).await? {
            if !scheduled.contains(deposed.address.as_str()) {
                diagnostics.push(
                    crate::diagnostics::Diagnostic::warning(
                        crate::diagnostics::DiagnosticKind::StateError,
                        format!(
                            "deposed object {} on {} has no scheduled cleanup in this plan",
                            deposed.id, deposed.address
                        ),
                    )
                    .with_address(deposed.address.clone())
                    .with_detail(
                        "run a plan that still replaces this resource, or remove the \
                         deposed object explicitly; it will not be deleted automatically",
                    ),
                );
            }
        }

        Ok(PlanSummary {
            changes,
            outputs,
            creates,
            updates,
            deletes,
            replaces,
            no_ops,
            forgets,
            base_serial,
            diagnostics,
        })
    }

    /// Apply all planned changes using the event-driven DAG walker.
    pub async fn apply(
        &self,
        workspace: &WorkspaceConfig,
        backend: Arc<dyn StateBackend>,
        workspace_id: &str,
        plan: &PlanSummary,
        cancel: CancellationToken,
    ) -> Result<ApplySummary> {
        let current_serial = backend.get_serial(workspace_id).await?;
        if current_serial != plan.base_serial {
            anyhow::bail!(
                "StateStale: workspace state changed since this plan was created (serial {} -> {}); re-run plan",
                plan.base_serial,
                current_serial
            );
        }

        let provider_map = build_provider_map(workspace);
        let var_defaults = build_variable_defaults(workspace);
        let (graph, _node_map) =
            resource_graph::build_resource_dag(workspace, &provider_map, &var_defaults)?;

        let pm = Arc::clone(&self.provider_manager);
        let ws_id = workspace_id.to_string();
        let backend_clone = Arc::clone(&backend);
        // Shared map of completed resource states for cross-resource reference resolution.
        // As each resource completes, its new state is inserted here so dependents can
        // resolve references like `aws_s3_bucket.public_scripts.id`.
        let resource_states: Arc<DashMap<String, serde_json::Value>> = Arc::new(DashMap::new());

        // Build a map of planned changes for the executor to reference
        let planned_changes: Arc<HashMap<String, ResourceAction>> = Arc::new(
            plan.changes
                .iter()
                .map(|c| (c.address.clone(), c.action.clone()))
                .collect(),
        );

        // Create the node executor closure
        let executor: NodeExecutor = Box::new(move |_idx: NodeIndex, node: DagNode| {
            let pm = Arc::clone(&pm);
            let ws_id = ws_id.clone();
            let backend = Arc::clone(&backend_clone);
            let resource_states = Arc::clone(&resource_states);
            let planned_changes = Arc::clone(&planned_changes);
            let eval_ctx = EvalContext::with_states(var_defaults.clone(), Arc::clone(&resource_states));

            Box::pin(async move {
                match node {
                    DagNode::Resource {
                        ref address,
                        ref resource_type,
                        ref provider_source,
                        ref config,
                        ..
                    } => {
                        // Forget drops the instance from state without ever
                        // calling the provider; it never reaches PlanResourceChange
                        // or ApplyResourceChange.
                        if planned_changes.get(address.as_str()) == Some(&ResourceAction::Forget) {
                            backend.delete_resource(&ws_id, address).await.ok();
                            info!(address = %address, "Resource forgotten (removed from state, provider untouched)");
                            return Ok(None);
                        }

                        let user_config = attributes_to_json(&config.attributes, &eval_ctx);

                        // Build full config with all schema attributes for msgpack encoding
                        let schema_opt = pm
                            .get_resource_schema(provider_source, resource_type)
                            .await
                            .ok()
                            .flatten();
                        let current_schema_version = schema_opt
                            .as_ref()
                            .and_then(|schema| schema.get("version"))
                            .and_then(|v| v.as_i64())
                            .unwrap_or(0);
                        let config_json = match &schema_opt {
                            Some(schema) => build_full_resource_config(&user_config, schema),
                            None => user_config,
                        };

                        // Get prior state from database, upgrading it to the provider's
                        // current schema version first if it was stored under an older one.
                        let prior_state = match backend.get_resource(&ws_id, address).await? {
                            Some(r) => {
                                let mut attrs: serde_json::Value =
                                    serde_json::from_str(&r.attributes_json)?;
                                if current_schema_version > r.schema_version as i64 {
                                    attrs = pm
                                        .upgrade_resource_state(
                                            provider_source,
                                            resource_type,
                                            r.schema_version as i64,
                                            &attrs,
                                        )
                                        .await
                                        .with_context(|| {
                                            format!("state upgrade failed for {}", address)
                                        })?;
                                }
                                Some(attrs)
                            }
                            None => None,
                        };

                        // Plan
                        let plan_result = pm
                            .plan_resource(
                                provider_source,
                                resource_type,
                                prior_state.as_ref(),
                                Some(&config_json),
                                &config_json,
                            )
                            .await?;

                        // If requires_replace is non-empty AND there's a prior state,
                        // we need to replace the resource, either destroy-then-create
                        // (the default) or create-then-destroy when the resource opts
                        // into lifecycle.create_before_destroy.
                        let apply_result = if !plan_result.requires_replace.is_empty()
                            && prior_state.is_some()
                        {
                            if config.lifecycle.create_before_destroy {
                                info!(
                                    address = %address,
                                    replace_fields = ?plan_result.requires_replace,
                                    "Resource requires replacement — creating new before destroying old (create_before_destroy)"
                                );

                                // Step 1: create the replacement under the same address.
                                let create_plan = pm
                                    .plan_resource(
                                        provider_source,
                                        resource_type,
                                        None,
                                        Some(&config_json),
                                        &config_json,
                                    )
                                    .await?;

                                let create_result = pm
                                    .apply_resource(
                                        provider_source,
                                        resource_type,
                                        None,
                                        create_plan.planned_state.as_ref(),
                                        &config_json,
                                        &create_plan.planned_private,
                                    )
                                    .await?;

                                // Step 2: depose the old object — it keeps its prior
                                // attributes in the deposed table until its destroy
                                // is confirmed, so a failed destroy leaves it
                                // recoverable in state rather than orphaned.
                                let deposed_id = uuid::Uuid::new_v4().to_string();
                                if let Some(ref old_state) = prior_state {
                                    let deposed = crate::state::models::DeposedResource {
                                        id: deposed_id.clone(),
                                        workspace_id: ws_id.clone(),
                                        address: address.clone(),
                                        resource_type: resource_type.clone(),
                                        resource_name: config.name.clone(),
                                        provider_source: provider_source.clone(),
                                        attributes_json: serde_json::to_string(old_state)?,
                                        deposed_at: chrono::Utc::now().to_rfc3339(),
                                    };
                                    backend.upsert_deposed(&deposed).await?;
                                }

                                // Step 3: attempt to destroy the deposed object. If it
                                // fails, the deposed row stays in state for a future
                                // apply to retry instead of being silently dropped.
                                let destroy_plan = pm
                                    .plan_resource(
                                        provider_source,
                                        resource_type,
                                        prior_state.as_ref(),
                                        None,
                                        &config_json,
                                    )
                                    .await?;

                                match pm
                                    .apply_resource(
                                        provider_source,
                                        resource_type,
                                        prior_state.as_ref(),
                                        None,
                                        &config_json,
                                        &destroy_plan.planned_private,
                                    )
                                    .await
                                {
                                    Ok(_) => {
                                        backend.delete_deposed(&deposed_id).await.ok();
                                        info!(address = %address, "Deposed object destroyed");
                                    }
                                    Err(e) => {
                                        info!(
                                            address = %address,
                                            error = %e,
                                            "Deposed object failed to destroy; left in state for retry"
                                        );
                                    }
                                }

                                create_result
                            } else {
                                info!(
                                    address = %address,
                                    replace_fields = ?plan_result.requires_replace,
                                    "Resource requires replacement — destroying old, creating new"
                                );

                                // Step 1: Destroy the old resource
                                // Plan a destroy (prior → null)
                                let destroy_plan = pm
                                    .plan_resource(
                                        provider_source,
                                        resource_type,
                                        prior_state.as_ref(),
                                        None, // proposed_new = null means destroy
                                        &config_json,
                                    )
                                    .await?;

                                // Apply the destroy
                                let _destroy_result = pm
                                    .apply_resource(
                                        provider_source,
                                        resource_type,
                                        prior_state.as_ref(),
                                        None, // planned_state = null means destroy
                                        &config_json,
                                        &destroy_plan.planned_private,
                                    )
                                    .await?;

                                info!(address = %address, "Old resource destroyed");

                                // Remove from state database
                                backend.delete_resource(&ws_id, address).await.ok();

                                // Step 2: Create the new resource
                                // Plan a create (null → new)
                                let create_plan = pm
                                    .plan_resource(
                                        provider_source,
                                        resource_type,
                                        None, // no prior state
                                        Some(&config_json),
                                        &config_json,
                                    )
                                    .await?;

                                // Apply the create
                                pm.apply_resource(
                                    provider_source,
                                    resource_type,
                                    None, // no prior state
                                    create_plan.planned_state.as_ref(),
                                    &config_json,
                                    &create_plan.planned_private,
                                )
                                .await?
                            }
                        } else {
                            // Normal apply (create or in-place update). If the resource
                            // declares a `timeouts` block, race the provider call against
                            // it: on expiry the call is left to finish in the background
                            // (same detach-don't-abort policy as run cancellation) and the
                            // instance is marked tainted so the next plan surfaces it.
                            let call = pm.apply_resource(
                                provider_source,
                                resource_type,
                                prior_state.as_ref(),
                                plan_result.planned_state.as_ref(),
                                &config_json,
                                &plan_result.planned_private,
                            );
                            match config.timeout {
                                Some(deadline) => match tokio::time::timeout(deadline, call).await
                                {
                                    Ok(result) => result?,
                                    Err(_) => {
                                        warn!(
                                            address = %address,
                                            deadline = ?deadline,
                                            "Apply timed out; marking resource tainted"
                                        );
                                        if let Some(ref prior) = prior_state {
                                            let mut tainted = crate::state::models::ResourceState::new(
                                                &ws_id,
                                                resource_type,
                                                &config.name,
                                                address,
                                            );
                                            tainted.provider_source = provider_source.to_string();
                                            tainted.status = "tainted".to_string();
                                            tainted.schema_version = current_schema_version as i32;
                                            tainted.attributes_json = serde_json::to_string(prior)?;
                                            backend.upsert_resource(&tainted).await?;
                                        }
                                        return Ok(None);
                                    }
                                },
                                None => call.await?,
                            }
                        };

                        // Store the new state in both the database and the shared map
                        if let Some(ref new_state) = apply_result.new_state {
                            // Insert into shared resource states for dependent resources
                            resource_states.insert(address.clone(), new_state.clone());

                            let mut resource_state = crate::state::models::ResourceState::new(
                                &ws_id,
                                resource_type,
                                &config.name,
                                address,
                            );
                            resource_state.provider_source = provider_source.to_string();
                            resource_state.status = "created".to_string();
                            resource_state.schema_version = current_schema_version as i32;
                            resource_state.attributes_json =
                                serde_json::to_string(new_state)?;

                            backend.upsert_resource(&resource_state).await?;

                            info!(address = %address, "Resource applied successfully");
                        }

                        Ok(apply_result.new_state)
                    }
                    DagNode::DataSource {
                        ref address,
                        ref resource_type,
                        ref provider_source,
                        ref config,
                        ..
                    } => {
                        let user_config = attributes_to_json(&config.attributes, &eval_ctx);

                        // Build full config with all schema attributes
                        let config_json = if let Ok(Some(schema)) =
                            pm.get_data_source_schema(provider_source, resource_type).await
                        {
                            build_full_resource_config(&user_config, &schema)
                        } else {
                            user_config
                        };

                        let state = pm
                            .read_data_source(provider_source, resource_type, &config_json)
                            .await?;
                        // Store data source state for dependent resources
                        resource_states.insert(address.clone(), state.clone());
                        Ok(Some(state))
                    }
                    DagNode::Output { .. } => {
                        // Outputs are evaluated after all resources
                        Ok(None)
                    }
                    DagNode::Deferred { ref base_address, ref reason } => {
                        anyhow::bail!(
                            "PlanError: {} has unresolved count/for_each ({}) and cannot be applied; re-run plan once the value is known",
                            base_address, reason
                        );
                    }
                }
            })
        });

        let walker = DagWalker::new(self.parallelism);
        let start = std::time::Instant::now();
        let results = walker
            .walk(&graph, Arc::new(executor), crate::dag::walker::WalkMode::Apply, cancel)
            .await?;
        let elapsed_secs = start.elapsed().as_secs();

        let failed = results
            .iter()
            .filter(|r| matches!(r.status, NodeStatus::Failed(_)))
            .count();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.status, NodeStatus::Skipped(_)))
            .count();

        // Count by action type from the plan
        let added = plan.creates + plan.replaces;
        let changed = plan.updates;
        let destroyed = plan.deletes;

        if failed == 0 {
            backend.bump_serial(workspace_id).await?;
        }

        Ok(ApplySummary {
            results,
            added,
            changed,
            destroyed,
            forgotten: plan.forgets,
            failed,
            skipped,
            elapsed_secs,
            is_destroy: false,
        })
    }

    /// Destroy resources in reverse dependency order.
    pub async fn destroy(
        &self,
        workspace: &WorkspaceConfig,
        backend: Arc<dyn StateBackend>,
        workspace_id: &str,
        cancel: CancellationToken,
    ) -> Result<ApplySummary> {
        let provider_map = build_provider_map(workspace);
        let var_defaults = build_variable_defaults(workspace);
        let (graph, _node_map) =
            resource_graph::build_resource_dag(workspace, &provider_map, &var_defaults)?;

        // For destroy, we reverse the graph edges so dependents are destroyed first
        let mut reverse_graph = petgraph::graph::DiGraph::new();
        let mut idx_map: HashMap<NodeIndex, NodeIndex> = HashMap::new();

        for idx in graph.node_indices() {
            let new_idx = reverse_graph.add_node(graph[idx].clone());
            idx_map.insert(idx, new_idx);
        }

        for edge in graph.edge_indices() {
            if let Some((from, to)) = graph.edge_endpoints(edge) {
                // Reverse the edge direction
                reverse_graph.add_edge(
                    idx_map[&to],
                    idx_map[&from],
                    crate::dag::resource_graph::DependencyEdge::Explicit,
                );
            }
        }

        let pm = Arc::clone(&self.provider_manager);
        let ws_id = workspace_id.to_string();
        let backend_clone = Arc::clone(&backend);

        self.initialize_providers(workspace).await?;

        let executor: NodeExecutor = Box::new(move |_idx: NodeIndex, node: DagNode| {
            let pm = Arc::clone(&pm);
            let ws_id = ws_id.clone();
            let backend = Arc::clone(&backend_clone);
            let eval_ctx = EvalContext::plan_only(var_defaults.clone());

            Box::pin(async move {
                match node {
                    DagNode::Resource {
                        ref address,
                        ref resource_type,
                        ref provider_source,
                        ref config,
                        ..
                    } => {
                        // Get current state
                        let current_state = backend
                            .get_resource(&ws_id, address)
                            .await?
                            .map(|r| serde_json::from_str::<serde_json::Value>(&r.attributes_json))
                            .transpose()?;

                        if current_state.is_none() {
                            debug!(address = %address, "Resource not in state, skipping destroy");
                            return Ok(None);
                        }

                        let user_config = attributes_to_json(&config.attributes, &eval_ctx);

                        // Build full config with all schema attributes for msgpack encoding
                        let config_json = if let Ok(Some(schema)) =
                            pm.get_resource_schema(provider_source, resource_type).await
                        {
                            build_full_resource_config(&user_config, &schema)
                        } else {
                            user_config
                        };

                        // Plan destroy (proposed_new_state = null)
                        let plan_result = pm
                            .plan_resource(
                                provider_source,
                                resource_type,
                                current_state.as_ref(),
                                None,  // null planned state = destroy
                                &config_json,
                            )
                            .await?;

                        // Apply destroy, racing against the resource's declared
                        // timeout (if any) the same way the normal apply path does.
                        // On expiry the instance is left in state and tainted
                        // instead of removed, since we can't tell whether the
                        // provider's delete actually completed.
                        let call = pm.apply_resource(
                            provider_source,
                            resource_type,
                            current_state.as_ref(),
                            None, // null planned state = destroy
                            &config_json,
                            &plan_result.planned_private,
                        );
                        match config.timeout {
                            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                                Ok(result) => {
                                    result?;
                                }
                                Err(_) => {
                                    warn!(
                                        address = %address,
                                        deadline = ?deadline,
                                        "Destroy timed out; leaving resource tainted in state"
                                    );
                                    if let Some(state) = current_state.as_ref() {
                                        let mut tainted = crate::state::models::ResourceState::new(
                                            &ws_id,
                                            resource_type,
                                            &config.name,
                                            address,
                                        );
                                        tainted.provider_source = provider_source.to_string();
                                        tainted.status = "tainted".to_string();
                                        tainted.attributes_json = serde_json::to_string(state)?;
                                        backend.upsert_resource(&tainted).await?;
                                    }
                                    return Ok(None);
                                }
                            },
                            None => {
                                call.await?;
                            }
                        }

                        // Remove from state
                        backend.delete_resource(&ws_id, address).await?;
                        info!(address = %address, "Resource destroyed");

                        // Return the prior state's ID so the walker can display it
                        let resource_id = current_state
                            .as_ref()
                            .and_then(|s| s.get("id"))
                            .and_then(|v| v.as_str())
                            .map(|id| serde_json::json!({"id": id}));
                        Ok(resource_id)
                    }
                    _ => Ok(None),
                }
            })
        });

        let walker = DagWalker::new(self.parallelism);
        let start = std::time::Instant::now();
        let results = walker
            .walk(&reverse_graph, Arc::new(executor), crate::dag::walker::WalkMode::Destroy, cancel)
            .await?;
        let elapsed_secs = start.elapsed().as_secs();

        let destroyed = results.iter().filter(|r| r.status == NodeStatus::Succeeded).count();
        let failed = results
            .iter()
            .filter(|r| matches!(r.status, NodeStatus::Failed(_)))
            .count();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.status, NodeStatus::Skipped(_)))
            .count();

        if failed == 0 {
            backend.bump_serial(workspace_id).await?;
        }

        Ok(ApplySummary {
            results,
            added: 0,
            changed: 0,
            destroyed,
            forgotten: 0,
            failed,
            skipped,
            elapsed_secs,
            is_destroy: true,
        })
    }

    /// Initialize all providers referenced in the workspace.
    pub async fn initialize_providers(&self, workspace: &WorkspaceConfig) -> Result<()> {
        // Build variable defaults map for resolving var.xxx references
        let var_defaults = build_variable_defaults(workspace);

        for provider in &workspace.providers {
            let version = provider
                .version_constraint
                .as_deref()
                .unwrap_or(">= 0.0.0");

            info!(
                provider = %provider.source,
                version = %version,
                "Initializing provider"
            );

            self.provider_manager
                .get_connection(&provider.source, version)
                .await
                .context(format!("Failed to initialize provider {}", provider.source))?;

            // Get schema so we know all provider config attributes (required for cty msgpack)
            let schema = self
                .provider_manager
                .get_schema(&provider.source, version)
                .await
                .context(format!(
                    "Failed to get schema for provider {}",
                    provider.source
                ))?;

            // Build full provider config with all attributes (unset ones as null)
            let user_config = resolve_attributes(&provider.config, &var_defaults);
            let full_config = build_full_provider_config(&user_config, &schema);
            info!("Configuring provider with {} attributes",
                full_config.as_object().map(|m| m.len()).unwrap_or(0));

            self.provider_manager
                .configure_provider(&provider.source, &full_config)
                .await
                .context(format!(
                    "Failed to configure provider {}",
                    provider.source
                ))?;
        }

        Ok(())
    }

    /// Stop all running providers.
    pub async fn shutdown(&self) -> Result<()> {
        self.provider_manager.stop_all().await
    }
}

// ─── Helper Functions ────────────────────────────────────────────────────────

/// Build a map from provider local name to source string.
pub fn build_provider_map(workspace: &WorkspaceConfig) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for provider in &workspace.providers {
        map.insert(provider.name.clone(), provider.source.clone());
    }

    // Also add from terraform_settings.required_providers
    if let Some(ref tf) = workspace.terraform_settings {
        for (name, req) in &tf.required_providers {
            map.insert(name.clone(), req.source.clone());
        }
    }

    map
}

/// Evaluation context for resolving expressions.
/// Contains variable defaults and completed resource states for cross-resource references.
#[derive(Clone)]
struct EvalContext {
    var_defaults: HashMap<String, serde_json::Value>,
    /// Completed resource states keyed by address (e.g. "aws_s3_bucket.public_scripts").
    /// Populated during apply as resources complete. Empty during plan.
    resource_states: Arc<DashMap<String, serde_json::Value>>,
    /// Loop-local bindings (for-expression key/value vars, `each.key`/`each.value`).
    /// Shadows var_defaults and resource_states when a reference's first segment matches.
    locals: HashMap<String, serde_json::Value>,
}

impl EvalContext {
    fn plan_only(var_defaults: HashMap<String, serde_json::Value>) -> Self {
        Self {
            var_defaults,
            resource_states: Arc::new(DashMap::new()),
            locals: HashMap::new(),
        }
    }

    fn with_states(
        var_defaults: HashMap<String, serde_json::Value>,
        resource_states: Arc<DashMap<String, serde_json::Value>>,
    ) -> Self {
        Self { var_defaults, resource_states, locals: HashMap::new() }
    }

    /// Bind a loop-local name (e.g. "each", or a for-expression's key/value var) to a value.
    fn bind_local(&mut self, name: &str, value: serde_json::Value) {
        self.locals.insert(name.to_string(), value);
    }

    /// Return a copy of this context with `each` bound to a splat iteration item.
    fn with_splat_item(&self, item: serde_json::Value) -> Self {
        let mut ctx = self.clone();
        ctx.bind_local("each", item);
        ctx
    }
}

/// Convert attribute expressions to a JSON object, resolving variable and resource references.
fn attributes_to_json(
    attrs: &HashMap<String, crate::config::types::Expression>,
    ctx: &EvalContext,
) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, expr) in attrs {
        map.insert(key.clone(), eval_expression(expr, ctx));
    }
    serde_json::Value::Object(map)
}

/// Evaluate an expression to a JSON value, resolving variable and resource references.
fn eval_expression(
    expr: &crate::config::types::Expression,
    ctx: &EvalContext,
) -> serde_json::Value {
    use crate::config::types::{Expression, TemplatePart};
    match expr {
        Expression::Literal(val) => resolve_value_json(val, ctx),
        Expression::Reference(parts) => resolve_reference(parts, ctx),
        Expression::Template(parts) => {
            let mut result = String::new();
            for part in parts {
                match part {
                    TemplatePart::Literal(s) => result.push_str(s),
                    TemplatePart::Interpolation(expr) => {
                        let val = eval_expression(expr, ctx);
                        match val {
                            serde_json::Value::String(s) => result.push_str(&s),
                            serde_json::Value::Number(n) => result.push_str(&n.to_string()),
                            serde_json::Value::Bool(b) => result.push_str(&b.to_string()),
                            serde_json::Value::Null => {} // skip nulls in templates
                            _ => result.push_str(&val.to_string()),
                        }
                    }
                    TemplatePart::Directive(expr) => {
                        let val = eval_expression(expr, ctx);
                        if let serde_json::Value::String(s) = val {
                            result.push_str(&s);
                        }
                    }
                }
            }
            serde_json::Value::String(result)
        }
        Expression::FunctionCall { name, args } => {
            let evaluated_args: Vec<serde_json::Value> =
                args.iter().map(|a| eval_expression(a, ctx)).collect();
            match name.as_str() {
                "tolist" | "toset" => evaluated_args.into_iter().next().unwrap_or(serde_json::Value::Null),
                "tostring" => match evaluated_args.into_iter().next() {
                    Some(serde_json::Value::String(s)) => serde_json::Value::String(s),
                    Some(v) => serde_json::Value::String(v.to_string()),
                    None => serde_json::Value::Null,
                },
                "tonumber" => match evaluated_args.first() {
                    Some(serde_json::Value::String(s)) => s.parse::<f64>()
                        .map(|n| serde_json::json!(n))
                        .unwrap_or(serde_json::Value::Null),
                    Some(v @ serde_json::Value::Number(_)) => v.clone(),
                    _ => serde_json::Value::Null,
                },
                "tobool" => match evaluated_args.first() {
                    Some(serde_json::Value::String(s)) => match s.as_str() {
                        "true" => serde_json::Value::Bool(true),
                        "false" => serde_json::Value::Bool(false),
                        _ => serde_json::Value::Null,
                    },
                    Some(v @ serde_json::Value::Bool(_)) => v.clone(),
                    _ => serde_json::Value::Null,
                },
                "tomap" => evaluated_args.into_iter().next().unwrap_or(serde_json::Value::Null),
                "jsonencode" => {
                    if let Some(val) = evaluated_args.into_iter().next() {
                        match serde_json::to_string(&val) {
                            Ok(s) => serde_json::Value::String(s),
                            Err(_) => serde_json::Value::Null,
                        }
                    } else {
                        serde_json::Value::Null
                    }
                }
                "jsondecode" => {
                    if let Some(serde_json::Value::String(s)) = evaluated_args.first() {
                        serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
                    } else {
                        serde_json::Value::Null
                    }
                }
                "length" => {
                    if let Some(serde_json::Value::Array(arr)) = evaluated_args.first() {
                        serde_json::json!(arr.len())
                    } else if let Some(serde_json::Value::String(s)) = evaluated_args.first() {
                        serde_json::json!(s.len())
                    } else if let Some(serde_json::Value::Object(m)) = evaluated_args.first() {
                        serde_json::json!(m.len())
                    } else {
                        serde_json::json!(0)
                    }
                }
                "concat" => {
                    let mut result = Vec::new();
                    for arg in &evaluated_args {
                        if let serde_json::Value::Array(arr) = arg {
                            result.extend(arr.iter().cloned());
                        }
                    }
                    serde_json::Value::Array(result)
                }
                "merge" => {
                    let mut result = serde_json::Map::new();
                    for arg in &evaluated_args {
                        if let serde_json::Value::Object(m) = arg {
                            result.extend(m.iter().map(|(k, v)| (k.clone(), v.clone())));
                        }
                    }
                    serde_json::Value::Object(result)
                }
                "keys" => {
                    if let Some(serde_json::Value::Object(m)) = evaluated_args.first() {
                        serde_json::Value::Array(m.keys().map(|k| serde_json::Value::String(k.clone())).collect())
                    } else {
                        serde_json::Value::Array(vec![])
                    }
                }
                "values" => {
                    if let Some(serde_json::Value::Object(m)) = evaluated_args.first() {
                        serde_json::Value::Array(m.values().cloned().collect())
                    } else {
                        serde_json::Value::Array(vec![])
                    }
                }
                "lookup" => {
                    let map = evaluated_args.first();
                    let key = evaluated_args.get(1);
                    let default = evaluated_args.get(2);
                    if let (Some(serde_json::Value::Object(m)), Some(serde_json::Value::String(k))) = (map, key) {
                        m.get(k).cloned().or_else(|| default.cloned()).unwrap_or(serde_json::Value::Null)
                    } else {
                        default.cloned().unwrap_or(serde_json::Value::Null)
                    }
                }
                "element" => {
                    let list = evaluated_args.first();
                    let idx = evaluated_args.get(1);
                    if let (Some(serde_json::Value::Array(arr)), Some(serde_json::Value::Number(n))) = (list, idx) {
                        let i = n.as_u64().unwrap_or(0) as usize;
                        arr.get(i % arr.len().max(1)).cloned().unwrap_or(serde_json::Value::Null)
                    } else {
                        serde_json::Value::Null
                    }
                }
                "join" => {
                    if let (Some(serde_json::Value::String(sep)), Some(serde_json::Value::Array(arr))) =
                        (evaluated_args.first(), evaluated_args.get(1))
                    {
                        let parts: Vec<String> = arr.iter().map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        }).collect();
                        serde_json::Value::String(parts.join(sep))
                    } else {
                        serde_json::Value::String(String::new())
                    }
                }
                "split" => {
                    if let (Some(serde_json::Value::String(sep)), Some(serde_json::Value::String(s))) =
                        (evaluated_args.first(), evaluated_args.get(1))
                    {
                        serde_json::Value::Array(s.split(sep.as_str()).map(|p| serde_json::Value::String(p.to_string())).collect())
                    } else {
                        serde_json::Value::Array(vec![])
                    }
                }
                "format" => {
                    if let Some(serde_json::Value::String(fmt)) = evaluated_args.first() {
                        // Simple %s/%d/%v replacement
                        let mut result = fmt.clone();
                        for arg in &evaluated_args[1..] {
                            let replacement = match arg {
                                serde_json::Value::String(s) => s.clone(),
                                serde_json::Value::Number(n) => n.to_string(),
                                serde_json::Value::Bool(b) => b.to_string(),
                                other => other.to_string(),
                            };
                            if let Some(pos) = result.find("%s").or_else(|| result.find("%d")).or_else(|| result.find("%v")) {
                                result.replace_range(pos..pos + 2, &replacement);
                            }
                        }
                        serde_json::Value::String(result)
                    } else {
                        serde_json::Value::String(String::new())
                    }
                }
                "coalesce" => {
                    evaluated_args.into_iter()
                        .find(|v| !v.is_null() && *v != serde_json::Value::String(String::new()))
                        .unwrap_or(serde_json::Value::Null)
                }
                "lower" => match evaluated_args.into_iter().next() {
                    Some(serde_json::Value::String(s)) => serde_json::Value::String(s.to_lowercase()),
                    _ => serde_json::Value::Null,
                },
                "upper" => match evaluated_args.into_iter().next() {
                    Some(serde_json::Value::String(s)) => serde_json::Value::String(s.to_uppercase()),
                    _ => serde_json::Value::Null,
                },
                "trim" | "trimspace" => match evaluated_args.into_iter().next() {
                    Some(serde_json::Value::String(s)) => serde_json::Value::String(s.trim().to_string()),
                    _ => serde_json::Value::Null,
                },
                "replace" => {
                    if let (Some(serde_json::Value::String(s)), Some(serde_json::Value::String(old)), Some(serde_json::Value::String(new))) =
                        (evaluated_args.first(), evaluated_args.get(1), evaluated_args.get(2))
                    {
                        serde_json::Value::String(s.replace(old.as_str(), new.as_str()))
                    } else {
                        serde_json::Value::Null
                    }
                }
                "try" => {
                    evaluated_args.into_iter()
                        .find(|v| !v.is_null())
                        .unwrap_or(serde_json::Value::Null)
                }
                "compact" => {
                    if let Some(serde_json::Value::Array(arr)) = evaluated_args.into_iter().next() {
                        serde_json::Value::Array(arr.into_iter().filter(|v| {
                            !matches!(v, serde_json::Value::String(s) if s.is_empty())
                                && !v.is_null()
                        }).collect())
                    } else {
                        serde_json::Value::Array(vec![])
                    }
                }
                "flatten" => {
                    if let Some(serde_json::Value::Array(arr)) = evaluated_args.into_iter().next() {
                        let mut result = Vec::new();
                        for item in arr {
                            if let serde_json::Value::Array(inner) = item {
                                result.extend(inner);
                            } else {
                                result.push(item);
                            }
                        }
                        serde_json::Value::Array(result)
                    } else {
                        serde_json::Value::Array(vec![])
                    }
                }
                "distinct" => {
                    if let Some(serde_json::Value::Array(arr)) = evaluated_args.into_iter().next() {
                        let mut seen = Vec::new();
                        let mut result = Vec::new();
                        for item in arr {
                            let s = item.to_string();
                            if !seen.contains(&s) {
                                seen.push(s);
                                result.push(item);
                            }
                        }
                        serde_json::Value::Array(result)
                    } else {
                        serde_json::Value::Array(vec![])
                    }
                }
                other => {
                    tracing::warn!("Unsupported function: {}()", other);
                    serde_json::Value::Null
                }
            }
        }
        Expression::Conditional { condition, true_val, false_val } => {
            let cond = eval_expression(condition, ctx);
            let is_true = match &cond {
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::Null => false,
                _ => true,
            };
            if is_true {
                eval_expression(true_val, ctx)
            } else {
                eval_expression(false_val, ctx)
            }
        }
        Expression::Index { collection, key } => {
            let coll = eval_expression(collection, ctx);
            let key_val = eval_expression(key, ctx);
            match (&coll, &key_val) {
                (serde_json::Value::Array(items), serde_json::Value::Number(n)) => {
                    let i = n.as_i64().unwrap_or(0);
                    if i >= 0 {
                        items.get(i as usize).cloned().unwrap_or(serde_json::Value::Null)
                    } else {
                        serde_json::Value::Null
                    }
                }
                (serde_json::Value::Object(map), serde_json::Value::String(s)) => {
                    map.get(s).cloned().unwrap_or(serde_json::Value::Null)
                }
                _ => serde_json::Value::Null,
            }
        }
        Expression::GetAttr { object, name } => {
            let obj = eval_expression(object, ctx);
            match obj {
                serde_json::Value::Object(map) => {
                    map.get(name).cloned().unwrap_or(serde_json::Value::Null)
                }
                _ => serde_json::Value::Null,
            }
        }
        Expression::BinaryOp { op, left, right } => {
            eval_binary_op(*op, &eval_expression(left, ctx), &eval_expression(right, ctx))
        }
        Expression::UnaryOp { op, operand } => {
            eval_unary_op(*op, &eval_expression(operand, ctx))
        }
        Expression::Splat { source, each } => {
            let src = eval_expression(source, ctx);
            let items = match src {
                serde_json::Value::Array(items) => items,
                serde_json::Value::Null => vec![],
                other => vec![other],
            };
            let results: Vec<serde_json::Value> = items
                .into_iter()
                .map(|item| eval_splat_each(each, &item, ctx))
                .collect();
            serde_json::Value::Array(results)
        }
        Expression::ForExpr {
            collection,
            key_var,
            val_var,
            key_expr,
            value_expr,
            condition,
            grouping,
        } => eval_for_expr(
            collection, key_var, val_var, key_expr, value_expr, condition, *grouping, ctx,
        ),
    }
}

/// Evaluate `each.value`/`each.key`-style access within a splat's trailing
/// selector by temporarily binding the splat variable `ctx.splat_var`.
fn eval_splat_each(
    each: &crate::config::types::Expression,
    item: &serde_json::Value,
    ctx: &EvalContext,
) -> serde_json::Value {
    use crate::config::types::Expression;
    // A bare `each.*` splat with no trailing attribute just yields the item.
    if matches!(each, Expression::Literal(crate::config::types::Value::Null)) {
        return item.clone();
    }
    eval_expression(each, &ctx.with_splat_item(item.clone()))
}

/// Evaluate a `for` expression over a list or map collection, producing
/// either a list (no grouping) or a map (key_var present or grouping) value.
fn eval_for_expr(
    collection: &crate::config::types::Expression,
    key_var: &Option<String>,
    val_var: &str,
    key_expr: &Option<Box<crate::config::types::Expression>>,
    value_expr: &crate::config::types::Expression,
    condition: &Option<Box<crate::config::types::Expression>>,
    grouping: bool,
    ctx: &EvalContext,
) -> serde_json::Value {
    let coll = eval_expression(collection, ctx);

    let entries: Vec<(serde_json::Value, serde_json::Value)> = match coll {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (serde_json::json!(i), v))
            .collect(),
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (serde_json::Value::String(k), v))
            .collect(),
        _ => vec![],
    };

    let mut list_out = Vec::new();
    let mut map_out: serde_json::Map<String, serde_json::Value> = serde_json::Map::new();
    let mut group_out: serde_json::Map<String, Vec<serde_json::Value>> = serde_json::Map::new();

    for (k, v) in entries {
        let mut iter_ctx = ctx.clone();
        if let Some(kv) = key_var {
            iter_ctx.bind_local(kv, k.clone());
        }
        iter_ctx.bind_local(val_var, v.clone());

        if let Some(cond) = condition {
            let keep = match eval_expression(cond, &iter_ctx) {
                serde_json::Value::Bool(b) => b,
                serde_json::Value::Null => false,
                _ => true,
            };
            if !keep {
                continue;
            }
        }

        let out_val = eval_expression(value_expr, &iter_ctx);

        if let Some(ke) = key_expr {
            let out_key = eval_expression(ke, &iter_ctx);
            let key_str = match &out_key {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if grouping {
                group_out.entry(key_str).or_default().push(out_val);
            } else {
                map_out.insert(key_str, out_val);
            }
        } else {
            list_out.push(out_val);
        }
    }

    if key_expr.is_some() {
        if grouping {
            serde_json::Value::Object(
                group_out
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::Array(v)))
                    .collect(),
            )
        } else {
            serde_json::Value::Object(map_out)
        }
    } else {
        serde_json::Value::Array(list_out)
    }
}

fn eval_binary_op(
    op: crate::config::types::BinOp,
    left: &serde_json::Value,
    right: &serde_json::Value,
) -> serde_json::Value {
    use crate::config::types::BinOp;
    let as_f64 = |v: &serde_json::Value| -> Option<f64> {
        match v {
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            match (as_f64(left), as_f64(right)) {
                (Some(l), Some(r)) => {
                    let result = match op {
                        BinOp::Add => l + r,
                        BinOp::Sub => l - r,
                        BinOp::Mul => l * r,
                        BinOp::Div => l / r,
                        BinOp::Mod => l % r,
                        _ => unreachable!(),
                    };
                    if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
                        serde_json::json!(result as i64)
                    } else {
                        serde_json::json!(result)
                    }
                }
                _ => serde_json::Value::Null,
            }
        }
        BinOp::Eq => serde_json::Value::Bool(left == right),
        BinOp::NotEq => serde_json::Value::Bool(left != right),
        BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => match (as_f64(left), as_f64(right)) {
            (Some(l), Some(r)) => serde_json::Value::Bool(match op {
                BinOp::Lt => l < r,
                BinOp::Lte => l <= r,
                BinOp::Gt => l > r,
                BinOp::Gte => l >= r,
                _ => unreachable!(),
            }),
            _ => serde_json::Value::Bool(false),
        },
        BinOp::And => serde_json::Value::Bool(is_truthy(left) && is_truthy(right)),
        BinOp::Or => serde_json::Value::Bool(is_truthy(left) || is_truthy(right)),
    }
}

fn eval_unary_op(op: crate::config::types::UnaryOp, operand: &serde_json::Value) -> serde_json::Value {
    use crate::config::types::UnaryOp;
    match op {
        UnaryOp::Neg => match operand {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    serde_json::json!(-i)
                } else if let Some(f) = n.as_f64() {
                    serde_json::json!(-f)
                } else {
                    serde_json::Value::Null
                }
            }
            _ => serde_json::Value::Null,
        },
        UnaryOp::Not => serde_json::Value::Bool(!is_truthy(operand)),
    }
}

fn is_truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Null => false,
        _ => true,
    }
}

/// Resolve a reference expression (var.xxx, aws_vpc.main.id, data.aws_ami.xxx.id, etc.)
fn resolve_reference(parts: &[String], ctx: &EvalContext) -> serde_json::Value {
    if parts.len() >= 2 && parts[0] == "var" {
        if let Some(val) = ctx.var_defaults.get(&parts[1]) {
            return val.clone();
        }
        return serde_json::Value::Null;
    }

    // data.TYPE.NAME.ATTR
    if parts.len() >= 4 && parts[0] == "data" {
        let address = format!("data.{}.{}", parts[1], parts[2]);
        if let Some(state) = ctx.resource_states.get(&address) {
            return traverse_json_value(state.value(), &parts[3..]);
        }
        return serde_json::Value::Null;
    }

    // resource references: TYPE.NAME.ATTR (e.g. aws_s3_bucket.public_scripts.id)
    if parts.len() >= 3 {
        let address = format!("{}.{}", parts[0], parts[1]);
        if let Some(state) = ctx.resource_states.get(&address) {
            return traverse_json_value(state.value(), &parts[2..]);
        }
    }

    serde_json::Value::Null
}

/// Traverse a JSON value by attribute path.
/// e.g. ["id"] looks up state["id"], ["tags", "Name"] looks up state["tags"]["Name"]
fn traverse_json_value(value: &serde_json::Value, path: &[String]) -> serde_json::Value {
    let mut current = value;
    for key in path {
        match current {
            serde_json::Value::Object(map) => {
                if let Some(v) = map.get(key.as_str()) {
                    current = v;
                } else {
                    return serde_json::Value::Null;
                }
            }
            serde_json::Value::Array(arr) => {
                if let Ok(idx) = key.parse::<usize>() {
                    if let Some(v) = arr.get(idx) {
                        current = v;
                    } else {
                        return serde_json::Value::Null;
                    }
                } else {
                    return serde_json::Value::Null;
                }
            }
            _ => return serde_json::Value::Null,
        }
    }
    current.clone()
}

/// Resolve a literal Value to JSON, handling string interpolation in nested values.
fn resolve_value_json(
    val: &crate::config::types::Value,
    ctx: &EvalContext,
) -> serde_json::Value {
    use crate::config::types::Value;
    match val {
        Value::Null => serde_json::Value::Null,
        Value::Unknown(_) => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::json!(*i),
        Value::Float(f) => serde_json::json!(*f),
        Value::String(s) => {
            if s.contains("${") {
                resolve_interpolated_string(s, ctx)
            } else {
                serde_json::Value::String(s.clone())
            }
        }
        Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
            serde_json::Value::Array(items.iter().map(|v| resolve_value_json(v, ctx)).collect())
        }
        Value::Map(entries) | Value::Object(entries) => {
            let map: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), resolve_value_json(v, ctx)))
                .collect();
            serde_json::Value::Object(map)
        }
        Value::Capsule(_, _) => val.to_json(),
    }
}

/// Resolve `${...}` interpolations in a string value.
/// Handles both variable refs (${var.xxx}) and resource refs (${aws_s3_bucket.xxx.id}).
fn resolve_interpolated_string(
    s: &str,
    ctx: &EvalContext,
) -> serde_json::Value {
    // If the string is a single interpolation like "${aws_s3_bucket.xxx.id}",
    // return the raw value (could be non-string)
    if s.starts_with("${") && s.ends_with('}') && s.matches("${").count() == 1 {
        let ref_str = &s[2..s.len() - 1];
        let ref_parts: Vec<String> = ref_str.split('.').map(|p| p.trim().to_string()).collect();
        let resolved = resolve_reference(&ref_parts, ctx);
        if !resolved.is_null() {
            return resolved;
        }
    }

    let mut result = String::new();
    let mut remaining = s;

    while let Some(start) = remaining.find("${") {
        result.push_str(&remaining[..start]);

        if let Some(end) = remaining[start + 2..].find('}') {
            let ref_str = &remaining[start + 2..start + 2 + end];
            let ref_parts: Vec<String> = ref_str.split('.').map(|p| p.trim().to_string()).collect();
            let resolved = resolve_reference(&ref_parts, ctx);
            match resolved {
                serde_json::Value::String(s) => result.push_str(&s),
                serde_json::Value::Number(n) => result.push_str(&n.to_string()),
                serde_json::Value::Bool(b) => result.push_str(&b.to_string()),
                serde_json::Value::Null => {} // unresolved ref — skip
                _ => result.push_str(&resolved.to_string()),
            }
            remaining = &remaining[start + 2 + end + 1..];
        } else {
            result.push_str(remaining);
            remaining = "";
        }
    }
    result.push_str(remaining);

    serde_json::Value::String(result)
}

/// Build a map of variable name -> default JSON value from workspace variables.
pub fn build_variable_defaults(workspace: &WorkspaceConfig) -> HashMap<String, serde_json::Value> {
    let empty_ctx = EvalContext::plan_only(HashMap::new());
    let mut defaults = HashMap::new();
    for var in &workspace.variables {
        if let Some(ref default) = var.default {
            defaults.insert(var.name.clone(), eval_expression(default, &empty_ctx));
        }
    }
    defaults
}

/// Resolve attribute expressions to JSON, substituting variable references.
fn resolve_attributes(
    attrs: &HashMap<String, crate::config::types::Expression>,
    var_defaults: &HashMap<String, serde_json::Value>,
) -> serde_json::Value {
    let ctx = EvalContext::plan_only(var_defaults.clone());
    attributes_to_json(attrs, &ctx)
}

/// Build the full provider config object with all schema attributes.
/// cty msgpack requires ALL attributes to be present (null for unset ones).
fn build_full_provider_config(
    user_config: &serde_json::Value,
    schema: &serde_json::Value,
) -> serde_json::Value {
    let mut full = serde_json::Map::new();

    if let Some(provider_schema) = schema.get("provider") {
        if let Some(block) = provider_schema.get("block") {
            if let Some(attrs) = block.get("attributes").and_then(|a| a.as_array()) {
                for attr in attrs {
                    if let Some(name) = attr.get("name").and_then(|n| n.as_str()) {
                        let value = user_config
                            .get(name)
                            .cloned()
                            .unwrap_or(serde_json::Value::Null);
                        full.insert(name.to_string(), value);
                    }
                }
            }
            if let Some(block_types) = block.get("block_types").and_then(|b| b.as_array()) {
                for bt in block_types {
                    if let Some(name) = bt.get("type_name").and_then(|n| n.as_str()) {
                        if !full.contains_key(name) {
                            full.insert(name.to_string(), serde_json::json!([]));
                        }
                    }
                }
            }
        }
    }

    if full.is_empty() {
        return user_config.clone();
    }

    serde_json::Value::Object(full)
}

/// Build a full resource config with all schema attributes.
/// Similar to `build_full_provider_config`, but for resource types.
/// cty msgpack requires ALL attributes to be present (null for unset/computed).
fn build_full_resource_config(
    user_config: &serde_json::Value,
    schema: &serde_json::Value,
) -> serde_json::Value {
    let mut full = serde_json::Map::new();

    if let Some(block) = schema.get("block") {
        populate_block_attributes(&mut full, block, user_config);
    }

    if full.is_empty() {
        return user_config.clone();
    }

    serde_json::Value::Object(full)
}

/// Recursively populate all attributes from a schema block.
fn populate_block_attributes(
    full: &mut serde_json::Map<String, serde_json::Value>,
    block: &serde_json::Value,
    user_config: &serde_json::Value,
) {
    // Add all attributes from schema, handling cty type coercion
    if let Some(attrs) = block.get("attributes").and_then(|a| a.as_array()) {
        for attr in attrs {
            if let Some(name) = attr.get("name").and_then(|n| n.as_str()) {
                let mut value = user_config
                    .get(name)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);

                // If the cty type is list/set of objects and user provided a single object, wrap it
                if let Some(cty_type) = attr.get("type") {
                    value = coerce_value_to_cty_type(value, cty_type);
                }

                full.insert(name.to_string(), value);
            }
        }
    }

    // Add nested block types with correct defaults based on nesting mode
    // (from tfplugin5.proto): INVALID=0, SINGLE=1, LIST=2, SET=3, MAP=4, GROUP=5
    if let Some(block_types) = block.get("block_types").and_then(|b| b.as_array()) {
        for bt in block_types {
            if let Some(name) = bt.get("type_name").and_then(|n| n.as_str()) {
                let nesting = bt.get("nesting").and_then(|n| n.as_i64()).unwrap_or(2);
                let is_list_or_set = matches!(nesting, 2 | 3); // LIST=2, SET=3
                let nested_block_schema = bt.get("block");

                // Get user value from either full (if it was inserted as an attribute) or user_config
                let user_val = full.remove(name).or_else(|| user_config.get(name).cloned());

                if let Some(user_val) = user_val {
                    let val = match (is_list_or_set, &user_val) {
                        // LIST/SET: single object → wrap in array, populate sub-attrs
                        (true, serde_json::Value::Object(_)) => {
                            let populated = populate_nested_object(&user_val, nested_block_schema);
                            serde_json::Value::Array(vec![populated])
                        }
                        // LIST/SET: already an array → populate each element
                        (true, serde_json::Value::Array(arr)) => {
                            let populated: Vec<serde_json::Value> = arr.iter()
                                .map(|item| populate_nested_object(item, nested_block_schema))
                                .collect();
                            serde_json::Value::Array(populated)
                        }
                        // SINGLE/GROUP: object → populate sub-attrs
                        (false, serde_json::Value::Object(_)) => {
                            populate_nested_object(&user_val, nested_block_schema)
                        }
                        _ => user_val,
                    };
                    full.insert(name.to_string(), val);
                    continue;
                }

                let default_val = match nesting {
                    1 => serde_json::Value::Null,       // SINGLE → null
                    4 => serde_json::json!({}),          // MAP → empty map
                    5 => serde_json::Value::Null,        // GROUP → null
                    _ => serde_json::json!([]),           // LIST(2)/SET(3) → empty array
                };
                full.insert(name.to_string(), default_val);
            }
        }
    }
}

/// Recursively populate a nested block object with all schema-defined attributes.
fn populate_nested_object(
    user_obj: &serde_json::Value,
    block_schema: Option<&serde_json::Value>,
) -> serde_json::Value {
    let Some(schema) = block_schema else {
        return user_obj.clone();
    };
    if !user_obj.is_object() {
        return user_obj.clone();
    }
    let mut nested = serde_json::Map::new();
    populate_block_attributes(&mut nested, schema, user_obj);
    if nested.is_empty() {
        return user_obj.clone();
    }
    serde_json::Value::Object(nested)
}

/// Coerce a JSON value to match the expected cty type.
/// cty types are JSON-encoded, e.g.:
///   "string", "number", "bool"
///   ["list", "string"]
///   ["set", ["object", {"attr1": "string", "attr2": "number"}]]
///   ["object", {"attr1": "string"}]
///   ["map", "string"]
pub fn coerce_value_to_cty_type(value: serde_json::Value, cty_type: &serde_json::Value) -> serde_json::Value {
    if value.is_null() {
        return value;
    }

    match cty_type {
        serde_json::Value::String(type_name) => match type_name.as_str() {
            "string" => coerce_to_string(value),
            "number" => coerce_to_number(value),
            "bool" => coerce_to_bool(value),
            _ => value,
        },
        serde_json::Value::Array(arr) if arr.len() == 2 => {
            let type_name = arr[0].as_str().unwrap_or("");
            let elem_type = &arr[1];
            match type_name {
                "list" | "set" => match value {
                    // Single object → coerce and wrap in a one-element array
                    serde_json::Value::Object(obj) => serde_json::Value::Array(vec![
                        coerce_value_to_cty_type(serde_json::Value::Object(obj), elem_type),
                    ]),
                    // Already an array → coerce each element
                    serde_json::Value::Array(items) => {
                        let coerced: Vec<serde_json::Value> = items
                            .into_iter()
                            .map(|item| coerce_value_to_cty_type(item, elem_type))
                            .collect();
                        serde_json::Value::Array(coerced)
                    }
                    // A bare scalar standing in for a single element
                    other => coerce_value_to_cty_type(other, elem_type),
                },
                "map" => match value {
                    serde_json::Value::Object(obj) => {
                        let coerced = obj
                            .into_iter()
                            .map(|(k, v)| (k, coerce_value_to_cty_type(v, elem_type)))
                            .collect();
                        serde_json::Value::Object(coerced)
                    }
                    other => other,
                },
                "object" => populate_object_from_cty(value, cty_type),
                _ => value,
            }
        }
        _ => value,
    }
}

fn coerce_to_string(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(_) => value,
        serde_json::Value::Number(n) => serde_json::Value::String(n.to_string()),
        serde_json::Value::Bool(b) => serde_json::Value::String(b.to_string()),
        other => other,
    }
}

fn coerce_to_number(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Number(_) => value,
        serde_json::Value::Bool(b) => serde_json::Value::Number((b as i64).into()),
        serde_json::Value::String(ref s) => match s.parse::<serde_json::Number>() {
            Ok(n) => serde_json::Value::Number(n),
            Err(_) => value,
        },
        other => other,
    }
}

fn coerce_to_bool(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Bool(_) => value,
        serde_json::Value::Number(n) => serde_json::Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0),
        serde_json::Value::String(ref s) => match s.as_str() {
            "true" | "1" => serde_json::Value::Bool(true),
            "false" | "0" => serde_json::Value::Bool(false),
            _ => value,
        },
        other => other,
    }
}

/// Coerce and populate a JSON object against a cty object type definition.
/// cty object type is ["object", {"attr1": "string", "attr2": "number", ...}]
/// The second element is a map of attribute names to their types. Attributes
/// present in `value` are coerced to their declared type; attributes absent
/// from `value` are filled in as null.
pub fn populate_object_from_cty(value: serde_json::Value, cty_elem_type: &serde_json::Value) -> serde_json::Value {
    let serde_json::Value::Array(arr) = cty_elem_type else {
        return value;
    };
    if arr.len() != 2 || arr[0].as_str() != Some("object") {
        return value;
    }
    let Some(attr_map) = arr[1].as_object() else {
        return value;
    };
    let serde_json::Value::Object(mut obj) = value else {
        return value;
    };

    for (attr_name, attr_type) in attr_map {
        match obj.remove(attr_name) {
            Some(existing) => {
                obj.insert(attr_name.clone(), coerce_value_to_cty_type(existing, attr_type));
            }
            None => {
                obj.insert(attr_name.clone(), serde_json::Value::Null);
            }
        }
    }

    serde_json::Value::Object(obj)
}

/// Determine what action to take based on prior and planned state.
fn determine_action(
    prior: Option<&serde_json::Value>,
    planned: Option<&serde_json::Value>,
    requires_replace: &[String],
    create_before_destroy: bool,
) -> ResourceAction {
    match (prior, planned) {
        (None, Some(_)) => ResourceAction::Create,
        (Some(_), None) => ResourceAction::Delete,
        (Some(prior), Some(planned)) => {
            if prior == planned {
                ResourceAction::NoOp
            } else if !requires_replace.is_empty() {
                if create_before_destroy {
                    ResourceAction::CreateThenDelete
                } else {
                    ResourceAction::DeleteThenCreate
                }
            } else {
                ResourceAction::Update
            }
        }
        (None, None) => ResourceAction::NoOp,
    }
}

/// Look up an `import` block whose `to` address matches this resource.
fn find_import_for<'a>(
    workspace: &'a WorkspaceConfig,
    address: &str,
    resource_type: &str,
    name: &str,
) -> Option<&'a crate::config::types::ImportSpec> {
    find_import_for_specs(&workspace.imports, address, resource_type, name)
}

/// Same lookup as [`find_import_for`] but over a bare slice of import specs,
/// for use inside node-executor closures that only hold an owned copy of
/// the workspace's import blocks rather than a borrow of the workspace.
fn find_import_for_specs<'a>(
    imports: &'a [crate::config::types::ImportSpec],
    address: &str,
    resource_type: &str,
    name: &str,
) -> Option<&'a crate::config::types::ImportSpec> {
    imports.iter().find(|i| {
        i.to == address || i.to == format!("{}.{}", resource_type, name)
    })
}
