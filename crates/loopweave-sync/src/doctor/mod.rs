//! Fetch, check, repair, and write back one remote workflow.

#[cfg(test)]
mod tests;

use std::path::PathBuf;

use anyhow::{Context, Result};
use loopweave_core::storage::BackupStore;
use loopweave_core::{
    CheckConfig, Graph, LoopReport, RepairPlan, RepairSession, check_all_loops, check_loop,
    repair_until_clean,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::WorkflowBackend;

#[derive(Debug, Clone, Default)]
pub struct RepairOptions {
    /// Compute and report changes without writing anything.
    pub dry_run: bool,
    /// Save the fetched document here before overwriting it remotely.
    pub backup_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairSummary {
    pub workflow_id: String,
    pub workflow_name: String,
    pub session: RepairSession,
    pub backup: Option<PathBuf>,
    pub written: bool,
}

impl RepairSummary {
    pub fn is_clean(&self) -> bool {
        self.session.after.is_clean()
    }
}

/// Check `config.loop_node`, or every loop-controller when it is empty.
pub fn check_graph(graph: &Graph, config: &CheckConfig) -> Vec<LoopReport> {
    if config.loop_node.is_empty() {
        check_all_loops(graph, config)
    } else {
        vec![check_loop(graph, config)]
    }
}

pub async fn load_graph(backend: &impl WorkflowBackend, workflow_id: &str) -> Result<Graph> {
    let document = backend
        .fetch_workflow(workflow_id)
        .await
        .with_context(|| format!("Failed to fetch workflow {}", workflow_id))?;
    Graph::from_document(document)
        .with_context(|| format!("Workflow {} has an invalid connection graph", workflow_id))
}

pub async fn diagnose(
    backend: &impl WorkflowBackend,
    workflow_id: &str,
    config: &CheckConfig,
) -> Result<Vec<LoopReport>> {
    let graph = load_graph(backend, workflow_id).await?;
    let reports = check_graph(&graph, config);
    info!(
        "Diagnosed workflow '{}' from {}: {} loop(s), {} violation(s)",
        graph.name(),
        backend.endpoint(),
        reports.len(),
        reports.iter().map(|r| r.violations.len()).sum::<usize>()
    );
    Ok(reports)
}

/// Repair one loop of a remote workflow.
///
/// The workflow is written back only when the repair changed something,
/// the re-check came back clean, and `dry_run` is off. The backup, when
/// requested, holds the document exactly as fetched.
pub async fn repair(
    backend: &impl WorkflowBackend,
    workflow_id: &str,
    config: &CheckConfig,
    plan: &RepairPlan,
    options: &RepairOptions,
) -> Result<RepairSummary> {
    let original = backend
        .fetch_workflow(workflow_id)
        .await
        .with_context(|| format!("Failed to fetch workflow {}", workflow_id))?;
    let mut graph = Graph::from_document(original.clone())
        .with_context(|| format!("Workflow {} has an invalid connection graph", workflow_id))?;

    let session = repair_until_clean(&mut graph, config, plan)
        .with_context(|| format!("Failed to repair loop '{}'", config.loop_node))?;

    let mut summary = RepairSummary {
        workflow_id: workflow_id.to_string(),
        workflow_name: graph.name().to_string(),
        session,
        backup: None,
        written: false,
    };

    if summary.session.outcome.is_noop() {
        info!("Nothing to change in workflow '{}'", summary.workflow_name);
        return Ok(summary);
    }
    if !summary.session.outcome.unresolved.is_empty() {
        warn!(
            "Not writing workflow '{}': {} violation(s) remain after repair",
            summary.workflow_name,
            summary.session.outcome.unresolved.len()
        );
        return Ok(summary);
    }
    if options.dry_run {
        info!(
            "Dry run: {} change(s) not written",
            summary.session.outcome.changes.len()
        );
        return Ok(summary);
    }

    if let Some(dir) = &options.backup_dir {
        let store = BackupStore::new(dir, &summary.workflow_name);
        summary.backup = Some(store.save(&original)?);
    }

    backend
        .update_workflow(workflow_id, graph.document())
        .await
        .with_context(|| format!("Failed to update workflow {}", workflow_id))?;
    summary.written = true;
    Ok(summary)
}
