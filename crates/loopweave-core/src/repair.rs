use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    BATCH_SIZE_KEY, CheckConfig, DONE_OUTPUT, Graph, GraphError, LOOP_OUTPUT, LoopReport,
    LoopRule, ReportStatus, Violation, check_loop,
};

const MAX_REPAIR_PASSES: usize = 2;

/// Node names the repairer wires in when a loop edge is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairPlan {
    /// Target of the loop branch (first node of the loop body).
    pub first_step: Option<String>,
    /// Last node of the loop body; its output 0 feeds the loop-controller.
    pub last_step: Option<String>,
    /// Target of the done branch. Falls back to the checker's expected
    /// completion node.
    pub completion_step: Option<String>,
}

impl RepairPlan {
    fn named_steps(&self) -> impl Iterator<Item = &str> {
        [&self.first_step, &self.last_step, &self.completion_step]
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

/// One applied mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Connected {
        from: String,
        output: usize,
        to: String,
        input: usize,
    },
    ParameterSet {
        node: String,
        key: String,
        previous: Option<Value>,
        value: Value,
    },
    Enabled {
        node: String,
    },
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Connected {
                from,
                output,
                to,
                input,
            } => write!(f, "Connected {} (output {}) to {} (input {})", from, output, to, input),
            Change::ParameterSet {
                node,
                key,
                previous: Some(previous),
                value,
            } => write!(f, "Changed {}.{} from {} to {}", node, key, previous, value),
            Change::ParameterSet {
                node,
                key,
                previous: None,
                value,
            } => write!(f, "Set {}.{} to {}", node, key, value),
            Change::Enabled { node } => write!(f, "Enabled {}", node),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub changes: Vec<Change>,
    /// Violations the repair could not clear: a plan step was missing, or
    /// the re-check still reports them.
    pub unresolved: Vec<Violation>,
}

impl RepairOutcome {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Clear the violations in `report` by adding edges and patching node
/// configuration.
///
/// Existing edges are never removed, so extra fan-out the user wired stays
/// in place. Every plan step must name an existing node; this is checked
/// before anything is mutated.
pub fn repair_loop(
    graph: &mut Graph,
    report: &LoopReport,
    config: &CheckConfig,
    plan: &RepairPlan,
) -> Result<RepairOutcome, GraphError> {
    let loop_name = report.loop_node.as_str();
    if report.status == ReportStatus::NotEvaluated || !graph.contains(loop_name) {
        return Err(GraphError::UnknownNode(loop_name.to_string()));
    }
    let completion = plan
        .completion_step
        .as_ref()
        .or(config.expected_completion.as_ref());
    if let Some(missing) = plan
        .named_steps()
        .chain(completion.map(String::as_str))
        .find(|name| !graph.contains(name))
    {
        return Err(GraphError::UnknownNode(missing.to_string()));
    }

    let mut outcome = RepairOutcome::default();

    for violation in &report.violations {
        match violation.rule {
            LoopRule::NodeNotFound => {}
            LoopRule::LoopDisabled => {
                if graph.set_disabled(loop_name, false)? {
                    outcome.changes.push(Change::Enabled {
                        node: loop_name.to_string(),
                    });
                }
            }
            LoopRule::BatchSize => {
                let value = Value::from(config.expected_batch_size);
                set_parameter(graph, &mut outcome, loop_name, BATCH_SIZE_KEY, value)?;
            }
            LoopRule::LoopBranchEmpty => match &plan.first_step {
                Some(first) => connect(graph, &mut outcome, loop_name, LOOP_OUTPUT, first)?,
                None => outcome.unresolved.push(violation.clone()),
            },
            LoopRule::DoneBranch => match completion {
                Some(done) => connect(graph, &mut outcome, loop_name, DONE_OUTPUT, done)?,
                None => outcome.unresolved.push(violation.clone()),
            },
            LoopRule::MissingLoopBack => match &plan.last_step {
                Some(last) => connect(graph, &mut outcome, last, LOOP_OUTPUT, loop_name)?,
                None => outcome.unresolved.push(violation.clone()),
            },
            LoopRule::SuccessorExecution => {
                let Some(successor) = graph
                    .slot(loop_name, LOOP_OUTPUT)
                    .first()
                    .map(|t| t.node.clone())
                else {
                    continue;
                };
                if graph.set_disabled(&successor, false)? {
                    outcome.changes.push(Change::Enabled {
                        node: successor.clone(),
                    });
                }
                let needs_mode = graph
                    .node(&successor)
                    .is_some_and(|n| config.supports_both_modes(n) && !config.runs_per_item(n));
                if needs_mode {
                    let value = Value::String(config.per_item_mode.clone());
                    set_parameter(graph, &mut outcome, &successor, &config.mode_key, value)?;
                }
            }
        }
    }

    info!(
        "Repaired loop '{}': {} change(s), {} unresolved",
        loop_name,
        outcome.changes.len(),
        outcome.unresolved.len()
    );
    Ok(outcome)
}

/// Result of repeated check/repair passes over one loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairSession {
    pub before: LoopReport,
    pub outcome: RepairOutcome,
    pub after: LoopReport,
}

/// Check, repair, and re-check until the report stops changing.
///
/// A second pass picks up findings that only become visible after the first
/// one wired in a loop body (for example a disabled first step).
pub fn repair_until_clean(
    graph: &mut Graph,
    config: &CheckConfig,
    plan: &RepairPlan,
) -> Result<RepairSession, GraphError> {
    let before = check_loop(graph, config);
    let mut report = before.clone();
    let mut outcome = RepairOutcome::default();

    for pass in 0..MAX_REPAIR_PASSES {
        if report.is_clean() {
            break;
        }
        let step = repair_loop(graph, &report, config, plan)?;
        debug!("Repair pass {}: {} change(s)", pass, step.changes.len());
        let progressed = !step.is_noop();
        outcome.changes.extend(step.changes);
        outcome.unresolved = step.unresolved;
        report = check_loop(graph, config);
        if !progressed {
            break;
        }
    }

    for violation in &report.violations {
        if !outcome.unresolved.iter().any(|v| v.rule == violation.rule) {
            outcome.unresolved.push(violation.clone());
        }
    }

    Ok(RepairSession {
        before,
        outcome,
        after: report,
    })
}

fn connect(
    graph: &mut Graph,
    outcome: &mut RepairOutcome,
    from: &str,
    output: usize,
    to: &str,
) -> Result<(), GraphError> {
    if graph.connect(from, output, to, 0)? {
        outcome.changes.push(Change::Connected {
            from: from.to_string(),
            output,
            to: to.to_string(),
            input: 0,
        });
    }
    Ok(())
}

fn set_parameter(
    graph: &mut Graph,
    outcome: &mut RepairOutcome,
    node: &str,
    key: &str,
    value: Value,
) -> Result<(), GraphError> {
    let previous = graph.set_parameter(node, key, value.clone())?;
    if previous.as_ref() != Some(&value) {
        outcome.changes.push(Change::ParameterSet {
            node: node.to_string(),
            key: key.to_string(),
            previous,
            value,
        });
    }
    Ok(())
}
