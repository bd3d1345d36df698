use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::reachability::{reaches_back, shortest_path};
use crate::{DONE_OUTPUT, Graph, LOOP_OUTPUT, Node};

/// Parameter key holding a loop-controller's batch size.
pub const BATCH_SIZE_KEY: &str = "batchSize";

/// Structural rules a loop-controller must satisfy, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopRule {
    NodeNotFound,
    LoopDisabled,
    BatchSize,
    LoopBranchEmpty,
    DoneBranch,
    MissingLoopBack,
    SuccessorExecution,
}

impl LoopRule {
    pub const ALL: [LoopRule; 7] = [
        LoopRule::NodeNotFound,
        LoopRule::LoopDisabled,
        LoopRule::BatchSize,
        LoopRule::LoopBranchEmpty,
        LoopRule::DoneBranch,
        LoopRule::MissingLoopBack,
        LoopRule::SuccessorExecution,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            LoopRule::NodeNotFound => "node-not-found",
            LoopRule::LoopDisabled => "loop-disabled",
            LoopRule::BatchSize => "batch-size",
            LoopRule::LoopBranchEmpty => "loop-branch-empty",
            LoopRule::DoneBranch => "done-branch",
            LoopRule::MissingLoopBack => "missing-loop-back",
            LoopRule::SuccessorExecution => "successor-execution",
        }
    }

    /// Structural rules are repaired by adding edges; the rest by patching
    /// node configuration.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            LoopRule::LoopBranchEmpty | LoopRule::DoneBranch | LoopRule::MissingLoopBack
        )
    }
}

impl fmt::Display for LoopRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: LoopRule,
    pub description: String,
}

impl Violation {
    fn new(rule: LoopRule, description: impl Into<String>) -> Self {
        Self {
            rule,
            description: description.into(),
        }
    }
}

/// A finding worth surfacing that does not break iteration on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub node: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Clean,
    Violations,
    /// The loop-controller is missing, so no rule past the first ran.
    NotEvaluated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopReport {
    pub loop_node: String,
    pub status: ReportStatus,
    pub violations: Vec<Violation>,
    pub advisories: Vec<Advisory>,
    /// Loop-controller, body nodes, and the loop-controller again, when the
    /// loop closes.
    pub loop_path: Option<Vec<String>>,
}

impl LoopReport {
    pub fn is_clean(&self) -> bool {
        self.status == ReportStatus::Clean
    }

    pub fn has_violation(&self, rule: LoopRule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }

    pub fn rules(&self) -> Vec<LoopRule> {
        self.violations.iter().map(|v| v.rule).collect()
    }
}

/// Expectations for one loop-controller.
///
/// The batch size of exactly one is what per-item iteration needs on the
/// integrated platform; it is configurable because other loop shapes batch
/// deliberately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub loop_node: String,
    pub expected_batch_size: u64,
    pub expected_completion: Option<String>,
    pub mode_key: String,
    pub per_item_mode: String,
    /// Node types that can run either once per item or once per batch.
    pub dual_mode_types: Vec<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            loop_node: String::new(),
            expected_batch_size: 1,
            expected_completion: None,
            mode_key: "mode".to_string(),
            per_item_mode: "runOnceForEachItem".to_string(),
            dual_mode_types: vec!["n8n-nodes-base.code".to_string()],
        }
    }
}

impl CheckConfig {
    pub fn new(loop_node: impl Into<String>) -> Self {
        Self {
            loop_node: loop_node.into(),
            ..Default::default()
        }
    }

    /// Same expectations, applied to another loop-controller.
    pub fn for_loop(&self, loop_node: impl Into<String>) -> Self {
        Self {
            loop_node: loop_node.into(),
            ..self.clone()
        }
    }

    pub fn supports_both_modes(&self, node: &Node) -> bool {
        self.dual_mode_types.iter().any(|t| *t == node.node_type)
    }

    pub fn runs_per_item(&self, node: &Node) -> bool {
        node.parameter(&self.mode_key).and_then(Value::as_str) == Some(self.per_item_mode.as_str())
    }
}

/// Run every loop rule against `config.loop_node` and collect all findings.
pub fn check_loop(graph: &Graph, config: &CheckConfig) -> LoopReport {
    let loop_name = config.loop_node.as_str();
    let mut violations = Vec::new();
    let mut advisories = Vec::new();

    let Some(loop_node) = graph.node(loop_name) else {
        info!("Loop node '{}' not found", loop_name);
        return LoopReport {
            loop_node: loop_name.to_string(),
            status: ReportStatus::NotEvaluated,
            violations: vec![Violation::new(
                LoopRule::NodeNotFound,
                format!("Loop node '{}' not found in workflow", loop_name),
            )],
            advisories,
            loop_path: None,
        };
    };

    if loop_node.is_disabled() {
        violations.push(Violation::new(
            LoopRule::LoopDisabled,
            format!("Loop node '{}' is disabled", loop_name),
        ));
    }

    match loop_node.parameter(BATCH_SIZE_KEY) {
        None | Some(Value::Null) => violations.push(Violation::new(
            LoopRule::BatchSize,
            format!(
                "Batch size not set (must be explicitly set to {})",
                config.expected_batch_size
            ),
        )),
        Some(value) if !batch_size_matches(value, config.expected_batch_size) => {
            violations.push(Violation::new(
                LoopRule::BatchSize,
                format!(
                    "Batch size is {}, should be {}",
                    value, config.expected_batch_size
                ),
            ))
        }
        Some(_) => {}
    }

    let loop_targets = graph.slot(loop_name, LOOP_OUTPUT);
    if loop_targets.is_empty() {
        violations.push(Violation::new(
            LoopRule::LoopBranchEmpty,
            format!("No connections from loop output (output {})", LOOP_OUTPUT),
        ));
    }

    let done_targets = graph.slot(loop_name, DONE_OUTPUT);
    if done_targets.is_empty() {
        violations.push(Violation::new(
            LoopRule::DoneBranch,
            format!("No connections from done output (output {})", DONE_OUTPUT),
        ));
    } else if let Some(expected) = &config.expected_completion
        && !done_targets.iter().any(|t| t.node == *expected)
    {
        let actual: Vec<&str> = done_targets.iter().map(|t| t.node.as_str()).collect();
        violations.push(Violation::new(
            LoopRule::DoneBranch,
            format!(
                "Done output should reach '{}' but is connected to: {}",
                expected,
                actual.join(", ")
            ),
        ));
    }

    let successor = loop_targets.first().and_then(|t| graph.node(&t.node));
    let mut loop_path = None;
    match successor {
        Some(first) if reaches_back(graph, &first.name, loop_name) => {
            loop_path = shortest_path(graph, &first.name, loop_name).map(|rest| {
                std::iter::once(loop_name.to_string())
                    .chain(rest)
                    .collect::<Vec<_>>()
            });
        }
        Some(first) => violations.push(Violation::new(
            LoopRule::MissingLoopBack,
            format!(
                "No loop back connection: nothing reachable from '{}' returns to '{}'",
                first.name, loop_name
            ),
        )),
        None => violations.push(Violation::new(
            LoopRule::MissingLoopBack,
            format!("No loop back connection: '{}' has no loop body", loop_name),
        )),
    }

    // A loop branch that targets the loop node itself is covered by rule 2.
    if let Some(first) = successor.filter(|n| n.name != loop_name) {
        let mut problems = Vec::new();
        if first.is_disabled() {
            problems.push("is disabled".to_string());
        }
        if config.supports_both_modes(first) && !config.runs_per_item(first) {
            let mode = first
                .parameter(&config.mode_key)
                .and_then(Value::as_str)
                .unwrap_or("not set");
            problems.push(format!(
                "runs in mode '{}' instead of '{}'",
                mode, config.per_item_mode
            ));
        }
        if !problems.is_empty() {
            violations.push(Violation::new(
                LoopRule::SuccessorExecution,
                format!("First node in loop '{}' {}", first.name, problems.join(" and ")),
            ));
        }

        if first.flag("continueOnFail") {
            advisories.push(Advisory {
                node: first.name.clone(),
                description: "Continue on Fail is enabled".to_string(),
            });
        }
        if first.flag("alwaysOutputData") {
            advisories.push(Advisory {
                node: first.name.clone(),
                description: "Always Output Data is enabled".to_string(),
            });
        }
    }

    if loop_node.flag("reset") {
        advisories.push(Advisory {
            node: loop_name.to_string(),
            description: "Reset option is ON; the loop restarts on every input".to_string(),
        });
    }
    if loop_node.flag("alwaysOutputData") {
        advisories.push(Advisory {
            node: loop_name.to_string(),
            description: "\"Always Output Data\" is enabled (should be OFF)".to_string(),
        });
    }
    for (output, targets) in [(LOOP_OUTPUT, loop_targets), (DONE_OUTPUT, done_targets)] {
        for target in targets {
            if graph.node(&target.node).is_some_and(Node::is_disabled) {
                advisories.push(Advisory {
                    node: target.node.clone(),
                    description: format!("Target of output {} is disabled", output),
                });
            }
        }
    }

    let status = if violations.is_empty() {
        ReportStatus::Clean
    } else {
        ReportStatus::Violations
    };
    debug!(
        "Checked loop '{}': {} violation(s), {} advisory(ies)",
        loop_name,
        violations.len(),
        advisories.len()
    );

    LoopReport {
        loop_node: loop_name.to_string(),
        status,
        violations,
        advisories,
        loop_path,
    }
}

/// Check every loop-controller in the graph with the same expectations.
pub fn check_all_loops(graph: &Graph, template: &CheckConfig) -> Vec<LoopReport> {
    graph
        .loop_controllers()
        .into_iter()
        .map(|name| check_loop(graph, &template.for_loop(name)))
        .collect()
}

fn batch_size_matches(value: &Value, expected: u64) -> bool {
    match value {
        Value::Number(n) => {
            n.as_u64() == Some(expected) || n.as_f64() == Some(expected as f64)
        }
        _ => false,
    }
}
