use std::fmt::Write;

use loopweave_core::{LoopReport, RepairOutcome, ReportStatus};
use loopweave_sync::WorkflowSummary;
use loopweave_sync::doctor::RepairSummary;

pub fn render_workflows(workflows: &[WorkflowSummary]) -> String {
    let mut out = String::new();
    for wf in workflows {
        let state = if wf.active { "active" } else { "inactive" };
        let _ = writeln!(out, "{:<20} {:<9} {}", wf.id, state, wf.name);
    }
    if workflows.is_empty() {
        out.push_str("No workflows\n");
    }
    out
}

pub fn render_report(report: &LoopReport) -> String {
    let mut out = String::new();
    let verdict = match report.status {
        ReportStatus::Clean => "OK",
        ReportStatus::Violations => "FAILED",
        ReportStatus::NotEvaluated => "NOT FOUND",
    };
    let _ = writeln!(out, "Loop '{}': {}", report.loop_node, verdict);

    for violation in &report.violations {
        let _ = writeln!(out, "  ✗ [{}] {}", violation.rule, violation.description);
    }
    for advisory in &report.advisories {
        let _ = writeln!(out, "  ! {}: {}", advisory.node, advisory.description);
    }
    if let Some(path) = &report.loop_path {
        let _ = writeln!(out, "  loop: {}", path.join(" → "));
    }
    out
}

pub fn render_reports(reports: &[LoopReport]) -> String {
    if reports.is_empty() {
        return "No loop nodes found\n".to_string();
    }
    reports.iter().map(render_report).collect::<Vec<_>>().join("\n")
}

pub fn render_outcome(outcome: &RepairOutcome) -> String {
    let mut out = String::new();
    if outcome.changes.is_empty() {
        out.push_str("No changes\n");
    }
    for change in &outcome.changes {
        let _ = writeln!(out, "  + {}", change);
    }
    for violation in &outcome.unresolved {
        let _ = writeln!(
            out,
            "  ? [{}] {} (unresolved)",
            violation.rule, violation.description
        );
    }
    out
}

pub fn render_summary(summary: &RepairSummary, dry_run: bool) -> String {
    let mut out = format!(
        "Workflow '{}' ({})\n\nBefore:\n{}\nChanges:\n{}\nAfter:\n{}",
        summary.workflow_name,
        summary.workflow_id,
        render_report(&summary.session.before),
        render_outcome(&summary.session.outcome),
        render_report(&summary.session.after),
    );
    if let Some(backup) = &summary.backup {
        let _ = writeln!(out, "\nBackup: {}", backup.display());
    }
    let status = if summary.written {
        "Workflow updated"
    } else if dry_run && !summary.session.outcome.is_noop() {
        "Dry run, nothing written"
    } else {
        "Workflow not updated"
    };
    let _ = writeln!(out, "\n{}", status);
    out
}
