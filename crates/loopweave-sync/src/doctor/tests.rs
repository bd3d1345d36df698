use super::*;
use crate::{SyncError, WorkflowSummary};
use loopweave_core::{LoopRule, WorkflowDocument};
use serde_json::{Value, json};
use std::sync::Mutex;

// ── Test helpers ────────────────────────────────────────────────

/// In-memory backend holding a single workflow and recording every update.
struct MockBackend {
    document: Mutex<WorkflowDocument>,
    updates: Mutex<Vec<(String, WorkflowDocument)>>,
    reject_updates: bool,
}

impl MockBackend {
    fn new(raw: Value) -> Self {
        Self {
            document: Mutex::new(serde_json::from_value(raw).unwrap()),
            updates: Mutex::new(Vec::new()),
            reject_updates: false,
        }
    }

    fn rejecting(raw: Value) -> Self {
        Self {
            reject_updates: true,
            ..Self::new(raw)
        }
    }

    fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    fn last_update(&self) -> WorkflowDocument {
        self.updates.lock().unwrap().last().unwrap().1.clone()
    }
}

impl WorkflowBackend for MockBackend {
    fn endpoint(&self) -> &str {
        "mock"
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, SyncError> {
        let doc = self.document.lock().unwrap();
        Ok(vec![WorkflowSummary {
            id: doc.id().unwrap_or_default().to_string(),
            name: doc.name.clone(),
            active: false,
            updated_at: None,
        }])
    }

    async fn fetch_workflow(&self, id: &str) -> Result<WorkflowDocument, SyncError> {
        let doc = self.document.lock().unwrap();
        if doc.id() != Some(id) {
            return Err(SyncError::Status {
                method: "GET",
                url: format!("mock/api/v1/workflows/{}", id),
                status: 404,
                body: r#"{"message":"Not Found"}"#.to_string(),
            });
        }
        Ok(doc.clone())
    }

    async fn update_workflow(
        &self,
        id: &str,
        document: &WorkflowDocument,
    ) -> Result<(), SyncError> {
        if self.reject_updates {
            return Err(SyncError::Status {
                method: "PUT",
                url: format!("mock/api/v1/workflows/{}", id),
                status: 400,
                body: r#"{"message":"request/body must NOT have additional properties"}"#
                    .to_string(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((id.to_string(), document.clone()));
        *self.document.lock().unwrap() = document.clone();
        Ok(())
    }
}

const WORKFLOW_ID: &str = "FimIaNZ66cEz96GM";

/// Section loop as exported from the platform, with none of its edges wired
/// and the loop left at the default batch size.
fn unwired_workflow() -> Value {
    json!({
        "id": WORKFLOW_ID,
        "name": "Content Generation",
        "active": true,
        "settings": {"executionOrder": "v1"},
        "nodes": [
            {
                "id": "a1",
                "name": "Loop Sections",
                "type": "n8n-nodes-base.splitInBatches",
                "typeVersion": 3,
                "position": [400, 300],
                "parameters": {"options": {}}
            },
            {
                "id": "a2",
                "name": "Extract Section",
                "type": "n8n-nodes-base.code",
                "typeVersion": 2,
                "position": [600, 300],
                "parameters": {"mode": "runOnceForEachItem", "jsCode": "return $input.item;"}
            },
            {
                "id": "a3",
                "name": "Merge Section Data",
                "type": "n8n-nodes-base.set",
                "typeVersion": 3,
                "position": [800, 300],
                "parameters": {}
            },
            {
                "id": "a4",
                "name": "Assemble Complete Course",
                "type": "n8n-nodes-base.code",
                "typeVersion": 2,
                "position": [600, 500],
                "parameters": {"jsCode": "return $input.all();"}
            }
        ],
        "connections": {
            "Extract Section": {
                "main": [[{"node": "Merge Section Data", "type": "main", "index": 0}]]
            },
            "Loop Sections": {"main": [null, []]}
        }
    })
}

fn plan() -> RepairPlan {
    RepairPlan {
        first_step: Some("Extract Section".to_string()),
        last_step: Some("Merge Section Data".to_string()),
        completion_step: Some("Assemble Complete Course".to_string()),
    }
}

fn config() -> CheckConfig {
    CheckConfig::new("Loop Sections")
}

// ── Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_diagnose_reports_unwired_loop() {
    let backend = MockBackend::new(unwired_workflow());
    let reports = diagnose(&backend, WORKFLOW_ID, &config()).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].rules(),
        vec![
            LoopRule::BatchSize,
            LoopRule::LoopBranchEmpty,
            LoopRule::DoneBranch,
            LoopRule::MissingLoopBack,
        ]
    );
    assert_eq!(backend.update_count(), 0);
}

#[tokio::test]
async fn test_diagnose_all_loops_when_none_named() {
    let backend = MockBackend::new(unwired_workflow());
    let reports = diagnose(&backend, WORKFLOW_ID, &CheckConfig::default())
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].loop_node, "Loop Sections");
}

#[tokio::test]
async fn test_diagnose_unknown_workflow() {
    let backend = MockBackend::new(unwired_workflow());
    let err = diagnose(&backend, "missing", &config()).await.unwrap_err();
    let sync = err.downcast_ref::<SyncError>().unwrap();
    assert_eq!(sync.status(), Some(404));
}

#[tokio::test]
async fn test_repair_writes_back_once() {
    let backend = MockBackend::new(unwired_workflow());
    let backups = tempfile::tempdir().unwrap();
    let options = RepairOptions {
        dry_run: false,
        backup_dir: Some(backups.path().to_path_buf()),
    };

    let summary = repair(&backend, WORKFLOW_ID, &config(), &plan(), &options)
        .await
        .unwrap();
    assert!(summary.written);
    assert!(summary.is_clean());
    assert_eq!(summary.session.outcome.changes.len(), 4);
    assert_eq!(backend.update_count(), 1);

    let written = Graph::from_document(backend.last_update()).unwrap();
    assert_eq!(written.slot("Loop Sections", 0)[0].node, "Extract Section");
    assert_eq!(
        written.slot("Loop Sections", 1)[0].node,
        "Assemble Complete Course"
    );
    assert_eq!(written.slot("Merge Section Data", 0)[0].node, "Loop Sections");
    // Untouched fields survive the round trip.
    let sent = backend.last_update();
    assert_eq!(sent.settings(), Some(&json!({"executionOrder": "v1"})));
    assert_eq!(sent.nodes[1].extra["position"], json!([600, 300]));

    // Backup holds the document as fetched.
    let store = BackupStore::new(backups.path(), "Content Generation");
    let saved = store.list().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(summary.backup.as_ref(), Some(&saved[0]));
    let restored = store.load(&saved[0]).unwrap();
    assert!(restored.connections["Loop Sections"].main[0].is_empty());

    // A second run finds nothing to do and does not write.
    let again = repair(&backend, WORKFLOW_ID, &config(), &plan(), &options)
        .await
        .unwrap();
    assert!(again.session.before.is_clean());
    assert!(!again.written);
    assert_eq!(backend.update_count(), 1);
}

#[tokio::test]
async fn test_dry_run_does_not_write() {
    let backend = MockBackend::new(unwired_workflow());
    let options = RepairOptions {
        dry_run: true,
        backup_dir: None,
    };
    let summary = repair(&backend, WORKFLOW_ID, &config(), &plan(), &options)
        .await
        .unwrap();
    assert!(!summary.written);
    assert!(summary.is_clean());
    assert_eq!(summary.session.outcome.changes.len(), 4);
    assert_eq!(backend.update_count(), 0);
}

#[tokio::test]
async fn test_unresolved_blocks_write_back() {
    let backend = MockBackend::new(unwired_workflow());
    let partial = RepairPlan {
        completion_step: None,
        ..plan()
    };
    let summary = repair(
        &backend,
        WORKFLOW_ID,
        &config(),
        &partial,
        &RepairOptions::default(),
    )
    .await
    .unwrap();
    assert!(!summary.written);
    assert!(summary.session.after.has_violation(LoopRule::DoneBranch));
    assert_eq!(summary.session.outcome.unresolved.len(), 1);
    assert_eq!(backend.update_count(), 0);
}

#[tokio::test]
async fn test_loop_still_open_after_repair_is_not_written() {
    let mut raw = unwired_workflow();
    // Extract Section no longer feeds Merge Section Data, so wiring the last
    // step back into the loop cannot close it.
    raw["connections"]["Extract Section"]["main"] = json!([[]]);
    let backend = MockBackend::new(raw);

    let summary = repair(
        &backend,
        WORKFLOW_ID,
        &config(),
        &plan(),
        &RepairOptions::default(),
    )
    .await
    .unwrap();
    assert!(!summary.written);
    assert!(!summary.is_clean());
    assert!(!summary.session.outcome.is_noop());
    assert_eq!(summary.session.after.rules(), vec![LoopRule::MissingLoopBack]);
    assert_eq!(summary.session.outcome.unresolved.len(), 1);
    assert_eq!(backend.update_count(), 0);
}

#[tokio::test]
async fn test_unknown_plan_step_is_an_error() {
    let backend = MockBackend::new(unwired_workflow());
    let bad = RepairPlan {
        first_step: Some("Extract Sections".to_string()),
        ..plan()
    };
    let err = repair(&backend, WORKFLOW_ID, &config(), &bad, &RepairOptions::default())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Extract Sections"));
    assert_eq!(backend.update_count(), 0);
}

#[tokio::test]
async fn test_rejected_update_surfaces_body() {
    let backend = MockBackend::rejecting(unwired_workflow());
    let err = repair(
        &backend,
        WORKFLOW_ID,
        &config(),
        &plan(),
        &RepairOptions::default(),
    )
    .await
    .unwrap_err();
    let sync = err.downcast_ref::<SyncError>().unwrap();
    assert_eq!(sync.status(), Some(400));
    assert!(format!("{err:#}").contains("additional properties"));
}

#[tokio::test]
async fn test_disabled_first_step_is_enabled() {
    let mut raw = unwired_workflow();
    raw["nodes"][1]["disabled"] = json!(true);
    let backend = MockBackend::new(raw);
    let summary = repair(
        &backend,
        WORKFLOW_ID,
        &config(),
        &plan(),
        &RepairOptions::default(),
    )
    .await
    .unwrap();
    assert!(summary.written);
    assert!(summary.is_clean());
    let sent = backend.last_update();
    assert!(!sent.nodes[1].is_disabled());
}
