use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::WorkflowDocument;

/// Directory name for a workflow: lowercase ASCII words joined by `-`.
///
/// Any run of characters outside `[A-Za-z0-9]` becomes a single separator,
/// so names that differ only in punctuation share a backup directory.
pub fn sanitize_name(name: &str) -> String {
    let words: Vec<String> = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    if words.is_empty() {
        return "unnamed".to_string();
    }
    words.join("-")
}

/// `YYYY-MM-DD_HH-MM-SS_<8 hex>.json`; names sort in the order they were taken.
fn backup_filename(taken_at: DateTime<Utc>, backup_id: Uuid) -> String {
    let id = backup_id.simple().to_string();
    format!("{}_{}.json", taken_at.format("%Y-%m-%d_%H-%M-%S"), &id[..8])
}

/// Snapshots of a workflow taken before it is overwritten remotely.
///
/// Directory layout:
/// ```text
/// <backup_dir>/
///   <sanitized_workflow_name>/
///     <YYYY-MM-DD_HH-MM-SS_shortid>.json   ← one per write-back
/// ```
pub struct BackupStore {
    base_path: PathBuf,
}

impl BackupStore {
    pub fn new(backup_dir: &Path, workflow_name: &str) -> Self {
        Self {
            base_path: backup_dir.join(sanitize_name(workflow_name)),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write the full document as pretty JSON and return its path.
    pub fn save(&self, document: &WorkflowDocument) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.base_path).context("Failed to create backup directory")?;
        let path = self
            .base_path
            .join(backup_filename(Utc::now(), Uuid::new_v4()));
        let json = serde_json::to_string_pretty(document).context("Failed to serialize workflow")?;
        std::fs::write(&path, json).context("Failed to write backup")?;
        info!("Backed up workflow '{}' to {}", document.name, path.display());
        Ok(path)
    }

    /// Existing backups, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&self.base_path).context("Failed to read backup directory")?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                backups.push(path);
            }
        }
        backups.sort();
        Ok(backups)
    }

    pub fn load(&self, path: &Path) -> Result<WorkflowDocument> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read backup {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse backup {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Node;
    use serde_json::json;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Content Generation"), "content-generation");
        assert_eq!(sanitize_name("Loop #5"), "loop-5");
        assert_eq!(sanitize_name("  Course---Builder  "), "course-builder");
        assert_eq!(sanitize_name("Résumé v2"), "r-sum-v2");
        assert_eq!(sanitize_name(""), "unnamed");
        assert_eq!(sanitize_name("---"), "unnamed");
    }

    #[test]
    fn test_backup_filename_format() {
        let id = Uuid::parse_str("0f8fad5b-d9cb-469f-a165-70867728950e").unwrap();
        let taken_at = DateTime::from_timestamp(1_709_296_245, 0).unwrap();
        assert_eq!(
            backup_filename(taken_at, id),
            "2024-03-01_12-30-45_0f8fad5b.json"
        );
    }

    #[test]
    fn test_save_list_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path(), "Content Generation");
        assert!(store.list().unwrap().is_empty());

        let mut doc = WorkflowDocument::new("Content Generation");
        doc.nodes.push(Node::loop_controller("Loop Sections"));
        doc.extra.insert("id".into(), json!("FimIaNZ66cEz96GM"));

        let first = store.save(&doc).unwrap();
        let second = store.save(&doc).unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with(dir.path().join("content-generation")));

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);

        let loaded = store.load(&first).unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(loaded.id(), Some("FimIaNZ66cEz96GM"));
    }

    #[test]
    fn test_list_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path(), "wf");
        std::fs::create_dir_all(store.base_path()).unwrap();
        std::fs::write(store.base_path().join("notes.txt"), "x").unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
