use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use loopweave_core::{CheckConfig, RepairPlan};
use loopweave_sync::N8nConfig;
use serde::Deserialize;

// ── Config file ─────────────────────────────────────────────────

/// Optional TOML file. Command-line flags win over anything set here.
///
/// ```toml
/// [remote]
/// url = "http://localhost:5678"
/// api_key = "..."
///
/// [loop]
/// node = "Loop Sections"
/// first_step = "Extract Section"
/// last_step = "Merge Section Data"
/// completion_step = "Assemble Complete Course"
/// batch_size = 1
/// backup_dir = "backups"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub remote: RemoteSection,
    #[serde(rename = "loop")]
    pub loop_section: LoopSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoopSection {
    pub node: Option<String>,
    pub first_step: Option<String>,
    pub last_step: Option<String>,
    pub completion_step: Option<String>,
    /// Node the done branch must reach. Defaults to `completion_step`.
    pub expected_completion: Option<String>,
    pub batch_size: Option<u64>,
    pub backup_dir: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml_edit::de::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))
}

// ── Merging ─────────────────────────────────────────────────────

/// Connection flags as given on the command line (or via environment).
#[derive(Debug, Default, Clone)]
pub struct RemoteArgs {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Loop flags as given on the command line.
#[derive(Debug, Default, Clone)]
pub struct LoopArgs {
    pub node: Option<String>,
    pub first_step: Option<String>,
    pub last_step: Option<String>,
    pub completion_step: Option<String>,
    pub batch_size: Option<u64>,
}

impl FileConfig {
    pub fn remote(&self, args: &RemoteArgs) -> Result<N8nConfig> {
        let Some(url) = args.url.clone().or_else(|| self.remote.url.clone()) else {
            bail!("No server URL: pass --url, set N8N_URL, or add [remote] url to the config");
        };
        let Some(api_key) = args.api_key.clone().or_else(|| self.remote.api_key.clone()) else {
            bail!(
                "No API key: pass --api-key, set N8N_API_KEY, or add [remote] api_key to the config"
            );
        };
        Ok(N8nConfig::new(url, api_key))
    }

    /// Checker expectations. An empty loop node means "every loop".
    pub fn check_config(&self, args: &LoopArgs) -> CheckConfig {
        let section = &self.loop_section;
        let mut config = CheckConfig::new(
            args.node
                .clone()
                .or_else(|| section.node.clone())
                .unwrap_or_default(),
        );
        if let Some(size) = args.batch_size.or(section.batch_size) {
            config.expected_batch_size = size;
        }
        config.expected_completion = args
            .completion_step
            .clone()
            .or_else(|| section.expected_completion.clone())
            .or_else(|| section.completion_step.clone());
        config
    }

    pub fn repair_plan(&self, args: &LoopArgs) -> RepairPlan {
        let section = &self.loop_section;
        RepairPlan {
            first_step: args.first_step.clone().or_else(|| section.first_step.clone()),
            last_step: args.last_step.clone().or_else(|| section.last_step.clone()),
            completion_step: args
                .completion_step
                .clone()
                .or_else(|| section.completion_step.clone()),
        }
    }

    pub fn backup_dir(&self, flag: Option<PathBuf>) -> Option<PathBuf> {
        flag.or_else(|| self.loop_section.backup_dir.clone())
    }
}
