use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::FailureLedger;
use crate::models::{ClusterAssignment, ClusterIssueMapping, EmbeddingRecord};

pub const EMBEDDINGS_FILE: &str = "embeddings.json";
pub const ASSIGNMENTS_FILE: &str = "cluster_assignments.json";
pub const MAPPING_FILE: &str = "cluster_issue_mapping.json";
pub const FAILURES_FILE: &str = "failures.json";
pub const SUMMARY_FILE: &str = "run_summary.json";

/// Intermediate files written between stages of a run
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    dir: PathBuf,
}

impl RunArtifacts {
    /// Use `dir` for artifacts, creating it if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create artifact directory: {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Embedding records from an earlier run, empty when none were written
    pub fn load_embeddings(&self) -> Result<Vec<EmbeddingRecord>> {
        Ok(read_json(&self.path(EMBEDDINGS_FILE))?.unwrap_or_default())
    }

    pub fn save_embeddings(&self, records: &[EmbeddingRecord]) -> Result<()> {
        write_json(&self.path(EMBEDDINGS_FILE), &records)
    }

    pub fn load_assignments(&self) -> Result<Option<Vec<ClusterAssignment>>> {
        read_json(&self.path(ASSIGNMENTS_FILE))
    }

    pub fn save_assignments(&self, assignments: &[ClusterAssignment]) -> Result<()> {
        write_json(&self.path(ASSIGNMENTS_FILE), &assignments)
    }

    pub fn load_mapping(&self) -> Result<Option<ClusterIssueMapping>> {
        read_json(&self.path(MAPPING_FILE))
    }

    pub fn save_mapping(&self, mapping: &ClusterIssueMapping) -> Result<()> {
        write_json(&self.path(MAPPING_FILE), mapping)
    }

    pub fn save_failures(&self, ledger: &FailureLedger) -> Result<()> {
        write_json(&self.path(FAILURES_FILE), ledger)
    }

    pub fn save_summary<T: Serialize>(&self, summary: &T) -> Result<()> {
        write_json(&self.path(SUMMARY_FILE), summary)
    }
}

/// Read a JSON file, returning `None` when it does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read file: {:?}", path)),
    };
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse JSON: {:?}", path))?;
    Ok(Some(value))
}

/// Write pretty JSON through a temporary file so readers never see a partial file
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = std::fs::File::create(&tmp)
        .with_context(|| format!("Failed to create file: {:?}", tmp))?;
    serde_json::to_writer_pretty(file, value).context("Failed to write JSON")?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace file: {:?}", path))?;
    Ok(())
}
