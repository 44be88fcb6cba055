//! Historical snapshot sources used for one-shot hydration

use super::error::HydrateError;
use super::types::RawSnapshotRow;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Fetches the initial set of historical rows for an engine
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawSnapshotRow>, HydrateError>;

    /// Human-readable origin, used in logs
    fn describe(&self) -> String {
        "snapshot".to_string()
    }
}

/// Reads a JSON file holding either an array of rows or `{"rows": [...]}`
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSource for FileSnapshotSource {
    async fn fetch(&self) -> Result<Vec<RawSnapshotRow>, HydrateError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        parse_snapshot(&contents)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Rows already held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshotSource {
    rows: Vec<RawSnapshotRow>,
}

impl StaticSnapshotSource {
    pub fn new(rows: Vec<RawSnapshotRow>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl SnapshotSource for StaticSnapshotSource {
    async fn fetch(&self) -> Result<Vec<RawSnapshotRow>, HydrateError> {
        Ok(self.rows.clone())
    }

    fn describe(&self) -> String {
        format!("{} in-memory rows", self.rows.len())
    }
}

/// Accepts a bare array or an object with a `rows` array
pub fn parse_snapshot(contents: &str) -> Result<Vec<RawSnapshotRow>, HydrateError> {
    match serde_json::from_str::<Value>(contents)? {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut envelope) => match envelope.remove("rows") {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err(HydrateError::Fetch(
                "snapshot object has no \"rows\" array".to_string(),
            )),
        },
        other => Err(HydrateError::Fetch(format!(
            "expected a JSON array of rows, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
