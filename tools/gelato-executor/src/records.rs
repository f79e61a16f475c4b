use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy_primitives::U256;
use anyhow::{Context, Result};
use gelato_exec_engine::{CycleState, ExecSuccess};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// One line of the execution log kept next to the executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub receipt_id: U256,
    pub recorded_at: String,
    pub outcome: RecordOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RecordOutcome {
    Executed {
        success: ExecSuccess,
        state: CycleState,
        remaining_tasks: usize,
    },
    Failed {
        error: String,
    },
}

impl ExecutionRecord {
    pub fn now(receipt_id: U256, outcome: RecordOutcome) -> Self {
        let recorded_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            receipt_id,
            recorded_at,
            outcome,
        }
    }
}

/// Appends `record` under `executions` in the JSON file at `path`, creating it if needed.
pub fn append_record(path: &Path, network: &str, record: &ExecutionRecord) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?
    } else {
        String::new()
    };

    let mut root: Value = if existing.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&existing)
            .with_context(|| format!("failed parsing JSON in {}", path.display()))?
    };
    if !root.is_object() {
        root = json!({});
    }

    root["network"] = json!(network);
    root["updated_at"] = json!(record.recorded_at);
    if root.get("executions").and_then(Value::as_array).is_none() {
        root["executions"] = json!([]);
    }
    let entry = serde_json::to_value(record).context("failed serialising execution record")?;
    if let Some(executions) = root["executions"].as_array_mut() {
        executions.push(entry);
    }

    write_json_atomic(path, &root)
}

/// Reads back every record in the log.
pub fn read_records(path: &Path) -> Result<Vec<ExecutionRecord>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    let root: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing JSON in {}", path.display()))?;
    let executions = root.get("executions").cloned().unwrap_or_else(|| json!([]));
    serde_json::from_value(executions).context("malformed executions list")
}

fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.exists() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }

    let serialised =
        serde_json::to_string_pretty(value).context("failed serialising execution log")?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, serialised.as_bytes())
        .with_context(|| format!("failed writing temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
