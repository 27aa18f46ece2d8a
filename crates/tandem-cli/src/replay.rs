//! Batch replay of recorded requests from a JSON-lines file.
//!
//! Each line is `{"op": "register" | "decide" | "record", "body": {...}}`.
//! Progress is kept as a line offset in a state file so an interrupted run
//! resumes where it stopped. Rejected requests (4xx) are counted and skipped;
//! an unreadable line or a server fault stops the run at that line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tandem_service::{Api, Operation};
use time::OffsetDateTime;

#[derive(Debug, Deserialize)]
struct ReplayEntry {
    op: Operation,
    body: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReplayState {
    pub line_offset: u64,
    /// File the offset refers to.
    pub source: PathBuf,
    #[serde(with = "time::serde::iso8601::option")]
    pub last_ok: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

impl ReplayState {
    pub fn load(path: &Path, expected_source: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)?;
        let state: ReplayState = serde_json::from_reader(file)?;

        if state.source != expected_source {
            anyhow::bail!(
                "State file belongs to {}, not {}",
                state.source.display(),
                expected_source.display()
            );
        }
        Ok(Some(state))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub start_offset: u64,
    pub line_offset: u64,
    pub succeeded: u64,
    pub rejected: u64,
    pub blank: u64,
}

fn record_state_error(state_file: &Path, source: &Path, offset: u64, err_msg: &str) -> Result<()> {
    let old_last_ok = match ReplayState::load(state_file, source) {
        Ok(Some(s)) => s.last_ok,
        _ => None,
    };
    let state = ReplayState {
        line_offset: offset,
        source: source.to_path_buf(),
        last_ok: old_last_ok,
        last_error: Some(err_msg.to_string()),
    };
    if let Err(e) = state.save(state_file) {
        tracing::error!(
            state_file = %state_file.display(),
            "failed to save replay error state: {e}; original error: {err_msg}"
        );
        return Err(e);
    }
    Ok(())
}

/// Replays `path` from `offset`. On failure the state file records the
/// offending line, so the next run starts there again.
pub fn run(api: &Api, path: &Path, offset: u64, state_file: &Path) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary {
        start_offset: offset,
        line_offset: offset,
        ..ReplaySummary::default()
    };

    match replay_lines(api, path, &mut summary) {
        Ok(()) => {
            ReplayState {
                line_offset: summary.line_offset,
                source: path.to_path_buf(),
                last_ok: Some(OffsetDateTime::now_utc()),
                last_error: None,
            }
            .save(state_file)
            .context("Failed to save replay state")?;
            Ok(summary)
        }
        Err(e) => {
            let err_msg = format!("{e:#}");
            if let Err(save_err) =
                record_state_error(state_file, path, summary.line_offset, &err_msg)
            {
                tracing::error!("failed to record replay error: {save_err}");
            }
            Err(e.context(format!("Replay stopped at line {}", summary.line_offset)))
        }
    }
}

fn replay_lines(api: &Api, path: &Path, summary: &mut ReplaySummary) -> Result<()> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        if (idx as u64) < summary.start_offset {
            continue;
        }
        let line = line?;
        if line.trim().is_empty() {
            summary.blank += 1;
            summary.line_offset = next_offset(summary.line_offset)?;
            continue;
        }

        let entry: ReplayEntry = serde_json::from_str(&line)
            .with_context(|| format!("Invalid replay entry on line {idx}"))?;
        let response = api.handle(entry.op, &entry.body);
        if response.status >= 500 {
            anyhow::bail!(
                "{} on line {idx} failed with status {}",
                entry.op.as_str(),
                response.status
            );
        }
        if response.is_success() {
            summary.succeeded += 1;
        } else {
            summary.rejected += 1;
            tracing::info!(
                line = idx,
                op = entry.op.as_str(),
                status = response.status,
                message = %response.body["message"],
                "replayed request rejected"
            );
        }
        summary.line_offset = next_offset(summary.line_offset)?;
    }
    Ok(())
}

fn next_offset(offset: u64) -> Result<u64> {
    offset.checked_add(1).context("Line offset overflow")
}
