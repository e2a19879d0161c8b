//! Per-task workspace layout and JSON-lines audit logs.

use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::JournalError;

/// Directories and file names used by one task run.
#[derive(Debug, Clone)]
pub struct TaskWorkspace {
    pub task_name: String,
    pub task_dir: PathBuf,
    pub docs_dir: PathBuf,
    pub explore_log: PathBuf,
    pub reflect_log: PathBuf,
}

impl TaskWorkspace {
    /// Create `work_dir/demos/self_explore_<timestamp>/` and `work_dir/auto_docs/`.
    pub fn create(work_dir: &Path) -> Result<Self, JournalError> {
        let task_name = Local::now()
            .format("self_explore_%Y-%m-%d_%H-%M-%S")
            .to_string();
        Self::create_named(work_dir, &task_name)
    }

    pub fn create_named(work_dir: &Path, task_name: &str) -> Result<Self, JournalError> {
        let task_dir = work_dir.join("demos").join(task_name);
        let docs_dir = work_dir.join("auto_docs");
        std::fs::create_dir_all(&task_dir)?;
        std::fs::create_dir_all(&docs_dir)?;
        Ok(Self {
            task_name: task_name.to_string(),
            explore_log: task_dir.join(format!("log_explore_{task_name}.txt")),
            reflect_log: task_dir.join(format!("log_reflect_{task_name}.txt")),
            task_dir,
            docs_dir,
        })
    }

    pub fn before_labeled(&self, round: u32) -> PathBuf {
        self.task_dir.join(before_labeled_name(round))
    }

    pub fn after_labeled(&self, round: u32) -> PathBuf {
        self.task_dir.join(after_labeled_name(round))
    }
}

pub fn before_labeled_name(round: u32) -> String {
    format!("{round}_before_labeled.png")
}

pub fn after_labeled_name(round: u32) -> String {
    format!("{round}_after_labeled.png")
}

/// One proposal exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalRecord<'a> {
    pub step: u32,
    pub prompt: &'a str,
    pub image: String,
    pub response: &'a str,
}

/// One reflection exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ReflectionRecord<'a> {
    pub step: u32,
    pub prompt: &'a str,
    pub image_before: String,
    pub image_after: String,
    pub response: &'a str,
}

/// Append one JSON object per line. Written for audit only; never read back.
pub fn append<T: Serialize>(path: &Path, record: &T) -> Result<(), JournalError> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lays_out_task_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ws = TaskWorkspace::create_named(dir.path(), "self_explore_test").unwrap();
        assert!(ws.task_dir.is_dir());
        assert!(ws.docs_dir.is_dir());
        assert_eq!(
            ws.explore_log,
            dir.path()
                .join("demos/self_explore_test/log_explore_self_explore_test.txt")
        );
        assert_eq!(
            ws.after_labeled(3),
            ws.task_dir.join("3_after_labeled.png")
        );
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        for step in 1..=2 {
            append(
                &path,
                &ProposalRecord {
                    step,
                    prompt: "******************",
                    image: before_labeled_name(step),
                    response: "{\"action\":{\"name\":\"finish\"}}",
                },
            )
            .unwrap();
        }
        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["step"], 2);
        assert_eq!(second["image"], "2_before_labeled.png");
    }
}
