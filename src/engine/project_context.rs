//! Shared, mutable project state threaded into every agent's prompt.
//!
//! `ProjectContext` itself is a plain struct; the narrow mutation API lives on
//! [`crate::engine::coordinator::Coordinator`] (§4.5, §9 design note) so no
//! agent is ever handed a writable reference — only a read snapshot taken
//! under the shared lock at prompt-assembly time.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Project identity and mutable phase/task/file state.
///
/// Invariant: `active_tasks ∩ completed_tasks = ∅`.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub name: String,
    pub path: PathBuf,
    pub phase: String,
    completed_tasks: HashSet<String>,
    active_tasks: HashSet<String>,
    files: HashMap<String, String>,
}

impl ProjectContext {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
            phase: "initializing".to_string(),
            completed_tasks: HashSet::new(),
            active_tasks: HashSet::new(),
            files: HashMap::new(),
        }
    }

    pub fn completed_tasks(&self) -> &HashSet<String> {
        &self.completed_tasks
    }

    pub fn active_tasks(&self) -> &HashSet<String> {
        &self.active_tasks
    }

    pub fn file_snapshot(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|s| s.as_str())
    }

    pub fn files(&self) -> &HashMap<String, String> {
        &self.files
    }

    /// Begin tracking `task_id` as active; no-op if it is already completed.
    pub(crate) fn start_task(&mut self, task_id: impl Into<String>) {
        let task_id = task_id.into();
        if !self.completed_tasks.contains(&task_id) {
            self.active_tasks.insert(task_id);
        }
    }

    /// Move `task_id` from active to completed (§9: `record_completed_task`).
    pub(crate) fn record_completed_task(&mut self, task_id: impl Into<String>) {
        let task_id = task_id.into();
        self.active_tasks.remove(&task_id);
        self.completed_tasks.insert(task_id);
    }

    /// Update the project phase (§9: `set_phase`).
    pub(crate) fn set_phase(&mut self, phase: impl Into<String>) {
        self.phase = phase.into();
    }

    /// Record the last known content snapshot for `file_path` (§9: `upsert_file`).
    pub(crate) fn upsert_file(&mut self, file_path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(file_path.into(), content.into());
    }

    /// A compact textual rendering injected into every agent's prompt
    /// (§4.3 step 1). Never mutated by the rendering itself.
    pub fn render_snapshot(&self) -> String {
        let mut out = format!(
            "Project: {} (phase: {})\nPath: {}\n",
            self.name,
            self.phase,
            self.path.display()
        );
        if !self.active_tasks.is_empty() {
            let mut tasks: Vec<_> = self.active_tasks.iter().cloned().collect();
            tasks.sort();
            out.push_str(&format!("Active tasks: {}\n", tasks.join(", ")));
        }
        if !self.completed_tasks.is_empty() {
            let mut tasks: Vec<_> = self.completed_tasks.iter().cloned().collect();
            tasks.sort();
            out.push_str(&format!("Completed tasks: {}\n", tasks.join(", ")));
        }
        if !self.files.is_empty() {
            let mut names: Vec<_> = self.files.keys().cloned().collect();
            names.sort();
            out.push_str(&format!("Known files: {}\n", names.join(", ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_and_completed_task_sets_remain_disjoint() {
        let mut ctx = ProjectContext::new("demo", PathBuf::from("/tmp/demo"));
        ctx.start_task("t1");
        assert!(ctx.active_tasks().contains("t1"));
        ctx.record_completed_task("t1");
        assert!(!ctx.active_tasks().contains("t1"));
        assert!(ctx.completed_tasks().contains("t1"));
        assert!(ctx.active_tasks().is_disjoint(ctx.completed_tasks()));
    }

    #[test]
    fn starting_an_already_completed_task_does_not_reactivate_it() {
        let mut ctx = ProjectContext::new("demo", PathBuf::from("/tmp/demo"));
        ctx.start_task("t1");
        ctx.record_completed_task("t1");
        ctx.start_task("t1");
        assert!(!ctx.active_tasks().contains("t1"));
    }

    #[test]
    fn upsert_file_overwrites_the_prior_snapshot() {
        let mut ctx = ProjectContext::new("demo", PathBuf::from("/tmp/demo"));
        ctx.upsert_file("a.txt", "v1");
        ctx.upsert_file("a.txt", "v2");
        assert_eq!(ctx.file_snapshot("a.txt"), Some("v2"));
    }

    #[test]
    fn render_snapshot_includes_phase_and_tasks() {
        let mut ctx = ProjectContext::new("demo", PathBuf::from("/tmp/demo"));
        ctx.set_phase("building");
        ctx.start_task("t1");
        let rendered = ctx.render_snapshot();
        assert!(rendered.contains("building"));
        assert!(rendered.contains("t1"));
    }
}
