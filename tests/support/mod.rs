#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use taskq::board::TaskBoard;
use taskq::config::Config;
use taskq::remote::MemoryRemote;
use taskq::task::{Task, TaskId};
use taskq::OptimisticController;
use tempfile::TempDir;

pub fn task(id: u64, title: &str) -> Task {
    Task::new(TaskId(id), title)
}

/// Controller wired to an in-memory remote and board seeded with the same tasks.
pub struct Fixture {
    pub remote: Arc<MemoryRemote>,
    pub board: Arc<TaskBoard>,
    pub controller: OptimisticController<MemoryRemote, TaskBoard>,
}

impl Fixture {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self::with_config(tasks, Config::default())
    }

    pub fn with_config(tasks: impl IntoIterator<Item = Task>, config: Config) -> Self {
        let tasks: Vec<Task> = tasks.into_iter().collect();
        let remote = Arc::new(
            MemoryRemote::new()
                .with_titles(config.titles.clone())
                .with_tasks(tasks.clone()),
        );
        let board = Arc::new(TaskBoard::with_tasks(tasks));
        let controller =
            OptimisticController::new(Arc::clone(&remote), Arc::clone(&board), config);
        Self {
            remote,
            board,
            controller,
        }
    }
}

/// Temporary directory holding scenario and config files for CLI tests.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }
}
