#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use warden_conductor::{BroadcastBus, GitCli, MockAdapter, ProviderRouter, SessionOrchestrator};
use warden_core::{
    now_rfc3339, BusEvent, NormalizedEvent, ProcessHandle, Project, ProjectRepository, Task,
    TaskRepository, TaskStatus, WardenConfig,
};
use warden_store::MemoryStore;

pub const TASK: &str = "task_1";

pub struct Harness {
    pub dir: tempfile::TempDir,
    /// Project root; `dir` itself unless the project lives in a subdirectory.
    pub root: PathBuf,
    pub store: Arc<MemoryStore>,
    pub mock: Arc<MockAdapter>,
    pub bus: Arc<BroadcastBus>,
    pub events: tokio::sync::broadcast::Receiver<BusEvent>,
    pub orchestrator: SessionOrchestrator,
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git runs");
    assert!(
        out.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test"]);
    std::fs::write(dir.join("a.ts"), "export const a = 1;\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "init"]);
}

/// Files in the last commit, sorted.
pub fn committed_files(dir: &Path) -> Vec<String> {
    let shown = git(dir, &["show", "--name-only", "--format=", "HEAD"]);
    let mut files: Vec<String> = shown
        .lines()
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    files.sort();
    files
}

pub async fn harness(auto_commit: bool) -> Harness {
    harness_in(auto_commit, "").await
}

/// Harness whose project is `subdir` inside the repository.
pub async fn harness_in(auto_commit: bool, subdir: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let root = if subdir.is_empty() {
        dir.path().to_path_buf()
    } else {
        let root = dir.path().join(subdir);
        std::fs::create_dir_all(&root).unwrap();
        root
    };

    let store = Arc::new(MemoryStore::new());
    store
        .put_project(&Project {
            id: "prj_1".into(),
            name: "demo".into(),
            path: root.clone(),
            system_prompt: None,
            auto_commit: Some(auto_commit),
            created_at: now_rfc3339(),
        })
        .await
        .unwrap();
    store
        .put_task(&Task {
            id: TASK.into(),
            project_id: "prj_1".into(),
            title: "Add the module".into(),
            description: "Export a, b and c.".into(),
            status: TaskStatus::InProgress,
            provider: None,
            model: None,
            agent_id: None,
            context_files: vec![],
            auto_commit: None,
            permission_mode: None,
            allowed_tools: None,
            disallowed_tools: None,
            budget_usd: None,
            fallback_model: None,
            mcp_config_paths: vec![],
            created_at: now_rfc3339(),
        })
        .await
        .unwrap();

    let mock = Arc::new(MockAdapter::new("mock"));
    let router = Arc::new(ProviderRouter::new().with(mock.clone()));
    let bus = Arc::new(BroadcastBus::new());
    let events = bus.subscribe();
    let config = WardenConfig {
        default_provider: Some("mock".into()),
        default_model: Some("test-model".into()),
        ..WardenConfig::default()
    };
    let orchestrator = SessionOrchestrator::new(
        store.clone(),
        router,
        Arc::new(GitCli),
        bus.clone(),
        config,
    );
    Harness {
        dir,
        root,
        store,
        mock,
        bus,
        events,
        orchestrator,
    }
}

impl Harness {
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn wait_for(&self, mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for the session driver");
    }

    /// Play one tool call: announce it, let `apply` perform the change on
    /// disk once the pre-image is captured, then report `ok`.
    #[allow(clippy::too_many_arguments)]
    pub async fn tool(
        &self,
        handle: &ProcessHandle,
        session_id: &str,
        id: &str,
        name: &str,
        input: Value,
        apply: impl FnOnce(),
        ok: bool,
    ) {
        let pipeline = self.orchestrator.pipeline().clone();
        self.mock
            .emit(handle, NormalizedEvent::tool_use(id, name, input))
            .unwrap();
        self.wait_for(|| pipeline.has_pending_operations(session_id))
            .await;
        apply();
        self.mock
            .emit(handle, NormalizedEvent::tool_result(id, !ok, json!("done")))
            .unwrap();
        self.wait_for(|| !pipeline.has_pending_operations(session_id))
            .await;
    }

    /// Write `content` to `name` through a `Write` tool call.
    pub async fn write_file(
        &self,
        handle: &ProcessHandle,
        session_id: &str,
        id: &str,
        name: &str,
        content: &str,
    ) {
        let path = self.path(name);
        let input = json!({"file_path": path.to_string_lossy(), "content": content});
        let content = content.to_string();
        let apply = move || std::fs::write(&path, content).unwrap();
        self.tool(handle, session_id, id, "Write", input, apply, true)
            .await;
    }

    /// Replace `old` with `new` in `name` through an `Edit` tool call.
    pub async fn edit_file(
        &self,
        handle: &ProcessHandle,
        session_id: &str,
        id: &str,
        name: &str,
        old: &str,
        new: &str,
    ) {
        let path = self.path(name);
        let input = json!({
            "file_path": path.to_string_lossy(),
            "old_string": old,
            "new_string": new,
        });
        let (old, new) = (old.to_string(), new.to_string());
        let apply = move || {
            let text = std::fs::read_to_string(&path).unwrap();
            std::fs::write(&path, text.replacen(&old, &new, 1)).unwrap();
        };
        self.tool(handle, session_id, id, "Edit", input, apply, true)
            .await;
    }

    /// Drain bus events published so far.
    pub fn drain_events(&mut self) -> Vec<BusEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}
