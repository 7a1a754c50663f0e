//! Pending-operation diff pipeline.
//!
//! Tool-use events for file-mutating tools are cached as pending operations,
//! together with a snapshot of every file they target. A successful tool
//! result confirms the operation and turns it into [`Diff`]s; a failed one
//! discards it. Operations that never see a result are reclaimed by age.

pub mod hunks;
pub mod shell;

pub use hunks::{apply_hunks, compute_hunks, reverse_hunks};
pub use shell::{default_matchers, ShellEffect, ShellEffectKind, ShellMatcher};

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use warden_core::{new_id, now_rfc3339, Diff, DiffKind, DiffStatus, NormalizedEvent, ToolUse};

use crate::adapter::lock;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("hunk does not apply at line {line}")]
    HunkMismatch { line: usize },
    #[error("no pre-image was captured for {0}")]
    NoPreimage(PathBuf),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Io { .. })
    }
}

/// Where a session's tool calls resolve relative paths, and which task
/// their diffs belong to.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub task_id: String,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
struct Replacement {
    old: String,
    new: String,
    all: bool,
}

#[derive(Debug, Clone)]
enum Intent {
    Replace {
        path: PathBuf,
        edits: Vec<Replacement>,
    },
    Write {
        path: PathBuf,
        content: String,
    },
    /// Content is read back from disk on confirmation. `reported` marks
    /// changes the provider announced itself, which are recorded even when
    /// no pre-image difference is visible.
    Effects {
        effects: Vec<ShellEffect>,
        reported: bool,
    },
}

impl Intent {
    fn paths(&self) -> Vec<&Path> {
        match self {
            Intent::Replace { path, .. } | Intent::Write { path, .. } => vec![path.as_path()],
            Intent::Effects { effects, .. } => effects.iter().map(|e| e.path.as_path()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub session_id: String,
    pub task_id: String,
    pub tool_invocation_id: String,
    pub tool_name: String,
    pub input: Value,
    pub created_at: String,
    stored: Instant,
    intent: Intent,
    /// File content when the operation was stored; `None` if absent.
    preimages: HashMap<PathBuf, Option<String>>,
}

fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

fn str_field<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| input.get(*k).and_then(Value::as_str))
}

fn replacement(value: &Value) -> Option<Replacement> {
    Some(Replacement {
        old: str_field(value, &["old_string", "old_str"])?.to_string(),
        new: str_field(value, &["new_string", "new_str"])
            .unwrap_or_default()
            .to_string(),
        all: value
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Shell command as a string; array-form commands are joined shell-quoted.
fn command_text(input: &Value) -> Option<String> {
    match input.get("command")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let words: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            Some(shell_words::join(words))
        }
        _ => None,
    }
}

fn read_optional(path: &Path) -> Option<String> {
    if path.is_file() {
        std::fs::read_to_string(path).ok()
    } else {
        None
    }
}

pub struct PendingOperationPipeline {
    matchers: Vec<Box<dyn ShellMatcher>>,
    sessions: Mutex<HashMap<String, OperationContext>>,
    pending: Mutex<HashMap<String, PendingOperation>>,
}

impl Default for PendingOperationPipeline {
    fn default() -> Self {
        Self::with_matchers(default_matchers())
    }
}

impl PendingOperationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matchers(matchers: Vec<Box<dyn ShellMatcher>>) -> Self {
        Self {
            matchers,
            sessions: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_session(&self, session_id: &str, context: OperationContext) {
        lock(&self.sessions).insert(session_id.to_string(), context);
    }

    /// Drop the session's context and any operations it left behind.
    pub fn release_session(&self, session_id: &str) -> usize {
        lock(&self.sessions).remove(session_id);
        self.cleanup_session(session_id)
    }

    fn intent_for(&self, tool: &ToolUse, cwd: &Path) -> Option<Intent> {
        let input = &tool.input;
        let path = || str_field(input, &["file_path", "path"]).map(|p| resolve(cwd, p));
        match tool.name.as_str() {
            "Edit" => Some(Intent::Replace {
                path: path()?,
                edits: vec![replacement(input)?],
            }),
            "MultiEdit" => Some(Intent::Replace {
                path: path()?,
                edits: input
                    .get("edits")?
                    .as_array()?
                    .iter()
                    .map(replacement)
                    .collect::<Option<Vec<_>>>()?,
            }),
            "Write" => Some(Intent::Write {
                path: path()?,
                content: str_field(input, &["content"])?.to_string(),
            }),
            "str_replace_editor" | "str_replace_based_edit_tool" => {
                match str_field(input, &["command"])? {
                    "str_replace" => Some(Intent::Replace {
                        path: path()?,
                        edits: vec![replacement(input)?],
                    }),
                    "create" => Some(Intent::Write {
                        path: path()?,
                        content: str_field(input, &["file_text"])
                            .unwrap_or_default()
                            .to_string(),
                    }),
                    "insert" => Some(Intent::Effects {
                        effects: vec![ShellEffect {
                            path: path()?,
                            kind: ShellEffectKind::Append,
                        }],
                        reported: true,
                    }),
                    _ => None,
                }
            }
            "Bash" | "shell" => {
                let command = command_text(input)?;
                let effects = shell::infer_effects(&self.matchers, &command, cwd);
                if effects.is_empty() {
                    debug!(command = %command, "shell command has no recognized file effect");
                    return None;
                }
                Some(Intent::Effects {
                    effects,
                    reported: false,
                })
            }
            "file_change" => {
                let kind = match str_field(input, &["kind"])? {
                    "add" => ShellEffectKind::Write,
                    "delete" => ShellEffectKind::Delete,
                    _ => ShellEffectKind::Append,
                };
                Some(Intent::Effects {
                    effects: vec![ShellEffect {
                        path: path()?,
                        kind,
                    }],
                    reported: true,
                })
            }
            _ => None,
        }
    }

    /// Cache a tool-use event when it targets files. Returns whether an
    /// operation was stored; other events, unknown tools, and repeated
    /// invocation ids are ignored.
    pub fn store_pending_operation(&self, session_id: &str, event: &NormalizedEvent) -> bool {
        let Some(tool) = event.as_tool_use() else {
            return false;
        };
        let Some(context) = lock(&self.sessions).get(session_id).cloned() else {
            warn!(session_id, tool = %tool.name, "tool use for unregistered session");
            return false;
        };
        if lock(&self.pending).contains_key(&tool.id) {
            return false;
        }
        let Some(intent) = self.intent_for(&tool, &context.working_dir) else {
            return false;
        };

        let preimages = intent
            .paths()
            .into_iter()
            .map(|p| (p.to_path_buf(), read_optional(p)))
            .collect();
        let op = PendingOperation {
            session_id: session_id.to_string(),
            task_id: context.task_id,
            tool_invocation_id: tool.id.clone(),
            tool_name: tool.name,
            input: tool.input,
            created_at: now_rfc3339(),
            stored: Instant::now(),
            intent,
            preimages,
        };

        let mut pending = lock(&self.pending);
        if pending.contains_key(&tool.id) {
            return false;
        }
        debug!(session_id, tool_invocation_id = %tool.id, tool = %op.tool_name, "stored pending operation");
        pending.insert(tool.id, op);
        true
    }

    /// Resolve an operation into its diffs. Each invocation id resolves at
    /// most once: later calls, and ids never stored, yield nothing. A shell
    /// command touching several files yields one diff per file.
    pub fn confirm_operation(&self, tool_invocation_id: &str) -> Vec<Diff> {
        let Some(op) = lock(&self.pending).remove(tool_invocation_id) else {
            return vec![];
        };
        let diffs = derive_diffs(&op);
        debug!(
            tool_invocation_id,
            diffs = diffs.len(),
            "confirmed pending operation"
        );
        diffs
    }

    pub fn discard_operation(&self, tool_invocation_id: &str) -> bool {
        let removed = lock(&self.pending).remove(tool_invocation_id).is_some();
        if removed {
            debug!(tool_invocation_id, "discarded pending operation");
        }
        removed
    }

    /// Remove every operation stored at least `max_age` ago.
    pub fn cleanup_orphaned(&self, max_age: Duration) -> usize {
        let removed = self.remove_where(|op| op.stored.elapsed() >= max_age);
        if removed > 0 {
            info!(removed, "swept orphaned pending operations");
        }
        removed
    }

    pub fn cleanup_session(&self, session_id: &str) -> usize {
        let removed = self.remove_where(|op| op.session_id == session_id);
        if removed > 0 {
            debug!(session_id, removed, "dropped unresolved operations at session end");
        }
        removed
    }

    pub fn has_pending_operations(&self, session_id: &str) -> bool {
        lock(&self.pending)
            .values()
            .any(|op| op.session_id == session_id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    fn remove_where(&self, pred: impl Fn(&PendingOperation) -> bool) -> usize {
        let mut pending = lock(&self.pending);
        let before = pending.len();
        pending.retain(|_, op| !pred(op));
        before - pending.len()
    }
}

fn new_diff(op: &PendingOperation, path: &Path, kind: DiffKind) -> Diff {
    Diff {
        id: new_id("dif"),
        session_id: op.session_id.clone(),
        task_id: op.task_id.clone(),
        tool_invocation_id: op.tool_invocation_id.clone(),
        file_path: path.to_path_buf(),
        kind,
        hunks: vec![],
        full_content: None,
        previous_content: None,
        moved_to: None,
        status: DiffStatus::Pending,
        approval_id: None,
        created_at: now_rfc3339(),
        applied_at: None,
    }
}

fn apply_replacements(text: &str, edits: &[Replacement]) -> Option<String> {
    let mut out = text.to_string();
    for edit in edits {
        if edit.old.is_empty() || !out.contains(&edit.old) {
            return None;
        }
        out = if edit.all {
            out.replace(&edit.old, &edit.new)
        } else {
            out.replacen(&edit.old, &edit.new, 1)
        };
    }
    Some(out)
}

fn derive_diffs(op: &PendingOperation) -> Vec<Diff> {
    let preimage = |path: &Path| op.preimages.get(path).cloned().flatten();
    match &op.intent {
        Intent::Replace { path, edits } => {
            let before = preimage(path);
            let after = match before.as_deref() {
                Some(text) => apply_replacements(text, edits),
                // An edit with an empty needle creates the file.
                None => match edits.as_slice() {
                    [only] if only.old.is_empty() => Some(only.new.clone()),
                    _ => None,
                },
            }
            // The tool may normalize whitespace; trust the file then.
            .or_else(|| read_optional(path));
            let Some(after) = after else {
                debug!(path = %path.display(), "edit target vanished");
                return vec![];
            };
            edit_or_write(op, path, before, after, false)
                .into_iter()
                .collect()
        }
        Intent::Write { path, content } => {
            let before = preimage(path);
            if before.as_deref() == Some(content.as_str()) {
                return vec![];
            }
            let mut diff = new_diff(op, path, DiffKind::Write);
            diff.full_content = Some(content.clone());
            diff.previous_content = before;
            vec![diff]
        }
        Intent::Effects { effects, reported } => effects
            .iter()
            .filter_map(|effect| effect_diff(op, effect, preimage(&effect.path), *reported))
            .collect(),
    }
}

fn edit_or_write(
    op: &PendingOperation,
    path: &Path,
    before: Option<String>,
    after: String,
    reported: bool,
) -> Option<Diff> {
    let Some(before) = before else {
        let mut diff = new_diff(op, path, DiffKind::Write);
        diff.full_content = Some(after);
        return Some(diff);
    };
    let hunks = compute_hunks(&before, &after);
    if hunks.is_empty() {
        if !reported {
            return None;
        }
        // Change reported after the fact: nothing to revert to.
        return Some(new_diff(op, path, DiffKind::Edit));
    }
    let mut diff = new_diff(op, path, DiffKind::Edit);
    diff.hunks = hunks;
    diff.previous_content = Some(before);
    Some(diff)
}

fn effect_diff(
    op: &PendingOperation,
    effect: &ShellEffect,
    before: Option<String>,
    reported: bool,
) -> Option<Diff> {
    let path = effect.path.as_path();
    match &effect.kind {
        ShellEffectKind::Write => {
            let after = read_optional(path)?;
            if before.as_deref() == Some(after.as_str()) && !reported {
                return None;
            }
            let mut diff = new_diff(op, path, DiffKind::Write);
            diff.full_content = Some(after);
            // A late snapshot of an added file is its post-image.
            diff.previous_content = before.filter(|b| Some(b) != diff.full_content.as_ref());
            Some(diff)
        }
        ShellEffectKind::Append => {
            let after = read_optional(path)?;
            edit_or_write(op, path, before, after, reported)
        }
        ShellEffectKind::Delete | ShellEffectKind::Move(_) => {
            if path.exists() || (before.is_none() && !reported) {
                return None;
            }
            let mut diff = new_diff(op, path, DiffKind::Delete);
            diff.previous_content = before;
            if let ShellEffectKind::Move(dest) = &effect.kind {
                diff.moved_to = Some(dest.clone());
            }
            Some(diff)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline(dir: &Path) -> PendingOperationPipeline {
        let p = PendingOperationPipeline::new();
        p.register_session(
            "ses_1",
            OperationContext {
                task_id: "task_1".into(),
                working_dir: dir.to_path_buf(),
            },
        );
        p
    }

    #[test]
    fn edit_becomes_hunks_against_preimage() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ts");
        std::fs::write(&file, "one\ntwo\nthree\n").unwrap();
        let p = pipeline(dir.path());

        let ev = NormalizedEvent::tool_use(
            "tu_1",
            "Edit",
            json!({"file_path": "a.ts", "old_string": "two", "new_string": "TWO"}),
        );
        assert!(p.store_pending_operation("ses_1", &ev));
        assert!(p.has_pending_operations("ses_1"));
        // The tool runs after the intent is stored.
        std::fs::write(&file, "one\nTWO\nthree\n").unwrap();

        let diffs = p.confirm_operation("tu_1");
        assert_eq!(diffs.len(), 1);
        let d = &diffs[0];
        assert_eq!(d.kind, DiffKind::Edit);
        assert_eq!(d.file_path, file);
        assert_eq!(d.task_id, "task_1");
        assert_eq!(d.line_counts(), (1, 1));
        assert_eq!(
            apply_hunks(d.previous_content.as_deref().unwrap(), &d.hunks).unwrap(),
            "one\nTWO\nthree\n"
        );
        assert!(!p.has_pending_operations("ses_1"));
    }

    #[test]
    fn confirming_twice_yields_one_diff() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let ev = NormalizedEvent::tool_use(
            "tu_1",
            "Write",
            json!({"file_path": "b.ts", "content": "export {}\n"}),
        );
        assert!(p.store_pending_operation("ses_1", &ev));
        assert!(!p.store_pending_operation("ses_1", &ev));

        let first = p.confirm_operation("tu_1");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].full_content.as_deref(), Some("export {}\n"));
        assert!(first[0].previous_content.is_none());
        assert!(p.confirm_operation("tu_1").is_empty());
    }

    #[test]
    fn multi_edit_applies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.rs"), "a a b\n").unwrap();
        let p = pipeline(dir.path());
        let ev = NormalizedEvent::tool_use(
            "tu_m",
            "MultiEdit",
            json!({"file_path": "m.rs", "edits": [
                {"old_string": "a", "new_string": "c", "replace_all": true},
                {"old_string": "b", "new_string": "d"},
            ]}),
        );
        assert!(p.store_pending_operation("ses_1", &ev));
        let d = p.confirm_operation("tu_m").remove(0);
        assert_eq!(
            apply_hunks("a a b\n", &d.hunks).unwrap(),
            "c c d\n"
        );
    }

    #[test]
    fn discard_prevents_diff() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let ev = NormalizedEvent::tool_use("tu_1", "Write", json!({"file_path": "x", "content": ""}));
        p.store_pending_operation("ses_1", &ev);
        assert!(p.discard_operation("tu_1"));
        assert!(!p.discard_operation("tu_1"));
        assert!(p.confirm_operation("tu_1").is_empty());
    }

    #[test]
    fn sweep_removes_old_operations_once() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        for id in ["tu_1", "tu_2"] {
            let ev = NormalizedEvent::tool_use(id, "Write", json!({"file_path": id, "content": "x"}));
            p.store_pending_operation("ses_1", &ev);
        }
        assert_eq!(p.cleanup_orphaned(Duration::from_secs(3600)), 0);
        assert_eq!(p.cleanup_orphaned(Duration::ZERO), 2);
        assert_eq!(p.cleanup_orphaned(Duration::ZERO), 0);
        assert!(p.confirm_operation("tu_1").is_empty());
    }

    #[test]
    fn ignores_reads_and_unregistered_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let read = NormalizedEvent::tool_use("tu_r", "Read", json!({"file_path": "a"}));
        assert!(!p.store_pending_operation("ses_1", &read));
        let write = NormalizedEvent::tool_use("tu_w", "Write", json!({"file_path": "a", "content": ""}));
        assert!(!p.store_pending_operation("ses_other", &write));
        assert!(!p.store_pending_operation("ses_1", &NormalizedEvent::message("hi")));
        assert!(!p.store_pending_operation(
            "ses_1",
            &NormalizedEvent::tool_use("tu_ls", "Bash", json!({"command": "ls -la"}))
        ));
        assert_eq!(p.pending_count(), 0);
    }

    #[test]
    fn shell_rm_becomes_delete_with_preimage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gone.txt"), "bye\n").unwrap();
        let p = pipeline(dir.path());
        let ev = NormalizedEvent::tool_use("tu_s", "Bash", json!({"command": "rm gone.txt"}));
        assert!(p.store_pending_operation("ses_1", &ev));
        std::fs::remove_file(dir.path().join("gone.txt")).unwrap();

        let d = p.confirm_operation("tu_s").remove(0);
        assert_eq!(d.kind, DiffKind::Delete);
        assert_eq!(d.previous_content.as_deref(), Some("bye\n"));
    }

    #[test]
    fn failed_rm_leaves_no_diff() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kept.txt"), "x").unwrap();
        let p = pipeline(dir.path());
        let ev = NormalizedEvent::tool_use("tu_s", "Bash", json!({"command": "rm kept.txt"}));
        p.store_pending_operation("ses_1", &ev);
        assert!(p.confirm_operation("tu_s").is_empty());
    }

    #[test]
    fn codex_command_array_and_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let ev = NormalizedEvent::tool_use(
            "item_1",
            "shell",
            json!({"command": ["bash", "-lc", "echo hi > out.txt"]}),
        );
        assert!(p.store_pending_operation("ses_1", &ev));
        std::fs::write(dir.path().join("out.txt"), "hi\n").unwrap();
        let d = p.confirm_operation("item_1").remove(0);
        assert_eq!(d.kind, DiffKind::Write);
        assert_eq!(d.full_content.as_deref(), Some("hi\n"));

        // Reported after the fact: recorded even though nothing differs.
        let change = NormalizedEvent::tool_use(
            "item_2#0",
            "file_change",
            json!({"path": "out.txt", "kind": "update"}),
        );
        assert!(p.store_pending_operation("ses_1", &change));
        let d = p.confirm_operation("item_2#0").remove(0);
        assert_eq!(d.kind, DiffKind::Edit);
        assert!(d.hunks.is_empty());
        assert!(d.previous_content.is_none());
    }

    #[test]
    fn release_drops_session_operations() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let ev = NormalizedEvent::tool_use("tu_1", "Write", json!({"file_path": "x", "content": ""}));
        p.store_pending_operation("ses_1", &ev);
        assert_eq!(p.release_session("ses_1"), 1);
        assert!(!p.store_pending_operation("ses_1", &ev));
    }
}
