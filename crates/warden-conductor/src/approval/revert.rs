//! Restore a file to its state before a diff was made.

use std::io::ErrorKind;
use std::path::Path;
use warden_core::{Diff, DiffKind};

use crate::pipeline::{reverse_hunks, PipelineError};

fn io_err(path: &Path, source: std::io::Error) -> PipelineError {
    PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write(path: &Path, content: &str) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| io_err(path, e))
}

fn remove(path: &Path) -> Result<(), PipelineError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(io_err(path, e)),
        _ => Ok(()),
    }
}

/// Undo one diff on disk. Edits are reversed hunk by hunk against the
/// current file, so later unrelated edits to the same file survive.
pub fn revert_diff(diff: &Diff) -> Result<(), PipelineError> {
    let path = diff.file_path.as_path();
    match diff.kind {
        DiffKind::Edit => {
            if diff.hunks.is_empty() {
                return Err(PipelineError::NoPreimage(path.to_path_buf()));
            }
            let current = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
            match reverse_hunks(&current, &diff.hunks) {
                Ok(restored) => write(path, &restored),
                // Drifted since the edit; fall back to the whole pre-image.
                Err(e) => match &diff.previous_content {
                    Some(previous) => write(path, previous),
                    None => Err(e),
                },
            }
        }
        DiffKind::Write => match &diff.previous_content {
            Some(previous) => write(path, previous),
            None => remove(path),
        },
        DiffKind::Delete => {
            let previous = diff
                .previous_content
                .as_deref()
                .ok_or_else(|| PipelineError::NoPreimage(path.to_path_buf()))?;
            write(path, previous)?;
            if let Some(dest) = &diff.moved_to {
                remove(dest)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::compute_hunks;
    use std::path::PathBuf;
    use warden_core::DiffStatus;

    fn diff(path: PathBuf, kind: DiffKind) -> Diff {
        Diff {
            id: "dif_1".into(),
            session_id: "ses_1".into(),
            task_id: "task_1".into(),
            tool_invocation_id: "tu_1".into(),
            file_path: path,
            kind,
            hunks: vec![],
            full_content: None,
            previous_content: None,
            moved_to: None,
            status: DiffStatus::Pending,
            approval_id: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            applied_at: None,
        }
    }

    #[test]
    fn edit_reverts_only_its_hunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ts");
        let before: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        let after = before.replace("line 3\n", "three\n");
        let mut d = diff(path.clone(), DiffKind::Edit);
        d.hunks = compute_hunks(&before, &after);
        d.previous_content = Some(before.clone());

        // A later change far away from the hunk.
        std::fs::write(&path, after.replace("line 18\n", "eighteen\n")).unwrap();
        revert_diff(&d).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            before.replace("line 18\n", "eighteen\n")
        );
    }

    #[test]
    fn write_of_new_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.ts");
        std::fs::write(&path, "new").unwrap();
        revert_diff(&diff(path.clone(), DiffKind::Write)).unwrap();
        assert!(!path.exists());
        // Already gone is fine.
        revert_diff(&diff(path, DiffKind::Write)).unwrap();
    }

    #[test]
    fn move_is_undone() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("old.ts");
        let dest = dir.path().join("new.ts");
        std::fs::write(&dest, "body").unwrap();
        let mut d = diff(src.clone(), DiffKind::Delete);
        d.previous_content = Some("body".into());
        d.moved_to = Some(dest.clone());
        revert_diff(&d).unwrap();
        assert_eq!(std::fs::read_to_string(&src).unwrap(), "body");
        assert!(!dest.exists());
    }

    #[test]
    fn missing_preimage_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let d = diff(dir.path().join("x"), DiffKind::Delete);
        assert!(matches!(revert_diff(&d), Err(PipelineError::NoPreimage(_))));
    }
}
