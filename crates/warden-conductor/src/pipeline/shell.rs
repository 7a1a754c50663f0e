//! Best-effort inference of file effects from shell commands.
//!
//! A command is split into segments on `;`, `&&`, `||`, `|` and newlines,
//! each segment is tokenized, and every matcher in [`default_matchers`] gets
//! a look at it. Commands no matcher recognizes have no tracked effect.

use std::path::{Path, PathBuf};
use warden_core::DiffKind;

/// One file the command is expected to change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellEffect {
    pub path: PathBuf,
    pub kind: ShellEffectKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEffectKind {
    /// Content replaced (`>`, `tee`, `touch` of a new file).
    Write,
    /// Content appended (`>>`, `tee -a`).
    Append,
    Delete,
    /// Renamed to the destination.
    Move(PathBuf),
}

impl ShellEffectKind {
    pub fn diff_kind(&self) -> DiffKind {
        match self {
            ShellEffectKind::Write => DiffKind::Write,
            ShellEffectKind::Append => DiffKind::Edit,
            ShellEffectKind::Delete | ShellEffectKind::Move(_) => DiffKind::Delete,
        }
    }
}

/// Recognizes one family of file-mutating commands.
pub trait ShellMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    /// Effects of one tokenized segment. `raw` is the untokenized segment.
    fn effects(&self, raw: &str, tokens: &[String], cwd: &Path) -> Vec<ShellEffect>;
}

fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

fn operands(tokens: &[String]) -> impl Iterator<Item = &String> {
    tokens
        .iter()
        .skip(1)
        .filter(|t| !t.starts_with('-') || t.as_str() == "-")
}

pub struct RedirectMatcher;

impl ShellMatcher for RedirectMatcher {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn effects(&self, _raw: &str, tokens: &[String], cwd: &Path) -> Vec<ShellEffect> {
        let mut effects = Vec::new();
        let mut iter = tokens.iter();
        while let Some(token) = iter.next() {
            // `>file` and `> file` both count; `2>&1` style duplication does not.
            let (append, rest) = if let Some(rest) = token.strip_prefix(">>") {
                (true, rest)
            } else if let Some(rest) = token.strip_prefix('>') {
                (false, rest)
            } else {
                continue;
            };
            let target = if rest.is_empty() {
                match iter.next() {
                    Some(next) => next.as_str(),
                    None => break,
                }
            } else {
                rest
            };
            if target.starts_with('&') || target == "/dev/null" {
                continue;
            }
            effects.push(ShellEffect {
                path: resolve(cwd, target),
                kind: if append {
                    ShellEffectKind::Append
                } else {
                    ShellEffectKind::Write
                },
            });
        }
        effects
    }
}

pub struct TeeMatcher;

impl ShellMatcher for TeeMatcher {
    fn name(&self) -> &'static str {
        "tee"
    }

    fn effects(&self, _raw: &str, tokens: &[String], cwd: &Path) -> Vec<ShellEffect> {
        if tokens.first().map(String::as_str) != Some("tee") {
            return vec![];
        }
        let append = tokens
            .iter()
            .skip(1)
            .any(|t| t == "-a" || t == "--append");
        operands(tokens)
            .filter(|t| t.as_str() != "-")
            .map(|t| ShellEffect {
                path: resolve(cwd, t),
                kind: if append {
                    ShellEffectKind::Append
                } else {
                    ShellEffectKind::Write
                },
            })
            .collect()
    }
}

pub struct RmMatcher;

impl ShellMatcher for RmMatcher {
    fn name(&self) -> &'static str {
        "rm"
    }

    fn effects(&self, _raw: &str, tokens: &[String], cwd: &Path) -> Vec<ShellEffect> {
        if tokens.first().map(String::as_str) != Some("rm") {
            return vec![];
        }
        operands(tokens)
            .map(|t| ShellEffect {
                path: resolve(cwd, t),
                kind: ShellEffectKind::Delete,
            })
            .collect()
    }
}

pub struct MvMatcher;

impl ShellMatcher for MvMatcher {
    fn name(&self) -> &'static str {
        "mv"
    }

    fn effects(&self, _raw: &str, tokens: &[String], cwd: &Path) -> Vec<ShellEffect> {
        if tokens.first().map(String::as_str) != Some("mv") {
            return vec![];
        }
        let args: Vec<&String> = operands(tokens).collect();
        let [sources @ .., dest] = args.as_slice() else {
            return vec![];
        };
        if sources.is_empty() {
            return vec![];
        }
        let dest = resolve(cwd, dest);
        // Several sources means the destination is a directory.
        let into_dir = sources.len() > 1 || dest.is_dir();
        sources
            .iter()
            .map(|src| {
                let path = resolve(cwd, src);
                let target = match (into_dir, path.file_name()) {
                    (true, Some(name)) => dest.join(name),
                    _ => dest.clone(),
                };
                ShellEffect {
                    path,
                    kind: ShellEffectKind::Move(target),
                }
            })
            .collect()
    }
}

pub struct TouchMatcher;

impl ShellMatcher for TouchMatcher {
    fn name(&self) -> &'static str {
        "touch"
    }

    fn effects(&self, _raw: &str, tokens: &[String], cwd: &Path) -> Vec<ShellEffect> {
        if tokens.first().map(String::as_str) != Some("touch") {
            return vec![];
        }
        // Touching an existing file only changes its timestamps.
        operands(tokens)
            .map(|t| resolve(cwd, t))
            .filter(|p| !p.exists())
            .map(|path| ShellEffect {
                path,
                kind: ShellEffectKind::Write,
            })
            .collect()
    }
}

pub fn default_matchers() -> Vec<Box<dyn ShellMatcher>> {
    vec![
        Box::new(RedirectMatcher),
        Box::new(TeeMatcher),
        Box::new(RmMatcher),
        Box::new(MvMatcher),
        Box::new(TouchMatcher),
    ]
}

/// Split on unquoted `;`, `&&`, `||`, `|` and newlines.
fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut chars = command.chars().peekable();

    let mut flush = |current: &mut String| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            segments.push(trimmed.to_string());
        }
        current.clear();
    };

    while let Some(ch) = chars.next() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !in_single => {
                current.push(ch);
                escaped = true;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            ';' | '\n' if !in_single && !in_double => flush(&mut current),
            '|' if !in_single && !in_double => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                flush(&mut current);
            }
            '&' if !in_single && !in_double && chars.peek() == Some(&'&') => {
                chars.next();
                flush(&mut current);
            }
            _ => current.push(ch),
        }
    }
    flush(&mut current);
    segments
}

fn tokenize(segment: &str) -> Vec<String> {
    shell_words::split(segment)
        .unwrap_or_else(|_| segment.split_whitespace().map(ToString::to_string).collect())
}

fn strip_env_prefix(tokens: &[String]) -> &[String] {
    let is_assignment = |t: &String| {
        t.split_once('=').is_some_and(|(key, _)| {
            !key.is_empty() && key.chars().all(|c| c == '_' || c.is_ascii_alphanumeric())
        })
    };
    let skip = tokens.iter().take_while(|t| is_assignment(*t)).count();
    &tokens[skip..]
}

/// Inner script of `bash -lc '<script>'` style wrappers, or the command itself.
pub fn unwrap_shell(command: &str) -> String {
    let tokens = tokenize(command);
    match tokens.as_slice() {
        [shell, flag, script, ..]
            if matches!(shell.rsplit('/').next(), Some("bash" | "sh" | "zsh"))
                && flag.starts_with('-')
                && flag.ends_with('c') =>
        {
            script.clone()
        }
        _ => command.to_string(),
    }
}

/// Run every matcher over every segment of `command`.
pub fn infer_effects(
    matchers: &[Box<dyn ShellMatcher>],
    command: &str,
    cwd: &Path,
) -> Vec<ShellEffect> {
    let mut effects: Vec<ShellEffect> = Vec::new();
    for segment in split_segments(&unwrap_shell(command)) {
        let tokens = tokenize(&segment);
        let tokens = strip_env_prefix(&tokens);
        for matcher in matchers {
            for effect in matcher.effects(&segment, tokens, cwd) {
                if !effects.iter().any(|e| e.path == effect.path) {
                    effects.push(effect);
                }
            }
        }
    }
    effects
}
