//! Codex CLI via `codex exec --json`: one prompt over stdin, JSONL events out.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use warden_core::{EventKind, NormalizedEvent};

use super::process::{CommandSpec, PermissionRequest, ProviderProfile};
use super::{AdapterError, SpawnConfig};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ExecEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },
    #[serde(rename = "item.started")]
    ItemStarted { item: Value },
    #[serde(rename = "item.updated")]
    ItemUpdated { item: Value },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: Value },
    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: Value,
    },
    #[serde(rename = "turn.failed")]
    TurnFailed {
        #[serde(default)]
        error: Value,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CodexProfile;

fn item_str<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// One tool-use per changed path, keyed `<item id>#<index>`.
fn file_change_uses(item: &Value) -> Vec<NormalizedEvent> {
    let id = item_str(item, "id");
    item.get("changes")
        .and_then(Value::as_array)
        .map(|changes| {
            changes
                .iter()
                .enumerate()
                .map(|(i, change)| {
                    NormalizedEvent::tool_use(
                        &format!("{id}#{i}"),
                        "file_change",
                        json!({
                            "path": item_str(change, "path"),
                            "kind": item_str(change, "kind"),
                        }),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn item_started(item: &Value) -> Vec<NormalizedEvent> {
    match item_str(item, "type") {
        "command_execution" => vec![NormalizedEvent::tool_use(
            item_str(item, "id"),
            "shell",
            json!({ "command": item_str(item, "command") }),
        )],
        "file_change" => file_change_uses(item),
        _ => vec![],
    }
}

fn item_completed(item: &Value) -> Vec<NormalizedEvent> {
    let id = item_str(item, "id");
    match item_str(item, "type") {
        "agent_message" => vec![NormalizedEvent::message(item_str(item, "text"))],
        "reasoning" => vec![NormalizedEvent::thinking(item_str(item, "text"))],
        "command_execution" => {
            let failed = item
                .get("exit_code")
                .and_then(Value::as_i64)
                .is_some_and(|c| c != 0)
                || item_str(item, "status") == "failed";
            vec![NormalizedEvent::tool_result(
                id,
                failed,
                item.get("aggregated_output").cloned().unwrap_or(Value::Null),
            )]
        }
        "file_change" => {
            let failed = item_str(item, "status") == "failed";
            // Codex may report the change only on completion; emit the uses
            // again so the results have something to pair with. Duplicate
            // tool-use ids are ignored downstream.
            let uses = file_change_uses(item);
            let results: Vec<NormalizedEvent> = uses
                .iter()
                .filter_map(|u| u.as_tool_use())
                .map(|u| NormalizedEvent::tool_result(&u.id, failed, Value::Null))
                .collect();
            uses.into_iter().chain(results).collect()
        }
        other => vec![NormalizedEvent::system(
            "item",
            json!({ "item_type": other, "item": item }),
        )],
    }
}

impl ProviderProfile for CodexProfile {
    fn provider(&self) -> &'static str {
        "codex"
    }

    fn default_binary(&self) -> &'static str {
        "codex"
    }

    fn command(&self, program: &str, config: &SpawnConfig) -> Result<CommandSpec, AdapterError> {
        if config.fork {
            return Err(AdapterError::Unsupported {
                provider: "codex".into(),
                what: "forking a session",
            });
        }
        let mut args = vec!["exec".to_string(), "--json".to_string()];
        if let Some(model) = &config.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        args.push("--cd".into());
        args.push(config.working_dir.to_string_lossy().to_string());
        match config.permission_mode.as_deref() {
            Some("bypassPermissions") => {
                args.push("--dangerously-bypass-approvals-and-sandbox".into())
            }
            Some("acceptEdits") => args.push("--full-auto".into()),
            _ => {}
        }
        if config.allowed_tools.is_some()
            || config.disallowed_tools.is_some()
            || config.budget_usd.is_some()
        {
            debug!("codex ignores tool lists and budget ceilings");
        }
        if let Some(resume) = &config.resume_session_id {
            args.push("resume".into());
            args.push(resume.clone());
        }

        let mut env = vec![("WARDEN_SESSION_ID".to_string(), config.session_id.clone())];
        if let Some(role) = &config.agent_role {
            env.push(("WARDEN_AGENT_ROLE".to_string(), role.clone()));
        }

        Ok(CommandSpec {
            program: program.to_string(),
            args,
            env,
            env_remove: vec![],
            first_message_preamble: config.system_prompt.clone().filter(|p| !p.is_empty()),
            seed_session_id: None,
        })
    }

    fn parse_line(&self, line: &str) -> Vec<NormalizedEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return vec![NormalizedEvent::opaque(line)];
        };
        let Ok(event) = serde_json::from_value::<ExecEvent>(value.clone()) else {
            return vec![NormalizedEvent::system("unrecognized", json!({ "raw": value }))];
        };
        match event {
            ExecEvent::ThreadStarted { thread_id } => vec![NormalizedEvent::system(
                "init",
                json!({ "session_id": thread_id }),
            )],
            ExecEvent::ItemStarted { item } => item_started(&item),
            ExecEvent::ItemUpdated { item } => {
                vec![NormalizedEvent::new(EventKind::PartialStreamDelta, item)]
            }
            ExecEvent::ItemCompleted { item } => item_completed(&item),
            ExecEvent::TurnCompleted { usage } => {
                let mut ev = NormalizedEvent::result(false, None, None);
                ev.content["usage"] = usage;
                vec![ev]
            }
            ExecEvent::TurnFailed { error } => {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("turn failed");
                vec![NormalizedEvent::result(true, Some(message), None)]
            }
            ExecEvent::Error { message } => vec![NormalizedEvent::system(
                "error",
                json!({ "message": message }),
            )],
            ExecEvent::Unknown => {
                vec![NormalizedEvent::system("unrecognized", json!({ "raw": value }))]
            }
        }
    }

    fn session_id_from(&self, event: &NormalizedEvent) -> Option<String> {
        if event.kind != EventKind::System || event.subtype() != Some("init") {
            return None;
        }
        event
            .content
            .get("session_id")
            .and_then(Value::as_str)
            .map(String::from)
    }

    fn user_message(&self, _provider_session_id: Option<&str>, text: &str) -> String {
        text.to_string()
    }

    fn approval_response(&self, _request: &PermissionRequest, _approved: bool) -> Option<String> {
        None
    }

    fn single_message(&self) -> bool {
        true
    }
}
