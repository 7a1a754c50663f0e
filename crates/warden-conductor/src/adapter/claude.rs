//! Claude Code over `--input-format stream-json --output-format stream-json`.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;
use warden_core::{EventKind, NormalizedEvent};

use super::process::{CommandSpec, PermissionRequest, ProviderProfile};
use super::{AdapterError, SpawnConfig};

/// Relevant fields from Claude Code's stream-json output.
/// Uses `#[serde(other)]` to gracefully ignore unknown message types.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamMessage {
    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(default)]
        message: Value,
    },
    #[serde(rename = "user")]
    User {
        #[serde(default)]
        message: Value,
    },
    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default, rename = "result")]
        result_text: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(rename = "stream_event")]
    StreamEvent {
        #[serde(default)]
        event: Value,
    },
    #[serde(rename = "control_request")]
    ControlRequest {
        request_id: String,
        #[serde(default)]
        request: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeProfile;

/// Directories of context files that live outside the working directory.
fn extra_dirs(config: &SpawnConfig) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    for file in &config.context_files {
        let dir = if file.is_dir() {
            file.as_path()
        } else {
            file.parent().unwrap_or(Path::new("."))
        };
        let abs = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            config.working_dir.join(dir)
        };
        if !abs.starts_with(&config.working_dir) {
            dirs.insert(abs.to_string_lossy().to_string());
        }
    }
    dirs.into_iter().collect()
}

fn content_blocks(message: &Value) -> &[Value] {
    message
        .get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

impl ProviderProfile for ClaudeProfile {
    fn provider(&self) -> &'static str {
        "claude"
    }

    fn default_binary(&self) -> &'static str {
        "claude"
    }

    fn command(&self, program: &str, config: &SpawnConfig) -> Result<CommandSpec, AdapterError> {
        let mut args: Vec<String> = [
            "-p",
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--verbose",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let mut push = |flag: &str, value: String| {
            args.push(flag.to_string());
            args.push(value);
        };

        if let Some(model) = &config.model {
            push("--model", model.clone());
        }

        let seed = match &config.resume_session_id {
            Some(resume) => {
                push("--resume", resume.clone());
                None
            }
            None => {
                let seed = Uuid::new_v4().to_string();
                push("--session-id", seed.clone());
                Some(seed)
            }
        };
        if let Some(prompt) = config.system_prompt.as_ref().filter(|p| !p.is_empty()) {
            push("--append-system-prompt", prompt.clone());
        }
        if let Some(tools) = config.allowed_tools.as_ref().filter(|t| !t.is_empty()) {
            push("--allowedTools", tools.join(","));
        }
        if let Some(tools) = config.disallowed_tools.as_ref().filter(|t| !t.is_empty()) {
            push("--disallowedTools", tools.join(","));
        }
        match config.permission_mode.as_deref() {
            Some("bypassPermissions") => push("--permission-mode", "bypassPermissions".into()),
            Some(mode) => {
                push("--permission-mode", mode.to_string());
                push("--permission-prompt-tool", "stdio".into());
            }
            None => push("--permission-prompt-tool", "stdio".into()),
        }
        if let Some(budget) = config.budget_usd {
            if budget <= 0.0 {
                return Err(AdapterError::Config(format!(
                    "budget must be positive, got {budget}"
                )));
            }
            push("--max-budget-usd", budget.to_string());
        }
        if let Some(fallback) = &config.fallback_model {
            if config.model.as_deref() == Some(fallback.as_str()) {
                return Err(AdapterError::Config(
                    "fallback model must differ from the main model".into(),
                ));
            }
            push("--fallback-model", fallback.clone());
        }
        for dir in extra_dirs(config) {
            push("--add-dir", dir);
        }
        for path in &config.mcp_config_paths {
            push("--mcp-config", path.to_string_lossy().to_string());
        }
        if !config.sub_agents.is_empty() {
            let agents: serde_json::Map<String, Value> = config
                .sub_agents
                .iter()
                .map(|a| {
                    let mut def = json!({ "description": a.description, "prompt": a.prompt });
                    if let Some(tools) = &a.tools {
                        def["tools"] = json!(tools);
                    }
                    if let Some(model) = &a.model {
                        def["model"] = json!(model);
                    }
                    (a.name.clone(), def)
                })
                .collect();
            push("--agents", Value::Object(agents).to_string());
        }
        if config.fork {
            args.push("--fork-session".into());
        }

        let mut env = vec![("WARDEN_SESSION_ID".to_string(), config.session_id.clone())];
        if let Some(role) = &config.agent_role {
            env.push(("WARDEN_AGENT_ROLE".to_string(), role.clone()));
        }

        Ok(CommandSpec {
            program: program.to_string(),
            args,
            env,
            // Allow nesting: these markers stop Claude Code from starting inside itself.
            env_remove: vec!["CLAUDECODE".into(), "CLAUDE_CODE".into()],
            first_message_preamble: None,
            seed_session_id: seed,
        })
    }

    fn parse_line(&self, line: &str) -> Vec<NormalizedEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return vec![NormalizedEvent::opaque(line)];
        };
        let Ok(msg) = serde_json::from_value::<StreamMessage>(value.clone()) else {
            return vec![NormalizedEvent::system("unrecognized", json!({ "raw": value }))];
        };
        match msg {
            StreamMessage::System { subtype } => vec![NormalizedEvent::system(
                subtype.as_deref().unwrap_or("system"),
                value,
            )],
            StreamMessage::Assistant { message } => content_blocks(&message)
                .iter()
                .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                    Some("text") => block
                        .get("text")
                        .and_then(Value::as_str)
                        .map(NormalizedEvent::message),
                    Some("thinking") => block
                        .get("thinking")
                        .and_then(Value::as_str)
                        .map(NormalizedEvent::thinking),
                    Some("tool_use") => Some(NormalizedEvent::tool_use(
                        block.get("id").and_then(Value::as_str).unwrap_or_default(),
                        block.get("name").and_then(Value::as_str).unwrap_or_default(),
                        block.get("input").cloned().unwrap_or(Value::Null),
                    )),
                    _ => None,
                })
                .collect(),
            StreamMessage::User { message } => content_blocks(&message)
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_result"))
                .map(|block| {
                    NormalizedEvent::tool_result(
                        block
                            .get("tool_use_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default(),
                        block
                            .get("is_error")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        block.get("content").cloned().unwrap_or(Value::Null),
                    )
                })
                .collect(),
            StreamMessage::Result {
                subtype,
                is_error,
                total_cost_usd,
                result_text,
                session_id,
            } => {
                let mut ev =
                    NormalizedEvent::result(is_error, result_text.as_deref(), total_cost_usd);
                ev.content["subtype"] = json!(subtype);
                ev.content["session_id"] = json!(session_id);
                vec![ev]
            }
            StreamMessage::StreamEvent { event } => {
                vec![NormalizedEvent::new(EventKind::PartialStreamDelta, event)]
            }
            StreamMessage::ControlRequest {
                request_id,
                request,
            } => {
                if request.get("subtype").and_then(Value::as_str) != Some("can_use_tool") {
                    return vec![NormalizedEvent::system(
                        "control_request",
                        json!({ "request_id": request_id, "request": request }),
                    )];
                }
                vec![NormalizedEvent::system(
                    "permission_request",
                    json!({
                        "request_id": request_id,
                        "tool_name": request.get("tool_name").cloned().unwrap_or(Value::Null),
                        "input": request.get("input").cloned().unwrap_or(Value::Null),
                    }),
                )]
            }
            StreamMessage::Unknown => {
                vec![NormalizedEvent::system("unrecognized", json!({ "raw": value }))]
            }
        }
    }

    fn session_id_from(&self, event: &NormalizedEvent) -> Option<String> {
        if !matches!(event.kind, EventKind::System | EventKind::Result) {
            return None;
        }
        event
            .content
            .get("session_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    fn user_message(&self, provider_session_id: Option<&str>, text: &str) -> String {
        json!({
            "type": "user",
            "message": { "role": "user", "content": text },
            "parent_tool_use_id": null,
            "session_id": provider_session_id.unwrap_or("default"),
        })
        .to_string()
    }

    fn approval_response(&self, request: &PermissionRequest, approved: bool) -> Option<String> {
        let response = if approved {
            json!({ "behavior": "allow", "updatedInput": request.input })
        } else {
            json!({ "behavior": "deny", "message": "Denied by the user" })
        };
        Some(
            json!({
                "type": "control_response",
                "response": {
                    "subtype": "success",
                    "request_id": request.request_id,
                    "response": response,
                }
            })
            .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> SpawnConfig {
        SpawnConfig {
            provider: "claude".into(),
            model: Some("sonnet".into()),
            working_dir: PathBuf::from("/repo"),
            session_id: "ses_1".into(),
            ..Default::default()
        }
    }

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn fresh_session_gets_seed_id() {
        let spec = ClaudeProfile.command("claude", &config()).unwrap();
        let seed = spec.seed_session_id.clone().unwrap();
        assert_eq!(flag_value(&spec.args, "--session-id"), Some(seed.as_str()));
        assert!(!spec.args.contains(&"--resume".to_string()));
        assert_eq!(flag_value(&spec.args, "--model"), Some("sonnet"));
        assert!(spec.env_remove.contains(&"CLAUDECODE".to_string()));
        assert!(spec
            .env
            .contains(&("WARDEN_SESSION_ID".to_string(), "ses_1".to_string())));
    }

    #[test]
    fn resume_and_fork_flags() {
        let mut cfg = config();
        cfg.resume_session_id = Some("abc".into());
        cfg.fork = true;
        let spec = ClaudeProfile.command("claude", &cfg).unwrap();
        assert_eq!(flag_value(&spec.args, "--resume"), Some("abc"));
        assert!(spec.args.contains(&"--fork-session".to_string()));
        assert!(!spec.args.contains(&"--session-id".to_string()));
        assert!(spec.seed_session_id.is_none());
    }

    #[test]
    fn permission_and_tool_flags() {
        let mut cfg = config();
        cfg.allowed_tools = Some(vec!["Read".into(), "Edit".into()]);
        cfg.disallowed_tools = Some(vec!["Bash".into()]);
        cfg.permission_mode = Some("acceptEdits".into());
        cfg.budget_usd = Some(2.5);
        cfg.fallback_model = Some("haiku".into());
        cfg.context_files = vec![PathBuf::from("/repo/src/a.rs"), PathBuf::from("/docs/b.md")];
        cfg.mcp_config_paths = vec![PathBuf::from("/repo/mcp.json")];
        let spec = ClaudeProfile.command("claude", &cfg).unwrap();
        assert_eq!(flag_value(&spec.args, "--allowedTools"), Some("Read,Edit"));
        assert_eq!(flag_value(&spec.args, "--disallowedTools"), Some("Bash"));
        assert_eq!(flag_value(&spec.args, "--permission-mode"), Some("acceptEdits"));
        assert_eq!(flag_value(&spec.args, "--permission-prompt-tool"), Some("stdio"));
        assert_eq!(flag_value(&spec.args, "--max-budget-usd"), Some("2.5"));
        assert_eq!(flag_value(&spec.args, "--fallback-model"), Some("haiku"));
        assert_eq!(flag_value(&spec.args, "--add-dir"), Some("/docs"));
        assert_eq!(flag_value(&spec.args, "--mcp-config"), Some("/repo/mcp.json"));
    }

    #[test]
    fn invalid_budget_fails_before_spawn() {
        let mut cfg = config();
        cfg.budget_usd = Some(0.0);
        assert!(matches!(
            ClaudeProfile.command("claude", &cfg),
            Err(AdapterError::Config(_))
        ));
    }

    #[test]
    fn parses_assistant_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"thinking","thinking":"plan"},
            {"type":"text","text":"hi"},
            {"type":"tool_use","id":"toolu_1","name":"Write","input":{"file_path":"/a","content":"x"}}
        ]}}"#
            .replace('\n', "");
        let events = ClaudeProfile.parse_line(&line);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, EventKind::Thinking);
        assert_eq!(events[1].text(), Some("hi"));
        let tu = events[2].as_tool_use().unwrap();
        assert_eq!(tu.id, "toolu_1");
        assert_eq!(tu.input["content"], "x");
    }

    #[test]
    fn parses_tool_result() {
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"boom","is_error":true}]}}"#;
        let events = ClaudeProfile.parse_line(line);
        let tr = events[0].as_tool_result().unwrap();
        assert_eq!(tr.tool_use_id, "toolu_1");
        assert!(tr.is_error);
    }

    #[test]
    fn init_carries_session_id() {
        let line = r#"{"type":"system","subtype":"init","session_id":"sid-1","model":"sonnet"}"#;
        let events = ClaudeProfile.parse_line(line);
        assert_eq!(events[0].subtype(), Some("init"));
        assert_eq!(ClaudeProfile.session_id_from(&events[0]).as_deref(), Some("sid-1"));
    }

    #[test]
    fn result_and_unknown_lines() {
        let events = ClaudeProfile.parse_line(
            r#"{"type":"result","subtype":"success","is_error":false,"result":"done","total_cost_usd":0.5}"#,
        );
        assert_eq!(events[0].kind, EventKind::Result);
        assert_eq!(events[0].text(), Some("done"));
        assert_eq!(events[0].content["total_cost_usd"], 0.5);

        let events = ClaudeProfile.parse_line(r#"{"type":"brand_new","x":1}"#);
        assert_eq!(events[0].subtype(), Some("unrecognized"));
        let events = ClaudeProfile.parse_line("{{{");
        assert_eq!(events[0].subtype(), Some("unparsed"));
    }

    #[test]
    fn permission_request_roundtrip() {
        let line = r#"{"type":"control_request","request_id":"req-9","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"ls"}}}"#;
        let events = ClaudeProfile.parse_line(line);
        let req = PermissionRequest::from_event(&events[0]).unwrap();
        assert_eq!(req.request_id, "req-9");
        assert_eq!(req.tool_name, "Bash");

        let reply: Value =
            serde_json::from_str(&ClaudeProfile.approval_response(&req, true).unwrap()).unwrap();
        assert_eq!(reply["type"], "control_response");
        assert_eq!(reply["response"]["request_id"], "req-9");
        assert_eq!(reply["response"]["response"]["behavior"], "allow");
        assert_eq!(reply["response"]["response"]["updatedInput"]["command"], "ls");

        let deny: Value =
            serde_json::from_str(&ClaudeProfile.approval_response(&req, false).unwrap()).unwrap();
        assert_eq!(deny["response"]["response"]["behavior"], "deny");
    }

    #[test]
    fn user_message_shape() {
        let v: Value =
            serde_json::from_str(&ClaudeProfile.user_message(Some("sid"), "do it")).unwrap();
        assert_eq!(v["type"], "user");
        assert_eq!(v["message"]["content"], "do it");
        assert_eq!(v["session_id"], "sid");
    }
}
