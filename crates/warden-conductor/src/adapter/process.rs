use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::{EventKind, NormalizedEvent, ProcessHandle, ProviderSettings};

use super::capture::{fallback_session_id, SessionIdCapture};
use super::subscribers::{lock, ExitSignal, Listen, Subscribers, Subscription};
use super::{
    AdapterError, EventListener, ExitListener, ProcessAdapter, ProcessExit, SpawnConfig,
    SpawnedProcess,
};

/// How long to wait for a process to exit after stdin is closed.
const STOP_GRACE: Duration = Duration::from_secs(5);
/// How long an exited process stays addressable for late exit subscribers.
const EXITED_LINGER: Duration = Duration::from_secs(30);
const STDERR_TAIL_LINES: usize = 20;

/// Command line for one spawn, built by a [`ProviderProfile`].
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub env_remove: Vec<String>,
    /// Prepended to the first message for providers without a system-prompt flag.
    pub first_message_preamble: Option<String>,
    /// Session id the provider was told to use, if it accepts one.
    pub seed_session_id: Option<String>,
}

/// An outstanding "may I run this tool?" prompt from the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_name: String,
    pub input: Value,
}

impl PermissionRequest {
    /// Read a `system` event with subtype `permission_request`.
    pub fn from_event(event: &NormalizedEvent) -> Option<Self> {
        if event.kind != EventKind::System || event.subtype() != Some("permission_request") {
            return None;
        }
        Some(Self {
            request_id: event.content.get("request_id")?.as_str()?.to_string(),
            tool_name: event
                .content
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            input: event.content.get("input").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Provider-specific command line and wire format.
pub trait ProviderProfile: Send + Sync + 'static {
    fn provider(&self) -> &'static str;

    fn default_binary(&self) -> &'static str;

    /// Arguments and environment for `config`. Invalid combinations fail here,
    /// before anything is spawned.
    fn command(&self, program: &str, config: &SpawnConfig) -> Result<CommandSpec, AdapterError>;

    /// One stdout line to zero or more events. Never fails: unparseable lines
    /// become opaque `system` events.
    fn parse_line(&self, line: &str) -> Vec<NormalizedEvent>;

    /// Provider session id carried by `event`, if any.
    fn session_id_from(&self, event: &NormalizedEvent) -> Option<String>;

    /// Stdin payload for a user message (without the trailing newline).
    fn user_message(&self, provider_session_id: Option<&str>, text: &str) -> String;

    /// Stdin payload answering `request`; `None` if the provider has no such channel.
    fn approval_response(&self, request: &PermissionRequest, approved: bool) -> Option<String>;

    /// Provider reads one prompt and then needs stdin closed.
    fn single_message(&self) -> bool {
        false
    }
}

enum StdinCommand {
    Line(String),
    Close,
}

struct ProcessEntry {
    handle: ProcessHandle,
    stdin_tx: mpsc::UnboundedSender<StdinCommand>,
    events: Subscribers<NormalizedEvent>,
    exit: ExitSignal,
    capture: SessionIdCapture,
    stop: CancellationToken,
    running: AtomicBool,
    messages_sent: AtomicUsize,
    pending_permission: Mutex<Option<PermissionRequest>>,
    preamble: Mutex<Option<String>>,
    initial_prompt: Mutex<Option<String>>,
    fallback_id: String,
}

/// Supervises provider subprocesses speaking line-delimited JSON on stdio.
pub struct SubprocessAdapter<P: ProviderProfile> {
    profile: Arc<P>,
    settings: ProviderSettings,
    processes: Arc<Mutex<HashMap<ProcessHandle, Arc<ProcessEntry>>>>,
}

impl<P: ProviderProfile> SubprocessAdapter<P> {
    pub fn new(profile: P, settings: ProviderSettings) -> Self {
        Self {
            profile: Arc::new(profile),
            settings,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn entry(&self, handle: &ProcessHandle) -> Result<Arc<ProcessEntry>, AdapterError> {
        lock(&self.processes)
            .get(handle)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownProcess(handle.clone()))
    }

    fn enqueue_message(&self, entry: &ProcessEntry, text: &str) -> Result<(), AdapterError> {
        if self.profile.single_message() && entry.messages_sent.load(Ordering::SeqCst) > 0 {
            return Err(AdapterError::Unsupported {
                provider: self.profile.provider().to_string(),
                what: "follow-up messages",
            });
        }
        let text = match lock(&entry.preamble).take() {
            Some(preamble) => format!("{preamble}\n\n{text}"),
            None => text.to_string(),
        };
        let payload = self
            .profile
            .user_message(entry.capture.get().as_deref(), &text);
        entry
            .stdin_tx
            .send(StdinCommand::Line(payload))
            .map_err(|_| AdapterError::StdinClosed(entry.handle.clone()))?;
        entry.messages_sent.fetch_add(1, Ordering::SeqCst);
        if self.profile.single_message() {
            let _ = entry.stdin_tx.send(StdinCommand::Close);
        }
        Ok(())
    }
}

fn spawned_at_ms() -> i128 {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

#[async_trait::async_trait]
impl<P: ProviderProfile> ProcessAdapter for SubprocessAdapter<P> {
    fn provider(&self) -> &str {
        self.profile.provider()
    }

    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnedProcess, AdapterError> {
        if config.resume_session_id.is_none() && config.fork {
            return Err(AdapterError::Config(
                "fork requires a session to resume".into(),
            ));
        }
        let program = self
            .settings
            .binary
            .clone()
            .unwrap_or_else(|| self.profile.default_binary().to_string());
        let mut spec = self.profile.command(&program, &config)?;
        spec.args.extend(self.settings.extra_args.iter().cloned());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for key in &spec.env_remove {
            cmd.env_remove(key);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|source| AdapterError::SpawnFailed {
            program: spec.program.clone(),
            source,
        })?;
        let handle = ProcessHandle::new();
        info!(
            process = %handle,
            provider = self.profile.provider(),
            session_id = %config.session_id,
            pid = ?child.id(),
            "agent process started"
        );

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(AdapterError::Config("child stdio was not piped".into()));
        };

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let fallback_id = spec
            .seed_session_id
            .clone()
            .unwrap_or_else(|| fallback_session_id(&handle, spawned_at_ms()));
        let entry = Arc::new(ProcessEntry {
            handle: handle.clone(),
            stdin_tx,
            events: Subscribers::default(),
            exit: ExitSignal::default(),
            capture: SessionIdCapture::default(),
            stop: CancellationToken::new(),
            running: AtomicBool::new(true),
            messages_sent: AtomicUsize::new(0),
            pending_permission: Mutex::new(None),
            preamble: Mutex::new(spec.first_message_preamble.clone()),
            initial_prompt: Mutex::new(config.initial_prompt.clone()),
            fallback_id,
        });

        // One-shot session id listener; detaches once the id is seen.
        {
            let profile = self.profile.clone();
            let capture = entry.capture.clone();
            let handle = handle.clone();
            entry.events.add(Arc::new(move |ev: &NormalizedEvent| {
                match profile.session_id_from(ev) {
                    Some(id) => {
                        if capture.resolve(id.clone()) {
                            debug!(process = %handle, provider_session_id = %id, "session id captured");
                        }
                        Listen::Detach
                    }
                    None => Listen::Keep,
                }
            }));
        }

        lock(&self.processes).insert(handle.clone(), entry.clone());

        tokio::spawn(write_stdin(handle.clone(), stdin, stdin_rx));
        let reader = tokio::spawn(read_stdout(
            self.profile.clone(),
            Arc::downgrade(&entry),
            stdout,
            config.transcript_path.clone(),
        ));
        let stderr_tail = tokio::spawn(tail_lines(stderr, STDERR_TAIL_LINES));

        let processes = self.processes.clone();
        tokio::spawn(async move {
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                _ = entry.stop.cancelled() => None,
            };
            let status = match finished {
                Some(status) => status,
                None => match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(process = %entry.handle, "agent ignored stop; killing");
                        let _ = child.start_kill();
                        child.wait().await
                    }
                },
            };
            let _ = reader.await;
            let tail = stderr_tail.await.unwrap_or_default();
            entry.running.store(false, Ordering::SeqCst);

            let outcome = match status {
                Ok(s) if s.success() => ProcessExit::ok(),
                Ok(s) => ProcessExit::failed(s.code(), tail_or(&tail, "agent process failed")),
                Err(e) => ProcessExit::failed(None, format!("could not wait for agent: {e}")),
            };
            info!(process = %entry.handle, code = ?outcome.code, success = outcome.success, "agent process exited");
            entry.exit.fire(outcome);

            tokio::time::sleep(EXITED_LINGER).await;
            let mut map = lock(&processes);
            if map
                .get(&entry.handle)
                .is_some_and(|e| Arc::ptr_eq(e, &entry))
            {
                map.remove(&entry.handle);
            }
        });

        Ok(SpawnedProcess {
            handle,
            session_id: config.session_id,
        })
    }

    async fn send(&self, handle: &ProcessHandle, text: &str) -> Result<(), AdapterError> {
        let entry = self.entry(handle)?;
        if !entry.running.load(Ordering::SeqCst) {
            return Err(AdapterError::StdinClosed(handle.clone()));
        }
        self.enqueue_message(&entry, text)
    }

    async fn send_approval_response(
        &self,
        handle: &ProcessHandle,
        approved: bool,
    ) -> Result<(), AdapterError> {
        let entry = self.entry(handle)?;
        let request = lock(&entry.pending_permission)
            .take()
            .ok_or_else(|| AdapterError::NoPendingPermission(handle.clone()))?;
        let Some(payload) = self.profile.approval_response(&request, approved) else {
            return Err(AdapterError::Unsupported {
                provider: self.profile.provider().to_string(),
                what: "permission responses",
            });
        };
        debug!(process = %handle, request_id = %request.request_id, approved, "permission answered");
        entry
            .stdin_tx
            .send(StdinCommand::Line(payload))
            .map_err(|_| AdapterError::StdinClosed(handle.clone()))
    }

    fn terminate(&self, handle: &ProcessHandle) -> Result<(), AdapterError> {
        let entry = lock(&self.processes)
            .remove(handle)
            .ok_or_else(|| AdapterError::UnknownProcess(handle.clone()))?;
        info!(process = %handle, "terminating agent process");
        let _ = entry.stdin_tx.send(StdinCommand::Close);
        entry.stop.cancel();
        Ok(())
    }

    fn subscribe(
        &self,
        handle: &ProcessHandle,
        on_event: EventListener,
    ) -> Result<Subscription, AdapterError> {
        let entry = self.entry(handle)?;
        let id = entry.events.add(Arc::new(move |ev: &NormalizedEvent| {
            on_event(ev);
            Listen::Keep
        }));
        if let Some(prompt) = lock(&entry.initial_prompt).take() {
            self.enqueue_message(&entry, &prompt)?;
        }
        let weak = Arc::downgrade(&entry);
        Ok(Subscription::new(move || {
            if let Some(entry) = weak.upgrade() {
                entry.events.remove(id);
            }
        }))
    }

    fn subscribe_exit(
        &self,
        handle: &ProcessHandle,
        on_exit: ExitListener,
    ) -> Result<Subscription, AdapterError> {
        let entry = self.entry(handle)?;
        let Some(id) = entry.exit.subscribe(on_exit) else {
            return Ok(Subscription::noop());
        };
        let weak = Arc::downgrade(&entry);
        Ok(Subscription::new(move || {
            if let Some(entry) = weak.upgrade() {
                entry.exit.remove(id);
            }
        }))
    }

    fn is_running(&self, handle: &ProcessHandle) -> bool {
        lock(&self.processes)
            .get(handle)
            .is_some_and(|e| e.running.load(Ordering::SeqCst))
    }

    async fn provider_session_id(
        &self,
        handle: &ProcessHandle,
        wait: Duration,
    ) -> Result<String, AdapterError> {
        let entry = self.entry(handle)?;
        if let Some(id) = entry.capture.get() {
            return Ok(id);
        }
        match entry.capture.wait(wait).await {
            Some(id) => Ok(id),
            None => {
                debug!(process = %handle, "no provider session id; using fallback");
                Ok(entry.fallback_id.clone())
            }
        }
    }
}

fn tail_or(tail: &str, default: &str) -> String {
    if tail.trim().is_empty() {
        default.to_string()
    } else {
        tail.to_string()
    }
}

async fn write_stdin(
    handle: ProcessHandle,
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<StdinCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StdinCommand::Line(line) => {
                let written = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!(process = %handle, error = %e, "stdin write failed");
                    break;
                }
            }
            StdinCommand::Close => break,
        }
    }
    debug!(process = %handle, "stdin closed");
}

/// Split stdout on newlines and dispatch each parsed event. Invalid UTF-8 is
/// replaced rather than aborting the stream.
async fn read_stdout<P: ProviderProfile>(
    profile: Arc<P>,
    entry: Weak<ProcessEntry>,
    stdout: impl AsyncRead + Unpin,
    transcript: Option<std::path::PathBuf>,
) {
    let mut tee = transcript.and_then(open_transcript);
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "stdout read failed");
                break;
            }
        }
        if let Some(w) = tee.as_mut() {
            use std::io::Write;
            let _ = w.write_all(&buf);
            let _ = w.flush();
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(entry) = entry.upgrade() else {
            break;
        };
        for event in profile.parse_line(line) {
            if let Some(request) = PermissionRequest::from_event(&event) {
                *lock(&entry.pending_permission) = Some(request);
            }
            entry.events.emit(&event);
        }
    }
}

/// Best-effort: if the file can't be opened, tee is silently skipped.
fn open_transcript(path: std::path::PathBuf) -> Option<std::io::BufWriter<std::fs::File>> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok()
        .map(std::io::BufWriter::new)
}

async fn tail_lines(stream: impl AsyncRead + Unpin, keep: usize) -> String {
    let mut lines = BufReader::new(stream).lines();
    let mut tail = VecDeque::with_capacity(keep);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    /// Speaks one JSON object per line; `{"sid": ..}` carries the session id.
    struct ShProfile {
        script: String,
    }

    impl ProviderProfile for ShProfile {
        fn provider(&self) -> &'static str {
            "sh"
        }
        fn default_binary(&self) -> &'static str {
            "sh"
        }
        fn command(&self, program: &str, _config: &SpawnConfig) -> Result<CommandSpec, AdapterError> {
            Ok(CommandSpec {
                program: program.to_string(),
                args: vec!["-c".into(), self.script.clone()],
                ..Default::default()
            })
        }
        fn parse_line(&self, line: &str) -> Vec<NormalizedEvent> {
            match serde_json::from_str::<Value>(line) {
                Ok(v) if v.get("perm").is_some() => vec![NormalizedEvent::system(
                    "permission_request",
                    json!({"request_id": v["perm"], "tool_name": "Bash", "input": {}}),
                )],
                Ok(v) => vec![NormalizedEvent::system("line", v)],
                Err(_) => vec![NormalizedEvent::opaque(line)],
            }
        }
        fn session_id_from(&self, event: &NormalizedEvent) -> Option<String> {
            event.content.get("sid")?.as_str().map(String::from)
        }
        fn user_message(&self, _sid: Option<&str>, text: &str) -> String {
            json!({ "text": text }).to_string()
        }
        fn approval_response(&self, request: &PermissionRequest, approved: bool) -> Option<String> {
            Some(json!({ "answer": request.request_id, "approved": approved }).to_string())
        }
    }

    fn adapter(script: &str) -> SubprocessAdapter<ShProfile> {
        SubprocessAdapter::new(
            ShProfile {
                script: script.to_string(),
            },
            ProviderSettings::default(),
        )
    }

    fn config() -> SpawnConfig {
        SpawnConfig {
            provider: "sh".into(),
            working_dir: std::env::temp_dir(),
            session_id: "ses_test".into(),
            ..Default::default()
        }
    }

    fn collect(
        a: &SubprocessAdapter<ShProfile>,
        h: &ProcessHandle,
    ) -> (Arc<Mutex<Vec<NormalizedEvent>>>, tokio::sync::oneshot::Receiver<ProcessExit>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _ = a
            .subscribe(h, Box::new(move |ev: &NormalizedEvent| s.lock().unwrap().push(ev.clone())))
            .unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = a
            .subscribe_exit(h, Box::new(move |exit: &ProcessExit| {
                let _ = tx.send(exit.clone());
            }))
            .unwrap();
        (seen, rx)
    }

    #[tokio::test]
    async fn initial_prompt_is_delivered_on_subscribe_and_echoed() {
        let a = adapter("read line; echo \"$line\"; echo '{\"sid\":\"abc\"}'");
        let mut cfg = config();
        cfg.initial_prompt = Some("hello".into());
        let p = a.spawn(cfg).await.unwrap();
        assert_eq!(p.session_id, "ses_test");
        let (seen, rx) = collect(&a, &p.handle);
        let exit = rx.await.unwrap();
        assert!(exit.success);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].content["text"], "hello");
        assert_eq!(seen[1].content["sid"], "abc");
        let sid = a
            .provider_session_id(&p.handle, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(sid, "abc");
        assert!(!a.is_running(&p.handle));
    }

    #[tokio::test]
    async fn garbage_lines_become_opaque_events() {
        let a = adapter("read _; echo 'not json'; echo '{\"ok\":1}'");
        let mut cfg = config();
        cfg.initial_prompt = Some("go".into());
        let p = a.spawn(cfg).await.unwrap();
        let (seen, rx) = collect(&a, &p.handle);
        rx.await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].subtype(), Some("unparsed"));
        assert_eq!(seen[1].content["ok"], 1);
    }

    #[tokio::test]
    async fn exit_is_sticky_after_process_ends() {
        let a = adapter("exit 3");
        let p = a.spawn(config()).await.unwrap();
        let (_seen, rx) = collect(&a, &p.handle);
        let first = rx.await.unwrap();
        assert_eq!(first.code, Some(3));
        assert!(!first.success);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = a
            .subscribe_exit(&p.handle, Box::new(move |exit: &ProcessExit| {
                let _ = tx.send(exit.code);
            }))
            .unwrap();
        assert_eq!(rx.await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn session_id_falls_back_after_timeout() {
        let a = adapter("sleep 1");
        let p = a.spawn(config()).await.unwrap();
        let sid = a
            .provider_session_id(&p.handle, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(&sid).is_ok());
        a.terminate(&p.handle).unwrap();
    }

    #[tokio::test]
    async fn terminate_forgets_handle_but_still_fires_exit() {
        let a = adapter("cat > /dev/null");
        let p = a.spawn(config()).await.unwrap();
        let (_seen, rx) = collect(&a, &p.handle);
        assert!(a.is_running(&p.handle));
        a.terminate(&p.handle).unwrap();
        assert!(!a.is_running(&p.handle));
        assert!(matches!(
            a.send(&p.handle, "x").await,
            Err(AdapterError::UnknownProcess(_))
        ));
        let exit = tokio::time::timeout(Duration::from_secs(10), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(exit.success);
    }

    #[tokio::test]
    async fn permission_prompt_is_answered_once() {
        let a = adapter("read _; echo '{\"perm\":\"req-1\"}'; read answer; echo \"$answer\"");
        let mut cfg = config();
        cfg.initial_prompt = Some("go".into());
        let p = a.spawn(cfg).await.unwrap();
        let (seen, rx) = {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let s = seen.clone();
            let (ptx, prx) = tokio::sync::oneshot::channel::<()>();
            let ptx = Mutex::new(Some(ptx));
            let _ = a
                .subscribe(&p.handle, Box::new(move |ev: &NormalizedEvent| {
                    if PermissionRequest::from_event(ev).is_some() {
                        if let Some(tx) = ptx.lock().unwrap().take() {
                            let _ = tx.send(());
                        }
                    }
                    s.lock().unwrap().push(ev.clone());
                }))
                .unwrap();
            (seen, prx)
        };
        rx.await.unwrap();
        a.send_approval_response(&p.handle, true).await.unwrap();
        assert!(matches!(
            a.send_approval_response(&p.handle, false).await,
            Err(AdapterError::NoPendingPermission(_))
        ));

        for _ in 0..100 {
            if seen.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen[1].content["answer"], "req-1");
        assert_eq!(seen[1].content["approved"], true);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let a = SubprocessAdapter::new(
            ShProfile {
                script: String::new(),
            },
            ProviderSettings {
                binary: Some("/nonexistent/warden-test-binary".into()),
                extra_args: vec![],
            },
        );
        let err = a.spawn(config()).await.unwrap_err();
        assert!(matches!(err, AdapterError::SpawnFailed { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn transcript_receives_raw_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("t.jsonl");
        let a = adapter("echo '{\"a\":1}'");
        let mut cfg = config();
        cfg.transcript_path = Some(path.clone());
        let p = a.spawn(cfg).await.unwrap();
        let (_seen, rx) = collect(&a, &p.handle);
        rx.await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n");
    }
}
