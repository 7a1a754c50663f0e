use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_core::{NormalizedEvent, ProcessHandle};

use super::subscribers::{lock, ExitSignal, Listen, Subscribers, Subscription};
use super::{
    AdapterError, EventListener, ExitListener, ProcessAdapter, ProcessExit, SpawnConfig,
    SpawnedProcess,
};

struct MockProcess {
    events: Subscribers<NormalizedEvent>,
    exit: ExitSignal,
    provider_session_id: Option<String>,
    initial_prompt: Mutex<Option<String>>,
    script: Mutex<Option<Vec<NormalizedEvent>>>,
    sent: Mutex<Vec<String>>,
    approvals: Mutex<Vec<bool>>,
}

/// Scripted adapter for tests and dry runs. Each spawn takes the next queued
/// script; the script plays back (then the process exits cleanly) as soon as
/// the first message reaches the process.
pub struct MockAdapter {
    provider: String,
    processes: Mutex<HashMap<ProcessHandle, Arc<MockProcess>>>,
    scripts: Mutex<VecDeque<Vec<NormalizedEvent>>>,
    spawn_failures: Mutex<VecDeque<String>>,
    crashes: Mutex<VecDeque<ProcessExit>>,
    spawned: Mutex<Vec<SpawnConfig>>,
    withhold_session_id: Mutex<bool>,
}

impl MockAdapter {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            processes: Mutex::new(HashMap::new()),
            scripts: Mutex::new(VecDeque::new()),
            spawn_failures: Mutex::new(VecDeque::new()),
            crashes: Mutex::new(VecDeque::new()),
            spawned: Mutex::new(Vec::new()),
            withhold_session_id: Mutex::new(false),
        }
    }

    /// Queue the events the next spawned process emits.
    pub fn push_script(&self, events: Vec<NormalizedEvent>) {
        lock(&self.scripts).push_back(events);
    }

    pub fn fail_next_spawn(&self, message: &str) {
        lock(&self.spawn_failures).push_back(message.to_string());
    }

    /// The next spawned process has already exited with `exit` by the time
    /// `spawn` returns.
    pub fn crash_next_spawn(&self, exit: ProcessExit) {
        lock(&self.crashes).push_back(exit);
    }

    /// Stop reporting provider session ids, so callers hit the fallback.
    pub fn withhold_session_ids(&self) {
        *lock(&self.withhold_session_id) = true;
    }

    pub fn spawned(&self) -> Vec<SpawnConfig> {
        lock(&self.spawned).clone()
    }

    pub fn sent(&self, handle: &ProcessHandle) -> Vec<String> {
        self.process(handle)
            .map(|p| lock(&p.sent).clone())
            .unwrap_or_default()
    }

    pub fn approvals(&self, handle: &ProcessHandle) -> Vec<bool> {
        self.process(handle)
            .map(|p| lock(&p.approvals).clone())
            .unwrap_or_default()
    }

    /// Deliver `event` to the process's subscribers.
    pub fn emit(&self, handle: &ProcessHandle, event: NormalizedEvent) -> Result<(), AdapterError> {
        self.process(handle)?.events.emit(&event);
        Ok(())
    }

    pub fn exit(&self, handle: &ProcessHandle, outcome: ProcessExit) -> Result<(), AdapterError> {
        self.process(handle)?.exit.fire(outcome);
        Ok(())
    }

    fn process(&self, handle: &ProcessHandle) -> Result<Arc<MockProcess>, AdapterError> {
        lock(&self.processes)
            .get(handle)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownProcess(handle.clone()))
    }

    fn deliver(&self, process: &Arc<MockProcess>, text: String) {
        lock(&process.sent).push(text);
        if let Some(script) = lock(&process.script).take() {
            let process = process.clone();
            tokio::spawn(async move {
                for event in &script {
                    process.events.emit(event);
                }
                process.exit.fire(ProcessExit::ok());
            });
        }
    }
}

#[async_trait::async_trait]
impl ProcessAdapter for MockAdapter {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnedProcess, AdapterError> {
        if let Some(message) = lock(&self.spawn_failures).pop_front() {
            return Err(AdapterError::SpawnFailed {
                program: self.provider.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
            });
        }
        let handle = ProcessHandle::new();
        let provider_session_id = if *lock(&self.withhold_session_id) {
            None
        } else {
            Some(
                config
                    .resume_session_id
                    .clone()
                    .filter(|_| !config.fork)
                    .unwrap_or_else(|| format!("mock-{}", config.session_id)),
            )
        };
        let process = Arc::new(MockProcess {
            events: Subscribers::default(),
            exit: ExitSignal::default(),
            provider_session_id,
            initial_prompt: Mutex::new(config.initial_prompt.clone()),
            script: Mutex::new(lock(&self.scripts).pop_front()),
            sent: Mutex::new(Vec::new()),
            approvals: Mutex::new(Vec::new()),
        });
        if let Some(exit) = lock(&self.crashes).pop_front() {
            process.exit.fire(exit);
        }
        lock(&self.processes).insert(handle.clone(), process);
        let session_id = config.session_id.clone();
        lock(&self.spawned).push(config);
        Ok(SpawnedProcess { handle, session_id })
    }

    async fn send(&self, handle: &ProcessHandle, text: &str) -> Result<(), AdapterError> {
        let process = self.process(handle)?;
        if process.exit.outcome().is_some() {
            return Err(AdapterError::StdinClosed(handle.clone()));
        }
        self.deliver(&process, text.to_string());
        Ok(())
    }

    async fn send_approval_response(
        &self,
        handle: &ProcessHandle,
        approved: bool,
    ) -> Result<(), AdapterError> {
        lock(&self.process(handle)?.approvals).push(approved);
        Ok(())
    }

    fn terminate(&self, handle: &ProcessHandle) -> Result<(), AdapterError> {
        let process = lock(&self.processes)
            .remove(handle)
            .ok_or_else(|| AdapterError::UnknownProcess(handle.clone()))?;
        process
            .exit
            .fire(ProcessExit::failed(None, "terminated"));
        Ok(())
    }

    fn subscribe(
        &self,
        handle: &ProcessHandle,
        on_event: EventListener,
    ) -> Result<Subscription, AdapterError> {
        let process = self.process(handle)?;
        let id = process.events.add(Arc::new(move |ev: &NormalizedEvent| {
            on_event(ev);
            Listen::Keep
        }));
        if let Some(prompt) = lock(&process.initial_prompt).take() {
            self.deliver(&process, prompt);
        }
        let weak = Arc::downgrade(&process);
        Ok(Subscription::new(move || {
            if let Some(p) = weak.upgrade() {
                p.events.remove(id);
            }
        }))
    }

    fn subscribe_exit(
        &self,
        handle: &ProcessHandle,
        on_exit: ExitListener,
    ) -> Result<Subscription, AdapterError> {
        let process = self.process(handle)?;
        let Some(id) = process.exit.subscribe(on_exit) else {
            return Ok(Subscription::noop());
        };
        let weak = Arc::downgrade(&process);
        Ok(Subscription::new(move || {
            if let Some(p) = weak.upgrade() {
                p.exit.remove(id);
            }
        }))
    }

    fn is_running(&self, handle: &ProcessHandle) -> bool {
        self.process(handle)
            .is_ok_and(|p| p.exit.outcome().is_none())
    }

    async fn provider_session_id(
        &self,
        handle: &ProcessHandle,
        wait: Duration,
    ) -> Result<String, AdapterError> {
        let process = self.process(handle)?;
        match &process.provider_session_id {
            Some(id) => Ok(id.clone()),
            None => {
                tokio::time::sleep(wait).await;
                Ok(super::fallback_session_id(handle, 0))
            }
        }
    }
}
