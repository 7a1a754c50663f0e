//! Handle-keyed dispatch over the registered provider adapters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;
use warden_core::ProcessHandle;

use crate::adapter::{
    AdapterError, EventListener, ExitListener, ProcessAdapter, ProcessExit, SpawnConfig,
    SpawnedProcess, Subscription,
};

/// Provider per handle. Exited processes move to `exited` so late
/// subscribers still receive their recorded exit.
#[derive(Default)]
struct Ownership {
    live: HashMap<ProcessHandle, String>,
    exited: HashMap<ProcessHandle, String>,
}

type Owners = Arc<RwLock<Ownership>>;

/// Routes every call to the adapter that spawned the handle.
#[derive(Default)]
pub struct ProviderRouter {
    adapters: HashMap<String, Arc<dyn ProcessAdapter>>,
    owners: Owners,
}

fn release(owners: &Owners, handle: &ProcessHandle) {
    let mut owners = owners.write().unwrap_or_else(|e| e.into_inner());
    if let Some(provider) = owners.live.remove(handle) {
        debug!(process = %handle, "released process ownership");
        owners.exited.insert(handle.clone(), provider);
    }
}

fn forget(owners: &Owners, handle: &ProcessHandle) {
    let mut owners = owners.write().unwrap_or_else(|e| e.into_inner());
    owners.live.remove(handle);
    owners.exited.remove(handle);
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under its provider name, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ProcessAdapter>) {
        self.adapters.insert(adapter.provider().to_string(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProcessAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.adapters.contains_key(provider)
    }

    /// Provider owning `handle` while its process runs.
    pub fn owner(&self, handle: &ProcessHandle) -> Option<String> {
        self.owners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .live
            .get(handle)
            .cloned()
    }

    fn adapter_for(&self, handle: &ProcessHandle) -> Result<&Arc<dyn ProcessAdapter>, AdapterError> {
        self.owner(handle)
            .and_then(|provider| self.adapters.get(&provider))
            .ok_or_else(|| AdapterError::UnknownProcess(handle.clone()))
    }

    /// Like `adapter_for`, but also resolves processes that already exited.
    fn spawner_of(&self, handle: &ProcessHandle) -> Result<&Arc<dyn ProcessAdapter>, AdapterError> {
        let provider = {
            let owners = self.owners.read().unwrap_or_else(|e| e.into_inner());
            owners
                .live
                .get(handle)
                .or_else(|| owners.exited.get(handle))
                .cloned()
        };
        provider
            .and_then(|provider| self.adapters.get(&provider))
            .ok_or_else(|| AdapterError::UnknownProcess(handle.clone()))
    }
}

#[async_trait::async_trait]
impl ProcessAdapter for ProviderRouter {
    fn provider(&self) -> &str {
        "router"
    }

    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnedProcess, AdapterError> {
        let adapter = self
            .adapters
            .get(&config.provider)
            .ok_or_else(|| AdapterError::UnknownProvider(config.provider.clone()))?;
        let provider = config.provider.clone();
        let spawned = adapter.spawn(config).await?;
        self.owners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .live
            .insert(spawned.handle.clone(), provider);

        let owners = self.owners.clone();
        let handle = spawned.handle.clone();
        // Sticky: fires at once if the process is already gone.
        adapter.subscribe_exit(
            &spawned.handle,
            Box::new(move |_: &ProcessExit| release(&owners, &handle)),
        )?;
        Ok(spawned)
    }

    async fn send(&self, handle: &ProcessHandle, text: &str) -> Result<(), AdapterError> {
        self.adapter_for(handle)?.send(handle, text).await
    }

    async fn send_approval_response(
        &self,
        handle: &ProcessHandle,
        approved: bool,
    ) -> Result<(), AdapterError> {
        self.adapter_for(handle)?
            .send_approval_response(handle, approved)
            .await
    }

    fn terminate(&self, handle: &ProcessHandle) -> Result<(), AdapterError> {
        let adapter = self.adapter_for(handle)?.clone();
        forget(&self.owners, handle);
        adapter.terminate(handle)
    }

    fn subscribe(
        &self,
        handle: &ProcessHandle,
        on_event: EventListener,
    ) -> Result<Subscription, AdapterError> {
        self.spawner_of(handle)?.subscribe(handle, on_event)
    }

    fn subscribe_exit(
        &self,
        handle: &ProcessHandle,
        on_exit: ExitListener,
    ) -> Result<Subscription, AdapterError> {
        self.spawner_of(handle)?.subscribe_exit(handle, on_exit)
    }

    fn is_running(&self, handle: &ProcessHandle) -> bool {
        self.adapter_for(handle)
            .is_ok_and(|adapter| adapter.is_running(handle))
    }

    async fn provider_session_id(
        &self,
        handle: &ProcessHandle,
        wait: Duration,
    ) -> Result<String, AdapterError> {
        self.spawner_of(handle)?
            .provider_session_id(handle, wait)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;

    fn router() -> (ProviderRouter, Arc<MockAdapter>, Arc<MockAdapter>) {
        let a = Arc::new(MockAdapter::new("alpha"));
        let b = Arc::new(MockAdapter::new("beta"));
        let router = ProviderRouter::new().with(a.clone()).with(b.clone());
        (router, a, b)
    }

    fn config(provider: &str) -> SpawnConfig {
        SpawnConfig {
            provider: provider.into(),
            session_id: "ses_1".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dispatches_to_owning_adapter() {
        let (router, a, b) = router();
        let p = router.spawn(config("beta")).await.unwrap();
        assert_eq!(router.owner(&p.handle).as_deref(), Some("beta"));
        router.send(&p.handle, "hello").await.unwrap();
        assert_eq!(b.sent(&p.handle), ["hello"]);
        assert!(a.sent(&p.handle).is_empty());
        assert_eq!(router.providers(), ["alpha", "beta"]);
    }

    #[tokio::test]
    async fn unknown_provider_and_handle() {
        let (router, _, _) = router();
        assert!(matches!(
            router.spawn(config("gamma")).await,
            Err(AdapterError::UnknownProvider(p)) if p == "gamma"
        ));
        let ghost = ProcessHandle::from("proc_ghost");
        assert!(matches!(
            router.send(&ghost, "x").await,
            Err(AdapterError::UnknownProcess(_))
        ));
        assert!(!router.is_running(&ghost));
    }

    #[tokio::test]
    async fn ownership_released_on_exit() {
        let (router, a, _) = router();
        let p = router.spawn(config("alpha")).await.unwrap();
        assert!(router.is_running(&p.handle));
        a.exit(&p.handle, ProcessExit::ok()).unwrap();
        assert!(router.owner(&p.handle).is_none());
        assert!(matches!(
            router.send(&p.handle, "late").await,
            Err(AdapterError::UnknownProcess(_))
        ));
    }

    #[tokio::test]
    async fn ownership_released_on_terminate() {
        let (router, a, _) = router();
        let p = router.spawn(config("alpha")).await.unwrap();
        router.terminate(&p.handle).unwrap();
        assert!(router.owner(&p.handle).is_none());
        assert!(!a.is_running(&p.handle));
        assert!(matches!(
            router.terminate(&p.handle),
            Err(AdapterError::UnknownProcess(_))
        ));
    }

    #[tokio::test]
    async fn spawn_failure_records_no_owner() {
        let (router, a, _) = router();
        a.fail_next_spawn("boom");
        assert!(router.spawn(config("alpha")).await.is_err());
        assert!(router.owners.read().unwrap().live.is_empty());
    }

    #[tokio::test]
    async fn late_exit_subscriber_sees_the_recorded_exit() {
        let (router, a, _) = router();
        let p = router.spawn(config("alpha")).await.unwrap();
        a.exit(&p.handle, ProcessExit::failed(Some(3), "boom")).unwrap();
        assert!(router.owner(&p.handle).is_none());

        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = seen.clone();
        router
            .subscribe_exit(
                &p.handle,
                Box::new(move |exit: &ProcessExit| {
                    *sink.lock().unwrap() = Some(exit.clone());
                }),
            )
            .unwrap();
        let exit = seen.lock().unwrap().clone().unwrap();
        assert_eq!(exit.code, Some(3));
        assert_eq!(exit.error.as_deref(), Some("boom"));

        router.terminate(&p.handle).unwrap_err();
        assert!(router
            .subscribe_exit(&ProcessHandle::from("proc_ghost"), Box::new(|_: &ProcessExit| {}))
            .is_err());
    }
}
