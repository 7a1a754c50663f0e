use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;
use warden_core::ProcessHandle;

/// Fixed namespace UUID for synthetic provider session ids.
const WARDEN_NS: Uuid = Uuid::from_bytes([
    0x3a, 0x7d, 0xe0, 0x5d, 0x00, 0x00, 0x40, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
]);

/// Deterministic session id for a process whose provider never reported one.
pub fn fallback_session_id(handle: &ProcessHandle, spawned_at_ms: i128) -> String {
    Uuid::new_v5(&WARDEN_NS, format!("{handle}-{spawned_at_ms}").as_bytes()).to_string()
}

/// Single-resolution cell for the provider session id.
#[derive(Clone)]
pub(crate) struct SessionIdCapture {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for SessionIdCapture {
    fn default() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(None)),
        }
    }
}

impl SessionIdCapture {
    /// Store the id if none is set yet. Returns whether this call set it.
    pub fn resolve(&self, id: String) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(id);
            true
        })
    }

    pub fn get(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub async fn wait(&self, timeout: Duration) -> Option<String> {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(value)) => value.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_deterministic_per_handle_and_time() {
        let h = ProcessHandle::from("proc_1");
        assert_eq!(fallback_session_id(&h, 42), fallback_session_id(&h, 42));
        assert_ne!(fallback_session_id(&h, 42), fallback_session_id(&h, 43));
        let id = Uuid::parse_str(&fallback_session_id(&h, 42)).unwrap();
        assert_eq!(id.get_version_num(), 5);
    }

    #[test]
    fn resolves_once() {
        let cap = SessionIdCapture::default();
        assert!(cap.resolve("first".into()));
        assert!(!cap.resolve("second".into()));
        assert_eq!(cap.get().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn waiter_is_woken_by_resolve() {
        let cap = SessionIdCapture::default();
        let c = cap.clone();
        let waiter = tokio::spawn(async move { c.wait(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cap.resolve("sid".into());
        assert_eq!(waiter.await.unwrap().as_deref(), Some("sid"));
    }

    #[tokio::test]
    async fn wait_times_out_without_id() {
        let cap = SessionIdCapture::default();
        assert!(cap.wait(Duration::from_millis(20)).await.is_none());
    }
}
