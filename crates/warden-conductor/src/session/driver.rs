//! Per-session event loop: turns adapter events into pending operations,
//! diffs, messages and, at exit, an approval.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warden_core::{
    new_id, now_rfc3339, BusEvent, Diff, DiffRepository, EventBus, EventKind, Message,
    MessageRepository, MessageRole, NormalizedEvent, ProcessHandle, Session, SessionRepository,
    SessionStatus, Store,
};

use crate::adapter::{PermissionRequest, ProcessAdapter, ProcessExit};
use crate::approval::ApprovalService;
use crate::pipeline::PendingOperationPipeline;

pub const BYPASS_PERMISSIONS: &str = "bypassPermissions";

#[derive(Debug)]
pub(crate) enum DriverInput {
    Event(NormalizedEvent),
    Exit(ProcessExit),
}

/// Everything a driver needs besides the session itself.
#[derive(Clone)]
pub(crate) struct DriverContext {
    pub store: Arc<dyn Store>,
    pub adapter: Arc<dyn ProcessAdapter>,
    pub pipeline: Arc<PendingOperationPipeline>,
    pub approvals: Arc<ApprovalService>,
    pub bus: Arc<dyn EventBus>,
    pub auto_commit: bool,
    pub permission_mode: Option<String>,
}

/// Queue `handle`'s events and exit, in order. Subscribing to events
/// delivers the initial prompt, so this must happen before anything waits
/// on the process.
pub(crate) fn attach(
    adapter: &dyn ProcessAdapter,
    handle: &ProcessHandle,
) -> mpsc::UnboundedReceiver<DriverInput> {
    let (tx, rx) = mpsc::unbounded_channel();

    let exit_tx = tx.clone();
    if let Err(e) = adapter.subscribe_exit(
        handle,
        Box::new(move |exit: &ProcessExit| {
            let _ = exit_tx.send(DriverInput::Exit(exit.clone()));
        }),
    ) {
        // The router resolves exited processes too; only a terminated one is unknown.
        debug!(process = %handle, error = %e, "process gone before supervision");
        let _ = tx.send(DriverInput::Exit(ProcessExit::failed(
            None,
            format!("process exited before it could be supervised: {e}"),
        )));
        return rx;
    }

    let event_tx = tx;
    if let Err(e) = adapter.subscribe(
        handle,
        Box::new(move |event: &NormalizedEvent| {
            let _ = event_tx.send(DriverInput::Event(event.clone()));
        }),
    ) {
        debug!(process = %handle, error = %e, "event subscription failed");
    }
    rx
}

/// Drive `session` until its process exits; returns the finalized session.
pub(crate) async fn run(
    ctx: DriverContext,
    mut session: Session,
    mut inputs: mpsc::UnboundedReceiver<DriverInput>,
) -> Session {
    let exit = loop {
        match inputs.recv().await {
            Some(DriverInput::Event(event)) => ctx.handle_event(&mut session, event).await,
            Some(DriverInput::Exit(exit)) => break exit,
            None => break ProcessExit::failed(None, "event stream closed without exit"),
        }
    };
    finalize(&ctx, session, exit).await
}

impl DriverContext {
    async fn handle_event(&self, session: &mut Session, event: NormalizedEvent) {
        match event.kind {
            EventKind::ToolUse => {
                self.pipeline.store_pending_operation(&session.id, &event);
            }
            EventKind::ToolResult => {
                let Some(result) = event.as_tool_result() else {
                    return;
                };
                if result.is_error {
                    self.pipeline.discard_operation(&result.tool_use_id);
                    return;
                }
                for diff in self.pipeline.confirm_operation(&result.tool_use_id) {
                    self.record_diff(diff).await;
                }
            }
            EventKind::Message => {
                if let Some(text) = event.text().filter(|t| !t.is_empty()) {
                    self.record_message(&session.id, MessageRole::Assistant, text)
                        .await;
                }
            }
            EventKind::Result => {
                let text = event.text().map(String::from);
                if let Some(cost) = event.content.get("total_cost_usd").and_then(|v| v.as_f64()) {
                    session.cost_usd = Some(cost);
                }
                let is_error = event
                    .content
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if is_error {
                    session.error = Some(text.unwrap_or_else(|| "agent reported an error".into()));
                } else if text.is_some() {
                    session.summary = text;
                }
            }
            EventKind::System => {
                if let Some(request) = PermissionRequest::from_event(&event) {
                    self.answer_permission(session, request).await;
                }
            }
            EventKind::Thinking | EventKind::PartialStreamDelta => {}
        }
    }

    async fn record_diff(&self, diff: Diff) {
        if let Err(e) = self.store.put_diff(&diff).await {
            warn!(diff_id = %diff.id, error = %e, "failed to persist diff");
            return;
        }
        self.bus.publish(BusEvent::DiffCreated {
            diff_id: diff.id.clone(),
            session_id: diff.session_id.clone(),
            task_id: diff.task_id.clone(),
            file_path: diff.file_path.clone(),
            kind: diff.kind,
        });
        if self.auto_commit {
            if let Err(e) = self.approvals.auto_commit(&diff).await {
                warn!(diff_id = %diff.id, error = %e, "auto-commit failed");
            }
        }
    }

    async fn record_message(&self, session_id: &str, role: MessageRole, content: &str) {
        let message = Message {
            id: new_id("msg"),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now_rfc3339(),
        };
        if let Err(e) = self.store.append_message(&message).await {
            warn!(session_id, error = %e, "failed to record message");
        }
    }

    async fn answer_permission(&self, session: &Session, request: PermissionRequest) {
        let Some(handle) = session.process_handle.as_ref() else {
            return;
        };
        if self.permission_mode.as_deref() == Some(BYPASS_PERMISSIONS) {
            if let Err(e) = self.adapter.send_approval_response(handle, true).await {
                warn!(session_id = %session.id, error = %e, "failed to allow tool");
            }
            return;
        }
        self.bus.publish(BusEvent::PermissionRequested {
            session_id: session.id.clone(),
            request_id: request.request_id,
            tool_name: request.tool_name,
            input: request.input,
        });
    }
}

/// Close out `session` after its process is gone or never started.
pub(crate) async fn finalize(ctx: &DriverContext, mut session: Session, exit: ProcessExit) -> Session {
    ctx.pipeline.release_session(&session.id);

    if !exit.success {
        session.error = exit
            .error
            .or(session.error)
            .or_else(|| Some(format!("process exited with status {:?}", exit.code)));
    }
    session.status = if exit.success && session.error.is_none() {
        SessionStatus::Completed
    } else {
        SessionStatus::Failed
    };
    session.ended_at = Some(now_rfc3339());
    if let Err(e) = ctx.store.put_session(&session).await {
        warn!(session_id = %session.id, error = %e, "failed to persist finished session");
    }
    info!(
        session_id = %session.id,
        task_id = %session.task_id,
        status = ?session.status,
        "session finished"
    );
    ctx.bus.publish(BusEvent::SessionStatusChanged {
        session_id: session.id.clone(),
        task_id: session.task_id.clone(),
        status: session.status,
    });

    if !ctx.auto_commit {
        if let Err(e) = ctx.approvals.upsert_for_task(&session.task_id, &session).await {
            warn!(task_id = %session.task_id, error = %e, "failed to update approval");
        }
    }
    session
}
