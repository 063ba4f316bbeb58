//! Reply orchestration.
//!
//! Every inbound message is recorded into the group's current session. The
//! engagement gate then decides whether to reply; if so, a reply is scheduled
//! on the group's debouncer. When the quiet period ends the context is built,
//! the backend is called without holding the session lock, and the reply is
//! sent and recorded into the session that was current when it was scheduled.

use crate::commands::{self, SessionCommand};
use crate::context::ContextBuilder;
use crate::debounce::Debouncer;
use crate::gate::EngagementGate;
use crate::mention;
use crate::provider::ChatProvider;
use crate::session::{SessionManager, SessionStore, StoreError, ASSISTANT_SPEAKER_ID};
use crate::transport::{ChatTransport, IncomingMessage, OutgoingReply};
use chatter_common::Config;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Tunables of the reply pipeline.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub context: ContextBuilder,
    pub gate: EngagementGate,
    pub quiet_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            context: ContextBuilder::default(),
            gate: EngagementGate::default(),
            quiet_interval: Duration::from_secs(4),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            context: ContextBuilder::new(config.context.char_budget),
            gate: EngagementGate::from_config(&config.engagement),
            quiet_interval: config.debounce.quiet_interval(),
        }
    }
}

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Nothing to record (empty after flattening)
    Ignored,
    /// Recorded; the gate declined to reply
    Recorded,
    /// Recorded and a reply was scheduled
    ReplyScheduled,
}

/// Reply captured at trigger time.
#[derive(Debug, Clone)]
struct PendingReply {
    group_id: i64,
    session_id: String,
    sender_id: i64,
    directed_at_bot: bool,
}

/// Counts scheduled replies that have neither finished nor been superseded.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Held by a scheduled reply future; released when it completes or is dropped.
struct InFlightGuard(Arc<Inner>);

impl InFlightGuard {
    fn new(inner: &Arc<Inner>) -> Self {
        inner.in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(inner))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.in_flight.idle.notify_waiters();
        }
    }
}

struct Inner {
    sessions: Mutex<SessionManager>,
    store: SessionStore,
    provider: Arc<dyn ChatProvider>,
    transport: Arc<dyn ChatTransport>,
    settings: OrchestratorSettings,
    debouncers: DashMap<i64, Debouncer>,
    in_flight: InFlight,
}

/// Drives the record, gate, debounce, reply pipeline for all groups.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReplyOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReplyOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyOrchestrator")
            .field("provider", &self.inner.provider.name())
            .field("transport", &self.inner.transport.name())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl ReplyOrchestrator {
    pub fn new(
        sessions: SessionManager,
        store: SessionStore,
        provider: Arc<dyn ChatProvider>,
        transport: Arc<dyn ChatTransport>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(sessions),
                store,
                provider,
                transport,
                settings,
                debouncers: DashMap::new(),
                in_flight: InFlight::default(),
            }),
        }
    }

    /// Restore sessions from `store` and build an orchestrator around them.
    pub fn load(
        store: SessionStore,
        default_persona: &str,
        provider: Arc<dyn ChatProvider>,
        transport: Arc<dyn ChatTransport>,
        settings: OrchestratorSettings,
    ) -> Result<Self, StoreError> {
        let sessions = store.load(default_persona)?;
        Ok(Self::new(sessions, store, provider, transport, settings))
    }

    /// Run `f` against the session state.
    pub async fn with_sessions<R>(&self, f: impl FnOnce(&SessionManager) -> R) -> R {
        let sessions = self.inner.sessions.lock().await;
        f(&sessions)
    }

    /// Persist the current session state.
    ///
    /// The state is snapshotted under the session lock and written after the
    /// lock is released.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let snapshot = {
            let sessions = self.inner.sessions.lock().await;
            self.inner.store.snapshot(&sessions)?
        };
        self.inner.store.write(snapshot).await
    }

    async fn persist_or_log(&self) {
        if let Err(e) = self.persist().await {
            tracing::error!(error = %e, "Failed to persist sessions");
        }
    }

    /// Whether no reply is waiting or running.
    pub fn is_idle(&self) -> bool {
        self.inner.in_flight.count.load(Ordering::SeqCst) == 0
    }

    /// Wait until every scheduled reply has been sent or superseded.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.inner.in_flight.idle.notified();
            if self.is_idle() {
                return;
            }
            idle.await;
        }
    }

    /// Record an inbound message and schedule a reply when the gate allows.
    pub async fn record_and_maybe_reply(&self, message: IncomingMessage) -> MessageOutcome {
        let text = message.text();
        if text.is_empty() {
            tracing::trace!(group_id = message.group_id, "Ignoring empty message");
            return MessageOutcome::Ignored;
        }

        let (session_id, history_len) = {
            let mut sessions = self.inner.sessions.lock().await;
            let session = sessions.current_or_create(message.group_id);
            let len = session.add_history(message.sender_id, text, message.directed_at_bot);
            (session.id().to_string(), len)
        };

        if !self
            .inner
            .settings
            .gate
            .should_engage(message.directed_at_bot, history_len)
        {
            tracing::debug!(
                group_id = message.group_id,
                session_id = %session_id,
                history_len,
                "Gate declined to reply"
            );
            return MessageOutcome::Recorded;
        }

        let pending = PendingReply {
            group_id: message.group_id,
            session_id,
            sender_id: message.sender_id,
            directed_at_bot: message.directed_at_bot,
        };
        tracing::debug!(
            group_id = pending.group_id,
            session_id = %pending.session_id,
            directed = pending.directed_at_bot,
            "Scheduling reply"
        );

        let this = self.clone();
        let guard = InFlightGuard::new(&self.inner);
        self.inner
            .debouncers
            .entry(message.group_id)
            .or_insert_with(|| Debouncer::new(self.inner.settings.quiet_interval))
            .trigger(async move {
                this.reply(pending).await;
                drop(guard);
            });

        MessageOutcome::ReplyScheduled
    }

    async fn reply(&self, pending: PendingReply) {
        let turns = {
            let sessions = self.inner.sessions.lock().await;
            match sessions.get(&pending.session_id) {
                Some(session) => self.inner.settings.context.build(session),
                None => {
                    tracing::warn!(session_id = %pending.session_id, "Session vanished before reply");
                    return;
                }
            }
        };
        if turns.is_empty() {
            tracing::debug!(session_id = %pending.session_id, "Empty context, skipping backend call");
            return;
        }

        let answer = match self.inner.provider.chat(&turns).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(
                    group_id = pending.group_id,
                    provider = self.inner.provider.name(),
                    error = %e,
                    "Backend call failed"
                );
                self.send(OutgoingReply::text(pending.group_id, e.user_notice()))
                    .await;
                return;
            }
        };

        if answer.trim().is_empty() {
            tracing::warn!(group_id = pending.group_id, "Backend returned an empty reply");
            return;
        }

        let reply = OutgoingReply {
            group_id: pending.group_id,
            at_sender: pending.directed_at_bot.then_some(pending.sender_id),
            segments: mention::parse_reply(&answer),
        };
        self.send(reply).await;

        let recorded = self.inner.sessions.lock().await.add_history(
            &pending.session_id,
            ASSISTANT_SPEAKER_ID,
            answer,
            false,
        );
        if let Err(e) = recorded {
            tracing::warn!(error = %e, "Failed to record reply");
            return;
        }
        self.persist_or_log().await;
    }

    async fn send(&self, reply: OutgoingReply) {
        let group_id = reply.group_id;
        if let Err(e) = self.inner.transport.send(reply).await {
            tracing::warn!(
                group_id,
                transport = self.inner.transport.name(),
                error = %e,
                "Failed to send reply"
            );
        }
    }

    /// Run a session command for `group_id` and return the reply text.
    ///
    /// State is persisted after commands that change it.
    pub async fn execute(&self, group_id: i64, command: SessionCommand) -> String {
        if let SessionCommand::Help { question } = &command {
            return match self.inner.provider.ask(&commands::help_prompt(question)).await {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::warn!(error = %e, "Help request failed");
                    e.user_notice()
                }
            };
        }

        let outcome = commands::run(&mut *self.inner.sessions.lock().await, group_id, &command);
        if outcome.changed {
            self.persist_or_log().await;
        }
        tracing::info!(group_id, ?command, changed = outcome.changed, "Executed session command");
        outcome.reply
    }
}
