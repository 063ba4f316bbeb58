//! End-to-end tests of the record, gate, debounce, reply pipeline.

use async_trait::async_trait;
use chatter_common::config::BackendConfig;
use chatter_core::session::ASSISTANT_SPEAKER_ID;
use chatter_core::{
    ChatProvider, ChatTransport, ContextBuilder, EngagementGate, IncomingMessage,
    MemoryBlobStore, MessageOutcome, OpenAiProvider, OrchestratorSettings, OutgoingReply,
    ProviderError, ReplyOrchestrator, Segment, SessionCommand, SessionManager, SessionStore,
    TransportResult, Turn,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

const GROUP: i64 = 1000;
const BOT: i64 = 42;

/// Backend that answers from a script and remembers what it was asked.
struct ScriptedProvider {
    answer: Mutex<Result<String, ProviderError>>,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedProvider {
    fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Ok(answer.to_string())),
            calls: Mutex::default(),
        })
    }

    fn failing(error: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Err(error)),
            calls: Mutex::default(),
        })
    }

    fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, turns: &[Turn]) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(turns.to_vec());
        self.answer.lock().unwrap().clone()
    }
}

/// Transport that keeps every reply it is asked to send.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutgoingReply>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<OutgoingReply> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, reply: OutgoingReply) -> TransportResult<()> {
        self.sent.lock().unwrap().push(reply);
        Ok(())
    }
}

struct Harness {
    orchestrator: ReplyOrchestrator,
    provider: Arc<ScriptedProvider>,
    transport: Arc<RecordingTransport>,
    store: SessionStore,
}

fn harness(provider: Arc<ScriptedProvider>, gate: EngagementGate) -> Harness {
    let transport = Arc::new(RecordingTransport::default());
    let store = SessionStore::new(Arc::new(MemoryBlobStore::new()));
    let settings = OrchestratorSettings {
        context: ContextBuilder::new(2000),
        gate,
        quiet_interval: Duration::from_secs(4),
    };
    let orchestrator = ReplyOrchestrator::new(
        SessionManager::new("be nice"),
        store.clone(),
        provider.clone(),
        transport.clone(),
        settings,
    );
    Harness {
        orchestrator,
        provider,
        transport,
        store,
    }
}

fn never() -> EngagementGate {
    EngagementGate::new(0, 0, 5)
}

fn message(sender: i64, text: &str, directed: bool) -> IncomingMessage {
    let mut segments = Vec::new();
    if directed {
        segments.push(Segment::mention(BOT));
    }
    segments.push(Segment::text(text));
    IncomingMessage::new(GROUP, sender, BOT, segments, directed)
}

#[tokio::test(start_paused = true)]
async fn burst_produces_one_addressed_reply() {
    let h = harness(ScriptedProvider::answering("on it @7 see?"), never());

    assert_eq!(
        h.orchestrator
            .record_and_maybe_reply(message(7, "hey bot", true))
            .await,
        MessageOutcome::ReplyScheduled
    );
    sleep(Duration::from_secs(1)).await;
    h.orchestrator
        .record_and_maybe_reply(message(8, "bot, answer me", true))
        .await;
    sleep(Duration::from_secs(1)).await;
    assert!(h.transport.sent().is_empty());
    assert!(!h.orchestrator.is_idle());

    h.orchestrator.wait_idle().await;

    let calls = h.provider.calls();
    assert_eq!(calls.len(), 1);
    let first = &calls[0][0];
    assert!(first.content.contains("be nice"));
    assert!(first
        .content
        .contains("7: \"\"\"hey bot\"\"\" (directed at you)\n8: \"\"\"bot, answer me\"\"\" (directed at you)\n"));

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].at_sender, Some(8));
    assert_eq!(
        sent[0].segments,
        vec![
            Segment::text("on it "),
            Segment::mention(7),
            Segment::text("see?")
        ]
    );

    // The raw reply is recorded and persisted.
    let restored = h.store.load("be nice").unwrap();
    let session = restored.current_session(GROUP).unwrap();
    let last = session.history().last().unwrap();
    assert_eq!(last.speaker_id, ASSISTANT_SPEAKER_ID);
    assert_eq!(last.text, "on it @7 see?");
    assert_eq!(session.history().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn undirected_chatter_is_recorded_but_not_answered() {
    let h = harness(ScriptedProvider::answering("unused"), never());

    for i in 0..10 {
        let outcome = h
            .orchestrator
            .record_and_maybe_reply(message(5, &format!("chat {i}"), false))
            .await;
        assert_eq!(outcome, MessageOutcome::Recorded);
    }
    sleep(Duration::from_secs(10)).await;

    assert!(h.provider.calls().is_empty());
    assert!(h.transport.sent().is_empty());
    let len = h
        .orchestrator
        .with_sessions(|s| s.current_session(GROUP).unwrap().history().len())
        .await;
    assert_eq!(len, 10);
}

#[tokio::test(start_paused = true)]
async fn mention_of_bot_alone_is_ignored() {
    let h = harness(ScriptedProvider::answering("unused"), never());
    let msg = IncomingMessage::new(GROUP, 5, BOT, vec![Segment::mention(BOT)], true);

    assert_eq!(
        h.orchestrator.record_and_maybe_reply(msg).await,
        MessageOutcome::Ignored
    );
    let count = h.orchestrator.with_sessions(|s| s.sessions().len()).await;
    assert_eq!(count, 0);
}

#[tokio::test(start_paused = true)]
async fn backend_failure_sends_notice_and_records_nothing() {
    let h = harness(
        ScriptedProvider::failing(ProviderError::Api {
            status: 500,
            body: "boom".into(),
        }),
        never(),
    );

    h.orchestrator
        .record_and_maybe_reply(message(9, "are you there", true))
        .await;
    sleep(Duration::from_secs(5)).await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].at_sender, None);
    let text = sent[0].render();
    assert!(text.starts_with("The backend returned an error"));
    assert!(text.contains("boom"));

    let len = h
        .orchestrator
        .with_sessions(|s| s.current_session(GROUP).unwrap().history().len())
        .await;
    assert_eq!(len, 1);
}

#[tokio::test(start_paused = true)]
async fn reply_lands_in_session_current_at_trigger_time() {
    let h = harness(ScriptedProvider::answering("pong"), never());

    h.orchestrator
        .record_and_maybe_reply(message(3, "ping", true))
        .await;
    let original = h
        .orchestrator
        .with_sessions(|s| s.current_id(GROUP).unwrap().to_string())
        .await;

    // Start a new session while the reply is still waiting.
    sleep(Duration::from_secs(1)).await;
    let text = h
        .orchestrator
        .execute(
            GROUP,
            SessionCommand::New {
                prompt: "other persona".into(),
                name: None,
            },
        )
        .await;
    assert!(text.starts_with("Created session"));

    sleep(Duration::from_secs(5)).await;

    h.orchestrator
        .with_sessions(|s| {
            let old = s.get(&original).unwrap();
            assert_eq!(old.history().len(), 2);
            assert_eq!(old.history()[1].text, "pong");
            let current = s.current_session(GROUP).unwrap();
            assert_ne!(current.id(), original);
            assert!(current.history().is_empty());
        })
        .await;

    // Context came from the original session's persona.
    assert!(h.provider.calls()[0][0].content.contains("be nice"));
}

#[tokio::test]
async fn commands_persist_state() {
    let h = harness(ScriptedProvider::answering("unused"), never());

    let text = h
        .orchestrator
        .execute(
            GROUP,
            SessionCommand::New {
                prompt: String::new(),
                name: Some("daily".into()),
            },
        )
        .await;
    assert!(text.ends_with("named daily"));

    let restored = h.store.load("be nice").unwrap();
    let session = restored.current_session(GROUP).unwrap();
    assert_eq!(session.display_name(), "daily");
    assert_eq!(session.system_prompt(), "be nice");

    let text = h
        .orchestrator
        .execute(GROUP, SessionCommand::List { page: 1, target: None })
        .await;
    assert!(text.contains("page 1/1"));
    assert!(text.contains("[Name]: daily"));
}

#[tokio::test]
async fn locked_state_file_does_not_stall_the_runtime() {
    use fs4::fs_std::FileExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let tmp = tempfile::TempDir::new().unwrap();
    let lock_dir = tmp.path().join(chatter_core::session::SESSIONS_NAMESPACE);
    std::fs::create_dir_all(&lock_dir).unwrap();
    let held = std::fs::File::create(
        lock_dir.join(format!("{}.lock", chatter_core::session::SESSIONS_NAME)),
    )
    .unwrap();
    held.lock_exclusive().unwrap();
    let holder = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(400));
        held.unlock().unwrap();
    });

    let orchestrator = ReplyOrchestrator::new(
        SessionManager::new("be nice"),
        SessionStore::in_dir(tmp.path()),
        ScriptedProvider::answering("unused"),
        Arc::new(RecordingTransport::default()),
        OrchestratorSettings::default(),
    );

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = Arc::clone(&ticks);
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let text = orchestrator
        .execute(
            GROUP,
            SessionCommand::New {
                prompt: "pirate".into(),
                name: None,
            },
        )
        .await;
    ticker.abort();
    holder.join().unwrap();

    assert!(text.starts_with("Created session"));
    // The runtime kept running while the write waited on the file lock.
    assert!(ticks.load(Ordering::SeqCst) >= 10);

    let restored = SessionStore::in_dir(tmp.path()).load("be nice").unwrap();
    assert_eq!(
        restored.current_session(GROUP).unwrap().system_prompt(),
        "pirate"
    );
}

#[tokio::test]
async fn help_goes_through_backend() {
    let h = harness(ScriptedProvider::answering("use cgpt session ls"), never());

    let text = h
        .orchestrator
        .execute(
            GROUP,
            SessionCommand::Help {
                question: "how do I list?".into(),
            },
        )
        .await;
    assert_eq!(text, "use cgpt session ls");

    let calls = h.provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 1);
    assert!(calls[0][0].content.contains("cgpt session rename"));
    assert!(calls[0][0].content.ends_with("how do I list?"));
}

#[tokio::test]
async fn openai_backend_end_to_end() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hi @11 welcome"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::from_config(&BackendConfig {
        base_url: server.uri(),
        api_key: "sk-test".into(),
        ..BackendConfig::default()
    })
    .unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let orchestrator = ReplyOrchestrator::new(
        SessionManager::default(),
        SessionStore::in_memory(),
        Arc::new(provider),
        transport.clone(),
        OrchestratorSettings {
            quiet_interval: Duration::from_millis(20),
            ..OrchestratorSettings::default()
        },
    );

    orchestrator
        .record_and_maybe_reply(message(11, "hello everyone", true))
        .await;

    let mut sent = Vec::new();
    for _ in 0..100 {
        sent = transport.sent();
        if !sent.is_empty() {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].render(), "@11 hi @11 welcome");
}
