pub mod manager;
pub mod roster;

pub use manager::SessionManager;
pub use roster::AgentRoster;

use crate::bus::{
    AgentResponse, HandlerFailure, HandlerTable, MessageBus, TopicType, UserLogin, UserTask,
};
use crate::context::{ConversationContext, Turn};
use crate::error::{AgentError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const QUEUE_CAPACITY: usize = 32;

/// What a session hands back to its transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Reply { agent: String, text: String },
    Failed { reason: String },
}

/// A user turn that has been published and not yet answered.
struct OpenTurn {
    before: ConversationContext,
    task: ConversationContext,
}

/// The session's view of the conversation, shared by both bridges.
struct Conversation {
    context: ConversationContext,
    reply_to: TopicType,
    open: Option<OpenTurn>,
}

impl Conversation {
    fn new(entry: TopicType) -> Self {
        Self {
            context: ConversationContext::new(),
            reply_to: entry,
            open: None,
        }
    }

    /// Appends the user input, marks the turn open and returns the task
    /// together with its destination.
    fn begin(&mut self, text: String) -> (UserTask, TopicType) {
        let before = self.context.clone();
        let task = before.extended([Turn::user(text)]);
        self.context = task.clone();
        self.open = Some(OpenTurn {
            before,
            task: task.clone(),
        });
        (UserTask { context: task }, self.reply_to.clone())
    }

    /// Folds a reply into the conversation. Returns true when it answers
    /// the open turn.
    ///
    /// A reply whose context extends ours replaces it. A reply built on an
    /// older context (a late fan-out branch) contributes only its final
    /// turn, so nothing the user already exchanged is lost.
    fn accept(&mut self, response: &AgentResponse) -> bool {
        if self.context.is_prefix_of(&response.context) {
            self.context = response.context.clone();
        } else if let Some(last) = response.context.last() {
            debug!(from = %response.reply_to, "Appending reply built on an older context");
            self.context.push(last.clone());
        }
        self.reply_to = response.reply_to.clone();

        let answers_open = self
            .open
            .as_ref()
            .is_some_and(|open| open.task.is_prefix_of(&response.context));
        if answers_open {
            self.open = None;
        }
        answers_open
    }

    /// Ends the open turn without a reply. The user input is dropped from
    /// the context unless something was appended after it.
    fn fail(&mut self) -> bool {
        let Some(open) = self.open.take() else {
            return false;
        };
        if self.context == open.task {
            self.context = open.before;
        }
        true
    }
}

pub struct Session {
    id: String,
    bus: MessageBus,
    inbound: mpsc::Sender<String>,
    outbound: tokio::sync::Mutex<mpsc::Receiver<Outbound>>,
    cancellation: CancellationToken,
    tasks: TaskTracker,
    last_activity: Mutex<Instant>,
    conversation: Arc<Mutex<Conversation>>,
}

impl Session {
    /// Builds the bus, starts it, opens the conversation with the entry
    /// agent and spawns the bridges. Must run inside a Tokio runtime.
    pub(crate) fn open(id: String, roster: &AgentRoster) -> Result<Arc<Self>> {
        let cancellation = CancellationToken::new();
        let bus = MessageBus::with_cancellation(cancellation.clone());

        roster.install(&bus)?;
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        bus.subscribe(TopicType::user(), user_proxy(responses_tx))?;
        let failures = bus.failures();
        bus.start()?;

        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let conversation = Arc::new(Mutex::new(Conversation::new(roster.entry().clone())));
        let tasks = TaskTracker::new();

        tasks.spawn(outbound_bridge(OutboundBridge {
            responses: responses_rx,
            failures,
            outbound: outbound_tx,
            settled: settled_tx,
            conversation: Arc::clone(&conversation),
            cancellation: cancellation.clone(),
        }));
        tasks.spawn(inbound_bridge(InboundBridge {
            bus: bus.clone(),
            session: id.clone(),
            inbound: inbound_rx,
            settled: settled_rx,
            conversation: Arc::clone(&conversation),
            cancellation: cancellation.clone(),
        }));

        if let Err(e) = bus.publish(UserLogin {}, roster.entry(), &id) {
            cancellation.cancel();
            return Err(e);
        }
        info!(session = %id, entry = %roster.entry(), "Session opened");

        Ok(Arc::new(Self {
            id,
            bus,
            inbound: inbound_tx,
            outbound: tokio::sync::Mutex::new(outbound_rx),
            cancellation,
            tasks,
            last_activity: Mutex::new(Instant::now()),
            conversation,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queues one line of user input.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        *self.last_activity.lock() = Instant::now();
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(AgentError::Cancelled),
            sent = self.inbound.send(text.into()) => sent.map_err(|_| AgentError::BusStopped),
        }
    }

    /// Next reply or failure notice; `None` once the session is closed.
    pub async fn recv(&self) -> Option<Outbound> {
        let mut outbound = self.outbound.lock().await;
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => None,
            item = outbound.recv() => item,
        }
    }

    /// Every user turn forwarded so far and every reply delivered.
    pub fn transcript(&self) -> ConversationContext {
        self.conversation.lock().context.clone()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fires when the session is closed, e.g. to end a transport loop.
    pub fn closed(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub(crate) async fn shutdown(&self) {
        self.cancellation.cancel();
        self.bus.stop().await;
        self.tasks.close();
        self.tasks.wait().await;
        info!(session = %self.id, "Session closed");
    }
}

fn user_proxy(responses: mpsc::UnboundedSender<AgentResponse>) -> HandlerTable {
    HandlerTable::new().on_agent_response(move |response, ctx| {
        debug!(session = %ctx.source(), from = %response.reply_to, "Reply reached the user topic");
        let _ = responses.send(response);
        futures_util::future::ready(Ok(()))
    })
}

struct OutboundBridge {
    responses: mpsc::UnboundedReceiver<AgentResponse>,
    failures: mpsc::UnboundedReceiver<HandlerFailure>,
    outbound: mpsc::Sender<Outbound>,
    settled: mpsc::UnboundedSender<()>,
    conversation: Arc<Mutex<Conversation>>,
    cancellation: CancellationToken,
}

async fn outbound_bridge(mut bridge: OutboundBridge) {
    loop {
        let (item, settles) = tokio::select! {
            biased;
            _ = bridge.cancellation.cancelled() => break,
            Some(response) = bridge.responses.recv() => {
                let settles = bridge.conversation.lock().accept(&response);
                let item = Outbound::Reply {
                    agent: response.reply_to.to_string(),
                    text: response.reply_text().unwrap_or_default().to_string(),
                };
                (item, settles)
            }
            Some(failure) = bridge.failures.recv() => {
                warn!(topic = %failure.topic, "Turn failed: {}", failure.error);
                let settles = bridge.conversation.lock().fail();
                (Outbound::Failed { reason: failure.error.to_string() }, settles)
            }
            else => break,
        };

        tokio::select! {
            biased;
            _ = bridge.cancellation.cancelled() => break,
            sent = bridge.outbound.send(item) => if sent.is_err() { break },
        }
        if settles {
            let _ = bridge.settled.send(());
        }
    }
}

struct InboundBridge {
    bus: MessageBus,
    session: String,
    inbound: mpsc::Receiver<String>,
    settled: mpsc::UnboundedReceiver<()>,
    conversation: Arc<Mutex<Conversation>>,
    cancellation: CancellationToken,
}

/// Half-duplex: the next line is read only after the open turn settled,
/// so each task extends the context the user last saw.
async fn inbound_bridge(mut bridge: InboundBridge) {
    loop {
        let text = tokio::select! {
            biased;
            _ = bridge.cancellation.cancelled() => break,
            text = bridge.inbound.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        let (task, target) = bridge.conversation.lock().begin(text);
        debug!(session = %bridge.session, to = %target, "Forwarding user input");
        if let Err(e) = bridge.bus.publish(task, &target, &bridge.session) {
            warn!(session = %bridge.session, "Could not forward user input: {}", e);
            break;
        }

        tokio::select! {
            biased;
            _ = bridge.cancellation.cancelled() => break,
            settled = bridge.settled.recv() => if settled.is_none() { break },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::{Persona, ToolRegistry};
    use crate::tools::TransferTool;
    use crate::traits::{ChatRequest, ChatResponse, Provider, ToolCall};
    use async_trait::async_trait;

    /// Answers from the triage persona by transferring anything that
    /// mentions "review"; every other persona echoes the last user line.
    pub(crate) struct Switchboard;

    #[async_trait]
    impl Provider for Switchboard {
        fn name(&self) -> &str {
            "switchboard"
        }

        async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
            let system = &request.messages[0].content;
            let last = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .map(|m| m.content.clone())
                .unwrap_or_default();

            if system.starts_with("triage") && last.contains("review") {
                return Ok(ChatResponse::calls(vec![ToolCall {
                    id: "t1".into(),
                    name: "transfer_to_quality_agent".into(),
                    arguments: "{}".into(),
                }]));
            }
            if system.starts_with("broken") {
                return Ok(ChatResponse::calls(vec![ToolCall {
                    id: "x".into(),
                    name: "no_such_tool".into(),
                    arguments: "{}".into(),
                }]));
            }
            let who = system.split_whitespace().next().unwrap_or("agent");
            Ok(ChatResponse::text(format!("{}: {}", who, last_user)))
        }
    }

    pub(crate) fn roster() -> AgentRoster {
        AgentRoster::new(Arc::new(Switchboard), "triage_agent")
            .with_agent(
                Persona::new("triage_agent", "Triage", "triage"),
                ToolRegistry::new()
                    .with_delegate(TransferTool::to("quality_agent"))
                    .unwrap(),
            )
            .with_agent(
                Persona::new("quality_agent", "Quality", "quality"),
                ToolRegistry::new()
                    .with_delegate(TransferTool::new(
                        "transfer_back_to_triage",
                        TopicType::new("triage_agent"),
                    ))
                    .unwrap(),
            )
    }

    #[tokio::test]
    async fn reply_comes_back_from_the_entry_agent() {
        let session = Session::open("s1".into(), &roster()).unwrap();

        session.send("hello").await.unwrap();
        let reply = session.recv().await.unwrap();
        assert_eq!(
            reply,
            Outbound::Reply {
                agent: "triage_agent".into(),
                text: "triage: hello".into()
            }
        );
        assert_eq!(session.transcript().len(), 2);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn next_turn_goes_to_the_agent_that_replied() {
        let session = Session::open("s1".into(), &roster()).unwrap();

        session.send("please review my plan").await.unwrap();
        let first = session.recv().await.unwrap();
        assert_eq!(
            first,
            Outbound::Reply {
                agent: "quality_agent".into(),
                text: "quality: please review my plan".into()
            }
        );

        session.send("thanks").await.unwrap();
        let second = session.recv().await.unwrap();
        assert_eq!(
            second,
            Outbound::Reply {
                agent: "quality_agent".into(),
                text: "quality: thanks".into()
            }
        );

        let texts: Vec<String> = session
            .transcript()
            .turns()
            .iter()
            .filter_map(|t| t.text().map(str::to_string))
            .collect();
        assert_eq!(
            texts,
            [
                "please review my plan",
                "quality: please review my plan",
                "thanks",
                "quality: thanks"
            ]
        );
        session.shutdown().await;
    }

    #[tokio::test]
    async fn fatal_turns_are_reported_and_the_session_survives() {
        let roster = AgentRoster::new(Arc::new(Switchboard), "broken_agent").with_agent(
            Persona::new("broken_agent", "Broken", "broken"),
            ToolRegistry::new(),
        );
        let session = Session::open("s1".into(), &roster).unwrap();

        session.send("do something").await.unwrap();
        match session.recv().await.unwrap() {
            Outbound::Failed { reason } => assert!(reason.contains("no_such_tool")),
            other => panic!("unexpected outbound: {:?}", other),
        }

        session.send("again").await.unwrap();
        assert!(matches!(
            session.recv().await.unwrap(),
            Outbound::Failed { .. }
        ));
        assert!(session.transcript().is_empty());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn queued_input_waits_for_the_previous_reply() {
        let session = Session::open("s1".into(), &roster()).unwrap();

        session.send("one").await.unwrap();
        session.send("two").await.unwrap();
        session.recv().await.unwrap();
        let second = session.recv().await.unwrap();
        assert!(matches!(second, Outbound::Reply { ref text, .. } if text == "triage: two"));

        assert_eq!(
            texts(&session.transcript()),
            ["one", "triage: one", "two", "triage: two"]
        );
        session.shutdown().await;
    }

    /// Triage hands every first message to both `fast_agent` and
    /// `slow_agent`; the slow one answers 300ms late.
    struct FanOut;

    #[async_trait]
    impl Provider for FanOut {
        fn name(&self) -> &str {
            "fan-out"
        }

        async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
            let system = request.messages[0].content.clone();
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .map(|m| m.content.clone())
                .unwrap_or_default();

            if system.starts_with("triage") {
                return Ok(ChatResponse::calls(vec![
                    ToolCall {
                        id: "f".into(),
                        name: "transfer_to_fast_agent".into(),
                        arguments: "{}".into(),
                    },
                    ToolCall {
                        id: "s".into(),
                        name: "transfer_to_slow_agent".into(),
                        arguments: "{}".into(),
                    },
                ]));
            }
            if system.starts_with("slow") {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }
            let who = system.split_whitespace().next().unwrap_or("agent");
            Ok(ChatResponse::text(format!("{}: {}", who, last_user)))
        }
    }

    fn texts(context: &ConversationContext) -> Vec<String> {
        context
            .turns()
            .iter()
            .filter_map(|t| t.text().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn late_fan_out_reply_keeps_later_turns() {
        let roster = AgentRoster::new(Arc::new(FanOut), "triage_agent")
            .with_agent(
                Persona::new("triage_agent", "Triage", "triage"),
                ToolRegistry::new()
                    .with_delegate(TransferTool::to("fast_agent"))
                    .unwrap()
                    .with_delegate(TransferTool::to("slow_agent"))
                    .unwrap(),
            )
            .with_agent(Persona::new("fast_agent", "Fast", "fast"), ToolRegistry::new())
            .with_agent(Persona::new("slow_agent", "Slow", "slow"), ToolRegistry::new());
        let session = Session::open("s1".into(), &roster).unwrap();

        session.send("first").await.unwrap();
        let reply = session.recv().await.unwrap();
        assert!(matches!(reply, Outbound::Reply { ref text, .. } if text == "fast: first"));

        session.send("second").await.unwrap();
        let reply = session.recv().await.unwrap();
        assert!(matches!(reply, Outbound::Reply { ref text, .. } if text == "fast: second"));
        assert_eq!(
            texts(&session.transcript()),
            ["first", "fast: first", "second", "fast: second"]
        );

        let late = session.recv().await.unwrap();
        assert!(matches!(late, Outbound::Reply { ref text, .. } if text == "slow: first"));

        session.send("third").await.unwrap();
        let reply = session.recv().await.unwrap();
        assert!(matches!(reply, Outbound::Reply { ref text, .. } if text == "slow: third"));

        assert_eq!(
            texts(&session.transcript()),
            [
                "first",
                "fast: first",
                "second",
                "fast: second",
                "slow: first",
                "third",
                "slow: third"
            ]
        );
        session.shutdown().await;
    }

    #[test]
    fn stale_reply_does_not_settle_the_open_turn() {
        let mut conversation = Conversation::new(TopicType::new("triage_agent"));
        let (first, _) = conversation.begin("first".into());
        let stale = AgentResponse {
            reply_to: TopicType::new("slow_agent"),
            context: first
                .context
                .extended([Turn::assistant("slow_agent", "slow: first")]),
        };
        assert!(conversation.accept(&AgentResponse {
            reply_to: TopicType::new("fast_agent"),
            context: first
                .context
                .extended([Turn::assistant("fast_agent", "fast: first")]),
        }));

        let (second, target) = conversation.begin("second".into());
        assert_eq!(target, TopicType::new("fast_agent"));
        assert!(!conversation.accept(&stale));
        assert!(conversation.open.is_some());
        assert!(second.context.is_prefix_of(&conversation.context));

        assert!(conversation.fail());
        assert_eq!(conversation.context.len(), 4);
    }

    #[tokio::test]
    async fn closed_session_rejects_input() {
        let session = Session::open("s1".into(), &roster()).unwrap();
        session.shutdown().await;

        assert!(session.is_closed());
        assert!(session.send("late").await.is_err());
        assert!(session.recv().await.is_none());
    }

    #[test]
    fn outbound_is_tagged_json() {
        let json = serde_json::to_string(&Outbound::Reply {
            agent: "triage_agent".into(),
            text: "hi".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"reply","agent":"triage_agent","text":"hi"}"#);
    }
}
