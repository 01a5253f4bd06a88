use crate::agent::parse::extract_tool_calls;
use crate::agent::{Persona, ToolEntry, ToolRegistry};
use crate::bus::{AgentResponse, HandlerTable, MessageContext, TopicType, UserTask};
use crate::context::{ConversationContext, ToolOutcome, Turn};
use crate::error::{AgentError, Result};
use crate::traits::{ChatRequest, ChatResponse, Provider, ToolCall, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ROUNDS: usize = 20;

const GAVE_UP_REPLY: &str =
    "I could not finish this request within the allowed number of steps. Please try rephrasing it.";

/// What happens when a tool raises while the loop is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolErrorPolicy {
    /// Feed the failure back to the model as an error tool result.
    #[default]
    Recover,
    /// Abandon the invocation with `ToolExecution`.
    Strict,
}

enum CallResult {
    Answered(ToolOutcome),
    Transfer(TopicType),
}

/// One agent bound to one topic: persona, tools and the
/// model/tool/delegate loop.
///
/// Sessions create their own instance; everything inside is shared
/// read-only.
pub struct AgentLoop {
    topic: TopicType,
    user_topic: TopicType,
    persona: Arc<Persona>,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    max_rounds: usize,
    tool_error_policy: ToolErrorPolicy,
}

impl AgentLoop {
    pub fn new(
        topic: impl Into<TopicType>,
        persona: Arc<Persona>,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            topic: topic.into(),
            user_topic: TopicType::user(),
            persona,
            provider,
            tools,
            max_rounds: DEFAULT_MAX_ROUNDS,
            tool_error_policy: ToolErrorPolicy::default(),
        }
    }

    pub fn with_user_topic(mut self, user_topic: impl Into<TopicType>) -> Self {
        self.user_topic = user_topic.into();
        self
    }

    pub fn with_max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    pub fn with_tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_error_policy = policy;
        self
    }

    pub fn topic(&self) -> &TopicType {
        &self.topic
    }

    pub fn handlers(self: Arc<Self>) -> HandlerTable {
        let login_topic = self.topic.clone();
        HandlerTable::new()
            .on_user_login(move |_login, ctx| {
                info!(agent = %login_topic, session = %ctx.source(), "Conversation opened");
                futures_util::future::ready(Ok(()))
            })
            .on_user_task(move |task: UserTask, ctx| {
                let agent = Arc::clone(&self);
                async move { agent.handle_task(task.context, &ctx).await }
            })
    }

    /// Runs the loop for one incoming task. Publishes delegations and at
    /// most one reply; returns an error only when the invocation was
    /// abandoned.
    pub async fn handle_task(
        &self,
        context: ConversationContext,
        ctx: &MessageContext,
    ) -> Result<()> {
        let agent = self.topic.as_str();
        let specs = self.tools.get_specs();
        let system_prompt = self.persona.system_prompt(&specs);
        let mut working = context;

        debug!(agent, session = %ctx.source(), turns = working.len(), "Handling task");

        for round in 1..=self.max_rounds {
            let response = match self
                .call_model(&system_prompt, &working, &specs, &ctx.cancellation)
                .await
            {
                Ok(response) => response,
                Err(AgentError::ModelCall(e)) => {
                    warn!(agent, session = %ctx.source(), "Model call failed: {:#}", e);
                    return self.respond(working.extended([Turn::assistant(agent, apology(&e))]), ctx);
                }
                Err(e) => return Err(e),
            };

            let (text, calls) = match self.split_response(response) {
                Ok(split) => split,
                Err(AgentError::ModelCall(e)) => {
                    warn!(agent, session = %ctx.source(), "Model call failed: {:#}", e);
                    return self.respond(working.extended([Turn::assistant(agent, apology(&e))]), ctx);
                }
                Err(e) => return Err(e),
            };
            if calls.is_empty() {
                return self.respond(working.extended([Turn::assistant(agent, text)]), ctx);
            }

            debug!(agent, round, calls = calls.len(), "Processing tool calls");

            let mut answered = Vec::new();
            let mut results = Vec::new();
            let mut handoffs = Vec::new();

            for call in calls {
                match self.execute_call(&call, &ctx.cancellation).await? {
                    CallResult::Answered(outcome) => {
                        results.push(outcome);
                        answered.push(call);
                    }
                    CallResult::Transfer(target) => {
                        let note = format!("Transferred to {}. Adopt persona immediately.", target);
                        let handoff = working.extended([
                            Turn::tool_calls(agent, vec![call.clone()]),
                            Turn::tool_results(vec![ToolOutcome::ok(&call, note)]),
                        ]);
                        handoffs.push((target, handoff));
                    }
                }
            }

            for (target, handoff) in handoffs {
                info!(agent, target = %target, session = %ctx.source(), "Delegating conversation");
                ctx.publish(UserTask { context: handoff }, &target)?;
            }

            if answered.is_empty() {
                return Ok(());
            }

            working.push(Turn::tool_calls(agent, answered));
            working.push(Turn::tool_results(results));
        }

        warn!(agent, max_rounds = self.max_rounds, "Tool rounds exhausted");
        self.respond(working.extended([Turn::assistant(agent, GAVE_UP_REPLY)]), ctx)
    }

    async fn call_model(
        &self,
        system_prompt: &str,
        context: &ConversationContext,
        specs: &[ToolSpec],
        cancellation: &CancellationToken,
    ) -> Result<ChatResponse> {
        let messages = context.to_chat_messages(system_prompt);
        let request = ChatRequest {
            messages: &messages,
            tools: if specs.is_empty() { None } else { Some(specs) },
        };

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(AgentError::Cancelled),
            response = self.provider.chat(request) => response.map_err(AgentError::ModelCall),
        }
    }

    /// Native calls win. `<tool_call>` blocks in the text are honored only
    /// when the persona asked the model for them. Output left with neither
    /// text nor calls is a failed model call.
    fn split_response(&self, response: ChatResponse) -> Result<(String, Vec<ToolCall>)> {
        let ChatResponse { text, tool_calls } = response;
        let (text, calls) = if !tool_calls.is_empty() {
            (text.unwrap_or_default(), tool_calls)
        } else if self.persona.text_tool_protocol {
            extract_tool_calls(text.as_deref().unwrap_or_default())
        } else {
            (text.unwrap_or_default(), Vec::new())
        };

        if calls.is_empty() && text.trim().is_empty() {
            return Err(AgentError::ModelCall(anyhow::anyhow!(
                "{} returned an empty response",
                self.provider.name()
            )));
        }
        Ok((text, calls))
    }

    async fn execute_call(
        &self,
        call: &ToolCall,
        cancellation: &CancellationToken,
    ) -> Result<CallResult> {
        let Some(entry) = self.tools.get(&call.name) else {
            return Err(AgentError::UnknownTool {
                agent: self.topic.to_string(),
                tool: call.name.clone(),
            });
        };

        let args = match parse_arguments(call) {
            Ok(args) => args,
            Err(e) => return self.tool_failed(call, e).map(CallResult::Answered),
        };
        debug!(agent = %self.topic, tool = %call.name, %args, "Executing tool");

        match entry {
            ToolEntry::Direct(tool) => {
                let result = tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return Err(AgentError::Cancelled),
                    result = tool.execute(args) => result,
                };
                match result {
                    Ok(output) => Ok(CallResult::Answered(ToolOutcome::ok(call, output))),
                    Err(e) => self.tool_failed(call, e).map(CallResult::Answered),
                }
            }
            ToolEntry::Delegate(tool) => {
                let target = tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return Err(AgentError::Cancelled),
                    target = tool.resolve(args) => target,
                };
                match target {
                    Ok(target) => Ok(CallResult::Transfer(target)),
                    Err(e) => self.tool_failed(call, e).map(CallResult::Answered),
                }
            }
        }
    }

    fn tool_failed(&self, call: &ToolCall, error: anyhow::Error) -> Result<ToolOutcome> {
        match self.tool_error_policy {
            ToolErrorPolicy::Recover => {
                warn!(agent = %self.topic, tool = %call.name, "Tool failed: {:#}", error);
                Ok(ToolOutcome::error(
                    call,
                    format!("Execution failed: {:#}", error),
                ))
            }
            ToolErrorPolicy::Strict => Err(AgentError::tool(&call.name, format!("{:#}", error))),
        }
    }

    fn respond(&self, context: ConversationContext, ctx: &MessageContext) -> Result<()> {
        info!(agent = %self.topic, session = %ctx.source(), turns = context.len(), "Publishing response");
        ctx.publish(
            AgentResponse {
                reply_to: self.topic.clone(),
                context,
            },
            &self.user_topic,
        )
    }
}

fn apology(error: &anyhow::Error) -> String {
    format!(
        "I encountered an error while processing your request: {:#}. Please try again or contact support.",
        error
    )
}

fn parse_arguments(call: &ToolCall) -> anyhow::Result<Value> {
    let raw = call.arguments.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| anyhow::anyhow!("Failed to parse tool arguments for {}: {}", call.name, e))?;
    match value {
        Value::Object(_) | Value::Null => Ok(value),
        other => anyhow::bail!(
            "Arguments for {} must be a JSON object, got {}",
            call.name,
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{HandlerFailure, MessageBus, TopicId};
    use crate::tools::TransferTool;
    use crate::traits::Tool;
    use async_trait::async_trait;
    use futures_util::future;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Scripted {
        script: Mutex<VecDeque<anyhow::Result<ChatResponse>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(script: Vec<anyhow::Result<ChatResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, _request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| Ok(ChatResponse::text("done")))
        }
    }

    struct Echo {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo x back"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"x": {"type": "string"}}})
        }

        async fn execute(&self, args: Value) -> anyhow::Result<String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            args["x"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("missing x"))
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<String> {
            anyhow::bail!("disk on fire")
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    fn agent(provider: Arc<Scripted>, tools: ToolRegistry) -> AgentLoop {
        let persona = Arc::new(Persona::new("triage_agent", "Triage", "You route."));
        AgentLoop::new("triage_agent", persona, provider, Arc::new(tools))
    }

    fn text_protocol_agent(provider: Arc<Scripted>, tools: ToolRegistry) -> AgentLoop {
        let persona = Persona::new("triage_agent", "Triage", "You route.").with_text_tool_protocol(true);
        AgentLoop::new("triage_agent", Arc::new(persona), provider, Arc::new(tools))
    }

    struct Harness {
        bus: MessageBus,
        tasks: Arc<Mutex<Vec<(TopicType, UserTask)>>>,
        responses: Arc<Mutex<Vec<AgentResponse>>>,
        failures: UnboundedReceiver<HandlerFailure>,
    }

    impl Harness {
        fn new(agent: AgentLoop, peers: &[&str]) -> Self {
            let bus = MessageBus::new();
            let topic = agent.topic().clone();
            bus.subscribe(topic, Arc::new(agent).handlers()).unwrap();

            let tasks = Arc::new(Mutex::new(Vec::new()));
            for peer in peers {
                let topic = TopicType::new(*peer);
                let tasks = Arc::clone(&tasks);
                bus.subscribe(
                    topic.clone(),
                    HandlerTable::new().on_user_task(move |task, _ctx| {
                        tasks.lock().push((topic.clone(), task));
                        future::ready(Ok(()))
                    }),
                )
                .unwrap();
            }

            let responses = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&responses);
            bus.subscribe(
                TopicType::user(),
                HandlerTable::new().on_agent_response(move |response, _ctx| {
                    sink.lock().push(response);
                    future::ready(Ok(()))
                }),
            )
            .unwrap();

            let failures = bus.failures();
            bus.start().unwrap();
            Self {
                bus,
                tasks,
                responses,
                failures,
            }
        }

        async fn run(&self, context: ConversationContext) {
            self.bus
                .publish(UserTask { context }, &"triage_agent".into(), "s1")
                .unwrap();
            self.bus.stop().await;
        }

        fn responses(&self) -> Vec<AgentResponse> {
            self.responses.lock().clone()
        }

        fn tasks(&self) -> Vec<(TopicType, UserTask)> {
            self.tasks.lock().clone()
        }
    }

    #[tokio::test]
    async fn delegate_call_hands_off_without_replying() {
        let provider = Scripted::new(vec![Ok(ChatResponse::calls(vec![call(
            "c1",
            "transfer_to_quality_agent",
            "{}",
        )]))]);
        let tools = ToolRegistry::new()
            .with_delegate(TransferTool::to("quality_agent"))
            .unwrap();
        let harness = Harness::new(agent(provider.clone(), tools), &["quality_agent"]);

        let input = ConversationContext::from_user("I need quality review");
        harness.run(input.clone()).await;

        let tasks = harness.tasks();
        assert_eq!(tasks.len(), 1);
        let (target, task) = &tasks[0];
        assert_eq!(*target, "quality_agent");
        assert_eq!(task.context.len(), input.len() + 2);
        assert!(input.is_prefix_of(&task.context));
        match task.context.last() {
            Some(Turn::ToolResults { results }) => {
                assert_eq!(
                    results[0].content,
                    "Transferred to quality_agent. Adopt persona immediately."
                );
            }
            other => panic!("unexpected last turn: {:?}", other),
        }
        assert!(harness.responses().is_empty());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn direct_result_triggers_one_follow_up_call() {
        let provider = Scripted::new(vec![
            Ok(ChatResponse::calls(vec![call("c1", "echo", r#"{"x":"ping"}"#)])),
            Ok(ChatResponse::text("echoed ping")),
        ]);
        let runs = Arc::new(AtomicUsize::new(0));
        let tools = ToolRegistry::new()
            .with_tool(Echo { runs: runs.clone() })
            .unwrap();
        let harness = Harness::new(agent(provider.clone(), tools), &[]);

        let input = ConversationContext::from_user("echo ping");
        harness.run(input.clone()).await;

        assert_eq!(provider.calls(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let responses = harness.responses();
        assert_eq!(responses.len(), 1);
        let response = &responses[0];
        assert_eq!(response.reply_to, "triage_agent");
        assert!(input.is_prefix_of(&response.context));
        assert_eq!(response.context.len(), input.len() + 3);
        assert!(matches!(
            &response.context.turns()[2],
            Turn::ToolResults { results } if results[0].content == "ping" && !results[0].is_error
        ));
        assert_eq!(response.reply_text(), Some("echoed ping"));
    }

    #[tokio::test]
    async fn model_failure_becomes_an_apology() {
        let provider = Scripted::new(vec![Err(anyhow::anyhow!("upstream timeout"))]);
        let runs = Arc::new(AtomicUsize::new(0));
        let tools = ToolRegistry::new()
            .with_tool(Echo { runs: runs.clone() })
            .unwrap();
        let harness = Harness::new(agent(provider.clone(), tools), &[]);

        harness.run(ConversationContext::from_user("hello")).await;

        let responses = harness.responses();
        assert_eq!(responses.len(), 1);
        let text = responses[0].reply_text().unwrap();
        assert!(text.starts_with("I encountered an error"));
        assert!(text.contains("upstream timeout"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_abandons_the_invocation() {
        let provider = Scripted::new(vec![Ok(ChatResponse::calls(vec![call(
            "c1", "teleport", "{}",
        )]))]);
        let mut harness = Harness::new(agent(provider, ToolRegistry::new()), &[]);

        harness.run(ConversationContext::from_user("beam me up")).await;

        assert!(harness.responses().is_empty());
        let failure = harness.failures.try_recv().unwrap();
        assert_eq!(failure.topic, TopicId::new("triage_agent", "s1"));
        assert!(matches!(
            failure.error,
            AgentError::UnknownTool { ref tool, .. } if tool == "teleport"
        ));
    }

    #[tokio::test]
    async fn recover_policy_feeds_tool_errors_back() {
        let provider = Scripted::new(vec![
            Ok(ChatResponse::calls(vec![call("c1", "broken", "{}")])),
            Ok(ChatResponse::text("sorry, the tool is down")),
        ]);
        let tools = ToolRegistry::new().with_tool(Broken).unwrap();
        let harness = Harness::new(agent(provider.clone(), tools), &[]);

        harness.run(ConversationContext::from_user("try it")).await;

        let responses = harness.responses();
        assert_eq!(responses.len(), 1);
        match &responses[0].context.turns()[2] {
            Turn::ToolResults { results } => {
                assert!(results[0].is_error);
                assert!(results[0].content.contains("disk on fire"));
            }
            other => panic!("unexpected turn: {:?}", other),
        }
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn strict_policy_propagates_tool_errors() {
        let provider = Scripted::new(vec![Ok(ChatResponse::calls(vec![call(
            "c1", "broken", "{}",
        )]))]);
        let tools = ToolRegistry::new().with_tool(Broken).unwrap();
        let agent = agent(provider, tools).with_tool_error_policy(ToolErrorPolicy::Strict);
        let mut harness = Harness::new(agent, &[]);

        harness.run(ConversationContext::from_user("try it")).await;

        assert!(harness.responses().is_empty());
        let failure = harness.failures.try_recv().unwrap();
        assert!(matches!(failure.error, AgentError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn malformed_arguments_count_as_tool_failure() {
        let provider = Scripted::new(vec![
            Ok(ChatResponse::calls(vec![call("c1", "echo", "[1, 2]")])),
            Ok(ChatResponse::text("could not echo")),
        ]);
        let runs = Arc::new(AtomicUsize::new(0));
        let tools = ToolRegistry::new()
            .with_tool(Echo { runs: runs.clone() })
            .unwrap();
        let harness = Harness::new(agent(provider, tools), &[]);

        harness.run(ConversationContext::from_user("echo")).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        let responses = harness.responses();
        assert!(matches!(
            &responses[0].context.turns()[2],
            Turn::ToolResults { results } if results[0].is_error
        ));
    }

    #[tokio::test]
    async fn exhausted_rounds_end_with_a_fixed_reply() {
        let looping = (0..5)
            .map(|i| {
                Ok(ChatResponse::calls(vec![call(
                    &format!("c{}", i),
                    "echo",
                    r#"{"x":"again"}"#,
                )]))
            })
            .collect();
        let provider = Scripted::new(looping);
        let runs = Arc::new(AtomicUsize::new(0));
        let tools = ToolRegistry::new()
            .with_tool(Echo { runs: runs.clone() })
            .unwrap();
        let harness = Harness::new(agent(provider.clone(), tools).with_max_rounds(2), &[]);

        harness.run(ConversationContext::from_user("loop")).await;

        assert_eq!(provider.calls(), 2);
        let responses = harness.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].reply_text(), Some(GAVE_UP_REPLY));
    }

    #[tokio::test]
    async fn calls_embedded_in_text_are_executed() {
        let provider = Scripted::new(vec![
            Ok(ChatResponse::text(
                "<tool_call>{\"name\": \"echo\", \"arguments\": {\"x\": \"hi\"}}</tool_call>",
            )),
            Ok(ChatResponse::text("said hi")),
        ]);
        let runs = Arc::new(AtomicUsize::new(0));
        let tools = ToolRegistry::new()
            .with_tool(Echo { runs: runs.clone() })
            .unwrap();
        let harness = Harness::new(text_protocol_agent(provider, tools), &[]);

        harness.run(ConversationContext::from_user("say hi")).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(harness.responses()[0].reply_text(), Some("said hi"));
    }

    #[tokio::test]
    async fn tagged_text_is_plain_prose_without_the_text_protocol() {
        let quoted = "Models may emit <tool_call>{\"name\": \"echo\", \"arguments\": {}}</tool_call> blocks.";
        let provider = Scripted::new(vec![Ok(ChatResponse::text(quoted))]);
        let runs = Arc::new(AtomicUsize::new(0));
        let tools = ToolRegistry::new()
            .with_tool(Echo { runs: runs.clone() })
            .unwrap();
        let harness = Harness::new(agent(provider.clone(), tools), &[]);

        harness.run(ConversationContext::from_user("how do calls look?")).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(provider.calls(), 1);
        assert_eq!(harness.responses()[0].reply_text(), Some(quoted));
    }

    #[tokio::test]
    async fn unparsable_call_block_alone_counts_as_empty_output() {
        let provider = Scripted::new(vec![Ok(ChatResponse::text("<tool_call>oops</tool_call>"))]);
        let harness = Harness::new(text_protocol_agent(provider, ToolRegistry::new()), &[]);

        harness.run(ConversationContext::from_user("hi")).await;

        let responses = harness.responses();
        assert_eq!(responses.len(), 1);
        let reply = responses[0].reply_text().unwrap();
        assert!(reply.starts_with("I encountered an error while processing your request"));
        assert!(reply.contains("empty response"));
    }

    #[tokio::test]
    async fn mixed_round_delegates_and_continues() {
        let provider = Scripted::new(vec![
            Ok(ChatResponse::calls(vec![
                call("c1", "echo", r#"{"x":"a"}"#),
                call("c2", "transfer_to_quality_agent", "{}"),
            ])),
            Ok(ChatResponse::text("handed over")),
        ]);
        let tools = ToolRegistry::new()
            .with_tool(Echo {
                runs: Arc::new(AtomicUsize::new(0)),
            })
            .unwrap()
            .with_delegate(TransferTool::to("quality_agent"))
            .unwrap();
        let harness = Harness::new(agent(provider, tools), &["quality_agent"]);

        let input = ConversationContext::from_user("do both");
        harness.run(input.clone()).await;

        let tasks = harness.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].1.context.len(), input.len() + 2);

        let responses = harness.responses();
        assert_eq!(responses.len(), 1);
        match &responses[0].context.turns()[1] {
            Turn::ToolCalls { calls, .. } => {
                let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, ["echo"]);
            }
            other => panic!("unexpected turn: {:?}", other),
        }
    }

    struct Hanging;

    #[async_trait]
    impl Provider for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn chat(&self, _request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancellation_publishes_nothing() {
        let persona = Arc::new(Persona::new("triage_agent", "Triage", "You route."));
        let agent = AgentLoop::new(
            "triage_agent",
            persona,
            Arc::new(Hanging),
            Arc::new(ToolRegistry::new()),
        );
        let bus = MessageBus::new();
        let token = CancellationToken::new();
        let ctx = MessageContext::new(TopicId::new("triage_agent", "s1"), token.clone(), bus);

        let task = tokio::spawn(async move {
            agent
                .handle_task(ConversationContext::from_user("hi"), &ctx)
                .await
        });
        token.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }
}
