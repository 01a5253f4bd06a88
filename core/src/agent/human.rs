use crate::bus::{AgentResponse, HandlerTable, MessageContext, TopicType, UserTask};
use crate::context::{ConversationContext, Turn};
use crate::error::{AgentError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One pending question for the operator.
#[derive(Debug)]
pub struct HumanRequest {
    pub session: String,
    pub context: ConversationContext,
    reply: oneshot::Sender<String>,
}

impl HumanRequest {
    /// Latest readable turn, usually what the operator is answering.
    pub fn latest_text(&self) -> Option<&str> {
        self.context.turns().iter().rev().find_map(|turn| turn.text())
    }

    /// Returns false when the asking session has already gone away.
    pub fn answer(self, text: impl Into<String>) -> bool {
        self.reply.send(text.into()).is_ok()
    }
}

/// Queue of operator questions shared by every session.
#[derive(Clone)]
pub struct HumanDesk {
    requests: mpsc::Sender<HumanRequest>,
}

impl HumanDesk {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<HumanRequest>) {
        let (requests, rx) = mpsc::channel(capacity.max(1));
        (Self { requests }, rx)
    }

    pub async fn ask(
        &self,
        session: &str,
        context: ConversationContext,
        cancellation: &CancellationToken,
    ) -> Result<String> {
        let (reply, answer) = oneshot::channel();
        let request = HumanRequest {
            session: session.to_string(),
            context,
            reply,
        };

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(AgentError::Cancelled),
            sent = self.requests.send(request) => sent.map_err(|_| {
                AgentError::ModelCall(anyhow::anyhow!("no human operator is attached"))
            })?,
        }

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(AgentError::Cancelled),
            answer = answer => answer.map_err(|_| {
                AgentError::ModelCall(anyhow::anyhow!("the operator dropped the request"))
            }),
        }
    }
}

pub struct HumanAgent {
    topic: TopicType,
    user_topic: TopicType,
    desk: HumanDesk,
}

impl HumanAgent {
    pub fn new(topic: impl Into<TopicType>, desk: HumanDesk) -> Self {
        Self {
            topic: topic.into(),
            user_topic: TopicType::user(),
            desk,
        }
    }

    pub fn topic(&self) -> &TopicType {
        &self.topic
    }

    pub fn handlers(self: Arc<Self>) -> HandlerTable {
        HandlerTable::new().on_user_task(move |task: UserTask, ctx| {
            let agent = Arc::clone(&self);
            async move { agent.handle_task(task.context, &ctx).await }
        })
    }

    pub async fn handle_task(
        &self,
        context: ConversationContext,
        ctx: &MessageContext,
    ) -> Result<()> {
        let agent = self.topic.as_str();
        info!(agent, session = %ctx.source(), "Waiting for human input");

        let text = match self
            .desk
            .ask(ctx.source(), context.clone(), &ctx.cancellation)
            .await
        {
            Ok(text) => text,
            Err(AgentError::ModelCall(e)) => {
                warn!(agent, session = %ctx.source(), "Human input unavailable: {:#}", e);
                format!("A human agent is not available right now: {:#}.", e)
            }
            Err(e) => return Err(e),
        };

        ctx.publish(
            AgentResponse {
                reply_to: self.topic.clone(),
                context: context.extended([Turn::assistant(agent, text)]),
            },
            &self.user_topic,
        )
    }
}
