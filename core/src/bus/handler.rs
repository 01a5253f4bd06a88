use std::collections::HashMap;
use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use tokio_util::sync::CancellationToken;

use crate::bus::{
    AgentResponse, Message, MessageBus, MessageKind, TopicId, TopicType, UserLogin, UserTask,
};
use crate::error::{AgentError, Result};

/// Delivery metadata handed to a handler alongside the message.
#[derive(Clone)]
pub struct MessageContext {
    pub topic: TopicId,
    pub cancellation: CancellationToken,
    bus: MessageBus,
}

impl MessageContext {
    pub(crate) fn new(topic: TopicId, cancellation: CancellationToken, bus: MessageBus) -> Self {
        Self {
            topic,
            cancellation,
            bus,
        }
    }

    /// Session key the message was published under.
    pub fn source(&self) -> &str {
        &self.topic.source
    }

    /// Publishes on the same bus, under the same source key.
    pub fn publish(&self, message: impl Into<Message>, topic_type: &TopicType) -> Result<()> {
        self.bus.publish(message, topic_type, &self.topic.source)
    }
}

type Route = Box<dyn Fn(Message, MessageContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Default)]
pub struct HandlerTable {
    routes: HashMap<MessageKind, Route>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_user_login<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(UserLogin, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(MessageKind::UserLogin, Message::into_user_login, handler)
    }

    pub fn on_user_task<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(UserTask, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(MessageKind::UserTask, Message::into_user_task, handler)
    }

    pub fn on_agent_response<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(AgentResponse, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(
            MessageKind::AgentResponse,
            Message::into_agent_response,
            handler,
        )
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.routes.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub(crate) fn dispatch(
        &self,
        message: Message,
        ctx: MessageContext,
    ) -> BoxFuture<'static, Result<()>> {
        let kind = message.kind();
        match self.routes.get(&kind) {
            Some(route) => route(message, ctx),
            None => future::ready(Err(AgentError::Unroutable {
                topic: ctx.topic.topic_type.to_string(),
                kind: kind.as_str(),
            }))
            .boxed(),
        }
    }

    fn route<T, F, Fut>(mut self, kind: MessageKind, extract: fn(Message) -> Option<T>, handler: F) -> Self
    where
        T: Send + 'static,
        F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let route: Route = Box::new(move |message, ctx| match extract(message) {
            Some(payload) => handler(payload, ctx).boxed(),
            None => future::ready(Err(AgentError::Unroutable {
                topic: ctx.topic.topic_type.to_string(),
                kind: kind.as_str(),
            }))
            .boxed(),
        });
        self.routes.insert(kind, route);
        self
    }
}
