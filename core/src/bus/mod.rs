pub mod handler;
pub mod message;
pub mod topic;

pub use handler::{HandlerTable, MessageContext};
pub use message::{AgentResponse, Message, MessageKind, UserLogin, UserTask};
pub use topic::{TopicId, TopicType, USER_TOPIC};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{AgentError, Result};

/// A handler invocation that ended in an error or a panic.
#[derive(Debug)]
pub struct HandlerFailure {
    pub topic: TopicId,
    pub error: AgentError,
}

struct Envelope {
    message: Message,
    source: String,
}

struct BusInner {
    subscriptions: Mutex<HashMap<TopicType, Arc<HandlerTable>>>,
    mailboxes: RwLock<Option<HashMap<TopicType, mpsc::UnboundedSender<Envelope>>>>,
    stopped: AtomicBool,
    pending: AtomicUsize,
    idle: Notify,
    tracker: TaskTracker,
    cancellation: CancellationToken,
    failures: Mutex<Option<mpsc::UnboundedSender<HandlerFailure>>>,
}

/// Cheap to clone; all clones address the same bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Handlers receive `cancellation` in their [`MessageContext`]; once it
    /// fires, in-flight invocations are aborted and queued ones skipped.
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: Mutex::new(HashMap::new()),
                mailboxes: RwLock::new(None),
                stopped: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                tracker: TaskTracker::new(),
                cancellation,
                failures: Mutex::new(None),
            }),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    /// Registers the single handler for `topic_type`. Must happen before
    /// [`start`](Self::start).
    pub fn subscribe(&self, topic_type: impl Into<TopicType>, handler: HandlerTable) -> Result<()> {
        let topic_type = topic_type.into();

        if self.is_running() || self.inner.stopped.load(Ordering::SeqCst) {
            return Err(AgentError::Configuration(format!(
                "cannot subscribe '{}' after the bus has started",
                topic_type
            )));
        }

        let mut subscriptions = self.inner.subscriptions.lock();
        if subscriptions.contains_key(&topic_type) {
            return Err(AgentError::Configuration(format!(
                "topic '{}' already has a subscriber",
                topic_type
            )));
        }

        debug!(topic = %topic_type, "Subscribed handler");
        subscriptions.insert(topic_type, Arc::new(handler));
        Ok(())
    }

    /// Returns the stream of handler failures. Replaces any earlier
    /// receiver.
    pub fn failures(&self) -> mpsc::UnboundedReceiver<HandlerFailure> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.failures.lock() = Some(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        self.inner.mailboxes.read().is_some()
    }

    pub fn topics(&self) -> Vec<TopicType> {
        let mut topics: Vec<_> = self.inner.subscriptions.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Spawns one worker per subscribed topic. Calling it on a running bus
    /// is a no-op; a stopped bus cannot be restarted.
    pub fn start(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(AgentError::BusStopped);
        }

        let mut mailboxes = self.inner.mailboxes.write();
        if mailboxes.is_some() {
            return Ok(());
        }

        let subscriptions = self.inner.subscriptions.lock();
        let mut senders = HashMap::with_capacity(subscriptions.len());

        for (topic_type, handler) in subscriptions.iter() {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(topic_type.clone(), tx);
            self.inner.tracker.spawn(run_worker(
                Arc::downgrade(&self.inner),
                topic_type.clone(),
                Arc::clone(handler),
                rx,
            ));
        }

        info!(topics = senders.len(), "Message bus started");
        *mailboxes = Some(senders);
        Ok(())
    }

    /// Schedules `message` for the subscriber of `topic_type`. Returns as
    /// soon as the message is queued.
    pub fn publish(
        &self,
        message: impl Into<Message>,
        topic_type: &TopicType,
        source: &str,
    ) -> Result<()> {
        let message = message.into();

        if !self.inner.subscriptions.lock().contains_key(topic_type) {
            return Err(AgentError::Configuration(format!(
                "no subscriber for topic '{}'",
                topic_type
            )));
        }

        let mailboxes = self.inner.mailboxes.read();
        let sender = mailboxes
            .as_ref()
            .and_then(|senders| senders.get(topic_type))
            .ok_or(AgentError::BusStopped)?;

        debug!(
            topic = %topic_type,
            source,
            kind = message.kind().as_str(),
            "Publishing message"
        );

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope {
            message,
            source: source.to_string(),
        };
        if sender.send(envelope).is_err() {
            self.inner.finish_one();
            return Err(AgentError::BusStopped);
        }
        Ok(())
    }

    /// Waits until every queued and running handler invocation is done,
    /// then shuts the workers down. Later publishes fail with
    /// [`AgentError::BusStopped`].
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            self.inner.tracker.wait().await;
            return;
        }

        self.wait_idle().await;

        if let Some(senders) = self.inner.mailboxes.write().take() {
            info!(topics = senders.len(), "Stopping message bus");
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        debug!("Message bus stopped");
    }

    /// Resolves once no message is queued or being handled.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn deliver(&self, topic_type: &TopicType, handler: &HandlerTable, envelope: Envelope) {
        let topic = TopicId::new(topic_type.clone(), envelope.source);
        let cancellation = self.inner.cancellation.clone();

        if cancellation.is_cancelled() {
            debug!(%topic, "Dropping message for cancelled bus");
            return;
        }

        let ctx = MessageContext::new(topic.clone(), cancellation.clone(), self.clone());
        let mut invocation = self
            .inner
            .tracker
            .spawn(handler.dispatch(envelope.message, ctx));

        let joined = tokio::select! {
            joined = &mut invocation => joined,
            _ = cancellation.cancelled() => {
                invocation.abort();
                (&mut invocation).await
            }
        };

        match joined {
            Ok(Ok(())) => {}
            Ok(Err(AgentError::Cancelled)) => debug!(%topic, "Handler cancelled"),
            Ok(Err(error)) => self.report(HandlerFailure { topic, error }),
            Err(join_error) if join_error.is_cancelled() => debug!(%topic, "Handler aborted"),
            Err(_) => self.report(HandlerFailure {
                error: AgentError::HandlerPanicked(topic.topic_type.to_string()),
                topic,
            }),
        }
    }

    fn report(&self, failure: HandlerFailure) {
        error!(topic = %failure.topic, error = %failure.error, "Handler failed");
        if let Some(tx) = self.inner.failures.lock().as_ref()
            && tx.send(failure).is_err()
        {
            warn!("Handler failure dropped: no listener");
        }
    }
}

impl BusInner {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

async fn run_worker(
    bus: Weak<BusInner>,
    topic_type: TopicType,
    handler: Arc<HandlerTable>,
    mut mailbox: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = mailbox.recv().await {
        let Some(inner) = bus.upgrade() else {
            break;
        };
        let bus = MessageBus { inner };
        bus.deliver(&topic_type, &handler, envelope).await;
        bus.inner.finish_one();
    }
    debug!(topic = %topic_type, "Worker exited");
}
