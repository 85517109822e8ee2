//! Dispatcher: Routes inbound messages to registered handlers.
//!
//! Handlers are looked up by [`MessageKind`] in an explicit table. A message
//! with no handler is placed on the default inbound queue for the owning
//! application to drain. Handler failures, including panics, stop at this
//! boundary.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::HandlerError;
use crate::message::{Message, MessageKind};
use crate::node::NodeHandle;
use crate::payload::{AnnouncePayload, ChatPayload, LeavePayload, ResourceAnnouncePayload};

/// Future returned by a [`MessageHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// A handler processes one message. It gets a [`NodeHandle`] so it can
/// update peers or forward the message.
pub type MessageHandler = Arc<dyn Fn(Message, NodeHandle) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message, NodeHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |message, node| Box::pin(f(message, node)))
}

/// What happened to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion.
    Handled,
    /// The handler returned an error or panicked.
    Failed(String),
    /// No handler; the message was queued for the application.
    Queued,
    /// No handler and the inbound queue was full or closed.
    Dropped,
    /// The message id had already been processed.
    Duplicate,
}

/// Tagged dispatch table plus the default inbound queue.
pub struct Dispatcher {
    handlers: HashMap<MessageKind, MessageHandler>,
    inbox: mpsc::Sender<Message>,
}

impl Dispatcher {
    /// Create a dispatcher with no handlers. Unhandled messages go to `inbox`.
    pub fn new(inbox: mpsc::Sender<Message>) -> Self {
        Self {
            handlers: HashMap::new(),
            inbox,
        }
    }

    /// Bind `handler` to `kind`, replacing any previous binding.
    pub fn register(&mut self, kind: MessageKind, handler: MessageHandler) {
        debug!("Registering handler for message type: {kind}");
        self.handlers.insert(kind, handler);
    }

    pub fn unregister(&mut self, kind: &MessageKind) -> bool {
        self.handlers.remove(kind).is_some()
    }

    pub fn has_handler(&self, kind: &MessageKind) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// The handler for `kind`, if any. Cloned so the caller can release the
    /// dispatcher lock before awaiting it.
    pub fn handler_for(&self, kind: &MessageKind) -> Option<MessageHandler> {
        self.handlers.get(kind).cloned()
    }

    /// Put a message on the default inbound queue without waiting.
    pub fn enqueue(&self, message: Message) -> DispatchOutcome {
        deliver_to_inbox(&self.inbox, message)
    }
}

pub(crate) fn deliver_to_inbox(inbox: &mpsc::Sender<Message>, message: Message) -> DispatchOutcome {
    match inbox.try_send(message) {
        Ok(()) => DispatchOutcome::Queued,
        Err(mpsc::error::TrySendError::Full(message)) => {
            warn!("Inbound queue full, dropping {} {}", message.kind, message.id);
            DispatchOutcome::Dropped
        }
        Err(mpsc::error::TrySendError::Closed(message)) => {
            debug!("Inbound queue closed, dropping {} {}", message.kind, message.id);
            DispatchOutcome::Dropped
        }
    }
}

/// Run `handler` on `message`, containing errors and panics.
pub async fn invoke(handler: MessageHandler, message: Message, node: NodeHandle) -> DispatchOutcome {
    let kind = message.kind.clone();
    let id = message.id.clone();

    match AssertUnwindSafe(handler(message, node)).catch_unwind().await {
        Ok(Ok(())) => DispatchOutcome::Handled,
        Ok(Err(e)) => {
            warn!("Handler for {kind} failed on {id}: {e}");
            DispatchOutcome::Failed(e.to_string())
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            warn!("Handler for {kind} panicked on {id}: {reason}");
            DispatchOutcome::Failed(reason)
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

/// `node_announce`: learn the announced address, then keep flooding.
///
/// A node we had never heard of also gets our own announce straight back so
/// it can reach us without waiting for its own discovery.
pub fn announce_handler() -> MessageHandler {
    handler(|message: Message, node: NodeHandle| async move {
        let announce = AnnouncePayload::parse(&message.payload)?;
        let peer_id = announce.peer_id();

        if &peer_id != node.peer_id() {
            let now = chrono::Utc::now();
            let is_new = node.peers().upsert(&peer_id, &announce.host, announce.port, now);
            node.peers()
                .set_capabilities(&peer_id, announce.capabilities.clone());

            if is_new {
                info!(
                    "Discovered new node: {peer_id} at {}:{}",
                    announce.host, announce.port
                );
                let status = node.announce_to(&peer_id).await?;
                debug!("Announce reply to {peer_id}: {status:?}");
            }
        }

        node.forward(&message).await;
        Ok(())
    })
}

/// `chat_message`: hand the line to the application, then keep flooding.
pub fn chat_handler() -> MessageHandler {
    handler(|message: Message, node: NodeHandle| async move {
        let chat = ChatPayload::parse(&message.payload)?;
        info!("[CHAT from {}]: {}", message.sender_id, chat.text);

        node.forward(&message).await;
        node.deliver_local(message);
        Ok(())
    })
}

/// `node_leave`: forget the departing node. Never forwarded.
pub fn leave_handler() -> MessageHandler {
    handler(|message: Message, node: NodeHandle| async move {
        let leaving = LeavePayload::parse(&message.payload)
            .map(|p| p.peer_id())
            .unwrap_or_else(|_| message.sender_id.clone());

        if node.peers().remove(&leaving).is_some() {
            info!("Node {leaving} left the mesh");
        }
        Ok(())
    })
}

/// `resource_announce`: record the resource in the catalog, then keep flooding.
pub fn resource_handler() -> MessageHandler {
    handler(|message: Message, node: NodeHandle| async move {
        let resource = ResourceAnnouncePayload::parse(&message.payload)?;
        debug!(
            "Resource {} ({}) from {}",
            resource.resource_id, resource.resource_type, message.sender_id
        );
        node.resources()
            .insert(resource.into_resource(message.sender_id.clone()));

        node.forward(&message).await;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PeerId;

    fn make_message(kind: MessageKind) -> Message {
        Message::new(PeerId::from_string("test-sender"), kind, serde_json::json!({}))
    }

    fn noop() -> MessageHandler {
        handler(|_message, _node| async { Ok(()) })
    }

    #[test]
    fn test_register_and_replace() {
        let (tx, _rx) = mpsc::channel(4);
        let mut dispatcher = Dispatcher::new(tx);

        dispatcher.register(MessageKind::custom("ping"), noop());
        dispatcher.register(MessageKind::custom("ping"), noop());
        assert!(dispatcher.has_handler(&MessageKind::custom("ping")));
        assert_eq!(dispatcher.handler_count(), 1);

        assert!(dispatcher.unregister(&MessageKind::custom("ping")));
        assert!(dispatcher.handler_for(&MessageKind::custom("ping")).is_none());
    }

    #[tokio::test]
    async fn test_unhandled_message_is_queued() {
        let (tx, mut rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(tx);

        let first = make_message(MessageKind::KnowledgeUpdate);
        assert_eq!(dispatcher.enqueue(first.clone()), DispatchOutcome::Queued);
        assert_eq!(
            dispatcher.enqueue(make_message(MessageKind::KnowledgeUpdate)),
            DispatchOutcome::Dropped
        );
        assert_eq!(rx.recv().await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_closed_inbox_drops() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let dispatcher = Dispatcher::new(tx);
        assert_eq!(
            dispatcher.enqueue(make_message(MessageKind::custom("x"))),
            DispatchOutcome::Dropped
        );
    }
}
