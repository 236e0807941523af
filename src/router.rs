//! Notification routing.
//!
//! Turns one inbound notification into navigation and, for inline-reply
//! actions, an outbound message:
//!
//! ```text
//! payload ──parse──► NotificationEvent
//!         ──socket_url(host)──► canonical backend URL
//!         ──ServerRegistry──► server index
//!         ──ConversationLookup(index, rid)──► Conversation
//!         ──► switch server  (index != selected)
//!             focus conversation  (index == selected)
//!         ──► reply dispatch under a BackgroundTask  (optional)
//! ```
//!
//! Every rejection is silent at the boundary: [`NotificationRouter::handle_notification`]
//! returns `false` and nothing else happens. No collaborator is called with a
//! mutating request before all lookups have succeeded.
//!
//! The router holds no ambient state. The conversation id is passed to the
//! lookup explicitly, so concurrent invocations do not interfere.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::background::{BackgroundExecution, BackgroundTask};
use crate::payload::{ConversationKind, NotificationEvent};
use crate::ws::socket_url;

/// Why a notification could not be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Required field missing or unparseable.
    MalformedPayload(String),
    /// Host does not resolve to a configured backend.
    UnknownServer(String),
    /// Backend known, conversation not found.
    UnresolvableConversation(String),
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedPayload(msg) => write!(f, "Malformed payload: {msg}"),
            Self::UnknownServer(host) => write!(f, "Unknown server: {host}"),
            Self::UnresolvableConversation(id) => write!(f, "Unresolvable conversation: {id}"),
        }
    }
}

impl std::error::Error for RouteError {}

/// A conversation as known to the local data layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id (`rid`).
    pub id: String,
    /// Conversation kind.
    pub kind: ConversationKind,
    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Message to post into a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target conversation id.
    pub conversation_id: String,
    /// Message text.
    pub text: String,
}

/// Ordered collection of configured backends, one of them selected.
pub trait ServerRegistry: Send + Sync {
    /// Index of the backend whose canonical socket URL equals `socket_url`.
    fn index_for_url(&self, socket_url: &str) -> Option<usize>;

    /// Index of the currently selected backend.
    fn selected_index(&self) -> usize;
}

/// Local conversation data.
pub trait ConversationLookup: Send + Sync {
    /// Resolve the conversation a notification points at.
    fn conversation_for_notification(
        &self,
        server_index: usize,
        conversation_id: &str,
    ) -> Option<Conversation>;
}

/// Application navigation.
pub trait Navigator: Send + Sync {
    /// Start switching to another backend. Must return without waiting for the switch.
    fn change_selected_server(&self, index: usize);

    /// Make `conversation` the active one in the visible conversation view.
    fn focus_conversation(&self, conversation: &Conversation);
}

/// Messaging layer used for inline replies.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Post `message` on the backend at `server_index`.
    async fn send_message(&self, server_index: usize, message: OutboundMessage)
        -> anyhow::Result<()>;
}

/// Reply text as posted: non-direct conversations mention the sender.
#[must_use]
pub fn compose_reply_text(reply: &str, sender_username: &str, kind: ConversationKind) -> String {
    if kind.is_direct() {
        reply.to_string()
    } else {
        format!("{reply} @{sender_username}")
    }
}

/// In-flight reply send.
#[derive(Debug)]
pub struct ReplyDispatch {
    handle: JoinHandle<anyhow::Result<()>>,
}

impl ReplyDispatch {
    /// Wait for the send to finish.
    pub async fn outcome(self) -> anyhow::Result<()> {
        self.handle
            .await
            .map_err(|e| anyhow::anyhow!("reply task failed: {e}"))?
    }
}

/// Result of a successfully routed notification.
#[derive(Debug)]
pub struct Routed {
    /// Backend the notification belongs to.
    pub server_index: usize,
    /// Resolved conversation.
    pub conversation: Conversation,
    /// Whether a server switch was requested (otherwise the conversation was focused).
    pub switched_server: bool,
    /// Reply send, if the notification carried a reply.
    pub reply: Option<ReplyDispatch>,
}

/// Routes inbound notifications to backends and conversations.
pub struct NotificationRouter {
    registry: Arc<dyn ServerRegistry>,
    conversations: Arc<dyn ConversationLookup>,
    navigator: Arc<dyn Navigator>,
    sender: Arc<dyn MessageSender>,
    background: Arc<dyn BackgroundExecution>,
    runtime: Handle,
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter").finish_non_exhaustive()
    }
}

impl NotificationRouter {
    /// Build a router. Reply sends are spawned on `runtime`.
    pub fn new(
        registry: Arc<dyn ServerRegistry>,
        conversations: Arc<dyn ConversationLookup>,
        navigator: Arc<dyn Navigator>,
        sender: Arc<dyn MessageSender>,
        background: Arc<dyn BackgroundExecution>,
        runtime: Handle,
    ) -> Self {
        Self {
            registry,
            conversations,
            navigator,
            sender,
            background,
            runtime,
        }
    }

    /// Route a raw payload. Returns `true` once navigation (and the reply, if
    /// any) has been initiated; `false` drops the notification.
    pub fn handle_notification(&self, payload: &Value, reply: Option<&str>) -> bool {
        match self.route(payload, reply) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("[Notification] Dropped: {e}");
                false
            }
        }
    }

    /// Route a payload given as a JSON string.
    pub fn handle_raw(&self, raw: &str, reply: Option<&str>) -> Result<Routed, RouteError> {
        let payload: Value = serde_json::from_str(raw)
            .map_err(|e| RouteError::MalformedPayload(format!("payload is not JSON: {e}")))?;
        self.route(&payload, reply)
    }

    /// Parse and route a raw payload.
    pub fn route(&self, payload: &Value, reply: Option<&str>) -> Result<Routed, RouteError> {
        let event = NotificationEvent::from_payload(payload)?;
        self.route_event(&event, reply)
    }

    /// Route an already parsed event.
    pub fn route_event(
        &self,
        event: &NotificationEvent,
        reply: Option<&str>,
    ) -> Result<Routed, RouteError> {
        let url = socket_url(&event.host)
            .ok_or_else(|| RouteError::UnknownServer(event.host.clone()))?;
        let server_index = self
            .registry
            .index_for_url(&url)
            .ok_or(RouteError::UnknownServer(url))?;

        let conversation = self
            .conversations
            .conversation_for_notification(server_index, &event.conversation_id)
            .ok_or_else(|| RouteError::UnresolvableConversation(event.conversation_id.clone()))?;

        let switched_server = server_index != self.registry.selected_index();
        if switched_server {
            log::info!("[Notification] Switching to server {server_index}");
            self.navigator.change_selected_server(server_index);
        } else {
            self.navigator.focus_conversation(&conversation);
        }

        let reply = reply.map(|text| {
            self.dispatch_reply(server_index, &conversation, &event.sender_username, text)
        });

        Ok(Routed {
            server_index,
            conversation,
            switched_server,
            reply,
        })
    }

    fn dispatch_reply(
        &self,
        server_index: usize,
        conversation: &Conversation,
        sender_username: &str,
        reply: &str,
    ) -> ReplyDispatch {
        let message = OutboundMessage {
            conversation_id: conversation.id.clone(),
            text: compose_reply_text(reply, sender_username, conversation.kind),
        };

        // Held until the send completes; released exactly once even if the
        // host expires it first or the task is dropped unpolled.
        let task = BackgroundTask::begin(Arc::clone(&self.background));
        let sender = Arc::clone(&self.sender);

        let handle = self.runtime.spawn(async move {
            let result = sender.send_message(server_index, message).await;
            match &result {
                Ok(()) => log::info!("[Notification] Reply sent"),
                Err(e) => log::warn!("[Notification] Reply failed: {e:#}"),
            }
            task.release();
            result
        });

        ReplyDispatch { handle }
    }
}
