//! REST client for posting inline replies.
//!
//! This module provides [`RestMessageSender`], the [`MessageSender`] the
//! binary hands to the router. Each configured backend gets its own target:
//! the HTTP base URL derived from its socket URL, plus the stored session.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;

use crate::config::Config;
use crate::credentials::{Credentials, Session};
use crate::router::{MessageSender, OutboundMessage};
use crate::ws::SOCKET_PATH;

/// HTTP request timeout.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoint that posts a message into a conversation.
const POST_MESSAGE_PATH: &str = "/api/v1/chat.postMessage";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageBody<'a> {
    room_id: &'a str,
    text: &'a str,
}

/// One backend the sender can post to.
#[derive(Debug, Clone)]
pub struct RestTarget {
    /// HTTP base URL, without trailing slash.
    pub base_url: String,
    /// Session used to authenticate, if logged in.
    pub session: Option<Session>,
}

/// Convert a canonical socket URL back into the backend's HTTP base URL.
///
/// `wss://host/prefix/websocket` becomes `https://host/prefix`.
#[must_use]
pub fn http_base_url(socket_url: &str) -> Option<String> {
    let mut url = Url::parse(socket_url).ok()?;
    let scheme = match url.scheme() {
        "wss" | "https" => "https",
        "ws" | "http" => "http",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;

    let path = url.path().trim_end_matches('/');
    let path = path.strip_suffix(SOCKET_PATH).unwrap_or(path).to_string();
    url.set_path(&path);

    Some(url.as_str().trim_end_matches('/').to_string())
}

/// [`MessageSender`] backed by the backend REST API.
#[derive(Debug, Clone)]
pub struct RestMessageSender {
    client: Client,
    targets: Vec<Option<RestTarget>>,
}

impl RestMessageSender {
    /// Creates a sender for every configured backend.
    ///
    /// Backends whose address cannot be normalized get no target; replies
    /// to them fail at send time.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_config(config: &Config, credentials: &Credentials) -> Result<Self> {
        let targets = config
            .servers
            .iter()
            .map(|server| {
                let socket_url = server.socket_url()?;
                Some(RestTarget {
                    base_url: http_base_url(&socket_url)?,
                    session: credentials.session(&socket_url).cloned(),
                })
            })
            .collect();

        let client = Client::builder().timeout(HTTP_REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, targets))
    }

    /// Creates a sender with a pre-configured HTTP client and explicit targets.
    pub fn with_client(client: Client, targets: Vec<Option<RestTarget>>) -> Self {
        Self { client, targets }
    }
}

#[async_trait]
impl MessageSender for RestMessageSender {
    async fn send_message(&self, server_index: usize, message: OutboundMessage) -> Result<()> {
        let target = self
            .targets
            .get(server_index)
            .and_then(Option::as_ref)
            .with_context(|| format!("No REST endpoint for server {server_index}"))?;
        let session = target
            .session
            .as_ref()
            .with_context(|| format!("Not logged in on {}", target.base_url))?;

        let url = format!("{}{}", target.base_url, POST_MESSAGE_PATH);
        let response = self
            .client
            .post(&url)
            .header("X-User-Id", &session.user_id)
            .header("X-Auth-Token", &session.auth_token)
            .json(&PostMessageBody {
                room_id: &message.conversation_id,
                text: &message.text,
            })
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        if response.status().is_success() {
            log::debug!("[Rest] Posted message to {}", message.conversation_id);
            Ok(())
        } else {
            anyhow::bail!("Failed to post message: {}", response.status())
        }
    }
}
