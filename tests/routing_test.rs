//! Notification routing tests
//!
//! Routes payloads through the file-backed collaborators the binary uses:
//! - config-backed registry and navigator sharing one selection
//! - conversation cache keyed by server address
//! - REST reply sender against a mock backend
//! - a background host that can expire requests early

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use push_router::background::{BackgroundExecution, BackgroundTaskId, ExpirationHandler};
use push_router::config::{Config, ServerConfig};
use push_router::credentials::Session;
use push_router::rest::{RestMessageSender, RestTarget};
use push_router::router::{Conversation, ServerRegistry};
use push_router::store::{self, ConfigNavigator, ConfigServerRegistry, ConversationCache};
use push_router::{ConversationKind, NotificationRouter, RouteError};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Background host that records ends and can expire every request at once.
#[derive(Default)]
struct ExpiringHost {
    next_id: AtomicU64,
    ended: Mutex<Vec<BackgroundTaskId>>,
    handlers: Mutex<Vec<ExpirationHandler>>,
}

impl ExpiringHost {
    fn expire_all(&self) {
        let handlers: Vec<_> = self.handlers.lock().unwrap().drain(..).collect();
        for handler in handlers {
            handler();
        }
    }
}

impl BackgroundExecution for ExpiringHost {
    fn begin_background_task(&self, on_expiration: ExpirationHandler) -> BackgroundTaskId {
        self.handlers.lock().unwrap().push(on_expiration);
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn end_background_task(&self, id: BackgroundTaskId) {
        self.ended.lock().unwrap().push(id);
    }
}

fn config() -> Config {
    Config {
        servers: vec![
            ServerConfig {
                url: "https://one.example.com".to_string(),
                name: Some("One".to_string()),
            },
            ServerConfig {
                url: "https://two.example.com".to_string(),
                name: None,
            },
        ],
        selected_server: 0,
        app_name: None,
    }
}

fn conversations(config: &Config) -> ConversationCache {
    let mut entries = HashMap::new();
    entries.insert(
        "https://one.example.com".to_string(),
        vec![
            Conversation {
                id: "GENERAL".to_string(),
                kind: ConversationKind::Channel,
                name: Some("general".to_string()),
            },
            Conversation {
                id: "DM".to_string(),
                kind: ConversationKind::Direct,
                name: None,
            },
        ],
    );
    entries.insert(
        "two.example.com".to_string(),
        vec![Conversation {
            id: "TEAM".to_string(),
            kind: ConversationKind::Group,
            name: None,
        }],
    );
    ConversationCache::from_entries(entries, config)
}

fn payload(host: &str, rid: &str, kind: &str) -> Value {
    let document = json!({
        "host": host,
        "rid": rid,
        "type": kind,
        "sender": { "username": "alice" },
        "messageId": "m1",
    });
    json!({ "aps": { "alert": "hi" }, "ejson": document.to_string() })
}

struct Harness {
    router: NotificationRouter,
    registry: ConfigServerRegistry,
    host: Arc<ExpiringHost>,
}

fn harness(rest_base: Option<String>) -> Harness {
    let config = config();
    let cache = conversations(&config);
    let shared = store::shared(config);

    let session = Session {
        user_id: "u1".to_string(),
        auth_token: "secret".to_string(),
    };
    let targets = vec![
        rest_base.map(|base_url| RestTarget {
            base_url,
            session: Some(session),
        }),
        None,
    ];
    let sender = RestMessageSender::with_client(reqwest::Client::new(), targets);
    let host = Arc::new(ExpiringHost::default());
    let registry = ConfigServerRegistry::new(Arc::clone(&shared));

    let router = NotificationRouter::new(
        Arc::new(registry.clone()),
        Arc::new(cache),
        Arc::new(ConfigNavigator::in_memory(shared)),
        Arc::new(sender),
        Arc::clone(&host) as Arc<dyn BackgroundExecution>,
        Handle::current(),
    );

    Harness {
        router,
        registry,
        host,
    }
}

#[tokio::test]
async fn test_notification_for_selected_server_keeps_selection() {
    let h = harness(None);
    let routed = h
        .router
        .route(&payload("https://one.example.com/", "GENERAL", "c"), None)
        .unwrap();

    assert!(!routed.switched_server);
    assert_eq!(routed.conversation.name.as_deref(), Some("general"));
    assert_eq!(h.registry.selected_index(), 0);
}

#[tokio::test]
async fn test_notification_for_other_server_switches_selection() {
    let h = harness(None);
    assert!(h
        .router
        .handle_notification(&payload("two.example.com", "TEAM", "p"), None));
    assert_eq!(h.registry.selected_index(), 1);
}

#[tokio::test]
async fn test_rejections_leave_selection_untouched() {
    let h = harness(None);

    let unknown = h
        .router
        .route(&payload("https://three.example.com", "GENERAL", "c"), None);
    assert!(matches!(unknown, Err(RouteError::UnknownServer(_))));

    let missing_rid = json!({
        "ejson": json!({ "host": "https://two.example.com", "type": "p",
                         "sender": { "username": "alice" } }).to_string()
    });
    assert!(matches!(
        h.router.route(&missing_rid, None),
        Err(RouteError::MalformedPayload(_))
    ));

    let wrong_server = h
        .router
        .route(&payload("https://two.example.com", "GENERAL", "c"), None);
    assert!(matches!(
        wrong_server,
        Err(RouteError::UnresolvableConversation(_))
    ));

    assert_eq!(h.registry.selected_index(), 0);
    assert!(h.host.ended.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reply_is_posted_with_mention() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat.postMessage"))
        .and(body_json(json!({ "roomId": "GENERAL", "text": "on it @alice" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&backend)
        .await;

    let h = harness(Some(backend.uri()));
    let routed = h
        .router
        .route(&payload("https://one.example.com", "GENERAL", "c"), Some("on it"))
        .unwrap();
    routed.reply.unwrap().outcome().await.unwrap();

    assert_eq!(*h.host.ended.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_direct_reply_is_posted_verbatim() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({ "roomId": "DM", "text": "on it" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&backend)
        .await;

    let h = harness(Some(backend.uri()));
    let routed = h
        .router
        .route(&payload("https://one.example.com", "DM", "d"), Some("on it"))
        .unwrap();
    routed.reply.unwrap().outcome().await.unwrap();
}

#[tokio::test]
async fn test_expired_background_task_is_released_once() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&backend)
        .await;

    let h = harness(Some(backend.uri()));
    let routed = h
        .router
        .route(&payload("https://one.example.com", "GENERAL", "c"), Some("ok"))
        .unwrap();

    // Host expires the request while the send is still in flight.
    h.host.expire_all();
    assert!(routed.reply.unwrap().outcome().await.is_err());

    assert_eq!(*h.host.ended.lock().unwrap(), vec![1]);
}
