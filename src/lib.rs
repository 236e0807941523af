//! Push Router - push notification routing for a multi-server chat client.
//!
//! This crate decides where an incoming push notification belongs and keeps
//! the device registered for push delivery on every backend it logs into.
//!
//! # Architecture
//!
//! The core is collaborator-agnostic: storage, the wire connection, the
//! platform notification facilities and navigation are all traits.
//!
//! - **Identity** - durable registration id and last device token
//! - **Registration** - fire-and-forget push announcements over DDP
//! - **Router** - payload → backend → conversation → navigation / reply
//!
//! The binary wires the traits to files, the OS keyring, a WebSocket and
//! the backend REST API.
//!
//! # Modules
//!
//! - [`identity`] - Registration id and device token storage
//! - [`registration`] - `raix:push-update` / `raix:push-setuser` announcements
//! - [`router`] - Notification routing and reply dispatch
//! - [`payload`] - Embedded notification payload parsing
//! - [`background`] - Exactly-once background-execution guard
//! - [`categories`] - Notification categories and presentation options
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod background;
pub mod categories;
pub mod connection;
pub mod ddp;
pub mod identity;
pub mod payload;
pub mod registration;
pub mod rest;
pub mod router;
pub mod store;
pub mod ws;

pub mod config;
pub mod credentials;
pub mod env;

// Re-export commonly used types
pub use config::Config;
pub use identity::{FileStore, IdentityStore, KeyValueStore, MemoryStore};
pub use payload::{ConversationKind, NotificationEvent};
pub use registration::{RegistrationClient, SessionProvider};
pub use router::{NotificationRouter, RouteError, Routed};
