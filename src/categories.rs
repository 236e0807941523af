//! Notification categories registered with the platform at startup.
//!
//! Two categories exist so the platform can show the right action set per
//! notification: [`MESSAGE_CATEGORY`] carries the inline text-reply action,
//! [`MESSAGE_NO_REPLY_CATEGORY`] carries none.
//!
//! [`NotificationDelegate`] answers the platform's callbacks once
//! notifications arrive: foreground presentation and user responses.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::router::{NotificationRouter, RouteError, Routed};

/// Category of notifications that offer an inline reply.
pub const MESSAGE_CATEGORY: &str = "MESSAGE";
/// Category of notifications without actions.
pub const MESSAGE_NO_REPLY_CATEGORY: &str = "MESSAGE_NO_REPLY";
/// Identifier of the inline text-reply action.
pub const REPLY_ACTION: &str = "REPLY";
/// Action reported when the user opens the notification itself.
pub const DEFAULT_ACTION: &str = "DEFAULT";

/// A user action attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    /// Action identifier reported back when the user picks it.
    pub identifier: String,
    /// Button title.
    pub title: String,
    /// Whether the action opens a text field.
    pub text_input: bool,
    /// Whether the device must be unlocked first.
    pub authentication_required: bool,
}

impl NotificationAction {
    /// Inline text reply.
    pub fn reply() -> Self {
        Self {
            identifier: REPLY_ACTION.to_string(),
            title: "Reply".to_string(),
            text_input: true,
            authentication_required: true,
        }
    }
}

/// A named set of actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationCategory {
    /// Category identifier the backend references in its payloads.
    pub identifier: String,
    /// Actions offered, in display order.
    pub actions: Vec<NotificationAction>,
}

impl NotificationCategory {
    /// Messages that can be answered inline.
    pub fn message() -> Self {
        Self {
            identifier: MESSAGE_CATEGORY.to_string(),
            actions: vec![NotificationAction::reply()],
        }
    }

    /// Messages without actions.
    pub fn message_no_reply() -> Self {
        Self {
            identifier: MESSAGE_NO_REPLY_CATEGORY.to_string(),
            actions: Vec::new(),
        }
    }

    /// Whether this category offers the inline reply action.
    pub fn allows_reply(&self) -> bool {
        self.actions.iter().any(|a| a.identifier == REPLY_ACTION)
    }
}

/// Every category registered at startup.
pub fn all() -> Vec<NotificationCategory> {
    vec![
        NotificationCategory::message(),
        NotificationCategory::message_no_reply(),
    ]
}

/// Presentation capabilities requested from, or granted by, the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PresentationOptions {
    /// Show an alert banner.
    pub alert: bool,
    /// Play a sound.
    pub sound: bool,
    /// Update the app badge.
    pub badge: bool,
}

impl PresentationOptions {
    /// Requested once at setup.
    pub const AUTHORIZATION: Self = Self {
        alert: true,
        sound: true,
        badge: true,
    };

    /// How a notification is presented while the app is in the foreground.
    pub const FOREGROUND: Self = Self {
        alert: true,
        sound: true,
        badge: false,
    };
}

/// Platform notification center.
pub trait NotificationCenter {
    /// Ask the user for permission to present notifications.
    ///
    /// The outcome is reported asynchronously and not acted upon.
    fn request_authorization(&self, options: PresentationOptions);

    /// Replace the registered categories.
    fn set_categories(&self, categories: Vec<NotificationCategory>);
}

/// Register categories and request authorization. The result is not gated on.
pub fn setup_notification_center(center: &dyn NotificationCenter) {
    center.request_authorization(PresentationOptions::AUTHORIZATION);
    center.set_categories(all());
    log::debug!("[Notification] Categories registered");
}

/// Callbacks the platform notification center delivers to the app.
///
/// Tapping a notification and answering it inline both end up in the
/// router; only the [`REPLY_ACTION`] carries the typed text along.
#[derive(Debug)]
pub struct NotificationDelegate {
    router: Arc<NotificationRouter>,
}

impl NotificationDelegate {
    /// Delegate routing responses through `router`.
    pub fn new(router: Arc<NotificationRouter>) -> Self {
        Self { router }
    }

    /// How a notification arriving in the foreground is shown.
    pub fn will_present(&self) -> PresentationOptions {
        PresentationOptions::FOREGROUND
    }

    /// Handle the user's response to a notification. Returns whether it was routed.
    pub fn did_receive(&self, payload: &Value, action: &str, user_text: Option<&str>) -> bool {
        self.router
            .handle_notification(payload, reply_for(action, user_text))
    }

    /// Like [`NotificationDelegate::did_receive`], for a payload given as a
    /// JSON string, returning the routing outcome.
    pub fn respond_raw(
        &self,
        raw: &str,
        action: &str,
        user_text: Option<&str>,
    ) -> Result<Routed, RouteError> {
        self.router.handle_raw(raw, reply_for(action, user_text))
    }
}

fn reply_for<'a>(action: &str, user_text: Option<&'a str>) -> Option<&'a str> {
    if action == REPLY_ACTION {
        user_text
    } else {
        None
    }
}
