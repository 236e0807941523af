//! Push registration announcements.
//!
//! Tells the active backend which registration id, user and device token
//! belong together. Both messages are fire-and-forget: nothing here waits
//! for an acknowledgement or retries. Callers re-invoke
//! [`RegistrationClient::announce_registration`] on the next lifecycle event
//! (token refresh, login, reconnect).

use std::sync::Arc;

use anyhow::Result;

use crate::connection::ConnectionSender;
use crate::ddp;
use crate::identity::{IdentityStore, KeyValueStore};

/// Source of the currently authenticated user.
pub trait SessionProvider: Send + Sync {
    /// User id of the authenticated session on the active backend, if any.
    fn authenticated_user_id(&self) -> Option<String>;
}

/// Announces push registration over the active connection.
pub struct RegistrationClient<S> {
    identity: Arc<IdentityStore<S>>,
    session: Arc<dyn SessionProvider>,
    connection: Arc<dyn ConnectionSender>,
    app_name: Option<String>,
}

impl<S> std::fmt::Debug for RegistrationClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationClient")
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

impl<S: KeyValueStore> RegistrationClient<S> {
    /// Build a client. `app_name` is the application identity sent with
    /// announcements; `None` falls back to [`ddp::DEFAULT_APP_NAME`].
    pub fn new(
        identity: Arc<IdentityStore<S>>,
        session: Arc<dyn SessionProvider>,
        connection: Arc<dyn ConnectionSender>,
        app_name: Option<String>,
    ) -> Self {
        Self {
            identity,
            session,
            connection,
            app_name,
        }
    }

    /// Send `raix:push-update` if both a device token and a session exist.
    ///
    /// Returns whether a message was handed to the connection.
    pub fn announce_registration(&self) -> Result<bool> {
        let Some(device_token) = self.identity.device_token()? else {
            log::debug!("[Push] No device token yet, skipping announcement");
            return Ok(false);
        };
        let Some(user_id) = self.session.authenticated_user_id() else {
            log::debug!("[Push] No authenticated user, skipping announcement");
            return Ok(false);
        };

        let registration_id = self.identity.get_or_create_registration_id()?;
        let message = ddp::push_update(&ddp::PushUpdate {
            registration_id: &registration_id,
            user_id: &user_id,
            device_token: &device_token,
            app_name: self.app_name.as_deref(),
        });

        self.connection.send(message);
        log::info!("[Push] Announced registration for user {user_id}");
        Ok(true)
    }

    /// Send `raix:push-setuser` binding `user_id` to this registration id.
    pub fn associate_user(&self, user_id: &str) -> Result<()> {
        let registration_id = self.identity.get_or_create_registration_id()?;
        self.connection
            .send(ddp::push_set_user(&registration_id, user_id));
        log::info!("[Push] Associated user {user_id} with registration");
        Ok(())
    }

    /// Record a token the platform just delivered, then re-announce.
    pub fn record_device_token(&self, token: &str) -> Result<bool> {
        self.identity.set_device_token(token)?;
        self.announce_registration()
    }
}
