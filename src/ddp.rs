//! Outbound DDP frames.
//!
//! The backend speaks DDP over its WebSocket: every frame is a JSON object
//! with a `msg` discriminator. Push registration uses two server methods,
//! `raix:push-update` and `raix:push-setuser`. Builders here return plain
//! `serde_json::Value`s; the connection layer adds call ids.

use serde_json::{json, Value};

/// Server method that (re)announces a push registration.
pub const PUSH_UPDATE_METHOD: &str = "raix:push-update";
/// Server method that binds a user to a registration id.
pub const PUSH_SET_USER_METHOD: &str = "raix:push-setuser";
/// Namespace for the device token inside the push-update params.
pub const TOKEN_PLATFORM: &str = "apn";
/// Application identity used when none is configured.
pub const DEFAULT_APP_NAME: &str = "main";

/// Fields of a push-update announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushUpdate<'a> {
    /// Registration id of this installation.
    pub registration_id: &'a str,
    /// Currently authenticated user.
    pub user_id: &'a str,
    /// Device token from the platform.
    pub device_token: &'a str,
    /// Application identity; falls back to [`DEFAULT_APP_NAME`].
    pub app_name: Option<&'a str>,
}

/// `{msg: "method", method: "raix:push-update", params: [{...}]}`.
pub fn push_update(update: &PushUpdate<'_>) -> Value {
    let app_name = update
        .app_name
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_APP_NAME);

    json!({
        "msg": "method",
        "method": PUSH_UPDATE_METHOD,
        "params": [{
            "id": update.registration_id,
            "userId": update.user_id,
            "token": { TOKEN_PLATFORM: update.device_token },
            "appName": app_name,
            "metadata": {},
        }],
    })
}

/// `{msg: "method", method: "raix:push-setuser", userId, params: [id]}`.
pub fn push_set_user(registration_id: &str, user_id: &str) -> Value {
    json!({
        "msg": "method",
        "method": PUSH_SET_USER_METHOD,
        "userId": user_id,
        "params": [registration_id],
    })
}

/// DDP session handshake, sent first on every socket.
pub fn connect() -> Value {
    json!({
        "msg": "connect",
        "version": "1",
        "support": ["1", "pre2", "pre1"],
    })
}

/// Resume an existing login with a stored auth token.
pub fn resume_login(auth_token: &str) -> Value {
    json!({
        "msg": "method",
        "method": "login",
        "params": [{ "resume": auth_token }],
    })
}

/// Insert a call id into method frames that lack one.
///
/// Non-method frames are returned untouched.
pub fn with_call_id(mut frame: Value, call_id: u64) -> Value {
    if frame.get("msg").and_then(Value::as_str) != Some("method") {
        return frame;
    }
    if let Some(obj) = frame.as_object_mut() {
        obj.entry("id")
            .or_insert_with(|| Value::String(call_id.to_string()));
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_update_shape() {
        let msg = push_update(&PushUpdate {
            registration_id: "REG",
            user_id: "user-1",
            device_token: "tok",
            app_name: Some("chat.app"),
        });

        assert_eq!(
            msg,
            json!({
                "msg": "method",
                "method": "raix:push-update",
                "params": [{
                    "id": "REG",
                    "userId": "user-1",
                    "token": { "apn": "tok" },
                    "appName": "chat.app",
                    "metadata": {},
                }],
            })
        );
    }

    #[test]
    fn test_push_update_app_name_fallback() {
        for app_name in [None, Some("")] {
            let msg = push_update(&PushUpdate {
                registration_id: "REG",
                user_id: "u",
                device_token: "t",
                app_name,
            });
            assert_eq!(msg["params"][0]["appName"], "main");
        }
    }

    #[test]
    fn test_push_set_user_shape() {
        assert_eq!(
            push_set_user("REG", "user-1"),
            json!({
                "msg": "method",
                "method": "raix:push-setuser",
                "userId": "user-1",
                "params": ["REG"],
            })
        );
    }

    #[test]
    fn test_with_call_id_only_touches_methods() {
        let framed = with_call_id(push_set_user("REG", "u"), 7);
        assert_eq!(framed["id"], "7");

        let handshake = with_call_id(connect(), 7);
        assert!(handshake.get("id").is_none());
    }

    #[test]
    fn test_with_call_id_keeps_existing_id() {
        let frame = json!({ "msg": "method", "method": "x", "id": "mine" });
        assert_eq!(with_call_id(frame, 3)["id"], "mine");
    }
}
