//! Telegram Bot API oracle (`getChatMember`).
//!
//! Any transport failure, timeout or unrecognized error answers UNKNOWN;
//! only an explicit status or a "user not found" style error is treated
//! as a definite answer.

use super::{BotStatus, MembershipOracle, Subscription, normalize_ref};
use crate::config::OracleConfig;
use crate::state::UserId;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub struct TelegramOracle {
    http_client: reqwest::Client,
    api_base: String,
    token: String,
    timeout: Duration,
    bot_id: OnceCell<i64>,
}

impl TelegramOracle {
    pub fn new(config: &OracleConfig) -> Self {
        let timeout = config.timeout();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pointex/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.bot_token.clone().unwrap_or_default(),
            timeout,
            bot_id: OnceCell::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Call a Bot API method. `None` on transport or decode failure.
    async fn call(&self, method: &str, query: &[(&str, String)]) -> Option<Value> {
        let request = self.http_client.get(self.method_url(method)).query(query);
        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                warn!(method, error = %e, "bot API request failed");
                return None;
            }
            Err(_) => {
                warn!(method, "bot API request timed out");
                return None;
            }
        };
        // Error replies carry a JSON body too, so the status code is not checked.
        match response.json::<Value>().await {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(method, error = %e, "failed to decode bot API response");
                None
            }
        }
    }

    async fn bot_id(&self) -> Option<i64> {
        self.bot_id
            .get_or_try_init(|| async {
                let json = self.call("getMe", &[]).await.ok_or(())?;
                json.pointer("/result/id").and_then(Value::as_i64).ok_or(())
            })
            .await
            .ok()
            .copied()
    }

    async fn chat_member(&self, channel_ref: &str, user_id: &str) -> Option<Value> {
        let chat = format!("@{}", normalize_ref(channel_ref));
        self.call(
            "getChatMember",
            &[("chat_id", chat), ("user_id", user_id.to_string())],
        )
        .await
    }
}

/// Map a `getChatMember` reply to a subscription answer.
pub(crate) fn classify_member_response(json: &Value) -> Subscription {
    if json.get("ok").and_then(Value::as_bool) == Some(true) {
        let status = json.pointer("/result/status").and_then(Value::as_str);
        return match status {
            Some("member" | "administrator" | "creator") => Subscription::Member,
            Some("restricted") => {
                if json.pointer("/result/is_member").and_then(Value::as_bool) == Some(true) {
                    Subscription::Member
                } else {
                    Subscription::NotMember
                }
            }
            Some("left" | "kicked") => Subscription::NotMember,
            _ => Subscription::Unknown,
        };
    }

    let description = json
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    if json.get("error_code").and_then(Value::as_i64) == Some(403)
        || description.starts_with("forbidden")
    {
        return Subscription::Unknown;
    }
    if description.contains("user not found") || description.contains("user not participant") {
        Subscription::NotMember
    } else {
        Subscription::Unknown
    }
}

fn classify_admin_response(json: &Value) -> BotStatus {
    match classify_member_response(json) {
        Subscription::Unknown => BotStatus::Unknown,
        _ => match json.pointer("/result/status").and_then(Value::as_str) {
            Some("administrator" | "creator") => BotStatus::Admin,
            _ => BotStatus::NotAdmin,
        },
    }
}

#[async_trait]
impl MembershipOracle for TelegramOracle {
    async fn check_subscription(&self, user: &UserId, channel_ref: &str) -> Subscription {
        let answer = match self.chat_member(channel_ref, user.as_str()).await {
            Some(json) => classify_member_response(&json),
            None => Subscription::Unknown,
        };
        debug!(user = %user, channel = %channel_ref, ?answer, "subscription checked");
        answer
    }

    async fn check_bot_admin(&self, channel_ref: &str) -> BotStatus {
        let Some(bot_id) = self.bot_id().await else {
            return BotStatus::Unknown;
        };
        match self.chat_member(channel_ref, &bot_id.to_string()).await {
            Some(json) => classify_admin_response(&json),
            None => BotStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statuses_map_to_subscription() {
        for (status, expected) in [
            ("member", Subscription::Member),
            ("administrator", Subscription::Member),
            ("creator", Subscription::Member),
            ("left", Subscription::NotMember),
            ("kicked", Subscription::NotMember),
            ("something_new", Subscription::Unknown),
        ] {
            let reply = json!({"ok": true, "result": {"status": status}});
            assert_eq!(classify_member_response(&reply), expected, "{status}");
        }

        let restricted = json!({"ok": true, "result": {"status": "restricted", "is_member": true}});
        assert_eq!(classify_member_response(&restricted), Subscription::Member);
    }

    #[test]
    fn errors_are_unknown_unless_definitely_absent() {
        let not_found = json!({"ok": false, "error_code": 400, "description": "Bad Request: user not found"});
        assert_eq!(classify_member_response(&not_found), Subscription::NotMember);

        let forbidden = json!({"ok": false, "error_code": 403, "description": "Forbidden: bot was kicked"});
        assert_eq!(classify_member_response(&forbidden), Subscription::Unknown);

        let throttled = json!({"ok": false, "error_code": 429, "description": "Too Many Requests"});
        assert_eq!(classify_member_response(&throttled), Subscription::Unknown);

        let not_participant = json!({"ok": false, "error_code": 400, "description": "Bad Request: user not participant"});
        assert_eq!(classify_member_response(&not_participant), Subscription::NotMember);

        let invalid_id = json!({"ok": false, "error_code": 400, "description": "Bad Request: PARTICIPANT_ID_INVALID"});
        assert_eq!(classify_member_response(&invalid_id), Subscription::Unknown);

        let bot_outside = json!({
            "ok": false,
            "error_code": 403,
            "description": "Forbidden: bot is not a participant of the channel"
        });
        assert_eq!(classify_member_response(&bot_outside), Subscription::Unknown);

        let forbidden_not_found = json!({"ok": false, "description": "Forbidden: user not found"});
        assert_eq!(classify_member_response(&forbidden_not_found), Subscription::Unknown);
    }

    #[test]
    fn admin_status_requires_admin_role() {
        let admin = json!({"ok": true, "result": {"status": "administrator"}});
        let member = json!({"ok": true, "result": {"status": "member"}});
        let error = json!({"ok": false, "description": "Bad Request: chat not found"});
        assert_eq!(classify_admin_response(&admin), BotStatus::Admin);
        assert_eq!(classify_admin_response(&member), BotStatus::NotAdmin);
        assert_eq!(classify_admin_response(&error), BotStatus::Unknown);
    }
}
