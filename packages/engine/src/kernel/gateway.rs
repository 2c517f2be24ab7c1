//! Outbound client-event gateway.
//!
//! Every event the engine pushes toward clients passes through here before it
//! reaches NATS. Only a fixed allow-list of event names may be published
//! (anything else is an internal error), and payloads are sanitized so
//! unknown/dangerous object keys never reach the wire.

use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::common::{SessionId, UserId};
use crate::error::{EngineError, EngineResult};
use crate::kernel::nats::NatsPublisher;

/// Event names the gateway will publish. Anything outside this list is a bug
/// in the caller, not client-visible behavior.
pub const ALLOWED_EVENTS: &[&str] = &[
    "match_found",
    "matchmaking_timeout",
    "new_question",
    "answer_acknowledged",
    "point_awarded",
    "question_timeout",
    "score_update",
    "participant_finished",
    "game_end",
    "lobby_membership_update",
    "countdown_started",
    "countdown_cancelled",
];

/// Keys stripped from payloads before publication.
const DANGEROUS_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Where an event is delivered. The gateway process maps subjects to
/// connected clients.
#[derive(Debug, Clone)]
pub enum Address {
    User(UserId),
    Session(SessionId),
    Room(String),
}

impl Address {
    pub fn subject(&self) -> String {
        match self {
            Address::User(id) => format!("gateway.user.{}", id),
            Address::Session(id) => format!("gateway.session.{}", id),
            Address::Room(code) => format!("gateway.room.{}", code),
        }
    }
}

/// Publishes sanitized, allow-listed events to the push-delivery gateway.
#[derive(Clone)]
pub struct Gateway {
    publisher: Arc<dyn NatsPublisher>,
}

impl Gateway {
    pub fn new(publisher: Arc<dyn NatsPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish one event. Fails with `UnknownEvent` for names outside the
    /// allow-list; delivery itself is fire-and-forget at-most-once.
    pub async fn emit(&self, address: Address, event: &str, payload: Value) -> EngineResult<()> {
        if !ALLOWED_EVENTS.contains(&event) {
            return Err(EngineError::UnknownEvent(event.to_string()));
        }

        let envelope = json!({
            "event": event,
            "payload": sanitize(payload),
            "emitted_at": Utc::now(),
        });

        let subject = address.subject();
        debug!(subject = %subject, event = %event, "Publishing gateway event");

        self.publisher
            .publish(subject, Bytes::from(serde_json::to_vec(&envelope).map_err(anyhow::Error::from)?))
            .await?;
        Ok(())
    }
}

/// Recursively strip dangerous or private object keys from a payload.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !DANGEROUS_KEYS.contains(&k.as_str()) && !k.starts_with("__"))
                .map(|(k, v)| (k, sanitize(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::nats::TestNats;

    #[test]
    fn sanitize_strips_dangerous_keys() {
        let dirty = json!({
            "score": 3,
            "__proto__": {"polluted": true},
            "nested": {
                "constructor": "evil",
                "options": [{"prototype": 1, "text": "ok"}],
            },
        });

        let clean = sanitize(dirty);

        assert_eq!(clean["score"], 3);
        assert!(clean.get("__proto__").is_none());
        assert!(clean["nested"].get("constructor").is_none());
        assert_eq!(clean["nested"]["options"][0]["text"], "ok");
        assert!(clean["nested"]["options"][0].get("prototype").is_none());
    }

    #[test]
    fn sanitize_strips_private_prefixed_keys() {
        let clean = sanitize(json!({"__internal": 1, "public": 2}));
        assert!(clean.get("__internal").is_none());
        assert_eq!(clean["public"], 2);
    }

    #[tokio::test]
    async fn rejects_events_off_the_allow_list() {
        let gateway = Gateway::new(Arc::new(TestNats::new()));

        let err = gateway
            .emit(Address::Room("ab12".into()), "grant_admin", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::UnknownEvent(_)));
    }

    #[tokio::test]
    async fn publishes_enveloped_event_to_subject() {
        let nats = Arc::new(TestNats::new());
        let gateway = Gateway::new(nats.clone());
        let session = SessionId::new();

        gateway
            .emit(
                Address::Session(session),
                "score_update",
                json!({"score": 2, "__proto__": 1}),
            )
            .await
            .unwrap();

        let messages = nats.messages_for_subject(&format!("gateway.session.{}", session));
        assert_eq!(messages.len(), 1);

        let body: Value = nats.deserialize_message(&messages[0]).unwrap();
        assert_eq!(body["event"], "score_update");
        assert_eq!(body["payload"]["score"], 2);
        assert!(body["payload"].get("__proto__").is_none());
    }
}
