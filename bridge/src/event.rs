//! Notification events tracked by the pending table.

use std::time::{SystemTime, UNIX_EPOCH};

use herald_types::{
    BridgeError, BridgeMap, BridgeValue, Decision, NotificationId, bridge_map_from_json,
};

/// One in-flight notification awaiting a display decision.
///
/// Constructors take `SystemTime` explicitly; callers own the clock. The
/// decision can only be recorded inside this crate, by the pending table at
/// the moment it removes the entry.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    id: NotificationId,
    payload: serde_json::Value,
    decision: Option<Decision>,
    created_at: SystemTime,
}

impl NotificationEvent {
    #[must_use]
    pub fn new(id: NotificationId, payload: serde_json::Value, created_at: SystemTime) -> Self {
        Self {
            id,
            payload,
            decision: None,
            created_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> &NotificationId {
        &self.id
    }

    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// `None` while pending.
    #[must_use]
    pub fn decision(&self) -> Option<Decision> {
        self.decision
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.decision.is_none()
    }

    pub(crate) fn decide(&mut self, decision: Decision) {
        self.decision = Some(decision);
    }

    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Serialized view handed to listener code.
    ///
    /// ```text
    /// { "notificationId": "...", "createdAt": <unix millis>, "payload": { ... } }
    /// ```
    pub fn to_bridge_map(&self) -> Result<BridgeMap, BridgeError> {
        let payload = bridge_map_from_json(&self.payload)?;
        let created_at_ms = self
            .created_at
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);

        let mut map = BridgeMap::new();
        map.insert("notificationId".into(), self.id.as_str().into());
        map.insert("createdAt".into(), BridgeValue::Int(created_at_ms));
        map.insert("payload".into(), BridgeValue::Map(payload));
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn new_event_is_pending() {
        let event = NotificationEvent::new("n1".into(), json!({}), SystemTime::now());
        assert!(event.is_pending());
        assert_eq!(event.decision(), None);
        assert_eq!(event.payload(), &json!({}));
    }

    #[test]
    fn bridge_map_view_wraps_payload() {
        let created = UNIX_EPOCH + Duration::from_millis(1_500);
        let event = NotificationEvent::new("n1".into(), json!({ "title": "t" }), created);

        let map = event.to_bridge_map().unwrap();
        assert_eq!(map["notificationId"].as_str(), Some("n1"));
        assert_eq!(map["createdAt"].as_i64(), Some(1_500));
        assert_eq!(
            map["payload"].as_map().unwrap()["title"].as_str(),
            Some("t")
        );
    }

    #[test]
    fn non_object_payload_fails_serialization() {
        let event = NotificationEvent::new("n1".into(), json!("raw"), SystemTime::now());
        assert!(matches!(
            event.to_bridge_map(),
            Err(BridgeError::Serialization(_))
        ));
    }
}
