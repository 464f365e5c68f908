use std::borrow::Borrow;
use std::fmt;

/// Identifier of one notification occurrence, as reported by the delivery
/// pipeline. Uniqueness among in-flight events is the producer's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NotificationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for NotificationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Opaque reference to a callable registered in the secondary runtime.
///
/// The bridge never interprets the value; it only stores it and hands it
/// back to the runtime that minted it. Zero is reserved for "unset" by the
/// handle store and is never a valid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CallbackHandle(u64);

impl CallbackHandle {
    /// Returns `None` for the reserved zero value.
    #[must_use]
    pub fn new(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_handle_is_unset() {
        assert!(CallbackHandle::new(0).is_none());
        assert_eq!(CallbackHandle::new(7).map(CallbackHandle::value), Some(7));
    }

    #[test]
    fn notification_id_borrows_as_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(NotificationId::from("n1"), 1);
        assert_eq!(map.get("n1"), Some(&1));
    }
}
