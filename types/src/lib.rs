//! Core domain types for Herald.
//!
//! This crate contains pure domain types with no IO, no threads, and minimal
//! dependencies. Everything here can be used from any layer of the bridge.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod ids;
mod value;

pub use ids::{CallbackHandle, NotificationId};
pub use value::{BridgeMap, BridgeValue, bridge_map_from_json};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Decisions
// ============================================================================

/// Resolved outcome of a notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Display,
    Suppress,
}

impl Decision {
    /// The outcome used whenever the bridge must proceed without a consumer.
    pub const FAIL_OPEN: Self = Self::Display;

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Suppress => "suppress",
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures inside the bridging layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("notification {0} is already pending")]
    DuplicateId(NotificationId),
    #[error("cannot convert payload to a bridging map: {0}")]
    Serialization(String),
    #[error("bridging channel is closed")]
    ChannelClosed,
}

/// Why the secondary runtime did not come up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("no background entrypoint has been registered")]
    MissingEntrypoint,
    #[error("background runtime failed to start: {0}")]
    Provisioning(String),
}

/// Error half of an asynchronous reply.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct ReplyError {
    code: String,
    message: String,
    details: Option<BridgeValue>,
}

impl ReplyError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: BridgeValue) -> Self {
        self.details = Some(details);
        self
    }

    /// Reply for a method the handler does not implement.
    #[must_use]
    pub fn not_implemented(method: &str) -> Self {
        Self::new("not_implemented", format!("{method} is not implemented"))
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn details(&self) -> Option<&BridgeValue> {
        self.details.as_ref()
    }
}

/// The single tagged outcome of an asynchronous operation.
pub type ReplyResult = Result<BridgeValue, ReplyError>;
