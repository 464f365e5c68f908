//! Completion gate - blocks a producer thread until its event is decided.
//!
//! `submit` inserts the event, hands a serialized view to the decision sink
//! through the foreground dispatcher, then waits on the table's condition
//! variable until some `resolve` removes the id. Every path that cannot
//! reach a consumer resolves fail-open (`Display`) instead of leaving an
//! orphaned entry behind: an orphan would block its producer forever.

use std::sync::Arc;
use std::time::Duration;

use herald_types::{Decision, NotificationId};

use crate::dispatcher::ForegroundDispatcher;
use crate::event::NotificationEvent;
use crate::methods;
use crate::pending::{PendingEventTable, WaitOutcome};

pub struct CompletionGate {
    table: Arc<PendingEventTable>,
    dispatcher: ForegroundDispatcher,
    /// `None` waits until resolved, matching the delivery pipeline's
    /// historical behavior.
    timeout: Option<Duration>,
}

impl CompletionGate {
    #[must_use]
    pub fn new(
        table: Arc<PendingEventTable>,
        dispatcher: ForegroundDispatcher,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            table,
            dispatcher,
            timeout,
        }
    }

    #[must_use]
    pub fn table(&self) -> &PendingEventTable {
        &self.table
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether a decision sink is listening right now.
    #[must_use]
    pub fn has_consumer(&self) -> bool {
        self.dispatcher.has_listener(methods::WILL_DISPLAY)
    }

    /// Submit `event` and block until it is decided.
    ///
    /// Returns `Display` immediately when no decision sink is registered.
    /// Must not be called on the primary thread: the decision sink runs
    /// there, so waiting on it would never return.
    pub fn submit(&self, event: NotificationEvent) -> Decision {
        let id = event.id().clone();

        if !self.has_consumer() {
            tracing::debug!(id = %id, "No decision sink registered, displaying");
            return Decision::FAIL_OPEN;
        }
        if self.dispatcher.is_primary_thread() {
            tracing::warn!(id = %id, "submit called on the primary thread, displaying");
            return Decision::FAIL_OPEN;
        }

        let view = event.to_bridge_map();
        let ticket = match self.table.insert_awaited(event) {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(id = %id, "Rejecting submission: {e}");
                return Decision::FAIL_OPEN;
            }
        };

        // Covers a sink removed before the queued call runs, and a primary
        // queue dropped with the call still in it.
        let table = Arc::clone(&self.table);
        let undelivered = id.clone();
        let on_undelivered = move || {
            if table.settle_ticket(undelivered.as_str(), ticket, Decision::FAIL_OPEN) {
                tracing::warn!(id = %undelivered, "Decision sink unavailable, displaying");
            }
        };
        let delivered = view.and_then(|view| {
            self.dispatcher.invoke_or_else(methods::WILL_DISPLAY, view, on_undelivered)
        });
        if let Err(e) = delivered {
            tracing::warn!(id = %id, "Could not deliver event to decision sink: {e}");
            self.table.settle_ticket(id.as_str(), ticket, Decision::FAIL_OPEN);
        }

        match self.table.wait_settled(id.as_str(), ticket, self.timeout) {
            WaitOutcome::Settled(decision) => {
                tracing::debug!(id = %id, decision = decision.as_str(), "Notification decided");
                decision
            }
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    id = %id,
                    timeout_ms = self.timeout.map_or(0, |t| t.as_millis()),
                    "Decision timed out, displaying"
                );
                Decision::FAIL_OPEN
            }
        }
    }

    /// Record the decision for `id` and wake its producer.
    ///
    /// Returns `false` (and changes nothing) if `id` is unknown or already
    /// resolved. Racing resolvers are serialized by the table lock.
    pub fn resolve(&self, id: &str, decision: Decision) -> bool {
        if self.table.settle(id, decision).is_some() {
            tracing::debug!(id = %id, decision = decision.as_str(), "Resolved notification");
            return true;
        }
        tracing::warn!(id = %id, "Could not find pending notification to resolve");
        false
    }

    /// Shorthand for `resolve(id, Display)`.
    pub fn display(&self, id: &str) -> bool {
        self.resolve(id, Decision::Display)
    }

    /// Withhold display of `id` until [`CompletionGate::proceed`] is called.
    pub fn prevent_default(&self, id: &str) -> bool {
        if self.table.veto(id) {
            tracing::debug!(id = %id, "Display prevented by listener");
            return true;
        }
        tracing::warn!(id = %id, "Could not find pending notification to prevent");
        false
    }

    /// Finish the will-display round trip: suppress if any listener called
    /// `prevent_default`, display otherwise.
    pub fn proceed(&self, id: &str) -> bool {
        let settled = self.table.settle_with(id, |vetoed| {
            if vetoed {
                Decision::Suppress
            } else {
                Decision::Display
            }
        });
        match settled {
            Some(event) => {
                tracing::debug!(
                    id = %id,
                    decision = ?event.decision(),
                    "Proceeded with notification"
                );
                true
            }
            None => {
                tracing::warn!(id = %id, "Could not find pending notification to proceed with");
                false
            }
        }
    }

    /// Resolve everything still pending with the fail-open default.
    pub fn drain(&self) -> Vec<NotificationId> {
        self.table
            .drain(Decision::FAIL_OPEN)
            .into_iter()
            .map(|event| event.id().clone())
            .collect()
    }
}
