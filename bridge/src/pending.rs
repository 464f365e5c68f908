//! Pending event table - the single owner of in-flight notification state.
//!
//! Invariant: an id is in `pending` if and only if its decision is still
//! outstanding. Every operation takes the one table lock, so they are
//! atomic with respect to each other. The condition variable paired with
//! that lock is how blocked producers learn their insertion was settled.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use herald_types::{BridgeError, Decision, NotificationId};

use crate::event::NotificationEvent;

/// Identifies one awaited insertion.
///
/// Ids may be reused once resolved, so outcomes are keyed by ticket: a
/// producer never sees the decision made for a later event with its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Ticket(u64);

struct PendingEntry {
    event: NotificationEvent,
    /// A foreground listener asked to withhold display.
    vetoed: bool,
    /// Set when a producer is (or will be) blocked on this entry.
    ticket: Option<Ticket>,
}

#[derive(Default)]
struct TableState {
    pending: HashMap<NotificationId, PendingEntry>,
    /// Outcomes of awaited entries, consumed by the blocked producer.
    settled: HashMap<Ticket, Decision>,
    next_ticket: u64,
}

impl TableState {
    fn insert(
        &mut self,
        event: NotificationEvent,
        ticket: Option<Ticket>,
    ) -> Result<(), BridgeError> {
        if self.pending.contains_key(event.id()) {
            return Err(BridgeError::DuplicateId(event.id().clone()));
        }
        self.pending.insert(
            event.id().clone(),
            PendingEntry {
                event,
                vetoed: false,
                ticket,
            },
        );
        Ok(())
    }

    /// Remove `id` only if it is still the insertion behind `ticket`.
    fn take_ticketed(&mut self, id: &str, ticket: Ticket) -> Option<PendingEntry> {
        match self.pending.get(id) {
            Some(entry) if entry.ticket == Some(ticket) => self.pending.remove(id),
            _ => None,
        }
    }

    fn record(&mut self, entry: &mut PendingEntry, decision: Decision) {
        entry.event.decide(decision);
        if let Some(ticket) = entry.ticket {
            self.settled.insert(ticket, decision);
        }
    }
}

/// How a blocked wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Settled(Decision),
    TimedOut,
}

#[derive(Default)]
pub struct PendingEventTable {
    state: Mutex<TableState>,
    resolved: Condvar,
}

impl PendingEventTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `event`. Fails if its id is already pending.
    pub fn insert(&self, event: NotificationEvent) -> Result<(), BridgeError> {
        self.lock().insert(event, None)
    }

    /// Track `event` on behalf of a producer that will wait for it.
    pub(crate) fn insert_awaited(&self, event: NotificationEvent) -> Result<Ticket, BridgeError> {
        let mut state = self.lock();
        state.next_ticket += 1;
        let ticket = Ticket(state.next_ticket);
        state.insert(event, Some(ticket))?;
        Ok(ticket)
    }

    /// Snapshot of a pending event.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<NotificationEvent> {
        self.lock().pending.get(id).map(|entry| entry.event.clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().pending.contains_key(id)
    }

    /// Withdraw an event without a decision from the caller.
    ///
    /// A producer blocked on it is released with the fail-open default.
    pub fn remove(&self, id: &str) -> Option<NotificationEvent> {
        self.settle_with(id, |_| Decision::FAIL_OPEN)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Resolve `id` with `decision`, returning the removed event.
    pub(crate) fn settle(&self, id: &str, decision: Decision) -> Option<NotificationEvent> {
        self.settle_with(id, |_| decision)
    }

    /// Resolve `id` with a decision computed from its veto flag, under the
    /// same lock acquisition that removes it.
    pub(crate) fn settle_with(
        &self,
        id: &str,
        decide: impl FnOnce(bool) -> Decision,
    ) -> Option<NotificationEvent> {
        let mut state = self.lock();
        let mut entry = state.pending.remove(id)?;
        let decision = decide(entry.vetoed);
        state.record(&mut entry, decision);
        drop(state);
        self.resolved.notify_all();
        Some(entry.event)
    }

    /// Resolve `id` only if it is still the insertion identified by `ticket`.
    pub(crate) fn settle_ticket(&self, id: &str, ticket: Ticket, decision: Decision) -> bool {
        let mut state = self.lock();
        let Some(mut entry) = state.take_ticketed(id, ticket) else {
            return false;
        };
        state.record(&mut entry, decision);
        drop(state);
        self.resolved.notify_all();
        true
    }

    /// Mark a pending event as vetoed. Returns `false` if not pending.
    pub(crate) fn veto(&self, id: &str) -> bool {
        match self.lock().pending.get_mut(id) {
            Some(entry) => {
                entry.vetoed = true;
                true
            }
            None => false,
        }
    }

    /// Resolve every pending event with `decision`.
    pub(crate) fn drain(&self, decision: Decision) -> Vec<NotificationEvent> {
        let mut state = self.lock();
        let entries: Vec<PendingEntry> = state.pending.drain().map(|(_, entry)| entry).collect();
        let mut drained = Vec::with_capacity(entries.len());
        for mut entry in entries {
            state.record(&mut entry, decision);
            drained.push(entry.event);
        }
        drop(state);
        self.resolved.notify_all();
        drained
    }

    /// Block until the insertion behind `ticket` is settled, or `timeout`
    /// elapses.
    ///
    /// On timeout the entry is removed here without a decision, so a late
    /// resolution finds nothing and is a no-op.
    pub(crate) fn wait_settled(
        &self,
        id: &str,
        ticket: Ticket,
        timeout: Option<Duration>,
    ) -> WaitOutcome {
        let state = self.lock();
        let unsettled = |s: &mut TableState| !s.settled.contains_key(&ticket);

        let mut state = match timeout {
            None => self
                .resolved
                .wait_while(state, unsettled)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                let (mut state, result) = self
                    .resolved
                    .wait_timeout_while(state, timeout, unsettled)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && !state.settled.contains_key(&ticket) {
                    state.take_ticketed(id, ticket);
                    return WaitOutcome::TimedOut;
                }
                state
            }
        };

        WaitOutcome::Settled(
            state
                .settled
                .remove(&ticket)
                .unwrap_or(Decision::FAIL_OPEN),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use std::time::SystemTime;

    fn event(id: &str) -> NotificationEvent {
        NotificationEvent::new(id.into(), json!({ "title": id }), SystemTime::now())
    }

    #[test]
    fn insert_lookup_remove() {
        let table = PendingEventTable::new();
        table.insert(event("n1")).unwrap();

        let found = table.lookup("n1").unwrap();
        assert!(found.is_pending());
        assert_eq!(table.len(), 1);

        let removed = table.remove("n1").unwrap();
        assert_eq!(removed.id().as_str(), "n1");
        assert!(table.lookup("n1").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let table = PendingEventTable::new();
        table.insert(event("n1")).unwrap();
        assert_eq!(
            table.insert(event("n1")),
            Err(BridgeError::DuplicateId("n1".into()))
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn settle_records_decision_on_removed_event() {
        let table = PendingEventTable::new();
        table.insert(event("n1")).unwrap();
        let removed = table.settle("n1", Decision::Suppress).unwrap();
        assert_eq!(removed.decision(), Some(Decision::Suppress));
        assert!(table.settle("n1", Decision::Display).is_none());
    }

    #[test]
    fn unawaited_entries_leave_no_settled_residue() {
        let table = PendingEventTable::new();
        table.insert(event("n1")).unwrap();
        table.settle("n1", Decision::Suppress);
        assert!(table.lock().settled.is_empty());
    }

    #[test]
    fn veto_feeds_settle_with() {
        let table = PendingEventTable::new();
        table.insert(event("n1")).unwrap();
        assert!(table.veto("n1"));
        assert!(!table.veto("missing"));
        let removed = table
            .settle_with("n1", |vetoed| {
                if vetoed {
                    Decision::Suppress
                } else {
                    Decision::Display
                }
            })
            .unwrap();
        assert_eq!(removed.decision(), Some(Decision::Suppress));
    }

    #[test]
    fn resolved_before_wait_is_not_lost() {
        let table = PendingEventTable::new();
        let ticket = table.insert_awaited(event("n1")).unwrap();
        table.settle("n1", Decision::Suppress);
        assert_eq!(
            table.wait_settled("n1", ticket, None),
            WaitOutcome::Settled(Decision::Suppress)
        );
        assert!(table.lock().settled.is_empty());
    }

    #[test]
    fn reused_id_keeps_each_outcome_separate() {
        let table = PendingEventTable::new();
        let first = table.insert_awaited(event("x")).unwrap();
        table.settle("x", Decision::Suppress);

        // Same id submitted again before the first producer wakes.
        let second = table.insert_awaited(event("x")).unwrap();
        assert_ne!(first, second);
        table.settle("x", Decision::Display);

        assert_eq!(
            table.wait_settled("x", second, None),
            WaitOutcome::Settled(Decision::Display)
        );
        assert_eq!(
            table.wait_settled("x", first, None),
            WaitOutcome::Settled(Decision::Suppress)
        );
    }

    #[test]
    fn settle_ticket_ignores_a_newer_insertion() {
        let table = PendingEventTable::new();
        let stale = table.insert_awaited(event("x")).unwrap();
        table.settle("x", Decision::Display);
        let current = table.insert_awaited(event("x")).unwrap();

        assert!(!table.settle_ticket("x", stale, Decision::Display));
        assert!(table.contains("x"));
        assert!(table.settle_ticket("x", current, Decision::Suppress));
        assert_eq!(
            table.wait_settled("x", current, None),
            WaitOutcome::Settled(Decision::Suppress)
        );
    }

    #[test]
    fn wait_wakes_on_settle_from_other_thread() {
        let table = Arc::new(PendingEventTable::new());
        let ticket = table.insert_awaited(event("n1")).unwrap();

        let resolver = Arc::clone(&table);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.settle("n1", Decision::Suppress).is_some()
        });

        assert_eq!(
            table.wait_settled("n1", ticket, None),
            WaitOutcome::Settled(Decision::Suppress)
        );
        assert!(handle.join().unwrap());
    }

    #[test]
    fn timed_out_wait_removes_entry() {
        let table = PendingEventTable::new();
        let ticket = table.insert_awaited(event("n1")).unwrap();
        assert_eq!(
            table.wait_settled("n1", ticket, Some(Duration::from_millis(10))),
            WaitOutcome::TimedOut
        );
        assert!(!table.contains("n1"));
        assert!(table.settle("n1", Decision::Suppress).is_none());
    }

    #[test]
    fn drain_releases_every_waiter() {
        let table = Arc::new(PendingEventTable::new());
        let waiters: Vec<_> = (0..4)
            .map(|i| {
                let id = format!("n{i}");
                let ticket = table.insert_awaited(event(&id)).unwrap();
                let table = Arc::clone(&table);
                thread::spawn(move || table.wait_settled(&id, ticket, None))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(table.drain(Decision::Display).len(), 4);
        for waiter in waiters {
            assert_eq!(
                waiter.join().unwrap(),
                WaitOutcome::Settled(Decision::Display)
            );
        }
        assert!(table.lock().settled.is_empty());
    }
}
