//! At-most-once reply delivery.
//!
//! The native SDK may complete the same logical call twice (a cached
//! response followed by the network response). Every asynchronous
//! completion path funnels through a [`Reply`], whose [`ReplyGuard`] lets
//! exactly one result through.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use herald_types::{BridgeValue, ReplyError, ReplyResult};

use crate::dispatcher::ForegroundDispatcher;

/// One-shot completion flag.
#[derive(Debug, Default)]
pub struct ReplyGuard {
    set: AtomicBool,
}

impl ReplyGuard {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
        }
    }

    /// Flip the flag. Returns `true` for exactly one caller, ever.
    pub fn try_set(&self) -> bool {
        !self.set.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
}

type ReplyCallback = Box<dyn FnOnce(ReplyResult) + Send>;

/// Pending result of one asynchronous operation.
///
/// Completion is marshalled onto the primary thread, where the callback
/// runs. Any number of threads may race to complete; the first wins.
pub struct Reply {
    method: String,
    guard: ReplyGuard,
    callback: Mutex<Option<ReplyCallback>>,
    dispatcher: ForegroundDispatcher,
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("method", &self.method)
            .field("completed", &self.guard.is_set())
            .finish_non_exhaustive()
    }
}

impl Reply {
    pub fn new(
        dispatcher: ForegroundDispatcher,
        method: impl Into<String>,
        callback: impl FnOnce(ReplyResult) + Send + 'static,
    ) -> Self {
        Self {
            method: method.into(),
            guard: ReplyGuard::new(),
            callback: Mutex::new(Some(Box::new(callback))),
            dispatcher,
        }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.guard.is_set()
    }

    /// Deliver `result` unless a result was already delivered.
    pub fn complete(&self, result: ReplyResult) -> bool {
        if !self.guard.try_set() {
            tracing::debug!(method = %self.method, "Reply already submitted, ignoring duplicate");
            return false;
        }

        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(callback) = callback else {
            return false;
        };

        if let Err(e) = self.dispatcher.run_on_primary(move || callback(result)) {
            tracing::warn!(method = %self.method, "Dropping reply: {e}");
        }
        true
    }

    pub fn success(&self, value: impl Into<BridgeValue>) -> bool {
        self.complete(Ok(value.into()))
    }

    pub fn error(
        &self,
        code: &str,
        message: impl Into<String>,
        details: Option<BridgeValue>,
    ) -> bool {
        let mut err = ReplyError::new(code, message);
        if let Some(details) = details {
            err = err.with_details(details);
        }
        self.complete(Err(err))
    }

    pub fn not_implemented(&self) -> bool {
        self.complete(Err(ReplyError::not_implemented(&self.method)))
    }
}
