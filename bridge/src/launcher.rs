//! Background runtime launcher.
//!
//! Provisioning the secondary runtime is expensive and must happen once.
//! The state only moves forward:
//!
//! ```text
//! NotStarted --CAS--> Starting --provisioned (ok or failed)--> Ready
//! ```
//!
//! Exactly one `start` caller wins the CAS and provisions with its
//! entrypoint. Callers that lose while `Starting` queue their callback;
//! callers arriving after `Ready` are called back immediately. Subscribers
//! are always called back, with the failure if provisioning failed, so none
//! of them hangs. Retrying after a failure is up to the embedder.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use herald_types::{BridgeError, BridgeMap, CallbackHandle, LaunchError};

const NOT_STARTED: u8 = 0;
const STARTING: u8 = 1;
const READY: u8 = 2;

/// Channel into a running secondary runtime.
pub trait BackgroundChannel: Send + Sync {
    fn invoke(&self, method: &str, payload: BridgeMap) -> Result<(), BridgeError>;
}

/// Stands up the secondary runtime for a given entrypoint.
pub trait RuntimeProvisioner: Send + Sync {
    fn provision(
        &self,
        entrypoint: CallbackHandle,
    ) -> Result<Arc<dyn BackgroundChannel>, LaunchError>;
}

/// What every `on_ready` subscriber receives.
pub type LaunchOutcome = Result<Arc<dyn BackgroundChannel>, LaunchError>;

type OnReady = Box<dyn FnOnce(LaunchOutcome) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    NotStarted,
    Starting,
    Ready,
}

#[derive(Default)]
struct Waiters {
    queued: Vec<OnReady>,
    /// Set under this lock at the moment the state becomes `Ready`, so a
    /// subscriber can never slip in between the drain and the transition.
    outcome: Option<LaunchOutcome>,
}

pub struct BackgroundRuntimeLauncher {
    provisioner: Arc<dyn RuntimeProvisioner>,
    state: AtomicU8,
    entrypoint: OnceLock<CallbackHandle>,
    waiters: Mutex<Waiters>,
}

impl fmt::Debug for BackgroundRuntimeLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundRuntimeLauncher")
            .field("state", &self.state())
            .field("entrypoint", &self.entrypoint.get())
            .finish_non_exhaustive()
    }
}

impl BackgroundRuntimeLauncher {
    #[must_use]
    pub fn new(provisioner: Arc<dyn RuntimeProvisioner>) -> Self {
        Self {
            provisioner,
            state: AtomicU8::new(NOT_STARTED),
            entrypoint: OnceLock::new(),
            waiters: Mutex::new(Waiters::default()),
        }
    }

    fn lock_waiters(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> LaunchState {
        match self.state.load(Ordering::Acquire) {
            NOT_STARTED => LaunchState::NotStarted,
            STARTING => LaunchState::Starting,
            _ => LaunchState::Ready,
        }
    }

    /// `true` once provisioning has finished successfully.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == LaunchState::Ready && matches!(self.lock_waiters().outcome, Some(Ok(_)))
    }

    /// The entrypoint of the winning `start` call.
    #[must_use]
    pub fn entrypoint(&self) -> Option<CallbackHandle> {
        self.entrypoint.get().copied()
    }

    /// Channel into the runtime, once it is up.
    #[must_use]
    pub fn channel(&self) -> Option<Arc<dyn BackgroundChannel>> {
        match &self.lock_waiters().outcome {
            Some(Ok(channel)) => Some(Arc::clone(channel)),
            _ => None,
        }
    }

    /// Ensure the runtime is provisioned, then call `on_ready` exactly once.
    ///
    /// The winning caller provisions on its own thread and runs every
    /// subscriber there. Entrypoints passed by losing callers are ignored.
    pub fn start(
        &self,
        entrypoint: CallbackHandle,
        on_ready: impl FnOnce(LaunchOutcome) + Send + 'static,
    ) {
        if self
            .state
            .compare_exchange(NOT_STARTED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.provision_as_winner(entrypoint, Box::new(on_ready));
            return;
        }

        if self.entrypoint().is_some_and(|winner| winner != entrypoint) {
            tracing::debug!(
                ignored = %entrypoint,
                "Background runtime already started with a different entrypoint"
            );
        }

        let mut waiters = self.lock_waiters();
        match waiters.outcome.clone() {
            Some(outcome) => {
                drop(waiters);
                tracing::debug!("Background runtime already ready");
                notify(on_ready, outcome);
            }
            None => {
                tracing::debug!(
                    queued = waiters.queued.len() + 1,
                    "Background runtime starting, queueing subscriber"
                );
                waiters.queued.push(Box::new(on_ready));
            }
        }
    }

    fn provision_as_winner(&self, entrypoint: CallbackHandle, on_ready: OnReady) {
        // Only the CAS winner reaches here, so this set always succeeds.
        let _ = self.entrypoint.set(entrypoint);
        tracing::info!(entrypoint = %entrypoint, "Starting background runtime");

        let provisioner = Arc::clone(&self.provisioner);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| provisioner.provision(entrypoint)))
            .unwrap_or_else(|_| {
                Err(LaunchError::Provisioning(
                    "provisioner panicked".to_string(),
                ))
            });

        match &outcome {
            Ok(_) => tracing::info!("Background runtime ready"),
            Err(e) => tracing::warn!("Background runtime failed: {e}"),
        }

        let queued = {
            let mut waiters = self.lock_waiters();
            waiters.outcome = Some(outcome.clone());
            self.state.store(READY, Ordering::Release);
            std::mem::take(&mut waiters.queued)
        };

        notify(on_ready, outcome.clone());
        for subscriber in queued {
            notify(subscriber, outcome.clone());
        }
    }
}

/// Call one subscriber. A panic is logged and does not reach the caller of
/// `start` or the subscribers behind it.
fn notify(subscriber: impl FnOnce(LaunchOutcome), outcome: LaunchOutcome) {
    if panic::catch_unwind(AssertUnwindSafe(move || subscriber(outcome))).is_err() {
        tracing::warn!("Background runtime subscriber panicked");
    }
}
