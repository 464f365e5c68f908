//! Bridge root: one explicit registry owning every component.

use std::fmt;
use std::sync::Arc;

use herald_config::BridgeConfig;
use herald_types::{BridgeError, BridgeMap, Decision, LaunchError, ReplyResult};

use crate::background::BackgroundHandoff;
use crate::dispatcher::{ForegroundDispatcher, PrimaryQueue};
use crate::event::NotificationEvent;
use crate::gate::CompletionGate;
use crate::launcher::{BackgroundRuntimeLauncher, LaunchOutcome, RuntimeProvisioner};
use crate::methods;
use crate::pending::PendingEventTable;
use crate::reply::Reply;
use crate::store::{FileHandleStore, HandleStore, MemoryHandleStore, StoreError};

pub struct Bridge {
    config: BridgeConfig,
    dispatcher: ForegroundDispatcher,
    gate: Arc<CompletionGate>,
    handoff: BackgroundHandoff,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("pending", &self.gate.table().len())
            .field("handoff", &self.handoff)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Build a bridge whose primary thread is the calling thread.
    ///
    /// The returned queue must stay on this thread and be pumped for
    /// listener calls and replies to run.
    #[must_use]
    pub fn new(
        config: BridgeConfig,
        provisioner: Arc<dyn RuntimeProvisioner>,
        store: Arc<dyn HandleStore>,
    ) -> (Self, PrimaryQueue) {
        let (dispatcher, queue) = ForegroundDispatcher::new();
        let gate = Arc::new(CompletionGate::new(
            Arc::new(PendingEventTable::new()),
            dispatcher.clone(),
            config.decision_timeout(),
        ));
        let launcher = Arc::new(BackgroundRuntimeLauncher::new(provisioner));
        let handoff = BackgroundHandoff::new(launcher, store);

        tracing::debug!(
            timeout_ms = config.decision_timeout().map(|t| t.as_millis()),
            drain_budget = config.drain_budget(),
            "Bridge constructed"
        );
        let bridge = Self {
            config,
            dispatcher,
            gate,
            handoff,
        };
        (bridge, queue)
    }

    /// Like [`Bridge::new`], choosing the handle store from `config`: a
    /// file store when `store_path` is set, in-memory otherwise.
    pub fn open(
        config: BridgeConfig,
        provisioner: Arc<dyn RuntimeProvisioner>,
    ) -> Result<(Self, PrimaryQueue), StoreError> {
        let store: Arc<dyn HandleStore> = match config.store_path() {
            Some(path) => Arc::new(FileHandleStore::open(path)?),
            None => Arc::new(MemoryHandleStore::new()),
        };
        Ok(Self::new(config, provisioner, store))
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn dispatcher(&self) -> &ForegroundDispatcher {
        &self.dispatcher
    }

    /// Shared handle for producer threads.
    #[must_use]
    pub fn gate(&self) -> &Arc<CompletionGate> {
        &self.gate
    }

    #[must_use]
    pub fn launcher(&self) -> &Arc<BackgroundRuntimeLauncher> {
        self.handoff.launcher()
    }

    #[must_use]
    pub fn handoff(&self) -> &BackgroundHandoff {
        &self.handoff
    }

    /// Submit an event and block until decided. See [`CompletionGate::submit`].
    pub fn submit(&self, event: NotificationEvent) -> Decision {
        self.gate.submit(event)
    }

    pub fn resolve(&self, id: &str, decision: Decision) -> bool {
        self.gate.resolve(id, decision)
    }

    /// Install the consumer that receives will-display events.
    pub fn register_decision_sink(&self, sink: impl Fn(BridgeMap) + Send + Sync + 'static) {
        self.dispatcher.set_listener(methods::WILL_DISPLAY, sink);
    }

    /// Remove the consumer. Later submissions display immediately.
    pub fn unregister_decision_sink(&self) -> bool {
        self.dispatcher.remove_listener(methods::WILL_DISPLAY)
    }

    /// Boot the secondary runtime from the stored dispatcher entrypoint.
    pub fn start_background(&self, on_ready: impl FnOnce(LaunchOutcome) + Send + 'static) {
        match self.handoff.dispatcher_handle() {
            Some(entrypoint) => self.launcher().start(entrypoint, on_ready),
            None => {
                tracing::warn!("Cannot start background runtime without a dispatcher handle");
                on_ready(Err(LaunchError::MissingEntrypoint));
            }
        }
    }

    /// Forward an event to the background handler.
    pub fn deliver_background(&self, event: &NotificationEvent) -> Result<bool, BridgeError> {
        self.handoff.deliver(event)
    }

    /// Wrap `callback` so it runs at most once, on the primary thread.
    pub fn reply(
        &self,
        method: impl Into<String>,
        callback: impl FnOnce(ReplyResult) + Send + 'static,
    ) -> Reply {
        Reply::new(self.dispatcher.clone(), method, callback)
    }

    /// Stop accepting decisions and release every blocked producer with
    /// `Display`. Returns how many events were pending.
    pub fn shutdown(&self) -> usize {
        self.unregister_decision_sink();
        let drained = self.gate.drain();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Released pending notifications on shutdown");
        }
        drained.len()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
