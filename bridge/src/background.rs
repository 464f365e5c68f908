//! Background notification handoff.
//!
//! When no foreground runtime is alive, a notification is forwarded to the
//! user's background handler inside the secondary runtime. The runtime is
//! booted lazily from the stored dispatcher entrypoint; events arriving while
//! it starts are queued by the launcher and delivered once it is up.

use std::fmt;
use std::sync::Arc;

use herald_types::{BridgeError, BridgeMap, BridgeValue, CallbackHandle};

use crate::event::NotificationEvent;
use crate::launcher::{BackgroundRuntimeLauncher, LaunchOutcome};
use crate::methods;
use crate::store::{HandleKey, HandleStore, StoreError};

pub struct BackgroundHandoff {
    launcher: Arc<BackgroundRuntimeLauncher>,
    store: Arc<dyn HandleStore>,
}

impl fmt::Debug for BackgroundHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundHandoff")
            .field("launcher", &self.launcher)
            .field("dispatcher_handle", &self.store.get(HandleKey::Dispatcher))
            .field("user_handle", &self.store.get(HandleKey::UserHandler))
            .finish()
    }
}

impl BackgroundHandoff {
    #[must_use]
    pub fn new(launcher: Arc<BackgroundRuntimeLauncher>, store: Arc<dyn HandleStore>) -> Self {
        Self { launcher, store }
    }

    #[must_use]
    pub fn launcher(&self) -> &Arc<BackgroundRuntimeLauncher> {
        &self.launcher
    }

    /// Persist the entrypoint used to boot the secondary runtime.
    pub fn register_dispatcher_handle(&self, handle: CallbackHandle) -> Result<(), StoreError> {
        self.store.set(HandleKey::Dispatcher, handle)?;
        tracing::debug!(handle = %handle, "Registered background dispatcher");
        Ok(())
    }

    /// Persist the user's background notification handler.
    pub fn register_user_handle(&self, handle: CallbackHandle) -> Result<(), StoreError> {
        self.store.set(HandleKey::UserHandler, handle)?;
        tracing::debug!(handle = %handle, "Registered background handler");
        Ok(())
    }

    #[must_use]
    pub fn dispatcher_handle(&self) -> Option<CallbackHandle> {
        self.store.get(HandleKey::Dispatcher)
    }

    #[must_use]
    pub fn user_handle(&self) -> Option<CallbackHandle> {
        self.store.get(HandleKey::UserHandler)
    }

    /// Hand `event` to the background handler.
    ///
    /// Returns `Ok(false)` when no dispatcher entrypoint is registered.
    /// Otherwise delivery happens once the runtime is ready, possibly on
    /// another thread; a launch failure is logged and the event dropped.
    pub fn deliver(&self, event: &NotificationEvent) -> Result<bool, BridgeError> {
        let message = event.to_bridge_map()?;

        let Some(entrypoint) = self.dispatcher_handle() else {
            tracing::warn!(
                id = %event.id(),
                "No background dispatcher registered, dropping background notification"
            );
            return Ok(false);
        };

        let user_handle = self
            .user_handle()
            .map_or(0, |handle| handle.value().cast_signed());
        let id = event.id().clone();

        self.launcher.start(entrypoint, move |outcome: LaunchOutcome| match outcome {
            Ok(channel) => {
                let mut payload = BridgeMap::new();
                payload.insert(
                    "notificationCallbackHandle".into(),
                    BridgeValue::Int(user_handle),
                );
                payload.insert("message".into(), BridgeValue::Map(message));
                match channel.invoke(methods::BACKGROUND_NOTIFICATION, payload) {
                    Ok(()) => tracing::debug!(id = %id, "Delivered background notification"),
                    Err(e) => tracing::warn!(id = %id, "Background delivery failed: {e}"),
                }
            }
            Err(e) => {
                tracing::warn!(id = %id, "Dropping background notification: {e}");
            }
        });
        Ok(true)
    }
}
