//! Cross-runtime event coordination.
//!
//! The bridge hands notification lifecycle events produced on native
//! delivery threads to a decision-making consumer that lives behind a
//! message channel, blocks the producer until a decision arrives, and
//! guarantees each asynchronous outcome is delivered exactly once.
//!
//! Construction is explicit: [`Bridge::new`] builds one registry that owns
//! every component. There are no process-wide singletons, so tearing a
//! bridge down (and isolating tests) is just dropping it.

pub mod methods;

mod background;
mod bridge;
mod dispatcher;
mod event;
mod gate;
mod launcher;
mod pending;
mod reply;
mod store;

pub use background::BackgroundHandoff;
pub use bridge::Bridge;
pub use dispatcher::{ForegroundDispatcher, Listener, PrimaryQueue};
pub use event::NotificationEvent;
pub use gate::CompletionGate;
pub use launcher::{
    BackgroundChannel, BackgroundRuntimeLauncher, LaunchOutcome, LaunchState, RuntimeProvisioner,
};
pub use pending::PendingEventTable;
pub use reply::{Reply, ReplyGuard};
pub use store::{FileHandleStore, HandleKey, HandleStore, MemoryHandleStore, StoreError};
