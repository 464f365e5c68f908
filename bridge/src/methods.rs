//! Method names carried over the bridging channel.

/// Foreground listener that decides whether a notification is displayed.
pub const WILL_DISPLAY: &str = "herald#onWillDisplayNotification";

/// Background-runtime entry for notifications received while backgrounded.
pub const BACKGROUND_NOTIFICATION: &str = "herald#onBackgroundNotification";
