//! User-facing notifications and shared configuration broadcast.
//!
//! This module provides:
//! - The `Notifier` side channel and its stock implementations
//! - `ConfigBus`, a typed publish/subscribe channel
//! - `ModelConfig`, the model selection shared through the bus

mod bus;
mod notify;

pub use bus::{ConfigBus, ModelConfig, Subscription};
pub use notify::{
    CollectingNotifier, LoggingNotifier, NoOpNotifier, Notification, NotificationKind, Notifier,
};
#[cfg(test)]
pub use notify::MockNotifier;
