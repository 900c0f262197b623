//! Analysis lifecycle events and end-of-analysis notifications.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, carrying a [`JobEvent`] per status change.
//! - [`Notifier`] — fire-and-forget notification once an analysis reaches
//!   a terminal state.
//! - [`delivery`] — concrete notifier channels (SMTP e-mail).

pub mod bus;
pub mod delivery;
pub mod notifier;

pub use bus::{EventBus, JobEvent};
pub use delivery::email::{EmailConfig, EmailNotifier};
pub use notifier::{NotifyError, Notifier, NullNotifier};
