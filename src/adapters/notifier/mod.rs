//! Notifier Adapters
//!
//! - `WebhookNotifier`: JSON POST with Discord-style `content` and `embeds`
//! - `LogNotifier`: dry-run delivery into the tracing log

mod format;
mod dry_run;
mod webhook;

pub use format::{alert_fields, alert_title, compact};
pub use dry_run::LogNotifier;
pub use webhook::WebhookNotifier;
