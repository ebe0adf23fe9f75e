//! Slack delivery for intake notifications.
//!
//! - **Block Kit** (`blocks`) - typed message builders
//! - **Intake messages** (`intake`) - intake, request thread and invoice payloads
//! - **Incoming webhook** (`webhook`) - bounded-retry delivery that requires a literal `ok`
//! - **Web API** (`api`) - `chat.postMessage` for threaded request updates

pub mod api;
pub mod blocks;
pub mod intake;
pub mod webhook;

pub use api::{ApiError, HttpSlackApi, SlackApi};
pub use blocks::{MessageBuilder, MessageTemplate};
pub use webhook::{DeliveryError, RetryPolicy, WebhookClient, WebhookTransport};
