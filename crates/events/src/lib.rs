//! Callback delivery.
//!
//! Workers hand finished jobs to the [`CallbackDispatcher`] through a
//! [`DispatchHandle`]. The dispatcher owns the
//! `completed/failed -> notifying -> notified/notify_failed` part of the job
//! lifecycle and delivers the payload with bounded exponential backoff,
//! independently of job processing.

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod payload;

pub use config::DispatcherConfig;
pub use delivery::{authorization_value, DeliveryError, WebhookClient};
pub use dispatcher::{
    CallbackDispatcher, DispatchError, DispatchHandle, DispatchRequest, NotifyOutcome,
};
pub use payload::CallbackPayload;
