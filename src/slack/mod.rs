//! Slack Events API adapter.

pub mod client;
pub mod events;
pub mod server;
pub mod signature;

pub use client::SlackClient;
pub use events::{InboundMessage, SlackEnvelope, SlackEvent};
pub use server::{router, AppState};
