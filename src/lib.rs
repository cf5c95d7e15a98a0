//! Client for the analytics/chat API: typed requests, the streamed chat reply
//! reader and the terminal views built on top of them.

pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod format;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod sse;
pub mod ui;

#[cfg(test)]
mod test_support;

pub use client::{ApiClient, ClientConfig, collect_reply, write_reply};
pub use error::{ClientError, ClientResult};
pub use protocol::{ChatMessage, DashboardStats, Period, Role, StreamEvent};
pub use sse::{SseDecoder, read_reply};
