//! Edge agent: the server half of the push/pull protocol
//!
//! An agent runs on every edge node next to that node's own
//! [`TunnelController`](crate::wireguard::TunnelController). The control
//! plane pushes peer sets and firewall rules to it and polls its status.

pub mod api;
pub mod logs;
pub mod server;

pub use api::{LogEvent, BASE_PATH, SYNC_HASH_FILE, TOKEN_HEADER};
pub use logs::{BroadcastLogLayer, LogBus};
pub use server::{router, serve, AgentState};
