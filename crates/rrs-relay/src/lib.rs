//! # RRS Relay
//!
//! The operator's link to devices: relay transport, wire messages, and
//! supervision of the ledger event subscription.
//!
//! ## Overview
//!
//! Devices publish encrypted reports on a topic of an overlay network. A
//! relay forwards topic traffic to the operator over one persistent
//! WebSocket. The operator subscribes after every connect and answers each
//! report on a sender-specific reply topic.
//!
//! ## Key Types
//!
//! - [`RelayTransport`] / [`WsRelay`] / [`MemoryRelay`] - The relay connection
//! - [`InboundMessage`] / [`ReportResponse`] - Wire messages
//! - [`SubscriptionSupervisor`] - Liveness probe and resubscription
//! - [`PeriodicTask`] - Panic-restarting periodic task
//!
//! ## Message Flow
//!
//! ```text
//! Operator                              Relay
//!   |<------- (connect) ------------------|
//!   |-------- protocols_to_listen ------->|
//!   |<------- {"peerId"} -----------------|   heartbeat, ignored
//!   |<------- {"data": report} -----------|
//!   |-------- {"protocol": "/report/S"} ->|
//! ```

pub mod error;
pub mod messages;
pub mod supervisor;
pub mod transport;

pub use error::{RelayError, Result};
pub use messages::{
    InboundMessage, ReportPayload, ReportResponse, ResponseData, SubscribeMessage, REPORT_TOPIC,
};
pub use supervisor::{
    EventSubscription, PeriodicTask, QuotaSource, SubscriptionState, SubscriptionSupervisor,
    SupervisorConfig, SupervisorHandle,
};
pub use transport::{
    memory::{MemoryRelay, RelayPeer},
    RelayEvent, RelayTransport, WsRelay,
};
