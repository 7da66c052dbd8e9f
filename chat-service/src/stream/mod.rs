//! The server-push event protocol.
//!
//! One request maps to one outbound stream of typed lifecycle events,
//! serialized as `data: <json>\n\n` frames. The server side owns ordered
//! emission and deterministic teardown; the client side owns decoding,
//! dispatch, and cancellation.

pub mod client;
pub mod events;
pub mod server;

pub use client::{ChatStreamClient, StreamCallbacks, StreamRequest};
pub use events::{StageStatus, StreamEvent, StreamSummary};
pub use server::EventSink;
