//! Realtime event pipeline.
//!
//! - `transport`: long-lived HTTP connection yielding raw body chunks.
//! - `frame`: event-stream framing over arbitrary chunk boundaries.
//! - `proto`: wire messages of the realtime frontend.
//! - `event`: typed events and the payload decoder.
//! - `dispatch`: dedup, ordering and fan-out to subscribers.
//! - `controller`: session renewal, reconnect pacing and connection state.
//! - `client`: the public facade tying the pieces together.

/// Public realtime client.
pub mod client;
/// Connection supervision and state.
pub mod controller;
/// Subscriber fan-out.
pub mod dispatch;
/// Typed events and payload decoding.
pub mod event;
/// Event-stream framing.
pub mod frame;
/// Realtime wire messages.
pub mod proto;
/// Stream connection transport.
pub mod transport;
