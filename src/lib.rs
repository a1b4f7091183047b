//! stomp-core — a transport-independent implementation of STOMP (Simple
//! Text-Oriented Messaging Protocol) versions 1.0, 1.1, and 1.2.
//!
//! This crate provides two symmetrical frame engines, [`client::ClientEngine`]
//! and [`server::ServerEngine`], that each consume an opaque byte stream
//! through `feed` and emit an opaque byte stream through their embedder's
//! [`heartbeat::HeartbeatHost::send_bytes`]. Neither engine opens a socket,
//! polls, or blocks: every operation is synchronous and every callback runs
//! to completion before the call that triggered it returns. Embedding a
//! real transport (WebSocket, TCP, an in-memory test harness) is the
//! caller's job.
//!
//! # Module layout
//!
//! - [`frame`] — the in-memory `Frame` value, serialization, and
//!   version-aware header presence checks.
//! - [`parser`] — the incremental byte-stream framer.
//! - [`error`] — the `Protocol`/`Application` error taxonomy.
//! - [`heartbeat`] — the injectable-scheduler heartbeat timer pair.
//! - [`client`] — the client-side engine.
//! - [`server`] — the server-side engine.
//! - [`version`], [`ids`], [`subscription`], [`json`] — small supporting
//!   types shared by both engines: version negotiation, id generation,
//!   subscription/ack-mode bookkeeping, and the opt-in JSON body codec.
//! - [`testing`] — a fake-clock `Scheduler` for deterministic heartbeat
//!   tests, available unconditionally to this crate's own tests and to
//!   embedders behind the `testing` feature.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod ids;
pub mod json;
pub mod parser;
pub mod server;
pub mod subscription;
pub mod version;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
#[cfg(not(any(test, feature = "testing")))]
mod testing;
