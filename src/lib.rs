//! forgeq: an in-memory job broker over TCP.
//!
//! Clients add jobs to named queues, reserve the highest-priority ready job
//! for processing, and delete jobs once they are done. Everything lives in
//! memory; the broker is a building block for fanning background work out to
//! cooperating worker processes, not a durable store.

pub mod broker;
pub mod client;
pub mod codec;
pub mod parser;
pub mod queue;
pub mod server;
pub mod types;
