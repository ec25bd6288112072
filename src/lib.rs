//! Session state and streaming-run control for an agent chat client.
//!
//! The crate reduces a stream of agent protocol events into render-ready
//! session state: a timeline of messages, steps, and errors, a progress
//! ledger, a free-form agent state object, and the flags a host UI needs
//! (running, thinking, history refetch). Transport and persistence stay
//! behind traits; everything here is deterministic given the event stream.

pub mod config;
pub mod controller;
pub mod events;
pub mod history;
pub mod progress;
pub mod session;
pub mod timeline;
pub mod tools;
pub mod transport;
