//! Runtime control endpoint
//!
//! A TCP listener speaking newline-delimited JSON-RPC lets a second process
//! read and change the interval and pool size of a running aggregator.

mod client;
mod protocol;
mod server;

pub use client::ControlClient;
pub use protocol::*;
pub use server::ControlServer;
