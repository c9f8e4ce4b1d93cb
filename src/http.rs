//! Blocking HTTP transport backed by `reqwest`.
pub mod client;
pub mod config;
