//! DockScope host agent
//!
//! Samples the running containers of one host every interval and pushes the
//! batch to the server's ingestion endpoint. A small HTTP endpoint serves the
//! recent log tail of local containers.

pub mod client;
pub mod config;
pub mod log_server;

pub use client::PushClient;
pub use config::AgentArgs;
pub use log_server::LogServerState;
