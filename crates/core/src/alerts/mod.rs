//! Alert rules, evaluation and side effects
//!
//! - [`RuleBook`]: copy-on-write rule list, persisted after each create
//! - [`EventLog`]: append-only trigger history, persisted on every append
//! - [`AlertEngine`]: polling evaluator for threshold and log-pattern rules
//! - [`Dispatcher`]: bounded queue running notifications and remediation
//! - [`Notifier`]: email and chat transport

mod dispatch;
mod engine;
mod events;
mod notify;
mod persist;
mod rules;

#[cfg(test)]
mod tests;

pub use dispatch::{DispatchConfig, DispatchJob, DispatchStats, Dispatcher};
pub use engine::{
    AlertEngine, AlertEngineBuilder, AlwaysFire, EngineConfig, Measurement, TickReport,
    TriggerGate,
};
pub use events::EventLog;
pub use notify::{HttpNotifier, Notifier, TransportUnavailable};
pub use rules::{RuleBook, RuleError};

/// File names of the persisted alert state inside the data directory
pub const RULES_FILE: &str = "alert_rules.json";
pub const EVENTS_FILE: &str = "alert_events.json";
