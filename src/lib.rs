//! looper: autonomous task-loop runner with an out-of-process plugin system
//!
//! This library provides:
//! - A plugin catalog with user/project/builtin scopes and override
//!   semantics (project > user > builtin)
//! - A JSON-RPC-over-subprocess execution bridge with cancellation and
//!   graceful process termination
//! - A capability-based permission broker enforcing a declare-then-authorize
//!   security model
//! - Static plugin validation for operator tooling

pub mod config;
pub mod looperdir;
pub mod plugins;

pub use config::Config;
