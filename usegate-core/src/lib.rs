//! UseGate Core: use-case allowlist and header policy.
//!
//! This library provides the file-backed allowlist store, the per-request
//! policy gate, the configuration file format and the metrics shared by the
//! HTTP proxy (`usegate-proxy`) and the administrative CLI (`usegate`).

pub mod allowlist;
pub mod config;
pub mod metrics;
pub mod policy;
