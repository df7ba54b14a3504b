//! UseGate HTTP proxy.
//!
//! Admits requests by their `X-Use-Case-ID` header and relays the admitted
//! ones to a single backend. The gate and the allowlist live in
//! `usegate-core`; this crate holds the HTTP side: forwarding client, local
//! endpoints, access logging, runtime tuning and the accept loop.

pub mod admin;
pub mod error;
pub mod forwarding;
pub mod gate_service;
pub mod logging_layer;
pub mod proxy_config;
pub mod server;
