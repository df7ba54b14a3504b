//! Administrative CLI for the UseGate allowlist.
//!
//! Every command maps onto one `AllowlistStore` operation; the proxy picks
//! up the result on its next reload.

pub mod cli;
pub mod commands;
pub mod error;
